//! 发件箱中继
//!
//! 固定间隔轮询未处理的发件箱行，按创建顺序发布到持久主题，
//! 随后标记已处理。保证至少一次投递：发布与标记之间崩溃会导致
//! 重复发布，由下游投影器的幂等性吸收。
//!
//! 崩溃恢复仅依赖 `processed` 标志，没有任何内存队列状态是
//! 必须存活的。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use domain::{OutboxEvent, OutboxRepository};

use crate::broker::IdentityEventPublisher;
use crate::clock::Clock;
use crate::error::ApplicationError;

/// 中继配置
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// 轮询间隔
    pub poll_interval: Duration,
    /// 单轮取出的最大行数
    pub batch_size: u32,
    /// 单行单轮内的最大发布尝试次数
    pub max_publish_attempts: u32,
    /// 指数退避基数
    pub backoff_base: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 50,
            max_publish_attempts: 4,
            backoff_base: Duration::from_millis(100),
        }
    }
}

/// 一轮中继的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayCycle {
    pub published: usize,
    pub failed: usize,
}

/// 发件箱中继器
pub struct OutboxRelay {
    outbox: Arc<dyn OutboxRepository>,
    publisher: Arc<dyn IdentityEventPublisher>,
    clock: Arc<dyn Clock>,
    config: RelayConfig,
    shutdown: Arc<AtomicBool>,
}

impl OutboxRelay {
    pub fn new(
        outbox: Arc<dyn OutboxRepository>,
        publisher: Arc<dyn IdentityEventPublisher>,
        clock: Arc<dyn Clock>,
        config: RelayConfig,
    ) -> Self {
        Self {
            outbox,
            publisher,
            clock,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 轮询循环，直到 [`Self::stop`] 被调用。
    pub async fn run(&self) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "outbox relay started"
        );

        while !self.shutdown.load(Ordering::Relaxed) {
            match self.tick().await {
                Ok(cycle) => {
                    if cycle.published > 0 || cycle.failed > 0 {
                        debug!(
                            published = cycle.published,
                            failed = cycle.failed,
                            "relay cycle complete"
                        );
                    }
                }
                Err(err) => {
                    // 取行失败属于瞬态存储故障：记录后等待下一轮
                    error!(error = %err, "relay cycle failed");
                }
            }

            sleep(self.config.poll_interval).await;
        }

        info!("outbox relay stopped");
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// 单轮中继：取批、逐行发布、标记已处理。
    ///
    /// 发布在重试预算内失败的行保持 `processed=false`，记录告警后
    /// 继续处理批内后续行（身份事件按主体独立，跳过不破坏语义），
    /// 下一轮会重新尝试。
    pub async fn tick(&self) -> Result<RelayCycle, ApplicationError> {
        let rows = self.outbox.fetch_unprocessed(self.config.batch_size).await?;
        let mut cycle = RelayCycle::default();

        for row in rows {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            match self.publish_with_retry(&row).await {
                Ok(()) => {
                    self.outbox.mark_processed(row.id, self.clock.now()).await?;
                    cycle.published += 1;
                }
                Err(err) => {
                    warn!(
                        outbox_id = %row.id,
                        event_type = %row.event_type,
                        attempts = self.config.max_publish_attempts,
                        error = %err,
                        "outbox row exhausted retry budget, will retry next cycle"
                    );
                    cycle.failed += 1;
                }
            }
        }

        Ok(cycle)
    }

    async fn publish_with_retry(&self, row: &OutboxEvent) -> Result<(), ApplicationError> {
        let event = row.identity_event()?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.publisher.publish(&event).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    if attempt >= self.config.max_publish_attempts {
                        return Err(err.into());
                    }
                    let delay = backoff_delay(self.config.backoff_base, attempt);
                    debug!(
                        outbox_id = %row.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "publish failed, backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// 第 `attempt` 次失败后的退避时长（指数，封顶防溢出）。
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = std::cmp::min(attempt.saturating_sub(1), 20);
    base.saturating_mul(1u32 << exp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::{IdentityEvent, UserId};

    use crate::test_support::{FixedClock, FlakyIdentityPublisher, MemoryOutboxRepository};

    fn test_event() -> IdentityEvent {
        IdentityEvent::UserUpdated {
            user_id: UserId::new(),
            username: "alice".to_string(),
            display_name: Some("Alice".to_string()),
            avatar_url: None,
            timestamp: Utc::now(),
        }
    }

    fn relay_with(
        outbox: Arc<MemoryOutboxRepository>,
        publisher: Arc<FlakyIdentityPublisher>,
    ) -> OutboxRelay {
        OutboxRelay::new(
            outbox,
            publisher,
            Arc::new(FixedClock::new(Utc::now())),
            RelayConfig {
                poll_interval: Duration::from_millis(1),
                batch_size: 10,
                max_publish_attempts: 4,
                backoff_base: Duration::from_millis(1),
            },
        )
    }

    #[tokio::test]
    async fn tick_publishes_and_marks_processed_in_order() {
        let outbox = Arc::new(MemoryOutboxRepository::new());
        let first = outbox.record(&test_event()).await;
        let second = outbox.record(&test_event()).await;

        let publisher = Arc::new(FlakyIdentityPublisher::failing_first(0));
        let relay = relay_with(outbox.clone(), publisher.clone());

        let cycle = relay.tick().await.unwrap();
        assert_eq!(cycle, RelayCycle { published: 2, failed: 0 });

        let published = publisher.published().await;
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].subject_id(), first.subject_id);
        assert_eq!(published[1].subject_id(), second.subject_id);
        assert_eq!(outbox.unprocessed_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn publish_fails_three_times_then_succeeds_within_cap() {
        let outbox = Arc::new(MemoryOutboxRepository::new());
        outbox.record(&test_event()).await;

        // 前 3 次发布失败，第 4 次成功，仍在尝试上限之内
        let publisher = Arc::new(FlakyIdentityPublisher::failing_first(3));
        let relay = relay_with(outbox.clone(), publisher.clone());

        let cycle = relay.tick().await.unwrap();
        assert_eq!(cycle, RelayCycle { published: 1, failed: 0 });

        // 行恰好被标记处理一次，成功发布恰好一次
        assert_eq!(outbox.unprocessed_count().await.unwrap(), 0);
        assert_eq!(outbox.mark_processed_calls().await, 1);
        assert_eq!(publisher.published().await.len(), 1);
        assert_eq!(publisher.attempts().await, 4);
    }

    #[tokio::test]
    async fn exhausted_row_stays_unprocessed_and_is_retried_next_cycle() {
        let outbox = Arc::new(MemoryOutboxRepository::new());
        outbox.record(&test_event()).await;

        // 超出上限：4 次尝试全部失败
        let publisher = Arc::new(FlakyIdentityPublisher::failing_first(4));
        let relay = relay_with(outbox.clone(), publisher.clone());

        let cycle = relay.tick().await.unwrap();
        assert_eq!(cycle, RelayCycle { published: 0, failed: 1 });
        assert_eq!(outbox.unprocessed_count().await.unwrap(), 1);

        // 下一轮：故障已恢复，行被重新取出并成功
        let cycle = relay.tick().await.unwrap();
        assert_eq!(cycle, RelayCycle { published: 1, failed: 0 });
        assert_eq!(outbox.unprocessed_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stuck_row_does_not_block_later_rows() {
        let outbox = Arc::new(MemoryOutboxRepository::new());
        let stuck = outbox.record(&test_event()).await;
        outbox.record(&test_event()).await;

        // 只对第一行持续失败
        let publisher = Arc::new(FlakyIdentityPublisher::failing_subject(stuck.subject_id));
        let relay = relay_with(outbox.clone(), publisher.clone());

        let cycle = relay.tick().await.unwrap();
        assert_eq!(cycle, RelayCycle { published: 1, failed: 1 });
        assert_eq!(outbox.unprocessed_count().await.unwrap(), 1);
    }

    #[test]
    fn backoff_grows_exponentially() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(400));
    }
}
