//! Kafka 身份事件消费者
//!
//! 消费身份主题并把事件交给投影器应用到本地用户副本。
//! 单条事件应用失败只记录日志并继续消费：投影是幂等的，
//! 重投或跳过都不会破坏 last-write-wins 收敛。

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use application::ProfileProjector;
use domain::IdentityEvent;

use crate::config::KafkaConfig;
use crate::kafka::{KafkaError, KafkaResult};

/// Kafka 身份事件消费者
///
/// 作为消费者组成员，利用 Kafka 自动分区重平衡机制。
pub struct KafkaIdentityConsumer {
    consumer: StreamConsumer,
    topic: String,
    group_id: String,
    shutdown_signal: Arc<AtomicBool>,
}

impl KafkaIdentityConsumer {
    /// 创建新的 Kafka 消费者
    pub fn new(config: &KafkaConfig) -> KafkaResult<Self> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("group.id", &config.consumer_group_id)
            .set("bootstrap.servers", config.brokers.join(","))
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "10000")
            .set("heartbeat.interval.ms", "3000")
            .set("enable.auto.commit", "true")
            .set("auto.commit.interval.ms", "1000")
            .set("auto.offset.reset", "earliest");

        let consumer: StreamConsumer = client_config.create()?;

        info!(
            "Kafka 消费者创建成功，消费者组: {}",
            config.consumer_group_id
        );

        Ok(Self {
            consumer,
            topic: config.identity_events_topic.clone(),
            group_id: config.consumer_group_id.clone(),
            shutdown_signal: Arc::new(AtomicBool::new(false)),
        })
    }

    /// 订阅主题并持续消费，事件交给投影器。
    pub async fn run(&self, projector: Arc<ProfileProjector>) -> KafkaResult<()> {
        self.consumer.subscribe(&[&self.topic])?;

        info!("已订阅主题: {}", self.topic);

        let mut retry_count = 0;
        const MAX_RETRIES: u32 = 5;

        while !self.shutdown_signal.load(Ordering::Relaxed) {
            match self.consumer.recv().await {
                Ok(message) => {
                    retry_count = 0;

                    if let Err(e) = Self::project_message(&message, &projector).await {
                        // 至少一次语义下跳过坏消息，投影幂等可容忍
                        error!("处理身份事件失败: {}", e);
                    }
                }
                Err(e) => {
                    error!("接收消息失败: {}", e);
                    retry_count += 1;

                    if retry_count >= MAX_RETRIES {
                        error!("达到最大重试次数，停止消费");
                        return Err(KafkaError::ConsumerError {
                            message: format!("消费失败，已重试 {} 次", MAX_RETRIES),
                        });
                    }

                    let delay = Duration::from_millis(1000 * (2_u64.pow(retry_count - 1)));
                    warn!("等待 {:?} 后重试...", delay);
                    sleep(delay).await;
                }
            }
        }

        info!("消费循环已停止");
        Ok(())
    }

    async fn project_message(
        message: &BorrowedMessage<'_>,
        projector: &Arc<ProfileProjector>,
    ) -> KafkaResult<()> {
        let payload = message
            .payload()
            .ok_or_else(|| KafkaError::DeserializationError {
                message: "消息负载为空".to_string(),
            })?;

        let event: IdentityEvent =
            serde_json::from_slice(payload).map_err(|e| KafkaError::DeserializationError {
                message: format!("反序列化身份事件失败: {}", e),
            })?;

        debug!(
            "接收到身份事件: {} (分区: {}, 偏移量: {})",
            event.event_type(),
            message.partition(),
            message.offset()
        );

        projector
            .apply(&event)
            .await
            .map_err(|e| KafkaError::ConsumerError {
                message: format!("投影事件失败: {}", e),
            })
    }

    /// 优雅关闭消费者
    pub fn shutdown(&self) {
        info!("开始关闭 Kafka 消费者");
        self.shutdown_signal.store(true, Ordering::Relaxed);
    }

    /// 检查消费者是否正在运行
    pub fn is_running(&self) -> bool {
        !self.shutdown_signal.load(Ordering::Relaxed)
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }
}

impl Drop for KafkaIdentityConsumer {
    fn drop(&mut self) {
        self.shutdown_signal.store(true, Ordering::Relaxed);
        info!("Kafka 消费者正在释放资源");
    }
}
