//! Redis 实时事件订阅者
//!
//! 网关进程订阅全部会话频道（模式订阅）与全局频道，把事件送进
//! 通道交给会话注册表扇出。连接断开时按固定间隔指数退避重连；
//! Pub/Sub 没有回放，断线窗口内的事件靠客户端重连后的拉取补齐。

use futures_util::StreamExt;
use redis::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use domain::ChatEvent;

use crate::config::RedisConfig;
use crate::redis::{RedisError, RedisResult};

/// Redis 事件订阅者
pub struct RedisEventSubscriber {
    client: Client,
    channel_prefix: String,
    global_channel: String,
    reconnect_interval: Duration,
    shutdown_signal: Arc<AtomicBool>,
}

impl RedisEventSubscriber {
    /// 创建新的 Redis 订阅者
    pub fn new(config: &RedisConfig) -> RedisResult<Self> {
        let client =
            Client::open(config.url.as_str()).map_err(|e| RedisError::ConfigError {
                message: format!("创建 Redis 客户端失败: {}", e),
            })?;

        Ok(Self {
            client,
            channel_prefix: config.conversation_channel_prefix.clone(),
            global_channel: config.global_channel.clone(),
            reconnect_interval: Duration::from_millis(config.reconnect_interval_ms),
            shutdown_signal: Arc::new(AtomicBool::new(false)),
        })
    }

    /// 开始监听并返回事件通道。
    ///
    /// 监听循环运行在后台任务中，直到 [`Self::shutdown`] 或
    /// 接收端被丢弃。
    pub fn start(&self) -> mpsc::UnboundedReceiver<ChatEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();

        let client = self.client.clone();
        let pattern = format!("{}*", self.channel_prefix);
        let global_channel = self.global_channel.clone();
        let reconnect_interval = self.reconnect_interval;
        let shutdown_signal = Arc::clone(&self.shutdown_signal);

        tokio::spawn(async move {
            Self::listen_loop(
                client,
                pattern,
                global_channel,
                reconnect_interval,
                shutdown_signal,
                sender,
            )
            .await;
        });

        receiver
    }

    async fn listen_loop(
        client: Client,
        pattern: String,
        global_channel: String,
        reconnect_interval: Duration,
        shutdown_signal: Arc<AtomicBool>,
        sender: mpsc::UnboundedSender<ChatEvent>,
    ) {
        let mut retry_count: u32 = 0;
        const MAX_RETRIES: u32 = 5;

        while !shutdown_signal.load(Ordering::Relaxed) {
            match Self::subscribe_and_forward(
                &client,
                &pattern,
                &global_channel,
                &shutdown_signal,
                &sender,
            )
            .await
            {
                Ok(()) => {
                    retry_count = 0;
                    if sender.is_closed() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Redis 订阅循环错误: {}", e);
                    retry_count += 1;

                    if retry_count >= MAX_RETRIES {
                        error!("连接失败，已达最大重试次数，停止订阅");
                        break;
                    }

                    let delay = reconnect_interval * 2_u32.pow(retry_count - 1);
                    warn!("等待 {:?} 后重连...", delay);
                    sleep(delay).await;
                }
            }
        }

        info!("Redis 订阅循环已停止");
    }

    async fn subscribe_and_forward(
        client: &Client,
        pattern: &str,
        global_channel: &str,
        shutdown_signal: &Arc<AtomicBool>,
        sender: &mpsc::UnboundedSender<ChatEvent>,
    ) -> RedisResult<()> {
        let mut pubsub =
            client
                .get_async_pubsub()
                .await
                .map_err(|e| RedisError::ConnectionError {
                    message: format!("获取 PubSub 连接失败: {}", e),
                })?;

        pubsub
            .psubscribe(pattern)
            .await
            .map_err(|e| RedisError::SubscribeError {
                message: format!("模式订阅 {} 失败: {}", pattern, e),
            })?;
        pubsub
            .subscribe(global_channel)
            .await
            .map_err(|e| RedisError::SubscribeError {
                message: format!("订阅频道 {} 失败: {}", global_channel, e),
            })?;

        info!(pattern, global_channel, "subscribed to realtime channels");

        loop {
            if shutdown_signal.load(Ordering::Relaxed) || sender.is_closed() {
                return Ok(());
            }

            // 超时轮询，避免关闭信号被无限阻塞吞掉
            match tokio::time::timeout(Duration::from_millis(1000), async {
                pubsub.on_message().next().await
            })
            .await
            {
                Ok(Some(msg)) => {
                    let channel = msg.get_channel_name().to_string();
                    let payload: String = match msg.get_payload() {
                        Ok(payload) => payload,
                        Err(e) => {
                            error!("获取消息负载失败: {}", e);
                            continue;
                        }
                    };

                    match serde_json::from_str::<ChatEvent>(&payload) {
                        Ok(event) => {
                            debug!(
                                event_type = event.event_type(),
                                channel = %channel,
                                "realtime event received"
                            );
                            if sender.send(event).is_err() {
                                warn!("发送事件到通道失败，接收端已关闭");
                                return Ok(());
                            }
                        }
                        Err(e) => {
                            error!("反序列化事件失败: {} (频道: {})", e, channel);
                        }
                    }
                }
                Ok(None) => {
                    // Stream 结束，触发重连
                    return Err(RedisError::ConnectionError {
                        message: "订阅流意外结束".to_string(),
                    });
                }
                Err(_) => continue,
            }
        }
    }

    /// 优雅关闭订阅者
    pub fn shutdown(&self) {
        info!("开始关闭 Redis 订阅者");
        self.shutdown_signal.store(true, Ordering::Relaxed);
    }

    /// 检查是否正在运行
    pub fn is_running(&self) -> bool {
        !self.shutdown_signal.load(Ordering::Relaxed)
    }
}

impl Drop for RedisEventSubscriber {
    fn drop(&mut self) {
        self.shutdown_signal.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_creation() {
        let subscriber = RedisEventSubscriber::new(&RedisConfig::default());
        assert!(subscriber.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_signal() {
        let subscriber = RedisEventSubscriber::new(&RedisConfig::default()).unwrap();
        assert!(subscriber.is_running());

        subscriber.shutdown();
        assert!(!subscriber.is_running());
    }

    #[tokio::test]
    async fn test_round_trip_through_pubsub() {
        // 需要运行中的 Redis 实例才能通过
        if std::env::var("REDIS_INTEGRATION_TEST").is_ok() {
            use application::ChatEventPublisher;
            use chrono::Utc;
            use domain::UserId;

            let config = RedisConfig::default();
            let subscriber = RedisEventSubscriber::new(&config).unwrap();
            let mut receiver = subscriber.start();

            // 给订阅循环一点建立连接的时间
            sleep(Duration::from_millis(200)).await;

            let publisher = crate::redis::RedisEventPublisher::new(&config)
                .await
                .unwrap();
            let event = domain::ChatEvent::UserPresenceUpdate {
                user_id: UserId::new(),
                is_online: true,
                last_seen: Some(Utc::now()),
            };
            publisher.publish(&event).await.unwrap();

            let received = tokio::time::timeout(Duration::from_secs(2), receiver.recv())
                .await
                .expect("timed out waiting for event")
                .expect("channel closed");
            assert_eq!(received, event);

            subscriber.shutdown();
        }
    }
}
