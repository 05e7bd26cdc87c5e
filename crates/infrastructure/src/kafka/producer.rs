//! Kafka 身份事件生产者
//!
//! 使用 subject_id 作为分区键，保证同一用户的事件在分区内有序。
//! 单条发送不在此处重试：发件箱中继自带重试与退避，失败的行
//! 留在发件箱里等待下一轮。

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{debug, info};

use application::{BrokerError, IdentityEventPublisher};
use domain::IdentityEvent;

use crate::config::KafkaConfig;
use crate::kafka::{KafkaError, KafkaResult};

/// Kafka 身份事件生产者
///
/// 发件箱中继的下游：把身份事件发布到持久主题。
pub struct KafkaIdentityProducer {
    producer: FutureProducer,
    topic: String,
    send_timeout: Duration,
}

impl KafkaIdentityProducer {
    /// 创建新的 Kafka 生产者
    pub fn new(config: &KafkaConfig) -> KafkaResult<Self> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", config.brokers.join(","))
            .set("message.timeout.ms", config.send_timeout_ms.to_string())
            .set("acks", &config.acks)
            .set("enable.idempotence", "true")
            .set("max.in.flight.requests.per.connection", "5");

        let producer: FutureProducer = client_config.create()?;

        info!("Kafka 生产者创建成功，连接到: {}", config.brokers.join(","));

        Ok(Self {
            producer,
            topic: config.identity_events_topic.clone(),
            send_timeout: Duration::from_millis(config.send_timeout_ms as u64),
        })
    }

    async fn send(&self, event: &IdentityEvent) -> KafkaResult<()> {
        let payload = serde_json::to_string(event)?;

        // 同一用户的事件落在同一分区，消费侧按序应用
        let partition_key = event.subject_id().0.to_string();

        let record = FutureRecord::to(&self.topic)
            .payload(&payload)
            .key(&partition_key);

        match self
            .producer
            .send(record, Timeout::After(self.send_timeout))
            .await
        {
            Ok(delivery) => {
                debug!(
                    event_type = event.event_type(),
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "identity event published"
                );
                Ok(())
            }
            // 传输类失败映射为 ConnectionError，中继按 broker 不可用重试
            Err((kafka_err, _)) => Err(kafka_err.into()),
        }
    }

    /// 刷新生产者缓冲区
    pub fn flush(&self) -> KafkaResult<()> {
        self.producer
            .flush(Timeout::After(Duration::from_secs(10)))
            .map_err(KafkaError::from)
    }
}

#[async_trait]
impl IdentityEventPublisher for KafkaIdentityProducer {
    async fn publish(&self, event: &IdentityEvent) -> Result<(), BrokerError> {
        self.send(event).await.map_err(|e| match e {
            KafkaError::ConnectionError { message } => BrokerError::unavailable(message),
            other => BrokerError::publish_failed(other.to_string()),
        })
    }
}

impl Drop for KafkaIdentityProducer {
    fn drop(&mut self) {
        info!("Kafka 生产者正在关闭");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::UserId;

    fn create_test_config() -> KafkaConfig {
        KafkaConfig {
            brokers: vec!["localhost:9092".to_string()],
            identity_events_topic: "test-identity-events".to_string(),
            consumer_group_id: "test-group".to_string(),
            send_timeout_ms: 1000,
            acks: "1".to_string(),
        }
    }

    fn create_test_event() -> IdentityEvent {
        IdentityEvent::UserCreated {
            user_id: UserId::new(),
            username: "alice".to_string(),
            display_name: Some("Alice".to_string()),
            avatar_url: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_producer_creation() {
        // 需要运行中的 Kafka 实例才能通过
        if std::env::var("KAFKA_INTEGRATION_TEST").is_ok() {
            let producer = KafkaIdentityProducer::new(&create_test_config());
            assert!(producer.is_ok());
        }
    }

    #[test]
    fn test_partition_key_is_subject_id() {
        let event = create_test_event();
        let key = event.subject_id().0.to_string();
        assert!(!key.is_empty());

        let json = serde_json::to_string(&event).unwrap();
        let back: IdentityEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.subject_id(), event.subject_id());
    }
}
