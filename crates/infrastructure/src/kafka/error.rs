//! Kafka 管道错误
//!
//! 按对中继与消费循环的意义分类：传输类失败由上游按退避重试，
//! 配置类失败应在启动期暴露。

use rdkafka::error::KafkaError as RdKafkaError;
use rdkafka::types::RDKafkaErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KafkaError {
    /// broker 不可达。发件箱行保持未处理，下一轮重试
    #[error("Kafka 不可达: {message}")]
    ConnectionError { message: String },

    #[error("身份事件发布失败: {message}")]
    ProducerError { message: String },

    #[error("身份事件消费失败: {message}")]
    ConsumerError { message: String },

    #[error("身份事件序列化失败: {message}")]
    SerializationError { message: String },

    #[error("身份事件反序列化失败: {message}")]
    DeserializationError { message: String },

    #[error("Kafka 配置无效: {message}")]
    ConfigError { message: String },
}

/// Kafka 结果类型
pub type KafkaResult<T> = Result<T, KafkaError>;

fn is_transport(code: &RDKafkaErrorCode) -> bool {
    matches!(
        code,
        RDKafkaErrorCode::BrokerTransportFailure
            | RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::MessageTimedOut
    )
}

impl From<RdKafkaError> for KafkaError {
    fn from(err: RdKafkaError) -> Self {
        let message = err.to_string();
        match &err {
            RdKafkaError::ClientConfig(..) | RdKafkaError::ClientCreation(_) => {
                KafkaError::ConfigError { message }
            }
            RdKafkaError::MessageProduction(code) if is_transport(code) => {
                KafkaError::ConnectionError { message }
            }
            RdKafkaError::MessageProduction(_) => KafkaError::ProducerError { message },
            RdKafkaError::MessageConsumption(code) if is_transport(code) => {
                KafkaError::ConnectionError { message }
            }
            RdKafkaError::MessageConsumption(_)
            | RdKafkaError::ConsumerCommit(_)
            | RdKafkaError::Subscription(_) => KafkaError::ConsumerError { message },
            _ => KafkaError::ConnectionError { message },
        }
    }
}

impl From<serde_json::Error> for KafkaError {
    fn from(err: serde_json::Error) -> Self {
        KafkaError::SerializationError {
            message: err.to_string(),
        }
    }
}
