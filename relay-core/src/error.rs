//! 投递引擎统一错误定义
//!
//! 覆盖持久化、序列化/反序列化、总线、处理器执行与关联等待等最小必要集合，
//! 便于在存储实现与引擎之间统一转换为 `RelayError`。
//!
use std::time::Duration;
use thiserror::Error;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum RelayError {
    // --- 序列化/反序列化 ---
    #[error("serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
    #[error("deserialization error: type={event_type}, reason={reason}")]
    Deserialization { event_type: String, reason: String },

    // --- 持久化 ---
    #[error("persistence error: {reason}")]
    Persistence { reason: String },

    // --- 事件总线/处理器 ---
    #[error("event bus error: {reason}")]
    EventBus { reason: String },
    #[error("handler execution error: handler={handler}, reason={reason}")]
    HandlerExecution { handler: String, reason: String },
    #[error("correlation timeout: id={correlation_id}, timeout={timeout:?}")]
    CorrelationTimeout {
        correlation_id: String,
        timeout: Duration,
    },

    // --- 参数与配置 ---
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },
    #[error("invalid config: {reason}")]
    InvalidConfig { reason: String },
}

impl RelayError {
    pub fn persistence(reason: impl Into<String>) -> Self {
        Self::Persistence {
            reason: reason.into(),
        }
    }

    pub fn event_bus(reason: impl Into<String>) -> Self {
        Self::EventBus {
            reason: reason.into(),
        }
    }

    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// 统一 Result 类型别名
pub type RelayResult<T> = Result<T, RelayError>;

// 允许在 Postgres 存储实现中直接使用 `?` 将 sqlx 错误转换为 RelayError
#[cfg(feature = "infra-sqlx")]
impl From<sqlx::Error> for RelayError {
    fn from(err: sqlx::Error) -> Self {
        RelayError::Persistence {
            reason: err.to_string(),
        }
    }
}
