//! 事件核心统一错误定义
//!
//! 按传播边界划分：
//! - `StoreError`：事件日志追加/读取失败，唯一允许穿透总线返回给发布方的错误；
//! - `EventError`：订阅配置校验、序列化、配置加载与生命周期错误；
//! - 处理器失败与投递失败在各自组件内被隔离，仅体现在日志与指标中。
//!
use thiserror::Error;
use uuid::Uuid;

/// 事件日志错误
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate event: event_id={event_id}")]
    DuplicateEvent { event_id: Uuid },
    #[error("event store capacity exceeded: max_events={max_events}")]
    CapacityExceeded { max_events: usize },
    #[error("event store backend error: {reason}")]
    Backend { reason: String },
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
}

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EventError {
    // --- 事件日志 ---
    #[error("event store error: {0}")]
    Store(#[from] StoreError),

    // --- 订阅配置 ---
    #[error("invalid pattern: pattern={pattern:?}, reason={reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("invalid filter: {reason}")]
    InvalidFilter { reason: String },
    #[error("invalid webhook endpoint: {reason}")]
    InvalidEndpoint { reason: String },

    // --- 序列化/配置 ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
    #[error("parse error: {reason}")]
    Parse { reason: String },
    #[error("config error: {reason}")]
    Config { reason: String },

    // --- 生命周期 ---
    #[error("runtime error: {reason}")]
    Runtime { reason: String },
    #[error("event system has been shut down")]
    ShutDown,
}

impl EventError {
    pub(crate) fn invalid_pattern(pattern: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_filter(reason: impl Into<String>) -> Self {
        Self::InvalidFilter {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_endpoint(reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            reason: reason.into(),
        }
    }
}

/// 统一 Result 类型别名
pub type EventResult<T> = Result<T, EventError>;

impl From<toml::de::Error> for EventError {
    fn from(err: toml::de::Error) -> Self {
        EventError::Config {
            reason: err.to_string(),
        }
    }
}

impl From<std::io::Error> for EventError {
    fn from(err: std::io::Error) -> Self {
        EventError::Config {
            reason: err.to_string(),
        }
    }
}

impl From<uuid::Error> for EventError {
    fn from(err: uuid::Error) -> Self {
        EventError::Parse {
            reason: err.to_string(),
        }
    }
}

impl From<chrono::ParseError> for EventError {
    fn from(err: chrono::ParseError) -> Self {
        EventError::Parse {
            reason: err.to_string(),
        }
    }
}
