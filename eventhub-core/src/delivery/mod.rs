//! 投递通道（delivery）
//!
//! 集成事件总线只依赖 `DeliveryChannel` 协议：把一条事件以“至少一次”语义送达
//! 所有订阅了它的外部端点，并报告每个端点的结果与聚合计数。
//!
//! 默认实现 `WebhookDeliveryChannel`：
//! - 端点注册表（订阅为路由键通配模式或事件标签）；
//! - 每次尝试独立超时，瞬时失败按指数退避重试；
//! - 每个端点一个熔断器，连续失败达到阈值后在冷却期内跳过投递；
//! - 配置了 `secret` 的端点附带 HMAC-SHA256 签名头。
//!
mod circuit_breaker;
mod endpoint;
mod retry;
mod signature;
mod transport;
mod webhook;

pub use circuit_breaker::{CircuitBreaker, CircuitState, Permit};
pub use endpoint::WebhookEndpoint;
pub use retry::RetryPolicy;
pub use signature::{
    EVENT_ID_HEADER, EVENT_TYPE_HEADER, MAX_SIGNATURE_AGE_SECS, SIGNATURE_HEADER, SignatureError,
    sign_payload, verify_signature, verify_signature_at,
};
#[cfg(feature = "http")]
pub use transport::HttpWebhookTransport;
pub use transport::{WebhookRequest, WebhookResponse, WebhookTransport};
pub use webhook::{DeliveryConfig, WebhookDeliveryChannel};

use crate::domain_event::IntegrationEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// 单条事件的投递选项，未给出的项取通道配置
#[derive(Debug, Clone, Default)]
pub struct DeliveryOptions {
    pub max_attempts: Option<u32>,
    pub attempt_timeout: Option<Duration>,
    /// 仅投递给这些端点
    pub endpoint_ids: Option<Vec<String>>,
}

/// 单次投递尝试的失败原因
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("attempt timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("endpoint responded with status {status}")]
    Status { status: u16, body: String },
    #[error("transport error: {reason}")]
    Transport { reason: String },
    #[error("circuit open")]
    CircuitOpen,
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
}

impl DeliveryError {
    /// 408/429/5xx、超时与传输错误可重试；其它 4xx 与熔断为终止
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Timeout { .. } | DeliveryError::Transport { .. } => true,
            DeliveryError::Status { status, .. } => {
                matches!(status, 408 | 429) || (500..600).contains(status)
            }
            DeliveryError::CircuitOpen | DeliveryError::Serde { .. } => false,
        }
    }
}

/// 单个端点的最终结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered { status_code: u16 },
    Failed { reason: String },
    /// 熔断中，未发起任何尝试
    CircuitOpen,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDelivery {
    pub endpoint_id: String,
    pub url: String,
    pub attempts: u32,
    pub outcome: DeliveryOutcome,
}

/// 一次 `deliver_event` 的投递报告
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub event_id: Uuid,
    pub deliveries: Vec<EndpointDelivery>,
}

impl DeliveryReport {
    pub fn new(event_id: Uuid) -> Self {
        Self {
            event_id,
            deliveries: Vec::new(),
        }
    }

    pub fn delivered(&self) -> usize {
        self.count(|o| matches!(o, DeliveryOutcome::Delivered { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, DeliveryOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, DeliveryOutcome::CircuitOpen))
    }

    /// 没有任何端点订阅该事件
    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }

    pub fn endpoint(&self, endpoint_id: &str) -> Option<&EndpointDelivery> {
        self.deliveries.iter().find(|d| d.endpoint_id == endpoint_id)
    }

    fn count(&self, pred: impl Fn(&DeliveryOutcome) -> bool) -> usize {
        self.deliveries.iter().filter(|d| pred(&d.outcome)).count()
    }
}

/// 投递通道指标
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryMetrics {
    pub total_delivered: u64,
    pub total_failed: u64,
    pub total_skipped: u64,
    pub total_attempts: u64,
    pub registered_endpoints: usize,
    pub active_endpoints: usize,
    pub open_circuits: usize,
}

#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// 投递到所有订阅了该事件的活跃端点；失败只体现在报告与指标中
    async fn deliver_event(
        &self,
        event: &IntegrationEvent,
        options: &DeliveryOptions,
    ) -> DeliveryReport;

    fn metrics(&self) -> DeliveryMetrics;
}

#[async_trait]
impl<T> DeliveryChannel for Arc<T>
where
    T: DeliveryChannel + ?Sized,
{
    async fn deliver_event(
        &self,
        event: &IntegrationEvent,
        options: &DeliveryOptions,
    ) -> DeliveryReport {
        (**self).deliver_event(event, options).await
    }

    fn metrics(&self) -> DeliveryMetrics {
        (**self).metrics()
    }
}
