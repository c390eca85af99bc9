use super::CircuitBreaker;
use crate::domain_event::IntegrationEvent;
use crate::error::{EventError, EventResult};
use crate::eventing::GlobPattern;
use bon::Builder;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 外部 Webhook 端点
///
/// `subscribed_event_types` 中的每一项都是通配模式，同时对路由键（`task.created`）
/// 与事件标签（`TaskCreated`）做匹配；`*` 订阅全部事件。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEndpoint {
    #[builder(into)]
    pub id: String,
    #[builder(into)]
    pub url: String,
    #[builder(default = vec!["*".to_string()])]
    #[serde(default = "subscribe_everything")]
    pub subscribed_event_types: Vec<String>,
    #[builder(into)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[builder(default = true)]
    #[serde(default = "default_active")]
    pub active: bool,
}

fn subscribe_everything() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_active() -> bool {
    true
}

impl WebhookEndpoint {
    fn validate_url(&self) -> EventResult<()> {
        let rest = self
            .url
            .strip_prefix("https://")
            .or_else(|| self.url.strip_prefix("http://"))
            .ok_or_else(|| {
                EventError::invalid_endpoint(format!("url must be http(s): {}", self.url))
            })?;

        let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
        if host.is_empty() || self.url.chars().any(char::is_whitespace) {
            return Err(EventError::invalid_endpoint(format!(
                "malformed url: {}",
                self.url
            )));
        }
        Ok(())
    }
}

/// 注册表中的端点：编译后的订阅与专属熔断器
#[derive(Clone)]
pub(crate) struct RegisteredEndpoint {
    pub(crate) endpoint: WebhookEndpoint,
    subscriptions: Vec<GlobPattern>,
    pub(crate) breaker: Arc<CircuitBreaker>,
}

impl RegisteredEndpoint {
    pub(crate) fn compile(endpoint: WebhookEndpoint, breaker: CircuitBreaker) -> EventResult<Self> {
        if endpoint.id.trim().is_empty() {
            return Err(EventError::invalid_endpoint("endpoint id must not be empty"));
        }
        endpoint.validate_url()?;
        if endpoint.subscribed_event_types.is_empty() {
            return Err(EventError::invalid_endpoint(format!(
                "endpoint {} subscribes to nothing",
                endpoint.id
            )));
        }

        let subscriptions = endpoint
            .subscribed_event_types
            .iter()
            .map(|s| GlobPattern::new(s))
            .collect::<EventResult<Vec<_>>>()
            .map_err(|e| EventError::invalid_endpoint(e.to_string()))?;

        Ok(Self {
            endpoint,
            subscriptions,
            breaker: Arc::new(breaker),
        })
    }

    pub(crate) fn wants(&self, event: &IntegrationEvent) -> bool {
        self.endpoint.active
            && self
                .subscriptions
                .iter()
                .any(|p| p.matches(event.routing_key()) || p.matches(event.event_type()))
    }
}
