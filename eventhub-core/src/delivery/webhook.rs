//! Webhook 投递通道（WebhookDeliveryChannel）
//!
use super::endpoint::RegisteredEndpoint;
use super::retry::{RetryPolicy, with_retry};
use super::signature::{EVENT_ID_HEADER, EVENT_TYPE_HEADER, SIGNATURE_HEADER, sign_payload};
use super::{
    CircuitBreaker, CircuitState, DeliveryChannel, DeliveryError, DeliveryMetrics,
    DeliveryOptions, DeliveryOutcome, DeliveryReport, EndpointDelivery, WebhookEndpoint,
    WebhookRequest, WebhookTransport,
};
use crate::domain_event::IntegrationEvent;
use crate::error::EventResult;
use crate::metrics::Counter;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// 投递配置；全部为部署参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// 每个端点的总尝试次数（含首次）
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// 单次尝试超时
    pub attempt_timeout_ms: u64,
    /// 连续失败多少次后熔断
    pub failure_threshold: u32,
    /// 熔断冷却时间
    pub cool_down_ms: u64,
    /// 启动时注册的端点
    pub endpoints: Vec<WebhookEndpoint>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            attempt_timeout_ms: 10_000,
            failure_threshold: 5,
            cool_down_ms: 60_000,
            endpoints: Vec::new(),
        }
    }
}

impl DeliveryConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            multiplier: self.backoff_multiplier,
        }
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    fn breaker(&self) -> CircuitBreaker {
        CircuitBreaker::new(
            self.failure_threshold,
            Duration::from_millis(self.cool_down_ms),
        )
    }
}

#[derive(Default)]
struct DeliveryStats {
    delivered: Counter,
    failed: Counter,
    skipped: Counter,
    attempts: Counter,
}

pub struct WebhookDeliveryChannel {
    config: DeliveryConfig,
    transport: Arc<dyn WebhookTransport>,
    endpoints: DashMap<String, RegisteredEndpoint>,
    stats: DeliveryStats,
}

impl WebhookDeliveryChannel {
    /// 创建通道并注册配置中的端点
    pub fn new(config: DeliveryConfig, transport: Arc<dyn WebhookTransport>) -> EventResult<Self> {
        let channel = Self {
            transport,
            endpoints: DashMap::new(),
            stats: DeliveryStats::default(),
            config,
        };
        for endpoint in channel.config.endpoints.clone() {
            channel.register_endpoint(endpoint)?;
        }
        Ok(channel)
    }

    /// 使用 reqwest 传输
    #[cfg(feature = "http")]
    pub fn http(config: DeliveryConfig) -> EventResult<Self> {
        Self::new(config, Arc::new(super::HttpWebhookTransport::new()))
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// 注册或替换端点，返回被替换的旧端点；替换会重置熔断器
    pub fn register_endpoint(
        &self,
        endpoint: WebhookEndpoint,
    ) -> EventResult<Option<WebhookEndpoint>> {
        let registered = RegisteredEndpoint::compile(endpoint, self.config.breaker())?;
        let id = registered.endpoint.id.clone();
        info!(
            endpoint = %id,
            url = %registered.endpoint.url,
            subscriptions = ?registered.endpoint.subscribed_event_types,
            "Webhook endpoint registered"
        );
        Ok(self.endpoints.insert(id, registered).map(|old| old.endpoint))
    }

    pub fn remove_endpoint(&self, id: &str) -> Option<WebhookEndpoint> {
        let removed = self.endpoints.remove(id).map(|(_, r)| r.endpoint);
        if removed.is_some() {
            info!(endpoint = %id, "Webhook endpoint removed");
        }
        removed
    }

    /// 按 ID 排序的端点列表
    pub fn list_endpoints(&self) -> Vec<WebhookEndpoint> {
        let mut list: Vec<WebhookEndpoint> = self
            .endpoints
            .iter()
            .map(|entry| entry.value().endpoint.clone())
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    pub fn set_endpoint_active(&self, id: &str, active: bool) -> bool {
        match self.endpoints.get_mut(id) {
            Some(mut entry) => {
                entry.endpoint.active = active;
                debug!(endpoint = %id, active, "Webhook endpoint toggled");
                true
            }
            None => false,
        }
    }

    pub fn circuit_state(&self, id: &str) -> Option<CircuitState> {
        self.endpoints.get(id).map(|entry| entry.breaker.state())
    }

    /// 当前事件的投递目标快照；不在 await 期间持有 DashMap 引用
    fn targets(
        &self,
        event: &IntegrationEvent,
        options: &DeliveryOptions,
    ) -> Vec<RegisteredEndpoint> {
        let mut targets: Vec<RegisteredEndpoint> = self
            .endpoints
            .iter()
            .filter(|entry| {
                options
                    .endpoint_ids
                    .as_ref()
                    .is_none_or(|ids| ids.iter().any(|id| id == entry.key()))
            })
            .filter(|entry| entry.value().wants(event))
            .map(|entry| entry.value().clone())
            .collect();
        targets.sort_by(|a, b| a.endpoint.id.cmp(&b.endpoint.id));
        targets
    }

    async fn deliver_to(
        &self,
        target: &RegisteredEndpoint,
        event: &IntegrationEvent,
        body: &str,
        policy: &RetryPolicy,
        attempt_timeout: Duration,
    ) -> EndpointDelivery {
        let endpoint = &target.endpoint;
        let breaker = &target.breaker;
        let transport = &self.transport;
        let stats = &self.stats;
        let event_id = event.event().event_id().to_string();
        let event_id = event_id.as_str();
        let timeout_ms = attempt_timeout.as_millis() as u64;

        let outcome = with_retry(policy, &endpoint.id, move |attempt| async move {
            let Some(permit) = breaker.try_acquire() else {
                return Err(DeliveryError::CircuitOpen);
            };
            stats.attempts.incr();

            let mut headers = vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                (EVENT_ID_HEADER.to_string(), event_id.to_string()),
                (EVENT_TYPE_HEADER.to_string(), event.event_type().to_string()),
            ];
            if let Some(secret) = &endpoint.secret {
                let signature = sign_payload(body, secret.as_bytes(), Utc::now().timestamp());
                headers.push((SIGNATURE_HEADER.to_string(), signature));
            }
            let request = WebhookRequest {
                url: endpoint.url.clone(),
                headers,
                body: body.to_string(),
            };

            let result = match timeout(attempt_timeout, transport.send(&request)).await {
                Err(_) => Err(DeliveryError::Timeout { timeout_ms }),
                Ok(Err(err)) => Err(err),
                Ok(Ok(response)) if (200..300).contains(&response.status) => Ok(response.status),
                Ok(Ok(response)) => Err(DeliveryError::Status {
                    status: response.status,
                    body: response.body,
                }),
            };

            match &result {
                Ok(status) => {
                    debug!(endpoint = %endpoint.id, event_id, attempt, status, "Webhook delivered");
                    if permit.success().is_some() {
                        info!(endpoint = %endpoint.id, "Circuit closed");
                    }
                }
                Err(err) => {
                    if permit.failure().is_some() {
                        warn!(
                            endpoint = %endpoint.id,
                            failures = breaker.consecutive_failures(),
                            error = %err,
                            "Circuit opened"
                        );
                    }
                }
            }
            result
        })
        .await;

        // 熔断导致的 CircuitOpen 不计入尝试次数
        let attempts = match &outcome.result {
            Err(DeliveryError::CircuitOpen) => outcome.attempts - 1,
            _ => outcome.attempts,
        };
        let outcome = match outcome.result {
            Ok(status_code) => {
                stats.delivered.incr();
                DeliveryOutcome::Delivered { status_code }
            }
            Err(DeliveryError::CircuitOpen) if attempts == 0 => {
                stats.skipped.incr();
                debug!(endpoint = %endpoint.id, event_id, "Circuit open, delivery skipped");
                DeliveryOutcome::CircuitOpen
            }
            Err(err) => {
                stats.failed.incr();
                error!(
                    endpoint = %endpoint.id,
                    url = %endpoint.url,
                    event_id,
                    attempts,
                    error = %err,
                    "Webhook delivery failed"
                );
                DeliveryOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        };

        EndpointDelivery {
            endpoint_id: endpoint.id.clone(),
            url: endpoint.url.clone(),
            attempts,
            outcome,
        }
    }
}

#[async_trait]
impl DeliveryChannel for WebhookDeliveryChannel {
    async fn deliver_event(
        &self,
        event: &IntegrationEvent,
        options: &DeliveryOptions,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::new(event.event().event_id());
        let targets = self.targets(event, options);
        if targets.is_empty() {
            debug!(
                event_id = %report.event_id,
                routing_key = event.routing_key(),
                "No webhook endpoint subscribed"
            );
            return report;
        }

        let body = match serde_json::to_string(&event.to_wire()) {
            Ok(body) => body,
            Err(err) => {
                let err = DeliveryError::from(err);
                error!(
                    event_id = %report.event_id,
                    error = %err,
                    "Webhook payload serialization failed"
                );
                self.stats.failed.add(targets.len() as u64);
                report.deliveries = targets
                    .into_iter()
                    .map(|t| EndpointDelivery {
                        endpoint_id: t.endpoint.id,
                        url: t.endpoint.url,
                        attempts: 0,
                        outcome: DeliveryOutcome::Failed {
                            reason: err.to_string(),
                        },
                    })
                    .collect();
                return report;
            }
        };

        let mut policy = self.config.retry_policy();
        if let Some(max_attempts) = options.max_attempts {
            policy.max_attempts = max_attempts.max(1);
        }
        let attempt_timeout = options
            .attempt_timeout
            .unwrap_or_else(|| self.config.attempt_timeout());

        report.deliveries = join_all(
            targets
                .iter()
                .map(|t| self.deliver_to(t, event, &body, &policy, attempt_timeout)),
        )
        .await;
        report
    }

    fn metrics(&self) -> DeliveryMetrics {
        let mut active_endpoints = 0;
        let mut open_circuits = 0;
        for entry in self.endpoints.iter() {
            if entry.endpoint.active {
                active_endpoints += 1;
            }
            if entry.breaker.state() != CircuitState::Closed {
                open_circuits += 1;
            }
        }

        DeliveryMetrics {
            total_delivered: self.stats.delivered.get(),
            total_failed: self.stats.failed.get(),
            total_skipped: self.stats.skipped.get(),
            total_attempts: self.stats.attempts.get(),
            registered_endpoints: self.endpoints.len(),
            active_endpoints,
            open_circuits,
        }
    }
}
