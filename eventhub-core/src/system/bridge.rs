//! 总线之间的桥接
//!
//! 每个桥接是挂在上游总线上的旁路观察者（`tap`），开关即注册/注销。
//! 桥接不计入总线的订阅数与处理指标，其状态单独体现在 `SystemMetrics::bridges`。
//!
use super::Lifecycle;
use crate::delivery::DeliveryOptions;
use crate::domain_event::{Event, EventSource, IntegrationEvent};
use crate::error::EventResult;
use crate::eventing::{EventHandler, IntegrationEventBus, PublishOptions, Subscription};
use crate::realtime::{RealtimeChannel, RealtimeMessage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bridge {
    DomainToIntegration,
    DomainToRealtime,
    IntegrationToRealtime,
}

impl Bridge {
    pub const ALL: [Bridge; 3] = [
        Bridge::DomainToIntegration,
        Bridge::DomainToRealtime,
        Bridge::IntegrationToRealtime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bridge::DomainToIntegration => "domain_to_integration",
            Bridge::DomainToRealtime => "domain_to_realtime",
            Bridge::IntegrationToRealtime => "integration_to_realtime",
        }
    }
}

impl fmt::Display for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 桥接开关状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    pub domain_to_integration: bool,
    pub domain_to_realtime: bool,
    pub integration_to_realtime: bool,
}

impl BridgeStatus {
    pub fn is_enabled(&self, bridge: Bridge) -> bool {
        match bridge {
            Bridge::DomainToIntegration => self.domain_to_integration,
            Bridge::DomainToRealtime => self.domain_to_realtime,
            Bridge::IntegrationToRealtime => self.integration_to_realtime,
        }
    }
}

/// 领域事件 -> 集成事件，沿用原事件 ID
///
/// 内部处理器在领域发布内同步完成；Webhook 投递交给后台任务，
/// 该任务占用一个进行中名额，关闭时同样会被等待。
pub(crate) struct IntegrationForwarder {
    bus: Arc<IntegrationEventBus>,
    source: EventSource,
    lifecycle: Arc<Lifecycle>,
}

impl IntegrationForwarder {
    pub(crate) fn new(
        bus: Arc<IntegrationEventBus>,
        source: EventSource,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        Self {
            bus,
            source,
            lifecycle,
        }
    }
}

#[async_trait]
impl EventHandler<Event> for IntegrationForwarder {
    fn handler_name(&self) -> &str {
        Bridge::DomainToIntegration.as_str()
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let integration =
            IntegrationEvent::from_domain(Arc::new(event.clone()), self.source.clone());
        let report = self
            .bus
            .publish(integration.clone(), PublishOptions::internal_only())
            .await;
        debug!(
            event_id = %event.event_id(),
            handled = report.dispatch.handled,
            "Domain event forwarded to integration bus"
        );

        if self.bus.delivery_channel().is_some() {
            let guard = self.lifecycle.track();
            let bus = Arc::clone(&self.bus);
            tokio::spawn(async move {
                let _guard = guard;
                bus.deliver(&integration, &DeliveryOptions::default()).await;
            });
        }
        Ok(())
    }
}

/// 把任一总线的事件推送到实时通道
pub(crate) struct RealtimeForwarder {
    bridge: Bridge,
    channel: Arc<dyn RealtimeChannel>,
}

impl RealtimeForwarder {
    pub(crate) fn new(bridge: Bridge, channel: Arc<dyn RealtimeChannel>) -> Self {
        Self { bridge, channel }
    }
}

#[async_trait]
impl EventHandler<Event> for RealtimeForwarder {
    fn handler_name(&self) -> &str {
        self.bridge.as_str()
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        self.channel.broadcast(RealtimeMessage::from_domain(event));
        Ok(())
    }
}

#[async_trait]
impl EventHandler<IntegrationEvent> for RealtimeForwarder {
    fn handler_name(&self) -> &str {
        self.bridge.as_str()
    }

    async fn handle(&self, event: &IntegrationEvent) -> anyhow::Result<()> {
        self.channel.broadcast(RealtimeMessage::from_integration(event));
        Ok(())
    }
}

/// 持有桥接订阅的开关
#[derive(Default)]
pub(crate) struct BridgeSwitch {
    subscription: Mutex<Option<Subscription>>,
}

impl BridgeSwitch {
    pub(crate) fn is_on(&self) -> bool {
        self.lock().is_some()
    }

    /// 已开启时不会再次订阅，返回是否发生了变化
    pub(crate) fn turn_on(
        &self,
        subscribe: impl FnOnce() -> EventResult<Subscription>,
    ) -> EventResult<bool> {
        let mut slot = self.lock();
        if slot.is_some() {
            return Ok(false);
        }
        *slot = Some(subscribe()?);
        Ok(true)
    }

    pub(crate) fn turn_off(&self) -> bool {
        match self.lock().take() {
            Some(subscription) => {
                subscription.unsubscribe();
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Subscription>> {
        self.subscription.lock().unwrap_or_else(|e| e.into_inner())
    }
}
