use super::{Event, EventKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 集成事件的来源服务描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSource {
    pub service: String,
    pub version: String,
}

impl EventSource {
    pub fn new(service: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            version: version.into(),
        }
    }
}

/// 集成事件：领域事件 + 来源服务 + 路由键
///
/// 路由键默认由事件类型派生，用于模式订阅与 Webhook 主题匹配。
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrationEvent {
    event: Arc<Event>,
    source: EventSource,
    routing_key: String,
}

impl IntegrationEvent {
    pub fn new(event: Event, source: EventSource) -> Self {
        Self::from_domain(Arc::new(event), source)
    }

    /// 将已发布的领域事件转为集成事件，保持 `event_id` 不变以便下游去重
    pub fn from_domain(event: Arc<Event>, source: EventSource) -> Self {
        let routing_key = event.kind().routing_key().into_owned();
        Self {
            event,
            source,
            routing_key,
        }
    }

    /// 覆盖派生的路由键
    pub fn with_routing_key(self, routing_key: impl Into<String>) -> Self {
        Self {
            routing_key: routing_key.into(),
            ..self
        }
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn shared_event(&self) -> Arc<Event> {
        Arc::clone(&self.event)
    }

    pub fn source(&self) -> &EventSource {
        &self.source
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn kind(&self) -> &EventKind {
        self.event.kind()
    }

    pub fn event_type(&self) -> &str {
        self.event.event_type()
    }

    pub fn event_version(&self) -> u32 {
        self.event.event_version()
    }
}
