//! 事件线上格式（WireEvent）
//!
//! 持久化、Webhook 载荷与实时推送共用的扁平 JSON 形态（camelCase），
//! 以及与 `Event`/`IntegrationEvent` 之间的转换。
//!
use super::{Event, EventKind, EventMetadata, EventSource, IntegrationEvent};
use crate::error::{EventError, EventResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent {
    pub event_id: Uuid,
    pub event_type: EventKind,
    #[serde(default = "default_event_version")]
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub aggregate_version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub metadata: EventMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<EventSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_key: Option<String>,
}

fn default_event_version() -> u32 {
    1
}

impl Event {
    pub fn to_wire(&self) -> WireEvent {
        WireEvent {
            event_id: self.event_id(),
            event_type: self.kind().clone(),
            event_version: self.event_version(),
            occurred_at: self.occurred_at(),
            aggregate_id: self.aggregate_id().to_string(),
            aggregate_type: self.aggregate_type().to_string(),
            aggregate_version: self.aggregate_version(),
            user_id: self.user_id().map(str::to_string),
            workspace_id: self.workspace_id().map(str::to_string),
            correlation_id: self.correlation_id().map(str::to_string),
            causation_id: self.causation_id().map(str::to_string),
            data: self.data().clone(),
            metadata: self.metadata().clone(),
            source: None,
            routing_key: None,
        }
    }

    /// 由线上格式还原事件；`source`/`routingKey` 属于集成事件字段，此处忽略
    pub fn from_wire(wire: WireEvent) -> Event {
        let metadata: BTreeMap<String, Value> = wire
            .metadata
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();

        Event::builder()
            .event_id(wire.event_id)
            .kind(wire.event_type)
            .event_version(wire.event_version)
            .occurred_at(wire.occurred_at)
            .aggregate_id(wire.aggregate_id)
            .aggregate_type(wire.aggregate_type)
            .aggregate_version(wire.aggregate_version)
            .maybe_user_id(wire.user_id)
            .maybe_workspace_id(wire.workspace_id)
            .maybe_correlation_id(wire.correlation_id)
            .maybe_causation_id(wire.causation_id)
            .data(wire.data)
            .metadata(metadata)
            .build()
    }

    pub fn to_json(&self) -> EventResult<String> {
        Ok(serde_json::to_string(&self.to_wire())?)
    }

    pub fn from_json(json: &str) -> EventResult<Event> {
        let wire: WireEvent = serde_json::from_str(json)?;
        Ok(Event::from_wire(wire))
    }
}

impl IntegrationEvent {
    pub fn to_wire(&self) -> WireEvent {
        WireEvent {
            source: Some(self.source().clone()),
            routing_key: Some(self.routing_key().to_string()),
            ..self.event().to_wire()
        }
    }

    pub fn from_wire(mut wire: WireEvent) -> EventResult<IntegrationEvent> {
        let source = wire.source.take().ok_or_else(|| EventError::Parse {
            reason: "integration event requires a source".to_string(),
        })?;
        let routing_key = wire.routing_key.take();
        let event = IntegrationEvent::new(Event::from_wire(wire), source);

        Ok(match routing_key {
            Some(key) => event.with_routing_key(key),
            None => event,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Event {
        Event::builder()
            .kind(EventKind::TaskCreated)
            .aggregate_id("t1")
            .aggregate_version(7)
            .user_id("u-1".to_string())
            .workspace_id("w-1".to_string())
            .correlation_id("c-1".to_string())
            .data(json!({"title": "write docs", "priority": 2}))
            .build()
    }

    #[test]
    fn wire_roundtrip_restores_event() {
        let e = sample();
        let back = Event::from_wire(e.to_wire());
        assert_eq!(back.event_id(), e.event_id());
        assert_eq!(back.event_type(), e.event_type());
        assert_eq!(back.aggregate_id(), e.aggregate_id());
        assert_eq!(back.aggregate_version(), e.aggregate_version());
        assert_eq!(back.data(), e.data());
        assert_eq!(back, e);
    }

    #[test]
    fn json_shape_is_flat_camel_case() {
        let e = sample();
        let value: Value = serde_json::from_str(&e.to_json().unwrap()).unwrap();
        assert_eq!(value["eventType"], "TaskCreated");
        assert_eq!(value["aggregateVersion"], 7);
        assert_eq!(value["workspaceId"], "w-1");
        assert!(value.get("causationId").is_none());
        assert!(value["metadata"]["timestamp"].is_string());
        assert!(value.get("source").is_none());

        let back = Event::from_json(&e.to_json().unwrap()).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn integration_wire_requires_source() {
        let ie = IntegrationEvent::new(sample(), EventSource::new("tasks", "1.0.0"))
            .with_routing_key("tasks.created.v1");
        let wire = ie.to_wire();
        assert_eq!(wire.routing_key.as_deref(), Some("tasks.created.v1"));

        let back = IntegrationEvent::from_wire(wire.clone()).unwrap();
        assert_eq!(back, ie);

        let err = IntegrationEvent::from_wire(WireEvent {
            source: None,
            ..wire
        })
        .unwrap_err();
        assert!(matches!(err, EventError::Parse { .. }));
    }
}
