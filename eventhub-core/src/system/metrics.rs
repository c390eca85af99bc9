use super::BridgeStatus;
use crate::delivery::DeliveryMetrics;
use crate::event_store::StoreMetrics;
use crate::eventing::{BusMetrics, IntegrationBusMetrics};
use crate::realtime::RealtimeMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 事件系统整体指标快照，未启用的组件省略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub domain_events: BusMetrics,
    pub integration_events: IntegrationBusMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_store: Option<StoreMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_events: Option<DeliveryMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub websocket_events: Option<RealtimeMetrics>,
    pub bridges: BridgeStatus,
    pub collected_at: DateTime<Utc>,
}
