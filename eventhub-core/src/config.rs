//! 事件系统配置
//!
//! 所有字段均有默认值，TOML 中只需写出要覆盖的项：
//!
//! ```toml
//! service_name = "tasks"
//! enable_webhooks = true
//!
//! [bridges]
//! domain_to_integration = true
//!
//! [[delivery.endpoints]]
//! id = "audit"
//! url = "https://audit.example.com/hook"
//! subscribedEventTypes = ["task.*"]
//! ```
//!
use crate::delivery::DeliveryConfig;
use crate::error::EventResult;
use crate::event_store::EventStoreConfig;
use crate::eventing::DomainBusConfig;
use crate::realtime::RealtimeConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 桥接的初始开关，默认全部关闭
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// 领域事件自动转为集成事件
    pub domain_to_integration: bool,
    pub domain_to_realtime: bool,
    pub integration_to_realtime: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSystemConfig {
    /// 集成事件的来源服务名
    pub service_name: String,
    pub service_version: String,
    pub enable_event_store: bool,
    pub enable_webhooks: bool,
    pub enable_realtime: bool,
    /// 指标快照刷新周期，0 表示不启动后台刷新
    pub metrics_interval_ms: u64,
    /// 关闭时等待进行中发布的最长时间
    pub shutdown_grace_ms: u64,
    pub store: EventStoreConfig,
    pub domain_bus: DomainBusConfig,
    pub delivery: DeliveryConfig,
    pub realtime: RealtimeConfig,
    pub bridges: BridgeConfig,
}

impl Default for EventSystemConfig {
    fn default() -> Self {
        Self {
            service_name: crate::domain_event::DEFAULT_SOURCE.to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            enable_event_store: true,
            enable_webhooks: true,
            enable_realtime: true,
            metrics_interval_ms: 30_000,
            shutdown_grace_ms: 5_000,
            store: EventStoreConfig::default(),
            domain_bus: DomainBusConfig::default(),
            delivery: DeliveryConfig::default(),
            realtime: RealtimeConfig::default(),
            bridges: BridgeConfig::default(),
        }
    }
}

impl EventSystemConfig {
    pub fn from_toml_str(raw: &str) -> EventResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> EventResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn metrics_interval(&self) -> Option<Duration> {
        (self.metrics_interval_ms > 0).then(|| Duration::from_millis(self.metrics_interval_ms))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
