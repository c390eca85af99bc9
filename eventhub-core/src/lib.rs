//! 事件分发核心（eventhub-core）
//!
//! 把业务实体的状态变化与其副作用解耦：
//! - 仅追加的事件日志（`event_store`），按聚合保证版本顺序；
//! - 进程内领域事件总线与跨边界集成事件总线（`eventing`）；
//! - 带重试与熔断的 Webhook 投递通道（`delivery`），至少一次语义；
//! - 面向已连接客户端的实时广播（`realtime`）；
//! - 统一事件系统（`system`）：装配上述组件、桥接、指标与优雅关闭。
//!
//! 典型用法：
//! 1. 从 TOML 加载 `EventSystemConfig`，调用 `EventSystem::create`；
//! 2. 通过 `subscribe_*` 注册处理器，发布领域事件或集成事件；
//! 3. 退出前调用 `shutdown`，等待进行中的发布结束。
//!
pub mod config;
pub mod delivery;
pub mod domain_event;
pub mod error;
pub mod event_store;
pub mod eventing;
pub mod metrics;
pub mod realtime;
pub mod system;

pub use config::{BridgeConfig, EventSystemConfig};
pub use error::{EventError, EventResult, StoreError};
pub use system::{Bridge, BridgeStatus, EventSystem, SystemMetrics};
