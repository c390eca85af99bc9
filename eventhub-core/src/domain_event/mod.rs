//! 事件模型（Domain Event / Integration Event）
//!
//! 定义显式的事件类型标签（`EventKind`）、不可变事件值对象（`Event`）、
//! 跨边界的集成事件（`IntegrationEvent`）以及统一的线上格式（`WireEvent`）。

mod event;
mod event_kind;
mod integration_event;
mod metadata;
mod wire;

pub use event::{CausalLink, Event};
pub use event_kind::EventKind;
pub use integration_event::{EventSource, IntegrationEvent};
pub use metadata::{EventMetadata, SOURCE_KEY, TIMESTAMP_KEY};
pub use wire::WireEvent;

/// 未指定来源时写入元数据的默认 `source`
pub const DEFAULT_SOURCE: &str = "eventhub";
