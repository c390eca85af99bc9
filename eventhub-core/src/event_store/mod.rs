//! 事件日志（event_store）
//!
//! 仅追加的事件存储协议，支持：
//! - 单条/批量追加（批量追加保证输入顺序即存储顺序）；
//! - 按聚合读取（始终按 `aggregate_version` 升序）、按类型与全量分页读取（新→旧）；
//! - 按发生时间升序的有限事件流；
//! - 聚合快照（每个聚合仅保留最新一份）与显式保留策略（`prune_before`）。
//!
//! 参考实现 `InMemoryEventStore` 为易失存储，持久化后端实现同一协议后注入即可。
//!
mod in_memory;

pub use in_memory::{EventStoreConfig, InMemoryEventStore};

use crate::domain_event::{Event, EventKind};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

type Result<T> = std::result::Result<T, StoreError>;

/// 已落库事件：事件本体 + 日志位点 + 入库时间
#[derive(Debug, Clone)]
pub struct StoredEvent {
    position: u64,
    event: Arc<Event>,
    stored_at: DateTime<Utc>,
}

impl StoredEvent {
    /// `stored_at` 不早于 `occurred_at`
    pub fn new(position: u64, event: Arc<Event>, stored_at: DateTime<Utc>) -> Self {
        let stored_at = stored_at.max(event.occurred_at());
        Self {
            position,
            event,
            stored_at,
        }
    }

    /// 日志位点，从 1 开始单调递增
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn shared_event(&self) -> Arc<Event> {
        Arc::clone(&self.event)
    }

    pub fn stored_at(&self) -> DateTime<Utc> {
        self.stored_at
    }
}

/// 聚合快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub version: u64,
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

/// 事件日志指标
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreMetrics {
    pub total_events: u64,
    pub total_snapshots: u64,
    /// 最近 100 次追加的平均耗时
    pub average_append_time_ms: f64,
    pub storage_size_bytes: u64,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// 追加单条事件：所有索引在同一逻辑步骤内更新；失败不在内部重试
    async fn append(&self, event: Arc<Event>) -> Result<StoredEvent>;

    /// 批量追加：按输入顺序依次存储
    async fn append_many(&self, events: Vec<Arc<Event>>) -> Result<Vec<StoredEvent>> {
        let mut stored = Vec::with_capacity(events.len());
        for event in events {
            stored.push(self.append(event).await?);
        }
        Ok(stored)
    }

    /// 按聚合读取，按 `aggregate_version` 升序，可选过滤 `version >= from_version`
    async fn get_events(
        &self,
        aggregate_id: &str,
        from_version: Option<u64>,
    ) -> Result<Vec<StoredEvent>>;

    /// 按事件类型读取，新 → 旧分页
    async fn get_events_by_type(
        &self,
        kind: &EventKind,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<StoredEvent>>;

    /// 全量读取，新 → 旧分页
    async fn get_all_events(
        &self,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<StoredEvent>>;

    /// 返回 'static 生命周期的有限事件流，按 `occurred_at` 升序；
    /// 以新的起点再次调用即可续读
    async fn stream_events(
        &self,
        from: Option<DateTime<Utc>>,
    ) -> BoxStream<'static, Result<StoredEvent>>;

    async fn create_snapshot(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
        version: u64,
        data: Value,
    ) -> Result<Snapshot>;

    async fn get_snapshot(&self, aggregate_id: &str) -> Result<Option<Snapshot>>;

    /// 显式保留策略：删除 `occurred_at < cutoff` 的事件，返回删除数量
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    fn metrics(&self) -> StoreMetrics;
}

#[async_trait]
impl<T> EventStore for Arc<T>
where
    T: EventStore + ?Sized,
{
    async fn append(&self, event: Arc<Event>) -> Result<StoredEvent> {
        (**self).append(event).await
    }

    async fn append_many(&self, events: Vec<Arc<Event>>) -> Result<Vec<StoredEvent>> {
        (**self).append_many(events).await
    }

    async fn get_events(
        &self,
        aggregate_id: &str,
        from_version: Option<u64>,
    ) -> Result<Vec<StoredEvent>> {
        (**self).get_events(aggregate_id, from_version).await
    }

    async fn get_events_by_type(
        &self,
        kind: &EventKind,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<StoredEvent>> {
        (**self).get_events_by_type(kind, limit, offset).await
    }

    async fn get_all_events(
        &self,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<StoredEvent>> {
        (**self).get_all_events(limit, offset).await
    }

    async fn stream_events(
        &self,
        from: Option<DateTime<Utc>>,
    ) -> BoxStream<'static, Result<StoredEvent>> {
        (**self).stream_events(from).await
    }

    async fn create_snapshot(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
        version: u64,
        data: Value,
    ) -> Result<Snapshot> {
        (**self)
            .create_snapshot(aggregate_id, aggregate_type, version, data)
            .await
    }

    async fn get_snapshot(&self, aggregate_id: &str) -> Result<Option<Snapshot>> {
        (**self).get_snapshot(aggregate_id).await
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        (**self).prune_before(cutoff).await
    }

    fn metrics(&self) -> StoreMetrics {
        (**self).metrics()
    }
}
