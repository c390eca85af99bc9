//! 内存版事件日志（InMemoryEventStore）
//!
//! 全部索引（按 ID、按聚合、按类型）与快照保存在同一把读写锁下，
//! 追加在一次写锁内完成，读方不会观察到部分更新的索引。
//!
use super::{EventStore, Snapshot, StoreMetrics, StoredEvent};
use crate::domain_event::{Event, EventKind};
use crate::error::StoreError;
use crate::metrics::RollingAverage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::stream::BoxStream;
use futures_util::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

type Result<T> = std::result::Result<T, StoreError>;

/// 内存事件日志配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventStoreConfig {
    /// 最多保留的事件数，超出后追加失败；`None` 表示不限制
    pub max_events: Option<usize>,
}

#[derive(Default)]
struct StoreState {
    events: Vec<StoredEvent>,
    /// 与 `events` 一一对应的序列化字节数
    sizes: Vec<u64>,
    by_id: HashMap<Uuid, usize>,
    by_aggregate: HashMap<String, Vec<usize>>,
    by_kind: HashMap<EventKind, Vec<usize>>,
    snapshots: HashMap<String, Snapshot>,
    next_position: u64,
    storage_size: u64,
}

impl StoreState {
    fn insert(&mut self, event: Arc<Event>, size: u64) -> StoredEvent {
        self.next_position += 1;
        let stored = StoredEvent::new(self.next_position, event, Utc::now());
        let idx = self.events.len();

        self.by_id.insert(stored.event().event_id(), idx);
        self.by_aggregate
            .entry(stored.event().aggregate_id().to_string())
            .or_default()
            .push(idx);
        self.by_kind
            .entry(stored.event().kind().clone())
            .or_default()
            .push(idx);
        self.storage_size += size;
        self.events.push(stored.clone());
        self.sizes.push(size);

        stored
    }

    /// 只保留满足条件的事件并重建索引，返回移除数
    ///
    /// 新索引先在局部变量中构建完成，再整体替换。
    fn retain(&mut self, keep: impl Fn(&StoredEvent) -> bool) -> usize {
        let before = self.events.len();
        let (events, sizes): (Vec<StoredEvent>, Vec<u64>) = self
            .events
            .iter()
            .zip(&self.sizes)
            .filter(|(stored, _)| keep(stored))
            .map(|(stored, size)| (stored.clone(), *size))
            .unzip();
        let removed = before - events.len();
        if removed == 0 {
            return 0;
        }

        let mut by_id = HashMap::with_capacity(events.len());
        let mut by_aggregate: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_kind: HashMap<EventKind, Vec<usize>> = HashMap::new();
        for (idx, stored) in events.iter().enumerate() {
            let event = stored.event();
            by_id.insert(event.event_id(), idx);
            by_aggregate
                .entry(event.aggregate_id().to_string())
                .or_default()
                .push(idx);
            by_kind.entry(event.kind().clone()).or_default().push(idx);
        }

        self.storage_size = sizes.iter().sum();
        self.events = events;
        self.sizes = sizes;
        self.by_id = by_id;
        self.by_aggregate = by_aggregate;
        self.by_kind = by_kind;
        removed
    }

    fn newest_first(
        &self,
        indices: &[usize],
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Vec<StoredEvent> {
        indices
            .iter()
            .rev()
            .skip(offset.unwrap_or(0))
            .take(limit.unwrap_or(usize::MAX))
            .map(|&idx| self.events[idx].clone())
            .collect()
    }
}

/// 批量追加耗时平摊到每条事件
fn per_event(elapsed: Duration, count: usize) -> Duration {
    elapsed.div_f64(count.max(1) as f64)
}

fn wire_size(event: &Event) -> Result<u64> {
    Ok(serde_json::to_vec(&event.to_wire())?.len() as u64)
}

/// 内存事件日志
#[derive(Default)]
pub struct InMemoryEventStore {
    state: RwLock<StoreState>,
    append_times: RollingAverage,
    config: EventStoreConfig,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EventStoreConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn check_capacity(&self, current: usize, incoming: usize) -> Result<()> {
        match self.config.max_events {
            Some(max_events) if current + incoming > max_events => {
                Err(StoreError::CapacityExceeded { max_events })
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: Arc<Event>) -> Result<StoredEvent> {
        let started = Instant::now();
        let size = wire_size(&event)?;

        let stored = {
            let mut state = self.write();
            if state.by_id.contains_key(&event.event_id()) {
                return Err(StoreError::DuplicateEvent {
                    event_id: event.event_id(),
                });
            }
            self.check_capacity(state.events.len(), 1)?;
            state.insert(event, size)
        };

        self.append_times.record(started.elapsed());
        debug!(
            event_id = %stored.event().event_id(),
            event_type = stored.event().event_type(),
            aggregate_id = stored.event().aggregate_id(),
            position = stored.position(),
            "Event appended"
        );
        Ok(stored)
    }

    async fn append_many(&self, events: Vec<Arc<Event>>) -> Result<Vec<StoredEvent>> {
        let started = Instant::now();
        let sizes = events
            .iter()
            .map(|e| wire_size(e))
            .collect::<Result<Vec<_>>>()?;

        let stored = {
            let mut state = self.write();
            self.check_capacity(state.events.len(), events.len())?;

            let mut seen = HashSet::with_capacity(events.len());
            for event in &events {
                let id = event.event_id();
                if state.by_id.contains_key(&id) || !seen.insert(id) {
                    return Err(StoreError::DuplicateEvent { event_id: id });
                }
            }

            events
                .into_iter()
                .zip(sizes)
                .map(|(event, size)| state.insert(event, size))
                .collect::<Vec<_>>()
        };

        if !stored.is_empty() {
            let per_event = per_event(started.elapsed(), stored.len());
            for _ in &stored {
                self.append_times.record(per_event);
            }
        }
        debug!(count = stored.len(), "Event batch appended");
        Ok(stored)
    }

    async fn get_events(
        &self,
        aggregate_id: &str,
        from_version: Option<u64>,
    ) -> Result<Vec<StoredEvent>> {
        let state = self.read();
        let Some(indices) = state.by_aggregate.get(aggregate_id) else {
            return Ok(Vec::new());
        };

        let from_version = from_version.unwrap_or(0);
        let mut events: Vec<StoredEvent> = indices
            .iter()
            .map(|&idx| state.events[idx].clone())
            .filter(|s| s.event().aggregate_version() >= from_version)
            .collect();
        // 稳定排序：同版本保持存储顺序
        events.sort_by_key(|s| s.event().aggregate_version());
        Ok(events)
    }

    async fn get_events_by_type(
        &self,
        kind: &EventKind,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<StoredEvent>> {
        let state = self.read();
        Ok(state
            .by_kind
            .get(kind)
            .map(|indices| state.newest_first(indices, limit, offset))
            .unwrap_or_default())
    }

    async fn get_all_events(
        &self,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<StoredEvent>> {
        let state = self.read();
        let indices: Vec<usize> = (0..state.events.len()).collect();
        Ok(state.newest_first(&indices, limit, offset))
    }

    async fn stream_events(
        &self,
        from: Option<DateTime<Utc>>,
    ) -> BoxStream<'static, Result<StoredEvent>> {
        let mut events: Vec<StoredEvent> = {
            let state = self.read();
            state
                .events
                .iter()
                .filter(|s| from.is_none_or(|from| s.event().occurred_at() >= from))
                .cloned()
                .collect()
        };
        events.sort_by_key(|s| s.event().occurred_at());

        stream::iter(events.into_iter().map(Ok)).boxed()
    }

    async fn create_snapshot(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
        version: u64,
        data: Value,
    ) -> Result<Snapshot> {
        let snapshot = Snapshot {
            aggregate_id: aggregate_id.to_string(),
            aggregate_type: aggregate_type.to_string(),
            version,
            data,
            created_at: Utc::now(),
        };

        self.write()
            .snapshots
            .insert(aggregate_id.to_string(), snapshot.clone());
        debug!(aggregate_id, version, "Snapshot created");
        Ok(snapshot)
    }

    async fn get_snapshot(&self, aggregate_id: &str) -> Result<Option<Snapshot>> {
        Ok(self.read().snapshots.get(aggregate_id).cloned())
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let removed = self
            .write()
            .retain(|s| s.event().occurred_at() >= cutoff);
        debug!(removed, %cutoff, "Events pruned");
        Ok(removed)
    }

    fn metrics(&self) -> StoreMetrics {
        let state = self.read();
        StoreMetrics {
            total_events: state.events.len() as u64,
            total_snapshots: state.snapshots.len() as u64,
            average_append_time_ms: self.append_times.average_ms(),
            storage_size_bytes: state.storage_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn ev(aggregate_id: &str, version: u64, kind: EventKind) -> Arc<Event> {
        Arc::new(
            Event::builder()
                .kind(kind)
                .aggregate_id(aggregate_id)
                .aggregate_version(version)
                .data(json!({ "v": version }))
                .build(),
        )
    }

    fn ev_at(aggregate_id: &str, version: u64, at: DateTime<Utc>) -> Arc<Event> {
        Arc::new(
            Event::builder()
                .kind(EventKind::TaskUpdated)
                .aggregate_id(aggregate_id)
                .aggregate_version(version)
                .occurred_at(at)
                .build(),
        )
    }

    #[tokio::test]
    async fn get_events_sorts_by_aggregate_version() {
        let store = InMemoryEventStore::new();
        for v in [3, 1, 2] {
            store.append(ev("t1", v, EventKind::TaskUpdated)).await.unwrap();
        }
        store.append(ev("t2", 1, EventKind::TaskCreated)).await.unwrap();

        let versions: Vec<u64> = store
            .get_events("t1", None)
            .await
            .unwrap()
            .iter()
            .map(|s| s.event().aggregate_version())
            .collect();
        assert_eq!(versions, vec![1, 2, 3]);

        let from_two = store.get_events("t1", Some(2)).await.unwrap();
        assert_eq!(from_two.len(), 2);
        assert!(store.get_events("missing", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_many_preserves_input_order() {
        let store = InMemoryEventStore::new();
        let batch = vec![
            ev("t1", 1, EventKind::TaskCreated),
            ev("t1", 2, EventKind::TaskUpdated),
            ev("t1", 3, EventKind::TaskCompleted),
        ];
        let ids: Vec<Uuid> = batch.iter().map(|e| e.event_id()).collect();

        let stored = store.append_many(batch).await.unwrap();
        let positions: Vec<u64> = stored.iter().map(StoredEvent::position).collect();
        assert_eq!(positions, vec![1, 2, 3]);

        let read: Vec<Uuid> = store
            .get_events("t1", None)
            .await
            .unwrap()
            .iter()
            .map(|s| s.event().event_id())
            .collect();
        assert_eq!(read, ids);
    }

    #[tokio::test]
    async fn duplicate_event_is_rejected_and_batch_is_atomic() {
        let store = InMemoryEventStore::new();
        let first = ev("t1", 1, EventKind::TaskCreated);
        store.append(first.clone()).await.unwrap();

        let err = store.append(first.clone()).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEvent { .. }));

        let err = store
            .append_many(vec![ev("t1", 2, EventKind::TaskUpdated), first])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEvent { .. }));
        assert_eq!(store.metrics().total_events, 1);
    }

    #[tokio::test]
    async fn capacity_limit_fails_append() {
        let store = InMemoryEventStore::with_config(EventStoreConfig {
            max_events: Some(2),
        });
        store.append(ev("t1", 1, EventKind::TaskCreated)).await.unwrap();
        store.append(ev("t1", 2, EventKind::TaskUpdated)).await.unwrap();

        let err = store
            .append(ev("t1", 3, EventKind::TaskUpdated))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CapacityExceeded { max_events: 2 }));
    }

    #[tokio::test]
    async fn by_type_and_all_are_newest_first_and_paginated() {
        let store = InMemoryEventStore::new();
        for v in 1..=5 {
            store.append(ev("t1", v, EventKind::TaskUpdated)).await.unwrap();
        }
        store.append(ev("p1", 1, EventKind::ProjectCreated)).await.unwrap();

        let page: Vec<u64> = store
            .get_events_by_type(&EventKind::TaskUpdated, Some(2), Some(1))
            .await
            .unwrap()
            .iter()
            .map(|s| s.event().aggregate_version())
            .collect();
        assert_eq!(page, vec![4, 3]);

        let all = store.get_all_events(None, None).await.unwrap();
        assert_eq!(all.len(), 6);
        assert_eq!(all[0].event().kind(), &EventKind::ProjectCreated);

        let tail = store.get_all_events(Some(10), Some(5)).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].position(), 1);

        assert!(
            store
                .get_events_by_type(&EventKind::TaskDeleted, None, None)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn stream_is_ascending_by_occurrence_and_restartable() {
        let store = InMemoryEventStore::new();
        let base = Utc::now() - Duration::minutes(10);
        for (v, minutes) in [(1, 5), (2, 1), (3, 3)] {
            store
                .append(ev_at("t1", v, base + Duration::minutes(minutes)))
                .await
                .unwrap();
        }

        let all: Vec<u64> = store
            .stream_events(None)
            .await
            .map(|r| r.unwrap().event().aggregate_version())
            .collect()
            .await;
        assert_eq!(all, vec![2, 3, 1]);

        let resumed: Vec<u64> = store
            .stream_events(Some(base + Duration::minutes(3)))
            .await
            .map(|r| r.unwrap().event().aggregate_version())
            .collect()
            .await;
        assert_eq!(resumed, vec![3, 1]);
    }

    #[tokio::test]
    async fn stored_at_is_not_before_occurred_at() {
        let store = InMemoryEventStore::new();
        let future = Utc::now() + Duration::hours(1);
        let stored = store.append(ev_at("t1", 1, future)).await.unwrap();
        assert!(stored.stored_at() >= stored.event().occurred_at());
    }

    #[tokio::test]
    async fn snapshot_latest_overwrites() {
        let store = InMemoryEventStore::new();
        assert!(store.get_snapshot("t1").await.unwrap().is_none());

        store
            .create_snapshot("t1", "task", 3, json!({"title": "a"}))
            .await
            .unwrap();
        store
            .create_snapshot("t1", "task", 6, json!({"title": "b"}))
            .await
            .unwrap();

        let snap = store.get_snapshot("t1").await.unwrap().unwrap();
        assert_eq!(snap.version, 6);
        assert_eq!(snap.data, json!({"title": "b"}));
        assert_eq!(store.metrics().total_snapshots, 1);
    }

    #[tokio::test]
    async fn prune_before_rebuilds_indices() {
        let store = InMemoryEventStore::new();
        let old = Utc::now() - Duration::days(30);
        store.append(ev_at("t1", 1, old)).await.unwrap();
        store.append(ev_at("t1", 2, Utc::now())).await.unwrap();
        let size_before = store.metrics().storage_size_bytes;

        let removed = store
            .prune_before(Utc::now() - Duration::days(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let remaining = store.get_events("t1", None).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].event().aggregate_version(), 2);
        assert_eq!(remaining[0].position(), 2);
        assert!(store.metrics().storage_size_bytes < size_before);
    }

    #[tokio::test]
    async fn prune_keeps_indices_and_size_consistent() {
        let store = InMemoryEventStore::new();
        let old = Utc::now() - Duration::days(30);
        let pruned = ev_at("t1", 1, old);
        let recent = ev_at("t2", 1, Utc::now());
        store.append(pruned.clone()).await.unwrap();
        store.append(ev_at("t1", 2, old)).await.unwrap();
        store.append(recent.clone()).await.unwrap();

        let removed = store
            .prune_before(Utc::now() - Duration::days(1))
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let fresh = InMemoryEventStore::new();
        fresh.append(recent.clone()).await.unwrap();
        assert_eq!(
            store.metrics().storage_size_bytes,
            fresh.metrics().storage_size_bytes
        );
        assert!(store.get_events("t1", None).await.unwrap().is_empty());
        let kept = store.get_events("t2", None).await.unwrap();
        assert_eq!(kept[0].position(), 3);

        // ID 索引已同步：保留的事件仍判重，被修剪的事件可以再次追加
        let err = store.append(recent).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEvent { .. }));
        store.append(pruned).await.unwrap();
        assert_eq!(store.metrics().total_events, 2);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn batch_time_is_split_without_truncating_the_count() {
        let elapsed = std::time::Duration::from_secs(10);
        assert_eq!(per_event(elapsed, 4), std::time::Duration::from_millis(2_500));
        // 超过 u32::MAX 的条数不能被截断成一个小除数
        let huge = u32::MAX as usize + 2;
        assert!(per_event(elapsed, huge) < std::time::Duration::from_micros(1));
        assert_eq!(per_event(elapsed, 0), elapsed);
    }

    #[tokio::test]
    async fn metrics_track_appends() {
        let store = InMemoryEventStore::new();
        assert_eq!(store.metrics(), StoreMetrics::default());

        store.append(ev("t1", 1, EventKind::TaskCreated)).await.unwrap();
        let m = store.metrics();
        assert_eq!(m.total_events, 1);
        assert!(m.storage_size_bytes > 0);
        assert!(m.average_append_time_ms >= 0.0);
    }
}
