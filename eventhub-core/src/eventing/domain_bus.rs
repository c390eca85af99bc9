//! 领域事件总线（DomainEventBus）
//!
//! 进程内发布/订阅：
//! - `publish`：先写事件日志（失败即中止并返回错误），再按类型与全局订阅并发分发；
//! - `publish_many`：默认按聚合分组，组内顺序发布、组间并发；
//! - 处理器失败被隔离，只体现在日志与指标中；
//! - `tap`：旁路观察者（如桥接），接收全部事件，但不计入订阅数与处理指标。
//!
use super::handler::{DispatchReport, DomainEventHandler, dispatch};
use super::subscription::{Subscription, SubscriptionId, Unsubscribe};
use crate::domain_event::{Event, EventKind};
use crate::error::{EventError, EventResult};
use crate::event_store::EventStore;
use crate::metrics::{Counter, RollingAverage};
use bon::Builder;
use futures_util::future::{join, join_all};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Instant;
use tracing::{debug, error};

/// `publish_many` 的调度方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishManyMode {
    /// 同一聚合的事件按输入顺序依次发布，不同聚合并发
    #[default]
    PerAggregate,
    /// 所有事件并发发布，不保证任何相对顺序
    Concurrent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainBusConfig {
    pub publish_many: PublishManyMode,
}

/// 领域事件总线指标
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusMetrics {
    pub total_events_published: u64,
    pub total_events_handled: u64,
    pub total_events_failed: u64,
    pub active_subscriptions: usize,
    /// 最近 100 次发布的处理耗时（全部处理器结束为止）
    pub average_handling_time_ms: f64,
}

#[derive(Clone)]
struct Registered {
    id: SubscriptionId,
    handler: Arc<DomainEventHandler>,
}

type Handlers = Vec<Arc<DomainEventHandler>>;

#[derive(Default)]
struct HandlerTable {
    by_kind: HashMap<EventKind, Vec<Registered>>,
    all: Vec<Registered>,
    taps: Vec<Registered>,
}

enum Slot {
    Kind(EventKind),
    All,
    Tap,
}

#[derive(Default)]
struct DomainRegistry {
    next_id: AtomicU64,
    table: RwLock<HandlerTable>,
}

impl DomainRegistry {
    fn insert(&self, slot: Slot, handler: Arc<DomainEventHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let entry = Registered { id, handler };

        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        match slot {
            Slot::Kind(kind) => table.by_kind.entry(kind).or_default().push(entry),
            Slot::All => table.all.push(entry),
            Slot::Tap => table.taps.push(entry),
        }
        id
    }

    /// 发布时的订阅快照：类型订阅在前，全局订阅在后；旁路观察者单独返回
    fn matching(&self, kind: &EventKind) -> (Handlers, Handlers) {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        let handlers = table
            .by_kind
            .get(kind)
            .into_iter()
            .flatten()
            .chain(table.all.iter())
            .map(|r| Arc::clone(&r.handler))
            .collect();
        let taps = table.taps.iter().map(|r| Arc::clone(&r.handler)).collect();
        (handlers, taps)
    }

    fn len(&self) -> usize {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        table.all.len() + table.by_kind.values().map(Vec::len).sum::<usize>()
    }
}

impl Unsubscribe for DomainRegistry {
    fn remove(&self, id: SubscriptionId) -> bool {
        let mut guard = self.table.write().unwrap_or_else(|e| e.into_inner());
        let table = &mut *guard;

        for list in [&mut table.all, &mut table.taps] {
            if let Some(pos) = list.iter().position(|r| r.id == id) {
                list.remove(pos);
                return true;
            }
        }

        let mut emptied = None;
        let mut removed = false;
        for (kind, list) in table.by_kind.iter_mut() {
            if let Some(pos) = list.iter().position(|r| r.id == id) {
                list.remove(pos);
                removed = true;
                if list.is_empty() {
                    emptied = Some(kind.clone());
                }
                break;
            }
        }
        if let Some(kind) = emptied {
            table.by_kind.remove(&kind);
        }
        removed
    }
}

#[derive(Default)]
struct BusStats {
    published: Counter,
    handled: Counter,
    failed: Counter,
    handling_time: RollingAverage,
}

#[derive(Builder)]
pub struct DomainEventBus {
    event_store: Option<Arc<dyn EventStore>>,
    #[builder(default)]
    config: DomainBusConfig,
    #[builder(skip)]
    registry: Arc<DomainRegistry>,
    #[builder(skip)]
    stats: BusStats,
}

impl Default for DomainEventBus {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl DomainEventBus {
    pub fn new(event_store: Option<Arc<dyn EventStore>>) -> Self {
        Self::builder().maybe_event_store(event_store).build()
    }

    pub fn event_store(&self) -> Option<&Arc<dyn EventStore>> {
        self.event_store.as_ref()
    }

    pub fn config(&self) -> &DomainBusConfig {
        &self.config
    }

    pub async fn publish(&self, event: Event) -> EventResult<DispatchReport> {
        self.publish_shared(Arc::new(event)).await
    }

    /// 发布共享事件；日志写入成功后才会分发
    pub async fn publish_shared(&self, event: Arc<Event>) -> EventResult<DispatchReport> {
        if let Some(store) = &self.event_store {
            if let Err(err) = store.append(Arc::clone(&event)).await {
                error!(
                    event_id = %event.event_id(),
                    event_type = event.event_type(),
                    aggregate_id = event.aggregate_id(),
                    error = %err,
                    "Event append failed, publish aborted"
                );
                return Err(EventError::Store(err));
            }
        }
        self.stats.published.incr();

        let (handlers, taps) = self.registry.matching(event.kind());
        let observed = async {
            let started = Instant::now();
            let report = dispatch(&handlers, event.as_ref()).await;
            self.stats.handling_time.record(started.elapsed());
            report
        };
        let (report, _) = join(observed, dispatch(&taps, event.as_ref())).await;
        self.stats.handled.add(report.handled as u64);
        self.stats.failed.add(report.failed as u64);

        Ok(report)
    }

    /// 批量发布，返回与输入顺序一致的分发结果
    ///
    /// 任一事件写日志失败时，其后同一聚合的事件不再发布；
    /// 全部分组结束后返回首个错误。
    pub async fn publish_many(&self, events: Vec<Event>) -> EventResult<Vec<DispatchReport>> {
        let count = events.len();
        let events: Vec<Arc<Event>> = events.into_iter().map(Arc::new).collect();

        let results: Vec<(usize, EventResult<DispatchReport>)> = match self.config.publish_many {
            PublishManyMode::Concurrent => {
                join_all(events.into_iter().enumerate().map(|(idx, event)| async move {
                    (idx, self.publish_shared(event).await)
                }))
                .await
            }
            PublishManyMode::PerAggregate => {
                let groups = group_by_aggregate(events);
                debug!(events = count, groups = groups.len(), "Publishing event batch");

                join_all(groups.into_iter().map(|group| async move {
                    let mut done = Vec::with_capacity(group.len());
                    for (idx, event) in group {
                        let result = self.publish_shared(event).await;
                        let failed = result.is_err();
                        done.push((idx, result));
                        if failed {
                            break;
                        }
                    }
                    done
                }))
                .await
                .into_iter()
                .flatten()
                .collect()
            }
        };

        let mut ordered = results;
        ordered.sort_by_key(|(idx, _)| *idx);

        let mut reports = Vec::with_capacity(count);
        let mut first_error: Option<EventError> = None;
        for (_, result) in ordered {
            match result {
                Ok(report) => reports.push(report),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(reports),
        }
    }

    pub fn subscribe(&self, kind: EventKind, handler: Arc<DomainEventHandler>) -> Subscription {
        let name = handler.handler_name().to_string();
        let id = self.registry.insert(Slot::Kind(kind.clone()), handler);
        debug!(
            subscription = %id,
            handler = %name,
            event_type = kind.as_str(),
            "Domain subscription added"
        );
        Subscription::new(id, self.weak_registry())
    }

    pub fn subscribe_to_all(&self, handler: Arc<DomainEventHandler>) -> Subscription {
        let name = handler.handler_name().to_string();
        let id = self.registry.insert(Slot::All, handler);
        debug!(subscription = %id, handler = %name, "Domain subscription to all events added");
        Subscription::new(id, self.weak_registry())
    }

    /// 注册旁路观察者：接收全部事件，不计入 `active_subscriptions` 与处理指标，
    /// 也不出现在 `publish` 返回的分发结果里
    pub fn tap(&self, handler: Arc<DomainEventHandler>) -> Subscription {
        let name = handler.handler_name().to_string();
        let id = self.registry.insert(Slot::Tap, handler);
        debug!(subscription = %id, handler = %name, "Domain tap added");
        Subscription::new(id, self.weak_registry())
    }

    /// 按 ID 移除订阅，未知 ID 为无操作
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.registry.remove(id)
    }

    pub fn active_subscriptions(&self) -> usize {
        self.registry.len()
    }

    pub fn metrics(&self) -> BusMetrics {
        BusMetrics {
            total_events_published: self.stats.published.get(),
            total_events_handled: self.stats.handled.get(),
            total_events_failed: self.stats.failed.get(),
            active_subscriptions: self.registry.len(),
            average_handling_time_ms: self.stats.handling_time.average_ms(),
        }
    }

    fn weak_registry(&self) -> Weak<dyn Unsubscribe> {
        let weak: Weak<DomainRegistry> = Arc::downgrade(&self.registry);
        weak
    }
}

/// 按聚合分组，组的顺序与组内顺序均沿用输入顺序
fn group_by_aggregate(events: Vec<Arc<Event>>) -> Vec<Vec<(usize, Arc<Event>)>> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<(usize, Arc<Event>)>> = Vec::new();

    for (idx, event) in events.into_iter().enumerate() {
        let slot = *slots
            .entry(event.aggregate_id().to_string())
            .or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
        groups[slot].push((idx, event));
    }
    groups
}
