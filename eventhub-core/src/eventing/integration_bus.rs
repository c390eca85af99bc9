//! 集成事件总线（IntegrationEventBus）
//!
//! 匹配规则：事件类型精确匹配，或路由键命中通配模式；再经过可选过滤器与 `can_handle`。
//! 内部处理器与投递通道并发执行，`publish` 等待两者结束；投递问题只记录，不返回。
//! 旁路观察者（`tap`）接收全部事件，不计入订阅数与处理指标。
//!
use super::filter::{CompiledFilter, EventFilter};
use super::handler::{DispatchReport, IntegrationEventHandler, dispatch};
use super::subscription::{Subscription, SubscriptionId, Unsubscribe};
use super::GlobPattern;
use crate::delivery::{DeliveryChannel, DeliveryOptions, DeliveryReport};
use crate::domain_event::{EventKind, IntegrationEvent};
use crate::error::EventResult;
use crate::metrics::{Counter, RollingAverage};
use bon::Builder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Instant;
use tracing::{debug, warn};

/// 单次发布选项
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// 只分发给内部处理器，不投递 Webhook
    pub skip_delivery: bool,
    pub delivery: DeliveryOptions,
}

impl PublishOptions {
    pub fn internal_only() -> Self {
        Self {
            skip_delivery: true,
            ..Self::default()
        }
    }
}

/// 单次发布结果
#[derive(Debug, Clone, Default)]
pub struct IntegrationPublishReport {
    pub dispatch: DispatchReport,
    /// 未配置投递通道或跳过投递时为 `None`
    pub delivery: Option<DeliveryReport>,
}

/// 集成事件总线指标
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationBusMetrics {
    pub total_events_published: u64,
    pub total_events_handled: u64,
    pub total_events_failed: u64,
    /// 投递通道的成功投递数
    pub total_events_delivered: u64,
    /// 投递通道的最终失败数
    pub total_delivery_failures: u64,
    pub active_subscriptions: usize,
    pub average_handling_time_ms: f64,
}

#[derive(Clone)]
struct Entry {
    id: SubscriptionId,
    handler: Arc<IntegrationEventHandler>,
    filter: Option<CompiledFilter>,
}

impl Entry {
    fn accepts(&self, event: &IntegrationEvent) -> bool {
        self.filter.as_ref().is_none_or(|f| f.matches(event))
    }
}

type Handlers = Vec<Arc<IntegrationEventHandler>>;

#[derive(Default)]
struct RouteTable {
    by_kind: HashMap<EventKind, Vec<Entry>>,
    by_pattern: Vec<(GlobPattern, Entry)>,
    taps: Vec<Entry>,
}

#[derive(Default)]
struct IntegrationRegistry {
    next_id: AtomicU64,
    table: RwLock<RouteTable>,
}

enum Route {
    Kind(EventKind),
    Pattern(GlobPattern),
    Tap,
}

impl IntegrationRegistry {
    fn insert(
        &self,
        route: Route,
        handler: Arc<IntegrationEventHandler>,
        filter: Option<CompiledFilter>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let entry = Entry {
            id,
            handler,
            filter,
        };

        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        match route {
            Route::Kind(kind) => table.by_kind.entry(kind).or_default().push(entry),
            Route::Pattern(pattern) => table.by_pattern.push((pattern, entry)),
            Route::Tap => table.taps.push(entry),
        }
        id
    }

    /// 发布时的订阅快照：类型订阅在前，模式订阅按注册顺序在后；旁路观察者单独返回
    fn matching(&self, event: &IntegrationEvent) -> (Handlers, Handlers) {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        let by_kind = table.by_kind.get(event.kind()).into_iter().flatten();
        let by_pattern = table
            .by_pattern
            .iter()
            .filter(|(pattern, _)| pattern.matches(event.routing_key()))
            .map(|(_, entry)| entry);

        let handlers = by_kind
            .chain(by_pattern)
            .filter(|entry| entry.accepts(event))
            .map(|entry| Arc::clone(&entry.handler))
            .collect();
        let taps = table.taps.iter().map(|e| Arc::clone(&e.handler)).collect();
        (handlers, taps)
    }

    fn len(&self) -> usize {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        table.by_pattern.len() + table.by_kind.values().map(Vec::len).sum::<usize>()
    }
}

impl Unsubscribe for IntegrationRegistry {
    fn remove(&self, id: SubscriptionId) -> bool {
        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());

        if let Some(pos) = table.by_pattern.iter().position(|(_, e)| e.id == id) {
            table.by_pattern.remove(pos);
            return true;
        }
        if let Some(pos) = table.taps.iter().position(|e| e.id == id) {
            table.taps.remove(pos);
            return true;
        }

        let found = table
            .by_kind
            .iter()
            .find_map(|(kind, list)| {
                list.iter()
                    .position(|e| e.id == id)
                    .map(|pos| (kind.clone(), pos))
            });
        match found {
            Some((kind, pos)) => {
                if let Some(list) = table.by_kind.get_mut(&kind) {
                    list.remove(pos);
                    if list.is_empty() {
                        table.by_kind.remove(&kind);
                    }
                }
                true
            }
            None => false,
        }
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
pub struct IntegrationEventBus {
    delivery_channel: Option<Arc<dyn DeliveryChannel>>,
    #[builder(skip)]
    registry: Arc<IntegrationRegistry>,
    #[builder(skip)]
    stats: BusStats,
}

impl Default for IntegrationEventBus {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl IntegrationEventBus {
    pub fn new(delivery_channel: Option<Arc<dyn DeliveryChannel>>) -> Self {
        Self::builder()
            .maybe_delivery_channel(delivery_channel)
            .build()
    }

    pub fn delivery_channel(&self) -> Option<&Arc<dyn DeliveryChannel>> {
        self.delivery_channel.as_ref()
    }

    /// 发布集成事件：内部处理器与 Webhook 投递并发进行
    pub async fn publish(
        &self,
        event: IntegrationEvent,
        options: PublishOptions,
    ) -> IntegrationPublishReport {
        self.stats.published.incr();
        let (handlers, taps) = self.registry.matching(&event);

        let handlers_fut = async {
            let started = Instant::now();
            let report = dispatch(&handlers, &event).await;
            self.stats.handling_time.record(started.elapsed());
            report
        };
        let delivery_fut = async {
            if options.skip_delivery {
                None
            } else {
                self.deliver(&event, &options.delivery).await
            }
        };
        let (dispatched, _, delivery) =
            tokio::join!(handlers_fut, dispatch(&taps, &event), delivery_fut);

        self.stats.handled.add(dispatched.handled as u64);
        self.stats.failed.add(dispatched.failed as u64);

        IntegrationPublishReport {
            dispatch: dispatched,
            delivery,
        }
    }

    /// 只走投递通道，不经过内部处理器；未配置投递通道时返回 `None`
    pub async fn deliver(
        &self,
        event: &IntegrationEvent,
        options: &DeliveryOptions,
    ) -> Option<DeliveryReport> {
        let channel = self.delivery_channel.as_ref()?;
        let report = channel.deliver_event(event, options).await;
        let failed = report.failed();
        if failed > 0 {
            warn!(
                event_id = %event.event().event_id(),
                routing_key = event.routing_key(),
                failed,
                delivered = report.delivered(),
                "Webhook delivery incomplete"
            );
        }
        Some(report)
    }

    pub fn subscribe(
        &self,
        kind: EventKind,
        handler: Arc<IntegrationEventHandler>,
        filter: Option<EventFilter>,
    ) -> EventResult<Subscription> {
        let filter = filter.map(EventFilter::compile).transpose()?;
        let name = handler.handler_name().to_string();
        let id = self.registry.insert(Route::Kind(kind.clone()), handler, filter);
        debug!(
            subscription = %id,
            handler = %name,
            event_type = kind.as_str(),
            "Integration subscription added"
        );
        Ok(Subscription::new(id, self.weak_registry()))
    }

    /// 按路由键通配模式订阅；模式与过滤器在此处校验
    pub fn subscribe_to_pattern(
        &self,
        pattern: &str,
        handler: Arc<IntegrationEventHandler>,
        filter: Option<EventFilter>,
    ) -> EventResult<Subscription> {
        let pattern = GlobPattern::new(pattern)?;
        let filter = filter.map(EventFilter::compile).transpose()?;
        let name = handler.handler_name().to_string();
        debug!(handler = %name, pattern = %pattern, "Integration pattern subscription added");
        let id = self.registry.insert(Route::Pattern(pattern), handler, filter);
        Ok(Subscription::new(id, self.weak_registry()))
    }

    /// 注册旁路观察者：接收每一条集成事件，不计入 `active_subscriptions` 与处理指标
    pub fn tap(&self, handler: Arc<IntegrationEventHandler>) -> Subscription {
        let name = handler.handler_name().to_string();
        let id = self.registry.insert(Route::Tap, handler, None);
        debug!(subscription = %id, handler = %name, "Integration tap added");
        Subscription::new(id, self.weak_registry())
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.registry.remove(id)
    }

    pub fn active_subscriptions(&self) -> usize {
        self.registry.len()
    }

    pub fn metrics(&self) -> IntegrationBusMetrics {
        let delivery = self
            .delivery_channel
            .as_ref()
            .map(|c| c.metrics())
            .unwrap_or_default();

        IntegrationBusMetrics {
            total_events_published: self.stats.published.get(),
            total_events_handled: self.stats.handled.get(),
            total_events_failed: self.stats.failed.get(),
            total_events_delivered: delivery.total_delivered,
            total_delivery_failures: delivery.total_failed,
            active_subscriptions: self.registry.len(),
            average_handling_time_ms: self.stats.handling_time.average_ms(),
        }
    }

    fn weak_registry(&self) -> Weak<dyn Unsubscribe> {
        let weak: Weak<IntegrationRegistry> = Arc::downgrade(&self.registry);
        weak
    }
}
