//! 统一事件系统（EventSystem）
//!
//! 组合根：按配置装配事件日志、两条总线、投递通道与实时通道，并负责：
//! - 总线之间的桥接开关；
//! - 周期性刷新指标快照；
//! - 有界等待的优雅关闭，关闭后发布返回 `EventError::ShutDown`。
//!
//! 不存在进程级单例，系统实例需要显式传递；`EventSystem` 可廉价克隆。
//!
mod bridge;
mod metrics;

pub use bridge::{Bridge, BridgeStatus};
pub use metrics::SystemMetrics;

use crate::config::EventSystemConfig;
use crate::delivery::DeliveryChannel;
use crate::domain_event::{Event, EventKind, EventSource, IntegrationEvent};
use crate::error::{EventError, EventResult};
use crate::event_store::{EventStore, InMemoryEventStore};
use crate::eventing::{
    DispatchReport, DomainEventBus, DomainEventHandler, EventFilter, IntegrationEventBus,
    IntegrationEventHandler, IntegrationPublishReport, PublishOptions, Subscription,
};
use crate::realtime::{BroadcastRealtimeChannel, RealtimeChannel};
use bon::bon;
use bridge::{BridgeSwitch, IntegrationForwarder, RealtimeForwarder};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct EventSystem {
    inner: Arc<SystemInner>,
}

struct SystemInner {
    config: EventSystemConfig,
    source: EventSource,
    event_store: Option<Arc<dyn EventStore>>,
    delivery_channel: Option<Arc<dyn DeliveryChannel>>,
    realtime_channel: Option<Arc<dyn RealtimeChannel>>,
    domain_bus: Arc<DomainEventBus>,
    integration_bus: Arc<IntegrationEventBus>,
    bridges: Bridges,
    lifecycle: Arc<Lifecycle>,
    snapshot: Mutex<Option<SystemMetrics>>,
}

#[derive(Default)]
struct Bridges {
    domain_to_integration: BridgeSwitch,
    domain_to_realtime: BridgeSwitch,
    integration_to_realtime: BridgeSwitch,
}

impl Bridges {
    fn switch(&self, bridge: Bridge) -> &BridgeSwitch {
        match bridge {
            Bridge::DomainToIntegration => &self.domain_to_integration,
            Bridge::DomainToRealtime => &self.domain_to_realtime,
            Bridge::IntegrationToRealtime => &self.integration_to_realtime,
        }
    }

    fn status(&self) -> BridgeStatus {
        BridgeStatus {
            domain_to_integration: self.domain_to_integration.is_on(),
            domain_to_realtime: self.domain_to_realtime.is_on(),
            integration_to_realtime: self.integration_to_realtime.is_on(),
        }
    }
}

#[bon]
impl EventSystem {
    /// 装配事件系统；未显式注入的组件按配置开关创建默认实现
    ///
    /// 必须在 Tokio 运行时内调用。
    #[builder]
    pub fn new(
        #[builder(default)] config: EventSystemConfig,
        event_store: Option<Arc<dyn EventStore>>,
        delivery_channel: Option<Arc<dyn DeliveryChannel>>,
        realtime_channel: Option<Arc<dyn RealtimeChannel>>,
    ) -> EventResult<Self> {
        let runtime = Handle::try_current().map_err(|e| EventError::Runtime {
            reason: e.to_string(),
        })?;

        let event_store = match event_store {
            Some(store) => Some(store),
            None if config.enable_event_store => {
                let store: Arc<dyn EventStore> =
                    Arc::new(InMemoryEventStore::with_config(config.store.clone()));
                Some(store)
            }
            None => None,
        };
        let delivery_channel = match delivery_channel {
            Some(channel) => Some(channel),
            None if config.enable_webhooks => default_delivery_channel(&config)?,
            None => None,
        };
        let realtime_channel = match realtime_channel {
            Some(channel) => Some(channel),
            None if config.enable_realtime => {
                let channel: Arc<dyn RealtimeChannel> =
                    Arc::new(BroadcastRealtimeChannel::new(config.realtime.clone()));
                Some(channel)
            }
            None => None,
        };

        let domain_bus = Arc::new(
            DomainEventBus::builder()
                .maybe_event_store(event_store.clone())
                .config(config.domain_bus.clone())
                .build(),
        );
        let integration_bus = Arc::new(IntegrationEventBus::new(delivery_channel.clone()));

        let inner = Arc::new(SystemInner {
            source: EventSource::new(&config.service_name, &config.service_version),
            event_store,
            delivery_channel,
            realtime_channel,
            domain_bus,
            integration_bus,
            bridges: Bridges::default(),
            lifecycle: Arc::default(),
            snapshot: Mutex::new(None),
            config,
        });

        let wanted = &inner.config.bridges;
        for (bridge, on) in [
            (Bridge::DomainToIntegration, wanted.domain_to_integration),
            (Bridge::DomainToRealtime, wanted.domain_to_realtime),
            (Bridge::IntegrationToRealtime, wanted.integration_to_realtime),
        ] {
            if !on {
                continue;
            }
            if let Err(err) = inner.enable_bridge(bridge) {
                debug!(bridge = %bridge, error = %err, "Bridge not enabled at startup");
            }
        }

        if let Some(interval) = inner.config.metrics_interval() {
            let weak = Arc::downgrade(&inner);
            let task = spawn_periodic(&runtime, inner.lifecycle.token.clone(), interval, move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.refresh_snapshot();
                    }
                }
            });
            inner.lifecycle.set_housekeeping(task);
        }

        info!(
            service = %inner.source.service,
            event_store = inner.event_store.is_some(),
            webhooks = inner.delivery_channel.is_some(),
            realtime = inner.realtime_channel.is_some(),
            "Event system started"
        );
        Ok(Self { inner })
    }
}

impl EventSystem {
    /// 全部使用默认组件
    pub fn create(config: EventSystemConfig) -> EventResult<Self> {
        Self::builder().config(config).build()
    }

    pub fn config(&self) -> &EventSystemConfig {
        &self.inner.config
    }

    /// 集成事件的来源服务
    pub fn source(&self) -> &EventSource {
        &self.inner.source
    }

    pub fn event_store(&self) -> Option<&Arc<dyn EventStore>> {
        self.inner.event_store.as_ref()
    }

    pub fn domain_event_bus(&self) -> &Arc<DomainEventBus> {
        &self.inner.domain_bus
    }

    pub fn integration_event_bus(&self) -> &Arc<IntegrationEventBus> {
        &self.inner.integration_bus
    }

    pub fn delivery_channel(&self) -> Option<&Arc<dyn DeliveryChannel>> {
        self.inner.delivery_channel.as_ref()
    }

    pub fn realtime_channel(&self) -> Option<&Arc<dyn RealtimeChannel>> {
        self.inner.realtime_channel.as_ref()
    }

    // --- 领域事件 ---

    pub async fn publish_domain_event(&self, event: Event) -> EventResult<DispatchReport> {
        let _guard = self.inner.lifecycle.enter()?;
        self.inner.domain_bus.publish(event).await
    }

    pub async fn publish_domain_events(
        &self,
        events: Vec<Event>,
    ) -> EventResult<Vec<DispatchReport>> {
        let _guard = self.inner.lifecycle.enter()?;
        self.inner.domain_bus.publish_many(events).await
    }

    pub fn subscribe_to_domain_event(
        &self,
        kind: EventKind,
        handler: Arc<DomainEventHandler>,
    ) -> Subscription {
        self.inner.domain_bus.subscribe(kind, handler)
    }

    pub fn subscribe_to_all_domain_events(&self, handler: Arc<DomainEventHandler>) -> Subscription {
        self.inner.domain_bus.subscribe_to_all(handler)
    }

    // --- 集成事件 ---

    pub async fn publish_integration_event(
        &self,
        event: IntegrationEvent,
        options: PublishOptions,
    ) -> EventResult<IntegrationPublishReport> {
        let _guard = self.inner.lifecycle.enter()?;
        Ok(self.inner.integration_bus.publish(event, options).await)
    }

    pub fn subscribe_to_integration_event(
        &self,
        kind: EventKind,
        handler: Arc<IntegrationEventHandler>,
        filter: Option<EventFilter>,
    ) -> EventResult<Subscription> {
        self.inner.integration_bus.subscribe(kind, handler, filter)
    }

    pub fn subscribe_to_integration_pattern(
        &self,
        pattern: &str,
        handler: Arc<IntegrationEventHandler>,
        filter: Option<EventFilter>,
    ) -> EventResult<Subscription> {
        self.inner
            .integration_bus
            .subscribe_to_pattern(pattern, handler, filter)
    }

    // --- 桥接 ---

    /// 开启桥接；已开启时返回 `Ok(false)`，缺少实时通道时返回配置错误
    pub fn enable_bridge(&self, bridge: Bridge) -> EventResult<bool> {
        self.inner.enable_bridge(bridge)
    }

    /// 关闭桥接；未开启时返回 `false`
    pub fn disable_bridge(&self, bridge: Bridge) -> bool {
        let changed = self.inner.bridges.switch(bridge).turn_off();
        if changed {
            info!(bridge = %bridge, "Bridge disabled");
        }
        changed
    }

    pub fn bridge_status(&self) -> BridgeStatus {
        self.inner.bridges.status()
    }

    // --- 指标与生命周期 ---

    /// 当前指标；关闭后返回关闭时冻结的快照
    pub fn metrics(&self) -> SystemMetrics {
        match self.inner.lifecycle.frozen.get() {
            Some(frozen) => frozen.clone(),
            None => self.inner.collect(),
        }
    }

    /// 后台任务最近一次刷新的快照
    pub fn last_snapshot(&self) -> Option<SystemMetrics> {
        self.inner
            .snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.lifecycle.closed.load(Ordering::SeqCst)
    }

    /// 停止后台任务，并在宽限期内等待进行中的发布完成；仅首次调用生效
    pub async fn shutdown(&self) {
        let lifecycle = &self.inner.lifecycle;
        if lifecycle.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Event system shutting down");

        lifecycle.token.cancel();
        if let Some(task) = lifecycle.take_housekeeping() {
            if let Err(err) = task.await {
                warn!(error = %err, "Housekeeping task ended abnormally");
            }
        }

        let grace = self.inner.config.shutdown_grace();
        if time::timeout(grace, lifecycle.drained()).await.is_err() {
            warn!(
                in_flight = lifecycle.in_flight.load(Ordering::SeqCst),
                grace_ms = grace.as_millis() as u64,
                "Shutdown grace period elapsed with publishes still in flight"
            );
        }

        let _ = lifecycle.frozen.set(self.inner.collect());
        info!("Event system shut down");
    }
}

impl SystemInner {
    fn enable_bridge(&self, bridge: Bridge) -> EventResult<bool> {
        let switch = self.bridges.switch(bridge);
        let changed = match bridge {
            Bridge::DomainToIntegration => {
                let forwarder = Arc::new(IntegrationForwarder::new(
                    Arc::clone(&self.integration_bus),
                    self.source.clone(),
                    Arc::clone(&self.lifecycle),
                ));
                switch.turn_on(|| Ok(self.domain_bus.tap(forwarder)))?
            }
            Bridge::DomainToRealtime => {
                let forwarder = Arc::new(RealtimeForwarder::new(bridge, self.realtime(bridge)?));
                switch.turn_on(|| Ok(self.domain_bus.tap(forwarder)))?
            }
            Bridge::IntegrationToRealtime => {
                let forwarder = Arc::new(RealtimeForwarder::new(bridge, self.realtime(bridge)?));
                switch.turn_on(|| Ok(self.integration_bus.tap(forwarder)))?
            }
        };
        if changed {
            info!(bridge = %bridge, "Bridge enabled");
        }
        Ok(changed)
    }

    fn realtime(&self, bridge: Bridge) -> EventResult<Arc<dyn RealtimeChannel>> {
        self.realtime_channel
            .clone()
            .ok_or_else(|| EventError::Config {
                reason: format!("bridge {bridge} requires a realtime channel"),
            })
    }

    fn collect(&self) -> SystemMetrics {
        SystemMetrics {
            domain_events: self.domain_bus.metrics(),
            integration_events: self.integration_bus.metrics(),
            event_store: self
                .event_store
                .as_ref()
                .map(|store| EventStore::metrics(store.as_ref())),
            webhook_events: self
                .delivery_channel
                .as_ref()
                .map(|channel| DeliveryChannel::metrics(channel.as_ref())),
            websocket_events: self
                .realtime_channel
                .as_ref()
                .map(|channel| RealtimeChannel::metrics(channel.as_ref())),
            bridges: self.bridges.status(),
            collected_at: Utc::now(),
        }
    }

    fn refresh_snapshot(&self) {
        let metrics = self.collect();
        debug!(
            domain_published = metrics.domain_events.total_events_published,
            integration_published = metrics.integration_events.total_events_published,
            stored = metrics.event_store.as_ref().map(|m| m.total_events),
            delivered = metrics.webhook_events.as_ref().map(|m| m.total_delivered),
            "Event system metrics"
        );
        *self.snapshot.lock().unwrap_or_else(|e| e.into_inner()) = Some(metrics);
    }
}

impl Drop for SystemInner {
    fn drop(&mut self) {
        self.lifecycle.token.cancel();
    }
}

#[cfg(feature = "http")]
fn default_delivery_channel(
    config: &EventSystemConfig,
) -> EventResult<Option<Arc<dyn DeliveryChannel>>> {
    let channel = crate::delivery::WebhookDeliveryChannel::http(config.delivery.clone())?;
    Ok(Some(Arc::new(channel)))
}

#[cfg(not(feature = "http"))]
fn default_delivery_channel(
    _config: &EventSystemConfig,
) -> EventResult<Option<Arc<dyn DeliveryChannel>>> {
    warn!("Webhooks enabled without the http feature, inject a delivery channel instead");
    Ok(None)
}

/// 发布路径的生命周期：关闭标记 + 进行中计数
#[derive(Default)]
pub(crate) struct Lifecycle {
    closed: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
    token: CancellationToken,
    housekeeping: Mutex<Option<JoinHandle<()>>>,
    frozen: OnceLock<SystemMetrics>,
}

pub(crate) struct InFlight(Arc<Lifecycle>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.leave();
    }
}

impl Lifecycle {
    fn enter(self: &Arc<Self>) -> EventResult<InFlight> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            self.leave();
            return Err(EventError::ShutDown);
        }
        Ok(InFlight(Arc::clone(self)))
    }

    /// 为发布派生的后台工作占用名额；不检查关闭标记，调用方已处于一次发布之内
    pub(crate) fn track(self: &Arc<Self>) -> InFlight {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlight(Arc::clone(self))
    }

    fn leave(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn drained(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    fn set_housekeeping(&self, task: JoinHandle<()>) {
        *self.housekeeping.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
    }

    fn take_housekeeping(&self) -> Option<JoinHandle<()>> {
        self.housekeeping
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

fn spawn_periodic<F, Fut>(
    runtime: &Handle,
    token: CancellationToken,
    interval: Duration,
    mut f: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    runtime.spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => f().await,
            }
        }
    })
}
