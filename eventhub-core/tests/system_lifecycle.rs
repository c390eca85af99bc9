use async_trait::async_trait;
use eventhub_core::domain_event::{Event, EventKind};
use eventhub_core::event_store::{EventStore, InMemoryEventStore};
use eventhub_core::eventing::{EventHandler, handler_fn};
use eventhub_core::realtime::{BroadcastRealtimeChannel, MessageOrigin, RealtimeChannel};
use eventhub_core::system::Bridge;
use eventhub_core::{EventError, EventSystem, EventSystemConfig};
use futures_util::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::{Instant, timeout};

fn config() -> EventSystemConfig {
    EventSystemConfig {
        enable_webhooks: false,
        metrics_interval_ms: 0,
        ..Default::default()
    }
}

fn event(aggregate_id: &str, version: u64) -> Event {
    Event::builder()
        .kind(EventKind::ProjectUpdated)
        .aggregate_id(aggregate_id)
        .aggregate_version(version)
        .build()
}

/// 处理耗时固定的处理器
struct Slow {
    delay: Duration,
    finished: Arc<AtomicBool>,
}

#[async_trait]
impl EventHandler<Event> for Slow {
    fn handler_name(&self) -> &str {
        "slow"
    }

    async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
        tokio::time::sleep(self.delay).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }
}

async fn wait_until(cond: impl Fn() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[test]
fn config_loads_from_toml_file() {
    let path = std::env::temp_dir().join(format!("eventhub-{}.toml", std::process::id()));
    std::fs::write(
        &path,
        "service_name = \"projects\"\nshutdown_grace_ms = 50\n\n[bridges]\ndomain_to_realtime = false\n",
    )
    .unwrap();

    let cfg = EventSystemConfig::from_toml_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(cfg.service_name, "projects");
    assert_eq!(cfg.shutdown_grace_ms, 50);
    assert!(!cfg.bridges.domain_to_realtime);
    assert!(cfg.bridges.integration_to_realtime);
}

#[tokio::test]
async fn injected_store_receives_published_events() {
    let store = Arc::new(InMemoryEventStore::new());
    let system = EventSystem::builder()
        .config(EventSystemConfig {
            enable_event_store: false,
            ..config()
        })
        .event_store(store.clone())
        .build()
        .unwrap();

    let reports = system
        .publish_domain_events(vec![event("p1", 1), event("p1", 2), event("p2", 1)])
        .await
        .unwrap();
    assert_eq!(reports.len(), 3);

    let versions: Vec<u64> = store
        .get_events("p1", None)
        .await
        .unwrap()
        .iter()
        .map(|s| s.event().aggregate_version())
        .collect();
    assert_eq!(versions, vec![1, 2]);
    assert_eq!(system.metrics().event_store.map(|m| m.total_events), Some(3));
}

#[tokio::test]
async fn realtime_bridges_follow_toggles() {
    let realtime = Arc::new(BroadcastRealtimeChannel::default());
    let mut stream = realtime.subscribe();
    let system = EventSystem::builder()
        .config(config())
        .realtime_channel(realtime.clone())
        .build()
        .unwrap();
    system.publish_domain_event(event("p0", 1)).await.unwrap();
    assert_eq!(realtime.metrics().total_broadcast, 0);

    assert!(system.enable_bridge(Bridge::DomainToRealtime).unwrap());
    assert!(system.enable_bridge(Bridge::IntegrationToRealtime).unwrap());
    system.publish_domain_event(event("p1", 1)).await.unwrap();
    let msg = timeout(Duration::from_secs(1), stream.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.origin, MessageOrigin::Domain);
    assert_eq!(msg.topic, "project:p1");

    assert!(system.disable_bridge(Bridge::DomainToRealtime));
    system.publish_domain_event(event("p1", 2)).await.unwrap();
    assert_eq!(realtime.metrics().total_broadcast, 1);

    let metrics = system.metrics();
    assert!(!metrics.bridges.domain_to_realtime);
    assert!(metrics.bridges.integration_to_realtime);
    assert_eq!(metrics.websocket_events.map(|m| m.total_broadcast), Some(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_waits_for_in_flight_publish() {
    let system = EventSystem::create(config()).unwrap();
    let finished = Arc::new(AtomicBool::new(false));
    system.subscribe_to_domain_event(
        EventKind::ProjectUpdated,
        Arc::new(Slow {
            delay: Duration::from_millis(200),
            finished: finished.clone(),
        }),
    );

    let started = Arc::new(AtomicUsize::new(0));
    let marker = started.clone();
    system.subscribe_to_all_domain_events(handler_fn("start-marker", move |_e: Event| {
        let marker = marker.clone();
        async move {
            marker.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }));

    let publisher = system.clone();
    let in_flight = tokio::spawn(async move { publisher.publish_domain_event(event("p1", 1)).await });
    wait_until(|| started.load(Ordering::SeqCst) == 1).await;

    system.shutdown().await;
    assert!(finished.load(Ordering::SeqCst));
    assert!(in_flight.await.unwrap().is_ok());

    let err = system.publish_domain_event(event("p1", 2)).await.unwrap_err();
    assert!(matches!(err, EventError::ShutDown));
    assert_eq!(system.metrics().domain_events.total_events_published, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_gives_up_after_grace_period() {
    let system = EventSystem::create(EventSystemConfig {
        shutdown_grace_ms: 50,
        ..config()
    })
    .unwrap();
    let finished = Arc::new(AtomicBool::new(false));
    system.subscribe_to_all_domain_events(Arc::new(Slow {
        delay: Duration::from_secs(2),
        finished: finished.clone(),
    }));

    let publisher = system.clone();
    let in_flight = tokio::spawn(async move { publisher.publish_domain_event(event("p1", 1)).await });
    wait_until(|| system.domain_event_bus().metrics().total_events_published == 1).await;

    let begun = Instant::now();
    system.shutdown().await;
    assert!(begun.elapsed() < Duration::from_secs(1));
    assert!(!finished.load(Ordering::SeqCst));
    assert!(system.is_shut_down());

    in_flight.abort();
}
