use anyhow::Result as AnyResult;
use async_trait::async_trait;
use eventhub_core::domain_event::{Event, EventKind, EventSource, IntegrationEvent, WireEvent};
use eventhub_core::event_store::{EventStore, InMemoryEventStore};
use eventhub_core::eventing::{
    DomainEventBus, EventHandler, IntegrationEventBus, PublishOptions, handler_fn,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn task_event(kind: EventKind, aggregate_id: &str, version: u64) -> Event {
    Event::builder()
        .kind(kind)
        .aggregate_id(aggregate_id)
        .aggregate_version(version)
        .data(json!({ "title": format!("task {aggregate_id}"), "version": version }))
        .build()
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl EventHandler<Event> for Recorder {
    fn handler_name(&self) -> &str {
        "recorder"
    }

    async fn handle(&self, event: &Event) -> AnyResult<()> {
        self.seen
            .lock()
            .unwrap()
            .push(format!("{}@{}", event.aggregate_id(), event.aggregate_version()));
        Ok(())
    }
}

struct Failing;

#[async_trait]
impl EventHandler<Event> for Failing {
    fn handler_name(&self) -> &str {
        "failing"
    }

    async fn handle(&self, _event: &Event) -> AnyResult<()> {
        anyhow::bail!("projection unavailable")
    }
}

#[test]
fn event_ids_are_unique() {
    let ids: HashSet<_> = (0..1_000)
        .map(|i| task_event(EventKind::TaskCreated, "t1", i).event_id())
        .collect();
    assert_eq!(ids.len(), 1_000);
}

#[tokio::test]
async fn published_event_is_logged_once() {
    let store = Arc::new(InMemoryEventStore::new());
    let bus = DomainEventBus::new(Some(store.clone()));

    bus.publish(task_event(EventKind::TaskCreated, "t1", 1))
        .await
        .unwrap();

    let events = store.get_events("t1", None).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event().event_type(), "TaskCreated");
}

#[tokio::test]
async fn aggregate_reads_are_version_ordered() {
    let store = InMemoryEventStore::new();
    for version in [3, 1, 2] {
        store
            .append(Arc::new(task_event(EventKind::TaskUpdated, "t1", version)))
            .await
            .unwrap();
    }
    store
        .append(Arc::new(task_event(EventKind::TaskCreated, "t2", 1)))
        .await
        .unwrap();

    let versions: Vec<u64> = store
        .get_events("t1", None)
        .await
        .unwrap()
        .iter()
        .map(|s| s.event().aggregate_version())
        .collect();
    assert_eq!(versions, vec![1, 2, 3]);
}

#[tokio::test]
async fn batch_append_keeps_input_order() {
    let store = InMemoryEventStore::new();
    let batch: Vec<Arc<Event>> = (1..=3)
        .map(|v| Arc::new(task_event(EventKind::TaskUpdated, "t1", v)))
        .collect();
    let ids: Vec<_> = batch.iter().map(|e| e.event_id()).collect();

    let stored = store.append_many(batch).await.unwrap();
    let positions: Vec<u64> = stored.iter().map(|s| s.position()).collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));

    let read: Vec<_> = store
        .get_events("t1", None)
        .await
        .unwrap()
        .iter()
        .map(|s| s.event().event_id())
        .collect();
    assert_eq!(read, ids);
}

#[tokio::test]
async fn failing_handler_does_not_block_its_siblings() {
    let bus = DomainEventBus::default();
    let recorder = Arc::new(Recorder::default());
    bus.subscribe(EventKind::TaskCreated, Arc::new(Failing));
    bus.subscribe(EventKind::TaskCreated, recorder.clone());

    let report = bus
        .publish(task_event(EventKind::TaskCreated, "t1", 1))
        .await
        .unwrap();

    assert_eq!(report.invoked(), 2);
    assert_eq!(report.failed, 1);
    assert_eq!(recorder.seen.lock().unwrap().as_slice(), ["t1@1"]);
    assert!(bus.metrics().total_events_failed >= 1);
}

#[tokio::test]
async fn metrics_count_successes_and_failures() {
    let bus = DomainEventBus::new(Some(Arc::new(InMemoryEventStore::new())));
    bus.subscribe(EventKind::TaskCreated, Arc::new(Recorder::default()));
    bus.subscribe(EventKind::TaskCreated, Arc::new(Recorder::default()));
    bus.subscribe(EventKind::TaskCreated, Arc::new(Failing));

    for id in ["t1", "t2", "t3"] {
        bus.publish(task_event(EventKind::TaskCreated, id, 1))
            .await
            .unwrap();
    }

    let m = bus.metrics();
    assert_eq!(m.total_events_published, 3);
    assert!(m.total_events_handled >= 2);
    assert!(m.total_events_failed >= 1);
    assert_eq!(m.active_subscriptions, 3);
}

#[tokio::test]
async fn task_pattern_selects_task_events_only() {
    let bus = IntegrationEventBus::default();
    let keys = Arc::new(Mutex::new(Vec::new()));
    let sink = keys.clone();
    bus.subscribe_to_pattern(
        "task.*",
        handler_fn("task-listener", move |e: IntegrationEvent| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(e.routing_key().to_string());
                Ok(())
            }
        }),
        None,
    )
    .unwrap();

    let source = EventSource::new("tasks", "1.0.0");
    for kind in [
        EventKind::TaskCreated,
        EventKind::TaskUpdated,
        EventKind::ProjectCreated,
    ] {
        let event = IntegrationEvent::new(task_event(kind, "a1", 1), source.clone());
        bus.publish(event, PublishOptions::default()).await;
    }

    assert_eq!(
        keys.lock().unwrap().as_slice(),
        ["task.created", "task.updated"]
    );
}

#[test]
fn wire_round_trip_preserves_identity_and_payload() {
    let event = Event::builder()
        .kind(EventKind::TaskStatusChanged)
        .aggregate_id("t9")
        .aggregate_version(4)
        .workspace_id("w-1".to_string())
        .data(json!({ "from": "todo", "to": "done" }))
        .build();

    let json = event.to_json().unwrap();
    let wire: WireEvent = serde_json::from_str(&json).unwrap();
    assert_eq!(wire.event_type.as_str(), "TaskStatusChanged");

    let restored = Event::from_json(&json).unwrap();
    assert_eq!(restored.event_id(), event.event_id());
    assert_eq!(restored.kind(), event.kind());
    assert_eq!(restored.aggregate_id(), "t9");
    assert_eq!(restored.aggregate_version(), 4);
    assert_eq!(restored.data(), event.data());
    assert_eq!(restored, event);
}

#[tokio::test]
async fn unsubscribed_handler_is_not_invoked() {
    let bus = DomainEventBus::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let subscription = bus.subscribe(
        EventKind::TaskCreated,
        handler_fn("counter", move |_e: Event| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }),
    );
    bus.subscribe_to_all(Arc::new(Recorder::default()));
    assert_eq!(bus.active_subscriptions(), 2);

    bus.publish(task_event(EventKind::TaskCreated, "t1", 1))
        .await
        .unwrap();
    assert!(subscription.unsubscribe());
    assert!(!subscription.unsubscribe());
    assert_eq!(bus.active_subscriptions(), 1);

    bus.publish(task_event(EventKind::TaskCreated, "t1", 2))
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn publish_many_keeps_order_within_each_aggregate() {
    let store = Arc::new(InMemoryEventStore::new());
    let bus = DomainEventBus::new(Some(store.clone()));
    let recorder = Arc::new(Recorder::default());
    bus.subscribe_to_all(recorder.clone());

    let mut events = Vec::new();
    for v in 1..=5 {
        events.push(task_event(EventKind::TaskUpdated, "a", v));
        events.push(task_event(EventKind::TaskUpdated, "b", v));
    }
    let reports = bus.publish_many(events).await.unwrap();
    assert_eq!(reports.len(), 10);

    let seen = recorder.seen.lock().unwrap().clone();
    for aggregate in ["a", "b"] {
        let order: Vec<&String> = seen
            .iter()
            .filter(|s| s.starts_with(&format!("{aggregate}@")))
            .collect();
        let expected: Vec<String> = (1..=5).map(|v| format!("{aggregate}@{v}")).collect();
        assert_eq!(order, expected.iter().collect::<Vec<_>>());
    }
}
