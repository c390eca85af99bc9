#![cfg(feature = "http")]

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use eventhub_core::delivery::{
    DeliveryChannel, DeliveryConfig, DeliveryOptions, DeliveryOutcome, EVENT_ID_HEADER,
    EVENT_TYPE_HEADER, SIGNATURE_HEADER, WebhookDeliveryChannel, WebhookEndpoint,
    verify_signature,
};
use eventhub_core::domain_event::{Event, EventKind, EventSource, IntegrationEvent, WireEvent};
use eventhub_core::system::Bridge;
use eventhub_core::{EventSystem, EventSystemConfig};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SECRET: &str = "whsec-test";

#[derive(Clone, Default)]
struct Inbox {
    requests: Arc<Mutex<Vec<(HeaderMap, String)>>>,
    flaky_calls: Arc<AtomicUsize>,
}

impl Inbox {
    fn received(&self) -> Vec<(HeaderMap, String)> {
        self.requests.lock().unwrap().clone()
    }
}

async fn accept(State(inbox): State<Inbox>, headers: HeaderMap, body: String) -> StatusCode {
    inbox.requests.lock().unwrap().push((headers, body));
    StatusCode::NO_CONTENT
}

/// 前两次返回 503，之后成功
async fn flaky(State(inbox): State<Inbox>) -> StatusCode {
    if inbox.flaky_calls.fetch_add(1, Ordering::SeqCst) < 2 {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

async fn gone() -> StatusCode {
    StatusCode::GONE
}

async fn start_receiver() -> (SocketAddr, Inbox) {
    let inbox = Inbox::default();
    let app = Router::new()
        .route("/hook", post(accept))
        .route("/flaky", post(flaky))
        .route("/gone", post(gone))
        .with_state(inbox.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, inbox)
}

fn fast_config() -> DeliveryConfig {
    DeliveryConfig {
        initial_backoff_ms: 10,
        max_backoff_ms: 20,
        attempt_timeout_ms: 2_000,
        ..Default::default()
    }
}

fn endpoint(id: &str, addr: SocketAddr, path: &str) -> WebhookEndpoint {
    WebhookEndpoint::builder()
        .id(id)
        .url(format!("http://{addr}{path}"))
        .subscribed_event_types(vec!["task.*".to_string()])
        .secret(SECRET)
        .build()
}

fn task_created() -> IntegrationEvent {
    let event = Event::builder()
        .kind(EventKind::TaskCreated)
        .aggregate_id("t1")
        .aggregate_version(1)
        .build();
    IntegrationEvent::new(event, EventSource::new("tasks", "1.0.0"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn signed_webhook_reaches_http_receiver() {
    let (addr, inbox) = start_receiver().await;
    let channel = WebhookDeliveryChannel::http(fast_config()).unwrap();
    channel.register_endpoint(endpoint("audit", addr, "/hook")).unwrap();

    let event = task_created();
    let report = channel
        .deliver_event(&event, &DeliveryOptions::default())
        .await;
    assert_eq!(report.delivered(), 1);
    assert_eq!(
        report.endpoint("audit").unwrap().outcome,
        DeliveryOutcome::Delivered { status_code: 204 }
    );

    let received = inbox.received();
    assert_eq!(received.len(), 1);
    let (headers, body) = &received[0];
    let header = |name: &str| headers.get(name).unwrap().to_str().unwrap().to_string();

    assert_eq!(header(EVENT_ID_HEADER), event.event().event_id().to_string());
    assert_eq!(header(EVENT_TYPE_HEADER), "TaskCreated");
    verify_signature(&header(SIGNATURE_HEADER), body, SECRET.as_bytes()).unwrap();
    assert!(verify_signature(&header(SIGNATURE_HEADER), body, b"other-secret").is_err());

    let wire: WireEvent = serde_json::from_str(body).unwrap();
    assert_eq!(wire.event_id, event.event().event_id());
    assert_eq!(wire.routing_key.as_deref(), Some("task.created"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transient_errors_are_retried_and_client_errors_are_not() {
    let (addr, inbox) = start_receiver().await;
    let channel = WebhookDeliveryChannel::http(fast_config()).unwrap();
    channel.register_endpoint(endpoint("flaky", addr, "/flaky")).unwrap();
    channel.register_endpoint(endpoint("gone", addr, "/gone")).unwrap();

    let report = channel
        .deliver_event(&task_created(), &DeliveryOptions::default())
        .await;

    let flaky = report.endpoint("flaky").unwrap();
    assert_eq!(flaky.attempts, 3);
    assert_eq!(flaky.outcome, DeliveryOutcome::Delivered { status_code: 200 });
    assert_eq!(inbox.flaky_calls.load(Ordering::SeqCst), 3);

    let gone = report.endpoint("gone").unwrap();
    assert_eq!(gone.attempts, 1);
    assert!(matches!(gone.outcome, DeliveryOutcome::Failed { .. }));

    let metrics = channel.metrics();
    assert_eq!(metrics.total_delivered, 1);
    assert_eq!(metrics.total_failed, 1);
    assert_eq!(metrics.total_attempts, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bridged_domain_event_is_delivered_over_http() {
    let (addr, inbox) = start_receiver().await;
    let mut config = EventSystemConfig {
        enable_realtime: false,
        metrics_interval_ms: 0,
        delivery: fast_config(),
        ..Default::default()
    };
    config.delivery.endpoints.push(endpoint("audit", addr, "/hook"));
    config.bridges.domain_to_integration = true;

    let system = EventSystem::create(config).unwrap();
    assert!(system.bridge_status().is_enabled(Bridge::DomainToIntegration));

    let event = Event::builder()
        .kind(EventKind::TaskCompleted)
        .aggregate_id("t7")
        .aggregate_version(3)
        .build();
    let event_id = event.event_id();
    system.publish_domain_event(event).await.unwrap();

    // 投递在后台进行，关闭会等它结束
    tokio::time::timeout(Duration::from_secs(5), system.shutdown())
        .await
        .unwrap();

    let received = inbox.received();
    assert_eq!(received.len(), 1);
    let wire: WireEvent = serde_json::from_str(&received[0].1).unwrap();
    assert_eq!(wire.event_id, event_id);
    assert_eq!(wire.source.map(|s| s.service), Some("eventhub".to_string()));

    let metrics = system.metrics();
    assert_eq!(metrics.integration_events.total_events_delivered, 1);
    assert_eq!(metrics.webhook_events.map(|m| m.total_delivered), Some(1));
    assert_eq!(metrics.domain_events.active_subscriptions, 0);
    assert_eq!(metrics.domain_events.total_events_handled, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bridged_publish_returns_before_webhook_retries_finish() {
    let (addr, inbox) = start_receiver().await;
    let mut config = EventSystemConfig {
        enable_realtime: false,
        metrics_interval_ms: 0,
        delivery: DeliveryConfig {
            initial_backoff_ms: 300,
            max_backoff_ms: 300,
            ..fast_config()
        },
        ..Default::default()
    };
    config.delivery.endpoints.push(endpoint("flaky", addr, "/flaky"));
    config.bridges.domain_to_integration = true;
    let system = EventSystem::create(config).unwrap();

    let event = Event::builder()
        .kind(EventKind::TaskCreated)
        .aggregate_id("t8")
        .aggregate_version(1)
        .build();
    let begun = std::time::Instant::now();
    system.publish_domain_event(event).await.unwrap();
    assert!(begun.elapsed() < Duration::from_millis(300));

    tokio::time::timeout(Duration::from_secs(5), system.shutdown())
        .await
        .unwrap();
    assert_eq!(inbox.flaky_calls.load(Ordering::SeqCst), 3);
    assert_eq!(system.metrics().webhook_events.map(|m| m.total_delivered), Some(1));
}
