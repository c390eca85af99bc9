//! eventhub 演示程序
//!
//! 装配一个事件系统，注册投影与集成监听器，发布几条任务事件后打印指标。

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use clap::Parser;
use eventhub_core::domain_event::{Event, EventKind, IntegrationEvent};
use eventhub_core::eventing::{EventHandler, handler_fn};
use eventhub_core::realtime::BroadcastRealtimeChannel;
use eventhub_core::system::Bridge;
use eventhub_core::{EventSystem, EventSystemConfig};
use futures_util::StreamExt;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// eventhub demo - in-process event distribution walkthrough
#[derive(Parser, Debug)]
#[command(name = "eventhub-demo")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to an EventSystemConfig TOML file
    #[arg(short, long, env = "EVENTHUB_CONFIG")]
    config: Option<PathBuf>,

    /// Number of tasks to create
    #[arg(short, long, default_value_t = 3)]
    tasks: u64,
}

/// 按工作区统计未完成任务数的读模型
#[derive(Default)]
struct TaskBoard {
    open: Mutex<BTreeMap<String, i64>>,
}

#[async_trait]
impl EventHandler<Event> for TaskBoard {
    fn handler_name(&self) -> &str {
        "task-board"
    }

    fn can_handle(&self, event: &Event) -> bool {
        event.workspace_id().is_some()
    }

    async fn handle(&self, event: &Event) -> AnyResult<()> {
        let delta = match event.kind() {
            EventKind::TaskCreated => 1,
            EventKind::TaskCompleted | EventKind::TaskDeleted => -1,
            _ => return Ok(()),
        };
        let workspace = event.workspace_id().unwrap_or_default().to_string();
        let mut open = self.open.lock().unwrap_or_else(|e| e.into_inner());
        *open.entry(workspace).or_default() += delta;
        Ok(())
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,eventhub_core=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn task_event(kind: EventKind, task_id: &str, version: u64, workspace: &str) -> Event {
    Event::builder()
        .kind(kind)
        .aggregate_id(task_id)
        .aggregate_version(version)
        .workspace_id(workspace.to_string())
        .user_id("demo-user".to_string())
        .data(json!({ "taskId": task_id }))
        .build()
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    init_tracing();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            tracing::info!("Loading configuration from {:?}", path);
            EventSystemConfig::from_toml_file(path)?
        }
        None => EventSystemConfig::default(),
    };

    let realtime = Arc::new(BroadcastRealtimeChannel::new(config.realtime.clone()));
    let mut feed = realtime.subscribe();
    tokio::spawn(async move {
        while let Some(message) = feed.next().await {
            tracing::info!(
                topic = %message.topic,
                origin = ?message.origin,
                event_type = message.event.event_type.as_str(),
                "Realtime message"
            );
        }
    });

    let system = EventSystem::builder()
        .config(config)
        .realtime_channel(realtime)
        .build()?;
    for bridge in [Bridge::DomainToIntegration, Bridge::IntegrationToRealtime] {
        system.enable_bridge(bridge)?;
    }

    let board = Arc::new(TaskBoard::default());
    system.subscribe_to_all_domain_events(board.clone());
    system.subscribe_to_integration_pattern(
        "task.*",
        handler_fn("task-notifier", |event: IntegrationEvent| async move {
            tracing::info!(
                routing_key = event.routing_key(),
                source = %event.source().service,
                "Integration event received"
            );
            Ok(())
        }),
        None,
    )?;

    let mut events = Vec::new();
    for i in 1..=args.tasks {
        let task_id = format!("task-{i}");
        events.push(task_event(EventKind::TaskCreated, &task_id, 1, "w-demo"));
    }
    events.push(task_event(EventKind::TaskCompleted, "task-1", 2, "w-demo"));
    let reports = system.publish_domain_events(events).await?;
    tracing::info!(published = reports.len(), "Demo events published");

    let open = board.open.lock().unwrap_or_else(|e| e.into_inner()).clone();
    tracing::info!(?open, "Open tasks per workspace");

    system.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&system.metrics())?);
    Ok(())
}
