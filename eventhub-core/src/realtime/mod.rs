//! 实时推送通道（realtime）
//!
//! 面向已连接客户端（如 WebSocket 网关）的广播边界：
//! - 消息带主题：事件有工作区时为 `workspace:{id}`，否则为 `{aggregate_type}:{aggregate_id}`；
//! - 默认实现基于 `tokio::sync::broadcast`，`subscribe` 返回 `'static` 消息流；
//! - 无订阅者时的发送计为丢弃，不视为错误；慢消费者落后时跳过缺失的消息。
//!
use crate::domain_event::{Event, IntegrationEvent, WireEvent};
use crate::metrics::Counter;
use futures_core::stream::BoxStream;
use futures_util::{StreamExt, future};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, warn};

/// 消息来自哪条总线
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOrigin {
    Domain,
    Integration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeMessage {
    pub topic: String,
    pub origin: MessageOrigin,
    pub event: WireEvent,
}

impl RealtimeMessage {
    pub fn from_domain(event: &Event) -> Self {
        Self {
            topic: topic_for(event),
            origin: MessageOrigin::Domain,
            event: event.to_wire(),
        }
    }

    pub fn from_integration(event: &IntegrationEvent) -> Self {
        Self {
            topic: topic_for(event.event()),
            origin: MessageOrigin::Integration,
            event: event.to_wire(),
        }
    }
}

/// 事件的推送主题
pub fn topic_for(event: &Event) -> String {
    match event.workspace_id() {
        Some(workspace_id) => format!("workspace:{workspace_id}"),
        None => format!("{}:{}", event.aggregate_type(), event.aggregate_id()),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeMetrics {
    pub total_broadcast: u64,
    /// 发送时没有任何订阅者的消息数
    pub total_dropped: u64,
    pub connected_clients: usize,
}

pub trait RealtimeChannel: Send + Sync {
    /// 广播消息，返回收到消息的订阅者数
    fn broadcast(&self, message: RealtimeMessage) -> usize;

    fn metrics(&self) -> RealtimeMetrics;
}

impl<T> RealtimeChannel for Arc<T>
where
    T: RealtimeChannel + ?Sized,
{
    fn broadcast(&self, message: RealtimeMessage) -> usize {
        (**self).broadcast(message)
    }

    fn metrics(&self) -> RealtimeMetrics {
        (**self).metrics()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// 广播缓冲区容量
    pub capacity: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

pub struct BroadcastRealtimeChannel {
    tx: broadcast::Sender<RealtimeMessage>,
    broadcast: Counter,
    dropped: Counter,
}

impl Default for BroadcastRealtimeChannel {
    fn default() -> Self {
        Self::new(RealtimeConfig::default())
    }
}

impl BroadcastRealtimeChannel {
    pub fn new(config: RealtimeConfig) -> Self {
        let (tx, _rx) = broadcast::channel(config.capacity.max(1));
        Self {
            tx,
            broadcast: Counter::default(),
            dropped: Counter::default(),
        }
    }

    /// 订阅全部消息
    pub fn subscribe(&self) -> BoxStream<'static, RealtimeMessage> {
        BroadcastStream::new(self.tx.subscribe())
            .filter_map(|item| future::ready(skip_lagged(item)))
            .boxed()
    }

    /// 只订阅某个主题
    pub fn subscribe_topic(&self, topic: impl Into<String>) -> BoxStream<'static, RealtimeMessage> {
        let topic = topic.into();
        self.subscribe()
            .filter(move |m| future::ready(m.topic == topic))
            .boxed()
    }
}

fn skip_lagged(
    item: Result<RealtimeMessage, BroadcastStreamRecvError>,
) -> Option<RealtimeMessage> {
    match item {
        Ok(message) => Some(message),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(skipped, "Realtime subscriber lagged, messages skipped");
            None
        }
    }
}

impl RealtimeChannel for BroadcastRealtimeChannel {
    fn broadcast(&self, message: RealtimeMessage) -> usize {
        self.broadcast.incr();
        let topic = message.topic.clone();
        match self.tx.send(message) {
            Ok(receivers) => {
                debug!(topic = %topic, receivers, "Realtime message broadcast");
                receivers
            }
            Err(_) => {
                self.dropped.incr();
                0
            }
        }
    }

    fn metrics(&self) -> RealtimeMetrics {
        RealtimeMetrics {
            total_broadcast: self.broadcast.get(),
            total_dropped: self.dropped.get(),
            connected_clients: self.tx.receiver_count(),
        }
    }
}
