//! 事件处理器（EventHandler）
//!
//! 处理器协议对领域事件与集成事件通用：
//! - `handler_name`：用于失败日志与审计；
//! - `can_handle`：订阅命中后的二次筛选，返回 `false` 时跳过；
//! - `handle`：处理事件，错误与 panic 均在分发时被隔离。
//!
use crate::domain_event::{Event, IntegrationEvent};
use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::join_all;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

#[async_trait]
pub trait EventHandler<E>: Send + Sync
where
    E: Send + Sync + 'static,
{
    fn handler_name(&self) -> &str;

    fn can_handle(&self, _event: &E) -> bool {
        true
    }

    async fn handle(&self, event: &E) -> anyhow::Result<()>;
}

#[async_trait]
impl<E, T> EventHandler<E> for Arc<T>
where
    E: Send + Sync + 'static,
    T: EventHandler<E> + ?Sized,
{
    fn handler_name(&self) -> &str {
        (**self).handler_name()
    }

    fn can_handle(&self, event: &E) -> bool {
        (**self).can_handle(event)
    }

    async fn handle(&self, event: &E) -> anyhow::Result<()> {
        (**self).handle(event).await
    }
}

/// 领域事件处理器
pub type DomainEventHandler = dyn EventHandler<Event>;

/// 集成事件处理器
pub type IntegrationEventHandler = dyn EventHandler<IntegrationEvent>;

/// 闭包适配器：事件以克隆值传入闭包
pub struct FnHandler<F> {
    name: String,
    f: F,
}

/// 以闭包构造处理器
///
/// ```ignore
/// let h = handler_fn("audit", |event: Event| async move {
///     println!("{}", event.event_type());
///     Ok(())
/// });
/// ```
pub fn handler_fn<E, F, Fut>(name: impl Into<String>, f: F) -> Arc<FnHandler<F>>
where
    E: Clone + Send + Sync + 'static,
    F: Fn(E) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        f,
    })
}

#[async_trait]
impl<E, F, Fut> EventHandler<E> for FnHandler<F>
where
    E: Clone + Send + Sync + 'static,
    F: Fn(E) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn handler_name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &E) -> anyhow::Result<()> {
        (self.f)(event.clone()).await
    }
}

/// 单次分发结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// 成功处理的处理器数
    pub handled: usize,
    /// 返回错误或 panic 的处理器数
    pub failed: usize,
    /// `can_handle` 返回 `false` 的处理器数
    pub skipped: usize,
}

impl DispatchReport {
    /// 实际被调用的处理器数
    pub fn invoked(&self) -> usize {
        self.handled + self.failed
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// 分发日志所需的事件身份
pub(crate) trait Dispatchable: Send + Sync + 'static {
    fn dispatch_id(&self) -> Uuid;
    fn dispatch_type(&self) -> &str;
}

impl Dispatchable for Event {
    fn dispatch_id(&self) -> Uuid {
        self.event_id()
    }

    fn dispatch_type(&self) -> &str {
        self.event_type()
    }
}

impl Dispatchable for IntegrationEvent {
    fn dispatch_id(&self) -> Uuid {
        self.event().event_id()
    }

    fn dispatch_type(&self) -> &str {
        self.event_type()
    }
}

/// 并发调用全部处理器并等待结束；单个处理器的错误或 panic 不影响其它处理器
pub(crate) async fn dispatch<E>(
    handlers: &[Arc<dyn EventHandler<E>>],
    event: &E,
) -> DispatchReport
where
    E: Dispatchable,
{
    let runnable: Vec<&Arc<dyn EventHandler<E>>> =
        handlers.iter().filter(|h| h.can_handle(event)).collect();
    let mut report = DispatchReport {
        skipped: handlers.len() - runnable.len(),
        ..DispatchReport::default()
    };

    let outcomes = join_all(runnable.into_iter().map(|h| async move {
        let outcome = AssertUnwindSafe(h.handle(event)).catch_unwind().await;
        (h.handler_name(), outcome)
    }))
    .await;

    for (handler, outcome) in outcomes {
        match outcome {
            Ok(Ok(())) => report.handled += 1,
            Ok(Err(err)) => {
                report.failed += 1;
                warn!(
                    handler,
                    event_id = %event.dispatch_id(),
                    event_type = event.dispatch_type(),
                    error = %err,
                    "Event handler failed"
                );
            }
            Err(panic) => {
                report.failed += 1;
                warn!(
                    handler,
                    event_id = %event.dispatch_id(),
                    event_type = event.dispatch_type(),
                    panic = panic_message(panic.as_ref()),
                    "Event handler panicked"
                );
            }
        }
    }

    debug!(
        event_id = %event.dispatch_id(),
        event_type = event.dispatch_type(),
        handled = report.handled,
        failed = report.failed,
        skipped = report.skipped,
        "Event dispatched"
    );
    report
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}
