//! 事件分发（eventing）
//!
//! - `DomainEventBus`：进程内领域事件发布/订阅，先写日志后分发；
//! - `IntegrationEventBus`：跨边界集成事件，按类型或路由键通配模式路由，并交给投递通道；
//! - `EventHandler`：两条总线共用的处理器协议；
//! - `Subscription`：订阅时返回的取消凭证。
//!
mod domain_bus;
mod filter;
mod handler;
mod integration_bus;
mod pattern;
mod subscription;

pub use domain_bus::{BusMetrics, DomainBusConfig, DomainEventBus, PublishManyMode};
pub use filter::{EventFilter, EventPredicate};
pub use handler::{
    DispatchReport, DomainEventHandler, EventHandler, FnHandler, IntegrationEventHandler,
    handler_fn,
};
pub use integration_bus::{
    IntegrationBusMetrics, IntegrationEventBus, IntegrationPublishReport, PublishOptions,
};
pub use pattern::GlobPattern;
pub use subscription::{Subscription, SubscriptionId};
