//! 订阅凭证（Subscription）
//!
//! `subscribe*` 返回的凭证只持有注册表的弱引用：总线释放后 `unsubscribe` 安全地返回 `false`。
//! 丢弃凭证不会取消订阅，订阅随所属总线存续，直到显式调用 `unsubscribe`。
//!
use std::fmt;
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, Ordering};

/// 订阅 ID，在同一总线内单调递增
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl SubscriptionId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// 注册表侧的移除能力
pub(crate) trait Unsubscribe: Send + Sync {
    /// 移除指定订阅，返回是否确实移除
    fn remove(&self, id: SubscriptionId) -> bool;
}

/// 取消订阅凭证
pub struct Subscription {
    id: SubscriptionId,
    registry: Weak<dyn Unsubscribe>,
    active: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(id: SubscriptionId, registry: Weak<dyn Unsubscribe>) -> Self {
        Self {
            id,
            registry,
            active: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// 移除且仅移除本订阅；重复调用为无操作并返回 `false`
    pub fn unsubscribe(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.registry
            .upgrade()
            .map(|registry| registry.remove(self.id))
            .unwrap_or(false)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
