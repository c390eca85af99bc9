//! 端点熔断器
//!
//! `Closed` 下连续失败达到阈值后转为 `Open`；冷却期结束后放行一次试探（`HalfOpen`），
//! 试探成功回到 `Closed`，失败重新 `Open` 并重新计时。
//! 每次放行得到一个 `Permit`；未结算就被丢弃（如所在 future 被取消）时归还试探名额。
//!
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cool_down: Duration,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cool_down: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cool_down,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// 申请一次尝试；冷却期满时转入 `HalfOpen` 并占用唯一的试探名额
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut inner = self.lock();
        let granted = match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .is_none_or(|at| at.elapsed() >= self.cool_down);
                if cooled {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                }
                cooled
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    false
                } else {
                    inner.trial_in_flight = true;
                    true
                }
            }
        };
        drop(inner);

        if !granted {
            return None;
        }
        Some(Permit {
            breaker: self,
            settled: false,
        })
    }

    /// 记录成功，返回发生变化时的新状态
    pub fn record_success(&self) -> Option<CircuitState> {
        let mut inner = self.lock();
        let previous = inner.state;
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
        (previous != CircuitState::Closed).then_some(CircuitState::Closed)
    }

    /// 记录失败，返回发生变化时的新状态
    pub fn record_failure(&self) -> Option<CircuitState> {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.trial_in_flight = false;

        let should_open = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.failure_threshold,
            CircuitState::Open => false,
        };
        if should_open {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            Some(CircuitState::Open)
        } else {
            None
        }
    }

    /// 未结算的放行被丢弃：归还试探名额，状态保持不变
    fn release(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 一次已放行的尝试，需以 `success` 或 `failure` 结算
#[must_use = "an unsettled permit releases its trial slot on drop"]
#[derive(Debug)]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl Permit<'_> {
    pub fn success(mut self) -> Option<CircuitState> {
        self.settled = true;
        self.breaker.record_success()
    }

    pub fn failure(mut self) -> Option<CircuitState> {
        self.settled = true;
        self.breaker.record_failure()
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release();
        }
    }
}
