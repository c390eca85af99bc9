//! 重试与指数退避
//!
//! 第 n 次重试前等待 `initial_backoff * multiplier^(n-1)`，上限 `max_backoff`。
//!
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 总尝试次数（含首次），至少为 1
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 不重试
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// 第 `retry` 次重试（从 1 开始）前的等待时间
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let max_ms = self.max_backoff.as_millis() as f64;
        let delay_ms = (self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent))
            .min(max_ms)
            .max(0.0);
        Duration::from_millis(delay_ms as u64)
    }
}

/// 可判定是否值得重试的错误
pub(crate) trait Retryable: Display {
    fn is_retryable(&self) -> bool;
}

impl Retryable for super::DeliveryError {
    fn is_retryable(&self) -> bool {
        super::DeliveryError::is_retryable(self)
    }
}

/// 重试结束时的结果与实际尝试次数
pub(crate) struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

/// 按策略执行 `f`；`f` 接收从 1 开始的尝试序号
pub(crate) async fn with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation: &str,
    mut f: F,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match f(attempt).await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(err) => {
                if !err.is_retryable() || attempt >= max_attempts {
                    return RetryOutcome {
                        result: Err(err),
                        attempts: attempt,
                    };
                }

                let delay = policy.delay_for_retry(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after error"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
