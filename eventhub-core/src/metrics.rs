//! 指标基础构件
//!
//! 计数器由所属组件独占修改，对外只暴露快照；耗时统计采用固定窗口的滚动平均。
//!
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// 滚动平均默认窗口：最近 100 次
pub const DEFAULT_WINDOW: usize = 100;

/// 线程安全的滚动平均（毫秒）
#[derive(Debug)]
pub struct RollingAverage {
    window: usize,
    samples: Mutex<VecDeque<f64>>,
}

impl Default for RollingAverage {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl RollingAverage {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: Mutex::new(VecDeque::with_capacity(window)),
        }
    }

    pub fn record(&self, elapsed: Duration) {
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        if samples.len() == self.window {
            samples.pop_front();
        }
        samples.push_back(elapsed.as_secs_f64() * 1_000.0);
    }

    /// 当前窗口内的平均值，无样本时为 0
    pub fn average_ms(&self) -> f64 {
        let samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        if samples.is_empty() {
            return 0.0;
        }
        samples.iter().sum::<f64>() / samples.len() as f64
    }

    pub fn len(&self) -> usize {
        self.samples.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 单调递增计数器
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn incr(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_average_keeps_last_window() {
        let avg = RollingAverage::new(3);
        assert_eq!(avg.average_ms(), 0.0);

        for ms in [100, 1, 2, 3] {
            avg.record(Duration::from_millis(ms));
        }
        assert_eq!(avg.len(), 3);
        assert!((avg.average_ms() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn counter_accumulates() {
        let c = Counter::default();
        c.incr();
        c.add(4);
        assert_eq!(c.get(), 5);
    }
}
