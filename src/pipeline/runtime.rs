//! Execution time measurements.
//!
//! Each node records how long its `execute` took. Latency is tracked the same
//! way as any other rolling statistic: totals for the average, min/max over
//! the whole run, and a bounded window of recent samples for jitter.

use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

/// Number of recent samples kept for windowed statistics.
pub const RECENT_WINDOW_SIZE: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStats {
    /// Successful executions
    pub executions: u64,
    /// Failed executions
    pub failures: u64,
    /// Sum of execution times in microseconds
    pub total_us: u64,
    pub last_us: u64,
    pub min_us: u64,
    pub max_us: u64,
    /// Rolling window of recent execution times
    pub recent_us: VecDeque<u64>,
}

impl Default for RuntimeStats {
    fn default() -> Self {
        Self {
            executions: 0,
            failures: 0,
            total_us: 0,
            last_us: 0,
            min_us: u64::MAX,
            max_us: 0,
            recent_us: VecDeque::with_capacity(RECENT_WINDOW_SIZE),
        }
    }
}

impl RuntimeStats {
    pub fn record(&mut self, elapsed: Duration) {
        let us = elapsed.as_micros().min(u64::MAX as u128) as u64;
        self.executions += 1;
        self.total_us += us;
        self.last_us = us;
        self.min_us = self.min_us.min(us);
        self.max_us = self.max_us.max(us);

        self.recent_us.push_back(us);
        if self.recent_us.len() > RECENT_WINDOW_SIZE {
            self.recent_us.pop_front();
        }
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    /// Average execution time in microseconds
    pub fn avg_us(&self) -> f64 {
        if self.executions == 0 {
            0.0
        } else {
            self.total_us as f64 / self.executions as f64
        }
    }

    /// Average over the recent window only
    pub fn recent_avg_us(&self) -> f64 {
        if self.recent_us.is_empty() {
            return 0.0;
        }
        self.recent_us.iter().sum::<u64>() as f64 / self.recent_us.len() as f64
    }

    /// Spread (max - min) over the recent window
    pub fn jitter_us(&self) -> u64 {
        let min = self.recent_us.iter().min().copied().unwrap_or(0);
        let max = self.recent_us.iter().max().copied().unwrap_or(0);
        max.saturating_sub(min)
    }

    /// Minimum, or 0 if nothing has been recorded.
    pub fn min_or_zero(&self) -> u64 {
        if self.executions == 0 {
            0
        } else {
            self.min_us
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
