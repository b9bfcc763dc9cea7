//! Advisory progress and ETA reporting.
//!
//! The tracker owns the only piece of state shared across workers: the global
//! count of keys not yet pulled. It is updated atomically and never blocks a
//! worker. ETAs are computed from the latest sample only, with no smoothing.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

use crate::model::WorkKey;

/// Display unit of an ETA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Seconds => "seconds",
            TimeUnit::Minutes => "minutes",
            TimeUnit::Hours => "hours",
            TimeUnit::Days => "days",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Estimated time remaining, expressed in the coarsest fitting unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Eta {
    pub value: f64,
    pub unit: TimeUnit,
}

impl Eta {
    /// Scales `seconds` up through minutes, hours, and days while the value
    /// exceeds 60, 60, and 24 respectively.
    pub fn from_seconds(seconds: f64) -> Self {
        let mut value = seconds;
        let mut unit = TimeUnit::Seconds;
        if value > 60.0 {
            value /= 60.0;
            unit = TimeUnit::Minutes;
            if value > 60.0 {
                value /= 60.0;
                unit = TimeUnit::Hours;
                if value > 24.0 {
                    value /= 24.0;
                    unit = TimeUnit::Days;
                }
            }
        }
        Self { value, unit }
    }
}

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6} {}", self.value, self.unit)
    }
}

/// Snapshot taken after one successful fetch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    /// Duration of the fetch that produced this sample
    pub elapsed: Duration,
    /// Keys not yet pulled by any worker
    pub keys_remaining_global: u64,
    pub worker_count: usize,
}

impl ProgressSample {
    /// `elapsed * keys_remaining_global / worker_count`, in display units.
    pub fn eta(&self) -> Eta {
        let workers = self.worker_count.max(1) as f64;
        let seconds = self.elapsed.as_secs_f64() * self.keys_remaining_global as f64 / workers;
        Eta::from_seconds(seconds)
    }
}

/// Global remaining-key counter plus ETA reporting.
#[derive(Debug)]
pub struct ProgressTracker {
    remaining: AtomicU64,
    worker_count: usize,
}

impl ProgressTracker {
    pub fn new(total_keys: u64, worker_count: usize) -> Self {
        Self {
            remaining: AtomicU64::new(total_keys),
            worker_count,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::Acquire)
    }

    /// Records that a worker pulled a key, whatever its outcome will be.
    /// Returns the remaining count after the decrement.
    pub fn key_pulled(&self) -> u64 {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(v.saturating_sub(1))
            })
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    /// Builds a sample from the latest successful fetch.
    pub fn sample(&self, elapsed: Duration) -> ProgressSample {
        ProgressSample {
            elapsed,
            keys_remaining_global: self.remaining(),
            worker_count: self.worker_count,
        }
    }

    /// Samples and logs the ETA after a successful fetch of `key`.
    pub fn record_success(&self, partition: usize, key: WorkKey, elapsed: Duration) -> ProgressSample {
        let sample = self.sample(elapsed);
        let eta = sample.eta();
        info!(
            partition,
            key = key.get(),
            remaining = sample.keys_remaining_global,
            eta = eta.value,
            unit = eta.unit.as_str(),
            "ETA: {} remaining",
            eta
        );
        sample
    }
}
