//! Timing helpers for microphysics steps.
//!
//! `StepTimer` is an RAII scope that logs its duration at debug level when
//! dropped; `StepStats` keeps running totals for the driver.

use std::time::Instant;
use tracing::debug;

/// Times one phase of a step and logs it when dropped.
pub struct StepTimer {
    start: Instant,
    name: &'static str,
}

impl StepTimer {
    /// Start timing a named phase
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    /// Elapsed time in milliseconds
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for StepTimer {
    fn drop(&mut self) {
        debug!("{} took {:.3} ms", self.name, self.elapsed_ms());
    }
}

/// Running step statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepStats {
    steps: u64,
    last_step_ms: f64,
    total_ms: f64,
}

impl StepStats {
    /// Record one completed step
    pub fn record(&mut self, time_ms: f64) {
        self.steps += 1;
        self.last_step_ms = time_ms;
        self.total_ms += time_ms;
    }

    /// Completed steps
    #[must_use]
    pub const fn steps(&self) -> u64 {
        self.steps
    }

    /// Duration of the most recent step
    #[must_use]
    pub const fn last_step_ms(&self) -> f64 {
        self.last_step_ms
    }

    /// Mean step duration, zero before the first step
    #[must_use]
    pub fn mean_step_ms(&self) -> f64 {
        if self.steps == 0 {
            0.0
        } else {
            self.total_ms / self.steps as f64
        }
    }
}
