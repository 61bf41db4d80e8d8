//! Pause/resume elapsed-time accumulator

use std::time::{Duration, Instant};

/// Accumulates wall-clock time across start/stop intervals
#[derive(Debug, Clone, Default)]
pub struct StopWatch {
    /// Time accumulated by completed intervals
    total: Duration,

    /// Start of the running interval, if any
    started_at: Option<Instant>,
}

impl StopWatch {
    /// Create a stopped watch with no accumulated time
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an interval; no-op if already running
    pub fn start(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
    }

    /// Close the running interval; no-op if stopped
    pub fn stop(&mut self) {
        if let Some(started_at) = self.started_at.take() {
            self.total += started_at.elapsed();
        }
    }

    /// Stop and discard all accumulated time
    pub fn reset(&mut self) {
        self.total = Duration::ZERO;
        self.started_at = None;
    }

    /// Whether an interval is running
    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    /// Accumulated time, including the running interval
    pub fn elapsed(&self) -> Duration {
        match self.started_at {
            Some(started_at) => self.total + started_at.elapsed(),
            None => self.total,
        }
    }
}
