use std::time::{Duration, Instant};

use crate::scenario_engine::state::{LoopConfig, LoopMode};

/// Decides when a farming run has played long enough.
pub struct LoopController {
    config: LoopConfig,
    start_time: Instant,
    rounds: u32,
    failures: u32,
    consecutive_failures: u32,
}

impl LoopController {
    pub fn new(config: LoopConfig) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            rounds: 0,
            failures: 0,
            consecutive_failures: 0,
        }
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn record_success(&mut self) {
        self.rounds += 1;
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.rounds += 1;
        self.failures += 1;
        self.consecutive_failures += 1;
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// `max_rounds` applies in every mode; the mode adds its own limit.
    pub fn should_stop(&self) -> bool {
        if let Some(max) = self.config.max_rounds {
            if self.rounds >= max {
                return true;
            }
        }
        match self.config.mode {
            LoopMode::UntilDone => false,
            LoopMode::Timed => self
                .config
                .max_duration_minutes
                .map_or(false, |m| self.elapsed() >= Duration::from_secs(u64::from(m) * 60)),
            LoopMode::FailureLimit => self
                .config
                .max_failures
                .map_or(false, |m| self.consecutive_failures >= m),
        }
    }
}
