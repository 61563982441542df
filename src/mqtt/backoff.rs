//! Exponential reconnect backoff.
//!
//! Each failed attempt waits `min_ms × factor^attempt`, capped at
//! `max_ms` (1 s → 2 s → 4 s … 30 s with the defaults).  A successful
//! connect resets the sequence.

use crate::config::MeterConfig;

#[derive(Debug, Clone)]
pub struct Backoff {
    min_ms: u64,
    max_ms: u64,
    factor: u64,
    current_ms: u64,
    attempts: u32,
}

impl Backoff {
    pub fn new(min_ms: u64, max_ms: u64, factor: u64) -> Self {
        let max_ms = max_ms.max(min_ms);
        Self {
            min_ms,
            max_ms,
            factor: factor.max(1),
            current_ms: min_ms,
            attempts: 0,
        }
    }

    pub fn from_config(config: &MeterConfig) -> Self {
        Self::new(
            u64::from(config.backoff_min_ms),
            u64::from(config.backoff_max_ms),
            u64::from(config.backoff_factor),
        )
    }

    /// Delay before the next attempt.  Advances the sequence.
    pub fn next_delay_ms(&mut self) -> u64 {
        let delay = self.current_ms;
        self.current_ms = self.current_ms.saturating_mul(self.factor).min(self.max_ms);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    /// Failed attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.current_ms = self.min_ms;
        self.attempts = 0;
    }
}
