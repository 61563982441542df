//! Energy accumulation.
//!
//! Counts pulses and derives an instantaneous power estimate from the
//! pulses that fall inside a trailing window:
//!
//! ```text
//!   power_w = pulses_in_window × wh_per_pulse × 3600 / window_secs
//! ```
//!
//! Window pulses are counted per second in a ring that spans the longest
//! allowed window, so the estimate holds at any pulse rate:
//!
//! ```text
//!   buckets[sec % MAX_POWER_WINDOW_SECS]
//!   ┌────┬────┬────┬─────┬────┐
//!   │ n₀ │ n₁ │ n₂ │ ... │ nₖ │   window = newest `window_secs` seconds
//!   └────┴────┴────┴─────┴────┘
//! ```
//!
//! The estimate decays to zero once no pulse is younger than the window.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;

use crate::config::MeterConfig;
use crate::detector::PulseEvent;

/// Longest power window the ring can cover.
pub const MAX_POWER_WINDOW_SECS: u32 = 900;

const RING: usize = MAX_POWER_WINDOW_SECS as usize;

/// Immutable copy of accumulator state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergySnapshot {
    pub pulse_count: u64,
    pub energy_wh: f64,
    pub power_w: f32,
    pub timestamp_ms: u64,
}

pub struct EnergyAccumulator {
    count: u64,
    wh_per_pulse: f32,
    window_secs: u32,
    /// Pulses per second, indexed by `second % RING`.
    buckets: [u16; RING],
    /// Newest second written to the ring.
    head_sec: u64,
}

impl EnergyAccumulator {
    /// `window_secs` is clamped to `1..=MAX_POWER_WINDOW_SECS`.
    pub fn new(wh_per_pulse: f32, window_secs: u32) -> Self {
        Self {
            count: 0,
            wh_per_pulse,
            window_secs: window_secs.clamp(1, MAX_POWER_WINDOW_SECS),
            buckets: [0; RING],
            head_sec: 0,
        }
    }

    pub fn from_config(config: &MeterConfig) -> Self {
        Self::new(config.wh_per_pulse, config.power_window_secs)
    }

    /// Count one pulse.
    pub fn record(&mut self, pulse: PulseEvent) {
        self.count = self.count.saturating_add(1);

        let sec = pulse.timestamp_ms / 1000;
        if sec > self.head_sec {
            // Seconds skipped since the last pulse start empty.
            let stale = (sec - self.head_sec).min(RING as u64);
            for s in (sec + 1 - stale)..=sec {
                self.buckets[slot(s)] = 0;
            }
            self.head_sec = sec;
        } else if self.head_sec - sec >= RING as u64 {
            return; // older than the ring
        }
        let bucket = &mut self.buckets[slot(sec)];
        *bucket = bucket.saturating_add(1);
    }

    /// Pulses counted in the `window_secs` seconds ending at `now_ms`.
    fn pulses_in_window(&self, now_ms: u64) -> u64 {
        let now_sec = now_ms / 1000;
        let first = (now_sec + 1).saturating_sub(u64::from(self.window_secs));
        (first..=now_sec.min(self.head_sec))
            .filter(|&s| self.head_sec - s < RING as u64)
            .map(|s| u64::from(self.buckets[slot(s)]))
            .sum()
    }

    /// Pure read of the current totals.
    pub fn snapshot(&self, now_ms: u64) -> EnergySnapshot {
        let in_window = self.pulses_in_window(now_ms);

        EnergySnapshot {
            pulse_count: self.count,
            energy_wh: self.count as f64 * f64::from(self.wh_per_pulse),
            power_w: in_window as f32 * self.wh_per_pulse * 3600.0 / self.window_secs as f32,
            timestamp_ms: now_ms,
        }
    }

    pub fn pulse_count(&self) -> u64 {
        self.count
    }
}

fn slot(sec: u64) -> usize {
    (sec % RING as u64) as usize
}

// ───────────────────────────────────────────────────────────────
// Shared handle
// ───────────────────────────────────────────────────────────────

/// Accumulator shared between the sampling and publish tasks.  Both run
/// on one executor, so a no-op raw mutex is enough to keep `record` and
/// `snapshot` from interleaving.
pub struct SharedAccumulator(Mutex<NoopRawMutex, RefCell<EnergyAccumulator>>);

impl SharedAccumulator {
    pub fn new(acc: EnergyAccumulator) -> Self {
        Self(Mutex::new(RefCell::new(acc)))
    }

    /// Record a pulse and return the new total.
    pub fn record(&self, pulse: PulseEvent) -> u64 {
        self.0.lock(|acc| {
            let mut acc = acc.borrow_mut();
            acc.record(pulse);
            acc.pulse_count()
        })
    }

    pub fn snapshot(&self, now_ms: u64) -> EnergySnapshot {
        self.0.lock(|acc| acc.borrow().snapshot(now_ms))
    }
}
