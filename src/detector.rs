//! Pulse detection: turns raw light intensity into discrete meter blinks.
//!
//! Two-threshold hysteresis with debounce:
//!
//! ```text
//!  intensity
//!     ▲        ┌──┐            ┌──┐
//!  hi ┤ ─ ─ ─ ─│─ │─ ─ ─ ─ ─ ─ │─ │─ ─      rising through `hi` from LOW
//!     │        │  │            │  │         → one PulseEvent
//!  lo ┤ ─ ─ ─ ─│─ │─ ─ ─ ─ ─ ─ │─ │─ ─
//!     │────────┘  └────────────┘  └────    falling through `lo` → LOW
//!     └──────────────────────────────────▶ t
//!              ▲               ▲
//!            pulse           pulse
//! ```
//!
//! Samples between the thresholds keep the current level.  The level
//! starts unknown; the first decisive sample fixes it without emitting,
//! so a lit LED at boot is not counted.

use core::time::Duration;

use log::{debug, warn};

use crate::app::ports::LightSensor;
use crate::config::MeterConfig;
use crate::error::{ConfigError, SensorError};
use crate::timeout::with_timeout;

/// Light level as seen by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// One detected blink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseEvent {
    /// Milliseconds since boot.
    pub timestamp_ms: u64,
}

// ───────────────────────────────────────────────────────────────
// Pure hysteresis state
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DetectorState {
    threshold_high: u16,
    threshold_low: u16,
    debounce_ms: u64,
    level: Option<Level>,
    last_pulse_ms: Option<u64>,
}

impl DetectorState {
    pub fn new(threshold_low: u16, threshold_high: u16, debounce_ms: u64) -> Result<Self, ConfigError> {
        if threshold_low >= threshold_high {
            return Err(ConfigError::ValidationFailed(
                "threshold_low must be below threshold_high",
            ));
        }
        Ok(Self {
            threshold_high,
            threshold_low,
            debounce_ms,
            level: None,
            last_pulse_ms: None,
        })
    }

    /// Feed one intensity sample.  Returns a pulse on an accepted rising
    /// edge.
    pub fn sample(&mut self, intensity: u16, timestamp_ms: u64) -> Option<PulseEvent> {
        let next = if intensity > self.threshold_high {
            Level::High
        } else if intensity < self.threshold_low {
            Level::Low
        } else {
            return None; // dead band
        };

        let previous = self.level.replace(next);
        if previous != Some(Level::Low) || next != Level::High {
            return None;
        }

        // Rising edge. The level follows the light even when debounced so
        // the same blink cannot be counted on a later sample.
        let settled = self
            .last_pulse_ms
            .is_none_or(|last| timestamp_ms.saturating_sub(last) >= self.debounce_ms);
        if !settled {
            debug!("Detector: edge at {} ms debounced", timestamp_ms);
            return None;
        }

        self.last_pulse_ms = Some(timestamp_ms);
        Some(PulseEvent { timestamp_ms })
    }

    pub fn level(&self) -> Option<Level> {
        self.level
    }

    pub fn last_pulse_ms(&self) -> Option<u64> {
        self.last_pulse_ms
    }
}

// ───────────────────────────────────────────────────────────────
// Sensor-driven detector
// ───────────────────────────────────────────────────────────────

/// Owns the light sensor and feeds its readings through [`DetectorState`].
pub struct PulseDetector<S: LightSensor> {
    sensor: S,
    state: DetectorState,
    read_timeout: Duration,
    restart_after: u8,
    consecutive_failures: u8,
}

impl<S: LightSensor> PulseDetector<S> {
    pub fn new(sensor: S, config: &MeterConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            sensor,
            state: DetectorState::new(
                config.threshold_low,
                config.threshold_high,
                u64::from(config.debounce_ms),
            )?,
            read_timeout: Duration::from_millis(u64::from(config.sensor_timeout_ms)),
            restart_after: config.sensor_restart_after.max(1),
            consecutive_failures: 0,
        })
    }

    /// Start continuous measurement.
    pub fn start(&mut self) -> Result<(), SensorError> {
        self.sensor.start()
    }

    /// Take one sample.  A failed read leaves the detector state untouched
    /// and is returned to the caller; repeated failures restart the sensor.
    pub async fn poll(&mut self, now_ms: u64) -> Result<Option<PulseEvent>, SensorError> {
        let reading = with_timeout(self.read_timeout, self.sensor.read())
            .await
            .unwrap_or(Err(SensorError::Timeout));

        match reading {
            Ok(intensity) => {
                self.consecutive_failures = 0;
                Ok(self.state.sample(intensity, now_ms))
            }
            Err(e) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures >= self.restart_after {
                    warn!(
                        "Sensor: {} consecutive failures ({}), restarting",
                        self.consecutive_failures, e
                    );
                    self.consecutive_failures = 0;
                    if let Err(restart) = self.sensor.start() {
                        warn!("Sensor: restart failed: {}", restart);
                    }
                }
                Err(e)
            }
        }
    }

    pub fn state(&self) -> &DetectorState {
        &self.state
    }
}
