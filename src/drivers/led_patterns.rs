//! LED pattern engine for the single status light.
//!
//! The status task calls `tick()` every status period and writes the
//! returned level to the [`StatusIndicator`](crate::app::ports::StatusIndicator).
//!
//! ## Layers (highest first)
//!
//! 1. **Activity**: a short inversion of the current output on every
//!    counted pulse, visible on top of any connection pattern
//! 2. **Connection**: the session state pattern
//!
//! ## Pattern types
//!
//! | Pattern    | Meaning         | Rate  |
//! |------------|-----------------|-------|
//! | Solid      | Connected       | -     |
//! | SlowBlink  | Backoff         | 1 Hz  |
//! | FastBlink  | Connecting      | 4 Hz  |
//! | Off        | Disconnected    | -     |

/// How long a pulse flash lasts.
pub const ACTIVITY_FLASH_MS: u32 = 80;

/// Pattern identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternId {
    Solid,
    SlowBlink,
    FastBlink,
    Off,
}

/// LED pattern engine. Stack-allocated, no heap.
#[derive(Debug)]
pub struct LedPatternEngine {
    phase_ms: u32,
    connection: PatternId,
    activity_remaining_ms: u32,
}

impl Default for LedPatternEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LedPatternEngine {
    pub fn new() -> Self {
        Self {
            phase_ms: 0,
            connection: PatternId::Off,
            activity_remaining_ms: 0,
        }
    }

    /// Select the connection-layer pattern.  Changing pattern restarts its
    /// phase so a blink always begins with the light on.
    pub fn set_connection_pattern(&mut self, pattern: PatternId) {
        if pattern != self.connection {
            self.connection = pattern;
            self.phase_ms = 0;
        }
    }

    pub fn connection_pattern(&self) -> PatternId {
        self.connection
    }

    /// Start (or restart) a pulse flash.
    pub fn trigger_activity(&mut self) {
        self.activity_remaining_ms = ACTIVITY_FLASH_MS;
    }

    /// Return the light level for the current phase, then advance the phase
    /// by `delta_ms` (the time until the next call).
    pub fn tick(&mut self, delta_ms: u32) -> bool {
        let base = self.generate();
        let flashing = self.activity_remaining_ms > 0;

        self.phase_ms = self.phase_ms.wrapping_add(delta_ms);
        self.activity_remaining_ms = self.activity_remaining_ms.saturating_sub(delta_ms);

        base != flashing
    }

    fn generate(&self) -> bool {
        match self.connection {
            PatternId::Solid => true,
            PatternId::Off => false,
            PatternId::SlowBlink => (self.phase_ms % 1000) < 500,
            PatternId::FastBlink => (self.phase_ms % 250) < 125,
        }
    }
}
