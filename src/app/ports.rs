//! Port traits: the hexagonal boundary between the meter core and the
//! outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ PulseDetector / MessagingSession / Scheduler
//! ```
//!
//! Driven adapters (light sensor, network transport, status LED, clock,
//! event sinks) implement these traits.  The core consumes them via
//! generics, so it never touches hardware or sockets directly and every
//! component can be exercised on the host with mocks.
//!
//! The two `async` ports are the only suspension points of the core:
//! sensor reads and network I/O.

use core::time::Duration;

use crate::error::{SensorError, TransportError};

use super::events::MeterEvent;

// ───────────────────────────────────────────────────────────────
// Light sensor port (driven adapter: hardware → domain)
// ───────────────────────────────────────────────────────────────

/// Ambient-light sensor pointed at the meter's indicator LED.
#[allow(async_fn_in_trait)]
pub trait LightSensor {
    /// Put the sensor into continuous measurement mode.  Called once at
    /// startup and again after repeated read failures.
    fn start(&mut self) -> Result<(), SensorError>;

    /// Read the current raw intensity.
    async fn read(&mut self) -> Result<u16, SensorError>;
}

// ───────────────────────────────────────────────────────────────
// Network transport port (driven adapter: domain ↔ broker socket)
// ───────────────────────────────────────────────────────────────

/// Byte-oriented, in-order connection to the broker.
///
/// The session writes exactly one MQTT packet per [`write_all`] call.
///
/// [`write_all`]: Transport::write_all
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Open a connection to `host:port`, giving up after `timeout`.
    async fn connect(&mut self, host: &str, port: u16, timeout: Duration)
        -> Result<(), TransportError>;

    /// Write the whole buffer.
    async fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Non-blocking read.  Returns `Ok(0)` when no data is pending;
    /// a closed peer is reported as [`TransportError::Closed`].
    fn try_read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Tear the connection down.  Idempotent.
    fn close(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Status indicator port (driven adapter: domain → LED)
// ───────────────────────────────────────────────────────────────

/// Single on/off status light.
pub trait StatusIndicator {
    fn set(&mut self, on: bool);
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic milliseconds since boot.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging)
// ───────────────────────────────────────────────────────────────

/// The core emits structured [`MeterEvent`]s through this port.  Adapters
/// decide where they go (serial log, remote syslog, test recorder).
///
/// Implementations must not block.
pub trait EventSink {
    fn emit(&mut self, event: &MeterEvent);
}
