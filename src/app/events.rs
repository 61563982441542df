//! Outbound meter events.
//!
//! The sampling, publish and connection tasks emit these through the
//! [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them, usually turn them into log lines.

use crate::error::{SensorError, SessionError};
use crate::mqtt::ConnectionState;

use super::commands::RemoteCommand;

/// Structured events emitted by the meter core.
#[derive(Debug, Clone, PartialEq)]
pub enum MeterEvent {
    /// The runtime finished wiring its tasks.
    Started,

    /// A meter blink was counted.
    Pulse { count: u64, timestamp_ms: u64 },

    /// A sensor sample was discarded.
    SampleDropped(SensorError),

    /// The messaging session moved between states.
    ConnectionChanged {
        from: ConnectionState,
        to: ConnectionState,
    },

    /// A message reached the broker.  `replayed` marks a message that was
    /// held in the outbox slot across a disconnect.
    Published {
        topic: heapless::String<128>,
        replayed: bool,
    },

    /// A message was parked in the outbox slot because the session is not
    /// connected.  `superseded` is set when an older message was dropped.
    Buffered { superseded: bool },

    /// The session lost its connection or failed to establish one.
    SessionFault(SessionError),

    /// A command arrived on the device command topic.
    Command(RemoteCommand),
}
