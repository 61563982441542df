//! Unified error types for the pulse meter firmware.
//!
//! A single `Error` enum that every subsystem can convert into, keeping the
//! task loops' error handling uniform.  All variants are `Copy` so they can
//! be passed through the session state machine and event sink without
//! allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The light sensor could not be read or returned unusable data.
    Sensor(SensorError),
    /// The messaging session failed (network or protocol).
    Session(SessionError),
    /// Configuration is invalid.
    Config(ConfigError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sensor(e) => write!(f, "sensor: {e}"),
            Self::Session(e) => write!(f, "session: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Sensor errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// The bus transaction failed (NACK, arbitration loss, ...).
    ReadFailed,
    /// The read did not complete within the sensor timeout.
    Timeout,
    /// Reading is outside the physically plausible range.
    OutOfRange,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFailed => write!(f, "bus read failed"),
            Self::Timeout => write!(f, "read timed out"),
            Self::OutOfRange => write!(f, "reading out of range"),
        }
    }
}

impl From<SensorError> for Error {
    fn from(e: SensorError) -> Self {
        Self::Sensor(e)
    }
}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

/// Failures of the byte transport underneath the MQTT session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// Name resolution failed or the broker refused the TCP connection.
    ConnectFailed,
    /// An operation did not complete within its deadline.
    Timeout,
    /// Writing to the socket failed.
    WriteFailed,
    /// Reading from the socket failed.
    ReadFailed,
    /// The peer closed the connection.
    Closed,
    /// No connection is open.
    NotConnected,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed => write!(f, "connect failed"),
            Self::Timeout => write!(f, "timed out"),
            Self::WriteFailed => write!(f, "write failed"),
            Self::ReadFailed => write!(f, "read failed"),
            Self::Closed => write!(f, "connection closed by peer"),
            Self::NotConnected => write!(f, "not connected"),
        }
    }
}

// ---------------------------------------------------------------------------
// Protocol errors
// ---------------------------------------------------------------------------

/// CONNACK return codes other than "accepted" (MQTT 3.1.1 §3.2.2.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectRefusal {
    UnacceptableProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadCredentials,
    NotAuthorized,
    Unknown(u8),
}

impl ConnectRefusal {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::UnacceptableProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadCredentials,
            5 => Self::NotAuthorized,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for ConnectRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnacceptableProtocolVersion => write!(f, "unacceptable protocol version"),
            Self::IdentifierRejected => write!(f, "client identifier rejected"),
            Self::ServerUnavailable => write!(f, "server unavailable"),
            Self::BadCredentials => write!(f, "bad username or password"),
            Self::NotAuthorized => write!(f, "not authorized"),
            Self::Unknown(code) => write!(f, "unknown return code {code}"),
        }
    }
}

/// Violations of the MQTT wire protocol, in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Inbound packet could not be parsed.
    MalformedPacket,
    /// A packet arrived that is not valid in the current exchange.
    UnexpectedPacket(u8),
    /// Outbound message exceeds the protocol or buffer limit.
    MessageTooLong,
    /// Topic is empty, too long, or contains wildcards.
    InvalidTopic,
    /// QoS level outside 0..=2.
    InvalidQos(u8),
    /// The broker refused the CONNECT.
    ConnectionRefused(ConnectRefusal),
    /// The broker rejected a subscription.
    SubscriptionRejected,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedPacket => write!(f, "malformed packet"),
            Self::UnexpectedPacket(kind) => write!(f, "unexpected packet type 0x{kind:02x}"),
            Self::MessageTooLong => write!(f, "message too long"),
            Self::InvalidTopic => write!(f, "invalid topic"),
            Self::InvalidQos(q) => write!(f, "invalid QoS {q}, must be 0-2"),
            Self::ConnectionRefused(r) => write!(f, "connection refused: {r}"),
            Self::SubscriptionRejected => write!(f, "subscription rejected"),
        }
    }
}

// ---------------------------------------------------------------------------
// Session errors
// ---------------------------------------------------------------------------

/// Anything that knocks the messaging session out of `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    Transport(TransportError),
    Protocol(ProtocolError),
    /// No PINGRESP within the ping timeout.
    KeepAliveTimeout,
    /// An acknowledgement (CONNACK, PUBACK, SUBACK, ...) did not arrive in time.
    AckTimeout,
}

impl SessionError {
    /// Protocol faults point at broker-side misconfiguration and are logged
    /// at a higher severity than plain network faults.
    pub fn is_protocol_fault(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Protocol(e) => write!(f, "protocol: {e}"),
            Self::KeepAliveTimeout => write!(f, "keep-alive timeout"),
            Self::AckTimeout => write!(f, "acknowledgement timeout"),
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<ProtocolError> for SessionError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl From<SessionError> for Error {
    fn from(e: SessionError) -> Self {
        Self::Session(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The configuration document could not be parsed.
    Parse,
    /// A field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse => write!(f, "config document malformed"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}
