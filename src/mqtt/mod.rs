//! MQTT 3.1.1 client: framing over `mqttrs`, home-assistant topics and
//! the reconnecting session.
//!
//! ```text
//!  OutboundMessage ──▶ packet::encode_* (mqttrs) ──▶ Transport::write_all
//!  Transport::try_read ──▶ codec::PacketDecoder (mqttrs) ──▶ Packet ──▶ session
//! ```

pub mod backoff;
pub mod codec;
pub mod discovery;
pub mod message;
pub mod packet;
pub mod session;
pub mod state;

pub use message::{OutboundMessage, QoS};
pub use session::{MessagingSession, PublishOutcome};
pub use state::ConnectionState;
