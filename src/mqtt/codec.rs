//! Streaming decoder for broker → client packets.
//!
//! A single `Transport::try_read` may return part of a fixed header, part
//! of a body, or several packets back to back, so [`PacketDecoder::feed`]
//! reports how many bytes it consumed and the caller feeds the remainder
//! again.  Frames are delimited here from the fixed header; the body of a
//! complete frame is parsed by [`mqttrs::decode_slice`].
//!
//! ```text
//!   Gather ──frame complete──▶ mqttrs::decode_slice ──▶ Packet
//!     │
//!     └─frame > MAX_INBOUND_FRAME──▶ Packet::Dropped, Discard { remaining }
//!                                        │
//!                                        └─ remaining == 0 ──▶ Gather
//! ```

use mqttrs::{ConnectReturnCode, QosPid, SubscribeReturnCodes};

use crate::error::{ConnectRefusal, ProtocolError};

use super::message::{MAX_TOPIC_LEN, QoS, Topic};

/// Largest inbound frame (fixed header plus body) kept in memory.
/// Inbound traffic is limited to acks, the hub birth message and short
/// commands.
pub const MAX_INBOUND_FRAME: usize = 512;

/// Largest inbound PUBLISH payload kept.
pub const MAX_INBOUND_PAYLOAD: usize = 256;

/// Fixed-header type nibbles.
pub const CONNACK: u8 = 0x20;
pub const PUBLISH: u8 = 0x30;
pub const PUBACK: u8 = 0x40;
pub const PUBREC: u8 = 0x50;
pub const PUBCOMP: u8 = 0x70;
pub const SUBACK: u8 = 0x90;
pub const PINGRESP: u8 = 0xD0;

/// A PUBLISH received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPublish {
    pub topic: Topic,
    pub payload: heapless::Vec<u8, MAX_INBOUND_PAYLOAD>,
    pub qos: QoS,
    pub retain: bool,
    pub packet_id: Option<u16>,
}

/// Packets the client understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    ConnAck { session_present: bool, return_code: u8 },
    Publish(InboundPublish),
    PubAck(u16),
    PubRec(u16),
    PubComp(u16),
    SubAck { packet_id: u16, rejected: bool },
    PingResp,
    /// A well-formed packet too large to keep.  Its bytes were skipped;
    /// the stream stays usable.
    Dropped { kind: u8, len: usize },
}

impl Packet {
    /// Fixed-header type bits of the packet.
    pub fn header_type(&self) -> u8 {
        match self {
            Self::ConnAck { .. } => CONNACK,
            Self::Publish(_) => PUBLISH,
            Self::PubAck(_) => PUBACK,
            Self::PubRec(_) => PUBREC,
            Self::PubComp(_) => PUBCOMP,
            Self::SubAck { .. } => SUBACK,
            Self::PingResp => PINGRESP,
            Self::Dropped { kind, .. } => *kind,
        }
    }
}

/// Decoder state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    /// Collecting a frame into the buffer.
    Gather,
    /// Skipping the body of an oversized frame.
    Discard { remaining: usize },
}

/// Lengths read from a complete fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Frame {
    header_len: usize,
    body_len: usize,
}

impl Frame {
    fn total(self) -> usize {
        self.header_len + self.body_len
    }
}

/// Parse the fixed header at the start of `buf`.  `Ok(None)` while the
/// remaining-length field is still incomplete.
fn frame(buf: &[u8]) -> Result<Option<Frame>, ProtocolError> {
    let mut body_len = 0usize;
    for (i, byte) in buf.iter().skip(1).take(4).enumerate() {
        body_len |= usize::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some(Frame {
                header_len: i + 2,
                body_len,
            }));
        }
    }
    if buf.len() >= 5 {
        return Err(ProtocolError::MalformedPacket);
    }
    Ok(None)
}

/// Streaming packet decoder.
pub struct PacketDecoder {
    state: DecoderState,
    buf: heapless::Vec<u8, MAX_INBOUND_FRAME>,
}

impl Default for PacketDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::Gather,
            buf: heapless::Vec::new(),
        }
    }

    /// Feed bytes into the decoder.
    ///
    /// Returns the number of bytes consumed and, once a packet is complete,
    /// the decoded packet.  An oversized frame is reported as
    /// [`Packet::Dropped`] as soon as its header is read, and its body is
    /// skipped by later calls.  After an error the decoder is reset and the
    /// stream should be considered unusable.
    pub fn feed(&mut self, data: &[u8]) -> (usize, Option<Result<Packet, ProtocolError>>) {
        let mut offset = 0;

        while offset < data.len() {
            if let DecoderState::Discard { remaining } = self.state {
                let skip = remaining.min(data.len() - offset);
                offset += skip;
                self.state = match remaining - skip {
                    0 => DecoderState::Gather,
                    remaining => DecoderState::Discard { remaining },
                };
                continue;
            }

            // One byte at a time until the header is known, then the rest
            // of the frame in one go.
            let wanted = match frame(&self.buf) {
                Ok(Some(f)) => f.total() - self.buf.len(),
                _ => 1,
            };
            let take = wanted.min(data.len() - offset);
            // Frames that would overflow are diverted below, before their
            // body is gathered.
            let _ = self.buf.extend_from_slice(&data[offset..offset + take]);
            offset += take;

            match frame(&self.buf) {
                Err(e) => {
                    self.reset();
                    return (offset, Some(Err(e)));
                }
                Ok(None) => {}
                Ok(Some(f)) if f.total() > MAX_INBOUND_FRAME => {
                    let kind = self.buf[0] & 0xF0;
                    self.buf.clear();
                    self.state = DecoderState::Discard {
                        remaining: f.body_len,
                    };
                    return (
                        offset,
                        Some(Ok(Packet::Dropped {
                            kind,
                            len: f.body_len,
                        })),
                    );
                }
                Ok(Some(f)) if self.buf.len() == f.total() => {
                    let packet = parse(&self.buf, f);
                    self.buf.clear();
                    return (offset, Some(packet));
                }
                Ok(Some(_)) => {}
            }
        }

        (offset, None) // No complete packet yet.
    }

    /// Reset decoder state (e.g. after a transport reconnect).
    pub fn reset(&mut self) {
        self.state = DecoderState::Gather;
        self.buf.clear();
    }
}

// ── Frame parsing ────────────────────────────────────────────

fn refusal_code(code: ConnectReturnCode) -> u8 {
    match code {
        ConnectReturnCode::Accepted => 0,
        ConnectReturnCode::RefusedProtocolVersion => 1,
        ConnectReturnCode::RefusedIdentifierRejected => 2,
        ConnectReturnCode::ServerUnavailable => 3,
        ConnectReturnCode::BadUsernamePassword => 4,
        ConnectReturnCode::NotAuthorized => 5,
    }
}

/// Refusal carried by a non-zero CONNACK return code.
pub fn connect_refusal(return_code: u8) -> ProtocolError {
    ProtocolError::ConnectionRefused(ConnectRefusal::from_code(return_code))
}

/// Only broker → client packet types with a plausible body length reach
/// the parser.
fn parse(frame: &[u8], f: Frame) -> Result<Packet, ProtocolError> {
    let kind = frame.first().copied().unwrap_or_default() & 0xF0;
    let sized = match kind {
        CONNACK | PUBACK | PUBREC | PUBCOMP => f.body_len == 2,
        SUBACK => f.body_len >= 3,
        PUBLISH => f.body_len >= 2,
        PINGRESP => f.body_len == 0,
        other => return Err(ProtocolError::UnexpectedPacket(other)),
    };
    if !sized {
        return Err(ProtocolError::MalformedPacket);
    }

    let packet = match mqttrs::decode_slice(frame) {
        Ok(Some(packet)) => packet,
        Ok(None) | Err(_) => return Err(ProtocolError::MalformedPacket),
    };

    match packet {
        mqttrs::Packet::Connack(ack) => Ok(Packet::ConnAck {
            session_present: ack.session_present,
            return_code: refusal_code(ack.code),
        }),
        mqttrs::Packet::Publish(publish) => Ok(parse_publish(&publish, frame.len())),
        mqttrs::Packet::Puback(pid) => Ok(Packet::PubAck(pid.get())),
        mqttrs::Packet::Pubrec(pid) => Ok(Packet::PubRec(pid.get())),
        mqttrs::Packet::Pubcomp(pid) => Ok(Packet::PubComp(pid.get())),
        mqttrs::Packet::Suback(ack) => Ok(Packet::SubAck {
            packet_id: ack.pid.get(),
            rejected: ack
                .return_codes
                .iter()
                .any(|c| matches!(c, SubscribeReturnCodes::Failure)),
        }),
        mqttrs::Packet::Pingresp => Ok(Packet::PingResp),
        _ => Err(ProtocolError::MalformedPacket),
    }
}

/// Publishes whose topic or payload exceed the local limits are dropped
/// rather than failing the stream.
fn parse_publish(publish: &mqttrs::Publish<'_>, frame_len: usize) -> Packet {
    let (qos, packet_id) = match publish.qospid {
        QosPid::AtMostOnce => (QoS::AtMostOnce, None),
        QosPid::AtLeastOnce(pid) => (QoS::AtLeastOnce, Some(pid.get())),
        QosPid::ExactlyOnce(pid) => (QoS::ExactlyOnce, Some(pid.get())),
    };
    let dropped = Packet::Dropped {
        kind: PUBLISH,
        len: frame_len,
    };
    if publish.topic_name.len() > MAX_TOPIC_LEN {
        return dropped;
    }
    let (Ok(topic), Ok(payload)) = (
        Topic::try_from(publish.topic_name),
        heapless::Vec::from_slice(publish.payload),
    ) else {
        return dropped;
    };
    Packet::Publish(InboundPublish {
        topic,
        payload,
        qos,
        retain: publish.retain,
        packet_id,
    })
}
