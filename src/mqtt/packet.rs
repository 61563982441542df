//! MQTT 3.1.1 packet encoders (client → broker).
//!
//! Packets are built as [`mqttrs::Packet`] values and serialised with
//! [`mqttrs::encode_slice`] into a bounded [`PacketBuf`], which is handed
//! to the transport in a single write.

use mqttrs::{
    Connect, LastWill, Packet, Pid, Protocol, Publish, QosPid, Subscribe, SubscribeTopic,
};

use crate::error::ProtocolError;

use super::message::{OutboundMessage, QoS, validate_topic};

/// Largest packet the client ever emits.
pub const MAX_PACKET_LEN: usize = 1024;

pub type PacketBuf = heapless::Vec<u8, MAX_PACKET_LEN>;

/// Last-will registered with the broker at connect time.
#[derive(Debug, Clone, Copy)]
pub struct Will<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub qos: QoS,
    pub retain: bool,
}

/// Everything that goes into a CONNECT packet.
#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions<'a> {
    pub client_id: &'a str,
    pub keepalive_secs: u16,
    pub clean_session: bool,
    pub username: Option<&'a str>,
    pub password: Option<&'a str>,
    pub will: Option<Will<'a>>,
}

impl From<QoS> for mqttrs::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => Self::AtMostOnce,
            QoS::AtLeastOnce => Self::AtLeastOnce,
            QoS::ExactlyOnce => Self::ExactlyOnce,
        }
    }
}

/// Wire packet identifier; zero is reserved.
pub fn pid(packet_id: u16) -> Result<Pid, ProtocolError> {
    Pid::try_from(packet_id).map_err(|_| ProtocolError::MalformedPacket)
}

fn encode(packet: &Packet<'_>) -> Result<PacketBuf, ProtocolError> {
    let mut buf = [0u8; MAX_PACKET_LEN];
    let len = mqttrs::encode_slice(packet, &mut buf).map_err(|_| ProtocolError::MessageTooLong)?;
    PacketBuf::from_slice(&buf[..len]).map_err(|_| ProtocolError::MessageTooLong)
}

// ── Encoders ─────────────────────────────────────────────────

pub fn encode_connect(opts: &ConnectOptions<'_>) -> Result<PacketBuf, ProtocolError> {
    // 3.1.1 forbids a password without a user name.
    if opts.password.is_some() && opts.username.is_none() {
        return Err(ProtocolError::MalformedPacket);
    }
    let last_will = match &opts.will {
        Some(will) => {
            validate_topic(will.topic)?;
            Some(LastWill {
                topic: will.topic,
                message: will.payload,
                qos: will.qos.into(),
                retain: will.retain,
            })
        }
        None => None,
    };

    encode(&Packet::Connect(Connect {
        protocol: Protocol::MQTT311,
        keep_alive: opts.keepalive_secs,
        client_id: opts.client_id,
        clean_session: opts.clean_session,
        last_will,
        username: opts.username,
        password: opts.password.map(str::as_bytes),
    }))
}

/// `packet_id` is required for QoS 1 and 2 and ignored for QoS 0.
pub fn encode_publish(msg: &OutboundMessage, packet_id: u16) -> Result<PacketBuf, ProtocolError> {
    let qospid = match msg.qos() {
        QoS::AtMostOnce => QosPid::AtMostOnce,
        QoS::AtLeastOnce => QosPid::AtLeastOnce(pid(packet_id)?),
        QoS::ExactlyOnce => QosPid::ExactlyOnce(pid(packet_id)?),
    };
    encode(&Packet::Publish(Publish {
        dup: false,
        qospid,
        retain: msg.retain(),
        topic_name: msg.topic(),
        payload: msg.payload(),
    }))
}

pub fn encode_subscribe(packet_id: u16, topic: &str, qos: QoS) -> Result<PacketBuf, ProtocolError> {
    if topic.is_empty() {
        return Err(ProtocolError::InvalidTopic);
    }
    encode(&Packet::Subscribe(Subscribe {
        pid: pid(packet_id)?,
        topics: vec![SubscribeTopic {
            topic_path: topic.to_owned(),
            qos: qos.into(),
        }],
    }))
}

pub fn encode_puback(packet_id: u16) -> Result<PacketBuf, ProtocolError> {
    encode(&Packet::Puback(pid(packet_id)?))
}

pub fn encode_pubrel(packet_id: u16) -> Result<PacketBuf, ProtocolError> {
    encode(&Packet::Pubrel(pid(packet_id)?))
}

pub fn encode_pingreq() -> Result<PacketBuf, ProtocolError> {
    encode(&Packet::Pingreq)
}

pub fn encode_disconnect() -> Result<PacketBuf, ProtocolError> {
    encode(&Packet::Disconnect)
}
