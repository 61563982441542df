//! Outbound application messages.

use crate::error::ProtocolError;

/// Longest topic the meter will publish to.
pub const MAX_TOPIC_LEN: usize = 128;

/// Largest payload the meter will publish.  Discovery documents are the
/// biggest messages and stay well under this.
pub const MAX_PAYLOAD_LEN: usize = 768;

pub type Topic = heapless::String<MAX_TOPIC_LEN>;

/// MQTT delivery guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    pub fn bits(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for QoS {
    type Error = ProtocolError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(ProtocolError::InvalidQos(other)),
        }
    }
}

/// A message queued for the broker.  Topic and payload are validated on
/// construction, so a held message is always encodable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    topic: Topic,
    payload: heapless::Vec<u8, MAX_PAYLOAD_LEN>,
    qos: QoS,
    retain: bool,
}

impl OutboundMessage {
    pub fn new(topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<Self, ProtocolError> {
        validate_topic(topic)?;
        let topic = Topic::try_from(topic).map_err(|_| ProtocolError::InvalidTopic)?;
        let payload =
            heapless::Vec::from_slice(payload).map_err(|_| ProtocolError::MessageTooLong)?;
        Ok(Self {
            topic,
            payload,
            qos,
            retain,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn topic_owned(&self) -> Topic {
        self.topic.clone()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }

    pub fn retain(&self) -> bool {
        self.retain
    }
}

/// Publish topics must be non-empty and free of wildcards and NUL.
pub fn validate_topic(topic: &str) -> Result<(), ProtocolError> {
    if topic.is_empty()
        || topic.len() > MAX_TOPIC_LEN
        || topic.contains(['+', '#', '\0'])
    {
        return Err(ProtocolError::InvalidTopic);
    }
    Ok(())
}
