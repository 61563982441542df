//! Home-assistant topic layout and payload documents.
//!
//! ```text
//!  <prefix>/sensor/<id>/state          JSON readings          (device → hub)
//!  <prefix>/sensor/<id>/availability   "online" / "offline"   (retained, will)
//!  <prefix>/sensor/<id>/cmd            "publish"              (hub → device)
//!  <prefix>/sensor/<id>/config         energy entity          (retained)
//!  <prefix>/sensor/<id>_power/config   power entity           (retained)
//!  <prefix>/status                     hub birth "online"     (hub → device)
//! ```

use serde::Serialize;

use crate::config::MeterConfig;
use crate::energy::EnergySnapshot;
use crate::error::ProtocolError;

use super::message::{OutboundMessage, QoS, Topic};

pub const AVAILABILITY_ONLINE: &[u8] = b"online";
pub const AVAILABILITY_OFFLINE: &[u8] = b"offline";
pub const HUB_ONLINE: &[u8] = b"online";

/// Every topic the device uses, resolved once from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub state: Topic,
    pub availability: Topic,
    pub command: Topic,
    pub energy_config: Topic,
    pub power_config: Topic,
    pub hub_status: Topic,
}

impl Topics {
    pub fn new(config: &MeterConfig) -> Self {
        let prefix = config.discovery_prefix.as_str();
        let id = config.client_id.as_str();
        Self {
            state: join(&[prefix, "/sensor/", id, "/state"]),
            availability: join(&[prefix, "/sensor/", id, "/availability"]),
            command: join(&[prefix, "/sensor/", id, "/cmd"]),
            energy_config: join(&[prefix, "/sensor/", id, "/config"]),
            power_config: join(&[prefix, "/sensor/", id, "_power/config"]),
            hub_status: join(&[prefix, "/status"]),
        }
    }
}

/// Concatenate topic segments.  Prefix and id lengths are bounded by the
/// configuration types, so the result always fits.
fn join(parts: &[&str]) -> Topic {
    let mut out = Topic::new();
    for part in parts {
        if out.push_str(part).is_err() {
            break;
        }
    }
    out
}

// ── Discovery documents ──────────────────────────────────────

#[derive(Serialize)]
struct DeviceDoc<'a> {
    identifiers: [&'a str; 1],
    name: &'a str,
}

#[derive(Serialize)]
struct EntityDoc<'a> {
    name: &'a str,
    device_class: &'a str,
    state_class: &'a str,
    state_topic: &'a str,
    value_template: &'a str,
    unit_of_measurement: &'a str,
    unique_id: &'a str,
    availability_topic: &'a str,
    device: DeviceDoc<'a>,
}

/// Static parts of one sensor entity.
struct Entity {
    name: &'static str,
    suffix: &'static str,
    device_class: &'static str,
    state_class: &'static str,
    field: &'static str,
    unit: &'static str,
}

const ENERGY: Entity = Entity {
    name: "Energy",
    suffix: "_energy",
    device_class: "energy",
    state_class: "total_increasing",
    field: "{{ value_json.energy_wh }}",
    unit: "Wh",
};

const POWER: Entity = Entity {
    name: "Power",
    suffix: "_power",
    device_class: "power",
    state_class: "measurement",
    field: "{{ value_json.power_w }}",
    unit: "W",
};

fn entity_config(
    entity: &Entity,
    config_topic: &str,
    topics: &Topics,
    config: &MeterConfig,
) -> Result<OutboundMessage, ProtocolError> {
    let unique_id = join(&[config.client_id.as_str(), entity.suffix]);
    let doc = EntityDoc {
        name: entity.name,
        device_class: entity.device_class,
        state_class: entity.state_class,
        state_topic: &topics.state,
        value_template: entity.field,
        unit_of_measurement: entity.unit,
        unique_id: &unique_id,
        availability_topic: &topics.availability,
        device: DeviceDoc {
            identifiers: [config.client_id.as_str()],
            name: config.device_name.as_str(),
        },
    };
    let payload = serde_json::to_vec(&doc).map_err(|_| ProtocolError::MessageTooLong)?;
    OutboundMessage::new(config_topic, &payload, QoS::AtMostOnce, true)
}

/// Retained discovery documents for the energy and power entities.
pub fn discovery_messages(
    topics: &Topics,
    config: &MeterConfig,
) -> Result<[OutboundMessage; 2], ProtocolError> {
    Ok([
        entity_config(&ENERGY, &topics.energy_config, topics, config)?,
        entity_config(&POWER, &topics.power_config, topics, config)?,
    ])
}

/// Retained availability marker.
pub fn availability_message(topics: &Topics, online: bool) -> Result<OutboundMessage, ProtocolError> {
    let payload = if online {
        AVAILABILITY_ONLINE
    } else {
        AVAILABILITY_OFFLINE
    };
    OutboundMessage::new(&topics.availability, payload, QoS::AtMostOnce, true)
}

// ── State payload ────────────────────────────────────────────

#[derive(Serialize)]
struct StateDoc {
    pulses: u64,
    energy_wh: f64,
    power_w: f32,
}

/// JSON state reading for a snapshot.
pub fn state_message(
    snapshot: &EnergySnapshot,
    topics: &Topics,
    qos: QoS,
    retain: bool,
) -> Result<OutboundMessage, ProtocolError> {
    let doc = StateDoc {
        pulses: snapshot.pulse_count,
        energy_wh: snapshot.energy_wh,
        power_w: snapshot.power_w,
    };
    let payload = serde_json::to_vec(&doc).map_err(|_| ProtocolError::MessageTooLong)?;
    OutboundMessage::new(&topics.state, &payload, qos, retain)
}
