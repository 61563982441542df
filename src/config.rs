//! Meter configuration parameters
//!
//! All tunable parameters for the pulse meter.  Read once at startup and
//! treated as immutable for the lifetime of the process.

use serde::{Deserialize, Serialize};

use crate::energy::MAX_POWER_WINDOW_SECS;
use crate::error::ConfigError;

/// Core meter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    // --- Broker ---
    /// Broker hostname or IP address
    pub broker_host: heapless::String<64>,
    /// Broker TCP port
    pub broker_port: u16,
    /// MQTT client identifier (also the device node id in topics)
    pub client_id: heapless::String<23>,
    /// Optional broker credentials
    pub username: Option<heapless::String<64>>,
    pub password: Option<heapless::String<64>>,

    // --- Topics ---
    /// Home-assistant discovery prefix
    pub discovery_prefix: heapless::String<32>,
    /// Human-readable device name shown by the hub
    pub device_name: heapless::String<32>,

    // --- Pulse detection ---
    /// Raw intensity above which the meter LED counts as lit
    pub threshold_high: u16,
    /// Raw intensity below which the meter LED counts as dark
    pub threshold_low: u16,
    /// Minimum time between two accepted pulses (milliseconds)
    pub debounce_ms: u32,
    /// Consecutive sensor failures before the sensor is restarted
    pub sensor_restart_after: u8,

    // --- Energy ---
    /// Energy represented by one pulse (watt-hours)
    pub wh_per_pulse: f32,
    /// Trailing window for the power estimate (seconds)
    pub power_window_secs: u32,

    // --- Timing ---
    /// Sensor sampling period (milliseconds)
    pub sample_interval_ms: u32,
    /// Sensor read timeout (milliseconds)
    pub sensor_timeout_ms: u32,
    /// State publish period (seconds)
    pub publish_interval_secs: u32,
    /// Keep-alive advertised in CONNECT (seconds)
    pub keepalive_secs: u16,
    /// PINGREQ period while connected (seconds)
    pub ping_interval_secs: u16,
    /// Maximum wait for a PINGRESP (seconds)
    pub ping_timeout_secs: u16,
    /// TCP connect + CONNACK deadline (milliseconds)
    pub connect_timeout_ms: u32,
    /// PUBACK / SUBACK deadline (milliseconds)
    pub ack_timeout_ms: u32,

    // --- Backoff ---
    /// First reconnect delay (milliseconds)
    pub backoff_min_ms: u32,
    /// Reconnect delay cap (milliseconds)
    pub backoff_max_ms: u32,
    /// Multiplier applied after each failed attempt
    pub backoff_factor: u32,

    // --- Publishing ---
    /// QoS used for state publishes (0-2)
    pub state_qos: u8,
    /// Retain flag for state publishes
    pub state_retain: bool,

    // --- Remote log ---
    /// Syslog hostname field
    pub syslog_hostname: heapless::String<32>,
    /// Syslog UDP port (broadcast)
    pub syslog_port: u16,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            // Broker
            broker_host: bounded("mqtt.local"),
            broker_port: 1883,
            client_id: bounded("picopower"),
            username: None,
            password: None,

            // Topics
            discovery_prefix: bounded("homeassistant"),
            device_name: bounded("Pico Power"),

            // Pulse detection
            threshold_high: 40,
            threshold_low: 20,
            debounce_ms: 50,
            sensor_restart_after: 50, // 5 s at 10 Hz

            // Energy
            wh_per_pulse: 1.0,
            power_window_secs: 60,

            // Timing
            sample_interval_ms: 100, // 10 Hz
            sensor_timeout_ms: 50,
            publish_interval_secs: 30,
            keepalive_secs: 60,
            ping_interval_secs: 30,
            ping_timeout_secs: 10,
            connect_timeout_ms: 5_000,
            ack_timeout_ms: 5_000,

            // Backoff
            backoff_min_ms: 1_000,
            backoff_max_ms: 30_000,
            backoff_factor: 2,

            // Publishing
            state_qos: 0,
            state_retain: false,

            // Remote log
            syslog_hostname: bounded("picopower"),
            syslog_port: 514,
        }
    }
}

impl MeterConfig {
    /// Parse a JSON configuration document.  Missing fields take their
    /// default values.  The result is validated before it is returned.
    pub fn from_json(doc: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(doc).map_err(|_| ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would leave the detector or session with
    /// undefined behaviour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threshold_low >= self.threshold_high {
            return Err(ConfigError::ValidationFailed(
                "threshold_low must be below threshold_high",
            ));
        }
        if self.broker_host.is_empty() {
            return Err(ConfigError::ValidationFailed("broker_host is empty"));
        }
        if self.client_id.is_empty() {
            return Err(ConfigError::ValidationFailed("client_id is empty"));
        }
        if self.discovery_prefix.is_empty() {
            return Err(ConfigError::ValidationFailed("discovery_prefix is empty"));
        }
        if self.username.is_none() && self.password.is_some() {
            return Err(ConfigError::ValidationFailed("password requires a username"));
        }
        if !(self.wh_per_pulse > 0.0 && self.wh_per_pulse.is_finite()) {
            return Err(ConfigError::ValidationFailed("wh_per_pulse must be positive"));
        }
        if self.power_window_secs == 0 || self.power_window_secs > MAX_POWER_WINDOW_SECS {
            return Err(ConfigError::ValidationFailed(
                "power_window_secs must be between 1 and 900",
            ));
        }
        if self.sample_interval_ms == 0 || self.sensor_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed("sampling periods must be non-zero"));
        }
        if self.publish_interval_secs == 0 {
            return Err(ConfigError::ValidationFailed("publish_interval_secs must be non-zero"));
        }
        if self.keepalive_secs == 0 || self.ping_interval_secs == 0 || self.ping_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed("keep-alive timings must be non-zero"));
        }
        if self.ping_interval_secs >= self.keepalive_secs {
            return Err(ConfigError::ValidationFailed(
                "ping_interval_secs must be below keepalive_secs",
            ));
        }
        if self.connect_timeout_ms == 0 || self.ack_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed("network timeouts must be non-zero"));
        }
        if self.backoff_min_ms == 0 || self.backoff_min_ms > self.backoff_max_ms {
            return Err(ConfigError::ValidationFailed(
                "backoff_min_ms must be non-zero and not above backoff_max_ms",
            ));
        }
        if self.backoff_factor == 0 {
            return Err(ConfigError::ValidationFailed("backoff_factor must be at least 1"));
        }
        if self.state_qos > 2 {
            return Err(ConfigError::ValidationFailed("state_qos must be 0, 1 or 2"));
        }
        Ok(())
    }
}

/// Build a bounded string from a literal known to fit.
fn bounded<const N: usize>(s: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    for c in s.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}
