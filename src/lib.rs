//! Pulse meter firmware library.
//!
//! Counts the optical pulses of a utility meter's LED, turns them into
//! energy and power readings, and publishes those to an MQTT broker with
//! Home Assistant discovery.
//!
//! Exposes the pure-logic modules for integration testing. All
//! ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`
//! within each module.

#![deny(unused_must_use)]

pub mod app;
pub mod config;
pub mod detector;
pub mod energy;
pub mod error;
pub mod mqtt;
pub mod scheduler;
pub mod timeout;

pub mod adapters;
pub mod drivers;
pub mod sensors;
