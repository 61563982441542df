//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter         | Implements  | Connects to                  |
//! |-----------------|-------------|------------------------------|
//! | `log_sink`      | EventSink   | `log` facade                 |
//! | `syslog`        | log::Log    | Console + UDP syslog         |
//! | `tcp_transport` | Transport   | Plain TCP to the MQTT broker |
//! | `time`          | Clock       | ESP32 system timer / Instant |

pub mod log_sink;
pub mod syslog;
pub mod tcp_transport;
pub mod time;
