//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by rendering structured meter events as log
//! lines.  With the [`SyslogLogger`](super::syslog::SyslogLogger)
//! installed they reach both the serial console and the network log
//! collector.

use log::{debug, info, warn};

use crate::app::events::MeterEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`MeterEvent`].
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &MeterEvent) {
        match event {
            MeterEvent::Started => {
                info!("START | pulse meter running");
            }
            MeterEvent::Pulse {
                count,
                timestamp_ms,
            } => {
                debug!("PULSE | #{} at {} ms", count, timestamp_ms);
            }
            MeterEvent::SampleDropped(e) => {
                debug!("SENSOR | sample dropped: {}", e);
            }
            MeterEvent::ConnectionChanged { from, to } => {
                info!("MQTT | {} -> {}", from, to);
            }
            MeterEvent::Published { topic, replayed } => {
                if *replayed {
                    info!("PUBLISH | {} (buffered)", topic);
                } else {
                    debug!("PUBLISH | {}", topic);
                }
            }
            MeterEvent::Buffered { superseded } => {
                if *superseded {
                    info!("PUBLISH | offline, older reading superseded");
                } else {
                    debug!("PUBLISH | offline, reading buffered");
                }
            }
            MeterEvent::SessionFault(e) => {
                warn!("MQTT | fault: {}", e);
            }
            MeterEvent::Command(cmd) => {
                info!("COMMAND | {:?}", cmd);
            }
        }
    }
}
