//! Inbound commands from the hub.
//!
//! These arrive on the device command topic and are surfaced by the
//! [`MessagingSession`](crate::mqtt::MessagingSession) for the scheduler to
//! act upon.

/// Commands the hub can send to the meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCommand {
    /// Publish the current reading now instead of waiting for the next
    /// periodic publish.
    PublishNow,
}

impl RemoteCommand {
    /// Parse a command-topic payload.  Surrounding whitespace and case are
    /// ignored.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let text = core::str::from_utf8(payload).ok()?.trim();
        if text.eq_ignore_ascii_case("publish") {
            Some(Self::PublishNow)
        } else {
            None
        }
    }
}
