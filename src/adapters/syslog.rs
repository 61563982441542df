//! Remote syslog logger.
//!
//! A [`log::Log`] backend that prints every record to the console and
//! broadcasts it as an RFC 5424 datagram:
//!
//! ```text
//!   <PRI>1 HOSTNAME APP-NAME PROCID MSGID - MSG\r\n
//!   <13>1 picopower main - - - MQTT: connecting to mqtt.local:1883 ...
//! ```
//!
//! PRI is facility `user` (1) × 8 + severity.  The socket is
//! non-blocking and send failures are dropped, so logging never stalls
//! the meter.

use core::fmt::Write as _;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

/// syslog facility `user`.
const FACILITY_USER: u8 = 1;

/// Longest datagram sent.  Longer messages are truncated.
pub const MAX_LINE_LEN: usize = 480;

pub type SyslogLine = heapless::String<MAX_LINE_LEN>;

/// RFC 5424 severity for a log level.
pub fn severity(level: Level) -> u8 {
    match level {
        Level::Error => 3,
        Level::Warn => 4,
        Level::Info => 5,
        Level::Debug | Level::Trace => 7,
    }
}

/// Writer that keeps whatever fits and silently drops the rest.
struct Truncating<'a> {
    line: &'a mut SyslogLine,
    limit: usize,
}

impl core::fmt::Write for Truncating<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for c in s.chars() {
            if self.line.len() + c.len_utf8() > self.limit || self.line.push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// Render one syslog line.  Long messages are cut to fit
/// [`MAX_LINE_LEN`] including the trailing CRLF.
pub fn format_line(hostname: &str, app: &str, level: Level, msg: &core::fmt::Arguments<'_>) -> SyslogLine {
    let mut line = SyslogLine::new();
    let pri = FACILITY_USER * 8 + severity(level);
    let mut w = Truncating {
        line: &mut line,
        limit: MAX_LINE_LEN - 2,
    };
    let _ = write!(w, "<{pri}>1 {hostname} {app} - - - {msg}");
    let _ = line.push_str("\r\n");
    line
}

pub struct SyslogLogger {
    socket: Option<UdpSocket>,
    target: SocketAddrV4,
    hostname: heapless::String<32>,
    app: &'static str,
    level: LevelFilter,
}

impl SyslogLogger {
    /// Create a logger broadcasting to `255.255.255.255:port`.  When the
    /// socket cannot be opened the logger still prints to the console.
    pub fn new(hostname: &str, app: &'static str, port: u16, level: LevelFilter) -> Self {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .and_then(|s| {
                s.set_broadcast(true)?;
                s.set_nonblocking(true)?;
                Ok(s)
            })
            .ok();
        let mut name = heapless::String::new();
        for c in hostname.chars() {
            if name.push(c).is_err() {
                break;
            }
        }
        Self {
            socket,
            target: SocketAddrV4::new(Ipv4Addr::BROADCAST, port),
            hostname: name,
            app,
            level,
        }
    }

    /// Send datagrams somewhere other than the broadcast address.
    pub fn with_target(mut self, target: SocketAddrV4) -> Self {
        self.target = target;
        self
    }

    /// Install as the global logger.  Can only succeed once per process.
    pub fn install(self) -> Result<(), SetLoggerError> {
        let level = self.level;
        let logger: &'static Self = Box::leak(Box::new(self));
        log::set_logger(logger)?;
        log::set_max_level(level);
        Ok(())
    }
}

impl Log for SyslogLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        println!("{:<5} {}", record.level(), record.args());

        if let Some(socket) = &self.socket {
            let line = format_line(&self.hostname, self.app, record.level(), record.args());
            // A full buffer or missing route just loses the line.
            let _ = socket.send_to(line.as_bytes(), self.target);
        }
    }

    fn flush(&self) {}
}
