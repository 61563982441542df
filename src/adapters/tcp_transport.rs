//! Plain TCP transport to the MQTT broker.
//!
//! Implements [`Transport`] over `std::net::TcpStream` (lwIP sockets on
//! ESP-IDF, the host stack elsewhere).  The stream runs in non-blocking
//! mode: reads return `Ok(0)` on `WouldBlock` and writes retry on a
//! reactor timer, so the single executor thread never stalls on the
//! socket.
//!
//! Name resolution and the TCP handshake have no non-blocking std API.
//! They run on a short-lived helper thread which the connect future
//! polls until it finishes.

use core::time::Duration;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};

use log::{debug, info, warn};

use crate::app::ports::Transport;
use crate::error::TransportError;

/// Reactor tick while a write or connect is pending.
const IO_POLL: Duration = Duration::from_millis(2);

/// Stack for the connect helper thread (DNS + lwIP connect).
const CONNECT_STACK_SIZE: usize = 6 * 1024;

#[derive(Default)]
pub struct TcpTransport {
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn resolve_and_connect(host: &str, port: u16, timeout: Duration) -> std::io::Result<TcpStream> {
        let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
        let mut last_err = std::io::Error::new(ErrorKind::NotFound, "no address resolved");
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    /// Drop the stream after an I/O failure.
    fn drop_stream(&mut self, why: &str) {
        if self.stream.take().is_some() {
            info!("TCP: connection dropped ({})", why);
        }
    }
}

impl Transport for TcpTransport {
    async fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> Result<(), TransportError> {
        self.close();

        let host = host.to_owned();
        let worker = std::thread::Builder::new()
            .name("mqtt-connect".into())
            .stack_size(CONNECT_STACK_SIZE)
            .spawn(move || Self::resolve_and_connect(&host, port, timeout))
            .map_err(|_| TransportError::ConnectFailed)?;

        while !worker.is_finished() {
            async_io_mini::Timer::after(IO_POLL).await;
        }

        let stream = match worker.join() {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) if e.kind() == ErrorKind::TimedOut => return Err(TransportError::Timeout),
            Ok(Err(e)) => {
                warn!("TCP: connect to port {} failed: {}", port, e);
                return Err(TransportError::ConnectFailed);
            }
            Err(_) => return Err(TransportError::ConnectFailed),
        };

        stream
            .set_nonblocking(true)
            .map_err(|_| TransportError::ConnectFailed)?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("TCP: nodelay not applied: {}", e);
        }
        if let Ok(peer) = stream.peer_addr() {
            info!("TCP: connected to {}", peer);
        }
        self.stream = Some(stream);
        Ok(())
    }

    async fn write_all(&mut self, mut data: &[u8]) -> Result<(), TransportError> {
        while !data.is_empty() {
            let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
            match stream.write(data) {
                Ok(0) => {
                    self.drop_stream("write returned zero");
                    return Err(TransportError::Closed);
                }
                Ok(n) => data = &data[n..],
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    async_io_mini::Timer::after(IO_POLL).await;
                }
                Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
                Err(_) => {
                    self.drop_stream("write error");
                    return Err(TransportError::WriteFailed);
                }
            }
        }
        Ok(())
    }

    fn try_read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        match stream.read(buf) {
            Ok(0) => {
                self.drop_stream("EOF");
                Err(TransportError::Closed)
            }
            Ok(n) => Ok(n),
            Err(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => Ok(0),
            Err(_) => {
                self.drop_stream("read error");
                Err(TransportError::ReadFailed)
            }
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            debug!("TCP: closed");
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Tests (host only)
// ───────────────────────────────────────────────────────────────
