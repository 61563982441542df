//! Persistent, auto-reconnecting MQTT client session.
//!
//! Owns the broker connection and walks the [`ConnectionState`] machine:
//!
//! ```text
//!  maintain()
//!   ├─ Disconnected / Backoff (due) ──▶ connect ─┬─▶ Connected ─▶ subscribe,
//!   │                                            │               online,
//!   │                                            │               discovery,
//!   │                                            │               flush slot
//!   │                                            └─▶ Backoff (delay grows)
//!   └─ Connected ──▶ drain inbound, keep-alive ──── fault ──▶ Backoff
//! ```
//!
//! Publishing while not connected parks the message in a single slot; a
//! newer message supersedes it.  The slot is sent once right after the
//! next successful connect.

use core::time::Duration;

use log::{debug, error, info, warn};

use crate::app::commands::RemoteCommand;
use crate::app::events::MeterEvent;
use crate::app::ports::{Clock, EventSink, Transport};
use crate::config::MeterConfig;
use crate::error::{ProtocolError, SessionError, TransportError};
use crate::timeout::with_timeout;

use super::backoff::Backoff;
use super::codec::{CONNACK, InboundPublish, Packet, PacketDecoder, connect_refusal};
use super::discovery::{
    AVAILABILITY_OFFLINE, HUB_ONLINE, Topics, availability_message, discovery_messages,
};
use super::message::{OutboundMessage, QoS};
use super::packet::{
    ConnectOptions, Will, encode_connect, encode_disconnect, encode_pingreq, encode_puback,
    encode_publish, encode_pubrel, encode_subscribe,
};
use super::state::ConnectionState;

/// Reactor tick while waiting for an inbound packet.
const RX_POLL: Duration = Duration::from_millis(5);

const RX_BUF_SIZE: usize = 256;

/// Remote commands queued between two scheduler passes.
const MAX_PENDING_COMMANDS: usize = 4;

/// Result of a successful [`MessagingSession::publish`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The broker has the message (acknowledged for QoS 1/2).
    Sent,
    /// Parked in the outbox slot until the next connect.
    Buffered { superseded: bool },
}

pub struct MessagingSession<T: Transport, C: Clock> {
    transport: T,
    clock: C,
    config: MeterConfig,
    topics: Topics,

    state: ConnectionState,
    backoff: Backoff,
    sessions_opened: u32,

    /// Single outbox slot.
    pending: Option<OutboundMessage>,

    decoder: PacketDecoder,
    rx_buf: [u8; RX_BUF_SIZE],
    rx_len: usize,
    rx_pos: usize,

    next_packet_id: u16,
    last_ping_ms: u64,
    ping_sent_ms: Option<u64>,
    discovery_due: bool,
    commands: heapless::Deque<RemoteCommand, MAX_PENDING_COMMANDS>,
}

impl<T: Transport, C: Clock> MessagingSession<T, C> {
    pub fn new(transport: T, clock: C, config: &MeterConfig) -> Self {
        Self {
            transport,
            clock,
            topics: Topics::new(config),
            backoff: Backoff::from_config(config),
            config: config.clone(),
            state: ConnectionState::Disconnected,
            sessions_opened: 0,
            pending: None,
            decoder: PacketDecoder::new(),
            rx_buf: [0; RX_BUF_SIZE],
            rx_len: 0,
            rx_pos: 0,
            next_packet_id: 1,
            last_ping_ms: 0,
            ping_sent_ms: None,
            discovery_due: false,
            commands: heapless::Deque::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Message waiting in the outbox slot, if any.
    pub fn pending(&self) -> Option<&OutboundMessage> {
        self.pending.as_ref()
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Next command received on the command topic.
    pub fn take_command(&mut self) -> Option<RemoteCommand> {
        self.commands.pop_front()
    }

    // ── Maintenance ──────────────────────────────────────────

    /// Drive the state machine one step: connect when due, otherwise
    /// service the live connection (inbound packets, keep-alive).
    pub async fn maintain(&mut self, sink: &mut impl EventSink) {
        match self.state {
            ConnectionState::Disconnected => self.connect(sink).await,
            ConnectionState::Backoff { next_retry_ms, .. } => {
                if self.clock.now_ms() >= next_retry_ms {
                    self.connect(sink).await;
                }
            }
            ConnectionState::Connecting => {}
            ConnectionState::Connected { .. } => {
                if let Err(e) = self.service(sink).await {
                    self.fail(e, sink);
                }
            }
        }
    }

    async fn connect(&mut self, sink: &mut impl EventSink) {
        self.transition(ConnectionState::Connecting, sink);
        info!(
            "MQTT: connecting to {}:{} as '{}'",
            self.config.broker_host, self.config.broker_port, self.config.client_id
        );

        if let Err(e) = self.open().await {
            self.fail(e, sink);
            return;
        }

        let now = self.clock.now_ms();
        self.sessions_opened = self.sessions_opened.wrapping_add(1);
        self.backoff.reset();
        self.last_ping_ms = now;
        self.ping_sent_ms = None;
        self.transition(
            ConnectionState::Connected {
                session_id: self.sessions_opened,
                last_keepalive_ms: now,
            },
            sink,
        );

        if let Err(e) = self.on_connected(sink).await {
            self.fail(e, sink);
        }
    }

    /// TCP connect plus CONNECT/CONNACK handshake.
    async fn open(&mut self) -> Result<(), SessionError> {
        self.decoder.reset();
        self.rx_len = 0;
        self.rx_pos = 0;

        let deadline = Duration::from_millis(u64::from(self.config.connect_timeout_ms));
        with_timeout(
            deadline,
            self.transport.connect(
                &self.config.broker_host,
                self.config.broker_port,
                deadline,
            ),
        )
        .await
        .map_err(|_| TransportError::Timeout)??;

        let will = Will {
            topic: &self.topics.availability,
            payload: AVAILABILITY_OFFLINE,
            qos: QoS::AtMostOnce,
            retain: true,
        };
        let packet = encode_connect(&ConnectOptions {
            client_id: &self.config.client_id,
            keepalive_secs: self.config.keepalive_secs,
            clean_session: true,
            username: self.config.username.as_deref(),
            password: self.config.password.as_deref(),
            will: Some(will),
        })?;
        self.send(&packet).await?;

        match with_timeout(deadline, self.next_packet()).await {
            Err(_) => Err(SessionError::AckTimeout),
            Ok(Err(e)) => Err(e),
            Ok(Ok(Packet::ConnAck { return_code: 0, .. })) => Ok(()),
            Ok(Ok(Packet::ConnAck { return_code, .. })) => Err(connect_refusal(return_code).into()),
            Ok(Ok(other)) => Err(ProtocolError::UnexpectedPacket(other.header_type()).into()),
        }
    }

    /// Subscribe, announce availability and discovery, flush the outbox.
    async fn on_connected(&mut self, sink: &mut impl EventSink) -> Result<(), SessionError> {
        let hub_status = self.topics.hub_status.clone();
        let command = self.topics.command.clone();
        self.subscribe(&hub_status, sink).await?;
        self.subscribe(&command, sink).await?;

        let online = availability_message(&self.topics, true)?;
        self.send_message(&online, sink).await?;
        self.publish_discovery(sink).await?;

        if let Some(msg) = self.pending.take() {
            if let Err(e) = self.send_message(&msg, sink).await {
                self.pending = Some(msg);
                return Err(e);
            }
            info!("MQTT: delivered buffered message to {}", msg.topic());
            sink.emit(&MeterEvent::Published {
                topic: msg.topic_owned(),
                replayed: true,
            });
        }
        Ok(())
    }

    async fn publish_discovery(&mut self, sink: &mut impl EventSink) -> Result<(), SessionError> {
        self.discovery_due = false;
        for msg in discovery_messages(&self.topics, &self.config)? {
            self.send_message(&msg, sink).await?;
        }
        debug!("MQTT: discovery documents published");
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str, sink: &mut impl EventSink) -> Result<(), SessionError> {
        let id = self.packet_id();
        self.send(&encode_subscribe(id, topic, QoS::AtMostOnce)?).await?;
        let ack = self
            .await_ack(
                |p| matches!(p, Packet::SubAck { packet_id, .. } if *packet_id == id),
                sink,
            )
            .await?;
        match ack {
            Packet::SubAck { rejected: true, .. } => Err(ProtocolError::SubscriptionRejected.into()),
            _ => {
                debug!("MQTT: subscribed to {}", topic);
                Ok(())
            }
        }
    }

    /// Inbound traffic and keep-alive for a live connection.
    async fn service(&mut self, sink: &mut impl EventSink) -> Result<(), SessionError> {
        while let Some(packet) = self.poll_packet()? {
            self.handle_inbound(packet, sink).await?;
        }

        let now = self.clock.now_ms();
        let ping_interval = u64::from(self.config.ping_interval_secs) * 1000;
        let ping_timeout = u64::from(self.config.ping_timeout_secs) * 1000;
        match self.ping_sent_ms {
            Some(sent) if now.saturating_sub(sent) >= ping_timeout => {
                return Err(SessionError::KeepAliveTimeout);
            }
            Some(_) => {}
            None if now.saturating_sub(self.last_ping_ms) >= ping_interval => {
                self.send(&encode_pingreq()?).await?;
                self.ping_sent_ms = Some(now);
                self.last_ping_ms = now;
            }
            None => {}
        }

        if self.discovery_due {
            self.publish_discovery(sink).await?;
        }
        Ok(())
    }

    // ── Publishing ───────────────────────────────────────────

    /// Send `msg` now if connected, otherwise park it in the outbox slot.
    ///
    /// A send failure drops the session into backoff and returns the
    /// message to the slot unless a newer one already occupies it.
    pub async fn publish(
        &mut self,
        msg: OutboundMessage,
        sink: &mut impl EventSink,
    ) -> Result<PublishOutcome, SessionError> {
        if !self.state.is_connected() {
            let superseded = self.pending.replace(msg).is_some();
            debug!("MQTT: not connected, message buffered (superseded: {})", superseded);
            sink.emit(&MeterEvent::Buffered { superseded });
            return Ok(PublishOutcome::Buffered { superseded });
        }

        match self.send_message(&msg, sink).await {
            Ok(()) => {
                sink.emit(&MeterEvent::Published {
                    topic: msg.topic_owned(),
                    replayed: false,
                });
                Ok(PublishOutcome::Sent)
            }
            Err(e) => {
                if self.pending.is_none() {
                    self.pending = Some(msg);
                }
                self.fail(e, sink);
                Err(e)
            }
        }
    }

    /// One publish exchange at the message's QoS.
    async fn send_message(
        &mut self,
        msg: &OutboundMessage,
        sink: &mut impl EventSink,
    ) -> Result<(), SessionError> {
        match msg.qos() {
            QoS::AtMostOnce => self.send(&encode_publish(msg, 0)?).await,
            QoS::AtLeastOnce => {
                let id = self.packet_id();
                self.send(&encode_publish(msg, id)?).await?;
                self.await_ack(|p| *p == Packet::PubAck(id), sink).await?;
                Ok(())
            }
            QoS::ExactlyOnce => {
                let id = self.packet_id();
                self.send(&encode_publish(msg, id)?).await?;
                self.await_ack(|p| *p == Packet::PubRec(id), sink).await?;
                self.send(&encode_pubrel(id)?).await?;
                self.await_ack(|p| *p == Packet::PubComp(id), sink).await?;
                Ok(())
            }
        }
    }

    // ── Inbound ──────────────────────────────────────────────

    /// Wait for the packet selected by `wanted`, handling anything else
    /// that arrives in the meantime.
    async fn await_ack(
        &mut self,
        wanted: impl Fn(&Packet) -> bool,
        sink: &mut impl EventSink,
    ) -> Result<Packet, SessionError> {
        let deadline = Duration::from_millis(u64::from(self.config.ack_timeout_ms));
        with_timeout(deadline, async {
            loop {
                let packet = self.next_packet().await?;
                if wanted(&packet) {
                    return Ok(packet);
                }
                self.handle_inbound(packet, sink).await?;
            }
        })
        .await
        .map_err(|_| SessionError::AckTimeout)?
    }

    async fn handle_inbound(
        &mut self,
        packet: Packet,
        sink: &mut impl EventSink,
    ) -> Result<(), SessionError> {
        match packet {
            Packet::PingResp => {
                self.ping_sent_ms = None;
                if let ConnectionState::Connected {
                    last_keepalive_ms, ..
                } = &mut self.state
                {
                    *last_keepalive_ms = self.clock.now_ms();
                }
                Ok(())
            }
            Packet::Publish(publish) => self.handle_publish(publish, sink).await,
            Packet::ConnAck { .. } => Err(ProtocolError::UnexpectedPacket(CONNACK).into()),
            Packet::Dropped { kind, len } => {
                warn!("MQTT: dropped oversized packet (type 0x{:02x}, {} bytes)", kind, len);
                Ok(())
            }
            other => {
                debug!("MQTT: ignoring stray {:?}", other);
                Ok(())
            }
        }
    }

    async fn handle_publish(
        &mut self,
        publish: InboundPublish,
        sink: &mut impl EventSink,
    ) -> Result<(), SessionError> {
        if let (QoS::AtLeastOnce, Some(id)) = (publish.qos, publish.packet_id) {
            self.send(&encode_puback(id)?).await?;
        }

        if publish.topic == self.topics.hub_status {
            if publish.payload.as_slice() == HUB_ONLINE {
                info!("MQTT: hub came online, re-announcing discovery");
                self.discovery_due = true;
            }
        } else if publish.topic == self.topics.command {
            match RemoteCommand::parse(&publish.payload) {
                Some(cmd) => {
                    info!("MQTT: command {:?}", cmd);
                    sink.emit(&MeterEvent::Command(cmd));
                    if self.commands.push_back(cmd).is_err() {
                        warn!("MQTT: command queue full, dropping {:?}", cmd);
                    }
                }
                None => warn!("MQTT: unknown command payload ({} bytes)", publish.payload.len()),
            }
        } else {
            debug!("MQTT: message on unexpected topic {}", publish.topic);
        }
        Ok(())
    }

    /// Decode buffered bytes, reading more from the transport when the
    /// buffer runs dry.  `Ok(None)` means no complete packet is available.
    fn poll_packet(&mut self) -> Result<Option<Packet>, SessionError> {
        loop {
            while self.rx_pos < self.rx_len {
                let (used, packet) = self.decoder.feed(&self.rx_buf[self.rx_pos..self.rx_len]);
                self.rx_pos += used;
                if let Some(packet) = packet {
                    return packet.map(Some).map_err(SessionError::from);
                }
            }
            self.rx_pos = 0;
            self.rx_len = self.transport.try_read(&mut self.rx_buf)?;
            if self.rx_len == 0 {
                return Ok(None);
            }
        }
    }

    async fn next_packet(&mut self) -> Result<Packet, SessionError> {
        loop {
            if let Some(packet) = self.poll_packet()? {
                return Ok(packet);
            }
            async_io_mini::Timer::after(RX_POLL).await;
        }
    }

    // ── Helpers ──────────────────────────────────────────────

    async fn send(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        let deadline = Duration::from_millis(u64::from(self.config.ack_timeout_ms));
        with_timeout(deadline, self.transport.write_all(bytes))
            .await
            .map_err(|_| TransportError::Timeout)??;
        Ok(())
    }

    async fn announce_offline(&mut self) -> Result<(), SessionError> {
        let offline = availability_message(&self.topics, false)?;
        self.send(&encode_publish(&offline, 0)?).await
    }

    /// Non-zero packet identifiers, wrapping.
    fn packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = self.next_packet_id.checked_add(1).unwrap_or(1);
        id
    }

    /// Close the transport and schedule the next attempt.
    fn fail(&mut self, err: SessionError, sink: &mut impl EventSink) {
        if err.is_protocol_fault() {
            error!("MQTT: {}", err);
        } else {
            warn!("MQTT: {}", err);
        }
        sink.emit(&MeterEvent::SessionFault(err));
        self.transport.close();

        let delay = self.backoff.next_delay_ms();
        let next = ConnectionState::Backoff {
            next_retry_ms: self.clock.now_ms().saturating_add(delay),
            attempt: self.backoff.attempts(),
        };
        info!("MQTT: retrying in {} ms", delay);
        self.transition(next, sink);
    }

    fn transition(&mut self, next: ConnectionState, sink: &mut impl EventSink) {
        debug_assert!(
            self.state.can_transition_to(&next),
            "illegal session transition {} -> {}",
            self.state,
            next
        );
        let from = self.state;
        self.state = next;
        sink.emit(&MeterEvent::ConnectionChanged { from, to: next });
    }

    /// Best-effort retained "offline" plus DISCONNECT, then close.  A clean
    /// DISCONNECT suppresses the will, so availability is set explicitly.
    /// Consumes the session.
    pub async fn shutdown(mut self) {
        if self.state.is_connected() {
            if let Err(e) = self.announce_offline().await {
                debug!("MQTT: offline notice not sent: {}", e);
            }
            let disconnect = match encode_disconnect() {
                Ok(packet) => self.send(&packet).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = disconnect {
                debug!("MQTT: disconnect not sent: {}", e);
            }
        }
        self.transport.close();
        info!("MQTT: session closed");
    }
}
