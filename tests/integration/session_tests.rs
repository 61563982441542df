//! Messaging session scenarios against the scripted broker.
//!
//! The mock clock drives backoff and keep-alive decisions; packet waits
//! inside the session still use reactor timers, so acknowledgement
//! timeouts are shortened in the test configuration.

use futures_lite::future::block_on;

use pulsemeter::app::commands::RemoteCommand;
use pulsemeter::app::events::MeterEvent;
use pulsemeter::config::MeterConfig;
use pulsemeter::error::{ConnectRefusal, ProtocolError, SessionError, TransportError};
use pulsemeter::mqtt::discovery::Topics;
use pulsemeter::mqtt::{ConnectionState, MessagingSession, OutboundMessage, PublishOutcome, QoS};

use crate::mock_hw::{MockBroker, MockClock, RecordingSink, Sent};

type Session = MessagingSession<MockBroker, MockClock>;

fn test_config() -> MeterConfig {
    MeterConfig {
        connect_timeout_ms: 200,
        ack_timeout_ms: 50,
        ..MeterConfig::default()
    }
}

struct Rig {
    session: Session,
    broker: MockBroker,
    clock: MockClock,
    sink: RecordingSink,
    topics: Topics,
}

fn rig_with(config: &MeterConfig) -> Rig {
    rig_on(MockBroker::new(), config)
}

fn rig_on(broker: MockBroker, config: &MeterConfig) -> Rig {
    let clock = MockClock::new();
    let session = MessagingSession::new(broker.clone(), clock.clone(), config);
    let topics = session.topics().clone();
    Rig {
        session,
        broker,
        clock,
        sink: RecordingSink::new(),
        topics,
    }
}

fn rig() -> Rig {
    rig_with(&test_config())
}

impl Rig {
    fn maintain(&mut self) {
        let mut sink = self.sink.clone();
        block_on(self.session.maintain(&mut sink));
    }

    fn publish(&mut self, msg: OutboundMessage) -> Result<PublishOutcome, SessionError> {
        let mut sink = self.sink.clone();
        block_on(self.session.publish(msg, &mut sink))
    }

    fn state_msg(&self, payload: &str, qos: QoS) -> OutboundMessage {
        OutboundMessage::new(&self.topics.state, payload.as_bytes(), qos, false).unwrap()
    }

    fn faults(&self) -> Vec<SessionError> {
        self.sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                MeterEvent::SessionFault(err) => Some(err),
                _ => None,
            })
            .collect()
    }
}

// ── Connect sequence ──────────────────────────────────────────

#[test]
fn connect_subscribes_then_announces() {
    let mut r = rig();
    r.maintain();

    assert!(matches!(r.session.state(), ConnectionState::Connected { session_id: 1, .. }));
    assert!(r.broker.is_connected());

    let sent = r.broker.sent();
    assert_eq!(sent[0], Sent::Connect);
    assert!(matches!(&sent[1], Sent::Subscribe { topic, .. } if *topic == r.topics.hub_status.as_str()));
    assert!(matches!(&sent[2], Sent::Subscribe { topic, .. } if *topic == r.topics.command.as_str()));

    let publishes = r.broker.publishes();
    let topics: Vec<&str> = publishes.iter().map(|p| p.topic.as_str()).collect();
    assert_eq!(
        topics,
        [
            r.topics.availability.as_str(),
            r.topics.energy_config.as_str(),
            r.topics.power_config.as_str(),
        ]
    );
    assert_eq!(publishes[0].payload_str(), "online");
    assert!(publishes.iter().all(|p| p.retain), "announcements are retained");
}

#[test]
fn connect_emits_transitions() {
    let mut r = rig();
    r.maintain();

    let transitions: Vec<(ConnectionState, ConnectionState)> = r
        .sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            MeterEvent::ConnectionChanged { from, to } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert_eq!(transitions.len(), 2);
    assert_eq!(transitions[0], (ConnectionState::Disconnected, ConnectionState::Connecting));
    assert_eq!(transitions[1].0, ConnectionState::Connecting);
    assert!(transitions[1].1.is_connected());
}

// ── Outbox slot ───────────────────────────────────────────────

#[test]
fn newest_buffered_message_replayed_once() {
    let mut r = rig();

    let first = r.state_msg(r#"{"pulses":1}"#, QoS::AtMostOnce);
    let second = r.state_msg(r#"{"pulses":2}"#, QoS::AtMostOnce);
    assert_eq!(r.publish(first), Ok(PublishOutcome::Buffered { superseded: false }));
    assert_eq!(r.publish(second), Ok(PublishOutcome::Buffered { superseded: true }));
    assert!(r.session.pending().is_some());

    r.maintain();
    assert!(r.session.pending().is_none());
    let state = r.broker.publishes_to(&r.topics.state);
    assert_eq!(state.len(), 1, "superseded message never sent");
    assert_eq!(state[0].payload_str(), r#"{"pulses":2}"#);
    assert_eq!(
        r.sink.count(|e| matches!(e, MeterEvent::Published { replayed: true, .. })),
        1
    );

    // A later reconnect does not replay it again.
    r.broker.hang_up();
    r.maintain();
    r.clock.set(1_000);
    r.maintain();
    assert!(r.session.state().is_connected());
    assert_eq!(r.broker.publishes_to(&r.topics.state).len(), 1);
}

#[test]
fn publish_while_connected_is_sent() {
    let mut r = rig();
    r.maintain();

    let msg = r.state_msg(r#"{"pulses":3}"#, QoS::AtMostOnce);
    assert_eq!(r.publish(msg), Ok(PublishOutcome::Sent));
    assert_eq!(r.broker.publishes_to(&r.topics.state).len(), 1);
    assert_eq!(
        r.sink.count(|e| matches!(e, MeterEvent::Published { replayed: false, .. })),
        1
    );
}

#[test]
fn qos1_publish_waits_for_puback() {
    let mut r = rig();
    r.maintain();

    let msg = r.state_msg("{}", QoS::AtLeastOnce);
    assert_eq!(r.publish(msg), Ok(PublishOutcome::Sent));
    let state = r.broker.publishes_to(&r.topics.state);
    assert_eq!(state[0].qos, 1);
    assert!(r.session.state().is_connected());
}

#[test]
fn qos2_publish_completes_handshake() {
    let mut r = rig();
    r.maintain();

    let msg = r.state_msg("{}", QoS::ExactlyOnce);
    assert_eq!(r.publish(msg), Ok(PublishOutcome::Sent));
    assert_eq!(r.broker.count(|s| matches!(s, Sent::PubRel(_))), 1);
    assert!(r.session.state().is_connected());
}

#[test]
fn missing_puback_drops_to_backoff_and_keeps_message() {
    let mut r = rig();
    r.maintain();
    r.broker.ack_publishes(false);

    let msg = r.state_msg("{}", QoS::AtLeastOnce);
    assert_eq!(r.publish(msg), Err(SessionError::AckTimeout));
    assert!(matches!(r.session.state(), ConnectionState::Backoff { attempt: 1, .. }));
    assert!(r.session.pending().is_some(), "message kept for replay");
    assert!(!r.broker.is_connected());

    r.broker.ack_publishes(true);
    r.clock.set(1_000);
    r.maintain();
    assert!(r.session.pending().is_none());
    assert_eq!(r.broker.publishes_to(&r.topics.state).len(), 2);
}

#[test]
fn write_failure_drops_to_backoff_and_keeps_message() {
    let mut r = rig();
    r.maintain();
    r.broker.fail_writes(true);

    let msg = r.state_msg(r#"{"pulses":4}"#, QoS::AtMostOnce);
    assert_eq!(
        r.publish(msg),
        Err(SessionError::Transport(TransportError::WriteFailed))
    );
    assert_eq!(
        r.session.state(),
        ConnectionState::Backoff {
            next_retry_ms: 1_000,
            attempt: 1
        }
    );
    assert_eq!(
        r.session.pending().map(|m| m.payload()),
        Some(br#"{"pulses":4}"#.as_slice())
    );
    assert_eq!(r.faults(), [SessionError::Transport(TransportError::WriteFailed)]);
    assert!(!r.broker.is_connected());

    r.broker.fail_writes(false);
    r.clock.set(1_000);
    r.maintain();
    assert!(r.session.pending().is_none());
    let state = r.broker.publishes_to(&r.topics.state);
    assert_eq!(state.len(), 1);
    assert_eq!(state[0].payload_str(), r#"{"pulses":4}"#);
}

// ── Backoff ───────────────────────────────────────────────────

#[test]
fn retry_delays_double() {
    let mut r = rig();
    r.broker.fail_next_connects(3);

    r.maintain();
    assert_eq!(
        r.session.state(),
        ConnectionState::Backoff {
            next_retry_ms: 1_000,
            attempt: 1
        }
    );

    // Not due yet.
    r.clock.set(500);
    r.maintain();
    assert_eq!(r.broker.connect_attempts(), 1);

    r.clock.set(1_000);
    r.maintain();
    assert_eq!(
        r.session.state(),
        ConnectionState::Backoff {
            next_retry_ms: 3_000,
            attempt: 2
        }
    );

    r.clock.set(3_000);
    r.maintain();
    assert_eq!(
        r.session.state(),
        ConnectionState::Backoff {
            next_retry_ms: 7_000,
            attempt: 3
        }
    );

    r.clock.set(7_000);
    r.maintain();
    assert!(matches!(r.session.state(), ConnectionState::Connected { session_id: 1, .. }));
    assert_eq!(r.broker.connect_attempts(), 4);
    assert_eq!(
        r.faults(),
        [SessionError::Transport(TransportError::ConnectFailed); 3]
    );
}

#[test]
fn backoff_resets_after_connect() {
    let mut r = rig();
    r.broker.fail_next_connects(2);
    r.maintain();
    r.clock.set(1_000);
    r.maintain();
    r.clock.set(3_000);
    r.maintain();
    assert!(r.session.state().is_connected());

    r.broker.hang_up();
    r.clock.set(10_000);
    r.maintain();
    assert_eq!(
        r.session.state(),
        ConnectionState::Backoff {
            next_retry_ms: 11_000,
            attempt: 1
        }
    );
}

#[test]
fn refused_credentials_are_retried() {
    let mut r = rig();
    r.broker.refuse_next_connect(5);

    r.maintain();
    assert!(matches!(r.session.state(), ConnectionState::Backoff { .. }));
    assert_eq!(
        r.faults(),
        [SessionError::Protocol(ProtocolError::ConnectionRefused(
            ConnectRefusal::NotAuthorized
        ))]
    );
    assert!(r.faults()[0].is_protocol_fault());

    r.clock.set(1_000);
    r.maintain();
    assert!(r.session.state().is_connected());
    assert_eq!(r.broker.connect_attempts(), 2);
}

#[test]
fn rejected_subscription_is_protocol_fault() {
    let mut r = rig();
    r.broker.reject_subscriptions(true);
    r.maintain();
    assert!(matches!(r.session.state(), ConnectionState::Backoff { .. }));
    assert_eq!(
        r.faults(),
        [SessionError::Protocol(ProtocolError::SubscriptionRejected)]
    );
}

#[test]
fn peer_hang_up_drops_to_backoff() {
    let mut r = rig();
    r.maintain();
    r.broker.hang_up();
    r.maintain();
    assert!(matches!(r.session.state(), ConnectionState::Backoff { .. }));
    assert_eq!(r.faults(), [SessionError::Transport(TransportError::Closed)]);
    assert_eq!(r.broker.closes(), 1);
}

// ── Keep-alive ────────────────────────────────────────────────

#[test]
fn ping_answered_refreshes_keepalive() {
    let mut r = rig();
    r.maintain();

    r.clock.set(30_000);
    r.maintain();
    assert_eq!(r.broker.count(|s| *s == Sent::PingReq), 1);

    r.clock.set(30_005);
    r.maintain();
    assert_eq!(
        r.session.state(),
        ConnectionState::Connected {
            session_id: 1,
            last_keepalive_ms: 30_005
        }
    );
}

#[test]
fn unanswered_ping_times_out() {
    let mut r = rig();
    r.maintain();
    r.broker.answer_pings(false);

    r.clock.set(30_000);
    r.maintain();
    assert!(r.session.state().is_connected());

    r.clock.set(39_999);
    r.maintain();
    assert!(r.session.state().is_connected(), "still inside the ping timeout");

    r.clock.set(40_000);
    r.maintain();
    assert_eq!(
        r.session.state(),
        ConnectionState::Backoff {
            next_retry_ms: 41_000,
            attempt: 1
        }
    );
    assert_eq!(r.faults(), [SessionError::KeepAliveTimeout]);
    assert!(!r.faults()[0].is_protocol_fault());
}

// ── Inbound ───────────────────────────────────────────────────

#[test]
fn hub_birth_republishes_discovery() {
    let mut r = rig();
    r.maintain();
    assert_eq!(r.broker.publishes_to(&r.topics.energy_config).len(), 1);

    let hub = r.topics.hub_status.clone();
    r.broker.deliver(&hub, b"online", 0, 0);
    r.maintain();
    assert_eq!(r.broker.publishes_to(&r.topics.energy_config).len(), 2);
    assert_eq!(r.broker.publishes_to(&r.topics.power_config).len(), 2);

    // The hub going away needs no reply.
    r.broker.deliver(&hub, b"offline", 0, 0);
    r.maintain();
    assert_eq!(r.broker.publishes_to(&r.topics.energy_config).len(), 2);
}

#[test]
fn publish_command_is_queued_and_acked() {
    let mut r = rig();
    r.maintain();

    let cmd = r.topics.command.clone();
    r.broker.deliver(&cmd, b"publish", 1, 7);
    r.maintain();

    assert_eq!(r.session.take_command(), Some(RemoteCommand::PublishNow));
    assert_eq!(r.session.take_command(), None);
    assert_eq!(r.broker.count(|s| *s == Sent::PubAck(7)), 1);
    assert_eq!(
        r.sink.count(|e| *e == MeterEvent::Command(RemoteCommand::PublishNow)),
        1
    );
}

#[test]
fn unknown_command_is_ignored() {
    let mut r = rig();
    r.maintain();

    let cmd = r.topics.command.clone();
    r.broker.deliver(&cmd, b"reboot", 0, 0);
    r.maintain();
    assert_eq!(r.session.take_command(), None);
    assert!(r.session.state().is_connected());
}

#[test]
fn oversized_retained_command_does_not_cycle_session() {
    let config = test_config();
    let broker = MockBroker::new();
    let cmd = Topics::new(&config).command;
    broker.deliver_on_subscribe(&cmd, &[b'x'; 300]);
    let mut r = rig_on(broker, &config);

    r.maintain();
    for t in [5_000, 30_000, 30_005, 60_000] {
        r.clock.set(t);
        r.maintain();
    }

    assert!(matches!(r.session.state(), ConnectionState::Connected { session_id: 1, .. }));
    assert_eq!(r.broker.connect_attempts(), 1);
    assert!(r.faults().is_empty(), "{:?}", r.faults());
    assert_eq!(r.session.take_command(), None);
}

#[test]
fn frame_larger_than_receive_buffer_is_skipped() {
    let mut r = rig();
    r.maintain();

    let cmd = r.topics.command.clone();
    r.broker.deliver(&cmd, &[b'x'; 2_000], 0, 0);
    r.broker.deliver(&cmd, b"publish", 0, 0);
    r.maintain();

    assert!(r.session.state().is_connected());
    assert!(r.faults().is_empty());
    assert_eq!(r.session.take_command(), Some(RemoteCommand::PublishNow));
}

// ── Shutdown ──────────────────────────────────────────────────

#[test]
fn shutdown_marks_offline_and_disconnects() {
    let mut r = rig();
    r.maintain();
    let broker = r.broker.clone();
    let availability = r.topics.availability.clone();

    block_on(r.session.shutdown());

    let notices = broker.publishes_to(&availability);
    let last = notices.last().unwrap();
    assert_eq!(last.payload_str(), "offline");
    assert!(last.retain);
    assert_eq!(broker.sent().last(), Some(&Sent::Disconnect));
    assert!(!broker.is_connected());
}

#[test]
fn shutdown_while_disconnected_sends_nothing() {
    let r = rig();
    let broker = r.broker.clone();
    block_on(r.session.shutdown());
    assert!(broker.sent().is_empty());
}
