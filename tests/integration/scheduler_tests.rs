//! End-to-end runtime tests: all four tasks against mock adapters, on
//! real reactor timers with shortened periods.

use std::time::Duration;

use futures_lite::future::{block_on, zip};

use pulsemeter::adapters::time::MonotonicClock;
use pulsemeter::app::commands::RemoteCommand;
use pulsemeter::app::events::MeterEvent;
use pulsemeter::config::MeterConfig;
use pulsemeter::error::ConfigError;
use pulsemeter::mqtt::discovery::Topics;
use pulsemeter::scheduler::{Runtime, StopSignal};

use crate::mock_hw::{CyclingSensor, MockBroker, MockLed, RecordingSink, Sent};

fn fast_config() -> MeterConfig {
    MeterConfig {
        sample_interval_ms: 5,
        sensor_timeout_ms: 20,
        debounce_ms: 0,
        publish_interval_secs: 1,
        connect_timeout_ms: 200,
        ack_timeout_ms: 100,
        ..MeterConfig::default()
    }
}

struct Rig {
    broker: MockBroker,
    led: MockLed,
    sink: RecordingSink,
    topics: Topics,
}

/// Run a runtime built from `config` for `ms` milliseconds, then stop it.
fn run_for(config: MeterConfig, broker: MockBroker, ms: u64) -> Rig {
    let led = MockLed::new();
    let sink = RecordingSink::new();
    let topics = Topics::new(&config);
    let runtime = Runtime::new(
        config,
        CyclingSensor::blinking(100, 0),
        broker.clone(),
        led.clone(),
        MonotonicClock::new(),
        sink.clone(),
    )
    .unwrap();

    let stop = StopSignal::new();
    block_on(zip(runtime.run(&stop), async {
        async_io_mini::Timer::after(Duration::from_millis(ms)).await;
        stop.request();
    }));

    Rig {
        broker,
        led,
        sink,
        topics,
    }
}

#[test]
fn counts_pulses_and_publishes_state() {
    let r = run_for(fast_config(), MockBroker::new(), 1_300);

    let events = r.sink.events();
    assert_eq!(events.first(), Some(&MeterEvent::Started));

    let counts: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            MeterEvent::Pulse { count, .. } => Some(*count),
            _ => None,
        })
        .collect();
    assert!(counts.len() >= 10, "only {} pulses counted", counts.len());
    assert!(
        counts.iter().zip(1u64..).all(|(c, expected)| *c == expected),
        "pulse count must step by one"
    );

    let state = r.broker.publishes_to(&r.topics.state);
    assert!(state.len() >= 2, "startup and periodic publish expected");
    let doc: serde_json::Value = serde_json::from_str(state.last().unwrap().payload_str()).unwrap();
    let pulses = doc["pulses"].as_u64().unwrap();
    assert!(pulses > 0);
    assert!((doc["energy_wh"].as_f64().unwrap() - pulses as f64).abs() < 1e-9);
}

#[test]
fn stop_takes_device_offline() {
    let r = run_for(fast_config(), MockBroker::new(), 300);

    let notices = r.broker.publishes_to(&r.topics.availability);
    assert_eq!(notices.first().unwrap().payload_str(), "online");
    assert_eq!(notices.last().unwrap().payload_str(), "offline");
    assert_eq!(r.broker.sent().last(), Some(&Sent::Disconnect));

    let levels = r.led.levels();
    assert!(levels.contains(&true), "connected light shown");
    assert_eq!(levels.last(), Some(&false), "light off after stop");
}

#[test]
fn publish_command_triggers_immediate_state() {
    let config = MeterConfig {
        publish_interval_secs: 3_600,
        ..fast_config()
    };
    let broker = MockBroker::new();
    broker.deliver_on_subscribe(&Topics::new(&config).command, b"publish");

    let r = run_for(config, broker, 400);

    assert_eq!(
        r.sink
            .count(|e| *e == MeterEvent::Command(RemoteCommand::PublishNow)),
        1
    );
    assert_eq!(
        r.broker.publishes_to(&r.topics.state).len(),
        2,
        "startup publish plus one on command"
    );
}

#[test]
fn unreachable_broker_keeps_counting() {
    let broker = MockBroker::new();
    broker.fail_next_connects(u32::MAX);

    let r = run_for(fast_config(), broker, 300);

    assert!(r.broker.publishes().is_empty());
    assert!(r.sink.count(|e| matches!(e, MeterEvent::Buffered { .. })) >= 1);
    assert!(r.sink.count(|e| matches!(e, MeterEvent::Pulse { .. })) >= 5);
    assert_eq!(r.sink.count(|e| matches!(e, MeterEvent::Published { .. })), 0);
    assert!(r.led.levels().contains(&true), "backoff blink shown");
}

#[test]
fn invalid_config_rejected() {
    let config = MeterConfig {
        threshold_low: 50,
        threshold_high: 40,
        ..MeterConfig::default()
    };
    let built = Runtime::new(
        config,
        CyclingSensor::blinking(100, 0),
        MockBroker::new(),
        MockLed::new(),
        MonotonicClock::new(),
        RecordingSink::new(),
    );
    assert!(matches!(built, Err(ConfigError::ValidationFailed(_))));
}
