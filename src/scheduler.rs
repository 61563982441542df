//! Cooperative task runtime.
//!
//! Runs the meter as four tasks on one `edge-executor` executor, with
//! `async-io-mini` reactor timers for every wait:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  futures_lite::future::block_on                              │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │  edge_executor::LocalExecutor                          │  │
//! │  │                                                        │  │
//! │  │  ┌──────────┐  pulses  ┌─────────────┐                 │  │
//! │  │  │ Sampling │────────▶ │ Accumulator │                 │  │
//! │  │  │ 100ms ⏱  │          └──────┬──────┘                 │  │
//! │  │  └──────────┘                 │ snapshot               │  │
//! │  │                        ┌──────▼──────┐                 │  │
//! │  │                        │  Publish    │ 30s ⏱ / command │  │
//! │  │                        └──────┬──────┘                 │  │
//! │  │                               │ outbox (1 slot)        │  │
//! │  │  ┌──────────┐  state   ┌──────▼──────┐                 │  │
//! │  │  │ Status   │◀──────── │ Connection  │ session, 50ms ⏱ │  │
//! │  │  │ 40ms ⏱   │          └─────────────┘                 │  │
//! │  │  └──────────┘                                          │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only the connection task touches the session.  It mirrors every state
//! transition into a shared cell for the status task.  The outbox is a
//! single-slot signal: a newer snapshot replaces one the connection task
//! has not picked up yet.

use core::cell::{Cell, RefCell};
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use std::rc::Rc;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::signal::Signal;
use futures_lite::future::or;
use log::{debug, info, warn};

use crate::app::commands::RemoteCommand;
use crate::app::events::MeterEvent;
use crate::app::ports::{Clock, EventSink, LightSensor, StatusIndicator, Transport};
use crate::config::MeterConfig;
use crate::detector::PulseDetector;
use crate::drivers::led_patterns::{LedPatternEngine, PatternId};
use crate::energy::{EnergyAccumulator, SharedAccumulator};
use crate::error::ConfigError;
use crate::mqtt::discovery::{Topics, state_message};
use crate::mqtt::{ConnectionState, MessagingSession, OutboundMessage, QoS};

/// Connection task wake-up when idle.
const MAINTENANCE_TICK: Duration = Duration::from_millis(50);

/// Status LED refresh period.
const STATUS_TICK_MS: u32 = 40;

/// How often waiting tasks look at the stop flag.
const STOP_POLL: Duration = Duration::from_millis(20);

// ═══════════════════════════════════════════════════════════════
//  Stop signal
// ═══════════════════════════════════════════════════════════════

/// Shared shutdown request.  Each task exits at its next yield point.
#[derive(Debug, Default)]
pub struct StopSignal {
    requested: AtomicBool,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Resolve once a stop has been requested.
    pub async fn wait(&self) {
        while !self.is_requested() {
            async_io_mini::Timer::after(STOP_POLL).await;
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Shared task state
// ═══════════════════════════════════════════════════════════════

struct Shared<C, E> {
    clock: C,
    accumulator: SharedAccumulator,
    /// Latest snapshot waiting for the connection task.
    outbox: Signal<NoopRawMutex, OutboundMessage>,
    /// Remote `publish` command.
    publish_now: Signal<NoopRawMutex, ()>,
    /// Mirror of the session state, written by the connection task.
    connection: Cell<ConnectionState>,
    last_pulse_ms: Cell<Option<u64>>,
    sink: RefCell<E>,
}

impl<C, E: EventSink> Shared<C, E> {
    fn emit(&self, event: &MeterEvent) {
        self.sink.borrow_mut().emit(event);
    }
}

/// Event sink handed to the session.  Mirrors connection transitions
/// before forwarding, so readers see `Connecting` while a handshake is in
/// flight.
struct SessionSink<'a, C, E> {
    shared: &'a Shared<C, E>,
}

impl<C, E: EventSink> EventSink for SessionSink<'_, C, E> {
    fn emit(&mut self, event: &MeterEvent) {
        if let MeterEvent::ConnectionChanged { to, .. } = event {
            self.shared.connection.set(*to);
        }
        self.shared.emit(event);
    }
}

/// LED pattern for a session state.
pub fn pattern_for(state: ConnectionState) -> PatternId {
    match state {
        ConnectionState::Connected { .. } => PatternId::Solid,
        ConnectionState::Backoff { .. } => PatternId::SlowBlink,
        ConnectionState::Connecting => PatternId::FastBlink,
        ConnectionState::Disconnected => PatternId::Off,
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tasks
// ═══════════════════════════════════════════════════════════════

async fn sampling_task<S, C, E>(
    mut detector: PulseDetector<S>,
    shared: Rc<Shared<C, E>>,
    period: Duration,
    stop: &StopSignal,
) where
    S: LightSensor,
    C: Clock,
    E: EventSink,
{
    if let Err(e) = detector.start() {
        warn!("Sensor: start failed: {}", e);
    }

    while !stop.is_requested() {
        let now = shared.clock.now_ms();
        match detector.poll(now).await {
            Ok(Some(pulse)) => {
                let count = shared.accumulator.record(pulse);
                shared.last_pulse_ms.set(Some(pulse.timestamp_ms));
                shared.emit(&MeterEvent::Pulse {
                    count,
                    timestamp_ms: pulse.timestamp_ms,
                });
            }
            Ok(None) => {}
            Err(e) => shared.emit(&MeterEvent::SampleDropped(e)),
        }
        async_io_mini::Timer::after(period).await;
    }
    debug!("Sched: sampling task stopped");
}

struct PublishPlan {
    topics: Topics,
    period: Duration,
    qos: QoS,
    retain: bool,
}

async fn publish_task<C, E>(plan: PublishPlan, shared: Rc<Shared<C, E>>, stop: &StopSignal)
where
    C: Clock,
    E: EventSink,
{
    while !stop.is_requested() {
        let snapshot = shared.accumulator.snapshot(shared.clock.now_ms());
        match state_message(&snapshot, &plan.topics, plan.qos, plan.retain) {
            Ok(msg) => shared.outbox.signal(msg),
            Err(e) => warn!("Sched: state message not built: {}", e),
        }

        or(
            async {
                async_io_mini::Timer::after(plan.period).await;
            },
            or(shared.publish_now.wait(), stop.wait()),
        )
        .await;
    }
    debug!("Sched: publish task stopped");
}

async fn connection_task<T, C, E>(
    mut session: MessagingSession<T, C>,
    shared: Rc<Shared<C, E>>,
    stop: &StopSignal,
) where
    T: Transport,
    C: Clock,
    E: EventSink,
{
    let mut sink = SessionSink { shared: &*shared };

    while !stop.is_requested() {
        session.maintain(&mut sink).await;

        while let Some(cmd) = session.take_command() {
            match cmd {
                RemoteCommand::PublishNow => shared.publish_now.signal(()),
            }
        }

        let next = or(async { Some(shared.outbox.wait().await) }, async {
            async_io_mini::Timer::after(MAINTENANCE_TICK).await;
            None
        })
        .await;

        if let Some(msg) = next {
            if let Err(e) = session.publish(msg, &mut sink).await {
                debug!("Sched: publish deferred: {}", e);
            }
        }
    }

    session.shutdown().await;
    debug!("Sched: connection task stopped");
}

async fn status_task<L, C, E>(mut led: L, shared: Rc<Shared<C, E>>, stop: &StopSignal)
where
    L: StatusIndicator,
{
    let mut engine = LedPatternEngine::new();
    let mut seen_pulse = None;
    let tick = Duration::from_millis(u64::from(STATUS_TICK_MS));

    while !stop.is_requested() {
        engine.set_connection_pattern(pattern_for(shared.connection.get()));
        let last_pulse = shared.last_pulse_ms.get();
        if last_pulse != seen_pulse {
            seen_pulse = last_pulse;
            engine.trigger_activity();
        }
        led.set(engine.tick(STATUS_TICK_MS));
        async_io_mini::Timer::after(tick).await;
    }
    led.set(false);
}

// ═══════════════════════════════════════════════════════════════
//  Runtime
// ═══════════════════════════════════════════════════════════════

/// The wired-up meter: detector, session and status light plus the
/// configuration they run with.
pub struct Runtime<S, T, L, C, E>
where
    S: LightSensor,
    T: Transport,
    L: StatusIndicator,
    C: Clock + Clone,
    E: EventSink,
{
    config: MeterConfig,
    detector: PulseDetector<S>,
    session: MessagingSession<T, C>,
    led: L,
    clock: C,
    sink: E,
}

impl<S, T, L, C, E> Runtime<S, T, L, C, E>
where
    S: LightSensor,
    T: Transport,
    L: StatusIndicator,
    C: Clock + Clone,
    E: EventSink,
{
    /// Validate the configuration and wire the components.
    pub fn new(
        config: MeterConfig,
        sensor: S,
        transport: T,
        led: L,
        clock: C,
        sink: E,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let detector = PulseDetector::new(sensor, &config)?;
        let session = MessagingSession::new(transport, clock.clone(), &config);
        Ok(Self {
            config,
            detector,
            session,
            led,
            clock,
            sink,
        })
    }

    /// Run all tasks until `stop` is requested.
    pub async fn run(self, stop: &StopSignal) {
        let Self {
            config,
            detector,
            session,
            led,
            clock,
            sink,
        } = self;

        let plan = PublishPlan {
            topics: session.topics().clone(),
            period: Duration::from_secs(u64::from(config.publish_interval_secs)),
            qos: QoS::try_from(config.state_qos).unwrap_or(QoS::AtMostOnce),
            retain: config.state_retain,
        };
        let sample_period = Duration::from_millis(u64::from(config.sample_interval_ms));

        let shared = Rc::new(Shared {
            clock,
            accumulator: SharedAccumulator::new(EnergyAccumulator::from_config(&config)),
            outbox: Signal::new(),
            publish_now: Signal::new(),
            connection: Cell::new(session.state()),
            last_pulse_ms: Cell::new(None),
            sink: RefCell::new(sink),
        });

        let executor: edge_executor::LocalExecutor<'_, 8> = edge_executor::LocalExecutor::new();
        let tasks = [
            executor.spawn(sampling_task(detector, shared.clone(), sample_period, stop)),
            executor.spawn(publish_task(plan, shared.clone(), stop)),
            executor.spawn(connection_task(session, shared.clone(), stop)),
            executor.spawn(status_task(led, shared.clone(), stop)),
        ];

        info!(
            "Sched: started (sample {} ms, publish {} s)",
            config.sample_interval_ms, config.publish_interval_secs
        );
        shared.emit(&MeterEvent::Started);

        executor
            .run(async {
                for task in tasks {
                    task.await;
                }
            })
            .await;
        info!("Sched: stopped");
    }

    /// Drive [`run`](Self::run) on the current thread.
    pub fn run_blocking(self, stop: &StopSignal) {
        futures_lite::future::block_on(self.run(stop));
    }
}
