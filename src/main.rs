//! Pulse meter firmware: main entry point.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  Bh1750 (I2C)   TcpTransport   StatusLed (GPIO)                │
//! │  MonotonicClock LogEventSink   SyslogLogger (log backend)      │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │  Runtime: sampling · publish · connection · status     │    │
//! │  │  PulseDetector · EnergyAccumulator · MessagingSession  │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The wireless link is brought up by the board bootstrap before this
//! binary's tasks start; the session only needs a routable broker.
#![deny(unused_must_use)]

use anyhow::{Context, Result};
use log::{LevelFilter, info};

use esp_idf_hal::gpio::PinDriver;
use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::units::Hertz;

use pulsemeter::adapters::log_sink::LogEventSink;
use pulsemeter::adapters::syslog::SyslogLogger;
use pulsemeter::adapters::tcp_transport::TcpTransport;
use pulsemeter::adapters::time::MonotonicClock;
use pulsemeter::config::MeterConfig;
use pulsemeter::drivers::status_led::StatusLed;
use pulsemeter::error::Error;
use pulsemeter::scheduler::{Runtime, StopSignal};
use pulsemeter::sensors::Bh1750;

/// I2C clock for the light sensor.  The probe cable to the meter face can
/// be long, so stay at standard mode.
const I2C_BAUD_HZ: u32 = 100_000;

/// Build-time configuration document, if any.
const CONFIG_JSON: Option<&str> = option_env!("PULSEMETER_CONFIG");

fn load_config() -> Result<MeterConfig> {
    match CONFIG_JSON {
        Some(doc) => MeterConfig::from_json(doc)
            .map_err(Error::from)
            .context("PULSEMETER_CONFIG"),
        None => Ok(MeterConfig::default()),
    }
}

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();

    // ── 2. Configuration ──────────────────────────────────────
    // Invalid configuration is fatal before anything touches the network.
    let config = load_config()?;
    config
        .validate()
        .map_err(Error::from)
        .context("configuration rejected")?;

    SyslogLogger::new(
        &config.syslog_hostname,
        "pulsemeter",
        config.syslog_port,
        LevelFilter::Info,
    )
    .install()
    .map_err(|e| anyhow::anyhow!("logger: {}", e))?;

    info!("╔══════════════════════════════════════╗");
    info!("║  Pulse meter v{}                  ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");
    info!(
        "Config: broker {}:{}, {} Wh/pulse, thresholds {}/{}",
        config.broker_host,
        config.broker_port,
        config.wh_per_pulse,
        config.threshold_low,
        config.threshold_high
    );

    // ── 3. Peripherals ────────────────────────────────────────
    let peripherals = Peripherals::take()?;
    let i2c = I2cDriver::new(
        peripherals.i2c0,
        peripherals.pins.gpio21,
        peripherals.pins.gpio22,
        &I2cConfig::new().baudrate(Hertz(I2C_BAUD_HZ)),
    )?;
    let sensor = Bh1750::new(i2c);
    let led = StatusLed::new(PinDriver::output(peripherals.pins.gpio2)?);

    // ── 4. Runtime ────────────────────────────────────────────
    let runtime = Runtime::new(
        config,
        sensor,
        TcpTransport::new(),
        led,
        MonotonicClock::new(),
        LogEventSink::new(),
    )
    .map_err(Error::from)?;

    // Never requested on the device; power loss is the only shutdown.
    let stop = StopSignal::new();
    runtime.run_blocking(&stop);
    Ok(())
}
