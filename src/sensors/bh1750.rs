//! BH1750 ambient-light sensor.
//!
//! I²C address 0x23 (ADDR pin low).  The sensor is put into continuous
//! low-resolution mode (4 lx steps, ~16 ms per conversion), which is fast
//! enough to resolve a meter LED blink at 10 Hz sampling.  Each read
//! returns the latest conversion as a big-endian 16-bit count.
//!
//! ## Dual-target design
//!
//! Generic over `embedded_hal::i2c::I2c`: an ESP-IDF `I2cDriver` on the
//! device, a scripted bus in tests.

use embedded_hal::i2c::I2c;
use log::{debug, info};

use crate::app::ports::LightSensor;
use crate::error::SensorError;

/// Default bus address (ADDR pin tied low).
pub const DEFAULT_ADDRESS: u8 = 0x23;

/// Continuous low-resolution measurement mode.
pub const CMD_CONTINUOUS_LOW_RES: u8 = 0x13;

pub const CMD_POWER_ON: u8 = 0x01;

/// All-ones is what a floating bus reads back.
const SATURATED: u16 = 0xFFFF;

pub struct Bh1750<B: I2c> {
    bus: B,
    address: u8,
}

impl<B: I2c> Bh1750<B> {
    pub fn new(bus: B) -> Self {
        Self::with_address(bus, DEFAULT_ADDRESS)
    }

    pub fn with_address(bus: B, address: u8) -> Self {
        Self { bus, address }
    }

    pub fn release(self) -> B {
        self.bus
    }
}

impl<B: I2c> LightSensor for Bh1750<B> {
    fn start(&mut self) -> Result<(), SensorError> {
        self.bus
            .write(self.address, &[CMD_POWER_ON])
            .and_then(|()| self.bus.write(self.address, &[CMD_CONTINUOUS_LOW_RES]))
            .map_err(|e| {
                debug!("Sensor: start command failed: {:?}", e);
                SensorError::ReadFailed
            })?;
        info!("Sensor: BH1750 at 0x{:02x} in continuous low-res mode", self.address);
        Ok(())
    }

    async fn read(&mut self) -> Result<u16, SensorError> {
        let mut raw = [0u8; 2];
        self.bus.read(self.address, &mut raw).map_err(|e| {
            debug!("Sensor: read failed: {:?}", e);
            SensorError::ReadFailed
        })?;
        match u16::from_be_bytes(raw) {
            SATURATED => Err(SensorError::OutOfRange),
            v => Ok(v),
        }
    }
}
