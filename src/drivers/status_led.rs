//! Monochrome status LED driver.
//!
//! Drives any `embedded-hal` output pin (an ESP-IDF `PinDriver` on the
//! device, a mock in tests).  Only level changes touch the pin.

use embedded_hal::digital::OutputPin;
use log::debug;

use crate::app::ports::StatusIndicator;

pub struct StatusLed<P: OutputPin> {
    pin: P,
    current: Option<bool>,
    active_low: bool,
}

impl<P: OutputPin> StatusLed<P> {
    pub fn new(pin: P) -> Self {
        Self {
            pin,
            current: None,
            active_low: false,
        }
    }

    /// For LEDs wired between the pin and the supply rail.
    pub fn active_low(pin: P) -> Self {
        Self {
            active_low: true,
            ..Self::new(pin)
        }
    }

    pub fn is_on(&self) -> bool {
        self.current == Some(true)
    }

    pub fn release(self) -> P {
        self.pin
    }
}

impl<P: OutputPin> StatusIndicator for StatusLed<P> {
    fn set(&mut self, on: bool) {
        if self.current == Some(on) {
            return;
        }
        let drive_high = on != self.active_low;
        let result = if drive_high {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        match result {
            Ok(()) => self.current = Some(on),
            Err(e) => debug!("LED: pin write failed: {:?}", e),
        }
    }
}
