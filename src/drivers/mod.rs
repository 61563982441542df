//! Status light driver and its pattern engine.

pub mod led_patterns;
pub mod status_led;
