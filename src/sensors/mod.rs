//! Sensor drivers implementing the [`LightSensor`](crate::app::ports::LightSensor) port.

pub mod bh1750;

pub use bh1750::Bh1750;
