//! Application boundary: port traits, events and commands.
//!
//! The meter core (detector, accumulator, session, scheduler) talks to
//! the outside world exclusively through the **port traits** defined in
//! [`ports`], keeping it fully testable without real peripherals.

pub mod commands;
pub mod events;
pub mod ports;
