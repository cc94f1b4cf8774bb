//! Beurer daylight lamp library
//! Bluetooth LE control of Beurer daylight therapy lamps: colour and white
//! control, sunrise/sunset simulation and daily light therapy tracking.

// Module declarations
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod utils;

#[cfg(any(test, feature = "testing-support"))]
pub mod testing;

pub use crate::config::LampConfig;
pub use crate::core::bluetooth::{BluestTransport, ConnectionState, Effect, LampTransport, Mode};
pub use crate::core::{DeviceState, Lamp, LampRegistry, SimulationOutcome, SunriseProfile};
pub use crate::error::{LampError, Result};
