//! Core functionality for Beurer daylight lamps
//! This module contains the protocol, state tracking, control sequences,
//! light simulations and therapy tracking for one or more lamps.

pub mod bluetooth;
pub mod controller;
pub mod device;
pub mod lamp;
pub mod simulation;
pub mod therapy;

// Re-export commonly used types
pub use controller::LampController;
pub use device::{DeviceState, DeviceStateMachine, UpdateCallback};
pub use lamp::{Lamp, LampRegistry};
pub use simulation::{SimulationOutcome, SimulationScheduler, SunriseProfile};
pub use therapy::{TherapySession, TherapyTracker};
