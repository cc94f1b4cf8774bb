use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::constants::{
    SIMULATION_MAX_CONSECUTIVE_FAILURES, SIMULATION_RETRY_ATTEMPTS, SIMULATION_RETRY_DELAY_MS,
    SUNSET_KELVIN,
};

/// Retry budget and colours of the sunrise/sunset loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Attempts per step, reconnecting before each one if needed
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    /// Failed steps in a row after which the simulation gives up
    pub max_consecutive_failures: u32,
    pub sunset_kelvin: u32,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            retry_attempts: SIMULATION_RETRY_ATTEMPTS,
            retry_delay_ms: SIMULATION_RETRY_DELAY_MS,
            max_consecutive_failures: SIMULATION_MAX_CONSECUTIVE_FAILURES,
            sunset_kelvin: SUNSET_KELVIN,
        }
    }
}

impl SimulationSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Light therapy goal and qualification thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TherapySettings {
    pub daily_goal_minutes: u32,
    /// Sessions at or above this colour temperature count
    pub min_kelvin: u32,
    /// Sessions at or above this brightness count
    pub min_brightness_pct: u8,
    /// Closed sessions older than this are dropped on cleanup
    pub retention_days: i64,
}

impl Default for TherapySettings {
    fn default() -> Self {
        Self {
            daily_goal_minutes: 30,
            min_kelvin: 5000,
            min_brightness_pct: 80,
            retention_days: 7,
        }
    }
}
