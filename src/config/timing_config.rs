use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::constants::{
    COMMAND_DELAY_MS, CONNECT_TIMEOUT_SECS, DEVICE_LOOKUP_TIMEOUT_SECS, EFFECT_DELAY_MS,
    MIN_COMMAND_INTERVAL_MS, MODE_CHANGE_DELAY_MS, POLL_INTERVAL_OFF_SECS, POLL_INTERVAL_ON_SECS,
    POLL_INTERVAL_UNAVAILABLE_SECS, STATUS_DELAY_MS, TURN_OFF_DELAY_MS, TURN_OFF_STEP_DELAY_MS,
    WRITE_TIMEOUT_SECS,
};
use crate::core::device::DeviceState;

/// Delays the lamp firmware needs between dependent commands.
/// Commands sent faster than this are silently dropped by the lamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolTiming {
    /// After colour, brightness and mode-activate frames inside a sequence
    pub command_delay_ms: u64,
    /// After activating a mode in turn-on and after colour brightness
    pub mode_change_delay_ms: u64,
    /// After selecting an effect
    pub effect_delay_ms: u64,
    /// Between the white and the RGB status request
    pub status_delay_ms: u64,
    /// After the off frames, before asking for status
    pub turn_off_delay_ms: u64,
    /// Between the white and the RGB off frame
    pub turn_off_step_delay_ms: u64,
    /// Floor on the spacing of any two frames
    pub min_command_interval_ms: u64,
}

impl Default for ProtocolTiming {
    fn default() -> Self {
        Self {
            command_delay_ms: COMMAND_DELAY_MS,
            mode_change_delay_ms: MODE_CHANGE_DELAY_MS,
            effect_delay_ms: EFFECT_DELAY_MS,
            status_delay_ms: STATUS_DELAY_MS,
            turn_off_delay_ms: TURN_OFF_DELAY_MS,
            turn_off_step_delay_ms: TURN_OFF_STEP_DELAY_MS,
            min_command_interval_ms: MIN_COMMAND_INTERVAL_MS,
        }
    }
}

impl ProtocolTiming {
    pub fn command_delay(&self) -> Duration {
        Duration::from_millis(self.command_delay_ms)
    }

    pub fn mode_change_delay(&self) -> Duration {
        Duration::from_millis(self.mode_change_delay_ms)
    }

    pub fn effect_delay(&self) -> Duration {
        Duration::from_millis(self.effect_delay_ms)
    }

    pub fn status_delay(&self) -> Duration {
        Duration::from_millis(self.status_delay_ms)
    }

    pub fn turn_off_delay(&self) -> Duration {
        Duration::from_millis(self.turn_off_delay_ms)
    }

    pub fn turn_off_step_delay(&self) -> Duration {
        Duration::from_millis(self.turn_off_step_delay_ms)
    }

    pub fn min_command_interval(&self) -> Duration {
        Duration::from_millis(self.min_command_interval_ms)
    }
}

/// Bounds on link operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub connect_timeout_secs: u64,
    /// How long to look for the address before giving up
    pub device_lookup_timeout_secs: u64,
    pub write_timeout_secs: u64,
    /// Status refresh interval while lit
    pub poll_on_secs: u64,
    /// Status refresh interval while off
    pub poll_off_secs: u64,
    /// Reconnect-and-refresh interval while unreachable
    pub poll_unavailable_secs: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            device_lookup_timeout_secs: DEVICE_LOOKUP_TIMEOUT_SECS,
            write_timeout_secs: WRITE_TIMEOUT_SECS,
            poll_on_secs: POLL_INTERVAL_ON_SECS,
            poll_off_secs: POLL_INTERVAL_OFF_SECS,
            poll_unavailable_secs: POLL_INTERVAL_UNAVAILABLE_SECS,
        }
    }
}

impl ConnectionSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn device_lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.device_lookup_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    /// Status poll interval for the lamp's current state
    pub fn poll_interval(&self, state: &DeviceState) -> Duration {
        let secs = match state.power() {
            None => self.poll_unavailable_secs,
            Some(true) => self.poll_on_secs,
            Some(false) => self.poll_off_secs,
        };
        Duration::from_secs(secs.max(1))
    }
}
