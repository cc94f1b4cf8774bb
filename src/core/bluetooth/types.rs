//! Defines shared data structures for the Bluetooth module.

use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

use crate::core::bluetooth::constants::{EFFECTS, MODE_RGB, MODE_WHITE};

/// An RGB colour triple
pub type Rgb = (u8, u8, u8);

/// The lamp's exclusive operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// The daylight panel
    #[default]
    White,
    /// The RGB mood light
    Rgb,
}

impl Mode {
    /// Mode byte as carried in command arguments
    pub fn to_byte(self) -> u8 {
        match self {
            Self::White => MODE_WHITE,
            Self::Rgb => MODE_RGB,
        }
    }
}

/// A light effect, stored as its protocol index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Effect(u8);

impl Effect {
    pub const OFF: Effect = Effect(0);

    /// Maps a protocol index to an effect; out-of-range indices fall back to "Off".
    pub fn from_index(index: u8) -> Self {
        if (index as usize) < EFFECTS.len() {
            Self(index)
        } else {
            Self::OFF
        }
    }

    /// Lookup by name, ignoring case and surrounding whitespace
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        EFFECTS
            .iter()
            .position(|candidate| candidate.eq_ignore_ascii_case(name))
            .map(|index| Self(index as u8))
    }

    /// Lookup by name, falling back to "Off" for names the lamp does not know.
    pub fn resolve(name: &str) -> Self {
        Self::from_name(name).unwrap_or_else(|| {
            warn!("Effect '{}' not found, defaulting to 'Off'", name);
            Self::OFF
        })
    }

    pub fn index(self) -> u8 {
        self.0
    }

    pub fn name(self) -> &'static str {
        EFFECTS[self.0 as usize]
    }

    /// All effect names in protocol order
    pub fn names() -> &'static [&'static str] {
        &EFFECTS
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Effect {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Link state of one peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// The characteristic pair located on a successful connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LampCharacteristics {
    /// Commands are written here
    pub write: Uuid,
    /// Status notifications arrive here
    pub notify: Uuid,
}
