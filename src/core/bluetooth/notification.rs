//! Notification handling for the lamp
//! This module decodes status notifications pushed by the lamp and hands
//! them to the device state machine.

use std::sync::Arc;

use log::{debug, warn};
use serde::Serialize;

use crate::core::bluetooth::constants::{
    MIN_NOTIFICATION_LEN, RGB_NOTIFICATION_LEN, VERSION_DEVICE_OFF, VERSION_RGB, VERSION_SHUTDOWN,
    VERSION_WHITE,
};
use crate::core::bluetooth::types::{Effect, Rgb};
use crate::core::device::{DeviceStateMachine, StateEvent};

/// Status of the white panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WhiteStatus {
    pub on: bool,
    /// Present only while on and when the buffer carries byte 10
    pub brightness_pct: Option<u8>,
}

/// Sleep timer as reported in the RGB status. The layout is inferred from
/// probing and may not hold for every firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TimerStatus {
    pub active: bool,
    pub minutes: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RgbDetails {
    pub brightness_pct: u8,
    pub rgb: Rgb,
    pub effect: Effect,
    pub timer: TimerStatus,
}

/// Status of the RGB light
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RgbStatus {
    pub on: bool,
    /// Present only while on and when the buffer carries all 17 bytes
    pub details: Option<RgbDetails>,
}

/// A decoded notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Notification {
    White(WhiteStatus),
    Rgb(RgbStatus),
    /// The lamp switched itself off
    DeviceOff,
    /// The lamp is shutting down; the link should be torn down
    Shutdown,
    /// A version tag this crate does not understand
    Unknown(u8),
    /// Shorter than the minimum notification length
    Malformed { len: usize },
}

/// Decodes a notification buffer. Total over its input: never panics, never fails.
pub fn decode(data: &[u8]) -> Notification {
    if data.len() < MIN_NOTIFICATION_LEN {
        return Notification::Malformed { len: data.len() };
    }

    let on = data[9] == 1;
    match data[8] {
        VERSION_WHITE => Notification::White(WhiteStatus {
            on,
            brightness_pct: if on { data.get(10).copied() } else { None },
        }),
        VERSION_RGB => {
            let details = if on && data.len() >= RGB_NOTIFICATION_LEN {
                Some(RgbDetails {
                    brightness_pct: data[10],
                    rgb: (data[13], data[14], data[15]),
                    effect: Effect::from_index(data[16]),
                    timer: TimerStatus {
                        active: data[11] == 1,
                        minutes: data[12],
                    },
                })
            } else {
                None
            };
            Notification::Rgb(RgbStatus { on, details })
        }
        VERSION_DEVICE_OFF => Notification::DeviceOff,
        VERSION_SHUTDOWN => Notification::Shutdown,
        other => Notification::Unknown(other),
    }
}

/// Hex rendering used in logs and diagnostics
pub fn to_hex(data: &[u8]) -> String {
    data.iter().map(|byte| format!("{:02x}", byte)).collect()
}

/// Notification handler for lamp status data
#[derive(Clone)]
pub struct NotificationHandler {
    device: Arc<DeviceStateMachine>,
}

impl NotificationHandler {
    /// Create a new NotificationHandler
    pub fn new(device: Arc<DeviceStateMachine>) -> Self {
        Self { device }
    }

    /// Decode one buffer and apply it to the device state.
    ///
    /// Returns the decoded notification so the caller can react to `Shutdown`.
    pub fn handle(&self, data: &[u8]) -> Notification {
        let hex = to_hex(data);
        debug!("Received lamp data: {}", hex);
        self.device.record_raw(hex);

        let notification = decode(data);
        match notification {
            Notification::Malformed { len } => {
                warn!("Short notification ({} bytes), ignoring", len);
            }
            Notification::Unknown(tag) => {
                debug!("Unknown notification version {}, ignoring", tag);
            }
            Notification::Shutdown => {
                debug!("Lamp is shutting down");
            }
            other => {
                debug!("Parsed lamp notification: {:?}", other);
                self.device.apply(StateEvent::Notified(other));
            }
        }
        notification
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(len: usize, tag: u8, on: u8) -> Vec<u8> {
        let mut data = vec![0u8; len];
        data[8] = tag;
        data[9] = on;
        data
    }

    #[test]
    fn short_buffers_are_malformed() {
        for len in 0..MIN_NOTIFICATION_LEN {
            assert_eq!(decode(&vec![1u8; len]), Notification::Malformed { len });
        }
    }

    #[test]
    fn white_status_without_brightness_byte() {
        let data = buffer(10, 1, 1);
        assert_eq!(
            decode(&data),
            Notification::White(WhiteStatus { on: true, brightness_pct: None })
        );
    }

    #[test]
    fn white_status_off_drops_brightness() {
        let mut data = buffer(11, 1, 0);
        data[10] = 55;
        assert_eq!(
            decode(&data),
            Notification::White(WhiteStatus { on: false, brightness_pct: None })
        );
    }

    #[test]
    fn rgb_status_full() {
        let mut data = buffer(17, 2, 1);
        data[10] = 100;
        data[11] = 1;
        data[12] = 15;
        data[13] = 10;
        data[14] = 20;
        data[15] = 30;
        data[16] = 3;
        let Notification::Rgb(status) = decode(&data) else {
            panic!("expected rgb status");
        };
        let details = status.details.unwrap();
        assert!(status.on);
        assert_eq!(details.brightness_pct, 100);
        assert_eq!(details.rgb, (10, 20, 30));
        assert_eq!(details.effect.name(), "Rainbow Slow");
        assert_eq!(details.timer, TimerStatus { active: true, minutes: 15 });
    }

    #[test]
    fn rgb_effect_out_of_range_is_off() {
        let mut data = buffer(17, 2, 1);
        data[16] = 42;
        let Notification::Rgb(RgbStatus { details: Some(details), .. }) = decode(&data) else {
            panic!("expected rgb details");
        };
        assert_eq!(details.effect, Effect::OFF);
    }

    #[test]
    fn rgb_status_truncated() {
        assert_eq!(
            decode(&buffer(12, 2, 1)),
            Notification::Rgb(RgbStatus { on: true, details: None })
        );
    }

    #[test]
    fn other_tags() {
        assert_eq!(decode(&buffer(10, 255, 0)), Notification::DeviceOff);
        assert_eq!(decode(&buffer(10, 0, 0)), Notification::Shutdown);
        assert_eq!(decode(&buffer(10, 7, 0)), Notification::Unknown(7));
    }

    #[test]
    fn hex_rendering() {
        assert_eq!(to_hex(&[0xfe, 0x0a, 0x00]), "fe0a00");
    }
}
