//! Constants used throughout the lamp protocol
//! This module contains the GATT UUIDs, protocol opcodes and the default
//! timing values the lamp firmware depends on.

use uuid::Uuid;

/// The UUID of the characteristic commands are written to
pub const UUID_LAMP_WRITE_CHAR: Uuid = Uuid::from_u128(0x8b00ace7_eb0b_49b0_bbe9_9aee0a26e1a3);

/// The UUID of the characteristic status notifications arrive on
pub const UUID_LAMP_NOTIFY_CHAR: Uuid = Uuid::from_u128(0x0734594a_a8e7_4b1a_a6b1_cd5243059a57);

/// Frame header preceding the length byte
pub const FRAME_HEADER: [u8; 3] = [0xFE, 0xEF, 0x0A];

/// Marker between the length byte and the payload length
pub const FRAME_MARKER: [u8; 2] = [0xAB, 0xAA];

/// Frame trailer following the checksum
pub const FRAME_TRAILER: [u8; 3] = [0x55, 0x0D, 0x0A];

/// Protocol opcodes
pub const CMD_STATUS: u8 = 0x30;
pub const CMD_BRIGHTNESS: u8 = 0x31;
pub const CMD_COLOR: u8 = 0x32;
pub const CMD_EFFECT: u8 = 0x34;
pub const CMD_OFF: u8 = 0x35;
pub const CMD_MODE: u8 = 0x37;
/// Experimental: the argument layout has not been confirmed on hardware
pub const CMD_TIMER: u8 = 0x3E;

/// Mode bytes
pub const MODE_WHITE: u8 = 0x01;
pub const MODE_RGB: u8 = 0x02;

/// Notification version tags (byte 8)
pub const VERSION_SHUTDOWN: u8 = 0;
pub const VERSION_WHITE: u8 = 1;
pub const VERSION_RGB: u8 = 2;
pub const VERSION_DEVICE_OFF: u8 = 255;

/// Minimum length of any notification worth decoding
pub const MIN_NOTIFICATION_LEN: usize = 10;

/// Length of an RGB status notification carrying every field
pub const RGB_NOTIFICATION_LEN: usize = 17;

/// Effect names indexed by their protocol value
pub const EFFECTS: [&str; 11] = [
    "Off",
    "Random",
    "Rainbow",
    "Rainbow Slow",
    "Fusion",
    "Pulse",
    "Wave",
    "Chill",
    "Action",
    "Forest",
    "Summer",
];

/// Colour temperature of the white daylight panel in Kelvin
pub const DAYLIGHT_KELVIN: u32 = 5300;

/// Default delay after a regular command in milliseconds
pub const COMMAND_DELAY_MS: u64 = 200;

/// Default delay after a mode change in milliseconds
pub const MODE_CHANGE_DELAY_MS: u64 = 300;

/// Default delay after an effect change in milliseconds
pub const EFFECT_DELAY_MS: u64 = 200;

/// Default delay between the two status requests in milliseconds
pub const STATUS_DELAY_MS: u64 = 100;

/// Default delay after turning the lamp off in milliseconds
pub const TURN_OFF_DELAY_MS: u64 = 300;

/// Default delay between the white and RGB off commands in milliseconds
pub const TURN_OFF_STEP_DELAY_MS: u64 = 100;

/// Default minimum interval between two frames in milliseconds
pub const MIN_COMMAND_INTERVAL_MS: u64 = 50;

/// Timeout for establishing the link in seconds
pub const CONNECT_TIMEOUT_SECS: u64 = 20;

/// Timeout for finding the device by address in seconds
pub const DEVICE_LOOKUP_TIMEOUT_SECS: u64 = 15;

/// Timeout for a single characteristic write in seconds
pub const WRITE_TIMEOUT_SECS: u64 = 5;

/// Status poll interval while the lamp is lit
pub const POLL_INTERVAL_ON_SECS: u64 = 30;

/// Status poll interval while the lamp is reachable but off
pub const POLL_INTERVAL_OFF_SECS: u64 = 300;

/// Status poll interval while the lamp is unreachable
pub const POLL_INTERVAL_UNAVAILABLE_SECS: u64 = 900;

/// Attempts per simulation step before the step counts as failed
pub const SIMULATION_RETRY_ATTEMPTS: u32 = 3;

/// Delay between simulation retries in milliseconds
pub const SIMULATION_RETRY_DELAY_MS: u64 = 1000;

/// Failed steps in a row that abort a simulation
pub const SIMULATION_MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Warm colour temperature used while the sunset dims
pub const SUNSET_KELVIN: u32 = 2700;
