//! Lamp commands implementation
//! This module contains every command that can be sent to the lamp and the
//! frame encoding shared by all of them.

use crate::core::bluetooth::constants::{
    CMD_BRIGHTNESS, CMD_COLOR, CMD_EFFECT, CMD_MODE, CMD_OFF, CMD_STATUS, CMD_TIMER, FRAME_HEADER,
    FRAME_MARKER, FRAME_TRAILER,
};
use crate::core::bluetooth::types::{Effect, Mode, Rgb};

/// Lamp commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LampCommand {
    /// Ask for a status notification of one mode (0x30, mode)
    StatusRequest(Mode),
    /// Set brightness of one mode in percent (0x31, mode, 0-100)
    Brightness(Mode, u8),
    /// Set the RGB colour (0x32, r, g, b)
    Color(Rgb),
    /// Select an effect (0x34, index)
    Effect(Effect),
    /// Switch one mode off (0x35, mode)
    Off(Mode),
    /// Activate a mode (0x37, mode)
    SetMode(Mode),
    /// Sleep timer in minutes (0x3E, minutes). Experimental.
    Timer(u8),
    /// Opcode and arguments taken verbatim
    Raw { opcode: u8, args: Vec<u8> },
}

impl LampCommand {
    pub fn opcode(&self) -> u8 {
        match self {
            Self::StatusRequest(_) => CMD_STATUS,
            Self::Brightness(..) => CMD_BRIGHTNESS,
            Self::Color(_) => CMD_COLOR,
            Self::Effect(_) => CMD_EFFECT,
            Self::Off(_) => CMD_OFF,
            Self::SetMode(_) => CMD_MODE,
            Self::Timer(_) => CMD_TIMER,
            Self::Raw { opcode, .. } => *opcode,
        }
    }

    pub fn args(&self) -> Vec<u8> {
        match self {
            Self::StatusRequest(mode) | Self::Off(mode) | Self::SetMode(mode) => {
                vec![mode.to_byte()]
            }
            Self::Brightness(mode, pct) => vec![mode.to_byte(), (*pct).min(100)],
            Self::Color((r, g, b)) => vec![*r, *g, *b],
            Self::Effect(effect) => vec![effect.index()],
            Self::Timer(minutes) => vec![*minutes],
            Self::Raw { args, .. } => args.clone(),
        }
    }

    /// Convert the command to its wire frame
    pub fn to_bytes(&self) -> Vec<u8> {
        encode(self.opcode(), &self.args())
    }
}

/// XOR-fold of the payload length byte and the payload bytes
pub fn checksum(length: u8, payload: &[u8]) -> u8 {
    payload.iter().fold(length, |acc, byte| acc ^ byte)
}

/// Builds a complete frame:
/// `FE EF 0A <len+7> AB AA <len+2> <opcode> <args..> <checksum> 55 0D 0A`
/// where `len` counts the opcode and its arguments.
///
/// Lengths wrap modulo 256; the lamp never sees payloads anywhere near that.
pub fn encode(opcode: u8, args: &[u8]) -> Vec<u8> {
    let len = (args.len() + 1) as u8;
    let mut payload = Vec::with_capacity(args.len() + 1);
    payload.push(opcode);
    payload.extend_from_slice(args);

    let payload_len = len.wrapping_add(2);
    let mut frame = Vec::with_capacity(args.len() + 11);
    frame.extend_from_slice(&FRAME_HEADER);
    frame.push(len.wrapping_add(7));
    frame.extend_from_slice(&FRAME_MARKER);
    frame.push(payload_len);
    frame.extend_from_slice(&payload);
    frame.push(checksum(payload_len, &payload));
    frame.extend_from_slice(&FRAME_TRAILER);
    frame
}
