//! Error types for lamp communication
//! Every fallible operation of the connection manager and the lamp controller returns `LampError`.

use std::time::Duration;

use thiserror::Error;

/// Result alias used across the crate
pub type Result<T, E = LampError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum LampError {
    /// Link-layer failure (connect refused, write rejected, link dropped)
    #[error("transport error: {0}")]
    Transport(String),

    /// A bounded connect or write did not complete in time
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("device is not connected")]
    NotConnected,

    /// The peripheral does not expose the write/notify characteristic pair
    #[error("required characteristics not found (write: {write}, notify: {notify})")]
    CharacteristicsNotFound { write: bool, notify: bool },

    /// A multi-step controller operation stopped partway
    #[error("sequence aborted at step '{step}': {source}")]
    SequenceAborted {
        step: &'static str,
        #[source]
        source: Box<LampError>,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Bluetooth(#[from] bluest::Error),
}

impl LampError {
    /// True for faults of the radio link itself, as opposed to caller mistakes.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout { .. } | Self::NotConnected | Self::Bluetooth(_) => {
                true
            }
            Self::SequenceAborted { source, .. } => source.is_transport(),
            _ => false,
        }
    }

    pub(crate) fn aborted(step: &'static str, source: LampError) -> Self {
        match source {
            // keep the innermost step name when sequences nest (turn_on replaying a colour)
            already @ Self::SequenceAborted { .. } => already,
            other => Self::SequenceAborted {
                step,
                source: Box::new(other),
            },
        }
    }
}
