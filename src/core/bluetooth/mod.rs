//! Bluetooth functionality for Beurer daylight lamps
//! This module handles the wire protocol, the GATT link and the routing of
//! lamp notifications into the device state.

pub mod bluest_transport;
pub mod commands;
pub mod connection;
pub mod constants;
pub mod notification;
pub mod transport;
pub mod types;

// Re-export types that should be publicly accessible
pub use bluest_transport::BluestTransport;
pub use commands::LampCommand;
pub use connection::ConnectionManager;
pub use notification::{Notification, NotificationHandler};
pub use transport::{LampTransport, LinkEvent};
pub use types::{ConnectionState, Effect, Mode, Rgb};
