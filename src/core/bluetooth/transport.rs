//! The radio seam between the connection manager and a BLE stack.

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::error::Result;

/// Events pushed by the transport after a subscription is established
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A buffer arrived on the notify characteristic
    Notification(Vec<u8>),
    /// The link dropped without us asking
    Disconnected,
}

/// Link operations the connection manager needs from a BLE stack
#[async_trait]
pub trait LampTransport: Send + Sync + 'static {
    /// Opens the link and returns the UUIDs of every characteristic found.
    async fn open(&self) -> Result<Vec<Uuid>>;

    /// Starts forwarding notifications of `characteristic` (and link loss) to `events`.
    async fn subscribe(&self, characteristic: Uuid, events: UnboundedSender<LinkEvent>) -> Result<()>;

    /// Stops the subscription started by `subscribe`.
    async fn unsubscribe(&self) -> Result<()>;

    /// Writes one frame to `characteristic`.
    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()>;

    /// Closes the link.
    async fn close(&self) -> Result<()>;

    async fn is_connected(&self) -> bool;
}
