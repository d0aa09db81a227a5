//! The radio link a session runs over

use std::pin::Pin;

use futures::Stream;
use uuid::Uuid;
use wallbox_proto::ble::WriteMode;

use crate::error::LinkError;

/// Notification payloads from one characteristic, in arrival order
pub type ChunkStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// Result of asking the link to pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pairing {
    Paired,
    /// The platform stack has no pairing call; the OS pairs on demand
    NotApplicable,
}

/// A connected peer that can carry raw chunks both ways.
///
/// Implemented over btleplug by [`crate::ble::BtleLink`]; tests script their own.
#[async_trait::async_trait]
pub trait RadioLink: Send + Sync {
    /// Service identifiers the peer exposes
    async fn services(&self) -> Result<Vec<Uuid>, LinkError>;

    async fn pair(&self) -> Result<Pairing, LinkError>;

    /// Enable notifications on `characteristic` and stream their payloads
    async fn subscribe(&self, characteristic: Uuid) -> Result<ChunkStream, LinkError>;

    async fn write(&self, characteristic: Uuid, chunk: &[u8], mode: WriteMode) -> Result<(), LinkError>;

    async fn disconnect(&self) -> Result<(), LinkError>;
}
