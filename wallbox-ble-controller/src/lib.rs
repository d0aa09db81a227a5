//! Wallbox BLE Controller
//!
//! Talks to Wallbox chargers over their BLE UART channel and drives firmware
//! updates through the charger's Wi-Fi hotspot.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use wallbox_ble_controller::{ble, BtleLink, Session, SessionConfig};
//! use wallbox_proto::ble::ProfileRegistry;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = ble::get_adapter().await?;
//!     let peripheral = ble::find_device(&adapter, None, Duration::from_secs(5)).await?;
//!     let link = BtleLink::connect(peripheral, Duration::from_secs(30)).await?;
//!
//!     let mut session = Session::connect(link, &ProfileRegistry::builtin(), SessionConfig::default()).await?;
//!     let reply = session.execute("r_hup", None).await?;
//!     println!("status: {:?}", reply.status());
//!     Ok(())
//! }
//! ```

pub mod ble;
pub mod bulk;
mod error;
mod link;
pub mod provision;
mod session;

pub use ble::BtleLink;
pub use bulk::TransferOutcome;
pub use error::{Error, LinkError, ProvisioningError, Result};
pub use link::{ChunkStream, Pairing, RadioLink};
pub use provision::{
    Announcement, Handoff, Package, Phase, ProvisionConfig, Provisioner, ProvisioningSession,
    WifiCredentials,
};
pub use session::{Reply, Session, SessionConfig, Transact};
