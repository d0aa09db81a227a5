//! btleplug backed radio link
//!
//! Scanning for chargers and driving a connected peripheral's GATT
//! characteristics as a [`RadioLink`].

use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::time::Duration;
use uuid::Uuid;

use wallbox_proto::ble::{DEVICE_NAME_PREFIX, WriteMode};

use crate::error::{Error, LinkError, Result};
use crate::link::{ChunkStream, Pairing, RadioLink};

/// A discovered charger (or any other BLE device)
#[derive(Debug, Clone)]
pub struct WallboxDevice {
    pub name: String,
    pub address: String,
    pub rssi: Option<i16>,
    pub is_wallbox: bool,
}

pub fn is_wallbox_name(name: &str) -> bool {
    name.starts_with(DEVICE_NAME_PREFIX)
}

/// Get the default Bluetooth adapter
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await.map_err(LinkError::from)?;
    let adapters = manager.adapters().await.map_err(LinkError::from)?;
    adapters.into_iter().next().ok_or(Error::NoAdapter)
}

/// Scan for BLE devices
///
/// Returns every device seen. Chargers have `is_wallbox = true`.
pub async fn scan(adapter: &Adapter, duration: Duration) -> Result<Vec<WallboxDevice>> {
    let peripherals = discover(adapter, duration).await?;
    let mut devices = Vec::new();

    for peripheral in peripherals {
        if let Some(props) = peripheral.properties().await.map_err(LinkError::from)? {
            let name = props.local_name.unwrap_or_else(|| "Unknown".to_string());
            let address = peripheral.address().to_string();
            let is_wallbox = is_wallbox_name(&name);
            devices.push(WallboxDevice { name, address, rssi: props.rssi, is_wallbox });
        }
    }

    Ok(devices)
}

/// Find a charger by name/address pattern, or the first charger in range
pub async fn find_device(adapter: &Adapter, target: Option<&str>, duration: Duration) -> Result<Peripheral> {
    for peripheral in discover(adapter, duration).await? {
        if let Some(props) = peripheral.properties().await.map_err(LinkError::from)? {
            let name = props.local_name.unwrap_or_default();
            let addr = peripheral.address().to_string();

            let matches = match target {
                Some(t) => name.contains(t) || addr.contains(t),
                None => is_wallbox_name(&name),
            };

            if matches {
                tracing::info!(%name, %addr, "found device");
                return Ok(peripheral);
            }
        }
    }

    Err(Error::DeviceNotFound(target.map(str::to_string)))
}

async fn discover(adapter: &Adapter, duration: Duration) -> Result<Vec<Peripheral>> {
    adapter.start_scan(ScanFilter::default()).await.map_err(LinkError::from)?;
    tokio::time::sleep(duration).await;
    let peripherals = adapter.peripherals().await.map_err(LinkError::from);
    adapter.stop_scan().await.map_err(LinkError::from)?;
    Ok(peripherals?)
}

/// A connected peripheral with discovered services
pub struct BtleLink {
    peripheral: Peripheral,
}

impl BtleLink {
    /// Connect and discover services, giving up after `timeout`
    pub async fn connect(peripheral: Peripheral, timeout: Duration) -> Result<Self, LinkError> {
        tokio::time::timeout(timeout, async {
            peripheral.connect().await?;
            peripheral.discover_services().await?;
            Ok::<_, LinkError>(())
        })
        .await
        .map_err(|_| LinkError::Timeout { operation: "connect" })??;

        Ok(Self { peripheral })
    }

    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, LinkError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(LinkError::CharacteristicNotFound(uuid))
    }
}

#[async_trait::async_trait]
impl RadioLink for BtleLink {
    async fn services(&self) -> Result<Vec<Uuid>, LinkError> {
        Ok(self.peripheral.services().iter().map(|s| s.uuid).collect())
    }

    async fn pair(&self) -> Result<Pairing, LinkError> {
        // btleplug leaves bonding to the OS, which pairs when the peer asks
        Ok(Pairing::NotApplicable)
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<ChunkStream, LinkError> {
        let ch = self.characteristic(characteristic)?;
        self.peripheral.subscribe(&ch).await?;

        let notifications = self.peripheral.notifications().await?;
        Ok(Box::pin(notifications.filter_map(move |n| {
            futures::future::ready((n.uuid == characteristic).then_some(n.value))
        })))
    }

    async fn write(&self, characteristic: Uuid, chunk: &[u8], mode: WriteMode) -> Result<(), LinkError> {
        let ch = self.characteristic(characteristic)?;
        let write_type = match mode {
            WriteMode::Acknowledged => WriteType::WithResponse,
            WriteMode::Unacknowledged => WriteType::WithoutResponse,
        };
        self.peripheral.write(&ch, chunk, write_type).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}
