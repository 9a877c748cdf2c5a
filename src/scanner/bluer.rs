//! BlueZ D-Bus backend.
//!
//! Runs LE discovery with duplicate reporting enabled, so every fresh
//! advertisement of a known device shows up as a property change. Each
//! event is turned into an [`Advertisement`] from the device's current
//! UUIDs, manufacturer data and name. Requires the `bluetoothd` daemon.

use super::{ADVERTISEMENT_CHANNEL_BUFFER_SIZE, ScanError};
use crate::advertisement::Advertisement;
use crate::mac_address::MacAddress;
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport};
use futures::{StreamExt, pin_mut};
use std::time::SystemTime;
use tokio::sync::mpsc;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Start discovery on the default adapter and stream advertisements.
pub async fn start_scan() -> Result<mpsc::Receiver<Advertisement>, ScanError> {
    let session = bluer::Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    adapter
        .set_discovery_filter(DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            duplicate_data: true,
            ..Default::default()
        })
        .await?;

    let events = adapter.discover_devices_with_changes().await?;
    let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);

    // The task owns the session so discovery stays active for its lifetime.
    tokio::spawn(async move {
        let _session = session;
        pin_mut!(events);

        while let Some(event) = events.next().await {
            let address = match event {
                AdapterEvent::DeviceAdded(address) => address,
                _ => continue,
            };

            match read_advertisement(&adapter, address).await {
                Ok(adv) => {
                    if tx.send(adv).await.is_err() {
                        break;
                    }
                }
                Err(err) => tracing::debug!(%address, error = %err, "failed to read device properties"),
            }
        }
        tracing::warn!("BlueZ discovery stream ended");
    });

    Ok(rx)
}

/// Snapshot the advertised properties of a device.
async fn read_advertisement(adapter: &Adapter, address: Address) -> Result<Advertisement, ScanError> {
    let device = adapter.device(address)?;
    let mac: MacAddress = address.into();

    let mut adv = Advertisement::new(mac, SystemTime::now());
    if let Some(uuids) = device.uuids().await? {
        adv.service_uuids = uuids.into_iter().collect();
        adv.service_uuids.sort();
    }
    if let Some(data) = device.manufacturer_data().await? {
        adv.manufacturer_data = data.into_iter().collect();
    }
    adv.name = device.name().await?;

    Ok(adv)
}
