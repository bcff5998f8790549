//! A discovered BLE device.

use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tracing::trace;

use crate::ble::advertising::{ManufacturerData, ScanRecord};
use crate::ble::binding::PeripheralBinding;
use crate::bluetooth::Bluetooth;
use crate::error::{Error, Result};
use crate::events::{BluetoothEvent, EventChain, EventKind, EventTarget};
use crate::gatt::GattServer;

/// Represents a single device that passed a discovery filter.
///
/// Identity (id, name, address, manufacturer data) is fixed at discovery;
/// signal strength follows the latest advertisement seen by a scan.
pub struct Device {
    /// Platform identifier, stable for the device's lifetime.
    id: String,
    name: Option<String>,
    address: String,
    manufacturer_data: ManufacturerData,
    rssi: RwLock<Option<i16>>,
    tx_power: RwLock<Option<i16>>,
    gatt: Arc<GattServer>,
    hub: Weak<Bluetooth>,
    events: Arc<EventTarget>,
    chain: EventChain,
}

impl Device {
    pub(crate) fn new(
        record: &ScanRecord,
        peripheral: Arc<dyn PeripheralBinding>,
        hub: Weak<Bluetooth>,
        parent: &EventChain,
        event_capacity: usize,
    ) -> Arc<Self> {
        let events = Arc::new(EventTarget::new(event_capacity));
        let chain = parent.child(events.clone());

        Arc::new_cyclic(|this| Self {
            id: record.id.clone(),
            name: record.name.clone(),
            address: record.address.clone(),
            manufacturer_data: record.manufacturer_data.clone(),
            rssi: RwLock::new(record.rssi),
            tx_power: RwLock::new(record.tx_power),
            gatt: Arc::new(GattServer::new(
                record.id.clone(),
                this.clone(),
                peripheral,
                chain.clone(),
                event_capacity,
            )),
            hub,
            events,
            chain,
        })
    }

    /// Stable identifier assigned by the platform.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Advertised local name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Device address, empty when the platform hides it.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Manufacturer data from the advertisement the device was discovered by.
    pub fn manufacturer_data(&self) -> &ManufacturerData {
        &self.manufacturer_data
    }

    /// Signal strength of the latest advertisement, in dBm.
    pub fn rssi(&self) -> Option<i16> {
        *self.rssi.read()
    }

    /// Advertised transmit power of the latest advertisement, in dBm.
    pub fn tx_power(&self) -> Option<i16> {
        *self.tx_power.read()
    }

    /// The device's GATT server.
    pub fn gatt(&self) -> &Arc<GattServer> {
        &self.gatt
    }

    /// The hub that discovered this device.
    pub fn hub(&self) -> Option<Arc<Bluetooth>> {
        self.hub.upgrade()
    }

    /// Listeners for events raised on this device or anything below it.
    pub fn events(&self) -> &Arc<EventTarget> {
        &self.events
    }

    /// Not implemented; always fails with `NotImplemented`.
    pub async fn watch_advertisements(&self) -> Result<()> {
        Err(Error::not_implemented("watch_advertisements"))
    }

    /// Not implemented; always fails with `NotImplemented`.
    pub fn unwatch_advertisements(&self) -> Result<()> {
        Err(Error::not_implemented("unwatch_advertisements"))
    }

    /// Not implemented; always fails with `NotImplemented`.
    pub async fn forget(&self) -> Result<()> {
        Err(Error::not_implemented("forget"))
    }

    /// Record a fresh advertisement from this device.
    pub(crate) fn observe_advertisement(&self, record: &ScanRecord) {
        trace!("Advertisement from {} (rssi {:?})", self.id, record.rssi);
        if record.rssi.is_some() {
            *self.rssi.write() = record.rssi;
        }
        if record.tx_power.is_some() {
            *self.tx_power.write() = record.tx_power;
        }
        self.chain
            .emit(BluetoothEvent::new(EventKind::AdvertisementReceived).with_device(&self.id));
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("connected", &self.gatt.connected())
            .finish()
    }
}
