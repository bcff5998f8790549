//! btleplug implementation of the binding traits.

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Descriptor, Manager as _, Peripheral as _,
    ScanFilter, Service, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::stream::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::advertising::ScanRecord;
use crate::ble::binding::{
    AdapterBinding, BindingError, BindingResult, CharacteristicInfo, CharacteristicProperties,
    DescriptorInfo, DisconnectCallback, NotifyCallback, PeripheralBinding, ScanResult, ServiceInfo,
    SubscribeMode, WriteMode,
};
use crate::error::Result;

/// Entry point to the platform's Bluetooth stack.
pub struct BtleplugBackend {
    manager: Manager,
}

impl BtleplugBackend {
    /// # Errors
    ///
    /// Returns an error if the platform Bluetooth stack is unavailable.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await.map_err(BindingError::from)?;
        Ok(Self { manager })
    }

    /// Every adapter on the system, in platform order.
    pub async fn adapters(&self) -> Result<Vec<Arc<dyn AdapterBinding>>> {
        let adapters = self.manager.adapters().await.map_err(BindingError::from)?;

        let mut bindings: Vec<Arc<dyn AdapterBinding>> = Vec::with_capacity(adapters.len());
        for (index, adapter) in adapters.into_iter().enumerate() {
            let identifier = match adapter.adapter_info().await {
                Ok(info) => info,
                Err(e) => {
                    debug!("No info for adapter {}: {}", index, e);
                    format!("adapter{}", index)
                }
            };
            info!("Found Bluetooth adapter: {}", identifier);
            bindings.push(Arc::new(BtleplugAdapter {
                adapter,
                identifier,
            }));
        }
        Ok(bindings)
    }
}

/// A btleplug adapter.
pub struct BtleplugAdapter {
    adapter: Adapter,
    identifier: String,
}

#[async_trait]
impl AdapterBinding for BtleplugAdapter {
    fn identifier(&self) -> String {
        self.identifier.clone()
    }

    fn address(&self) -> String {
        // btleplug does not expose adapter addresses.
        String::new()
    }

    async fn scan_start(&self) -> BindingResult<()> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    async fn scan_stop(&self) -> BindingResult<()> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn scan_results(&self) -> BindingResult<Vec<ScanResult>> {
        let peripherals = self.adapter.peripherals().await?;

        let mut results = Vec::with_capacity(peripherals.len());
        for peripheral in peripherals {
            let properties = match peripheral.properties().await {
                Ok(Some(properties)) => properties,
                Ok(None) => continue,
                Err(e) => {
                    trace!("Failed to get properties of {:?}: {}", peripheral.id(), e);
                    continue;
                }
            };

            let record = ScanRecord {
                id: peripheral_id(&peripheral),
                name: properties.local_name,
                address: properties.address.to_string(),
                rssi: properties.rssi,
                tx_power: properties.tx_power_level,
                manufacturer_data: properties.manufacturer_data.into_iter().collect(),
            };
            trace!("Scan result {} ({:?})", record.id, record.name);

            results.push(ScanResult {
                record,
                peripheral: Arc::new(BtleplugPeripheral::new(self.adapter.clone(), peripheral)),
            });
        }
        Ok(results)
    }
}

/// A btleplug peripheral.
pub struct BtleplugPeripheral {
    adapter: Adapter,
    peripheral: Peripheral,
    /// Notification forwarding tasks by characteristic.
    notification_tasks: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    disconnect_watch: Mutex<Option<JoinHandle<()>>>,
}

impl BtleplugPeripheral {
    fn new(adapter: Adapter, peripheral: Peripheral) -> Self {
        Self {
            adapter,
            peripheral,
            notification_tasks: Mutex::new(HashMap::new()),
            disconnect_watch: Mutex::new(None),
        }
    }

    fn characteristic(&self, service: Uuid, characteristic: Uuid) -> BindingResult<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.service_uuid == service && c.uuid == characteristic)
            .ok_or_else(|| BindingError::InvalidHandle(characteristic.to_string()))
    }

    fn descriptor(
        &self,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
    ) -> BindingResult<Descriptor> {
        self.characteristic(service, characteristic)?
            .descriptors
            .into_iter()
            .find(|d| d.uuid == descriptor)
            .ok_or_else(|| BindingError::InvalidHandle(descriptor.to_string()))
    }

    fn stop_notification_tasks(&self) {
        for (_, task) in self.notification_tasks.lock().drain() {
            task.abort();
        }
    }
}

#[async_trait]
impl PeripheralBinding for BtleplugPeripheral {
    fn id(&self) -> String {
        peripheral_id(&self.peripheral)
    }

    async fn connect(&self) -> BindingResult<()> {
        self.peripheral.connect().await?;
        Ok(())
    }

    async fn disconnect(&self) -> BindingResult<()> {
        self.stop_notification_tasks();
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    fn on_disconnected(&self, callback: DisconnectCallback) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime; disconnections of {:?} will not be reported", self.peripheral.id());
            return;
        };

        let adapter = self.adapter.clone();
        let id = self.peripheral.id();
        let task = runtime.spawn(async move {
            let mut events = match adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    error!("Failed to get adapter events: {}", e);
                    return;
                }
            };

            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(disconnected) = event {
                    if disconnected == id {
                        debug!("Device disconnected: {:?}", disconnected);
                        callback();
                    }
                }
            }
        });

        if let Some(previous) = self.disconnect_watch.lock().replace(task) {
            previous.abort();
        }
    }

    async fn services(&self) -> BindingResult<Vec<ServiceInfo>> {
        self.peripheral.discover_services().await?;
        Ok(self.peripheral.services().iter().map(service_info).collect())
    }

    async fn read(&self, service: Uuid, characteristic: Uuid) -> BindingResult<Bytes> {
        let characteristic = self.characteristic(service, characteristic)?;
        Ok(Bytes::from(self.peripheral.read(&characteristic).await?))
    }

    async fn write(
        &self,
        service: Uuid,
        characteristic: Uuid,
        data: Bytes,
        mode: WriteMode,
    ) -> BindingResult<()> {
        let characteristic = self.characteristic(service, characteristic)?;
        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };
        self.peripheral.write(&characteristic, &data, write_type).await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        service: Uuid,
        characteristic: Uuid,
        mode: SubscribeMode,
        callback: NotifyCallback,
    ) -> BindingResult<()> {
        let target = self.characteristic(service, characteristic)?;

        // btleplug picks notify or indicate from the characteristic's flags.
        debug!("Subscribing to {} ({:?})", characteristic, mode);
        let mut notifications = self.peripheral.notifications().await?;
        self.peripheral.subscribe(&target).await?;

        let task = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid == characteristic {
                    callback(Bytes::from(notification.value));
                }
            }
        });

        if let Some(previous) = self.notification_tasks.lock().insert(characteristic, task) {
            previous.abort();
        }
        Ok(())
    }

    async fn unsubscribe(&self, service: Uuid, characteristic: Uuid) -> BindingResult<()> {
        let target = self.characteristic(service, characteristic)?;
        if let Some(task) = self.notification_tasks.lock().remove(&characteristic) {
            task.abort();
        }
        self.peripheral.unsubscribe(&target).await?;
        Ok(())
    }

    async fn read_descriptor(
        &self,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
    ) -> BindingResult<Bytes> {
        let descriptor = self.descriptor(service, characteristic, descriptor)?;
        Ok(Bytes::from(self.peripheral.read_descriptor(&descriptor).await?))
    }

    async fn write_descriptor(
        &self,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        data: Bytes,
    ) -> BindingResult<()> {
        let descriptor = self.descriptor(service, characteristic, descriptor)?;
        self.peripheral.write_descriptor(&descriptor, &data).await?;
        Ok(())
    }
}

impl Drop for BtleplugPeripheral {
    fn drop(&mut self) {
        self.stop_notification_tasks();
        if let Some(task) = self.disconnect_watch.lock().take() {
            task.abort();
        }
    }
}

fn peripheral_id(peripheral: &Peripheral) -> String {
    format!("{:?}", peripheral.id())
}

fn char_properties(flags: CharPropFlags) -> CharacteristicProperties {
    CharacteristicProperties {
        broadcast: flags.contains(CharPropFlags::BROADCAST),
        read: flags.contains(CharPropFlags::READ),
        write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
        write: flags.contains(CharPropFlags::WRITE),
        notify: flags.contains(CharPropFlags::NOTIFY),
        indicate: flags.contains(CharPropFlags::INDICATE),
        authenticated_signed_writes: flags.contains(CharPropFlags::AUTHENTICATED_SIGNED_WRITES),
        extended_properties: flags.contains(CharPropFlags::EXTENDED_PROPERTIES),
    }
}

/// btleplug does not report included services.
fn service_info(service: &Service) -> ServiceInfo {
    ServiceInfo {
        uuid: service.uuid,
        primary: service.primary,
        characteristics: service
            .characteristics
            .iter()
            .map(|characteristic| CharacteristicInfo {
                uuid: characteristic.uuid,
                properties: char_properties(characteristic.properties),
                descriptors: characteristic
                    .descriptors
                    .iter()
                    .map(|descriptor| DescriptorInfo {
                        uuid: descriptor.uuid,
                    })
                    .collect(),
            })
            .collect(),
        included: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::{from_alias, CLIENT_CHARACTERISTIC_CONFIGURATION_UUID};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    #[test]
    fn test_property_flags() {
        let props = char_properties(CharPropFlags::READ | CharPropFlags::NOTIFY);
        assert!(props.read && props.notify);
        assert!(!props.write && !props.indicate && !props.broadcast);

        assert_eq!(char_properties(CharPropFlags::empty()), CharacteristicProperties::default());
    }

    #[test]
    fn test_service_tree_conversion() {
        let service_uuid = from_alias(0x180d);
        let characteristic_uuid = from_alias(0x2a37);
        let descriptor = Descriptor {
            uuid: CLIENT_CHARACTERISTIC_CONFIGURATION_UUID,
            service_uuid,
            characteristic_uuid,
        };
        let characteristic = Characteristic {
            uuid: characteristic_uuid,
            service_uuid,
            properties: CharPropFlags::NOTIFY,
            descriptors: BTreeSet::from([descriptor]),
        };
        let service = Service {
            uuid: service_uuid,
            primary: true,
            characteristics: BTreeSet::from([characteristic]),
        };

        let info = service_info(&service);
        assert_eq!(info.uuid, service_uuid);
        assert!(info.primary);
        assert!(info.included.is_empty());
        assert_eq!(info.characteristics.len(), 1);
        assert_eq!(info.characteristics[0].uuid, characteristic_uuid);
        assert!(info.characteristics[0].properties.notify);
        assert_eq!(
            info.characteristics[0].descriptors,
            vec![DescriptorInfo {
                uuid: CLIENT_CHARACTERISTIC_CONFIGURATION_UUID
            }]
        );
    }
}
