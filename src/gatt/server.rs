//! GATT server: connection lifecycle and primary-service discovery.

use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use crate::ble::binding::PeripheralBinding;
use crate::ble::connection::{ConnectionState, GattLink};
use crate::ble::uuids::{BluetoothUuid, UuidKind};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::events::{BluetoothEvent, EventChain, EventKind};
use crate::gatt::{select_all, select_one, AttributeContext, EpochCache, Service};

/// The GATT server of one device.
pub struct GattServer {
    device_id: String,
    device: Weak<Device>,
    link: Arc<GattLink>,
    services: EpochCache<Service>,
    /// The owning device's chain.
    chain: EventChain,
    event_capacity: usize,
}

impl GattServer {
    pub(crate) fn new(
        device_id: String,
        device: Weak<Device>,
        peripheral: Arc<dyn PeripheralBinding>,
        chain: EventChain,
        event_capacity: usize,
    ) -> Self {
        Self {
            device_id,
            device,
            link: Arc::new(GattLink::new(peripheral)),
            services: EpochCache::new(),
            chain,
            event_capacity,
        }
    }

    /// Whether the server is connected.
    pub fn connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.link.state()
    }

    /// The device this server belongs to.
    pub fn device(&self) -> Option<Arc<Device>> {
        self.device.upgrade()
    }

    /// Connect to the device.
    ///
    /// A successful connect starts a new epoch: services cached during a
    /// previous connection are discarded (each raising `serviceremoved`) and
    /// will be re-enumerated on the next query.
    ///
    /// # Errors
    ///
    /// `ConnectionRefused` if already connected or connecting, if the native
    /// connect fails, or if `disconnect` is called before it completes.
    pub async fn connect(self: &Arc<Self>) -> Result<Arc<Self>> {
        let attempt = self.link.begin_connect()?;

        info!("Connecting to {}", self.device_id);

        if let Err(e) = self.link.peripheral().connect().await {
            warn!("Connection to {} failed: {}", self.device_id, e);
            self.link.abort_connect(attempt);
            return Err(Error::ConnectionRefused {
                reason: e.to_string(),
            });
        }

        let generation = match self.link.open_epoch(attempt) {
            Ok(generation) => generation,
            Err(e) => {
                // disconnect() ran while the native connect was in flight.
                warn!("Connection to {} abandoned: {}", self.device_id, e);
                if let Err(e) = self.link.peripheral().disconnect().await {
                    warn!("Native disconnect from {} failed: {}", self.device_id, e);
                }
                return Err(e);
            }
        };
        self.watch_disconnection(generation);

        for service in self.services.take_stale(generation) {
            service.emit_removed();
        }

        info!("Connected to {}", self.device_id);
        Ok(self.clone())
    }

    /// Disconnect from the device.
    ///
    /// Always issues the native disconnect and clears the connected flag,
    /// whatever the prior state. Raises `gattserverdisconnected` only if the
    /// server was connected.
    pub async fn disconnect(&self) -> Result<()> {
        let was_connected = self.link.close();

        info!("Disconnecting from {}", self.device_id);
        let result = self.link.peripheral().disconnect().await;

        if was_connected {
            self.chain.emit(
                BluetoothEvent::new(EventKind::GattServerDisconnected).with_device(&self.device_id),
            );
        }

        result.map_err(|e| {
            warn!("Native disconnect from {} failed: {}", self.device_id, e);
            Error::Bluetooth(e)
        })
    }

    /// The single primary service with `uuid`.
    ///
    /// # Errors
    ///
    /// `NotConnected`, `NotFound` on zero matches, `AmbiguousMatch` on more
    /// than one.
    pub async fn get_primary_service(&self, uuid: impl Into<BluetoothUuid>) -> Result<Arc<Service>> {
        let uuid = uuid.into().resolve(UuidKind::Service)?;
        let services = self.primary_services().await?;
        let service = select_one(services, uuid, "service")?;
        debug!("Resolved primary service {} on {}", uuid, self.device_id);
        Ok(service)
    }

    /// All primary services.
    pub async fn get_primary_services(&self) -> Result<Vec<Arc<Service>>> {
        self.primary_services().await
    }

    /// Primary services with `uuid`; empty if none match.
    pub async fn get_primary_services_by_uuid(
        &self,
        uuid: impl Into<BluetoothUuid>,
    ) -> Result<Vec<Arc<Service>>> {
        let uuid = uuid.into().resolve(UuidKind::Service)?;
        let services = self.primary_services().await?;
        Ok(select_all(services, uuid))
    }

    async fn primary_services(&self) -> Result<Vec<Arc<Service>>> {
        if !self.link.is_connected() {
            return Err(Error::NotConnected);
        }
        let generation = self.link.generation();

        self.services
            .get_or_try_populate(generation, || async move {
                let tree = self.link.peripheral().services().await?;
                debug!(
                    "{} reported {} services in epoch {}",
                    self.device_id,
                    tree.len(),
                    generation
                );

                let context = AttributeContext {
                    device_id: self.device_id.clone(),
                    device: self.device.clone(),
                    link: self.link.clone(),
                    generation,
                    event_capacity: self.event_capacity,
                };

                Ok(tree
                    .into_iter()
                    .filter(|info| info.primary)
                    .map(|info| Service::new(context.clone(), info, &self.chain))
                    .collect())
            })
            .await
    }

    /// Arrange for a native disconnection during `generation` to close the
    /// link and raise `gattserverdisconnected`.
    fn watch_disconnection(&self, generation: u64) {
        let link = Arc::downgrade(&self.link);
        let chain = self.chain.clone();
        let device_id = self.device_id.clone();
        let runtime = tokio::runtime::Handle::try_current().ok();

        self.link.peripheral().on_disconnected(Box::new(move || {
            let Some(link) = link.upgrade() else {
                return;
            };
            if !link.close_epoch(generation) {
                return;
            }

            info!("{} disconnected", device_id);
            let event = BluetoothEvent::new(EventKind::GattServerDisconnected).with_device(&device_id);
            match &runtime {
                Some(runtime) => {
                    let chain = chain.clone();
                    runtime.spawn(async move { chain.emit(event) });
                }
                None => chain.emit(event),
            }
        }));
    }
}

impl std::fmt::Debug for GattServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GattServer")
            .field("device_id", &self.device_id)
            .field("state", &self.link.state())
            .field("generation", &self.link.generation())
            .finish()
    }
}
