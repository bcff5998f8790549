use std::sync::{Arc, Weak};
use tracing::debug;
use uuid::Uuid;

use crate::ble::binding::ServiceInfo;
use crate::ble::uuids::{BluetoothUuid, UuidKind};
use crate::device::Device;
use crate::error::Result;
use crate::events::{BluetoothEvent, EventChain, EventKind, EventTarget};
use crate::gatt::{select_all, select_one, Attribute, AttributeContext, Characteristic, EpochCache};

/// A GATT service discovered on a connected device.
pub struct Service {
    uuid: Uuid,
    is_primary: bool,
    this: Weak<Service>,
    ctx: AttributeContext,
    info: ServiceInfo,
    characteristics: EpochCache<Characteristic>,
    included: EpochCache<Service>,
    events: Arc<EventTarget>,
    chain: EventChain,
}

impl Service {
    /// Build a service and raise `serviceadded` through `parent`.
    pub(crate) fn new(ctx: AttributeContext, info: ServiceInfo, parent: &EventChain) -> Arc<Self> {
        let events = Arc::new(EventTarget::new(ctx.event_capacity));
        let chain = parent.child(events.clone());

        let service = Arc::new_cyclic(|this| Self {
            uuid: info.uuid,
            is_primary: info.primary,
            this: this.clone(),
            ctx,
            info,
            characteristics: EpochCache::new(),
            included: EpochCache::new(),
            events,
            chain,
        });

        service.emit(EventKind::ServiceAdded);
        service
    }

    /// Canonical UUID of this service.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Whether this is a primary service rather than an included one.
    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    /// The device this service was discovered on.
    pub fn device(&self) -> Option<Arc<Device>> {
        self.ctx.device.upgrade()
    }

    /// Listeners for events raised on this service or its characteristics.
    pub fn events(&self) -> &Arc<EventTarget> {
        &self.events
    }

    /// The single characteristic with `uuid`.
    ///
    /// # Errors
    ///
    /// `NotConnected`, `StaleHandle` for a service from an earlier
    /// connection, `NotFound` or `AmbiguousMatch`.
    pub async fn get_characteristic(
        &self,
        uuid: impl Into<BluetoothUuid>,
    ) -> Result<Arc<Characteristic>> {
        let uuid = uuid.into().resolve(UuidKind::Characteristic)?;
        let characteristics = self.characteristics().await?;
        select_one(characteristics, uuid, "characteristic")
    }

    /// All characteristics of this service.
    pub async fn get_characteristics(&self) -> Result<Vec<Arc<Characteristic>>> {
        self.characteristics().await
    }

    /// Characteristics with `uuid`; empty if none match.
    pub async fn get_characteristics_by_uuid(
        &self,
        uuid: impl Into<BluetoothUuid>,
    ) -> Result<Vec<Arc<Characteristic>>> {
        let uuid = uuid.into().resolve(UuidKind::Characteristic)?;
        let characteristics = self.characteristics().await?;
        Ok(select_all(characteristics, uuid))
    }

    /// The single included service with `uuid`.
    ///
    /// # Errors
    ///
    /// `InvalidUuid` before any enumeration, then as for `get_characteristic`.
    pub async fn get_included_service(&self, uuid: impl Into<BluetoothUuid>) -> Result<Arc<Service>> {
        let uuid = uuid.into().resolve(UuidKind::Service)?;
        let included = self.included_services().await?;
        select_one(included, uuid, "included service")
    }

    /// All included services.
    pub async fn get_included_services(&self) -> Result<Vec<Arc<Service>>> {
        self.included_services().await
    }

    /// Included services with `uuid`; empty if none match.
    pub async fn get_included_services_by_uuid(
        &self,
        uuid: impl Into<BluetoothUuid>,
    ) -> Result<Vec<Arc<Service>>> {
        let uuid = uuid.into().resolve(UuidKind::Service)?;
        let included = self.included_services().await?;
        Ok(select_all(included, uuid))
    }

    async fn characteristics(&self) -> Result<Vec<Arc<Characteristic>>> {
        self.ctx.ensure(&self.uuid)?;

        self.characteristics
            .get_or_try_populate(self.ctx.generation, || async {
                debug!(
                    "Enumerating {} characteristics of {}",
                    self.info.characteristics.len(),
                    self.uuid
                );
                Ok(self
                    .info
                    .characteristics
                    .iter()
                    .cloned()
                    .map(|info| {
                        Characteristic::new(
                            self.ctx.clone(),
                            self.uuid,
                            self.this.clone(),
                            info,
                            &self.chain,
                        )
                    })
                    .collect())
            })
            .await
    }

    async fn included_services(&self) -> Result<Vec<Arc<Service>>> {
        self.ctx.ensure(&self.uuid)?;

        self.included
            .get_or_try_populate(self.ctx.generation, || async {
                debug!(
                    "Enumerating {} included services of {}",
                    self.info.included.len(),
                    self.uuid
                );
                Ok(self
                    .info
                    .included
                    .iter()
                    .cloned()
                    .map(|info| Service::new(self.ctx.clone(), info, &self.chain))
                    .collect())
            })
            .await
    }

    /// Raise `serviceremoved` for this service.
    pub(crate) fn emit_removed(&self) {
        self.emit(EventKind::ServiceRemoved);
    }

    fn emit(&self, kind: EventKind) {
        self.chain.emit(
            BluetoothEvent::new(kind)
                .with_device(&self.ctx.device_id)
                .with_service(self.uuid),
        );
    }
}

impl Attribute for Service {
    fn attribute_uuid(&self) -> Uuid {
        self.uuid
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("uuid", &self.uuid)
            .field("is_primary", &self.is_primary)
            .field("device_id", &self.ctx.device_id)
            .finish()
    }
}
