use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::gatt::{Attribute, AttributeContext, Characteristic};

/// A GATT descriptor. Value changes are cached but never raise events.
pub struct Descriptor {
    uuid: Uuid,
    service_uuid: Uuid,
    characteristic_uuid: Uuid,
    characteristic: Weak<Characteristic>,
    value: RwLock<Option<Bytes>>,
    ctx: AttributeContext,
}

impl Descriptor {
    pub(crate) fn new(
        ctx: AttributeContext,
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        characteristic: Weak<Characteristic>,
        uuid: Uuid,
    ) -> Arc<Self> {
        Arc::new(Self {
            uuid,
            service_uuid,
            characteristic_uuid,
            characteristic,
            value: RwLock::new(None),
            ctx,
        })
    }

    /// Canonical UUID of this descriptor.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The characteristic this descriptor belongs to.
    pub fn characteristic(&self) -> Option<Arc<Characteristic>> {
        self.characteristic.upgrade()
    }

    /// Most recent value read or written. `None` until the first of those.
    pub fn value(&self) -> Option<Bytes> {
        self.value.read().clone()
    }

    /// # Errors
    ///
    /// `NotConnected`, or `StaleHandle` if the native read fails.
    pub async fn read_value(&self) -> Result<Bytes> {
        self.ctx.ensure(&self.uuid)?;

        let value = self
            .ctx
            .link
            .peripheral()
            .read_descriptor(self.service_uuid, self.characteristic_uuid, self.uuid)
            .await
            .map_err(|e| {
                debug!("Read of descriptor {} failed: {}", self.uuid, e);
                Error::stale(self.uuid)
            })?;

        trace!("Read {} bytes from descriptor {}", value.len(), self.uuid);
        *self.value.write() = Some(value.clone());
        Ok(value)
    }

    /// # Errors
    ///
    /// `NotConnected`, or `StaleHandle` if the native write fails.
    pub async fn write_value(&self, value: impl Into<Bytes>) -> Result<()> {
        self.ctx.ensure(&self.uuid)?;
        let value = value.into();

        self.ctx
            .link
            .peripheral()
            .write_descriptor(self.service_uuid, self.characteristic_uuid, self.uuid, value.clone())
            .await
            .map_err(|e| {
                debug!("Write of descriptor {} failed: {}", self.uuid, e);
                Error::stale(self.uuid)
            })?;

        trace!("Wrote {} bytes to descriptor {}", value.len(), self.uuid);
        *self.value.write() = Some(value);
        Ok(())
    }
}

impl Attribute for Descriptor {
    fn attribute_uuid(&self) -> Uuid {
        self.uuid
    }
}

impl std::fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Descriptor")
            .field("uuid", &self.uuid)
            .field("characteristic", &self.characteristic_uuid)
            .field("value", &*self.value.read())
            .finish()
    }
}
