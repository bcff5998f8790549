use bytes::Bytes;
use futures::stream::Stream;
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::ble::binding::{
    CharacteristicInfo, CharacteristicProperties, DescriptorInfo, NotifyCallback, SubscribeMode,
    WriteMode,
};
use crate::ble::uuids::{BluetoothUuid, UuidKind};
use crate::error::{Error, Result};
use crate::events::{BluetoothEvent, EventChain, EventKind, EventTarget};
use crate::gatt::{select_all, select_one, Attribute, AttributeContext, Descriptor, EpochCache, Service};

enum Subscription {
    Idle,
    /// Native subscribe call in flight.
    Pending,
    /// Task draining native deliveries into `value` and events.
    Active(JoinHandle<()>),
}

/// A GATT characteristic.
pub struct Characteristic {
    uuid: Uuid,
    service_uuid: Uuid,
    service: Weak<Service>,
    this: Weak<Characteristic>,
    properties: CharacteristicProperties,
    value: RwLock<Option<Bytes>>,
    ctx: AttributeContext,
    descriptor_info: Vec<DescriptorInfo>,
    descriptors: EpochCache<Descriptor>,
    subscription: Mutex<Subscription>,
    events: Arc<EventTarget>,
    chain: EventChain,
}

impl Characteristic {
    pub(crate) fn new(
        ctx: AttributeContext,
        service_uuid: Uuid,
        service: Weak<Service>,
        info: CharacteristicInfo,
        parent: &EventChain,
    ) -> Arc<Self> {
        let events = Arc::new(EventTarget::new(ctx.event_capacity));
        let chain = parent.child(events.clone());

        Arc::new_cyclic(|this| Self {
            uuid: info.uuid,
            service_uuid,
            service,
            this: this.clone(),
            properties: info.properties,
            value: RwLock::new(None),
            ctx,
            descriptor_info: info.descriptors,
            descriptors: EpochCache::new(),
            subscription: Mutex::new(Subscription::Idle),
            events,
            chain,
        })
    }

    /// Canonical UUID of this characteristic.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The service this characteristic belongs to.
    pub fn service(&self) -> Option<Arc<Service>> {
        self.service.upgrade()
    }

    /// Operations the device advertises for this characteristic.
    pub fn properties(&self) -> CharacteristicProperties {
        self.properties
    }

    /// Most recent value from a read, write or notification. `None` until
    /// the first of those.
    pub fn value(&self) -> Option<Bytes> {
        self.value.read().clone()
    }

    /// Listeners for events raised on this characteristic.
    pub fn events(&self) -> &Arc<EventTarget> {
        &self.events
    }

    /// Whether a notification subscription is active on the current
    /// connection.
    pub fn is_notifying(&self) -> bool {
        self.ctx.ensure(&self.uuid).is_ok()
            && matches!(*self.subscription.lock(), Subscription::Active(_))
    }

    /// Read the value from the device.
    ///
    /// Stores the value and raises `characteristicvaluechanged`.
    ///
    /// # Errors
    ///
    /// `NotConnected`, or `StaleHandle` if the native read fails.
    pub async fn read_value(&self) -> Result<Bytes> {
        self.ctx.ensure(&self.uuid)?;

        let value = self
            .ctx
            .link
            .peripheral()
            .read(self.service_uuid, self.uuid)
            .await
            .map_err(|e| {
                debug!("Read of {} failed: {}", self.uuid, e);
                Error::stale(self.uuid)
            })?;

        trace!("Read {} bytes from {}", value.len(), self.uuid);
        self.apply_value(value.clone());
        Ok(value)
    }

    /// Write with response. Same as [`Self::write_value_with_response`].
    pub async fn write_value(&self, value: impl Into<Bytes>) -> Result<()> {
        self.write(value.into(), WriteMode::WithResponse).await
    }

    /// Write with response. Stores the value without raising an event.
    ///
    /// # Errors
    ///
    /// `NotConnected`, or `WriteFailed` if the native write fails.
    pub async fn write_value_with_response(&self, value: impl Into<Bytes>) -> Result<()> {
        self.write(value.into(), WriteMode::WithResponse).await
    }

    /// Write without response. Stores the value without raising an event.
    pub async fn write_value_without_response(&self, value: impl Into<Bytes>) -> Result<()> {
        self.write(value.into(), WriteMode::WithoutResponse).await
    }

    async fn write(&self, value: Bytes, mode: WriteMode) -> Result<()> {
        self.ctx.ensure(&self.uuid)?;

        self.ctx
            .link
            .peripheral()
            .write(self.service_uuid, self.uuid, value.clone(), mode)
            .await
            .map_err(|e| Error::WriteFailed {
                reason: e.to_string(),
            })?;

        trace!("Wrote {} bytes to {} ({:?})", value.len(), self.uuid, mode);
        *self.value.write() = Some(value);
        Ok(())
    }

    /// Subscribe to value updates.
    ///
    /// Uses notifications when the characteristic supports them, indications
    /// otherwise. Every delivery stores the value and raises
    /// `characteristicvaluechanged`, in arrival order. Calling this while a
    /// subscription is active does nothing.
    ///
    /// # Errors
    ///
    /// `NotConnected`, `NotSupported` if the characteristic can neither
    /// notify nor indicate, or `StaleHandle` if the native subscribe fails.
    pub async fn start_notifications(self: &Arc<Self>) -> Result<Arc<Self>> {
        self.ensure_subscribable()?;

        let mode = if self.properties.notify {
            SubscribeMode::Notify
        } else if self.properties.indicate {
            SubscribeMode::Indicate
        } else {
            return Err(Error::NotSupported {
                operation: format!("notifications on {}", self.uuid),
            });
        };

        {
            let mut subscription = self.subscription.lock();
            if !matches!(*subscription, Subscription::Idle) {
                debug!("Already subscribed to {}", self.uuid);
                return Ok(self.clone());
            }
            *subscription = Subscription::Pending;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        let callback: NotifyCallback = Box::new(move |value| {
            let _ = tx.send(value);
        });

        if let Err(e) = self
            .ctx
            .link
            .peripheral()
            .subscribe(self.service_uuid, self.uuid, mode, callback)
            .await
        {
            debug!("Subscribe to {} failed: {}", self.uuid, e);
            *self.subscription.lock() = Subscription::Idle;
            return Err(Error::stale(self.uuid));
        }

        let this = self.this.clone();
        let task = tokio::spawn(async move {
            while let Some(value) = rx.recv().await {
                let Some(characteristic) = this.upgrade() else {
                    break;
                };
                if characteristic.ctx.ensure(&characteristic.uuid).is_err() {
                    break;
                }
                characteristic.apply_value(value);
            }
        });

        let mut subscription = self.subscription.lock();
        if matches!(*subscription, Subscription::Pending) {
            debug!("Subscribed to {} ({:?})", self.uuid, mode);
            *subscription = Subscription::Active(task);
        } else {
            // Stopped while the native call was in flight.
            task.abort();
        }
        drop(subscription);

        Ok(self.clone())
    }

    /// Unsubscribe from value updates. Does nothing without an active
    /// subscription.
    ///
    /// # Errors
    ///
    /// `NotConnected`, or `StaleHandle` if the native unsubscribe fails.
    pub async fn stop_notifications(self: &Arc<Self>) -> Result<Arc<Self>> {
        self.ensure_subscribable()?;

        let task = match self.take_subscription() {
            Subscription::Idle => return Ok(self.clone()),
            Subscription::Pending => None,
            Subscription::Active(task) => Some(task),
        };

        let result = self
            .ctx
            .link
            .peripheral()
            .unsubscribe(self.service_uuid, self.uuid)
            .await;

        if let Some(task) = task {
            task.abort();
        }

        result.map_err(|e| {
            debug!("Unsubscribe from {} failed: {}", self.uuid, e);
            Error::stale(self.uuid)
        })?;

        debug!("Unsubscribed from {}", self.uuid);
        Ok(self.clone())
    }

    /// Stream of values raised by reads and notifications from now on.
    ///
    /// Values missed because the consumer fell behind the event buffer are
    /// skipped.
    pub fn notifications(&self) -> impl Stream<Item = Bytes> + Send + 'static {
        let rx = self.events.subscribe();
        let uuid = self.uuid;

        futures::stream::unfold(rx, move |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if event.kind != EventKind::CharacteristicValueChanged {
                            continue;
                        }
                        if let Some(value) = event.value {
                            return Some((value, rx));
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Notification stream for {} skipped {} values", uuid, missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }

    /// The single descriptor with `uuid`.
    pub async fn get_descriptor(&self, uuid: impl Into<BluetoothUuid>) -> Result<Arc<Descriptor>> {
        let uuid = uuid.into().resolve(UuidKind::Descriptor)?;
        let descriptors = self.descriptors().await?;
        select_one(descriptors, uuid, "descriptor")
    }

    /// All descriptors of this characteristic.
    pub async fn get_descriptors(&self) -> Result<Vec<Arc<Descriptor>>> {
        self.descriptors().await
    }

    /// Descriptors with `uuid`; empty if none match.
    pub async fn get_descriptors_by_uuid(
        &self,
        uuid: impl Into<BluetoothUuid>,
    ) -> Result<Vec<Arc<Descriptor>>> {
        let uuid = uuid.into().resolve(UuidKind::Descriptor)?;
        let descriptors = self.descriptors().await?;
        Ok(select_all(descriptors, uuid))
    }

    async fn descriptors(&self) -> Result<Vec<Arc<Descriptor>>> {
        self.ctx.ensure(&self.uuid)?;

        self.descriptors
            .get_or_try_populate(self.ctx.generation, || async {
                Ok(self
                    .descriptor_info
                    .iter()
                    .map(|info| {
                        Descriptor::new(
                            self.ctx.clone(),
                            self.service_uuid,
                            self.uuid,
                            self.this.clone(),
                            info.uuid,
                        )
                    })
                    .collect())
            })
            .await
    }

    /// Check the connection before a subscription change. A subscription
    /// left over from a closed connection is released locally; the device
    /// has already dropped it.
    fn ensure_subscribable(&self) -> Result<()> {
        self.ctx.ensure(&self.uuid).inspect_err(|_| {
            if let Subscription::Active(task) = self.take_subscription() {
                debug!("Releasing subscription to {} from a closed connection", self.uuid);
                task.abort();
            }
        })
    }

    fn take_subscription(&self) -> Subscription {
        std::mem::replace(&mut *self.subscription.lock(), Subscription::Idle)
    }

    fn apply_value(&self, value: Bytes) {
        trace!("{} value changed: {:02X?}", self.uuid, &value[..value.len().min(20)]);
        *self.value.write() = Some(value.clone());
        self.chain.emit(
            BluetoothEvent::new(EventKind::CharacteristicValueChanged)
                .with_device(&self.ctx.device_id)
                .with_service(self.service_uuid)
                .with_characteristic(self.uuid)
                .with_value(value),
        );
    }
}

impl Attribute for Characteristic {
    fn attribute_uuid(&self) -> Uuid {
        self.uuid
    }
}

impl Drop for Characteristic {
    fn drop(&mut self) {
        if let Subscription::Active(task) = std::mem::replace(self.subscription.get_mut(), Subscription::Idle) {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Characteristic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Characteristic")
            .field("uuid", &self.uuid)
            .field("service", &self.service_uuid)
            .field("properties", &self.properties)
            .field("value", &*self.value.read())
            .finish()
    }
}
