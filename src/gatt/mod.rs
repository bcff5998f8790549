//! GATT object model.
//!
//! [`GattServer`] → [`Service`] → [`Characteristic`] → [`Descriptor`], each
//! level holding a lazily populated, per-epoch cache of its children and a
//! weak back-reference to its parent.

pub mod characteristic;
pub mod descriptor;
pub mod server;
pub mod service;

pub use characteristic::Characteristic;
pub use descriptor::Descriptor;
pub use server::GattServer;
pub use service::Service;

use parking_lot::RwLock;
use std::future::Future;
use std::sync::{Arc, Weak};
use tracing::debug;
use uuid::Uuid;

use crate::ble::connection::GattLink;
use crate::device::Device;
use crate::error::{Error, Result};

/// What every attribute object shares with the server it came from.
#[derive(Clone)]
pub(crate) struct AttributeContext {
    pub(crate) device_id: String,
    pub(crate) device: Weak<Device>,
    pub(crate) link: Arc<GattLink>,
    /// Epoch the attribute was discovered in.
    pub(crate) generation: u64,
    pub(crate) event_capacity: usize,
}

impl AttributeContext {
    pub(crate) fn ensure(&self, uuid: &Uuid) -> Result<()> {
        self.link.ensure(self.generation, uuid)
    }
}

pub(crate) trait Attribute {
    fn attribute_uuid(&self) -> Uuid;
}

/// The single attribute with `uuid`.
pub(crate) fn select_one<T: Attribute>(
    items: Vec<Arc<T>>,
    uuid: Uuid,
    kind: &'static str,
) -> Result<Arc<T>> {
    let mut matches = select_all(items, uuid);
    match matches.len() {
        0 => Err(Error::NotFound {
            kind,
            uuid: uuid.to_string(),
        }),
        1 => Ok(matches.remove(0)),
        count => Err(Error::AmbiguousMatch {
            kind,
            uuid: uuid.to_string(),
            count,
        }),
    }
}

/// Every attribute with `uuid`, in discovery order.
pub(crate) fn select_all<T: Attribute>(items: Vec<Arc<T>>, uuid: Uuid) -> Vec<Arc<T>> {
    items
        .into_iter()
        .filter(|item| item.attribute_uuid() == uuid)
        .collect()
}

struct Epoch<T> {
    generation: u64,
    items: Vec<Arc<T>>,
}

/// Child collection valid for one connection epoch.
pub(crate) struct EpochCache<T> {
    slot: RwLock<Option<Epoch<T>>>,
    populating: tokio::sync::Mutex<()>,
}

impl<T> EpochCache<T> {
    pub(crate) fn new() -> Self {
        Self {
            slot: RwLock::new(None),
            populating: tokio::sync::Mutex::new(()),
        }
    }

    /// Cached items, if populated during `generation`.
    pub(crate) fn get(&self, generation: u64) -> Option<Vec<Arc<T>>> {
        self.slot
            .read()
            .as_ref()
            .filter(|epoch| epoch.generation == generation)
            .map(|epoch| epoch.items.clone())
    }

    /// Discard items cached before `generation`, returning them.
    pub(crate) fn take_stale(&self, generation: u64) -> Vec<Arc<T>> {
        let mut slot = self.slot.write();
        if slot.as_ref().is_some_and(|epoch| epoch.generation == generation) {
            return Vec::new();
        }
        slot.take().map(|epoch| epoch.items).unwrap_or_default()
    }

    /// Cached items for `generation`, running `populate` once if absent.
    pub(crate) async fn get_or_try_populate<F, Fut>(
        &self,
        generation: u64,
        populate: F,
    ) -> Result<Vec<Arc<T>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Arc<T>>>>,
    {
        if let Some(items) = self.get(generation) {
            return Ok(items);
        }

        let _guard = self.populating.lock().await;
        if let Some(items) = self.get(generation) {
            return Ok(items);
        }

        let items = populate().await?;
        debug!("Cached {} attributes for epoch {}", items.len(), generation);
        *self.slot.write() = Some(Epoch {
            generation,
            items: items.clone(),
        });
        Ok(items)
    }
}
