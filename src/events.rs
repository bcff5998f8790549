//! Event targets and bubbling.
//!
//! The hub, devices, services and characteristics each own an
//! [`EventTarget`]. An event raised on a characteristic is dispatched to the
//! characteristic's listeners, then re-dispatched unchanged to its service,
//! device and hub through an [`EventChain`].

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Kinds of events raised by the object model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EventKind {
    /// Adapter power or presence changed.
    AvailabilityChanged,
    /// A device advertisement was seen.
    AdvertisementReceived,
    /// A GATT connection ended.
    GattServerDisconnected,
    /// A service was enumerated on the current connection.
    ServiceAdded,
    /// A service's attributes changed on the device.
    ServiceChanged,
    /// A service from an earlier connection was discarded.
    ServiceRemoved,
    /// A characteristic value was read or notified.
    CharacteristicValueChanged,
}

impl EventKind {
    /// All event kinds.
    pub const ALL: [EventKind; 7] = [
        Self::AvailabilityChanged,
        Self::AdvertisementReceived,
        Self::GattServerDisconnected,
        Self::ServiceAdded,
        Self::ServiceChanged,
        Self::ServiceRemoved,
        Self::CharacteristicValueChanged,
    ];

    /// Web Bluetooth event name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AvailabilityChanged => "availabilitychanged",
            Self::AdvertisementReceived => "advertisementreceived",
            Self::GattServerDisconnected => "gattserverdisconnected",
            Self::ServiceAdded => "serviceadded",
            Self::ServiceChanged => "servicechanged",
            Self::ServiceRemoved => "serviceremoved",
            Self::CharacteristicValueChanged => "characteristicvaluechanged",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.strip_prefix("on").unwrap_or(s);
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| Error::invalid_argument("event", format!("unknown event {:?}", s)))
    }
}

/// An event raised somewhere in the object model.
#[derive(Debug, Clone)]
pub struct BluetoothEvent {
    /// What happened.
    pub kind: EventKind,
    /// Device the event concerns.
    pub device_id: Option<String>,
    /// Service the event concerns.
    pub service: Option<Uuid>,
    /// Characteristic the event concerns.
    pub characteristic: Option<Uuid>,
    /// New characteristic value for `characteristicvaluechanged`.
    pub value: Option<Bytes>,
    /// Adapter availability for `availabilitychanged`.
    pub available: Option<bool>,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
}

impl BluetoothEvent {
    /// Event of `kind` stamped with the current time and no context.
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            device_id: None,
            service: None,
            characteristic: None,
            value: None,
            available: None,
            timestamp: Utc::now(),
        }
    }

    /// Set the device the event concerns.
    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Set the service the event concerns.
    pub fn with_service(mut self, service: Uuid) -> Self {
        self.service = Some(service);
        self
    }

    /// Set the characteristic the event concerns.
    pub fn with_characteristic(mut self, characteristic: Uuid) -> Self {
        self.characteristic = Some(characteristic);
        self
    }

    /// Attach a characteristic value.
    pub fn with_value(mut self, value: Bytes) -> Self {
        self.value = Some(value);
        self
    }

    /// Attach adapter availability.
    pub fn with_availability(mut self, available: bool) -> Self {
        self.available = Some(available);
        self
    }
}

/// Identifier returned by [`EventTarget::add_event_listener`].
pub type ListenerId = u64;

type Listener = Arc<dyn Fn(&BluetoothEvent) + Send + Sync>;

struct Registration {
    id: ListenerId,
    kind: EventKind,
    listener: Listener,
}

/// Callback handle for unregistering callbacks.
///
/// Dropping the handle unregisters the callback.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    /// Create a new callback handle.
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

/// Listener registry for one object.
pub struct EventTarget {
    listeners: RwLock<Vec<Registration>>,
    /// `on<event>` handler per kind.
    handlers: Mutex<HashMap<EventKind, ListenerId>>,
    next_id: AtomicU64,
    event_tx: broadcast::Sender<BluetoothEvent>,
}

impl EventTarget {
    /// Create a target whose broadcast channel buffers `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            listeners: RwLock::new(Vec::new()),
            handlers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            event_tx,
        }
    }

    /// Register `listener` for events of `kind`.
    pub fn add_event_listener<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&BluetoothEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.write().push(Registration {
            id,
            kind,
            listener: Arc::new(listener),
        });
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|registration| registration.id != id);
        listeners.len() != before
    }

    /// Set the single `on<event>` handler for `kind`, replacing the previous one.
    pub fn set_handler<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&BluetoothEvent) + Send + Sync + 'static,
    {
        let id = self.add_event_listener(kind, handler);
        let previous = self.handlers.lock().insert(kind, id);
        if let Some(previous) = previous {
            self.remove_event_listener(previous);
        }
    }

    /// Clear the `on<event>` handler for `kind`.
    pub fn clear_handler(&self, kind: EventKind) {
        let previous = self.handlers.lock().remove(&kind);
        if let Some(previous) = previous {
            self.remove_event_listener(previous);
        }
    }

    /// Register a listener that lives as long as the returned handle.
    pub fn on<F>(self: &Arc<Self>, kind: EventKind, listener: F) -> CallbackHandle
    where
        F: Fn(&BluetoothEvent) + Send + Sync + 'static,
    {
        let id = self.add_event_listener(kind, listener);
        let target: Weak<Self> = Arc::downgrade(self);
        CallbackHandle::new(id, move || {
            if let Some(target) = target.upgrade() {
                target.remove_event_listener(id);
            }
        })
    }

    /// Receive every event dispatched to this target.
    pub fn subscribe(&self) -> broadcast::Receiver<BluetoothEvent> {
        self.event_tx.subscribe()
    }

    /// Number of listeners registered for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners
            .read()
            .iter()
            .filter(|registration| registration.kind == kind)
            .count()
    }

    pub(crate) fn dispatch(&self, event: &BluetoothEvent) {
        // Listeners may register or remove listeners.
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .filter(|registration| registration.kind == event.kind)
            .map(|registration| registration.listener.clone())
            .collect();

        for listener in listeners {
            listener(event);
        }

        let _ = self.event_tx.send(event.clone());
    }
}

impl Default for EventTarget {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_EVENT_CAPACITY)
    }
}

/// Targets an event visits, leaf first.
#[derive(Clone)]
pub(crate) struct EventChain(Vec<Arc<EventTarget>>);

impl EventChain {
    pub(crate) fn root(target: Arc<EventTarget>) -> Self {
        Self(vec![target])
    }

    /// Chain for a child object whose own target is `target`.
    pub(crate) fn child(&self, target: Arc<EventTarget>) -> Self {
        let mut targets = Vec::with_capacity(self.0.len() + 1);
        targets.push(target);
        targets.extend(self.0.iter().cloned());
        Self(targets)
    }

    pub(crate) fn emit(&self, event: BluetoothEvent) {
        trace!("Dispatching {} through {} targets", event.kind, self.0.len());
        for target in &self.0 {
            target.dispatch(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter(target: &EventTarget, kind: EventKind) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        target.add_event_listener(kind, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[test]
    fn test_event_kind_names() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert_eq!(
            "oncharacteristicvaluechanged".parse::<EventKind>().unwrap(),
            EventKind::CharacteristicValueChanged
        );
        assert!("click".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_listeners_filtered_by_kind() {
        let target = EventTarget::default();
        let added = counter(&target, EventKind::ServiceAdded);
        let removed = counter(&target, EventKind::ServiceRemoved);

        target.dispatch(&BluetoothEvent::new(EventKind::ServiceAdded));

        assert_eq!(added.load(Ordering::SeqCst), 1);
        assert_eq!(removed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_remove_event_listener() {
        let target = EventTarget::default();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = target.add_event_listener(EventKind::ServiceAdded, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(target.remove_event_listener(id));
        assert!(!target.remove_event_listener(id));
        target.dispatch(&BluetoothEvent::new(EventKind::ServiceAdded));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_set_handler_replaces_previous() {
        let target = EventTarget::default();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let f = first.clone();
        target.set_handler(EventKind::GattServerDisconnected, move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        let s = second.clone();
        target.set_handler(EventKind::GattServerDisconnected, move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(target.listener_count(EventKind::GattServerDisconnected), 1);

        target.dispatch(&BluetoothEvent::new(EventKind::GattServerDisconnected));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        target.clear_handler(EventKind::GattServerDisconnected);
        assert_eq!(target.listener_count(EventKind::GattServerDisconnected), 0);
    }

    #[test]
    fn test_callback_handle_unregisters_on_drop() {
        let target = Arc::new(EventTarget::default());
        let handle = target.on(EventKind::ServiceAdded, |_| {});
        assert_eq!(target.listener_count(EventKind::ServiceAdded), 1);
        drop(handle);
        assert_eq!(target.listener_count(EventKind::ServiceAdded), 0);
    }

    #[test]
    fn test_chain_dispatches_to_every_level_once() {
        let hub = Arc::new(EventTarget::default());
        let device = Arc::new(EventTarget::default());
        let service = Arc::new(EventTarget::default());
        let chain = EventChain::root(hub.clone())
            .child(device.clone())
            .child(service.clone());

        let counts: Vec<_> = [&hub, &device, &service]
            .iter()
            .map(|target| counter(target, EventKind::ServiceAdded))
            .collect();

        chain.emit(BluetoothEvent::new(EventKind::ServiceAdded));

        for count in counts {
            assert_eq!(count.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_subscribe_receives_dispatched_events() {
        let target = EventTarget::default();
        let mut rx = target.subscribe();

        target.dispatch(&BluetoothEvent::new(EventKind::AvailabilityChanged).with_availability(true));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::AvailabilityChanged);
        assert_eq!(event.available, Some(true));
    }
}
