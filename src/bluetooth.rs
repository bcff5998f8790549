//! The Bluetooth hub: adapter selection, device discovery and the device
//! registry.
//!
//! Every event raised anywhere in the object model bubbles up to the hub's
//! [`EventTarget`].

use futures::stream::Stream;
use parking_lot::RwLock;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::ble::binding::{AdapterBinding, ScanResult};
use crate::ble::platform::BtleplugBackend;
use crate::ble::scanner::scan_cycle;
use crate::config::BluetoothConfig;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::events::{BluetoothEvent, EventChain, EventKind, EventTarget};
use crate::filter::{DeviceMatcher, RequestDeviceOptions};

/// Description of one local adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AdapterInfo {
    /// Position for [`Bluetooth::set_adapter`].
    pub index: usize,
    /// Platform identifier of the adapter.
    pub identifier: String,
    /// MAC address, empty when the platform hides it.
    pub address: String,
}

/// Entry point for discovery.
pub struct Bluetooth {
    adapters: Vec<Arc<dyn AdapterBinding>>,
    selected: AtomicUsize,
    /// Devices returned so far, in discovery order, unique by id.
    devices: RwLock<Vec<Arc<Device>>>,
    this: Weak<Bluetooth>,
    events: Arc<EventTarget>,
    chain: EventChain,
    config: BluetoothConfig,
}

impl Bluetooth {
    /// Create a hub over the platform's adapters with default settings.
    ///
    /// # Errors
    ///
    /// `NoAdapter` if the system has no Bluetooth adapter.
    pub async fn new() -> Result<Arc<Self>> {
        Self::with_config(BluetoothConfig::default()).await
    }

    /// Create a hub over the platform's adapters.
    pub async fn with_config(config: BluetoothConfig) -> Result<Arc<Self>> {
        let backend = BtleplugBackend::new().await?;
        let adapters = backend.adapters().await?;
        Self::with_adapters(adapters, config)
    }

    /// Create a hub over any adapter bindings.
    ///
    /// # Errors
    ///
    /// `NoAdapter` if `adapters` is empty.
    pub fn with_adapters(
        adapters: Vec<Arc<dyn AdapterBinding>>,
        config: BluetoothConfig,
    ) -> Result<Arc<Self>> {
        if adapters.is_empty() {
            return Err(Error::NoAdapter);
        }

        info!(
            "Using {} Bluetooth adapter(s), selected {}",
            adapters.len(),
            adapters[0].identifier()
        );

        let events = Arc::new(EventTarget::new(config.event_capacity));
        let hub = Arc::new_cyclic(|this| Self {
            adapters,
            selected: AtomicUsize::new(0),
            devices: RwLock::new(Vec::new()),
            this: this.clone(),
            chain: EventChain::root(events.clone()),
            events,
            config,
        });

        hub.chain
            .emit(BluetoothEvent::new(EventKind::AvailabilityChanged).with_availability(true));
        Ok(hub)
    }

    /// Settings this hub was created with.
    pub fn config(&self) -> &BluetoothConfig {
        &self.config
    }

    /// Listeners for every event raised in the object model.
    pub fn events(&self) -> &Arc<EventTarget> {
        &self.events
    }

    /// Adapters available at construction.
    pub fn get_adapters(&self) -> Vec<AdapterInfo> {
        self.adapters
            .iter()
            .enumerate()
            .map(|(index, adapter)| AdapterInfo {
                index,
                identifier: adapter.identifier(),
                address: adapter.address(),
            })
            .collect()
    }

    /// Whether at least one adapter exists.
    pub fn get_availability(&self) -> bool {
        !self.adapters.is_empty()
    }

    /// Index of the adapter used by subsequent scans.
    pub fn selected_adapter(&self) -> usize {
        self.selected.load(Ordering::SeqCst)
    }

    /// Use adapter `index` for subsequent scans. Scans already running keep
    /// their adapter.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `index` is out of range.
    pub fn set_adapter(&self, index: usize) -> Result<()> {
        if index >= self.adapters.len() {
            return Err(Error::invalid_argument(
                "index",
                format!("adapter {} out of range (have {})", index, self.adapters.len()),
            ));
        }
        self.selected.store(index, Ordering::SeqCst);
        info!("Selected Bluetooth adapter {}", self.adapters[index].identifier());
        Ok(())
    }

    /// Devices returned by previous requests and scans.
    pub fn get_devices(&self) -> Vec<Arc<Device>> {
        self.devices.read().clone()
    }

    /// Run one scan cycle and return the first matching device.
    ///
    /// # Errors
    ///
    /// `InvalidArgument`/`NotSupported` for bad options, `Canceled` if
    /// `options.signal` fires, `NoDevicesFound` if nothing matched.
    pub async fn request_device(&self, options: RequestDeviceOptions) -> Result<Arc<Device>> {
        let matched = self.discover(&options).await?;
        let first = matched.into_iter().next().ok_or(Error::NoDevicesFound)?;
        Ok(self.register(first))
    }

    /// Run one scan cycle and return every matching device.
    pub async fn request_devices(&self, options: RequestDeviceOptions) -> Result<Vec<Arc<Device>>> {
        let matched = self.discover(&options).await?;
        if matched.is_empty() {
            return Err(Error::NoDevicesFound);
        }
        Ok(matched.into_iter().map(|result| self.register(result)).collect())
    }

    /// Scan continuously, yielding each newly discovered matching device once.
    ///
    /// The stream runs scan cycles of `options.timeout` back to back. When
    /// `options.signal` fires the scan is stopped, `Err(Canceled)` is yielded
    /// and the stream ends. A binding failure is yielded and ends the stream.
    ///
    /// # Errors
    ///
    /// `InvalidArgument`/`NotSupported` for bad options.
    pub fn scan(
        self: &Arc<Self>,
        options: RequestDeviceOptions,
    ) -> Result<impl Stream<Item = Result<Arc<Device>>> + Send + 'static> {
        let state = ContinuousScan {
            hub: self.clone(),
            matcher: options.matcher()?,
            cycle: options.timeout.unwrap_or(self.config.scan_cycle),
            signal: options.signal,
            seen: HashSet::new(),
            pending: VecDeque::new(),
            done: false,
        };

        info!("Starting continuous scan ({:?} cycles)", state.cycle);
        Ok(futures::stream::unfold(state, |mut state| async move {
            let item = state.next().await?;
            Some((item, state))
        }))
    }

    fn adapter(&self) -> Arc<dyn AdapterBinding> {
        self.adapters[self.selected.load(Ordering::SeqCst)].clone()
    }

    /// One scan cycle; matching results, first occurrence of each id.
    async fn discover(&self, options: &RequestDeviceOptions) -> Result<Vec<ScanResult>> {
        let matcher = options.matcher()?;
        let timeout = options.timeout.unwrap_or(self.config.request_timeout);

        let results = scan_cycle(&self.adapter(), timeout, options.signal.as_ref()).await?;

        let mut seen = HashSet::new();
        let matched: Vec<ScanResult> = results
            .into_iter()
            .filter(|result| matcher.matches(&result.record))
            .filter(|result| seen.insert(result.record.id.clone()))
            .collect();

        debug!("{} devices matched the request", matched.len());
        Ok(matched)
    }

    /// The registry's device for `result`, creating it on first sight.
    fn register(&self, result: ScanResult) -> Arc<Device> {
        let existing = self.find_device(&result.record.id);
        if let Some(device) = existing {
            device.observe_advertisement(&result.record);
            return device;
        }

        let mut devices = self.devices.write();
        if let Some(device) = devices.iter().find(|d| d.id() == result.record.id) {
            return device.clone();
        }

        let device = Device::new(
            &result.record,
            result.peripheral,
            self.this.clone(),
            &self.chain,
            self.config.event_capacity,
        );
        info!(
            "Registered device {} ({})",
            device.id(),
            device.name().unwrap_or("unnamed")
        );
        devices.push(device.clone());
        device
    }

    fn find_device(&self, id: &str) -> Option<Arc<Device>> {
        self.devices.read().iter().find(|d| d.id() == id).cloned()
    }
}

impl std::fmt::Debug for Bluetooth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bluetooth")
            .field("adapters", &self.adapters.len())
            .field("selected", &self.selected_adapter())
            .field("devices", &self.devices.read().len())
            .finish()
    }
}

struct ContinuousScan {
    hub: Arc<Bluetooth>,
    matcher: DeviceMatcher,
    cycle: Duration,
    signal: Option<CancellationToken>,
    /// Ids already yielded.
    seen: HashSet<String>,
    pending: VecDeque<Arc<Device>>,
    done: bool,
}

impl ContinuousScan {
    async fn next(&mut self) -> Option<Result<Arc<Device>>> {
        loop {
            if self.done {
                return None;
            }

            if self.signal.as_ref().is_some_and(|signal| signal.is_cancelled()) {
                info!("Continuous scan canceled");
                self.done = true;
                return Some(Err(Error::Canceled));
            }

            if let Some(device) = self.pending.pop_front() {
                return Some(Ok(device));
            }

            let adapter = self.hub.adapter();
            match scan_cycle(&adapter, self.cycle, self.signal.as_ref()).await {
                Ok(results) => {
                    for result in results {
                        if !self.matcher.matches(&result.record) {
                            continue;
                        }
                        let is_new = self.seen.insert(result.record.id.clone());
                        let device = self.hub.register(result);
                        if is_new {
                            self.pending.push_back(device);
                        }
                    }
                }
                Err(e) => {
                    info!("Continuous scan ended: {}", e);
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
