//! Call-counting stub bindings for unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::ble::advertising::ScanRecord;
use crate::ble::binding::{
    AdapterBinding, BindingError, BindingResult, CharacteristicInfo, CharacteristicProperties,
    DisconnectCallback, NotifyCallback, PeripheralBinding, ScanResult, ServiceInfo, SubscribeMode,
    WriteMode,
};
use crate::ble::uuids::{from_alias, MANUFACTURER_NAME_UUID, MODEL_NUMBER_UUID};
use crate::events::{EventChain, EventTarget};
use crate::gatt::GattServer;

#[derive(Default)]
struct Calls(Mutex<HashMap<&'static str, usize>>);

impl Calls {
    fn record(&self, op: &'static str) {
        *self.0.lock().entry(op).or_default() += 1;
    }

    fn get(&self, op: &str) -> usize {
        self.0.lock().get(op).copied().unwrap_or(0)
    }
}

pub(crate) fn characteristic(alias: u32, properties: CharacteristicProperties) -> CharacteristicInfo {
    CharacteristicInfo {
        uuid: from_alias(alias),
        properties,
        descriptors: vec![],
    }
}

pub(crate) fn service(alias: u32, characteristics: Vec<CharacteristicInfo>) -> ServiceInfo {
    ServiceInfo {
        uuid: from_alias(alias),
        primary: true,
        characteristics,
        included: vec![],
    }
}

/// Device Information service with readable model number and manufacturer
/// name characteristics.
pub(crate) fn device_info_service() -> ServiceInfo {
    let readable = CharacteristicProperties {
        read: true,
        write: true,
        write_without_response: true,
        ..Default::default()
    };
    ServiceInfo {
        uuid: from_alias(0x180a),
        primary: true,
        characteristics: vec![
            CharacteristicInfo {
                uuid: MODEL_NUMBER_UUID,
                properties: readable,
                descriptors: vec![],
            },
            CharacteristicInfo {
                uuid: MANUFACTURER_NAME_UUID,
                properties: readable,
                descriptors: vec![],
            },
        ],
        included: vec![],
    }
}

/// A server over `peripheral`, already connected, plus the root event target
/// its events bubble to.
pub(crate) async fn connected_server(
    peripheral: &Arc<StubPeripheral>,
) -> (Arc<GattServer>, Arc<EventTarget>) {
    let target = Arc::new(EventTarget::default());
    let server = Arc::new(GattServer::new(
        peripheral.id(),
        Weak::new(),
        peripheral.clone(),
        EventChain::root(target.clone()),
        16,
    ));
    server.connect().await.unwrap();
    (server, target)
}

type SharedDisconnectCallback = Arc<dyn Fn() + Send + Sync>;

pub(crate) struct StubPeripheral {
    id: String,
    services: Vec<ServiceInfo>,
    connected: AtomicBool,
    refuse: AtomicBool,
    fail: AtomicBool,
    values: Mutex<HashMap<Uuid, Bytes>>,
    writes: Mutex<Vec<(Vec<u8>, WriteMode)>>,
    subscriptions: Mutex<HashMap<Uuid, NotifyCallback>>,
    last_mode: Mutex<Option<SubscribeMode>>,
    on_disconnect: Mutex<Option<SharedDisconnectCallback>>,
    connect_gate: Mutex<Option<Arc<Notify>>>,
    calls: Calls,
}

impl StubPeripheral {
    pub(crate) fn new(services: Vec<ServiceInfo>) -> Arc<Self> {
        Self::with_id("stub", services)
    }

    pub(crate) fn with_id(id: impl Into<String>, services: Vec<ServiceInfo>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            services,
            connected: AtomicBool::new(false),
            refuse: AtomicBool::new(false),
            fail: AtomicBool::new(false),
            values: Mutex::new(HashMap::new()),
            writes: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(HashMap::new()),
            last_mode: Mutex::new(None),
            on_disconnect: Mutex::new(None),
            connect_gate: Mutex::new(None),
            calls: Calls::default(),
        })
    }

    /// Number of times binding call `op` was made.
    pub(crate) fn calls(&self, op: &str) -> usize {
        self.calls.get(op)
    }

    /// Hold every later `connect` until the returned gate is notified.
    pub(crate) fn hold_connections(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.connect_gate.lock() = Some(gate.clone());
        gate
    }

    pub(crate) fn refuse_connections(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    /// Make every read, write and (un)subscribe fail.
    pub(crate) fn fail_attribute_ops(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Value returned by reads of the characteristic or descriptor `uuid`.
    pub(crate) fn set_value(&self, uuid: Uuid, value: &[u8]) {
        self.values.lock().insert(uuid, Bytes::copy_from_slice(value));
    }

    pub(crate) fn writes(&self) -> Vec<(Vec<u8>, WriteMode)> {
        self.writes.lock().clone()
    }

    pub(crate) fn last_subscribe_mode(&self) -> Option<SubscribeMode> {
        *self.last_mode.lock()
    }

    /// Deliver a value to the subscription on `characteristic`. Returns
    /// whether one was registered.
    pub(crate) fn notify(&self, characteristic: Uuid, value: &[u8]) -> bool {
        match self.subscriptions.lock().get(&characteristic) {
            Some(callback) => {
                callback(Bytes::copy_from_slice(value));
                true
            }
            None => false,
        }
    }

    /// Simulate the link dropping without a `disconnect` call.
    pub(crate) fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let callback = self.on_disconnect.lock().clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    pub(crate) fn take_disconnect_callback(&self) -> Option<SharedDisconnectCallback> {
        self.on_disconnect.lock().take()
    }

    fn check(&self, uuid: Uuid) -> BindingResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BindingError::InvalidHandle(uuid.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PeripheralBinding for StubPeripheral {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn connect(&self) -> BindingResult<()> {
        self.calls.record("connect");
        let gate = self.connect_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.refuse.load(Ordering::SeqCst) {
            return Err(BindingError::Rejected {
                operation: "connect",
                reason: "peripheral unreachable".to_string(),
            });
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> BindingResult<()> {
        self.calls.record("disconnect");
        self.connected.store(false, Ordering::SeqCst);
        self.subscriptions.lock().clear();
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn on_disconnected(&self, callback: DisconnectCallback) {
        *self.on_disconnect.lock() = Some(Arc::from(callback));
    }

    async fn services(&self) -> BindingResult<Vec<ServiceInfo>> {
        self.calls.record("services");
        if !self.connected.load(Ordering::SeqCst) {
            return Err(BindingError::Rejected {
                operation: "services",
                reason: "not connected".to_string(),
            });
        }
        Ok(self.services.clone())
    }

    async fn read(&self, _service: Uuid, characteristic: Uuid) -> BindingResult<Bytes> {
        self.calls.record("read");
        self.check(characteristic)?;
        Ok(self
            .values
            .lock()
            .get(&characteristic)
            .cloned()
            .unwrap_or_default())
    }

    async fn write(
        &self,
        _service: Uuid,
        characteristic: Uuid,
        data: Bytes,
        mode: WriteMode,
    ) -> BindingResult<()> {
        self.calls.record("write");
        self.check(characteristic)?;
        self.writes.lock().push((data.to_vec(), mode));
        Ok(())
    }

    async fn subscribe(
        &self,
        _service: Uuid,
        characteristic: Uuid,
        mode: SubscribeMode,
        callback: NotifyCallback,
    ) -> BindingResult<()> {
        self.calls.record("subscribe");
        self.check(characteristic)?;
        *self.last_mode.lock() = Some(mode);
        self.subscriptions.lock().insert(characteristic, callback);
        Ok(())
    }

    async fn unsubscribe(&self, _service: Uuid, characteristic: Uuid) -> BindingResult<()> {
        self.calls.record("unsubscribe");
        self.check(characteristic)?;
        self.subscriptions.lock().remove(&characteristic);
        Ok(())
    }

    async fn read_descriptor(
        &self,
        _service: Uuid,
        _characteristic: Uuid,
        descriptor: Uuid,
    ) -> BindingResult<Bytes> {
        self.calls.record("read_descriptor");
        self.check(descriptor)?;
        Ok(self.values.lock().get(&descriptor).cloned().unwrap_or_default())
    }

    async fn write_descriptor(
        &self,
        _service: Uuid,
        _characteristic: Uuid,
        descriptor: Uuid,
        data: Bytes,
    ) -> BindingResult<()> {
        self.calls.record("write_descriptor");
        self.check(descriptor)?;
        self.values.lock().insert(descriptor, data);
        Ok(())
    }
}

/// Adapter reporting a fixed set of advertisements on every scan.
pub(crate) struct StubAdapter {
    identifier: String,
    records: Mutex<Vec<ScanRecord>>,
    peripherals: Mutex<HashMap<String, Arc<StubPeripheral>>>,
    scanning: AtomicBool,
    fail_stop: AtomicBool,
    calls: Calls,
}

impl StubAdapter {
    pub(crate) fn new(records: Vec<ScanRecord>) -> Arc<Self> {
        Self::with_identifier("hci0", records)
    }

    pub(crate) fn with_identifier(identifier: impl Into<String>, records: Vec<ScanRecord>) -> Arc<Self> {
        let adapter = Arc::new(Self {
            identifier: identifier.into(),
            records: Mutex::new(Vec::new()),
            peripherals: Mutex::new(HashMap::new()),
            scanning: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            calls: Calls::default(),
        });
        adapter.set_records(records);
        adapter
    }

    /// Replace the advertisements reported from the next scan on.
    /// Each advertiser gets a stub peripheral exposing Device Information.
    pub(crate) fn set_records(&self, records: Vec<ScanRecord>) {
        let mut peripherals = self.peripherals.lock();
        for record in &records {
            peripherals
                .entry(record.id.clone())
                .or_insert_with(|| StubPeripheral::with_id(record.id.clone(), vec![device_info_service()]));
        }
        *self.records.lock() = records;
    }

    pub(crate) fn peripheral(&self, id: &str) -> Option<Arc<StubPeripheral>> {
        self.peripherals.lock().get(id).cloned()
    }

    pub(crate) fn calls(&self, op: &str) -> usize {
        self.calls.get(op)
    }

    pub(crate) fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_scan_stop(&self) {
        self.fail_stop.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl AdapterBinding for StubAdapter {
    fn identifier(&self) -> String {
        self.identifier.clone()
    }

    fn address(&self) -> String {
        "00:00:00:00:00:00".to_string()
    }

    async fn scan_start(&self) -> BindingResult<()> {
        self.calls.record("scan_start");
        self.scanning.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn scan_stop(&self) -> BindingResult<()> {
        self.calls.record("scan_stop");
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(BindingError::Rejected {
                operation: "scan_stop",
                reason: "adapter busy".to_string(),
            });
        }
        self.scanning.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn scan_results(&self) -> BindingResult<Vec<ScanResult>> {
        self.calls.record("scan_results");
        let records = self.records.lock().clone();
        let peripherals = self.peripherals.lock();
        Ok(records
            .into_iter()
            .filter_map(|record| {
                let peripheral = peripherals.get(&record.id)?.clone();
                Some(ScanResult {
                    record,
                    peripheral,
                })
            })
            .collect())
    }
}
