//! Native binding capability surface.
//!
//! The GATT object model never talks to a BLE stack directly. It drives an
//! [`AdapterBinding`] for discovery and a [`PeripheralBinding`] per device for
//! everything after discovery. [`crate::ble::platform`] implements both on
//! top of btleplug; tests use stubs.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use uuid::Uuid;

use crate::ble::advertising::ScanRecord;

/// Failure reported by a binding call.
#[derive(Error, Debug)]
pub enum BindingError {
    /// Error from the btleplug backend.
    #[error(transparent)]
    Backend(#[from] btleplug::Error),

    /// The attribute handle no longer refers to a live attribute.
    #[error("attribute {0} is no longer valid")]
    InvalidHandle(String),

    /// The native stack rejected the call.
    #[error("{operation} rejected: {reason}")]
    Rejected {
        /// Name of the rejected call.
        operation: &'static str,
        /// Reason given by the stack.
        reason: String,
    },
}

/// Result type for binding calls.
pub type BindingResult<T> = std::result::Result<T, BindingError>;

/// Callback receiving notified/indicated values, in arrival order.
pub type NotifyCallback = Box<dyn Fn(Bytes) + Send + Sync>;

/// Callback fired when the native stack reports a disconnection.
pub type DisconnectCallback = Box<dyn Fn() + Send + Sync>;

/// Write flavour for characteristic writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteMode {
    /// Acknowledged write.
    WithResponse,
    /// Unacknowledged write (write command).
    WithoutResponse,
}

/// Subscription flavour for characteristic value updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscribeMode {
    /// Unacknowledged notifications.
    Notify,
    /// Acknowledged indications.
    Indicate,
}

/// Characteristic capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicProperties {
    /// Value may be broadcast in advertisements.
    pub broadcast: bool,
    /// Value can be read.
    pub read: bool,
    /// Value can be written without acknowledgement.
    pub write_without_response: bool,
    /// Value can be written with acknowledgement.
    pub write: bool,
    /// Supports notifications.
    pub notify: bool,
    /// Supports indications.
    pub indicate: bool,
    /// Supports signed writes.
    pub authenticated_signed_writes: bool,
    /// Has an extended properties descriptor.
    pub extended_properties: bool,
}

/// Descriptor as enumerated by the binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorInfo {
    /// Descriptor UUID.
    pub uuid: Uuid,
}

/// Characteristic as enumerated by the binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Capability flags.
    pub properties: CharacteristicProperties,
    /// Descriptors in discovery order.
    pub descriptors: Vec<DescriptorInfo>,
}

/// Service tree as enumerated by the binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    /// Service UUID.
    pub uuid: Uuid,
    /// Primary rather than included-only.
    pub primary: bool,
    /// Characteristics in discovery order.
    pub characteristics: Vec<CharacteristicInfo>,
    /// Services included by this one.
    pub included: Vec<ServiceInfo>,
}

/// One accumulated scan result.
#[derive(Clone)]
pub struct ScanResult {
    /// Advertisement snapshot used for filtering.
    pub record: ScanRecord,
    /// Handle for connecting to the advertiser.
    pub peripheral: Arc<dyn PeripheralBinding>,
}

impl std::fmt::Debug for ScanResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanResult")
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

/// A local Bluetooth adapter.
#[async_trait]
pub trait AdapterBinding: Send + Sync {
    /// Platform identifier of the adapter.
    fn identifier(&self) -> String;

    /// Adapter MAC address, or an empty string when the platform hides it.
    fn address(&self) -> String;

    /// Start accumulating advertisement reports.
    async fn scan_start(&self) -> BindingResult<()>;

    /// Stop scanning.
    async fn scan_stop(&self) -> BindingResult<()>;

    /// Peripherals seen since scanning started.
    async fn scan_results(&self) -> BindingResult<Vec<ScanResult>>;
}

/// A remote peripheral.
///
/// Attributes are addressed by (service, characteristic[, descriptor]) UUID
/// paths; a path that no longer exists fails with
/// [`BindingError::InvalidHandle`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PeripheralBinding: Send + Sync {
    /// Stable peripheral identifier.
    fn id(&self) -> String;

    /// Open the GATT link.
    async fn connect(&self) -> BindingResult<()>;

    /// Close the GATT link. Succeeds when already closed.
    async fn disconnect(&self) -> BindingResult<()>;

    /// Whether the native link is up.
    async fn is_connected(&self) -> bool;

    /// Register the callback fired when the link drops without a
    /// `disconnect` call. Replaces any previous registration.
    fn on_disconnected(&self, callback: DisconnectCallback);

    /// Enumerate the full service tree. Only valid while connected.
    async fn services(&self) -> BindingResult<Vec<ServiceInfo>>;

    /// Read a characteristic value.
    async fn read(&self, service: Uuid, characteristic: Uuid) -> BindingResult<Bytes>;

    /// Write a characteristic value.
    async fn write(
        &self,
        service: Uuid,
        characteristic: Uuid,
        data: Bytes,
        mode: WriteMode,
    ) -> BindingResult<()>;

    /// Subscribe to value updates. `callback` may be invoked from any thread.
    async fn subscribe(
        &self,
        service: Uuid,
        characteristic: Uuid,
        mode: SubscribeMode,
        callback: NotifyCallback,
    ) -> BindingResult<()>;

    /// End a subscription made with `subscribe`.
    async fn unsubscribe(&self, service: Uuid, characteristic: Uuid) -> BindingResult<()>;

    /// Read a descriptor value.
    async fn read_descriptor(
        &self,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
    ) -> BindingResult<Bytes>;

    /// Write a descriptor value.
    async fn write_descriptor(
        &self,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        data: Bytes,
    ) -> BindingResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_error_display() {
        let err = BindingError::Rejected {
            operation: "write",
            reason: "insufficient authentication".to_string(),
        };
        assert_eq!(err.to_string(), "write rejected: insufficient authentication");
    }

    #[test]
    fn test_properties_default_empty() {
        let props = CharacteristicProperties::default();
        assert!(!props.read && !props.notify && !props.indicate);
    }
}
