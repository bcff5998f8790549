//! BLE plumbing below the GATT object model.
//!
//! This module holds the binding seam the object model drives, the btleplug
//! implementation of it, scanning, connection epochs and UUID handling.

pub mod advertising;
pub mod binding;
pub mod connection;
pub mod platform;
pub(crate) mod scanner;
pub mod uuids;

pub use advertising::{ManufacturerData, ScanRecord};
pub use binding::{
    AdapterBinding, BindingError, BindingResult, CharacteristicInfo, CharacteristicProperties,
    DescriptorInfo, DisconnectCallback, NotifyCallback, PeripheralBinding, ScanResult, ServiceInfo,
    SubscribeMode, WriteMode,
};
pub use connection::ConnectionState;
pub use platform::{BtleplugAdapter, BtleplugBackend, BtleplugPeripheral};
pub use uuids::*;
