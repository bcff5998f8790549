// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # webgatt
//!
//! A Web Bluetooth style API for Bluetooth Low Energy on native runtimes.
//!
//! The crate exposes the browser object model (Bluetooth → Device → GATT
//! Server → Service → Characteristic → Descriptor) on top of a native BLE
//! binding. btleplug is the default binding; anything implementing
//! [`AdapterBinding`] and [`PeripheralBinding`] can be used instead.
//!
//! ## Features
//!
//! - **Discovery**: one-shot `request_device`/`request_devices` and a
//!   cancelable continuous `scan`, filtered by name, name prefix,
//!   manufacturer data or a custom predicate
//! - **Connection epochs**: attribute objects are cached per connection and
//!   detected as stale after a reconnect
//! - **UUID normalization**: aliases, full UUIDs and standard names compare
//!   equal everywhere
//! - **Events**: value changes, disconnections and service discovery bubble
//!   from characteristic to service to device to hub
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use webgatt::{Bluetooth, DeviceFilter, RequestDeviceOptions, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let bluetooth = Bluetooth::new().await?;
//!
//!     let options = RequestDeviceOptions::new()
//!         .with_filter(DeviceFilter::new().with_name_prefix("Widget"));
//!     let device = bluetooth.request_device(options).await?;
//!
//!     device.gatt().connect().await?;
//!     let model = device
//!         .gatt()
//!         .get_primary_service("device_information")
//!         .await?
//!         .get_characteristic("model_number_string")
//!         .await?
//!         .read_value()
//!         .await?;
//!     println!("Model: {}", String::from_utf8_lossy(&model));
//!
//!     device.gatt().disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for config and data types

// Public modules
pub mod ble;
pub mod bluetooth;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod filter;
pub mod gatt;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use bluetooth::{AdapterInfo, Bluetooth};
pub use config::BluetoothConfig;
pub use device::Device;
pub use error::{Error, Result};
pub use events::{BluetoothEvent, CallbackHandle, EventKind, EventTarget, ListenerId};
pub use filter::{DeviceFilter, DevicePredicate, ManufacturerDataFilter, RequestDeviceOptions};
pub use gatt::{Characteristic, Descriptor, GattServer, Service};

// Re-export commonly used types from submodules
pub use ble::advertising::{ManufacturerData, ScanRecord};
pub use ble::binding::{AdapterBinding, CharacteristicProperties, PeripheralBinding};
pub use ble::connection::ConnectionState;
pub use ble::uuids::{canonical_uuid, get_characteristic, get_descriptor, get_service, BluetoothUuid, UuidKind};
pub use tokio_util::sync::CancellationToken;
