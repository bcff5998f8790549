//! Request a device by name prefix and read its model number
//!
//! Run with: cargo run --example request_device
//!
//! To match a different name prefix:
//!   cargo run --example request_device -- --prefix Sensor

use std::time::Duration;
use webgatt::ble::BATTERY_SERVICE_UUID;
use webgatt::{Bluetooth, DeviceFilter, EventKind, RequestDeviceOptions, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("webgatt=debug".parse().unwrap()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let prefix = args
        .iter()
        .position(|arg| arg == "--prefix")
        .and_then(|i| args.get(i + 1))
        .cloned()
        .unwrap_or_else(|| "Widget".to_string());

    let bluetooth = Bluetooth::new().await?;
    for adapter in bluetooth.get_adapters() {
        println!("Adapter {}: {}", adapter.index, adapter.identifier);
    }

    println!("Looking for a device named {}*...\n", prefix);
    let options = RequestDeviceOptions::new()
        .with_filter(DeviceFilter::new().with_name_prefix(prefix))
        .with_timeout(Duration::from_secs(5));
    let device = bluetooth.request_device(options).await?;

    println!("Found device:");
    println!("  ID: {}", device.id());
    println!("  Name: {:?}", device.name());
    println!("  RSSI: {:?} dBm", device.rssi());

    let _handle = device.events().on(EventKind::GattServerDisconnected, |event| {
        println!("Disconnected from {:?}", event.device_id);
    });

    let gatt = device.gatt().connect().await?;

    let services = gatt.get_primary_services().await?;
    println!("\nPrimary services:");
    for service in &services {
        println!("  {}", service.uuid());
        for characteristic in service.get_characteristics().await? {
            println!(
                "    {} {:?}",
                characteristic.uuid(),
                characteristic.properties()
            );
        }
    }

    match gatt.get_primary_service("device_information").await {
        Ok(service) => {
            let model = service
                .get_characteristic("model_number_string")
                .await?
                .read_value()
                .await?;
            println!("\nModel: {}", String::from_utf8_lossy(&model));
        }
        Err(e) => println!("\nNo device information: {}", e),
    }

    if let Ok(service) = gatt.get_primary_service(BATTERY_SERVICE_UUID).await {
        let level = service
            .get_characteristic("battery_level")
            .await?
            .read_value()
            .await?;
        if let Some(percent) = level.first() {
            println!("Battery: {}%", percent);
        }
    }

    gatt.disconnect().await?;
    Ok(())
}
