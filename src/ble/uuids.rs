//! Bluetooth UUID normalization.
//!
//! Every lookup and filter in the crate compares UUIDs in canonical 128-bit
//! form. Callers may name an attribute by a 16/32-bit alias, a hex string, a
//! full UUID string in any case, or a standard GATT name such as
//! `"heart_rate"`; [`BluetoothUuid::resolve`] turns any of these into a
//! [`Uuid`] whose `Display` is the canonical lowercase string.

use std::fmt;

use uuid::Uuid;

use crate::error::{Error, Result};

/// The Bluetooth base UUID `00000000-0000-1000-8000-00805f9b34fb`.
pub const BASE_UUID: Uuid = Uuid::from_u128(0x0000_0000_0000_1000_8000_00805f9b34fb);

/// Generic Access service.
pub const GENERIC_ACCESS_SERVICE_UUID: Uuid = from_alias(0x1800);
/// Device Information service.
pub const DEVICE_INFO_SERVICE_UUID: Uuid = from_alias(0x180a);
/// Battery service.
pub const BATTERY_SERVICE_UUID: Uuid = from_alias(0x180f);
/// Model Number String characteristic.
pub const MODEL_NUMBER_UUID: Uuid = from_alias(0x2a24);
/// Manufacturer Name String characteristic.
pub const MANUFACTURER_NAME_UUID: Uuid = from_alias(0x2a29);
/// Client Characteristic Configuration descriptor.
pub const CLIENT_CHARACTERISTIC_CONFIGURATION_UUID: Uuid = from_alias(0x2902);

/// Expand a 16- or 32-bit alias onto the Bluetooth base UUID.
pub const fn from_alias(alias: u32) -> Uuid {
    Uuid::from_u128(((alias as u128) << 96) | 0x0000_0000_0000_1000_8000_00805f9b34fb)
}

/// Which standard-name table a textual name is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UuidKind {
    /// GATT services.
    Service,
    /// GATT characteristics.
    Characteristic,
    /// GATT descriptors.
    Descriptor,
}

impl UuidKind {
    fn table(&self) -> &'static [(&'static str, u32)] {
        match self {
            Self::Service => SERVICE_NAMES,
            Self::Characteristic => CHARACTERISTIC_NAMES,
            Self::Descriptor => DESCRIPTOR_NAMES,
        }
    }
}

impl fmt::Display for UuidKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service => write!(f, "service"),
            Self::Characteristic => write!(f, "characteristic"),
            Self::Descriptor => write!(f, "descriptor"),
        }
    }
}

/// A UUID as a caller may spell it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BluetoothUuid {
    /// A 16- or 32-bit alias.
    Alias(u32),
    /// A full UUID.
    Uuid(Uuid),
    /// A hex alias, UUID string, or standard name.
    Text(String),
}

impl BluetoothUuid {
    /// Normalize to the canonical 128-bit UUID.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty string, `InvalidUuid` for a malformed
    /// string or a name missing from the `kind` table.
    pub fn resolve(&self, kind: UuidKind) -> Result<Uuid> {
        match self {
            Self::Alias(alias) => Ok(from_alias(*alias)),
            Self::Uuid(uuid) => Ok(*uuid),
            Self::Text(text) => parse_text(text, kind),
        }
    }
}

impl From<u16> for BluetoothUuid {
    fn from(alias: u16) -> Self {
        Self::Alias(alias as u32)
    }
}

impl From<u32> for BluetoothUuid {
    fn from(alias: u32) -> Self {
        Self::Alias(alias)
    }
}

impl From<Uuid> for BluetoothUuid {
    fn from(uuid: Uuid) -> Self {
        Self::Uuid(uuid)
    }
}

impl From<&str> for BluetoothUuid {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for BluetoothUuid {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&String> for BluetoothUuid {
    fn from(text: &String) -> Self {
        Self::Text(text.clone())
    }
}

fn parse_text(text: &str, kind: UuidKind) -> Result<Uuid> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_argument("uuid", "must not be empty"));
    }

    if let Some((_, alias)) = kind.table().iter().find(|(name, _)| *name == trimmed) {
        return Ok(from_alias(*alias));
    }

    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if matches!(hex.len(), 4 | 8) && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return u32::from_str_radix(hex, 16)
            .map(from_alias)
            .map_err(|_| Error::InvalidUuid {
                input: text.to_string(),
            });
    }

    if trimmed.len() == 36 {
        if let Ok(uuid) = Uuid::parse_str(trimmed) {
            return Ok(uuid);
        }
    }

    Err(Error::InvalidUuid {
        input: text.to_string(),
    })
}

/// Resolve a service UUID or name.
pub fn get_service(input: impl Into<BluetoothUuid>) -> Result<Uuid> {
    input.into().resolve(UuidKind::Service)
}

/// Resolve a characteristic UUID or name.
pub fn get_characteristic(input: impl Into<BluetoothUuid>) -> Result<Uuid> {
    input.into().resolve(UuidKind::Characteristic)
}

/// Resolve a descriptor UUID or name.
pub fn get_descriptor(input: impl Into<BluetoothUuid>) -> Result<Uuid> {
    input.into().resolve(UuidKind::Descriptor)
}

/// Canonical lowercase string form of `input`.
pub fn canonical_uuid(input: impl Into<BluetoothUuid>, kind: UuidKind) -> Result<String> {
    Ok(input.into().resolve(kind)?.to_string())
}

/// Short alias of a base-derived UUID, if it has one.
pub fn to_alias(uuid: &Uuid) -> Option<u32> {
    let value = uuid.as_u128();
    if value & ((1u128 << 96) - 1) == BASE_UUID.as_u128() {
        Some((value >> 96) as u32)
    } else {
        None
    }
}

const SERVICE_NAMES: &[(&str, u32)] = &[
    ("generic_access", 0x1800),
    ("generic_attribute", 0x1801),
    ("immediate_alert", 0x1802),
    ("link_loss", 0x1803),
    ("tx_power", 0x1804),
    ("current_time", 0x1805),
    ("reference_time_update", 0x1806),
    ("next_dst_change", 0x1807),
    ("glucose", 0x1808),
    ("health_thermometer", 0x1809),
    ("device_information", 0x180a),
    ("heart_rate", 0x180d),
    ("phone_alert_status", 0x180e),
    ("battery_service", 0x180f),
    ("blood_pressure", 0x1810),
    ("alert_notification", 0x1811),
    ("human_interface_device", 0x1812),
    ("scan_parameters", 0x1813),
    ("running_speed_and_cadence", 0x1814),
    ("automation_io", 0x1815),
    ("cycling_speed_and_cadence", 0x1816),
    ("cycling_power", 0x1818),
    ("location_and_navigation", 0x1819),
    ("environmental_sensing", 0x181a),
    ("body_composition", 0x181b),
    ("user_data", 0x181c),
    ("weight_scale", 0x181d),
    ("bond_management", 0x181e),
    ("continuous_glucose_monitoring", 0x181f),
    ("internet_protocol_support", 0x1820),
    ("indoor_positioning", 0x1821),
    ("pulse_oximeter", 0x1822),
    ("http_proxy", 0x1823),
    ("transport_discovery", 0x1824),
    ("object_transfer", 0x1825),
    ("fitness_machine", 0x1826),
    ("mesh_provisioning", 0x1827),
    ("mesh_proxy", 0x1828),
    ("reconnection_configuration", 0x1829),
];

const CHARACTERISTIC_NAMES: &[(&str, u32)] = &[
    ("gap.device_name", 0x2a00),
    ("gap.appearance", 0x2a01),
    ("gap.peripheral_privacy_flag", 0x2a02),
    ("gap.reconnection_address", 0x2a03),
    ("gap.peripheral_preferred_connection_parameters", 0x2a04),
    ("gatt.service_changed", 0x2a05),
    ("alert_level", 0x2a06),
    ("tx_power_level", 0x2a07),
    ("date_time", 0x2a08),
    ("day_of_week", 0x2a09),
    ("day_date_time", 0x2a0a),
    ("exact_time_256", 0x2a0c),
    ("dst_offset", 0x2a0d),
    ("time_zone", 0x2a0e),
    ("local_time_information", 0x2a0f),
    ("time_with_dst", 0x2a11),
    ("time_accuracy", 0x2a12),
    ("time_source", 0x2a13),
    ("reference_time_information", 0x2a14),
    ("time_update_control_point", 0x2a16),
    ("time_update_state", 0x2a17),
    ("glucose_measurement", 0x2a18),
    ("battery_level", 0x2a19),
    ("temperature_measurement", 0x2a1c),
    ("temperature_type", 0x2a1d),
    ("intermediate_temperature", 0x2a1e),
    ("measurement_interval", 0x2a21),
    ("boot_keyboard_input_report", 0x2a22),
    ("system_id", 0x2a23),
    ("model_number_string", 0x2a24),
    ("serial_number_string", 0x2a25),
    ("firmware_revision_string", 0x2a26),
    ("hardware_revision_string", 0x2a27),
    ("software_revision_string", 0x2a28),
    ("manufacturer_name_string", 0x2a29),
    ("ieee_11073-20601_regulatory_certification_data_list", 0x2a2a),
    ("current_time", 0x2a2b),
    ("scan_refresh", 0x2a31),
    ("boot_keyboard_output_report", 0x2a32),
    ("boot_mouse_input_report", 0x2a33),
    ("glucose_measurement_context", 0x2a34),
    ("blood_pressure_measurement", 0x2a35),
    ("intermediate_cuff_pressure", 0x2a36),
    ("heart_rate_measurement", 0x2a37),
    ("body_sensor_location", 0x2a38),
    ("heart_rate_control_point", 0x2a39),
    ("alert_status", 0x2a3f),
    ("ringer_control_point", 0x2a40),
    ("ringer_setting", 0x2a41),
    ("alert_category_id_bit_mask", 0x2a42),
    ("alert_category_id", 0x2a43),
    ("alert_notification_control_point", 0x2a44),
    ("unread_alert_status", 0x2a45),
    ("new_alert", 0x2a46),
    ("supported_new_alert_category", 0x2a47),
    ("supported_unread_alert_category", 0x2a48),
    ("blood_pressure_feature", 0x2a49),
    ("hid_information", 0x2a4a),
    ("report_map", 0x2a4b),
    ("hid_control_point", 0x2a4c),
    ("report", 0x2a4d),
    ("protocol_mode", 0x2a4e),
    ("scan_interval_window", 0x2a4f),
    ("pnp_id", 0x2a50),
    ("glucose_feature", 0x2a51),
    ("record_access_control_point", 0x2a52),
    ("rsc_measurement", 0x2a53),
    ("rsc_feature", 0x2a54),
    ("sc_control_point", 0x2a55),
    ("csc_measurement", 0x2a5b),
    ("csc_feature", 0x2a5c),
    ("sensor_location", 0x2a5d),
    ("cycling_power_measurement", 0x2a63),
    ("cycling_power_vector", 0x2a64),
    ("cycling_power_feature", 0x2a65),
    ("cycling_power_control_point", 0x2a66),
    ("location_and_speed", 0x2a67),
    ("navigation", 0x2a68),
    ("temperature", 0x2a6e),
    ("humidity", 0x2a6f),
    ("weight_measurement", 0x2a9d),
    ("weight_scale_feature", 0x2a9e),
];

const DESCRIPTOR_NAMES: &[(&str, u32)] = &[
    ("gatt.characteristic_extended_properties", 0x2900),
    ("gatt.characteristic_user_description", 0x2901),
    ("gatt.client_characteristic_configuration", 0x2902),
    ("gatt.server_characteristic_configuration", 0x2903),
    ("gatt.characteristic_presentation_format", 0x2904),
    ("gatt.characteristic_aggregate_format", 0x2905),
    ("valid_range", 0x2906),
    ("external_report_reference", 0x2907),
    ("report_reference", 0x2908),
    ("number_of_digitals", 0x2909),
    ("value_trigger_setting", 0x290a),
    ("es_configuration", 0x290b),
    ("es_measurement", 0x290c),
    ("es_trigger_setting", 0x290d),
    ("time_trigger_setting", 0x290e),
];

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const DEVICE_INFO: &str = "0000180a-0000-1000-8000-00805f9b34fb";

    #[test]
    fn test_equivalent_spellings_normalize_identically() {
        let spellings: Vec<BluetoothUuid> = vec![
            "device_information".into(),
            0x180a_u16.into(),
            0x180a_u32.into(),
            "180a".into(),
            "180A".into(),
            "0x180a".into(),
            "0000180a".into(),
            DEVICE_INFO.into(),
            "0000180A-0000-1000-8000-00805F9B34FB".into(),
            DEVICE_INFO_SERVICE_UUID.into(),
        ];

        for spelling in spellings {
            assert_eq!(
                spelling.resolve(UuidKind::Service).unwrap().to_string(),
                DEVICE_INFO,
                "{:?}",
                spelling
            );
        }
    }

    #[test]
    fn test_names_resolve_against_their_own_table() {
        assert_eq!(get_characteristic("model_number_string").unwrap(), MODEL_NUMBER_UUID);
        assert_eq!(
            get_descriptor("gatt.client_characteristic_configuration").unwrap(),
            CLIENT_CHARACTERISTIC_CONFIGURATION_UUID
        );
        assert!(matches!(
            get_service("model_number_string"),
            Err(Error::InvalidUuid { .. })
        ));
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(get_service(""), Err(Error::InvalidArgument { .. })));
        assert!(matches!(get_service("   "), Err(Error::InvalidArgument { .. })));
        assert!(matches!(get_service("not_a_service"), Err(Error::InvalidUuid { .. })));
        assert!(matches!(get_service("18a"), Err(Error::InvalidUuid { .. })));
        assert!(matches!(get_service("zzzz"), Err(Error::InvalidUuid { .. })));
        assert!(matches!(
            get_service("0000180a-0000-1000-8000-00805f9b34fg"),
            Err(Error::InvalidUuid { .. })
        ));
    }

    #[test]
    fn test_canonical_uuid_is_lowercase() {
        let canonical = canonical_uuid("6E400001-B5A3-F393-E0A9-E50E24DCCA9E", UuidKind::Service).unwrap();
        assert_eq!(canonical, "6e400001-b5a3-f393-e0a9-e50e24dcca9e");
    }

    #[test]
    fn test_alias_round_trip_detection() {
        assert_eq!(to_alias(&MODEL_NUMBER_UUID), Some(0x2a24));
        assert_eq!(to_alias(&Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e24dcca9e)), None);
    }

    proptest! {
        #[test]
        fn prop_alias_spellings_agree(alias in any::<u16>()) {
            let from_int = BluetoothUuid::from(alias).resolve(UuidKind::Characteristic).unwrap();
            let lower = format!("{:04x}", alias);
            let upper = format!("0x{:04X}", alias);
            let full = from_int.to_string().to_uppercase();

            prop_assert_eq!(get_characteristic(lower.as_str()).unwrap(), from_int);
            prop_assert_eq!(get_characteristic(upper.as_str()).unwrap(), from_int);
            prop_assert_eq!(get_characteristic(full.as_str()).unwrap(), from_int);
            prop_assert_eq!(to_alias(&from_int), Some(alias as u32));
        }

        #[test]
        fn prop_full_uuids_normalize_case_insensitively(value in any::<u128>()) {
            let uuid = Uuid::from_u128(value);
            let upper = uuid.hyphenated().to_string().to_uppercase();
            let canonical = canonical_uuid(upper.as_str(), UuidKind::Descriptor).unwrap();
            prop_assert_eq!(canonical, uuid.to_string());
        }
    }
}
