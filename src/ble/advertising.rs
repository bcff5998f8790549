//! Advertisement snapshots.
//!
//! A [`ScanRecord`] is what the hub filters on: the identity and
//! manufacturer-specific payloads a peripheral advertised during a scan
//! cycle.

use std::collections::BTreeMap;

use bytes::Bytes;

/// Manufacturer-specific advertisement payloads keyed by company identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManufacturerData(BTreeMap<u16, Bytes>);

impl ManufacturerData {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the payload for `company_identifier`.
    pub fn insert(&mut self, company_identifier: u16, data: impl Into<Bytes>) {
        self.0.insert(company_identifier, data.into());
    }

    /// Payload advertised under `company_identifier`.
    pub fn get(&self, company_identifier: u16) -> Option<&Bytes> {
        self.0.get(&company_identifier)
    }

    /// Whether `company_identifier` is present.
    pub fn contains(&self, company_identifier: u16) -> bool {
        self.0.contains_key(&company_identifier)
    }

    /// Iterate in company-identifier order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Bytes)> {
        self.0.iter().map(|(id, data)| (*id, data))
    }

    /// Number of companies with data.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no manufacturer data was advertised.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `company_identifier` is present and its payload starts with
    /// `prefix`, byte for byte. An empty prefix only checks presence.
    pub fn matches_prefix(&self, company_identifier: u16, prefix: &[u8]) -> bool {
        match self.0.get(&company_identifier) {
            Some(data) => data.len() >= prefix.len() && data[..prefix.len()] == *prefix,
            None => false,
        }
    }
}

impl<D: Into<Bytes>> FromIterator<(u16, D)> for ManufacturerData {
    fn from_iter<I: IntoIterator<Item = (u16, D)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(id, data)| (id, data.into())).collect())
    }
}

/// What a peripheral advertised during a scan cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    /// Stable peripheral identifier; becomes the device id.
    pub id: String,
    /// Advertised local name.
    pub name: Option<String>,
    /// Peripheral address as reported by the platform.
    pub address: String,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
    /// Advertised transmit power in dBm.
    pub tx_power: Option<i16>,
    /// Manufacturer-specific payloads.
    pub manufacturer_data: ManufacturerData,
}

impl ScanRecord {
    /// Record with only an id set.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            address: id.clone(),
            id,
            name: None,
            rssi: None,
            tx_power: None,
            manufacturer_data: ManufacturerData::new(),
        }
    }

    /// Set the advertised name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the signal strength.
    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Add manufacturer data for `company_identifier`.
    pub fn with_manufacturer_data(mut self, company_identifier: u16, data: impl Into<Bytes>) -> Self {
        self.manufacturer_data.insert(company_identifier, data);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_prefix() {
        let data: ManufacturerData = [(0x004c_u16, vec![0x02, 0x15, 0x99, 0x01])]
            .into_iter()
            .collect();

        assert!(data.matches_prefix(0x004c, &[0x02, 0x15]));
        assert!(data.matches_prefix(0x004c, &[]));
        assert!(data.matches_prefix(0x004c, &[0x02, 0x15, 0x99, 0x01]));
        assert!(!data.matches_prefix(0x004c, &[0x02, 0x16]));
        assert!(!data.matches_prefix(0x004c, &[0x02, 0x15, 0x99, 0x01, 0x00]));
        assert!(!data.matches_prefix(0x0059, &[]));
    }

    #[test]
    fn test_scan_record_builder() {
        let record = ScanRecord::new("AA:BB")
            .with_name("Widget-A")
            .with_rssi(-60)
            .with_manufacturer_data(0x09c7, vec![1, 2]);

        assert_eq!(record.name.as_deref(), Some("Widget-A"));
        assert_eq!(record.address, "AA:BB");
        assert_eq!(record.manufacturer_data.len(), 1);
        assert_eq!(record.manufacturer_data.get(0x09c7).map(|b| b.as_ref()), Some(&[1u8, 2][..]));
    }
}
