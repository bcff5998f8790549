//! Device filters for discovery.
//!
//! A scan record matches a set of [`DeviceFilter`]s if it matches any one of
//! them; within one filter every field that is set must match.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::ble::advertising::ScanRecord;
use crate::ble::uuids::BluetoothUuid;
use crate::error::{Error, Result};

/// Manufacturer-data condition of a [`DeviceFilter`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ManufacturerDataFilter {
    /// Bluetooth SIG company identifier.
    pub company_identifier: u16,
    /// Bytes the payload must start with. `None` matches on presence alone.
    pub data_prefix: Option<Vec<u8>>,
}

impl ManufacturerDataFilter {
    /// Match any payload from `company_identifier`.
    pub fn new(company_identifier: u16) -> Self {
        Self {
            company_identifier,
            data_prefix: None,
        }
    }

    /// Require the payload to start with `prefix`.
    pub fn with_data_prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.data_prefix = Some(prefix.into());
        self
    }

    /// Whether `record` carries matching manufacturer data.
    pub fn matches(&self, record: &ScanRecord) -> bool {
        record.manufacturer_data.matches_prefix(
            self.company_identifier,
            self.data_prefix.as_deref().unwrap_or_default(),
        )
    }
}

/// One structured discovery filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceFilter {
    /// Exact advertised name.
    pub name: Option<String>,
    /// Case-sensitive prefix of the advertised name.
    pub name_prefix: Option<String>,
    /// Advertised service UUIDs. Filtering on services is not supported and
    /// a non-empty list is rejected.
    pub services: Vec<BluetoothUuid>,
    /// Every entry must match.
    pub manufacturer_data: Vec<ManufacturerDataFilter>,
}

impl DeviceFilter {
    /// Filter with no conditions. Add at least one before use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require an exact advertised name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Require the advertised name to start with `prefix`.
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    /// Require an advertised service. Rejected by `validate`.
    pub fn with_service(mut self, service: impl Into<BluetoothUuid>) -> Self {
        self.services.push(service.into());
        self
    }

    /// Require matching manufacturer data.
    pub fn with_manufacturer_data(mut self, filter: ManufacturerDataFilter) -> Self {
        self.manufacturer_data.push(filter);
        self
    }

    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.name_prefix.is_none()
            && self.services.is_empty()
            && self.manufacturer_data.is_empty()
    }

    /// Check the filter can be used for discovery.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a filter with no conditions or an empty name
    /// prefix, `NotSupported` for service filtering.
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::invalid_argument("filters", "filter has no conditions"));
        }
        if self.name_prefix.as_deref() == Some("") {
            return Err(Error::invalid_argument("name_prefix", "must not be empty"));
        }
        if !self.services.is_empty() {
            return Err(Error::NotSupported {
                operation: "filtering by service UUID".to_string(),
            });
        }
        Ok(())
    }

    /// Whether `record` satisfies every condition set on this filter.
    pub fn matches(&self, record: &ScanRecord) -> bool {
        let name = record.name.as_deref();

        if let Some(expected) = &self.name {
            if name != Some(expected.as_str()) {
                return false;
            }
        }

        if let Some(prefix) = &self.name_prefix {
            if !name.is_some_and(|name| name.starts_with(prefix.as_str())) {
                return false;
            }
        }

        self.manufacturer_data
            .iter()
            .all(|filter| filter.matches(record))
    }
}

/// Custom match function. Replaces structured filters when given.
pub type DevicePredicate = Arc<dyn Fn(&ScanRecord) -> bool + Send + Sync>;

/// Options for `request_device`, `request_devices` and `scan`.
#[derive(Clone, Default)]
pub struct RequestDeviceOptions {
    /// Structured filters; a device matching any one is accepted.
    pub filters: Vec<DeviceFilter>,
    /// Custom match function. Takes precedence over `filters`.
    pub filter: Option<DevicePredicate>,
    /// Scan-cycle length; the hub's configured default when `None`.
    pub timeout: Option<Duration>,
    /// Cancels the request when triggered.
    pub signal: Option<CancellationToken>,
}

impl RequestDeviceOptions {
    /// Options with no filters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a structured filter.
    pub fn with_filter(mut self, filter: DeviceFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Use a custom match function instead of structured filters.
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ScanRecord) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(predicate));
        self
    }

    /// Override the scan-cycle length.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Cancel the request when `signal` is triggered.
    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    pub(crate) fn matcher(&self) -> Result<DeviceMatcher> {
        if let Some(predicate) = &self.filter {
            return Ok(DeviceMatcher::Predicate(predicate.clone()));
        }
        if self.filters.is_empty() {
            return Err(Error::invalid_argument(
                "options",
                "either filters or filter must be given",
            ));
        }
        for filter in &self.filters {
            filter.validate()?;
        }
        Ok(DeviceMatcher::Filters(self.filters.clone()))
    }
}

impl std::fmt::Debug for RequestDeviceOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDeviceOptions")
            .field("filters", &self.filters)
            .field("filter", &self.filter.as_ref().map(|_| "<fn>"))
            .field("timeout", &self.timeout)
            .field("signal", &self.signal)
            .finish()
    }
}

/// Validated match rule for one request.
pub(crate) enum DeviceMatcher {
    Filters(Vec<DeviceFilter>),
    Predicate(DevicePredicate),
}

impl DeviceMatcher {
    pub(crate) fn matches(&self, record: &ScanRecord) -> bool {
        match self {
            Self::Filters(filters) => filters.iter().any(|filter| filter.matches(record)),
            Self::Predicate(predicate) => predicate(record),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ibeacon() -> ManufacturerDataFilter {
        ManufacturerDataFilter::new(0x004c).with_data_prefix(vec![0x02, 0x15])
    }

    #[test]
    fn test_manufacturer_prefix() {
        let beacon = ScanRecord::new("a").with_manufacturer_data(0x004c, vec![0x02, 0x15, 0x99, 0x01]);
        let other = ScanRecord::new("b").with_manufacturer_data(0x004c, vec![0x02, 0x16, 0x99]);
        let short = ScanRecord::new("c").with_manufacturer_data(0x004c, vec![0x02]);
        let absent = ScanRecord::new("d").with_manufacturer_data(0x0059, vec![0x02, 0x15]);

        assert!(ibeacon().matches(&beacon));
        assert!(!ibeacon().matches(&other));
        assert!(!ibeacon().matches(&short));
        assert!(!ibeacon().matches(&absent));

        let presence = ManufacturerDataFilter::new(0x004c);
        assert!(presence.matches(&other));
        assert!(!presence.matches(&absent));
    }

    #[test]
    fn test_name_fields() {
        let widget = ScanRecord::new("a").with_name("Widget-A");
        let unnamed = ScanRecord::new("b");

        assert!(DeviceFilter::new().with_name("Widget-A").matches(&widget));
        assert!(!DeviceFilter::new().with_name("Widget").matches(&widget));
        assert!(DeviceFilter::new().with_name_prefix("Widget").matches(&widget));
        assert!(!DeviceFilter::new().with_name_prefix("widget").matches(&widget));
        assert!(!DeviceFilter::new().with_name_prefix("Widget-A-long").matches(&widget));
        assert!(!DeviceFilter::new().with_name_prefix("W").matches(&unnamed));
    }

    #[test]
    fn test_fields_and_filters_or() {
        let record = ScanRecord::new("a")
            .with_name("Widget-A")
            .with_manufacturer_data(0x004c, vec![0x02, 0x15]);

        // AND within a filter.
        let both = DeviceFilter::new()
            .with_name_prefix("Widget")
            .with_manufacturer_data(ibeacon());
        let conflicting = DeviceFilter::new()
            .with_name_prefix("Gadget")
            .with_manufacturer_data(ibeacon());
        assert!(both.matches(&record));
        assert!(!conflicting.matches(&record));

        // OR across filters.
        let matcher = RequestDeviceOptions::new()
            .with_filter(conflicting)
            .with_filter(DeviceFilter::new().with_name("Widget-A"))
            .matcher()
            .unwrap();
        assert!(matcher.matches(&record));
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            RequestDeviceOptions::new().matcher(),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            RequestDeviceOptions::new().with_filter(DeviceFilter::new()).matcher(),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            RequestDeviceOptions::new()
                .with_filter(DeviceFilter::new().with_name_prefix(""))
                .matcher(),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            RequestDeviceOptions::new()
                .with_filter(DeviceFilter::new().with_name("x").with_service("heart_rate"))
                .matcher(),
            Err(Error::NotSupported { .. })
        ));
    }

    #[test]
    fn test_predicate_bypasses_filters() {
        let options = RequestDeviceOptions::new()
            .with_filter(DeviceFilter::new().with_service(0x180d_u16))
            .with_predicate(|record| record.rssi.is_some_and(|rssi| rssi > -70));
        let matcher = options.matcher().unwrap();

        assert!(matcher.matches(&ScanRecord::new("a").with_rssi(-50)));
        assert!(!matcher.matches(&ScanRecord::new("b").with_rssi(-90)));
    }

    proptest! {
        #[test]
        fn prop_prefix_of_payload_matches(
            payload in proptest::collection::vec(any::<u8>(), 0..24),
            cut in 0usize..24,
        ) {
            let cut = cut.min(payload.len());
            let record = ScanRecord::new("p").with_manufacturer_data(0x004c, payload.clone());
            let filter = ManufacturerDataFilter::new(0x004c).with_data_prefix(payload[..cut].to_vec());
            prop_assert!(filter.matches(&record));
        }

        #[test]
        fn prop_altered_prefix_never_matches(
            payload in proptest::collection::vec(any::<u8>(), 1..24),
            index in 0usize..24,
        ) {
            let index = index % payload.len();
            let mut prefix = payload[..=index].to_vec();
            prefix[index] = prefix[index].wrapping_add(1);
            let record = ScanRecord::new("p").with_manufacturer_data(0x004c, payload);
            let filter = ManufacturerDataFilter::new(0x004c).with_data_prefix(prefix);
            prop_assert!(!filter.matches(&record));
        }
    }
}
