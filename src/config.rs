//! Hub configuration.

use std::time::Duration;

/// Default scan-cycle length for `request_device`/`request_devices`.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default scan-cycle length for continuous scans.
pub const DEFAULT_SCAN_CYCLE: Duration = Duration::from_millis(200);

/// Default buffer size of each event target's broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Tunables for a [`crate::Bluetooth`] hub.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BluetoothConfig {
    /// Scan-cycle length used when a request omits `timeout`.
    pub request_timeout: Duration,
    /// Scan-cycle length used when a continuous scan omits `timeout`.
    pub scan_cycle: Duration,
    /// Broadcast buffer size for every event target.
    pub event_capacity: usize,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            scan_cycle: DEFAULT_SCAN_CYCLE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl BluetoothConfig {
    /// Set the default request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the default scan-cycle length.
    pub fn with_scan_cycle(mut self, cycle: Duration) -> Self {
        self.scan_cycle = cycle;
        self
    }

    /// Set the per-target event buffer size.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BluetoothConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.scan_cycle, Duration::from_millis(200));
        assert_eq!(config.event_capacity, 64);
    }

    #[test]
    fn test_builder() {
        let config = BluetoothConfig::default()
            .with_request_timeout(Duration::from_millis(50))
            .with_scan_cycle(Duration::from_millis(10))
            .with_event_capacity(8);
        assert_eq!(config.request_timeout, Duration::from_millis(50));
        assert_eq!(config.scan_cycle, Duration::from_millis(10));
        assert_eq!(config.event_capacity, 8);
    }
}
