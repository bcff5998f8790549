//! GATT connection state and epochs.
//!
//! A [`GattLink`] is shared by a GATT server and every attribute object
//! discovered through it. Each successful connect starts a new epoch with a
//! fresh generation number; attribute objects remember the generation they
//! were created in so handles from an earlier connection are detected.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::ble::binding::PeripheralBinding;
use crate::error::{Error, Result};

/// Connection state of a GATT server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not connected.
    #[default]
    Disconnected,
    /// Native connect call in flight.
    Connecting,
    /// Connected.
    Connected,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// Peripheral handle plus the connection epoch it is in.
pub(crate) struct GattLink {
    peripheral: Arc<dyn PeripheralBinding>,
    state: RwLock<ConnectionState>,
    generation: AtomicU64,
    /// Number of the latest connect attempt. Only changed under the state
    /// write lock.
    attempt: AtomicU64,
}

impl GattLink {
    pub(crate) fn new(peripheral: Arc<dyn PeripheralBinding>) -> Self {
        Self {
            peripheral,
            state: RwLock::new(ConnectionState::Disconnected),
            generation: AtomicU64::new(0),
            attempt: AtomicU64::new(0),
        }
    }

    pub(crate) fn peripheral(&self) -> &Arc<dyn PeripheralBinding> {
        &self.peripheral
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Generation of the current (or most recent) epoch.
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Move to `Connecting`, failing if already connected or connecting.
    /// Returns the attempt number to hand to [`Self::open_epoch`].
    pub(crate) fn begin_connect(&self) -> Result<u64> {
        let mut state = self.state.write();
        match *state {
            ConnectionState::Connected => Err(Error::ConnectionRefused {
                reason: "already connected".to_string(),
            }),
            ConnectionState::Connecting => Err(Error::ConnectionRefused {
                reason: "connection already in progress".to_string(),
            }),
            ConnectionState::Disconnected => {
                *state = ConnectionState::Connecting;
                Ok(self.attempt.fetch_add(1, Ordering::SeqCst) + 1)
            }
        }
    }

    fn is_pending(&self, state: ConnectionState, attempt: u64) -> bool {
        state == ConnectionState::Connecting && self.attempt.load(Ordering::SeqCst) == attempt
    }

    /// Finish connect attempt `attempt` and open a new epoch.
    ///
    /// # Errors
    ///
    /// `ConnectionRefused` if the link was closed while the attempt was in
    /// flight. The link stays `Disconnected`.
    pub(crate) fn open_epoch(&self, attempt: u64) -> Result<u64> {
        let mut state = self.state.write();
        if !self.is_pending(*state, attempt) {
            debug!("{} connect attempt {} was abandoned", self.peripheral.id(), attempt);
            return Err(Error::ConnectionRefused {
                reason: "disconnected while connecting".to_string(),
            });
        }
        *state = ConnectionState::Connected;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("{} opened connection epoch {}", self.peripheral.id(), generation);
        Ok(generation)
    }

    /// Give up connect attempt `attempt` after the native connect failed.
    pub(crate) fn abort_connect(&self, attempt: u64) {
        let mut state = self.state.write();
        if self.is_pending(*state, attempt) {
            *state = ConnectionState::Disconnected;
        }
    }

    /// Return to `Disconnected`, abandoning any connect attempt in flight.
    /// Returns whether the link was connected.
    pub(crate) fn close(&self) -> bool {
        let mut state = self.state.write();
        let was_connected = state.is_connected();
        if *state == ConnectionState::Connecting {
            self.attempt.fetch_add(1, Ordering::SeqCst);
        }
        *state = ConnectionState::Disconnected;
        was_connected
    }

    /// Close the link only if `generation` is still the current epoch.
    /// Returns whether a connected epoch was closed.
    pub(crate) fn close_epoch(&self, generation: u64) -> bool {
        let mut state = self.state.write();
        if self.generation() != generation || !state.is_connected() {
            return false;
        }
        *state = ConnectionState::Disconnected;
        true
    }

    /// Gate for attribute operations: connected, and in the epoch the
    /// attribute was discovered in.
    pub(crate) fn ensure(&self, generation: u64, uuid: &uuid::Uuid) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        if self.generation() != generation {
            debug!(
                "{} belongs to epoch {}, current is {}",
                uuid,
                generation,
                self.generation()
            );
            return Err(Error::stale(uuid));
        }
        Ok(())
    }
}
