//! Error types for the webgatt crate.

use thiserror::Error;

use crate::ble::binding::BindingError;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Failure reported by the native binding outside a GATT operation
    /// (scan start/stop, service enumeration).
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] BindingError),

    /// No Bluetooth adapter is present on this system.
    #[error("No Bluetooth adapter available")]
    NoAdapter,

    /// Operation requires an active GATT connection.
    #[error("GATT server not connected")]
    NotConnected,

    /// A UUID lookup matched nothing.
    #[error("{kind} not found: {uuid}")]
    NotFound {
        /// What was being looked up ("service", "characteristic", ...).
        kind: &'static str,
        /// The normalized UUID that was searched for.
        uuid: String,
    },

    /// A singular UUID lookup matched more than one attribute.
    #[error("{count} {kind}s match {uuid}, expected exactly one")]
    AmbiguousMatch {
        /// What was being looked up.
        kind: &'static str,
        /// The normalized UUID that was searched for.
        uuid: String,
        /// Number of matches.
        count: usize,
    },

    /// The input could not be normalized to a 128-bit UUID.
    #[error("Invalid UUID: {input:?}")]
    InvalidUuid {
        /// The rejected input.
        input: String,
    },

    /// A required argument is missing or empty.
    #[error("Invalid argument: {name}: {reason}")]
    InvalidArgument {
        /// The name of the argument.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The requested operation is not supported.
    #[error("Operation not supported: {operation}")]
    NotSupported {
        /// Description of the unsupported operation.
        operation: String,
    },

    /// The operation exists in the Web Bluetooth surface but is not implemented.
    #[error("Operation not implemented: {operation}")]
    NotImplemented {
        /// Name of the operation.
        operation: String,
    },

    /// The native layer refused the connection.
    #[error("Connection refused: {reason}")]
    ConnectionRefused {
        /// Description of why the connection failed.
        reason: String,
    },

    /// The native layer rejected a characteristic write.
    #[error("Write failed: {reason}")]
    WriteFailed {
        /// Description of why the write failed.
        reason: String,
    },

    /// The attribute handle is no longer valid (re-enumerated services,
    /// reconnected server, native rejection).
    #[error("Stale handle: {uuid}")]
    StaleHandle {
        /// UUID of the attribute whose handle went stale.
        uuid: String,
    },

    /// A scan cycle completed without a matching device.
    #[error("No devices found")]
    NoDevicesFound,

    /// The operation was canceled through its cancellation token.
    #[error("Operation canceled")]
    Canceled,
}

impl Error {
    pub(crate) fn invalid_argument(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn not_implemented(operation: impl Into<String>) -> Self {
        Self::NotImplemented {
            operation: operation.into(),
        }
    }

    pub(crate) fn stale(uuid: impl ToString) -> Self {
        Self::StaleHandle {
            uuid: uuid.to_string(),
        }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
