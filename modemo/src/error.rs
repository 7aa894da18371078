//! Error types for modemo.

use std::{io, time::Duration};
use thiserror::Error;

/// Result type for modemo operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for modemo operations.
///
/// Probe and command failures are normally carried as values inside
/// [`ConnectionAttempt`](crate::probe::ConnectionAttempt) and
/// [`CommandResponse`](crate::session::CommandResponse). This type is what
/// they convert into when a caller decides a failure is fatal.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the serial link.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error reported by the native backend.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The device is missing, not accessible, locked or busy.
    #[error("Port {port} unavailable: {reason}")]
    PortUnavailable {
        /// Device path.
        port: String,
        /// Diagnostic reason, preserved verbatim from the failed check.
        reason: String,
    },

    /// A probe did not finish inside its wall-clock bound.
    #[error("Probe of {port} timed out after {:.1}s", .timeout.as_secs_f64())]
    ProbeTimeout {
        /// Device path.
        port: String,
        /// Bound that was exceeded.
        timeout: Duration,
    },

    /// The modem answered with something that is not an AT response.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A command was issued without an open session.
    #[error("No connection")]
    NoConnection,

    /// No candidate serial device exists on this host.
    #[error("No serial ports found")]
    DeviceNotFound,

    /// The operation was interrupted by the embedding application.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A value that cannot be sent to the modem as given.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

