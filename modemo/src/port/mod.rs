//! Port abstraction for serial communication with a modem.
//!
//! The probe and session layers never talk to the operating system directly.
//! They go through two seams:
//!
//! - [`Port`]: an open byte stream with the few control operations the AT
//!   exchange needs (buffer clearing, pending byte count, close).
//! - [`SerialBackend`]: the factory that checks whether a device path is usable
//!   and opens it.
//!
//! ```text
//! +------------------+     +------------------+
//! |  ConnectionProbe |     |   ModemSession   |
//! +--------+---------+     +--------+---------+
//!          |                        |
//!          v                        v
//! +--------+------------------------+---------+
//! |              SerialBackend                |
//! +--------+------------------------+---------+
//!          |                        |
//!          v                        v
//! +--------+---------+     +--------+---------+
//! | NativeBackend    |     | scripted backend |
//! |   (serialport)   |     |   (unit tests)   |
//! +------------------+     +------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use modemo::port::Port;
//!
//! fn ping(port: &mut dyn Port) -> modemo::Result<usize> {
//!     port.clear_input()?;
//!     port.write_all_bytes(b"AT\r\n")?;
//!     std::thread::sleep(std::time::Duration::from_millis(200));
//!     port.bytes_to_read()
//! }
//! ```

#[cfg(test)]
pub(crate) mod mock;
#[cfg(feature = "native")]
pub mod native;

use std::{
    fmt,
    io::{Read, Write},
    time::Duration,
};

use crate::error::Result;

/// Serial port configuration.
///
/// Framing is always 8 data bits, no parity, one stop bit.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB2", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read timeout for a single blocking read.
    pub timeout: Duration,
    /// Flow control.
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: Duration::from_millis(1000),
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the flow control mode.
    #[must_use]
    pub fn with_flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// Hardware flow control (RTS/CTS).
    Hardware,
}

impl fmt::Display for FlowControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Hardware => write!(f, "RTS/CTS"),
        }
    }
}

/// Why a device path cannot be used, found before any handshake is tried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unavailable {
    /// The path does not exist.
    NotFound,
    /// The current user may not read and write the device.
    PermissionDenied,
    /// A UUCP lock file claims the device.
    Locked,
    /// The kernel refused a non-blocking open.
    Kernel {
        /// OS error number, when the platform reported one.
        errno: Option<i32>,
        /// OS error text.
        message: String,
    },
}

/// An open serial link.
pub trait Port: Read + Write + Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Get the configured baud rate.
    fn baud_rate(&self) -> u32;

    /// Get the configured flow control mode.
    fn flow_control(&self) -> FlowControl;

    /// Number of received bytes waiting to be read.
    fn bytes_to_read(&self) -> Result<usize>;

    /// Discard received bytes that have not been read yet.
    fn clear_input(&mut self) -> Result<()>;

    /// Discard pending input and output.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes and flush.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

/// Factory for [`Port`]s.
///
/// Implementations must be shareable across threads: the probe hands a clone
/// of its backend to every worker thread it spawns.
pub trait SerialBackend: Send + Sync {
    /// Cheap checks that need no handshake. Must not block.
    fn preflight(&self, path: &str) -> std::result::Result<(), Unavailable>;

    /// Open the device. May block for an unbounded time on broken hardware.
    fn open(&self, config: &SerialConfig) -> Result<Box<dyn Port>>;
}

/// Write/read faults worth retrying on the same handle.
pub(crate) fn is_transient(kind: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind;

    matches!(
        kind,
        ErrorKind::BrokenPipe | ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock
    )
}

#[cfg(feature = "native")]
pub use native::{NativeBackend, NativePort};
