//! Native serial port implementation using the `serialport` crate.
//!
//! This module provides the serial backend for Linux, macOS and Windows.
//! On unix the preflight also runs the device-node checks (existence,
//! access, UUCP lock, non-blocking open) that tell a busy port apart from a
//! silent one.

use {
    crate::{
        error::Result,
        port::{FlowControl, Port, SerialBackend, SerialConfig, Unavailable},
    },
    log::trace,
    serialport::ClearBuffer,
    std::io::{Read, Write},
};

/// Native serial port implementation.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    baud_rate: u32,
    flow_control: FlowControl,
}

impl NativePort {
    /// Open a serial port with the given configuration (8N1).
    pub fn open(config: &SerialConfig) -> Result<Self> {
        trace!(
            "Opening {} at {} baud (flow control: {})",
            config.port_name, config.baud_rate, config.flow_control
        );
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(
                config
                    .flow_control
                    .into(),
            )
            .open()?;

        Ok(Self {
            port: Some(port),
            name: config
                .port_name
                .clone(),
            baud_rate: config.baud_rate,
            flow_control: config.flow_control,
        })
    }
}

impl Port for NativePort {
    fn name(&self) -> &str {
        &self.name
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn flow_control(&self) -> FlowControl {
        self.flow_control
    }

    fn bytes_to_read(&self) -> Result<usize> {
        match self.port {
            Some(ref p) => Ok(usize::try_from(p.bytes_to_read()?).unwrap_or(usize::MAX)),
            None => Ok(0),
        }
    }

    fn clear_input(&mut self) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.clear(ClearBuffer::Input)?;
        }
        Ok(())
    }

    fn clear_buffers(&mut self) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.clear(ClearBuffer::All)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        // Take ownership of the port and let it drop (close)
        self.port
            .take();
        Ok(())
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
            .and_then(|p| p.read(buf))
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
            .and_then(|p| p.write(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
            .and_then(std::io::Write::flush)
    }
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => Self::None,
            FlowControl::Hardware => Self::Hardware,
        }
    }
}

/// Directory holding UUCP-style `LCK..<device>` lock files.
#[cfg(unix)]
const LOCK_DIR: &str = "/var/lock";

/// Serial backend for the host operating system.
#[derive(Debug, Clone, Default)]
pub struct NativeBackend;

impl NativeBackend {
    /// Create the native backend.
    pub fn new() -> Self {
        Self
    }
}

impl SerialBackend for NativeBackend {
    #[cfg(unix)]
    fn preflight(&self, path: &str) -> std::result::Result<(), Unavailable> {
        use std::{fs::OpenOptions, os::unix::fs::OpenOptionsExt, path::Path};

        let device = Path::new(path);
        if !device.exists() {
            return Err(Unavailable::NotFound);
        }
        if !has_read_write_access(device) {
            return Err(Unavailable::PermissionDenied);
        }
        if lock_file_path(path).is_some_and(|lock| lock.exists()) {
            return Err(Unavailable::Locked);
        }

        // A blocking open can hang on a wedged driver. O_NONBLOCK fails fast.
        match OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_NOCTTY)
            .open(device)
        {
            Ok(file) => {
                drop(file);
                Ok(())
            },
            Err(e) => {
                trace!("Non-blocking open of {path} failed: {e}");
                Err(Unavailable::Kernel {
                    errno: e.raw_os_error(),
                    message: os_error_text(&e),
                })
            },
        }
    }

    #[cfg(not(unix))]
    fn preflight(&self, _path: &str) -> std::result::Result<(), Unavailable> {
        Ok(())
    }

    fn open(&self, config: &SerialConfig) -> Result<Box<dyn Port>> {
        Ok(Box::new(NativePort::open(config)?))
    }
}

/// Path of the UUCP lock file that would claim `path`.
#[cfg(unix)]
fn lock_file_path(path: &str) -> Option<std::path::PathBuf> {
    let name = std::path::Path::new(path).file_name()?;
    Some(std::path::Path::new(LOCK_DIR).join(format!("LCK..{}", name.to_string_lossy())))
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn has_read_write_access(path: &std::path::Path) -> bool {
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = std::ffi::CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    // SAFETY: `c_path` is NUL-terminated and outlives the call.
    unsafe { libc::access(c_path.as_ptr(), libc::R_OK | libc::W_OK) == 0 }
}

/// OS error text without the trailing "(os error N)" that `io::Error` adds.
#[cfg(unix)]
fn os_error_text(e: &std::io::Error) -> String {
    let text = e.to_string();
    match text.find(" (os error") {
        Some(idx) => text[..idx].to_string(),
        None => text,
    }
}
