//! Serial device discovery and ranking.
//!
//! Multi-function modems expose several serial interfaces at once. Which one
//! accepts AT commands is not advertised, so candidates are ranked with a fixed
//! heuristic and then probed in that order.

#[cfg(feature = "native")]
use log::{debug, trace};

/// Platform class of a serial device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum DeviceClass {
    /// USB-serial interface (`ttyUSB*`, `cu.usbserial*`).
    UsbSerial,
    /// USB CDC-ACM interface (`ttyACM*`, `cu.usbmodem*`).
    CdcAcm,
    /// On-board hardware UART (`ttyAMA*`).
    HardwareUart,
    /// Legacy serial port (`ttyS*`).
    PlainSerial,
    /// Windows COM port.
    Com,
    /// Anything else the platform reported.
    Other,
}

impl DeviceClass {
    /// Get a human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            Self::UsbSerial => "USB Serial",
            Self::CdcAcm => "USB CDC-ACM",
            Self::HardwareUart => "Hardware UART",
            Self::PlainSerial => "Serial",
            Self::Com => "COM",
            Self::Other => "Unknown",
        }
    }
}

/// Rank assigned to COM ports whose number cannot be parsed.
const UNNUMBERED_COM_PRIORITY: i32 = 999;

/// Classify a device path and compute its priority (lower is preferred).
///
/// Returns the class, the interface index when the name carries one, and the
/// priority.
pub fn classify(path: &str) -> (DeviceClass, Option<u32>, i32) {
    let base = path
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(path);

    if let Some(rest) = base.strip_prefix("ttyUSB") {
        return match rest.parse::<u32>() {
            // Highest interface first: the AT port is usually the last one.
            Ok(index) => (
                DeviceClass::UsbSerial,
                Some(index),
                -i32::try_from(index).unwrap_or(i32::MAX),
            ),
            Err(_) => (DeviceClass::UsbSerial, None, 0),
        };
    }
    if let Some(rest) = base.strip_prefix("ttyACM") {
        return (DeviceClass::CdcAcm, rest.parse().ok(), 10);
    }
    if let Some(rest) = base.strip_prefix("ttyAMA") {
        return (DeviceClass::HardwareUart, rest.parse().ok(), 20);
    }
    if let Some(rest) = base.strip_prefix("ttyS") {
        return (DeviceClass::PlainSerial, rest.parse().ok(), 30);
    }
    if base.starts_with("cu.usbserial") || base.starts_with("tty.usbserial") {
        return (DeviceClass::UsbSerial, None, 0);
    }
    if base.starts_with("cu.usbmodem") || base.starts_with("tty.usbmodem") {
        return (DeviceClass::CdcAcm, None, 10);
    }
    if let Some(rest) = base
        .to_ascii_uppercase()
        .strip_prefix("COM")
    {
        return match rest.parse::<u32>() {
            Ok(number) => (
                DeviceClass::Com,
                Some(number),
                i32::try_from(number).unwrap_or(UNNUMBERED_COM_PRIORITY),
            ),
            Err(_) => (DeviceClass::Com, None, UNNUMBERED_COM_PRIORITY),
        };
    }

    (DeviceClass::Other, None, 40)
}

/// A device path as reported by the platform, before ranking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawPort {
    /// Device path.
    pub path: String,
    /// Manufacturer string (if available).
    pub vendor: Option<String>,
    /// Product/model string (if available).
    pub model: Option<String>,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl RawPort {
    /// A port with no descriptive metadata.
    pub fn bare(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

/// A ranked serial device, rebuilt on every detection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SerialPortCandidate {
    /// Device path (e.g., "/dev/ttyUSB2", "COM3").
    pub path: String,
    /// Platform device class.
    pub class: DeviceClass,
    /// Interface or port number parsed from the device name.
    pub interface: Option<u32>,
    /// Manufacturer string (if available).
    pub vendor: Option<String>,
    /// Product/model string (if available).
    pub model: Option<String>,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Serial number (if available).
    pub serial: Option<String>,
    /// Rank; lower is probed first.
    pub priority: i32,
}

impl SerialPortCandidate {
    /// Classify a raw port.
    pub fn from_raw(raw: RawPort) -> Self {
        let (class, interface, priority) = classify(&raw.path);
        Self {
            path: raw.path,
            class,
            interface,
            vendor: raw.vendor,
            model: raw.model,
            vid: raw.vid,
            pid: raw.pid,
            serial: raw.serial,
            priority,
        }
    }

    /// Short name of the device node ("ttyUSB2" for "/dev/ttyUSB2").
    pub fn short_name(&self) -> &str {
        self.path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.path)
    }
}

/// Sort candidates by priority, then path.
pub fn rank(candidates: &mut [SerialPortCandidate]) {
    candidates.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.path.cmp(&b.path))
    });
}

/// Source of raw serial devices.
///
/// Implementations must not fail: devices that cannot be inspected are still
/// reported, with whatever metadata is available.
pub trait PortEnumerator {
    /// List raw device paths and descriptors.
    fn raw_ports(&self) -> Vec<RawPort>;

    /// Classified and ranked candidates.
    fn candidates(&self) -> Vec<SerialPortCandidate> {
        let mut candidates: Vec<SerialPortCandidate> = self
            .raw_ports()
            .into_iter()
            .map(SerialPortCandidate::from_raw)
            .collect();
        rank(&mut candidates);
        candidates
    }
}

/// Enumerates the host's serial devices.
#[cfg(feature = "native")]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

#[cfg(feature = "native")]
impl SystemPorts {
    /// Device name prefixes scanned under `/dev` on Linux.
    #[cfg(target_os = "linux")]
    const DEV_PREFIXES: &'static [&'static str] = &["ttyUSB", "ttyACM", "ttyAMA", "ttyS"];

    fn platform_ports() -> Vec<RawPort> {
        match serialport::available_ports() {
            Ok(ports) => ports
                .into_iter()
                .map(|info| {
                    let mut raw = RawPort::bare(info.port_name);
                    if let serialport::SerialPortType::UsbPort(usb) = info.port_type {
                        trace!(
                            "Found USB port: {} (VID: {:04X}, PID: {:04X})",
                            raw.path, usb.vid, usb.pid
                        );
                        raw.vid = Some(usb.vid);
                        raw.pid = Some(usb.pid);
                        raw.vendor = usb.manufacturer;
                        raw.model = usb.product;
                        raw.serial = usb.serial_number;
                    }
                    raw
                })
                .collect(),
            Err(e) => {
                debug!("Failed to enumerate serial ports: {e}");
                Vec::new()
            },
        }
    }

    /// Device nodes under `/dev`, listed even when they cannot be opened.
    #[cfg(target_os = "linux")]
    fn dev_nodes() -> Vec<String> {
        let entries = match std::fs::read_dir("/dev") {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Failed to read /dev: {e}");
                return Vec::new();
            },
        };
        entries
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| {
                entry
                    .file_name()
                    .into_string()
                    .ok()
            })
            .filter(|name| {
                Self::DEV_PREFIXES
                    .iter()
                    .any(|prefix| {
                        name.strip_prefix(prefix)
                            .is_some_and(|rest| {
                                !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit())
                            })
                    })
            })
            .map(|name| format!("/dev/{name}"))
            .collect()
    }
}

#[cfg(feature = "native")]
impl PortEnumerator for SystemPorts {
    #[cfg(target_os = "linux")]
    fn raw_ports(&self) -> Vec<RawPort> {
        let described = Self::platform_ports();
        let mut ports: Vec<RawPort> = Self::dev_nodes()
            .into_iter()
            .map(|path| {
                described
                    .iter()
                    .find(|raw| raw.path == path)
                    .cloned()
                    .unwrap_or_else(|| RawPort::bare(path))
            })
            .collect();
        // udev may know devices with unusual names.
        for raw in described {
            if !ports.iter().any(|p| p.path == raw.path) {
                ports.push(raw);
            }
        }
        trace!("Enumerated {} serial device(s)", ports.len());
        ports
    }

    #[cfg(not(target_os = "linux"))]
    fn raw_ports(&self) -> Vec<RawPort> {
        Self::platform_ports()
    }
}

/// Ranked candidates for this host.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<SerialPortCandidate> {
    SystemPorts.candidates()
}

/// Ranked candidates for this host (no native backend compiled in).
#[cfg(not(feature = "native"))]
pub fn detect_ports() -> Vec<SerialPortCandidate> {
    Vec::new()
}

/// Format a list of candidates for display.
pub fn format_port_list(ports: &[SerialPortCandidate]) -> Vec<String> {
    let mut result = Vec::new();

    for port in ports {
        let device_info = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" [{} {vid:04X}:{pid:04X}]", port.class.name())
        } else {
            format!(" [{}]", port.class.name())
        };

        let product_info = match (&port.vendor, &port.model) {
            (Some(vendor), Some(model)) => format!(" - {vendor} {model}"),
            (None, Some(text)) | (Some(text), None) => format!(" - {text}"),
            (None, None) => String::new(),
        };

        result.push(format!("{}{}{}", port.path, device_info, product_info));
    }

    result
}
