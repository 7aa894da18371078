//! # modemo
//!
//! Discovery of and communication with cellular modems over their serial AT
//! command interface.
//!
//! The crate enumerates candidate serial devices, finds the one a modem
//! answers on without ever hanging on a wedged device, and runs AT commands
//! over it with typed decoding of the standard 3GPP replies and a few vendor
//! extensions.
//!
//! - [`device`]: candidate enumeration and ranking
//! - [`probe`]: isolated, time-bounded connection probes
//! - [`detect`]: two-phase auto-detection over the ranked candidates
//! - [`session`]: request/response command exchange on one open port
//! - [`decode`]: AT reply grammars
//! - [`vendor`]: manufacturer identification and vendor command sets
//! - [`diagnostics`]: predefined command suites
//! - [`configure`]: forbidden network list, APN and operator selection
//! - [`service`]: pausing a port-grabbing system service during detection
//!
//! ## Features
//!
//! - `native` (default): serial access through the `serialport` crate
//! - `serde`: `Serialize` on result types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use modemo::{
//!     AutoDetector, ConnectionProbe, DetectConfig, ModemSession, NativeBackend, PortEnumerator,
//!     ProbeConfig, SessionConfig, SystemPorts,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = Arc::new(NativeBackend::new());
//!     let probe = ConnectionProbe::new(backend.clone(), ProbeConfig::default());
//!     let detector = AutoDetector::new(probe, DetectConfig::default());
//!
//!     let report = detector.detect(&SystemPorts.candidates())?;
//!     let Some(port) = report.working.first() else {
//!         return Ok(());
//!     };
//!
//!     let mut session = ModemSession::connect(
//!         backend.as_ref(),
//!         &port.candidate.path,
//!         port.baud,
//!         SessionConfig::default(),
//!     )?;
//!     let reply = session.send("AT+CSQ");
//!     for (name, value) in reply.fields() {
//!         println!("{name}: {value}");
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod configure;
pub mod decode;
pub mod detect;
pub mod device;
pub mod diagnostics;
pub mod error;
pub mod port;
pub mod probe;
pub mod service;
pub mod session;
pub mod vendor;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use {
    device::SystemPorts,
    port::{NativeBackend, NativePort},
};
pub use {
    configure::{ApnSettings, PdpType, SelectionMode},
    decode::{FieldMap, FieldValue, Record, ResponseDecoder},
    detect::{AutoDetector, DetectConfig, DetectionReport, ScanEvent, Selection, WorkingPort},
    device::{DeviceClass, PortEnumerator, SerialPortCandidate, detect_ports, format_port_list},
    diagnostics::{CheckResult, CheckStep, DiagnosticReport},
    error::{Error, Result},
    port::{FlowControl, Port, SerialBackend, SerialConfig},
    probe::{ConnectionAttempt, ConnectionProbe, ProbeConfig, ProbeMode, ProbeOutcome},
    service::{ServiceControl, ServiceLease, SystemdService},
    session::{CommandError, CommandResponse, ModemSession, SessionConfig},
    vendor::{Vendor, VendorProfile},
};
