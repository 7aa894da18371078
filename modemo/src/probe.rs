//! Time-bounded connection probing.
//!
//! Opening a serial device can block forever on a wedged USB interface, so
//! every probe runs its open and handshake on a detached worker thread. The
//! caller waits at most the mode's overall bound; a worker that is still
//! stuck after that is abandoned and the probe reports [`ProbeOutcome::Timeout`].
//! The abandoned thread keeps its handle until the blocking call returns.

use {
    crate::{
        device::SerialPortCandidate,
        error::{Error, Result},
        port::{FlowControl, Port, SerialBackend, SerialConfig, Unavailable},
        session::{ModemSession, SessionConfig},
    },
    log::{debug, trace},
    std::{
        fmt,
        io::{self, Read},
        sync::{Arc, mpsc},
        thread,
        time::{Duration, Instant},
    },
};

/// How hard to try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ProbeMode {
    /// One attempt, no flow control, short settles.
    Quick,
    /// Both flow control settings, retries, longer settles.
    Full,
}

impl fmt::Display for ProbeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quick => write!(f, "quick"),
            Self::Full => write!(f, "full"),
        }
    }
}

/// Timing for one probe mode.
#[derive(Debug, Clone)]
pub struct ModeTiming {
    /// Read timeout of the opened handle.
    pub read_timeout: Duration,
    /// Hard bound on the whole probe.
    pub overall_timeout: Duration,
    /// Pause after opening, before clearing buffers.
    pub open_settle: Duration,
    /// Pause after clearing buffers.
    pub clear_settle: Duration,
    /// Pause between writing `AT` and reading.
    pub write_settle: Duration,
    /// `AT` attempts per flow control setting.
    pub attempts: u32,
    /// Pause between attempts.
    pub retry_delay: Duration,
    /// Wait hint for the confirming session command.
    pub confirm_wait: Duration,
    /// Flow control settings to try, in order.
    pub flow_controls: Vec<FlowControl>,
}

impl ModeTiming {
    /// Headroom over [`ModeTiming::worst_case`] for the confirming session's
    /// drain and thread scheduling.
    pub const SLACK: Duration = Duration::from_secs(1);

    /// Time a responsive device can take when it answers on the last attempt
    /// of the last flow control setting: every settle, every retry, then the
    /// confirmation.
    pub fn worst_case(&self) -> Duration {
        let attempts = self.attempts.max(1);
        let per_flow = self.open_settle
            + self.clear_settle
            + self.write_settle.saturating_mul(attempts)
            + self.retry_delay.saturating_mul(attempts - 1);
        let flows = u32::try_from(self.flow_controls.len()).unwrap_or(u32::MAX);
        per_flow
            .saturating_mul(flows)
            .saturating_add(self.confirm_wait)
    }

    /// Timing for [`ProbeMode::Quick`].
    pub fn quick() -> Self {
        Self {
            read_timeout: Duration::from_millis(500),
            overall_timeout: Duration::from_millis(2500),
            open_settle: Duration::from_millis(100),
            clear_settle: Duration::ZERO,
            write_settle: Duration::from_millis(200),
            attempts: 1,
            retry_delay: Duration::ZERO,
            confirm_wait: Duration::from_millis(300),
            flow_controls: vec![FlowControl::None],
        }
    }

    /// Timing for [`ProbeMode::Full`]. The overall bound follows from the
    /// schedule, so a modem that needs hardware flow control and answers
    /// late still succeeds.
    pub fn full() -> Self {
        let mut timing = Self {
            read_timeout: Duration::from_secs(2),
            overall_timeout: Duration::ZERO,
            open_settle: Duration::from_millis(500),
            clear_settle: Duration::from_millis(200),
            write_settle: Duration::from_millis(500),
            attempts: 3,
            retry_delay: Duration::from_millis(300),
            confirm_wait: Duration::from_secs(1),
            flow_controls: vec![FlowControl::None, FlowControl::Hardware],
        };
        timing.overall_timeout = timing.worst_case() + Self::SLACK;
        timing
    }
}

/// Probe settings.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Paths never probed. Entries match the full path or its last component.
    pub deny_list: Vec<String>,
    /// Quick-mode timing.
    pub quick: ModeTiming,
    /// Full-mode timing.
    pub full: ModeTiming,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            deny_list: Vec::new(),
            quick: ModeTiming::quick(),
            full: ModeTiming::full(),
        }
    }
}

impl ProbeConfig {
    /// Timing for `mode`.
    pub fn timing(&self, mode: ProbeMode) -> &ModeTiming {
        match mode {
            ProbeMode::Quick => &self.quick,
            ProbeMode::Full => &self.full,
        }
    }

    /// Whether `path` is on the deny list.
    pub fn is_denied(&self, path: &str) -> bool {
        let short = path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(path);
        self.deny_list
            .iter()
            .any(|entry| entry == path || entry == short)
    }
}

/// Result of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// On the deny list; nothing was touched.
    Skipped,
    /// Path does not exist.
    NotFound,
    /// No read/write access.
    PermissionDenied,
    /// Held by another process's lock file.
    Locked,
    /// The kernel refused the open.
    KernelUnavailable {
        /// OS error number.
        errno: Option<i32>,
        /// OS error text.
        message: String,
    },
    /// Worker did not finish within the bound.
    Timeout(Duration),
    /// Opened but no valid `AT` reply.
    NoResponse(String),
    /// Modem answered with this flow control.
    Success(FlowControl),
}

impl ProbeOutcome {
    /// Whether the modem answered.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Error describing a failed outcome, `None` on success.
    pub fn to_error(&self, port: &str) -> Option<Error> {
        match self {
            Self::Success(_) => None,
            Self::Timeout(timeout) => Some(Error::ProbeTimeout {
                port: port.to_string(),
                timeout: *timeout,
            }),
            other => Some(Error::PortUnavailable {
                port: port.to_string(),
                reason: other.to_string(),
            }),
        }
    }
}

impl From<Unavailable> for ProbeOutcome {
    fn from(value: Unavailable) -> Self {
        match value {
            Unavailable::NotFound => Self::NotFound,
            Unavailable::PermissionDenied => Self::PermissionDenied,
            Unavailable::Locked => Self::Locked,
            Unavailable::Kernel { errno, message } => Self::KernelUnavailable { errno, message },
        }
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped => write!(f, "Port in skip list"),
            Self::NotFound => write!(f, "Port does not exist"),
            Self::PermissionDenied => write!(f, "Permission denied"),
            Self::Locked => write!(f, "Port locked by another process"),
            Self::KernelUnavailable {
                errno: Some(errno),
                message,
            } => write!(f, "Port unavailable ({errno}: {message})"),
            Self::KernelUnavailable {
                errno: None,
                message,
            } => write!(f, "Port unavailable ({message})"),
            Self::Timeout(timeout) => write!(
                f,
                "Timeout ({}s) - port may be unresponsive",
                timeout.as_secs_f64()
            ),
            Self::NoResponse(reason) => write!(f, "{reason}"),
            Self::Success(flow) => write!(f, "Connected (flow control: {flow})"),
        }
    }
}

/// Record of one probe, kept for the detection report.
#[derive(Debug, Clone)]
pub struct ConnectionAttempt {
    /// Probed path.
    pub path: String,
    /// Probed baud rate.
    pub baud: u32,
    /// Probe mode.
    pub mode: ProbeMode,
    /// What happened.
    pub outcome: ProbeOutcome,
    /// Wall time spent, including preflight.
    pub elapsed: Duration,
}

impl ConnectionAttempt {
    /// Human-readable reason.
    pub fn reason(&self) -> String {
        self.outcome
            .to_string()
    }
}

/// Why an inline handshake failed.
#[derive(Debug)]
pub(crate) enum HandshakeError {
    /// The backend could not open the device.
    Open(Error),
    /// Opened, but nothing answered.
    Silent(String),
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(e) => write!(f, "Cannot open port: {e}"),
            Self::Silent(reason) => write!(f, "{reason}"),
        }
    }
}

fn read_available(port: &mut dyn Port) -> Result<String> {
    let available = port.bytes_to_read()?;
    if available == 0 {
        return Ok(String::new());
    }
    let mut buf = vec![0u8; available];
    match port.read(&mut buf) {
        Ok(n) => Ok(String::from_utf8_lossy(&buf[..n]).into_owned()),
        Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}

fn sleep(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}

/// Open `path` and look for an answer to `AT`, trying each flow control
/// setting of `timing` in turn.
///
/// Blocking and unbounded; callers that need a bound run it on a worker.
pub(crate) fn handshake(
    backend: &dyn SerialBackend,
    path: &str,
    baud: u32,
    timing: &ModeTiming,
) -> std::result::Result<(Box<dyn Port>, FlowControl), HandshakeError> {
    let mut last_reply = String::new();

    for &flow in &timing.flow_controls {
        let config = SerialConfig::new(path, baud)
            .with_timeout(timing.read_timeout)
            .with_flow_control(flow);
        let mut port = backend
            .open(&config)
            .map_err(HandshakeError::Open)?;

        sleep(timing.open_settle);
        if let Err(e) = port.clear_buffers() {
            trace!("{path}: clear failed: {e}");
        }
        sleep(timing.clear_settle);

        for attempt in 1..=timing.attempts {
            if let Err(e) = port.write_all_bytes(b"AT\r\n") {
                trace!("{path}: write failed on attempt {attempt}: {e}");
            } else {
                sleep(timing.write_settle);
                match read_available(port.as_mut()) {
                    Ok(reply) if reply.contains("OK") || reply.contains("AT") => {
                        trace!("{path}: handshake reply {reply:?} (flow control: {flow})");
                        return Ok((port, flow));
                    },
                    Ok(reply) => last_reply = reply,
                    Err(e) => trace!("{path}: read failed on attempt {attempt}: {e}"),
                }
            }
            if attempt < timing.attempts {
                sleep(timing.retry_delay);
            }
        }

        if let Err(e) = port.close() {
            trace!("{path}: close failed: {e}");
        }
        debug!("{path}: no answer at {baud} baud (flow control: {flow})");
    }

    let reply = last_reply.trim();
    Err(HandshakeError::Silent(if reply.is_empty() {
        "No response to AT command".to_string()
    } else {
        format!("Invalid response to AT command: {reply}")
    }))
}

fn open_failure(error: &Error) -> ProbeOutcome {
    let kind = match error {
        Error::Io(e) => Some(e.kind()),
        #[cfg(feature = "native")]
        Error::Serial(e) => match e.kind() {
            serialport::ErrorKind::Io(kind) => Some(kind),
            serialport::ErrorKind::NoDevice => Some(io::ErrorKind::NotFound),
            _ => None,
        },
        _ => None,
    };
    match kind {
        Some(io::ErrorKind::PermissionDenied) => ProbeOutcome::PermissionDenied,
        Some(io::ErrorKind::NotFound) => ProbeOutcome::NotFound,
        _ => ProbeOutcome::NoResponse(format!("Cannot open port: {error}")),
    }
}

/// Handshake then confirm through a session, on the calling thread.
fn probe_blocking(
    backend: &dyn SerialBackend,
    path: &str,
    baud: u32,
    timing: &ModeTiming,
) -> ProbeOutcome {
    let (port, flow) = match handshake(backend, path, baud, timing) {
        Ok(found) => found,
        Err(HandshakeError::Open(e)) => return open_failure(&e),
        Err(HandshakeError::Silent(reason)) => return ProbeOutcome::NoResponse(reason),
    };

    let mut session = ModemSession::from_port(port, SessionConfig::default());
    let reply = session.send_command("AT", timing.confirm_wait);
    session.disconnect();

    if reply.success {
        ProbeOutcome::Success(flow)
    } else {
        ProbeOutcome::NoResponse(format!(
            "AT handshake answered but confirmation failed: {}",
            reply
                .error
                .map_or_else(|| "unexpected reply".to_string(), |e| e.to_string())
        ))
    }
}

/// Runs isolated, time-bounded probes.
#[derive(Clone)]
pub struct ConnectionProbe {
    backend: Arc<dyn SerialBackend>,
    config: ProbeConfig,
}

impl ConnectionProbe {
    /// Create a probe over `backend`.
    pub fn new(backend: Arc<dyn SerialBackend>, config: ProbeConfig) -> Self {
        Self { backend, config }
    }

    /// Probe settings.
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// The backend probes open ports with.
    pub fn backend(&self) -> &Arc<dyn SerialBackend> {
        &self.backend
    }

    /// Probe a candidate.
    pub fn probe_candidate(
        &self,
        candidate: &SerialPortCandidate,
        baud: u32,
        mode: ProbeMode,
    ) -> ConnectionAttempt {
        self.probe(&candidate.path, baud, mode)
    }

    /// Probe `path` at `baud`.
    ///
    /// Returns within the mode's overall bound (plus scheduling slack) no
    /// matter how the device behaves. The probe's handle is closed before
    /// this returns, except after a timeout, when it is closed by the
    /// abandoned worker whenever its blocking call completes.
    pub fn probe(&self, path: &str, baud: u32, mode: ProbeMode) -> ConnectionAttempt {
        let started = Instant::now();
        let outcome = self.run(path, baud, mode);
        let attempt = ConnectionAttempt {
            path: path.to_string(),
            baud,
            mode,
            outcome,
            elapsed: started.elapsed(),
        };
        debug!(
            "Probe {path} @ {baud} ({mode}): {} in {:.2}s",
            attempt.reason(),
            attempt
                .elapsed
                .as_secs_f64()
        );
        attempt
    }

    fn run(&self, path: &str, baud: u32, mode: ProbeMode) -> ProbeOutcome {
        if self
            .config
            .is_denied(path)
        {
            return ProbeOutcome::Skipped;
        }
        if let Err(unavailable) = self
            .backend
            .preflight(path)
        {
            return unavailable.into();
        }

        let timing = self
            .config
            .timing(mode)
            .clone();
        let bound = timing.overall_timeout;
        let backend = Arc::clone(&self.backend);
        let worker_path = path.to_string();
        let (tx, rx) = mpsc::channel();

        let spawned = thread::Builder::new()
            .name(format!("probe {path}"))
            .spawn(move || {
                let outcome = probe_blocking(backend.as_ref(), &worker_path, baud, &timing);
                // The receiver is gone once the probe has timed out.
                let _ = tx.send(outcome);
            });
        if let Err(e) = spawned {
            return ProbeOutcome::NoResponse(format!("Cannot start probe worker: {e}"));
        }

        match rx.recv_timeout(bound) {
            Ok(outcome) => outcome,
            Err(mpsc::RecvTimeoutError::Timeout) => ProbeOutcome::Timeout(bound),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                ProbeOutcome::NoResponse("Probe worker exited without a result".to_string())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::{MockBackend, MockDevice, basic_modem};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast(mut timing: ModeTiming) -> ModeTiming {
        timing.open_settle = Duration::from_millis(1);
        timing.clear_settle = Duration::ZERO;
        timing.write_settle = Duration::from_millis(1);
        timing.retry_delay = Duration::from_millis(1);
        timing.confirm_wait = Duration::from_millis(1);
        timing
    }

    fn fast_config() -> ProbeConfig {
        ProbeConfig {
            deny_list: Vec::new(),
            quick: fast(ModeTiming::quick()),
            full: fast(ModeTiming::full()),
        }
    }

    fn probe(backend: MockBackend) -> (ConnectionProbe, Arc<MockBackend>) {
        let backend = Arc::new(backend);
        let shared: Arc<dyn SerialBackend> = backend.clone();
        (ConnectionProbe::new(shared, fast_config()), backend)
    }

    #[test]
    fn test_success() {
        let (probe, _) = probe(MockBackend::new().with_modem("/dev/ttyUSB2", 115200));
        let attempt = probe.probe("/dev/ttyUSB2", 115200, ProbeMode::Quick);
        assert_eq!(attempt.outcome, ProbeOutcome::Success(FlowControl::None));
        assert!(attempt.outcome.is_success());
        assert!(attempt.outcome.to_error("/dev/ttyUSB2").is_none());
    }

    #[test]
    fn test_wrong_baud_is_no_response() {
        let (probe, _) = probe(MockBackend::new().with_modem("/dev/ttyUSB2", 9600));
        let attempt = probe.probe("/dev/ttyUSB2", 115200, ProbeMode::Quick);
        assert_eq!(
            attempt.outcome,
            ProbeOutcome::NoResponse("No response to AT command".to_string())
        );
    }

    #[test]
    fn test_hung_open_times_out_within_bound() {
        let (mut probe, _) = probe(MockBackend::new().with_device("/dev/ttyUSB0", MockDevice::Hangs));
        probe.config.quick.overall_timeout = Duration::from_millis(200);

        let attempt = probe.probe("/dev/ttyUSB0", 115200, ProbeMode::Quick);
        assert_eq!(attempt.outcome, ProbeOutcome::Timeout(Duration::from_millis(200)));
        assert!(attempt.elapsed < Duration::from_secs(1));
        assert!(attempt.reason().starts_with("Timeout (0.2s)"));
        assert!(matches!(
            attempt.outcome.to_error("/dev/ttyUSB0"),
            Some(Error::ProbeTimeout { .. })
        ));
    }

    #[test]
    fn test_deny_list_skips_without_touching_device() {
        let (mut probe, backend) = probe(MockBackend::new().with_modem("/dev/ttyUSB2", 115200));
        probe.config.deny_list = vec!["ttyUSB2".to_string()];

        let attempt = probe.probe("/dev/ttyUSB2", 115200, ProbeMode::Full);
        assert_eq!(attempt.outcome, ProbeOutcome::Skipped);
        assert_eq!(attempt.reason(), "Port in skip list");
        assert!(backend.preflighted().is_empty());
        assert!(backend.opened().is_empty());
    }

    #[test]
    fn test_preflight_failures_do_not_open() {
        let (probe, backend) = probe(
            MockBackend::new()
                .with_device("/dev/ttyUSB1", MockDevice::Unavailable(Unavailable::Locked))
                .with_device(
                    "/dev/ttyUSB3",
                    MockDevice::Unavailable(Unavailable::PermissionDenied),
                )
                .with_device(
                    "/dev/ttyUSB4",
                    MockDevice::Unavailable(Unavailable::Kernel {
                        errno: Some(16),
                        message: "Device or resource busy".to_string(),
                    }),
                ),
        );

        let locked = probe.probe("/dev/ttyUSB1", 115200, ProbeMode::Quick);
        assert_eq!(locked.reason(), "Port locked by another process");
        let denied = probe.probe("/dev/ttyUSB3", 115200, ProbeMode::Quick);
        assert_eq!(denied.reason(), "Permission denied");
        let busy = probe.probe("/dev/ttyUSB4", 115200, ProbeMode::Quick);
        assert_eq!(busy.reason(), "Port unavailable (16: Device or resource busy)");
        let missing = probe.probe("/dev/ttyUSB9", 115200, ProbeMode::Quick);
        assert_eq!(missing.outcome, ProbeOutcome::NotFound);

        assert!(backend.opened().is_empty());
    }

    #[test]
    fn test_open_failure_maps_to_permission_denied() {
        let (probe, _) = probe(MockBackend::new().with_device("/dev/ttyACM0", MockDevice::OpenFails));
        let attempt = probe.probe("/dev/ttyACM0", 115200, ProbeMode::Quick);
        assert_eq!(attempt.outcome, ProbeOutcome::PermissionDenied);
    }

    #[test]
    fn test_silent_device() {
        let (probe, backend) = probe(MockBackend::new().with_device("/dev/ttyS0", MockDevice::Silent));
        let attempt = probe.probe("/dev/ttyS0", 115200, ProbeMode::Full);
        assert!(matches!(attempt.outcome, ProbeOutcome::NoResponse(_)));
        // Full mode tries both flow control settings.
        let flows: Vec<FlowControl> = backend
            .opened()
            .into_iter()
            .map(|(_, _, flow)| flow)
            .collect();
        assert_eq!(flows, vec![FlowControl::None, FlowControl::Hardware]);
    }

    #[test]
    fn test_full_mode_finds_hardware_flow_control() {
        let (probe, _) = probe(MockBackend::new().with_device(
            "/dev/ttyUSB2",
            MockDevice::Modem {
                baud: 115200,
                flow: Some(FlowControl::Hardware),
                responder: Arc::new(basic_modem),
            },
        ));

        let quick = probe.probe("/dev/ttyUSB2", 115200, ProbeMode::Quick);
        assert!(!quick.outcome.is_success());
        let full = probe.probe("/dev/ttyUSB2", 115200, ProbeMode::Full);
        assert_eq!(full.outcome, ProbeOutcome::Success(FlowControl::Hardware));
    }

    #[test]
    fn test_is_denied_matches_path_or_name() {
        let config = ProbeConfig {
            deny_list: vec!["/dev/ttyS0".to_string(), "ttyUSB0".to_string()],
            ..Default::default()
        };
        assert!(config.is_denied("/dev/ttyS0"));
        assert!(config.is_denied("/dev/ttyUSB0"));
        assert!(!config.is_denied("/dev/ttyUSB1"));
    }

    #[test]
    fn test_mode_timings() {
        let quick = ModeTiming::quick();
        let full = ModeTiming::full();
        assert_eq!(quick.overall_timeout, Duration::from_millis(2500));
        assert_eq!(quick.flow_controls, vec![FlowControl::None]);
        assert_eq!(full.attempts, 3);
        // 2 x (0.5 + 0.2 + 3 x 0.5 + 2 x 0.3) + 1.0
        assert_eq!(full.worst_case(), Duration::from_millis(6600));
        assert_eq!(full.overall_timeout, Duration::from_millis(7600));
        assert!(quick.worst_case() < quick.overall_timeout);
    }

    #[test]
    fn test_late_hardware_flow_answer_fits_full_bound() {
        // Silent without flow control, then quiet for two attempts with it.
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let responder = move |command: &str| {
            if command == "AT" && counter.fetch_add(1, Ordering::SeqCst) < 2 {
                return None;
            }
            basic_modem(command)
        };
        let (mut probe, backend) = probe(MockBackend::new().with_device(
            "/dev/ttyUSB2",
            MockDevice::Modem {
                baud: 115200,
                flow: Some(FlowControl::Hardware),
                responder: Arc::new(responder),
            },
        ));

        // The full schedule at a tenth of its real length.
        let mut timing = ModeTiming::full();
        timing.open_settle = Duration::from_millis(50);
        timing.clear_settle = Duration::from_millis(20);
        timing.write_settle = Duration::from_millis(50);
        timing.retry_delay = Duration::from_millis(30);
        timing.confirm_wait = Duration::from_millis(100);
        assert_eq!(timing.worst_case(), Duration::from_millis(660));
        timing.overall_timeout = timing.worst_case() + ModeTiming::SLACK;
        probe.config.full = timing;

        let attempt = probe.probe("/dev/ttyUSB2", 115200, ProbeMode::Full);
        assert_eq!(attempt.outcome, ProbeOutcome::Success(FlowControl::Hardware));
        assert!(attempt.elapsed >= Duration::from_millis(600));
        assert_eq!(backend.opened().len(), 2);
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }
}
