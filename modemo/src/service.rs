//! Control of a system service that competes for modem ports.
//!
//! On Linux, ModemManager opens every modem interface it recognizes and can
//! make probes hang. A [`ServiceLease`] stops such a service for the duration
//! of a scan and starts it again when dropped.

use {
    crate::device::SerialPortCandidate,
    log::{debug, info, warn},
    std::{
        io::Read,
        process::{Command, Stdio},
        sync::Arc,
        thread,
        time::{Duration, Instant},
    },
};

/// Default service name.
pub const MODEM_MANAGER: &str = "ModemManager";

/// Something that can report on, stop, and start a system service.
pub trait ServiceControl: Send + Sync {
    /// Service name, for messages.
    fn name(&self) -> &str;

    /// Whether the service is running.
    fn is_active(&self) -> bool;

    /// Device paths the service reports managing.
    fn managed_ports(&self) -> Vec<String>;

    /// Whether the service currently holds `path` open.
    fn holds(&self, path: &str) -> bool;

    /// Stop the service. Returns whether it stopped.
    fn stop(&self) -> bool;

    /// Start the service. Returns whether it started.
    fn start(&self) -> bool;
}

/// Captured result of a bounded subprocess.
struct Captured {
    success: bool,
    stdout: String,
}

/// Run `program` with `args`, killing it after `timeout`.
///
/// Missing programs, spawn failures and timeouts all yield `None`.
fn run_bounded(program: &str, args: &[&str], timeout: Duration) -> Option<Captured> {
    let mut child = match Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            debug!("Cannot run {program}: {e}");
            return None;
        },
    };

    // Drain stdout while the child runs; a full pipe would stall it.
    let reader = child
        .stdout
        .take()
        .map(|mut pipe| {
            let name = program.to_string();
            thread::spawn(move || {
                let mut out = String::new();
                if let Err(e) = pipe.read_to_string(&mut out) {
                    debug!("Reading {name} output failed: {e}");
                }
                out
            })
        });

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                warn!("{program} {} timed out after {:.1}s", args.join(" "), timeout.as_secs_f64());
                let _ = child.kill();
                let _ = child.wait();
                return None;
            },
            Ok(None) => thread::sleep(Duration::from_millis(20)),
            Err(e) => {
                debug!("Waiting for {program} failed: {e}");
                return None;
            },
        }
    };

    let stdout = reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();

    Some(Captured {
        success: status.success(),
        stdout,
    })
}

/// Device paths in `mmcli -L` style output.
fn parse_device_paths(output: &str) -> Vec<String> {
    let mut ports = Vec::new();
    for line in output.lines() {
        if !line
            .to_ascii_lowercase()
            .contains("device")
        {
            continue;
        }
        if let Some(start) = line.find("/dev/tty") {
            let path: String = line[start..]
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '/' || *c == '_')
                .collect();
            if path.len() > "/dev/tty".len() && !ports.contains(&path) {
                ports.push(path);
            }
        }
    }
    ports
}

/// Longest command name the kernel reports; longer names are cut.
const COMM_LEN: usize = 15;

/// Whether `lsof -Fc` output lists `service` as a holder.
fn held_by(output: &str, service: &str) -> bool {
    output
        .lines()
        .filter_map(|line| line.strip_prefix('c'))
        .any(|command| {
            command == service || (command.len() >= COMM_LEN && service.starts_with(command))
        })
}

/// A systemd unit, driven through `systemctl`.
#[derive(Debug, Clone)]
pub struct SystemdService {
    name: String,
    query_timeout: Duration,
    change_timeout: Duration,
}

impl Default for SystemdService {
    fn default() -> Self {
        Self::new(MODEM_MANAGER)
    }
}

impl SystemdService {
    /// Control the unit `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            query_timeout: Duration::from_secs(2),
            change_timeout: Duration::from_secs(5),
        }
    }
}

impl ServiceControl for SystemdService {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_active(&self) -> bool {
        if !cfg!(target_os = "linux") {
            return false;
        }
        run_bounded("systemctl", &["is-active", &self.name], self.query_timeout).is_some_and(
            |out| {
                out.success
                    && out
                        .stdout
                        .trim()
                        == "active"
            },
        )
    }

    fn managed_ports(&self) -> Vec<String> {
        if !cfg!(target_os = "linux") {
            return Vec::new();
        }
        run_bounded("mmcli", &["-L"], self.query_timeout)
            .map(|out| parse_device_paths(&out.stdout))
            .unwrap_or_default()
    }

    fn holds(&self, path: &str) -> bool {
        if !cfg!(target_os = "linux") {
            return false;
        }
        run_bounded("lsof", &["-Fc", path], self.query_timeout)
            .is_some_and(|out| held_by(&out.stdout, &self.name))
    }

    fn stop(&self) -> bool {
        cfg!(target_os = "linux")
            && run_bounded("systemctl", &["stop", &self.name], self.change_timeout)
                .is_some_and(|out| out.success)
    }

    fn start(&self) -> bool {
        cfg!(target_os = "linux")
            && run_bounded("systemctl", &["start", &self.name], self.change_timeout)
                .is_some_and(|out| out.success)
    }
}

/// Candidates the service currently holds open.
pub fn blocking_ports<'a>(
    control: &dyn ServiceControl,
    candidates: &'a [SerialPortCandidate],
) -> Vec<&'a SerialPortCandidate> {
    candidates
        .iter()
        .filter(|candidate| control.holds(&candidate.path))
        .collect()
}

/// Keeps a service stopped until dropped or released.
pub struct ServiceLease {
    control: Arc<dyn ServiceControl>,
    released: bool,
}

impl ServiceLease {
    /// Pause after stopping, so the service can let go of its ports.
    pub const RELEASE_DELAY: Duration = Duration::from_secs(1);

    /// Stop the service. `None` when it was not running or would not stop.
    pub fn acquire(control: Arc<dyn ServiceControl>) -> Option<Self> {
        if !control.is_active() {
            debug!("{} is not running", control.name());
            return None;
        }
        if !control.stop() {
            warn!("Could not stop {} (may need root)", control.name());
            return None;
        }
        info!("{} stopped for the duration of detection", control.name());
        Some(Self {
            control,
            released: false,
        })
    }

    /// Name of the stopped service.
    pub fn service_name(&self) -> &str {
        self.control
            .name()
    }

    /// Start the service now. Returns whether it started.
    pub fn release(mut self) -> bool {
        self.restart()
    }

    fn restart(&mut self) -> bool {
        if self.released {
            return true;
        }
        self.released = true;
        let started = self
            .control
            .start();
        if started {
            info!("{} restarted", self.control.name());
        } else {
            warn!(
                "Could not restart {}; start it manually with: sudo systemctl start {}",
                self.control.name(),
                self.control.name()
            );
        }
        started
    }
}

impl Drop for ServiceLease {
    fn drop(&mut self) {
        self.restart();
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::device::RawPort,
        std::sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    #[derive(Default)]
    struct FakeService {
        active: AtomicBool,
        refuse_stop: bool,
        stops: AtomicUsize,
        starts: AtomicUsize,
    }

    impl FakeService {
        fn running() -> Arc<Self> {
            Arc::new(Self {
                active: AtomicBool::new(true),
                ..Default::default()
            })
        }
    }

    impl ServiceControl for FakeService {
        fn name(&self) -> &str {
            "FakeManager"
        }

        fn is_active(&self) -> bool {
            self.active
                .load(Ordering::SeqCst)
        }

        fn managed_ports(&self) -> Vec<String> {
            vec!["/dev/ttyUSB2".to_string()]
        }

        fn holds(&self, path: &str) -> bool {
            self.is_active() && path == "/dev/ttyUSB2"
        }

        fn stop(&self) -> bool {
            self.stops
                .fetch_add(1, Ordering::SeqCst);
            if self.refuse_stop {
                return false;
            }
            self.active
                .store(false, Ordering::SeqCst);
            true
        }

        fn start(&self) -> bool {
            self.starts
                .fetch_add(1, Ordering::SeqCst);
            self.active
                .store(true, Ordering::SeqCst);
            true
        }
    }

    #[test]
    fn test_lease_restarts_on_drop() {
        let service = FakeService::running();
        {
            let lease = ServiceLease::acquire(service.clone()).unwrap();
            assert_eq!(lease.service_name(), "FakeManager");
            assert!(!service.is_active());
        }
        assert!(service.is_active());
        assert_eq!(service.starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_explicit_release_starts_once() {
        let service = FakeService::running();
        let lease = ServiceLease::acquire(service.clone()).unwrap();
        assert!(lease.release());
        assert_eq!(service.starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_lease_when_inactive_or_refused() {
        let idle = Arc::new(FakeService::default());
        assert!(ServiceLease::acquire(idle.clone()).is_none());
        assert_eq!(idle.stops.load(Ordering::SeqCst), 0);

        let stubborn = Arc::new(FakeService {
            active: AtomicBool::new(true),
            refuse_stop: true,
            ..Default::default()
        });
        assert!(ServiceLease::acquire(stubborn.clone()).is_none());
        assert_eq!(stubborn.starts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_blocking_ports() {
        let service = FakeService::running();
        let candidates: Vec<SerialPortCandidate> = ["/dev/ttyUSB1", "/dev/ttyUSB2"]
            .into_iter()
            .map(|path| SerialPortCandidate::from_raw(RawPort::bare(path)))
            .collect();
        let blocked = blocking_ports(service.as_ref(), &candidates);
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].path, "/dev/ttyUSB2");
    }

    #[test]
    fn test_parse_mmcli_listing() {
        let output = "    /org/freedesktop/ModemManager1/Modem/0 [Quectel] EG25 (device /dev/ttyUSB2)\n\
                      No modems were found\n\
                      primary device: /dev/ttyACM0\n";
        assert_eq!(parse_device_paths(output), vec!["/dev/ttyUSB2", "/dev/ttyACM0"]);
        assert!(parse_device_paths("No modems were found").is_empty());
    }

    #[test]
    fn test_lsof_holder_matching() {
        let output = "p812\ncModemManager\np4410\ncminicom\n";
        assert!(held_by(output, "ModemManager"));
        assert!(held_by(output, "minicom"));
        assert!(!held_by(output, "ModemMana"));
        assert!(!held_by("p812\ncModemManagerX\n", "ModemManager"));
        // Kernel-truncated names still match a longer unit name.
        assert!(held_by("p1\ncNetworkManager-\n", "NetworkManager-dispatcher"));
        assert!(!held_by("", "ModemManager"));
    }

    #[cfg(unix)]
    #[test]
    fn test_large_output_is_captured() {
        let out = run_bounded("sh", &["-c", "yes | head -n 50000"], Duration::from_secs(10))
            .expect("sh should run");
        assert!(out.success);
        assert_eq!(out.stdout.len(), 100_000);
    }

    #[test]
    fn test_missing_program_is_none() {
        assert!(run_bounded("modemo-no-such-program", &[], Duration::from_millis(100)).is_none());
    }
}
