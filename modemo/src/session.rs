//! An open AT command session on one serial handle.
//!
//! The link is strictly request/response: [`ModemSession::send_command`]
//! takes `&mut self`, so a session can never have two commands in flight.
//! Command failures never escape as `Err`; they are reported in the returned
//! [`CommandResponse`].

use {
    crate::{
        decode::{FieldMap, Record, ResponseDecoder},
        error::{Error, Result},
        port::{FlowControl, Port, SerialBackend, is_transient},
        probe::{self, ModeTiming},
        vendor::VendorProfile,
    },
    log::{debug, info, trace, warn},
    std::{
        fmt, thread,
        time::{Duration, SystemTime},
    },
};

/// Session timing.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Wait hint used by [`ModemSession::send`].
    pub default_wait: Duration,
    /// Poll interval while draining; draining stops after one interval with
    /// nothing new.
    pub quiet_interval: Duration,
    /// Write attempts for transient faults.
    pub write_attempts: u32,
    /// Pause between write attempts.
    pub retry_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_wait: Duration::from_secs(1),
            quiet_interval: Duration::from_millis(100),
            write_attempts: 3,
            retry_delay: Duration::from_millis(300),
        }
    }
}

/// Why a command did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(
    feature = "serde",
    serde(tag = "kind", content = "detail", rename_all = "snake_case")
)]
pub enum CommandError {
    /// The session has no open port.
    NoConnection,
    /// The reply contained "ERROR".
    ErrorReply,
    /// Nothing was received.
    NoReply,
    /// Write or read failed.
    Io(String),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoConnection => write!(f, "No connection"),
            Self::ErrorReply => write!(f, "Modem returned ERROR"),
            Self::NoReply => write!(f, "No reply from modem"),
            Self::Io(reason) => write!(f, "I/O error: {reason}"),
        }
    }
}

/// Outcome of one command.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CommandResponse {
    /// Command as sent, without terminator.
    pub command: String,
    /// Everything drained after the command, lossily decoded as UTF-8.
    pub raw: String,
    /// Decoded reply.
    pub record: Record,
    /// True iff `raw` contains "OK" and does not contain "ERROR".
    pub success: bool,
    /// Failure classification.
    pub error: Option<CommandError>,
    /// When the command was sent.
    pub timestamp: SystemTime,
}

impl CommandResponse {
    fn failed(command: &str, raw: String, error: CommandError) -> Self {
        Self {
            command: command.to_string(),
            raw,
            record: Record::Raw,
            success: false,
            error: Some(error),
            timestamp: SystemTime::now(),
        }
    }

    /// Flat field view of the decoded reply.
    pub fn fields(&self) -> FieldMap {
        self.record
            .fields()
    }
}

/// Literal result-code heuristic: any "ERROR" wins over any "OK".
fn classify(raw: &str) -> (bool, Option<CommandError>) {
    if raw.contains("ERROR") {
        (false, Some(CommandError::ErrorReply))
    } else if raw.contains("OK") {
        (true, None)
    } else if raw
        .trim()
        .is_empty()
    {
        (false, Some(CommandError::NoReply))
    } else {
        (false, None)
    }
}

/// Exclusive owner of one open serial handle.
pub struct ModemSession {
    port: Option<Box<dyn Port>>,
    port_name: String,
    baud_rate: u32,
    flow_control: FlowControl,
    config: SessionConfig,
    decoder: ResponseDecoder,
    vendor: Option<Option<VendorProfile>>,
}

impl ModemSession {
    /// Open `path` and run the full handshake (both flow control settings,
    /// retries) inline.
    ///
    /// Unlike [`ConnectionProbe`](crate::probe::ConnectionProbe) this is not
    /// time-bounded; use it on a port that already probed successfully.
    pub fn connect(
        backend: &dyn SerialBackend,
        path: &str,
        baud_rate: u32,
        config: SessionConfig,
    ) -> Result<Self> {
        if let Err(unavailable) = backend.preflight(path) {
            return Err(Error::PortUnavailable {
                port: path.to_string(),
                reason: probe::ProbeOutcome::from(unavailable).to_string(),
            });
        }

        let timing = ModeTiming::full();
        let (port, flow_control) =
            probe::handshake(backend, path, baud_rate, &timing).map_err(|failure| {
                Error::Protocol(format!("{path} at {baud_rate} baud: {failure}"))
            })?;

        let mut session = Self::from_port(port, config);
        let reply = session.send_command("AT", timing.confirm_wait);
        if !reply.success {
            return Err(Error::Protocol(format!(
                "{path} at {baud_rate} baud did not confirm AT: {}",
                reply
                    .raw
                    .trim()
            )));
        }

        info!("Connected to {path} at {baud_rate} baud (flow control: {flow_control})");
        Ok(session)
    }

    /// Wrap an already open port.
    pub fn from_port(port: Box<dyn Port>, config: SessionConfig) -> Self {
        Self {
            port_name: port
                .name()
                .to_string(),
            baud_rate: port.baud_rate(),
            flow_control: port.flow_control(),
            port: Some(port),
            config,
            decoder: ResponseDecoder::new(),
            vendor: None,
        }
    }

    /// Whether a port is open.
    pub fn is_connected(&self) -> bool {
        self.port
            .is_some()
    }

    /// Device path of the session.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Negotiated baud rate.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Negotiated flow control.
    pub fn flow_control(&self) -> FlowControl {
        self.flow_control
    }

    /// Decoder used for replies; register vendor families here.
    pub fn decoder_mut(&mut self) -> &mut ResponseDecoder {
        &mut self.decoder
    }

    /// Close the port. Further commands report [`CommandError::NoConnection`].
    pub fn disconnect(&mut self) {
        if let Some(mut port) = self
            .port
            .take()
        {
            if let Err(e) = port.close() {
                debug!("Error closing {}: {e}", self.port_name);
            }
            debug!("Disconnected from {}", self.port_name);
        }
    }

    /// Send a command with the default wait hint.
    pub fn send(&mut self, command: &str) -> CommandResponse {
        let wait = self
            .config
            .default_wait;
        self.send_command(command, wait)
    }

    /// Send one command and collect its reply.
    ///
    /// Appends CRLF, clears pending input, writes, sleeps `wait`, then drains
    /// until nothing new arrives for one quiet interval.
    pub fn send_command(&mut self, command: &str, wait: Duration) -> CommandResponse {
        let command = command.trim_end_matches(['\r', '\n']);
        let timestamp = SystemTime::now();

        let Some(port) = self
            .port
            .as_mut()
        else {
            return CommandResponse::failed(command, String::new(), CommandError::NoConnection);
        };

        if let Err(e) = port.clear_input() {
            debug!("Failed to clear input on {}: {e}", self.port_name);
        }

        let framed = format!("{command}\r\n");
        trace!("-> {command}");
        let mut attempt = 1;
        loop {
            match port.write_all_bytes(framed.as_bytes()) {
                Ok(()) => break,
                Err(Error::Io(e))
                    if is_transient(e.kind()) && attempt < self.config.write_attempts =>
                {
                    warn!(
                        "Write to {} failed (attempt {attempt}/{}): {e}",
                        self.port_name, self.config.write_attempts
                    );
                    thread::sleep(self.config.retry_delay);
                    attempt += 1;
                },
                Err(Error::Io(e)) if is_transient(e.kind()) => {
                    return CommandResponse::failed(
                        command,
                        String::new(),
                        CommandError::Io(e.to_string()),
                    );
                },
                Err(e) => {
                    warn!("Fatal write error on {}: {e}", self.port_name);
                    self.disconnect();
                    return CommandResponse::failed(
                        command,
                        String::new(),
                        CommandError::Io(e.to_string()),
                    );
                },
            }
        }

        thread::sleep(wait);

        let (bytes, read_error) = self.drain();
        let raw = String::from_utf8_lossy(&bytes).into_owned();
        trace!("<- {raw:?}");

        if let Some(reason) = read_error {
            return CommandResponse::failed(command, raw, CommandError::Io(reason));
        }

        let (success, error) = classify(&raw);
        let record = self
            .decoder
            .decode(command, &raw);
        CommandResponse {
            command: command.to_string(),
            raw,
            record,
            success,
            error,
            timestamp,
        }
    }

    /// Read everything currently buffered, polling until input goes quiet.
    fn drain(&mut self) -> (Vec<u8>, Option<String>) {
        let mut collected = Vec::new();
        let quiet = self
            .config
            .quiet_interval;

        loop {
            let Some(port) = self
                .port
                .as_mut()
            else {
                break;
            };
            let available = match port.bytes_to_read() {
                Ok(n) => n,
                Err(e) => return (collected, Some(e.to_string())),
            };
            if available == 0 {
                break;
            }

            let mut buf = vec![0u8; available];
            match port.read(&mut buf) {
                Ok(n) => collected.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => {
                    warn!("Fatal read error on {}: {e}", self.port_name);
                    self.disconnect();
                    return (collected, Some(e.to_string()));
                },
            }
            thread::sleep(quiet);
        }

        (collected, None)
    }

    /// Manufacturer profile, resolved on first use and cached.
    ///
    /// Returns `None` when the modem does not identify itself. Nothing is
    /// cached while disconnected.
    pub fn vendor_profile(&mut self) -> Option<&VendorProfile> {
        if self
            .vendor
            .is_none()
            && self.is_connected()
        {
            let profile = VendorProfile::resolve(self);
            self.vendor = Some(profile);
        }
        self.vendor
            .as_ref()
            .and_then(Option::as_ref)
    }
}

impl Drop for ModemSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}
