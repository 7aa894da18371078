//! Commands that change network or packet data settings.
//!
//! Unlike the suites in [`crate::diagnostics`], these write to the modem or
//! the SIM. Each operation reads the affected setting back afterwards so the
//! caller can tell whether the change took.

use {
    crate::{
        decode::{PdpContext, Plmn, Record, Registration, decode_plmn_list},
        error::{Error, Result},
        session::{CommandResponse, ModemSession},
    },
    log::{debug, info, warn},
    std::{fmt, str::FromStr, thread, time::Duration},
};

/// SIM elementary file holding the forbidden network list (EF_FPLMN).
pub const EF_FPLMN: u16 = 0x6F7B;

/// Bytes of EF_FPLMN read and written: four 3-byte entries.
pub const FPLMN_LEN: usize = 12;

/// READ BINARY of EF_FPLMN.
pub const READ_FPLMN: &str = "AT+CRSM=176,28539,0,0,12";

/// UPDATE BINARY of EF_FPLMN with every entry unused.
pub const CLEAR_FPLMN: &str = r#"AT+CRSM=214,28539,0,0,12,"FFFFFFFFFFFFFFFFFFFFFFFF""#;

/// Preferred operator list.
pub const READ_PREFERRED_OPERATORS: &str = "AT+CPOL?";

/// Empty the preferred operator list.
pub const CLEAR_PREFERRED_OPERATORS: &str = "AT+CPOL=";

/// Which PLMN selector list `+CPOL` works on.
pub const READ_PLMN_SELECTOR: &str = "AT+CPLS?";

const READ_CONTEXTS: &str = "AT+CGDCONT?";
const READ_REGISTRATION: &str = "AT+CREG?";

fn forbidden_networks(response: &CommandResponse) -> Option<Vec<Plmn>> {
    match &response.record {
        Record::SimFile(file) if response.success && file.is_ok() => {
            Some(decode_plmn_list(&file.data))
        },
        _ => None,
    }
}

/// The SIM's forbidden network list and the operator lists next to it.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FplmnReport {
    /// Forbidden networks; `None` when the SIM file could not be read.
    pub forbidden: Option<Vec<Plmn>>,
    /// Replies to [`READ_FPLMN`], [`READ_PREFERRED_OPERATORS`] and
    /// [`READ_PLMN_SELECTOR`], in that order.
    pub responses: Vec<CommandResponse>,
}

/// Read EF_FPLMN, the preferred operator list and the selector list.
///
/// Modems that do not support one of the queries answer `ERROR`; the other
/// replies are still collected.
pub fn read_fplmn(session: &mut ModemSession) -> FplmnReport {
    let file = session.send(READ_FPLMN);
    let forbidden = forbidden_networks(&file);
    if forbidden.is_none() {
        debug!("EF_FPLMN not readable: {:?}", file.raw);
    }
    let preferred = session.send(READ_PREFERRED_OPERATORS);
    let selector = session.send(READ_PLMN_SELECTOR);
    FplmnReport {
        forbidden,
        responses: vec![file, preferred, selector],
    }
}

/// Outcome of clearing the forbidden network list.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FplmnClear {
    /// Replies to [`CLEAR_FPLMN`], [`CLEAR_PREFERRED_OPERATORS`] and the
    /// read-back, in that order.
    pub responses: Vec<CommandResponse>,
    /// Entries still listed after the clear; `None` when the read-back failed.
    pub remaining: Option<Vec<Plmn>>,
}

impl FplmnClear {
    /// Whether the read-back shows an empty list.
    pub fn is_cleared(&self) -> bool {
        self.remaining
            .as_ref()
            .is_some_and(Vec::is_empty)
    }
}

/// Overwrite EF_FPLMN with unused entries, empty the preferred operator
/// list, then read EF_FPLMN back.
///
/// The modem may keep a cached copy until it restarts.
pub fn clear_fplmn(session: &mut ModemSession) -> FplmnClear {
    let write = session.send(CLEAR_FPLMN);
    if !write.success {
        warn!("Writing EF_FPLMN failed; the SIM or modem may not allow it");
    }
    let preferred = session.send(CLEAR_PREFERRED_OPERATORS);
    let verify = session.send(READ_FPLMN);
    let remaining = forbidden_networks(&verify);
    if let Some(left) = &remaining {
        info!("{} forbidden network(s) left after clearing", left.len());
    }
    FplmnClear {
        responses: vec![write, preferred, verify],
        remaining,
    }
}

/// Packet data protocol of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum PdpType {
    /// IPv4.
    #[default]
    Ip,
    /// IPv6.
    Ipv6,
    /// Dual stack.
    Ipv4v6,
}

impl PdpType {
    /// Token used in `+CGDCONT`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ip => "IP",
            Self::Ipv6 => "IPV6",
            Self::Ipv4v6 => "IPV4V6",
        }
    }
}

impl fmt::Display for PdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PdpType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s
            .trim()
            .to_ascii_uppercase()
            .as_str()
        {
            "IP" => Ok(Self::Ip),
            "IPV6" => Ok(Self::Ipv6),
            "IPV4V6" => Ok(Self::Ipv4v6),
            other => Err(Error::InvalidArgument(format!(
                "Unknown PDP type: {other} (expected IP, IPV6 or IPV4V6)"
            ))),
        }
    }
}

/// A PDP context definition to write.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ApnSettings {
    /// Context id, 1 or higher.
    pub cid: u8,
    /// Protocol.
    pub pdp_type: PdpType,
    /// Access point name.
    pub apn: String,
}

impl ApnSettings {
    /// Validated settings. The APN must be printable ASCII without quotes.
    pub fn new(cid: u8, pdp_type: PdpType, apn: impl Into<String>) -> Result<Self> {
        let apn = apn.into();
        if cid == 0 {
            return Err(Error::InvalidArgument("Context id must be 1 or higher".into()));
        }
        if apn.is_empty() {
            return Err(Error::InvalidArgument("APN must not be empty".into()));
        }
        if let Some(bad) = apn
            .chars()
            .find(|c| !c.is_ascii_graphic() || *c == '"')
        {
            return Err(Error::InvalidArgument(format!(
                "APN contains an unsupported character: {bad:?}"
            )));
        }
        Ok(Self { cid, pdp_type, apn })
    }

    /// `AT+CGDCONT=<cid>,"<type>","<apn>"`
    pub fn command(&self) -> String {
        format!(r#"AT+CGDCONT={},"{}","{}""#, self.cid, self.pdp_type, self.apn)
    }

    fn matches(&self, context: &PdpContext) -> bool {
        context.cid == self.cid
            && context.apn == self.apn
            && context
                .pdp_type
                .eq_ignore_ascii_case(self.pdp_type.as_str())
    }
}

fn contexts(response: &CommandResponse) -> Vec<PdpContext> {
    match &response.record {
        Record::PdpContexts(contexts) => contexts.clone(),
        _ => Vec::new(),
    }
}

/// Outcome of writing a PDP context.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ApnChange {
    /// What was written.
    pub settings: ApnSettings,
    /// Contexts before the change.
    pub before: Vec<PdpContext>,
    /// Reply to the write.
    pub set: CommandResponse,
    /// Reply to the read-back.
    pub verify: CommandResponse,
    /// The context with the written id after the change, if listed.
    pub applied: Option<PdpContext>,
}

impl ApnChange {
    /// Whether the read-back shows exactly what was written.
    pub fn is_confirmed(&self) -> bool {
        self.applied
            .as_ref()
            .is_some_and(|context| self.settings.matches(context))
    }
}

/// Read the contexts, write `settings`, then read them again.
pub fn configure_apn(session: &mut ModemSession, settings: &ApnSettings) -> ApnChange {
    let before = contexts(&session.send(READ_CONTEXTS));
    let set = session.send(&settings.command());
    let verify = session.send(READ_CONTEXTS);
    let applied = contexts(&verify)
        .into_iter()
        .find(|context| context.cid == settings.cid);
    ApnChange {
        settings: settings.clone(),
        before,
        set,
        verify,
        applied,
    }
}

/// Network selection mode for `+COPS`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(tag = "mode", content = "operator", rename_all = "snake_case"))]
pub enum SelectionMode {
    /// Let the modem choose.
    Automatic,
    /// Register on this numeric operator only.
    Manual(String),
    /// Try this numeric operator, fall back to automatic.
    ManualWithFallback(String),
}

impl SelectionMode {
    /// Manual selection of a numeric operator (`MCC` + 2 or 3 digit `MNC`).
    pub fn manual(operator: &str, fallback: bool) -> Result<Self> {
        let operator = operator.trim();
        let numeric = operator
            .chars()
            .all(|c| c.is_ascii_digit());
        if !numeric || !matches!(operator.len(), 5 | 6) {
            return Err(Error::InvalidArgument(format!(
                "Operator must be a 5 or 6 digit MCC+MNC code, got {operator:?}"
            )));
        }
        let operator = operator.to_string();
        Ok(if fallback {
            Self::ManualWithFallback(operator)
        } else {
            Self::Manual(operator)
        })
    }

    /// `<mode>` value of `+COPS`.
    pub fn code(&self) -> u8 {
        match self {
            Self::Automatic => 0,
            Self::Manual(_) => 1,
            Self::ManualWithFallback(_) => 4,
        }
    }

    /// `AT+COPS=0`, or `AT+COPS=<mode>,2,"<operator>"` for manual modes.
    pub fn command(&self) -> String {
        match self {
            Self::Automatic => "AT+COPS=0".to_string(),
            Self::Manual(operator) | Self::ManualWithFallback(operator) => {
                format!(r#"AT+COPS={},2,"{operator}""#, self.code())
            },
        }
    }
}

/// How long to wait while the modem registers.
#[derive(Debug, Clone)]
pub struct RegistrationTiming {
    /// Wait hint for the `+COPS` write; registration can take a minute.
    pub wait: Duration,
    /// Pause before querying the result.
    pub settle: Duration,
}

impl Default for RegistrationTiming {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(60),
            settle: Duration::from_secs(2),
        }
    }
}

/// Outcome of a forced registration.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RegistrationAttempt {
    /// Requested selection.
    pub mode: SelectionMode,
    /// Reply to the `+COPS` write.
    pub selection: CommandResponse,
    /// Reply to the `+CREG?` check.
    pub status: CommandResponse,
}

impl RegistrationAttempt {
    /// Decoded `+CREG` state after the attempt.
    pub fn registration(&self) -> Option<&Registration> {
        match &self.status.record {
            Record::Registration(registration) => Some(registration),
            _ => None,
        }
    }

    /// Whether the modem reports home or roaming registration.
    pub fn is_registered(&self) -> bool {
        self.registration()
            .is_some_and(Registration::is_registered)
    }
}

/// Select a network, wait, then check circuit-switched registration.
pub fn force_registration(
    session: &mut ModemSession,
    mode: &SelectionMode,
    timing: &RegistrationTiming,
) -> RegistrationAttempt {
    let command = mode.command();
    info!("Registering with {command}");
    let selection = session.send_command(&command, timing.wait);
    if !timing
        .settle
        .is_zero()
    {
        thread::sleep(timing.settle);
    }
    let status = session.send(READ_REGISTRATION);
    RegistrationAttempt {
        mode: mode.clone(),
        selection,
        status,
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{port::mock::MockPort, session::SessionConfig},
        std::sync::{Arc, Mutex},
    };

    fn ok(command: &str, body: &str) -> Option<String> {
        Some(format!("{command}\r\r\n{body}\r\n\r\nOK\r\n"))
    }

    fn session(
        responder: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> (ModemSession, Arc<Mutex<Vec<String>>>) {
        let port = MockPort::new("/dev/ttyUSB2", responder);
        let written = port.written();
        let config = SessionConfig {
            default_wait: Duration::ZERO,
            quiet_interval: Duration::from_millis(1),
            ..Default::default()
        };
        (ModemSession::from_port(Box::new(port), config), written)
    }

    fn sent(written: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        written
            .lock()
            .unwrap()
            .clone()
    }

    #[test]
    fn test_fplmn_commands_address_ef_fplmn() {
        assert_eq!(READ_FPLMN, format!("AT+CRSM=176,{EF_FPLMN},0,0,{FPLMN_LEN}"));
        assert_eq!(
            CLEAR_FPLMN,
            format!(
                "AT+CRSM=214,{EF_FPLMN},0,0,{FPLMN_LEN},\"{}\"",
                "F".repeat(FPLMN_LEN * 2)
            )
        );
    }

    #[test]
    fn test_read_fplmn() {
        let (mut session, written) = session(|command| match command {
            READ_FPLMN => ok(command, r#"+CRSM: 144,0,"130062FFFFFF13F041FFFFFF""#),
            READ_PREFERRED_OPERATORS => ok(command, r#"+CPOL: 1,2,"310260""#),
            _ => Some("\r\nERROR\r\n".to_string()),
        });

        let report = read_fplmn(&mut session);
        assert_eq!(sent(&written), vec![READ_FPLMN, "AT+CPOL?", "AT+CPLS?"]);
        let forbidden = report
            .forbidden
            .unwrap();
        let codes: Vec<String> = forbidden
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(codes, vec!["310260", "31014"]);
        assert!(report.responses[1].success);
        // AT+CPLS? is unsupported here.
        assert!(!report.responses[2].success);
    }

    #[test]
    fn test_read_fplmn_unreadable_sim_file() {
        let (mut session, _) = session(|command| match command {
            READ_FPLMN => ok(command, "+CRSM: 105,130"),
            _ => ok(command, ""),
        });
        assert_eq!(read_fplmn(&mut session).forbidden, None);
    }

    #[test]
    fn test_clear_fplmn_writes_then_verifies() {
        let cleared = Arc::new(Mutex::new(false));
        let state = Arc::clone(&cleared);
        let (mut session, written) = session(move |command| match command {
            CLEAR_FPLMN => {
                *state.lock().unwrap() = true;
                ok(command, "+CRSM: 144,0")
            },
            READ_FPLMN => {
                let data = if *state.lock().unwrap() {
                    "FFFFFFFFFFFFFFFFFFFFFFFF"
                } else {
                    "130062FFFFFFFFFFFFFFFFFF"
                };
                ok(command, &format!("+CRSM: 144,0,\"{data}\""))
            },
            _ => ok(command, ""),
        });

        let outcome = clear_fplmn(&mut session);
        assert_eq!(sent(&written), vec![CLEAR_FPLMN, "AT+CPOL=", READ_FPLMN]);
        assert!(outcome.responses[0].success);
        assert!(outcome.is_cleared());
    }

    #[test]
    fn test_clear_fplmn_rejected_by_sim() {
        let (mut session, _) = session(|command| match command {
            CLEAR_FPLMN => ok(command, "+CRSM: 105,130"),
            READ_FPLMN => ok(command, r#"+CRSM: 144,0,"130062FFFFFFFFFFFFFFFFFF""#),
            _ => Some("\r\n+CME ERROR: 3\r\n".to_string()),
        });

        let outcome = clear_fplmn(&mut session);
        assert!(!outcome.is_cleared());
        assert_eq!(outcome.remaining.map(|left| left.len()), Some(1));
        assert!(!outcome.responses[1].success);
    }

    #[test]
    fn test_apn_settings_validation() {
        let settings = ApnSettings::new(1, PdpType::Ip, "hologram").unwrap();
        assert_eq!(settings.command(), r#"AT+CGDCONT=1,"IP","hologram""#);
        let dual = ApnSettings::new(3, "ipv4v6".parse().unwrap(), "iot.example").unwrap();
        assert_eq!(dual.command(), r#"AT+CGDCONT=3,"IPV4V6","iot.example""#);

        assert!(ApnSettings::new(0, PdpType::Ip, "x").is_err());
        assert!(ApnSettings::new(1, PdpType::Ip, "").is_err());
        assert!(ApnSettings::new(1, PdpType::Ip, "a\"b").is_err());
        assert!(ApnSettings::new(1, PdpType::Ip, "a b").is_err());
        assert!(matches!(
            "PPP".parse::<PdpType>(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_configure_apn_reads_back() {
        let apn = Arc::new(Mutex::new("old.apn".to_string()));
        let state = Arc::clone(&apn);
        let (mut session, written) = session(move |command| {
            if command == "AT+CGDCONT?" {
                let current = state.lock().unwrap().clone();
                ok(
                    command,
                    &format!("+CGDCONT: 1,\"IP\",\"{current}\"\r\n+CGDCONT: 2,\"IPV6\",\"ims\""),
                )
            } else if let Some(rest) = command.strip_prefix("AT+CGDCONT=1,\"IP\",\"") {
                *state.lock().unwrap() = rest.trim_end_matches('"').to_string();
                ok(command, "")
            } else {
                Some("\r\nERROR\r\n".to_string())
            }
        });

        let settings = ApnSettings::new(1, PdpType::Ip, "hologram").unwrap();
        let change = configure_apn(&mut session, &settings);
        assert_eq!(
            sent(&written),
            vec!["AT+CGDCONT?", r#"AT+CGDCONT=1,"IP","hologram""#, "AT+CGDCONT?"]
        );
        assert_eq!(change.before.len(), 2);
        assert_eq!(change.before[0].apn, "old.apn");
        assert!(change.set.success);
        assert_eq!(
            change
                .applied
                .as_ref()
                .map(|context| context.apn.as_str()),
            Some("hologram")
        );
        assert!(change.is_confirmed());
    }

    #[test]
    fn test_configure_apn_rejected() {
        let (mut session, _) = session(|command| match command {
            "AT+CGDCONT?" => ok(command, r#"+CGDCONT: 1,"IP","old.apn""#),
            _ => Some("\r\n+CME ERROR: 4\r\n".to_string()),
        });
        let settings = ApnSettings::new(1, PdpType::Ip, "hologram").unwrap();
        let change = configure_apn(&mut session, &settings);
        assert!(!change.set.success);
        assert!(change.applied.is_some());
        assert!(!change.is_confirmed());
    }

    #[test]
    fn test_selection_mode_commands() {
        assert_eq!(SelectionMode::Automatic.command(), "AT+COPS=0");
        let manual = SelectionMode::manual("310260", false).unwrap();
        assert_eq!(manual.code(), 1);
        assert_eq!(manual.command(), r#"AT+COPS=1,2,"310260""#);
        let fallback = SelectionMode::manual(" 23415 ", true).unwrap();
        assert_eq!(fallback.command(), r#"AT+COPS=4,2,"23415""#);

        assert!(SelectionMode::manual("T-Mobile", false).is_err());
        assert!(SelectionMode::manual("3102", false).is_err());
        assert!(SelectionMode::manual("3102601", false).is_err());
    }

    #[test]
    fn test_force_registration_checks_creg() {
        let (mut session, written) = session(|command| match command {
            "AT+CREG?" => ok(command, "+CREG: 0,5"),
            _ => ok(command, ""),
        });
        let timing = RegistrationTiming {
            wait: Duration::ZERO,
            settle: Duration::ZERO,
        };
        let mode = SelectionMode::manual("310260", true).unwrap();

        let attempt = force_registration(&mut session, &mode, &timing);
        assert_eq!(sent(&written), vec![r#"AT+COPS=4,2,"310260""#, "AT+CREG?"]);
        assert!(attempt.selection.success);
        assert!(attempt.is_registered());
        assert_eq!(
            attempt
                .registration()
                .map(|r| r.stat_text.as_str()),
            Some("Registered, roaming")
        );
    }

    #[test]
    fn test_force_registration_denied() {
        let (mut session, _) = session(|command| match command {
            "AT+CREG?" => ok(command, "+CREG: 0,3"),
            _ => Some("\r\n+CME ERROR: 30\r\n".to_string()),
        });
        let timing = RegistrationTiming {
            wait: Duration::ZERO,
            settle: Duration::ZERO,
        };

        let attempt = force_registration(&mut session, &SelectionMode::Automatic, &timing);
        assert!(!attempt.selection.success);
        assert!(!attempt.is_registered());
        assert_eq!(RegistrationTiming::default().wait, Duration::from_secs(60));
    }
}
