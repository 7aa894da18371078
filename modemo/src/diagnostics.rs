//! Command suites run over an open session.

use {
    crate::{
        session::{CommandResponse, ModemSession},
        vendor::VendorProfile,
    },
    log::debug,
    std::{thread, time::Duration},
};

/// One command of a suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckStep {
    /// Command text.
    pub command: &'static str,
    /// What it reports.
    pub description: &'static str,
    /// Wait hint; `None` uses the session default.
    pub wait: Option<Duration>,
}

const fn step(command: &'static str, description: &'static str) -> CheckStep {
    CheckStep {
        command,
        description,
        wait: None,
    }
}

/// Pause between suite commands.
pub const STEP_GAP: Duration = Duration::from_millis(200);

/// Identification, SIM, registration, signal and PDP checks.
pub const STANDARD_CHECKS: &[CheckStep] = &[
    step("AT", "Basic communication test"),
    step("ATI", "Modem information"),
    step("AT+CGMI", "Manufacturer identification"),
    step("AT+CGMM", "Model identification"),
    step("AT+CGMR", "Firmware version"),
    step("AT+CGSN", "IMEI"),
    step("AT+CPIN?", "SIM status"),
    step("AT+CCID", "ICCID (SIM serial)"),
    step("AT+CIMI", "IMSI"),
    step("AT+CSQ", "Signal quality"),
    step("AT+CREG?", "Network registration (CS)"),
    step("AT+CGREG?", "GPRS registration (PS)"),
    step("AT+CEREG?", "EPS registration (LTE)"),
    step("AT+COPS?", "Operator selection"),
    step("AT+CGDCONT?", "PDP context"),
];

/// Short health check.
pub const QUICK_STATUS: &[CheckStep] = &[
    step("AT+CPIN?", "SIM status"),
    step("AT+CSQ", "Signal quality"),
    step("AT+CREG?", "Network registration (CS)"),
    step("AT+CEREG?", "EPS registration (LTE)"),
    step("AT+COPS?", "Operator selection"),
];

/// Operator scan. Slow: the modem searches every band.
pub const NETWORK_SCAN: &[CheckStep] = &[CheckStep {
    command: "AT+COPS=?",
    description: "Available networks",
    wait: Some(Duration::from_secs(60)),
}];

/// Packet data attach, activation and addressing.
pub const DATA_STATUS: &[CheckStep] = &[
    step("AT+CGATT?", "GPRS attach status"),
    step("AT+CGACT?", "PDP context activation"),
    step("AT+CGPADDR", "IP address assignment"),
];

/// Reply to one suite command.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CheckResult {
    /// What the command reports.
    pub description: String,
    /// The reply.
    pub response: CommandResponse,
}

/// Result of a full diagnostic run.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DiagnosticReport {
    /// Identified modem, when it answered `AT+CGMI`.
    pub vendor: Option<VendorProfile>,
    /// Every reply, in order.
    pub results: Vec<CheckResult>,
}

impl DiagnosticReport {
    /// Number of commands that succeeded.
    pub fn passed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.response.success)
            .count()
    }
}

/// Run `steps` in order, `gap` apart, stopping early when `interrupted`
/// returns true. `on_result` sees each reply as it arrives.
pub fn run_checks(
    session: &mut ModemSession,
    steps: &[CheckStep],
    gap: Duration,
    interrupted: &dyn Fn() -> bool,
    on_result: &mut dyn FnMut(&CheckResult),
) -> Vec<CheckResult> {
    let mut results = Vec::with_capacity(steps.len());
    for (index, step) in steps
        .iter()
        .enumerate()
    {
        if interrupted() {
            debug!("Check suite interrupted after {index} command(s)");
            break;
        }
        if index > 0 && !gap.is_zero() {
            thread::sleep(gap);
        }
        let result = CheckResult {
            description: step
                .description
                .to_string(),
            response: match step.wait {
                Some(wait) => session.send_command(step.command, wait),
                None => session.send(step.command),
            },
        };
        on_result(&result);
        results.push(result);
    }
    results
}

/// Identify the modem, then run the standard suite plus the vendor's
/// diagnostic commands.
pub fn run_full_diagnostic(
    session: &mut ModemSession,
    gap: Duration,
    interrupted: &dyn Fn() -> bool,
    on_result: &mut dyn FnMut(&CheckResult),
) -> DiagnosticReport {
    let vendor = session
        .vendor_profile()
        .cloned();

    let mut steps = STANDARD_CHECKS.to_vec();
    if let Some(profile) = &vendor {
        steps.extend(
            profile
                .diagnostic_commands()
                .map(|command| CheckStep {
                    command: command.command,
                    description: command.description,
                    wait: command.wait,
                }),
        );
    }

    let results = run_checks(session, &steps, gap, interrupted, on_result);
    DiagnosticReport { vendor, results }
}
