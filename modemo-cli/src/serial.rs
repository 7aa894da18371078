//! Serial port resolution.
//!
//! The port comes from, in order:
//! - `--port` / `MODEMO_PORT`
//! - `[port] name` in the configuration
//! - auto-detection, which may stop a competing port-management service for
//!   as long as the resulting connection lives
//!
//! Non-interactive mode never prompts: several responsive ports are a usage
//! error (exit 2), none is a not-found error (exit 4).

use {
    crate::{
        Cli, CliError,
        config::{Config, StopPolicy},
        use_fancy_output,
    },
    anyhow::{Context, Result},
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle},
    log::{debug, warn},
    modemo::{
        AutoDetector, ConnectionProbe, DetectionReport, ModemSession, NativeBackend,
        PortEnumerator, ScanEvent, Selection, SerialPortCandidate, ServiceControl, ServiceLease,
        SessionConfig, SystemPorts, SystemdService, WorkingPort,
        detect::{DetectPhase, select},
        service::blocking_ports,
    },
    std::{
        collections::BTreeSet,
        fmt::Write as _,
        io::IsTerminal,
        sync::Arc,
        thread,
        time::Duration,
    },
};

/// Baud rate when neither the command line nor the configuration names one.
pub(crate) const DEFAULT_BAUD: u32 = 115200;

pub(crate) fn usage_err(message: &str) -> anyhow::Error {
    // Exit code 2 lets scripts tell "choose a port" apart from runtime failures.
    CliError::Usage(message.to_string()).into()
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Interactive selection requires a terminal; pass --port or use --non-interactive",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Selection cancelled".to_string()).into()
            } else {
                usage_err("Prompt failed; pass --port to skip it")
            }
        },
    }
}

/// Ask before a change to the modem or SIM; `assume_yes` skips the prompt.
///
/// Without a terminal, or in non-interactive mode, there is nobody to ask
/// and the change is refused as a usage error.
pub(crate) fn confirm_change(cli: &Cli, action: &str, assume_yes: bool) -> Result<()> {
    if assume_yes {
        return Ok(());
    }
    let terminal = std::io::stdin().is_terminal() && std::io::stderr().is_terminal();
    if cli.non_interactive || !terminal {
        return Err(usage_err(&format!(
            "Confirmation required to {action}; pass --yes"
        )));
    }
    let accepted = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Really {action}?"))
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);
    if accepted {
        Ok(())
    } else {
        Err(CliError::Cancelled("Operation cancelled".to_string()).into())
    }
}

/// Baud rate for an explicit or configured port.
pub(crate) fn effective_baud(cli_baud: Option<u32>, config: &Config) -> u32 {
    cli_baud
        .or(config.port.baud)
        .unwrap_or(DEFAULT_BAUD)
}

/// Result of an auto-detection run.
pub(crate) struct Detection {
    /// Every attempt and every responsive port.
    pub(crate) report: DetectionReport,
    /// Stopped service, restarted when dropped.
    pub(crate) lease: Option<ServiceLease>,
}

fn lease_prompt(name: &str) -> Result<bool> {
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Stop {name} while probing ports?"))
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)
        .map(|answer| answer.unwrap_or(false))
}

/// Stop the port-management service if it is running and policy allows.
fn stop_competing_service(
    cli: &Cli,
    config: &Config,
    candidates: &[SerialPortCandidate],
) -> Result<Option<ServiceLease>> {
    let policy = config.stop_policy();
    if policy == StopPolicy::Never {
        return Ok(None);
    }

    let control: Arc<dyn ServiceControl> = Arc::new(SystemdService::new(config.service_name()));
    if !control.is_active() {
        debug!("{} is not running", control.name());
        return Ok(None);
    }

    let name = control
        .name()
        .to_string();
    let held: Vec<&str> = blocking_ports(control.as_ref(), candidates)
        .into_iter()
        .map(|candidate| candidate.path.as_str())
        .collect();
    let managed = control.managed_ports();
    if !cli.quiet {
        eprintln!(
            "{} {} is running and may hold modem ports",
            style("!").yellow().bold(),
            style(&name).cyan()
        );
        for path in &held {
            eprintln!("    {} {path} (open)", style("•").dim());
        }
        for path in managed
            .iter()
            .filter(|path| !held.contains(&path.as_str()))
        {
            eprintln!("    {} {path} (managed)", style("•").dim());
        }
    }

    let stop = match policy {
        StopPolicy::Always => true,
        StopPolicy::Never => false,
        StopPolicy::Ask => {
            if cli.non_interactive || !std::io::stdin().is_terminal() {
                warn!("Leaving {name} running; set [service] stop_during_detect = \"always\" to stop it");
                false
            } else {
                lease_prompt(&name)?
            }
        },
    };
    if !stop {
        return Ok(None);
    }

    let lease = ServiceLease::acquire(control);
    if lease.is_some() {
        thread::sleep(ServiceLease::RELEASE_DELAY);
    }
    Ok(lease)
}

fn scan_spinner(quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed}] {msg}")
            .unwrap(),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn say(pb: &ProgressBar, quiet: bool, message: &str) {
    if pb.is_hidden() {
        if !quiet {
            eprintln!("{message}");
        }
    } else {
        pb.println(message);
    }
}

/// Enumerate, optionally stop the competing service, and scan.
pub(crate) fn run_detection(cli: &Cli, config: &Config) -> Result<Detection> {
    let candidates = SystemPorts.candidates();
    if candidates.is_empty() {
        return Err(modemo::Error::DeviceNotFound.into());
    }
    debug!("{} candidate port(s)", candidates.len());

    let lease = stop_competing_service(cli, config, &candidates)?;

    let probe = ConnectionProbe::new(
        Arc::new(NativeBackend::new()),
        config.probe_config(&cli.skip_ports),
    );
    let detector = AutoDetector::new(probe, config.detect_config());

    let pb = scan_spinner(cli.quiet);
    let result = detector.scan(&candidates, &mut |event| match event {
        ScanEvent::Phase(DetectPhase::Primary) => {
            let message = format!(
                "{} Probing {} port(s) at {} baud",
                style("→").cyan(),
                candidates.len(),
                detector
                    .config()
                    .primary_baud
            );
            say(&pb, cli.quiet, &message);
        },
        ScanEvent::Phase(DetectPhase::Fallback) => {
            let message = format!(
                "{} Nothing answered; trying other baud rates",
                style("→").cyan()
            );
            say(&pb, cli.quiet, &message);
        },
        ScanEvent::Probing {
            candidate,
            baud,
            mode,
        } => {
            pb.set_message(format!("{} @ {baud} ({mode})", candidate.path));
        },
        ScanEvent::Finished(attempt) => {
            if attempt
                .outcome
                .is_success()
            {
                let message = format!(
                    "{} {} @ {} baud",
                    style("✓").green(),
                    attempt.path,
                    attempt.baud
                );
                say(&pb, cli.quiet, &message);
            } else {
                debug!("{} @ {}: {}", attempt.path, attempt.baud, attempt.reason());
            }
        },
    });
    pb.finish_and_clear();

    let report = result.context("Detection stopped")?;
    Ok(Detection { report, lease })
}

/// One line per working port, with the recommendation marked.
pub(crate) fn working_port_labels(options: &[WorkingPort], recommended: Option<usize>) -> Vec<String> {
    options
        .iter()
        .enumerate()
        .map(|(index, port)| {
            let mut label = format!("{port} [{}]", port.candidate.class.name());
            match (&port.candidate.vendor, &port.candidate.model) {
                (_, Some(model)) => {
                    let _ = write!(label, " - {model}");
                },
                (Some(vendor), None) => {
                    let _ = write!(label, " - {vendor}");
                },
                (None, None) => {},
            }
            if recommended == Some(index) {
                label.push_str(" (recommended)");
            }
            label
        })
        .collect()
}

pub(crate) fn not_found(report: &DetectionReport) -> anyhow::Error {
    let ports: BTreeSet<&str> = report
        .attempts
        .iter()
        .map(|attempt| attempt.path.as_str())
        .collect();
    let mut message = format!("No modem answered AT on {} port(s)", ports.len());
    for attempt in report.failures() {
        let _ = write!(
            message,
            "\n  {} @ {} baud: {}",
            attempt.path,
            attempt.baud,
            attempt.reason()
        );
    }
    CliError::NotFound(message).into()
}

fn select_interactive(options: Vec<WorkingPort>, recommended: Option<usize>) -> Result<WorkingPort> {
    ensure_interactive_terminal()?;

    let labels = working_port_labels(&options, recommended);
    let term_width = console::Term::stderr()
        .size()
        .1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = labels
        .into_iter()
        .map(|label| console::truncate_str(&label, max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Several ports answered; choose one")
        .items(&labels)
        .default(recommended.unwrap_or(0))
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => options
            .into_iter()
            .nth(index)
            .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}")),
        None => Err(CliError::Cancelled("Selection cancelled".to_string()).into()),
    }
}

/// Pick the port to use from a detection report.
pub(crate) fn choose_port(report: &DetectionReport, non_interactive: bool) -> Result<WorkingPort> {
    match select(&report.working) {
        None => Err(not_found(report)),
        Some(Selection::Single(port)) => Ok(port),
        Some(Selection::Choice {
            options,
            recommended,
        }) => {
            if non_interactive {
                let mut message = "Several ports answered; pass --port to choose:".to_string();
                for label in working_port_labels(&options, recommended) {
                    let _ = write!(message, "\n  {label}");
                }
                Err(usage_err(&message))
            } else {
                select_interactive(options, recommended)
            }
        },
    }
}

/// An open session, plus the service lease that must outlive it.
pub(crate) struct Connection {
    /// The session. Declared first so it closes before the service restarts.
    pub(crate) session: ModemSession,
    _lease: Option<ServiceLease>,
}

/// Resolve the port and open a session on it.
pub(crate) fn connect(cli: &Cli, config: &Config) -> Result<Connection> {
    let (path, baud, lease) = if let Some(port) = &cli.port {
        (port.clone(), effective_baud(cli.baud, config), None)
    } else if let Some(name) = &config.port.name {
        debug!("Using configured port {name}");
        (name.clone(), effective_baud(cli.baud, config), None)
    } else {
        let detection = run_detection(cli, config)?;
        let chosen = choose_port(&detection.report, cli.non_interactive)?;
        (chosen.candidate.path, chosen.baud, detection.lease)
    };

    if !cli.quiet {
        eprintln!(
            "{} Using {} @ {} baud",
            style("🔌").cyan(),
            style(&path).cyan().bold(),
            baud
        );
    }

    let session = ModemSession::connect(&NativeBackend::new(), &path, baud, SessionConfig::default())
        .with_context(|| format!("Failed to connect to {path}"))?;

    Ok(Connection {
        session,
        _lease: lease,
    })
}
