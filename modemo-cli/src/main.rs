//! modemo CLI - Find cellular modems on serial ports and talk AT to them.
//!
//! ## Features
//!
//! - Ranked serial port listing
//! - Bounded auto-detection of port, baud rate and flow control
//! - Full diagnostics with vendor-specific commands
//! - Raw AT commands with decoded replies
//! - Forbidden network list, APN and operator selection
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

mod commands;
mod config;
mod serial;

use config::Config;

/// Errors that carry their own exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation, or a decision only the user can make.
    #[error("{0}")]
    Usage(String),
    /// The user backed out.
    #[error("{0}")]
    Cancelled(String),
    /// Nothing answered.
    #[error("{0}")]
    NotFound(String),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::NotFound(_) => 4,
            Self::Cancelled(_) => 130,
        }
    }
}

/// Map an error to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return cli_err.exit_code();
    }
    match err.downcast_ref::<modemo::Error>() {
        Some(modemo::Error::DeviceNotFound) => 4,
        Some(modemo::Error::Cancelled) => 130,
        Some(modemo::Error::InvalidArgument(_)) => 2,
        _ if was_interrupted() => 130,
        _ => 1,
    }
}

/// modemo - Find a cellular modem on a serial port and run AT diagnostics.
///
/// Environment variables:
///   MODEMO_PORT              - Serial port to use (skips detection)
///   MODEMO_BAUD              - Baud rate for that port (default: 115200)
///   MODEMO_SKIP_PORTS        - Comma-separated ports never probed
///   MODEMO_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
///   MODEMO_DEBUG             - Set to 1 for debug logging
#[derive(Parser)]
#[command(name = "modemo")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  modemo list-ports\n  modemo detect\n  modemo -p /dev/ttyUSB2 at AT+CSQ AT+COPS?\n  modemo diagnose --json\n  modemo set-apn hologram --cid 1\n  modemo register --mode manual --operator 310260")]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "MODEMO_PORT")]
    port: Option<String>,

    /// Baud rate for an explicit or configured port [default: 115200].
    #[arg(short, long, global = true, env = "MODEMO_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "MODEMO_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Port to leave alone during detection (repeatable).
    #[arg(
        long = "skip-port",
        global = true,
        env = "MODEMO_SKIP_PORTS",
        value_delimiter = ',',
        value_name = "PORT"
    )]
    skip_ports: Vec<String>,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// PDP type accepted by `set-apn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PdpTypeArg {
    /// IPv4.
    Ip,
    /// IPv6.
    Ipv6,
    /// Dual stack.
    Ipv4v6,
}

impl From<PdpTypeArg> for modemo::PdpType {
    fn from(value: PdpTypeArg) -> Self {
        match value {
            PdpTypeArg::Ip => Self::Ip,
            PdpTypeArg::Ipv6 => Self::Ipv6,
            PdpTypeArg::Ipv4v6 => Self::Ipv4v6,
        }
    }
}

/// Network selection mode accepted by `register`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SelectionArg {
    /// Let the modem choose (AT+COPS=0).
    Auto,
    /// Register on --operator only (AT+COPS=1).
    Manual,
    /// Try --operator, then fall back to automatic (AT+COPS=4).
    ManualFallback,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// List candidate serial ports, best first.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Probe every port and report which one answers AT.
    Detect {
        /// Output attempts and results as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Run the full diagnostic suite, including vendor commands.
    Diagnose {
        /// Output the report as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Show SIM, signal, registration and operator.
    Status {
        /// Output replies as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Send AT commands and show raw and decoded replies.
    At {
        /// Commands to send, in order (e.g. AT+CSQ).
        #[arg(required = true, value_name = "COMMAND")]
        commands: Vec<String>,

        /// How long to collect each reply, in milliseconds.
        #[arg(long, value_name = "MS")]
        wait_ms: Option<u64>,

        /// Output replies as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Search for available networks (slow).
    ScanNetworks {
        /// Output replies as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Show packet data attach, activation and addresses.
    DataStatus {
        /// Output replies as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Show the SIM's forbidden network list and preferred operators.
    Fplmn {
        /// Output replies as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Clear the forbidden network list and the preferred operator list.
    ClearFplmn {
        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,

        /// Output replies as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Set the APN of a PDP context and read it back.
    SetApn {
        /// Access point name.
        apn: String,

        /// Context id.
        #[arg(long, default_value_t = 1)]
        cid: u8,

        /// PDP type.
        #[arg(long, value_enum, default_value_t = PdpTypeArg::Ip)]
        pdp_type: PdpTypeArg,

        /// Output the change as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Select a network operator and report the resulting registration.
    Register {
        /// Selection mode.
        #[arg(long, value_enum, default_value_t = SelectionArg::Auto)]
        mode: SelectionArg,

        /// Numeric operator code (MCC+MNC, e.g. 310260) for manual modes.
        #[arg(long, value_name = "MCCMNC")]
        operator: Option<String>,

        /// Output the result as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}

fn run() -> Result<()> {
    // --- NO_COLOR and TTY detection (clig.dev best practice) ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        // Disable all color output
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let verbose = if env::var("MODEMO_DEBUG").is_ok_and(|v| v == "1") {
        cli.verbose.max(1)
    } else {
        cli.verbose
    };
    let log_level = if cli.quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(verbose >= 2)
        .format_timestamp(if verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "modemo v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        verbose
    );

    // Ctrl-C stops scans and suites between commands.
    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    modemo::set_interrupt_checker(was_interrupted);

    // Load configuration
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(&cli, *json)?,
        Commands::Detect { json } => commands::detect::cmd_detect(&cli, &config, *json)?,
        Commands::Diagnose { json } => commands::modem::cmd_diagnose(&cli, &config, *json)?,
        Commands::Status { json } => commands::modem::cmd_status(&cli, &config, *json)?,
        Commands::At {
            commands: at_commands,
            wait_ms,
            json,
        } => commands::modem::cmd_at(&cli, &config, at_commands, *wait_ms, *json)?,
        Commands::ScanNetworks { json } => {
            commands::modem::cmd_scan_networks(&cli, &config, *json)?;
        },
        Commands::DataStatus { json } => commands::modem::cmd_data_status(&cli, &config, *json)?,
        Commands::Fplmn { json } => commands::modem::cmd_fplmn(&cli, &config, *json)?,
        Commands::ClearFplmn { yes, json } => {
            commands::modem::cmd_clear_fplmn(&cli, &config, *yes, *json)?;
        },
        Commands::SetApn {
            apn,
            cid,
            pdp_type,
            json,
        } => {
            let settings = commands::modem::apn_settings(*cid, (*pdp_type).into(), apn)?;
            commands::modem::cmd_set_apn(&cli, &config, &settings, *json)?;
        },
        Commands::Register {
            mode,
            operator,
            json,
        } => {
            let mode = commands::modem::selection_mode(*mode, operator.as_deref())?;
            commands::modem::cmd_register(&cli, &config, &mode, *json)?;
        },
        Commands::Completions { shell } => commands::completions::cmd_completions(*shell),
    }

    Ok(())
}
