//! Commands that talk to a connected modem.

use anyhow::{Result, bail};
use console::style;
use modemo::{
    ApnSettings, CheckResult, CommandResponse, FieldValue, PdpType, SelectionMode,
    configure::{
        RegistrationTiming, clear_fplmn, configure_apn, force_registration, read_fplmn,
    },
    decode::{Plmn, response_lines},
    diagnostics::{
        CheckStep, DATA_STATUS, NETWORK_SCAN, QUICK_STATUS, STEP_GAP, run_checks,
        run_full_diagnostic,
    },
};
use serde::Serialize;
use std::time::Duration;

use crate::config::Config;
use crate::serial::{confirm_change, connect, usage_err};
use crate::{Cli, CliError, SelectionArg, was_interrupted};

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted".to_string()).into())
    } else {
        Ok(())
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_value(name: &str, value: &FieldValue) {
    match value {
        FieldValue::List(items) => {
            println!("    {}:", style(name).dim());
            for item in items {
                let inner: Vec<String> = item
                    .iter()
                    .map(|(key, value)| format!("{key}={value}"))
                    .collect();
                println!("      - {}", inner.join(", "));
            }
        },
        _ => println!("    {} {value}", style(format!("{name}:")).dim()),
    }
}

/// Print one reply: status line, then decoded fields or raw lines.
fn print_response(description: Option<&str>, response: &CommandResponse) {
    let label = match description {
        Some(description) => format!("{description} ({})", response.command),
        None => response
            .command
            .clone(),
    };
    if response.success {
        println!("{} {}", style("✓").green(), style(label).bold());
    } else {
        let reason = response
            .error
            .as_ref()
            .map_or_else(|| "Unexpected reply".to_string(), ToString::to_string);
        println!(
            "{} {}: {}",
            style("✗").red(),
            style(label).bold(),
            style(reason).red()
        );
    }

    let fields = response.fields();
    if fields.is_empty() {
        for line in response_lines(&response.command, &response.raw) {
            println!("    {line}");
        }
    } else {
        for (name, value) in &fields {
            print_value(name, value);
        }
    }
}

fn print_check(result: &CheckResult) {
    print_response(Some(&result.description), &result.response);
}

fn print_summary(results: &[CheckResult]) {
    let passed = results
        .iter()
        .filter(|r| r.response.success)
        .count();
    eprintln!(
        "\n{} {passed}/{} command(s) succeeded",
        if passed == results.len() {
            style("✓").green()
        } else {
            style("!").yellow()
        },
        results.len()
    );
}

/// Connect and run a fixed suite.
fn run_suite(cli: &Cli, config: &Config, title: &str, steps: &[CheckStep], json: bool) -> Result<()> {
    let mut connection = connect(cli, config)?;

    if !json && !cli.quiet {
        eprintln!("{} {title}", style("ℹ").blue());
    }
    let results = run_checks(
        &mut connection.session,
        steps,
        STEP_GAP,
        &was_interrupted,
        &mut |result| {
            if !json {
                print_check(result);
            }
        },
    );
    ensure_not_interrupted()?;

    if json {
        print_json(&results)?;
    } else if !cli.quiet {
        print_summary(&results);
    }
    Ok(())
}

/// Diagnose command implementation.
pub(crate) fn cmd_diagnose(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let mut connection = connect(cli, config)?;

    if !json && !cli.quiet {
        match connection
            .session
            .vendor_profile()
        {
            Some(profile) => eprintln!("{} Modem: {}", style("ℹ").blue(), style(profile).bold()),
            None => eprintln!("{} Modem did not identify itself", style("!").yellow()),
        }
    }

    let report = run_full_diagnostic(
        &mut connection.session,
        STEP_GAP,
        &was_interrupted,
        &mut |result| {
            if !json {
                print_check(result);
            }
        },
    );
    ensure_not_interrupted()?;

    if json {
        print_json(&report)?;
    } else if !cli.quiet {
        print_summary(&report.results);
    }
    Ok(())
}

/// Status command implementation.
pub(crate) fn cmd_status(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    run_suite(cli, config, "Quick status", QUICK_STATUS, json)
}

/// Scan-networks command implementation.
pub(crate) fn cmd_scan_networks(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    run_suite(
        cli,
        config,
        "Scanning for networks (this can take a minute)",
        NETWORK_SCAN,
        json,
    )
}

/// Data-status command implementation.
pub(crate) fn cmd_data_status(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    run_suite(cli, config, "Packet data status", DATA_STATUS, json)
}

/// AT command implementation.
pub(crate) fn cmd_at(
    cli: &Cli,
    config: &Config,
    commands: &[String],
    wait_ms: Option<u64>,
    json: bool,
) -> Result<()> {
    let mut connection = connect(cli, config)?;
    let session = &mut connection.session;
    let wait = wait_ms.map(Duration::from_millis);

    let mut responses = Vec::with_capacity(commands.len());
    for command in commands {
        ensure_not_interrupted()?;
        let response = match wait {
            Some(wait) => session.send_command(command, wait),
            None => session.send(command),
        };
        if !json {
            print_response(None, &response);
        }
        responses.push(response);
        if !session.is_connected() {
            bail!("Connection to {} lost", session.port_name());
        }
    }

    if json {
        print_json(&responses)?;
    }
    Ok(())
}

fn plmn_summary(plmns: &[Plmn]) -> String {
    if plmns.is_empty() {
        "none".to_string()
    } else {
        plmns
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Fplmn command implementation.
pub(crate) fn cmd_fplmn(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let mut connection = connect(cli, config)?;
    let report = read_fplmn(&mut connection.session);

    if json {
        return print_json(&report);
    }
    for response in &report.responses {
        print_response(None, response);
    }
    match &report.forbidden {
        Some(plmns) => println!(
            "{} Forbidden networks: {}",
            style("ℹ").blue(),
            plmn_summary(plmns)
        ),
        None => println!(
            "{} Could not read the forbidden network list from the SIM",
            style("!").yellow()
        ),
    }
    Ok(())
}

/// Clear-fplmn command implementation.
pub(crate) fn cmd_clear_fplmn(cli: &Cli, config: &Config, yes: bool, json: bool) -> Result<()> {
    confirm_change(cli, "clear the forbidden network list", yes)?;
    let mut connection = connect(cli, config)?;
    let outcome = clear_fplmn(&mut connection.session);

    if json {
        return print_json(&outcome);
    }
    for response in &outcome.responses {
        print_response(None, response);
    }
    match &outcome.remaining {
        Some(_) if outcome.is_cleared() => {
            println!("{} Forbidden network list is empty", style("✓").green());
        },
        Some(left) => println!(
            "{} Still forbidden: {}",
            style("!").yellow(),
            plmn_summary(left)
        ),
        None => println!(
            "{} Could not read the list back from the SIM",
            style("!").yellow()
        ),
    }
    if !cli.quiet {
        eprintln!(
            "{} The modem may need a restart before it forgets cached entries",
            style("ℹ").blue()
        );
    }
    Ok(())
}

/// Validated APN settings; invalid input is a usage error.
pub(crate) fn apn_settings(cid: u8, pdp_type: PdpType, apn: &str) -> Result<ApnSettings> {
    ApnSettings::new(cid, pdp_type, apn).map_err(|e| usage_err(&e.to_string()))
}

/// Set-apn command implementation.
pub(crate) fn cmd_set_apn(
    cli: &Cli,
    config: &Config,
    settings: &ApnSettings,
    json: bool,
) -> Result<()> {
    let mut connection = connect(cli, config)?;
    let change = configure_apn(&mut connection.session, settings);

    if json {
        print_json(&change)?;
    } else {
        print_response(Some("Set APN"), &change.set);
        print_response(Some("Verify"), &change.verify);
    }
    if change.is_confirmed() {
        if !json && !cli.quiet {
            eprintln!(
                "{} CID {}: {}, APN {}",
                style("✓").green(),
                settings.cid,
                settings.pdp_type,
                style(&settings.apn).bold()
            );
        }
        Ok(())
    } else {
        bail!(
            "APN for CID {} was not applied ({})",
            settings.cid,
            change
                .set
                .error
                .as_ref()
                .map_or_else(|| "read-back differs".to_string(), ToString::to_string)
        )
    }
}

/// Selection mode from the command line; a missing or malformed operator is
/// a usage error.
pub(crate) fn selection_mode(mode: SelectionArg, operator: Option<&str>) -> Result<SelectionMode> {
    match (mode, operator) {
        (SelectionArg::Auto, None) => Ok(SelectionMode::Automatic),
        (SelectionArg::Auto, Some(_)) => Err(usage_err(
            "--operator only applies to --mode manual or manual-fallback",
        )),
        (_, None) => Err(usage_err("--operator is required for manual selection")),
        (mode, Some(operator)) => {
            SelectionMode::manual(operator, mode == SelectionArg::ManualFallback)
                .map_err(|e| usage_err(&e.to_string()))
        },
    }
}

/// Register command implementation.
pub(crate) fn cmd_register(
    cli: &Cli,
    config: &Config,
    mode: &SelectionMode,
    json: bool,
) -> Result<()> {
    let mut connection = connect(cli, config)?;
    if !json && !cli.quiet {
        eprintln!(
            "{} Registering with {} (this can take a minute)",
            style("ℹ").blue(),
            mode.command()
        );
    }
    let attempt = force_registration(
        &mut connection.session,
        mode,
        &RegistrationTiming::default(),
    );
    ensure_not_interrupted()?;

    if json {
        print_json(&attempt)?;
    } else {
        print_response(Some("Network selection"), &attempt.selection);
        print_response(Some("Registration"), &attempt.status);
    }
    if attempt.is_registered() {
        Ok(())
    } else {
        let state = attempt
            .registration()
            .map_or_else(|| "unknown".to_string(), |r| r.stat_text.clone());
        bail!("Modem is not registered ({state})")
    }
}
