//! Auto-detection report.

use anyhow::Result;
use console::style;
use modemo::{DetectionReport, detect::recommend};
use serde_json::json;

use crate::config::Config;
use crate::serial::{not_found, run_detection, working_port_labels};
use crate::Cli;

fn report_json(report: &DetectionReport) -> serde_json::Value {
    let attempts: Vec<serde_json::Value> = report
        .attempts
        .iter()
        .map(|attempt| {
            json!({
                "path": attempt.path,
                "baud": attempt.baud,
                "mode": attempt.mode,
                "success": attempt.outcome.is_success(),
                "reason": attempt.reason(),
                "elapsed_ms": attempt.elapsed.as_millis(),
            })
        })
        .collect();
    json!({
        "attempts": attempts,
        "working": report.working,
        "recommended": recommend(&report.working),
    })
}

fn print_attempts(report: &DetectionReport) {
    println!("{}", style("Attempts").bold().underlined());
    for attempt in &report.attempts {
        let mark = if attempt.outcome.is_success() {
            style("✓").green()
        } else {
            style("✗").red()
        };
        println!(
            "  {mark} {} @ {} baud {} {}",
            style(&attempt.path).cyan(),
            attempt.baud,
            style(format!("({}, {:.1}s)", attempt.mode, attempt.elapsed.as_secs_f64())).dim(),
            attempt.reason()
        );
    }
}

/// Detect command implementation.
///
/// Exits 4 when nothing answered, after printing what was tried.
pub(crate) fn cmd_detect(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let detection = run_detection(cli, config)?;
    let report = &detection.report;

    if json {
        println!("{}", serde_json::to_string_pretty(&report_json(report))?);
    } else {
        print_attempts(report);
    }

    if report.working.is_empty() {
        return Err(not_found(report));
    }
    if json {
        return Ok(());
    }

    let recommended = recommend(&report.working);
    println!();
    println!("{}", style("Responsive ports").bold().underlined());
    for label in working_port_labels(&report.working, recommended) {
        println!("  {} {label}", style("•").green());
    }
    if let Some(index) = recommended.or((report.working.len() == 1).then_some(0)) {
        eprintln!(
            "\n{} Use it with: modemo -p {} -b {} status",
            style("→").green().bold(),
            report.working[index].candidate.path,
            report.working[index].baud
        );
    }
    Ok(())
}
