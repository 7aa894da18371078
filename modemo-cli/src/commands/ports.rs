//! Port listing.

use anyhow::Result;
use console::style;
use modemo::{SerialPortCandidate, detect_ports};

use crate::Cli;

fn print_port_list(ports: &[SerialPortCandidate]) {
    println!("{}", style("Serial ports").bold().underlined());

    if ports.is_empty() {
        println!("  {}", style("No serial ports found").dim());
        return;
    }

    for port in ports {
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = match (&port.vendor, &port.model) {
            (Some(vendor), Some(model)) => format!(" - {}", style(format!("{vendor} {model}")).dim()),
            (None, Some(text)) | (Some(text), None) => format!(" - {}", style(text).dim()),
            (None, None) => String::new(),
        };

        println!(
            "  {} {} [{}]{}{}",
            style("•").green(),
            style(&port.path).cyan(),
            style(port.class.name()).yellow(),
            vid_pid,
            product
        );
    }
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(cli: &Cli, json: bool) -> Result<()> {
    let detected = detect_ports();

    if json {
        println!("{}", serde_json::to_string_pretty(&detected)?);
        return Ok(());
    }

    print_port_list(&detected);

    if let Some(best) = detected.first() {
        if !cli.quiet {
            eprintln!(
                "\n{} Probed first during detection: {}",
                style("→").green().bold(),
                style(&best.path).cyan().bold()
            );
        }
    }
    Ok(())
}
