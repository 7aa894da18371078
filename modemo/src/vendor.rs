//! Manufacturer identification and vendor command sets.

use {
    crate::{
        decode::{IdentityKind, Record},
        session::ModemSession,
    },
    log::debug,
    std::{fmt, time::Duration},
};

/// Modem manufacturer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Vendor {
    /// Quectel Wireless Solutions.
    Quectel,
    /// Sierra Wireless.
    SierraWireless,
    /// u-blox.
    Ublox,
    /// Telit.
    Telit,
    /// SIMCom.
    SimCom,
    /// Anything else, with the manufacturer string as reported.
    Other(String),
}

impl Vendor {
    /// Classify a manufacturer string by case-insensitive keyword.
    pub fn classify(manufacturer: &str) -> Self {
        let upper = manufacturer.to_ascii_uppercase();
        if upper.contains("QUECTEL") {
            Self::Quectel
        } else if upper.contains("SIERRA") {
            Self::SierraWireless
        } else if upper.contains("UBLOX") || upper.contains("U-BLOX") {
            Self::Ublox
        } else if upper.contains("TELIT") {
            Self::Telit
        } else if upper.contains("SIMCOM") {
            Self::SimCom
        } else {
            Self::Other(
                manufacturer
                    .trim()
                    .to_string(),
            )
        }
    }

    /// Vendor-specific commands, in presentation order.
    pub fn commands(&self) -> &'static [VendorCommand] {
        match self {
            Self::Quectel => QUECTEL_COMMANDS,
            Self::SierraWireless => SIERRA_COMMANDS,
            Self::Ublox => UBLOX_COMMANDS,
            Self::Telit | Self::SimCom | Self::Other(_) => &[],
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quectel => write!(f, "Quectel"),
            Self::SierraWireless => write!(f, "Sierra Wireless"),
            Self::Ublox => write!(f, "u-blox"),
            Self::Telit => write!(f, "Telit"),
            Self::SimCom => write!(f, "SimCom"),
            Self::Other(name) => write!(f, "{name}"),
        }
    }
}

/// A vendor-specific command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct VendorCommand {
    /// Command text.
    pub command: &'static str,
    /// What it reports.
    pub description: &'static str,
    /// Wait hint; `None` uses the session default.
    pub wait: Option<Duration>,
    /// Part of the full diagnostic suite, rather than an on-demand tool.
    pub diagnostic: bool,
}

const fn cmd(command: &'static str, description: &'static str, diagnostic: bool) -> VendorCommand {
    VendorCommand {
        command,
        description,
        wait: None,
        diagnostic,
    }
}

const QUECTEL_COMMANDS: &[VendorCommand] = &[
    cmd("AT+QENG=\"servingcell\"", "Serving cell info (Quectel)", true),
    cmd("AT+QNWINFO", "Network information (Quectel)", true),
    cmd("AT+QSPN", "Service provider name (Quectel)", true),
    cmd("AT+QCCID", "ICCID via Quectel command", true),
    cmd("AT+QTEMP", "Temperature reading", false),
    VendorCommand {
        command: "AT+QENG=\"neighbourcell\"",
        description: "Neighboring cells",
        wait: Some(Duration::from_secs(10)),
        diagnostic: false,
    },
    cmd("AT+QUIMSLOT?", "SIM slot configuration", false),
    cmd("AT+QGPS?", "GPS status", false),
    cmd("AT+QESIM=\"eid\"", "eSIM support (EID)", false),
];

const SIERRA_COMMANDS: &[VendorCommand] = &[
    cmd("AT!GSTATUS?", "Status information (Sierra)", true),
    cmd("AT+KCELLMEAS=1", "Cell measurements (Sierra)", true),
];

const UBLOX_COMMANDS: &[VendorCommand] = &[
    cmd("AT+UCGED?", "Cell information (u-blox)", true),
    cmd("AT+UREG?", "Registration status (u-blox)", true),
];

/// Identified manufacturer and model of a connected modem.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct VendorProfile {
    /// Classified vendor.
    pub vendor: Vendor,
    /// Manufacturer string as reported.
    pub manufacturer: String,
    /// Model string, when the modem reports one.
    pub model: Option<String>,
}

fn identity(record: &Record, kind: IdentityKind) -> Option<String> {
    match record {
        Record::Identity(id) if id.kind == kind && !id.value.is_empty() => Some(id.value.clone()),
        _ => None,
    }
}

impl VendorProfile {
    /// Ask the modem who it is (`AT+CGMI`, `AT+CGMM`).
    ///
    /// `None` when the manufacturer query fails.
    pub fn resolve(session: &mut ModemSession) -> Option<Self> {
        let manufacturer = session.send("AT+CGMI");
        let model = session.send("AT+CGMM");

        let manufacturer = manufacturer
            .success
            .then(|| identity(&manufacturer.record, IdentityKind::Manufacturer))
            .flatten()?;
        let model = model
            .success
            .then(|| identity(&model.record, IdentityKind::Model))
            .flatten();

        let profile = Self {
            vendor: Vendor::classify(&manufacturer),
            manufacturer,
            model,
        };
        debug!("Identified modem: {profile}");
        Some(profile)
    }

    /// Commands for this vendor.
    pub fn commands(&self) -> &'static [VendorCommand] {
        self.vendor
            .commands()
    }

    /// Commands that belong in the full diagnostic suite.
    pub fn diagnostic_commands(&self) -> impl Iterator<Item = &'static VendorCommand> {
        self.commands()
            .iter()
            .filter(|command| command.diagnostic)
    }
}

impl fmt::Display for VendorProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.model {
            Some(model) => write!(f, "{} - {model}", self.vendor),
            None => write!(f, "{}", self.vendor),
        }
    }
}
