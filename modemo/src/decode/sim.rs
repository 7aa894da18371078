//! SIM status and identification grammars.

use {
    super::{
        FieldMap, Fields, Record,
        tokens::{digits_only, first_payload, split_params},
    },
    std::fmt,
};

/// SIM status (`+CPIN?`).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SimStatus {
    /// Status token as reported ("READY", "SIM PIN", ...).
    pub status: String,
    /// Human-readable status.
    pub status_text: String,
    /// Whether the SIM is unlocked and usable.
    pub ready: bool,
}

impl SimStatus {
    /// Flat field view.
    pub fn fields(&self) -> FieldMap {
        Fields::new()
            .with("sim_status", self.status.as_str())
            .with("sim_status_text", self.status_text.as_str())
            .with("sim_ready", self.ready)
            .build()
    }
}

fn sim_status_text(status: &str) -> String {
    match status {
        "READY" => "SIM is ready",
        "SIM PIN" => "SIM requires PIN",
        "SIM PUK" => "SIM requires PUK",
        "SIM PIN2" => "SIM requires PIN2",
        "SIM PUK2" => "SIM requires PUK2",
        other => other,
    }
    .to_string()
}

pub(crate) fn decode_sim_status(lines: &[&str]) -> Record {
    first_payload(lines, "+CPIN:").map_or(Record::Raw, |status| {
        Record::SimStatus(SimStatus {
            status: status.to_string(),
            status_text: sim_status_text(status),
            ready: status == "READY",
        })
    })
}

/// Which identity a single-line reply carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum IdentityKind {
    /// `+CGMI`
    Manufacturer,
    /// `+CGMM`
    Model,
    /// `+CGMR`
    Firmware,
    /// `+CGSN`
    Imei,
    /// `+CIMI`
    Imsi,
    /// `+CCID` and vendor variants; digits only.
    Iccid,
}

impl IdentityKind {
    /// Field name used in flat views.
    pub fn field_name(self) -> &'static str {
        match self {
            Self::Manufacturer => "manufacturer",
            Self::Model => "model",
            Self::Firmware => "firmware",
            Self::Imei => "imei",
            Self::Imsi => "imsi",
            Self::Iccid => "iccid",
        }
    }
}

/// A single identification value.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Identity {
    /// What the value identifies.
    pub kind: IdentityKind,
    /// The value.
    pub value: String,
}

impl Identity {
    /// Flat field view.
    pub fn fields(&self) -> FieldMap {
        Fields::new()
            .with(self.kind.field_name(), self.value.as_str())
            .build()
    }
}

fn identity(kind: IdentityKind, lines: &[&str]) -> Record {
    let Some(first) = lines.first() else {
        return Record::Raw;
    };
    let value = match kind {
        IdentityKind::Iccid => digits_only(first),
        _ => (*first).to_string(),
    };
    Record::Identity(Identity { kind, value })
}

pub(crate) fn decode_manufacturer(lines: &[&str]) -> Record {
    identity(IdentityKind::Manufacturer, lines)
}

pub(crate) fn decode_model(lines: &[&str]) -> Record {
    identity(IdentityKind::Model, lines)
}

pub(crate) fn decode_firmware(lines: &[&str]) -> Record {
    identity(IdentityKind::Firmware, lines)
}

pub(crate) fn decode_imei(lines: &[&str]) -> Record {
    identity(IdentityKind::Imei, lines)
}

pub(crate) fn decode_imsi(lines: &[&str]) -> Record {
    identity(IdentityKind::Imsi, lines)
}

pub(crate) fn decode_iccid(lines: &[&str]) -> Record {
    identity(IdentityKind::Iccid, lines)
}

/// `ATI` product information, all lines joined.
pub(crate) fn decode_info(lines: &[&str]) -> Record {
    if lines.is_empty() {
        return Record::Raw;
    }
    Record::Info(lines.join("\n"))
}

/// Reply to a restricted SIM access (`+CRSM`).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SimFile {
    /// First status word byte.
    pub sw1: u8,
    /// Second status word byte.
    pub sw2: u8,
    /// Hex payload, upper-cased; empty for updates and failures.
    pub data: String,
}

impl SimFile {
    /// Whether the SIM reported normal completion (`90 00`, `91 xx`, `92 xx`).
    pub fn is_ok(&self) -> bool {
        matches!(self.sw1, 0x90..=0x92)
    }

    /// Flat field view.
    pub fn fields(&self) -> FieldMap {
        Fields::new()
            .with("sw1", self.sw1)
            .with("sw2", self.sw2)
            .with("status", format!("{:02X} {:02X}", self.sw1, self.sw2))
            .with_opt("data", (!self.data.is_empty()).then_some(self.data.as_str()))
            .build()
    }
}

pub(crate) fn decode_sim_file(lines: &[&str]) -> Record {
    let Some(text) = first_payload(lines, "+CRSM:") else {
        return Record::Raw;
    };
    let params = split_params(text);
    let (Some(sw1), Some(sw2)) = (
        params
            .first()
            .and_then(|p| p.int::<u8>()),
        params
            .get(1)
            .and_then(|p| p.int::<u8>()),
    ) else {
        return Record::Raw;
    };
    Record::SimFile(SimFile {
        sw1,
        sw2,
        data: params
            .get(2)
            .map(|p| p.text.to_ascii_uppercase())
            .unwrap_or_default(),
    })
}

/// A network identity as stored on the SIM.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Plmn {
    /// Mobile country code, 3 digits.
    pub mcc: String,
    /// Mobile network code, 2 or 3 digits.
    pub mnc: String,
}

impl fmt::Display for Plmn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.mcc, self.mnc)
    }
}

fn plmn_entry(entry: &[char]) -> Option<Plmn> {
    if entry
        .iter()
        .all(|c| *c == 'F')
    {
        return None;
    }
    // Nibble-swapped BCD: MCC2 MCC1 | MNC3 MCC3 | MNC2 MNC1.
    let mcc: String = [entry[1], entry[0], entry[3]]
        .into_iter()
        .collect();
    let mut mnc: String = [entry[5], entry[4]]
        .into_iter()
        .collect();
    if entry[2] != 'F' {
        mnc.push(entry[2]);
    }
    let digits = mcc
        .chars()
        .chain(mnc.chars())
        .all(|c| c.is_ascii_digit());
    digits.then_some(Plmn { mcc, mnc })
}

/// PLMN entries of an EF_FPLMN style payload: 3 bytes each, in hex.
///
/// Unused (`FFFFFF`) and malformed entries are skipped, as is a trailing
/// partial entry.
pub fn decode_plmn_list(hex: &str) -> Vec<Plmn> {
    let nibbles: Vec<char> = hex
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    nibbles
        .chunks_exact(6)
        .filter_map(plmn_entry)
        .collect()
}
