//! Network selection, registration and signal quality grammars.

use super::{
    FieldMap, Fields, Record,
    tokens::{first_payload, paren_groups, payload, split_params},
};

/// Access technology labels shared by `+COPS` and the registration family.
const ACCESS_TECH_LABELS: [&str; 12] = [
    "GSM",
    "GSM Compact",
    "UTRAN",
    "GSM w/EGPRS",
    "UTRAN w/HSDPA",
    "UTRAN w/HSUPA",
    "UTRAN w/HSDPA and HSUPA",
    "E-UTRAN",
    "EC-GSM-IoT",
    "E-UTRAN (NB-S1 mode)",
    "E-UTRA connected to 5GCN",
    "NR connected to 5GCN",
];

const COPS_MODE_LABELS: [&str; 5] = [
    "Automatic",
    "Manual",
    "Deregister",
    "Set format only",
    "Manual/Automatic",
];

const REG_STAT_LABELS: [&str; 6] = [
    "Not registered, not searching",
    "Registered, home network",
    "Not registered, searching",
    "Registration denied",
    "Unknown",
    "Registered, roaming",
];

const SCAN_STATUS_LABELS: [&str; 4] = ["Unknown", "Available", "Current", "Forbidden"];

const BER_RANGES: [&str; 8] = [
    "<0.2%",
    "0.2-0.4%",
    "0.4-0.8%",
    "0.8-1.6%",
    "1.6-3.2%",
    "3.2-6.4%",
    "6.4-12.8%",
    ">12.8%",
];

fn label(table: &[&str], code: u8) -> String {
    table
        .get(usize::from(code))
        .map_or_else(|| format!("Unknown ({code})"), |text| (*text).to_string())
}

/// Label for an access technology code.
pub fn access_tech_label(code: u8) -> String {
    label(&ACCESS_TECH_LABELS, code)
}

/// Registration replies only define codes up to NB-S1 mode.
const REGISTRATION_ACCESS_TECHS: usize = 10;

/// Label for an access technology code in a registration reply.
pub fn registration_access_tech_label(code: u8) -> String {
    label(&ACCESS_TECH_LABELS[..REGISTRATION_ACCESS_TECHS], code)
}

/// Current operator selection (`+COPS?`).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct OperatorSelection {
    /// Selection mode code.
    pub mode: u8,
    /// Selection mode label.
    pub mode_text: String,
    /// Operator name format (0 long, 1 short, 2 numeric).
    pub format: Option<u8>,
    /// Operator name in `format`.
    pub operator: Option<String>,
    /// Access technology code.
    pub act: Option<u8>,
    /// Access technology label.
    pub act_text: Option<String>,
}

impl OperatorSelection {
    /// Flat field view.
    pub fn fields(&self) -> FieldMap {
        Fields::new()
            .with("mode", self.mode)
            .with("mode_text", self.mode_text.as_str())
            .with_opt("format", self.format)
            .with_opt("operator", self.operator.as_deref())
            .with_opt("act", self.act)
            .with_opt("act_text", self.act_text.as_deref())
            .build()
    }
}

pub(crate) fn decode_operator(lines: &[&str]) -> Record {
    let Some(text) = first_payload(lines, "+COPS:") else {
        return Record::Raw;
    };
    let params = split_params(text);
    let Some(mode) = params
        .first()
        .and_then(|p| p.int::<u8>())
    else {
        return Record::Raw;
    };

    let format = params
        .get(1)
        .and_then(|p| p.int());
    let operator = params
        .get(2)
        .map(|p| p.text.clone());
    let act = params
        .get(3)
        .and_then(|p| p.int());

    Record::Operator(OperatorSelection {
        mode,
        mode_text: label(&COPS_MODE_LABELS, mode),
        format,
        operator,
        act,
        act_text: act.map(access_tech_label),
    })
}

/// One network offered by an operator scan (`+COPS=?`).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct NetworkEntry {
    /// Availability code.
    pub status: u8,
    /// Availability label.
    pub status_text: String,
    /// Long alphanumeric operator name.
    pub long_name: String,
    /// Short alphanumeric operator name.
    pub short_name: String,
    /// Numeric MCC/MNC.
    pub numeric: String,
    /// Access technology code.
    pub act: Option<u8>,
    /// Access technology label.
    pub act_text: Option<String>,
}

impl NetworkEntry {
    /// Flat field view.
    pub fn fields(&self) -> FieldMap {
        Fields::new()
            .with("status", self.status)
            .with("status_text", self.status_text.as_str())
            .with("long_name", self.long_name.as_str())
            .with("short_name", self.short_name.as_str())
            .with("numeric", self.numeric.as_str())
            .with_opt("act", self.act)
            .with_opt("act_text", self.act_text.as_deref())
            .build()
    }
}

pub(crate) fn decode_network_scan(lines: &[&str]) -> Record {
    let Some(text) = first_payload(lines, "+COPS:") else {
        return Record::Raw;
    };

    let networks = paren_groups(text)
        .into_iter()
        .filter_map(|group| {
            let params = split_params(group);
            // Trailing groups list supported modes/formats and carry no names.
            if params.len() < 4 || !params[1].quoted {
                return None;
            }
            let status = params[0].int::<u8>()?;
            let act = params
                .get(4)
                .and_then(|p| p.int());
            Some(NetworkEntry {
                status,
                status_text: label(&SCAN_STATUS_LABELS, status),
                long_name: params[1].text.clone(),
                short_name: params[2].text.clone(),
                numeric: params[3].text.clone(),
                act,
                act_text: act.map(access_tech_label),
            })
        })
        .collect();

    Record::NetworkScan(networks)
}

/// Which registration query produced a [`Registration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
pub enum RegistrationKind {
    /// Circuit-switched (`+CREG`).
    Creg,
    /// GPRS packet-switched (`+CGREG`).
    Cgreg,
    /// EPS/LTE (`+CEREG`).
    Cereg,
}

impl RegistrationKind {
    const ALL: [Self; 3] = [Self::Creg, Self::Cgreg, Self::Cereg];

    /// Response line prefix.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Creg => "+CREG:",
            Self::Cgreg => "+CGREG:",
            Self::Cereg => "+CEREG:",
        }
    }

    /// Upper-case command name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Creg => "CREG",
            Self::Cgreg => "CGREG",
            Self::Cereg => "CEREG",
        }
    }
}

/// Network registration state (`+CREG`, `+CGREG`, `+CEREG`).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Registration {
    /// Query family.
    pub kind: RegistrationKind,
    /// Unsolicited result code setting (first parameter).
    pub n: u8,
    /// Registration status code.
    pub stat: u8,
    /// Registration status label.
    pub stat_text: String,
    /// Location/tracking area code (hex).
    pub lac: Option<String>,
    /// Cell id (hex).
    pub ci: Option<String>,
    /// Access technology code.
    pub act: Option<u8>,
    /// Access technology label.
    pub act_text: Option<String>,
}

impl Registration {
    /// Whether the modem is registered on its home network or roaming.
    pub fn is_registered(&self) -> bool {
        matches!(self.stat, 1 | 5)
    }

    /// Flat field view.
    pub fn fields(&self) -> FieldMap {
        Fields::new()
            .with("type", self.kind.name())
            .with("status", self.stat)
            .with("status_text", self.stat_text.as_str())
            .with_opt("lac", self.lac.as_deref())
            .with_opt("ci", self.ci.as_deref())
            .with_opt("act", self.act)
            .with_opt("act_text", self.act_text.as_deref())
            .build()
    }
}

fn parse_registration(kind: RegistrationKind, text: &str) -> Option<Registration> {
    let params = split_params(text);
    let n = params
        .first()?
        .int::<u8>()?;

    let mut idx = 1;
    let stat = match params
        .get(1)
        .and_then(|p| p.int::<u8>())
    {
        Some(stat) => {
            idx = 2;
            stat
        },
        // Unsolicited single-parameter form carries the status first.
        None => n,
    };

    let (mut lac, mut ci) = (None, None);
    if let (Some(a), Some(b)) = (params.get(idx), params.get(idx + 1)) {
        if a.quoted && b.quoted {
            lac = Some(a.text.clone());
            ci = Some(b.text.clone());
            idx += 2;
        }
    }
    let act = params
        .get(idx)
        .and_then(|p| p.int::<u8>());

    Some(Registration {
        kind,
        n,
        stat,
        stat_text: label(&REG_STAT_LABELS, stat),
        lac,
        ci,
        act,
        act_text: act.map(registration_access_tech_label),
    })
}

pub(crate) fn decode_registration(lines: &[&str]) -> Record {
    // Later lines win, so a solicited reply overrides an earlier URC.
    lines
        .iter()
        .filter_map(|line| {
            RegistrationKind::ALL
                .iter()
                .find_map(|kind| {
                    payload(line, kind.prefix()).and_then(|text| parse_registration(*kind, text))
                })
        })
        .last()
        .map_or(Record::Raw, Record::Registration)
}

/// Signal quality (`+CSQ`).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SignalQuality {
    /// Raw RSSI index (0-31, 99 unknown).
    pub rssi: u32,
    /// Signal strength in dBm, when known.
    pub rssi_dbm: Option<i32>,
    /// Signal strength text ("-89 dBm", "≤ -113 dBm").
    pub rssi_text: String,
    /// Quality bucket ("Very Poor" .. "Excellent", "Unknown").
    pub quality: String,
    /// Raw bit error rate index.
    pub ber: Option<u8>,
    /// Bit error rate text.
    pub ber_text: Option<String>,
}

impl SignalQuality {
    /// Flat field view.
    pub fn fields(&self) -> FieldMap {
        Fields::new()
            .with("rssi", self.rssi)
            .with_opt("rssi_dbm", self.rssi_dbm)
            .with("rssi_text", self.rssi_text.as_str())
            .with("quality", self.quality.as_str())
            .with_opt("ber", self.ber)
            .with_opt("ber_text", self.ber_text.as_deref())
            .build()
    }
}

/// Convert a `+CSQ` RSSI index to dBm.
pub fn rssi_to_dbm(rssi: u32) -> Option<i32> {
    match rssi {
        0 => Some(-113),
        1 => Some(-111),
        2..=30 => i32::try_from(rssi)
            .ok()
            .map(|rssi| -109 + (rssi - 2) * 2),
        31 => Some(-51),
        _ => None,
    }
}

fn rssi_text(rssi: u32) -> String {
    match rssi {
        0 => "≤ -113 dBm".to_string(),
        31 => "≥ -51 dBm".to_string(),
        _ => rssi_to_dbm(rssi).map_or_else(|| "Unknown".to_string(), |dbm| format!("{dbm} dBm")),
    }
}

fn signal_bucket(rssi: u32) -> &'static str {
    match rssi {
        0 | 1 => "Very Poor",
        2..=9 => "Poor",
        10..=14 => "Fair",
        15..=19 => "Good",
        20..=31 => "Excellent",
        _ => "Unknown",
    }
}

/// Percentage range for a `+CSQ` bit error rate index (99 is unknown).
pub fn ber_bucket(ber: u8) -> Option<&'static str> {
    if ber == 99 {
        return None;
    }
    Some(BER_RANGES[usize::from(ber.min(7))])
}

pub(crate) fn decode_signal_quality(lines: &[&str]) -> Record {
    let Some(text) = first_payload(lines, "+CSQ:") else {
        return Record::Raw;
    };
    let params = split_params(text);
    let Some(rssi) = params
        .first()
        .and_then(|p| p.int::<u32>())
    else {
        return Record::Raw;
    };
    let ber = params
        .get(1)
        .and_then(|p| p.int::<u8>());

    Record::SignalQuality(SignalQuality {
        rssi,
        rssi_dbm: rssi_to_dbm(rssi),
        rssi_text: rssi_text(rssi),
        quality: signal_bucket(rssi).to_string(),
        ber,
        ber_text: ber.map(|ber| match ber_bucket(ber) {
            Some(range) => format!("{ber} ({range})"),
            None => "Unknown or not detectable".to_string(),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(line: &str) -> SignalQuality {
        match decode_signal_quality(&[line]) {
            Record::SignalQuality(s) => s,
            other => panic!("expected signal quality, got {other:?}"),
        }
    }

    fn registration(lines: &[&str]) -> Registration {
        match decode_registration(lines) {
            Record::Registration(r) => r,
            other => panic!("expected registration, got {other:?}"),
        }
    }

    #[test]
    fn test_rssi_dbm_formula_is_strictly_increasing() {
        let mut previous = None;
        for rssi in 2..=30u32 {
            let dbm = rssi_to_dbm(rssi).unwrap();
            assert_eq!(dbm, -109 + (i32::try_from(rssi).unwrap() - 2) * 2);
            if let Some(prev) = previous {
                assert!(dbm > prev);
            }
            previous = Some(dbm);
        }
    }

    #[test]
    fn test_rssi_boundaries() {
        let s = signal("+CSQ: 0,0");
        assert_eq!(s.rssi_text, "≤ -113 dBm");
        assert_eq!(s.quality, "Very Poor");

        let s = signal("+CSQ: 1,0");
        assert_eq!(s.rssi_text, "-111 dBm");
        assert_eq!(s.quality, "Very Poor");

        let s = signal("+CSQ: 31,0");
        assert_eq!(s.rssi_text, "≥ -51 dBm");
        assert_eq!(s.quality, "Excellent");

        let s = signal("+CSQ: 99,99");
        assert_eq!(s.rssi_dbm, None);
        assert_eq!(s.quality, "Unknown");
    }

    #[test]
    fn test_rssi_out_of_table_is_unknown() {
        for line in ["+CSQ: 32,0", "+CSQ: 256,0", "+CSQ: 4000000000,99"] {
            let s = signal(line);
            assert_eq!(s.rssi_dbm, None, "{line}");
            assert_eq!(s.rssi_text, "Unknown", "{line}");
            assert_eq!(s.quality, "Unknown", "{line}");
        }
        assert_eq!(signal("+CSQ: 256,0").rssi, 256);
    }

    #[test]
    fn test_rssi_quality_buckets() {
        assert_eq!(signal("+CSQ: 9,0").quality, "Poor");
        assert_eq!(signal("+CSQ: 10,0").quality, "Fair");
        assert_eq!(signal("+CSQ: 15,0").quality, "Good");
        assert_eq!(signal("+CSQ: 20,0").quality, "Excellent");
        assert_eq!(signal("+CSQ: 20,0").rssi_text, "-73 dBm");
    }

    #[test]
    fn test_ber_table() {
        assert_eq!(
            signal("+CSQ: 20,99").ber_text.as_deref(),
            Some("Unknown or not detectable")
        );
        assert_eq!(ber_bucket(7), Some(">12.8%"));
        assert_eq!(ber_bucket(12), ber_bucket(7));
        assert_eq!(signal("+CSQ: 20,0").ber_text.as_deref(), Some("0 (<0.2%)"));
    }

    #[test]
    fn test_csq_without_ber_keeps_rssi() {
        let s = signal("+CSQ: 18");
        assert_eq!(s.rssi, 18);
        assert_eq!(s.ber, None);
        assert_eq!(s.ber_text, None);
    }

    #[test]
    fn test_registration_single_parameter() {
        let r = registration(&["+CREG: 2"]);
        assert_eq!(r.kind, RegistrationKind::Creg);
        assert_eq!(r.stat, 2);
        assert_eq!(r.stat_text, "Not registered, searching");
        assert_eq!(r.lac, None);
    }

    #[test]
    fn test_registration_with_location() {
        let r = registration(&[r#"+CREG: 2,5,"1A2B","3C4D""#]);
        assert_eq!(r.n, 2);
        assert_eq!(r.stat, 5);
        assert_eq!(r.stat_text, "Registered, roaming");
        assert_eq!(r.lac.as_deref(), Some("1A2B"));
        assert_eq!(r.ci.as_deref(), Some("3C4D"));
        assert!(r.is_registered());
    }

    #[test]
    fn test_registration_with_access_tech() {
        let r = registration(&[r#"+CEREG: 2,1,"2B0F","01A2D001",7"#]);
        assert_eq!(r.kind, RegistrationKind::Cereg);
        assert_eq!(r.act, Some(7));
        assert_eq!(r.act_text.as_deref(), Some("E-UTRAN"));
    }

    #[test]
    fn test_registration_access_tech_stops_at_nb_s1() {
        let r = registration(&[r#"+CEREG: 2,1,"2B0F","01A2D001",9"#]);
        assert_eq!(r.act_text.as_deref(), Some("E-UTRAN (NB-S1 mode)"));
        let r = registration(&[r#"+CEREG: 2,1,"2B0F","01A2D001",10"#]);
        assert_eq!(r.act_text.as_deref(), Some("Unknown (10)"));
        let r = registration(&[r#"+CGREG: 2,1,"2B0F","01A2D001",11"#]);
        assert_eq!(r.act_text.as_deref(), Some("Unknown (11)"));
        // Operator replies keep the wider table.
        assert_eq!(access_tech_label(11), "NR connected to 5GCN");
    }

    #[test]
    fn test_registration_unknown_status() {
        let r = registration(&["+CGREG: 0,9"]);
        assert_eq!(r.kind, RegistrationKind::Cgreg);
        assert_eq!(r.stat_text, "Unknown (9)");
    }

    #[test]
    fn test_registration_malformed_degrades_to_raw() {
        assert_eq!(decode_registration(&["+CREG: x"]), Record::Raw);
    }

    #[test]
    fn test_operator_full() {
        let Record::Operator(op) = decode_operator(&[r#"+COPS: 0,0,"T-Mobile",7"#]) else {
            panic!("expected operator");
        };
        assert_eq!(op.mode_text, "Automatic");
        assert_eq!(op.operator.as_deref(), Some("T-Mobile"));
        assert_eq!(op.act_text.as_deref(), Some("E-UTRAN"));
    }

    #[test]
    fn test_operator_mode_only() {
        let Record::Operator(op) = decode_operator(&["+COPS: 2"]) else {
            panic!("expected operator");
        };
        assert_eq!(op.mode_text, "Deregister");
        assert_eq!(op.operator, None);
        assert_eq!(op.act, None);
    }

    #[test]
    fn test_operator_unknown_codes() {
        let Record::Operator(op) = decode_operator(&[r#"+COPS: 7,0,"X",42"#]) else {
            panic!("expected operator");
        };
        assert_eq!(op.mode_text, "Unknown (7)");
        assert_eq!(op.act_text.as_deref(), Some("Unknown (42)"));
    }

    #[test]
    fn test_network_scan() {
        let line = r#"+COPS: (2,"T-Mobile","TMO","310260",7),(3,"AT&T","AT&T","310410",7),,(0,1,2,3,4),(0,1,2)"#;
        let Record::NetworkScan(networks) = decode_network_scan(&[line]) else {
            panic!("expected scan");
        };
        assert_eq!(networks.len(), 2);
        assert_eq!(networks[0].status_text, "Current");
        assert_eq!(networks[0].numeric, "310260");
        assert_eq!(networks[1].status_text, "Forbidden");
        assert_eq!(networks[1].act_text.as_deref(), Some("E-UTRAN"));
    }
}
