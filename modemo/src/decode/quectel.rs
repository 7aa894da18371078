//! Quectel engineering-mode and network-info grammars.
//!
//! These replies are positional: fields are located by offset after a plain
//! comma split, with quotes stripped per field.

use super::{
    FieldMap, Fields, Record,
    tokens::{Param, payload, split_params},
};

/// Minimum field count for an LTE serving-cell line (through RSRQ).
const LTE_SERVING_FIELDS: usize = 15;

/// Serving cell report (`+QENG="servingcell"`).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ServingCell {
    /// Report type (field 0), normally "servingcell".
    pub cell_type: String,
    /// UE state ("NOCONN", "CONNECT", "SEARCH", ...).
    pub state: Option<String>,
    /// Radio access mode ("LTE", "WCDMA", ...).
    pub mode: Option<String>,
    /// LTE positional detail, when the line is long enough.
    pub lte: Option<LteCell>,
}

/// LTE serving cell detail.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LteCell {
    /// Mobile country code.
    pub mcc: String,
    /// Mobile network code.
    pub mnc: String,
    /// Cell id (hex).
    pub cell_id: String,
    /// Physical cell id.
    pub pci: Option<u32>,
    /// E-UTRA absolute radio frequency channel number.
    pub earfcn: Option<u32>,
    /// Frequency band indicator.
    pub band: Option<u32>,
    /// Uplink bandwidth code.
    pub ul_bandwidth: Option<u32>,
    /// Downlink bandwidth code.
    pub dl_bandwidth: Option<u32>,
    /// Tracking area code (hex).
    pub tac: String,
    /// Reference signal received power, dBm.
    pub rsrp: Option<i32>,
    /// Reference signal received quality, dB.
    pub rsrq: Option<i32>,
    /// Received signal strength, dBm.
    pub rssi: Option<i32>,
    /// Signal to interference plus noise ratio, dB.
    pub sinr: Option<i32>,
}

impl ServingCell {
    /// Flat field view.
    pub fn fields(&self) -> FieldMap {
        let mut fields = Fields::new()
            .with("servingcell_type", self.cell_type.as_str())
            .with_opt("state", self.state.as_deref())
            .with_opt("mode", self.mode.as_deref());
        if let Some(lte) = &self.lte {
            fields = fields
                .with("mcc", lte.mcc.as_str())
                .with("mnc", lte.mnc.as_str())
                .with("cellid", lte.cell_id.as_str())
                .with_opt("pcid", lte.pci)
                .with_opt("earfcn", lte.earfcn)
                .with_opt("freq_band", lte.band)
                .with_opt("ul_bw", lte.ul_bandwidth)
                .with_opt("dl_bw", lte.dl_bandwidth)
                .with("tac", lte.tac.as_str())
                .with_opt("rsrp", lte.rsrp.map(|v| format!("{v} dBm")))
                .with_opt("rsrq", lte.rsrq.map(|v| format!("{v} dB")))
                .with_opt("rssi", lte.rssi.map(|v| format!("{v} dBm")))
                .with_opt("sinr", lte.sinr.map(|v| format!("{v} dB")));
        }
        fields.build()
    }
}

fn text_at(params: &[Param], idx: usize) -> Option<String> {
    params
        .get(idx)
        .map(|p| p.text.clone())
}

fn number_at<T: std::str::FromStr>(params: &[Param], idx: usize) -> Option<T> {
    params
        .get(idx)
        .and_then(Param::number)
}

fn parse_serving_cell(text: &str) -> ServingCell {
    let params = split_params(text);
    let cell_type = text_at(&params, 0).unwrap_or_default();

    let lte = (cell_type == "servingcell" && params.len() >= LTE_SERVING_FIELDS).then(|| LteCell {
        mcc: params[4].text.clone(),
        mnc: params[5].text.clone(),
        cell_id: params[6].text.clone(),
        pci: number_at(&params, 7),
        earfcn: number_at(&params, 8),
        band: number_at(&params, 9),
        ul_bandwidth: number_at(&params, 10),
        dl_bandwidth: number_at(&params, 11),
        tac: params[12].text.clone(),
        rsrp: number_at(&params, 13),
        rsrq: number_at(&params, 14),
        rssi: number_at(&params, 15),
        sinr: number_at(&params, 16),
    });

    let serving = cell_type == "servingcell";
    ServingCell {
        state: serving
            .then(|| text_at(&params, 1))
            .flatten(),
        mode: serving
            .then(|| text_at(&params, 2))
            .flatten(),
        cell_type,
        lte,
    }
}

pub(crate) fn decode_serving_cell(lines: &[&str]) -> Record {
    let cells: Vec<ServingCell> = lines
        .iter()
        .filter_map(|line| payload(line, "+QENG:"))
        .map(parse_serving_cell)
        .collect();
    // Prefer the serving cell over neighbour lines from the same reply.
    let chosen = cells
        .iter()
        .position(|c| c.cell_type == "servingcell")
        .or_else(|| (!cells.is_empty()).then_some(0));
    match chosen {
        Some(idx) => Record::ServingCell(cells[idx].clone()),
        None => Record::Raw,
    }
}

/// Network information (`+QNWINFO`).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct NetworkInfo {
    /// Access technology ("FDD LTE", "No Service", ...).
    pub access_tech: Option<String>,
    /// Numeric operator.
    pub operator: Option<String>,
    /// Band name.
    pub band: Option<String>,
    /// Channel number.
    pub channel: Option<u32>,
}

impl NetworkInfo {
    /// Flat field view.
    pub fn fields(&self) -> FieldMap {
        Fields::new()
            .with_opt("access_tech", self.access_tech.as_deref())
            .with_opt("operator", self.operator.as_deref())
            .with_opt("band", self.band.as_deref())
            .with_opt("channel", self.channel)
            .build()
    }
}

pub(crate) fn decode_network_info(lines: &[&str]) -> Record {
    let Some(text) = lines
        .iter()
        .find_map(|line| payload(line, "+QNWINFO:"))
    else {
        return Record::Raw;
    };
    let params = split_params(text);
    Record::NetworkInfo(NetworkInfo {
        access_tech: text_at(&params, 0),
        operator: text_at(&params, 1),
        band: text_at(&params, 2),
        channel: number_at(&params, 3),
    })
}

/// Service provider names (`+QSPN`).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ServiceProvider {
    /// Full network name.
    pub full_name: Option<String>,
    /// Short network name.
    pub short_name: Option<String>,
    /// Service provider name from the SIM.
    pub spn: Option<String>,
    /// Alphabet of the names (0 GSM 7-bit, 1 UCS2).
    pub alphabet: Option<u8>,
    /// Registered PLMN.
    pub registered_plmn: Option<String>,
}

impl ServiceProvider {
    /// Flat field view.
    pub fn fields(&self) -> FieldMap {
        Fields::new()
            .with_opt("fnn", self.full_name.as_deref())
            .with_opt("snn", self.short_name.as_deref())
            .with_opt("spn", self.spn.as_deref())
            .with_opt("alphabet", self.alphabet)
            .with_opt("rplmn", self.registered_plmn.as_deref())
            .build()
    }
}

pub(crate) fn decode_service_provider(lines: &[&str]) -> Record {
    let Some(text) = lines
        .iter()
        .find_map(|line| payload(line, "+QSPN:"))
    else {
        return Record::Raw;
    };
    let params = split_params(text);
    Record::ServiceProvider(ServiceProvider {
        full_name: text_at(&params, 0),
        short_name: text_at(&params, 1),
        spn: text_at(&params, 2),
        alphabet: params
            .get(3)
            .and_then(Param::int),
        registered_plmn: text_at(&params, 4),
    })
}
