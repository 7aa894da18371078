//! AT response decoding.
//!
//! A [`ResponseDecoder`] is a registry of command families. Each family is a
//! set of keywords matched as substrings of the (upper-cased) command text,
//! plus a decoder function that turns the reply lines into a typed
//! [`Record`]. Families are tried in registration order and the first match
//! wins, so more specific keywords (`+COPS=?`) are registered before their
//! general form (`+COPS`).
//!
//! Before a family decoder runs, the reply is split into trimmed, non-empty
//! lines with the command echo and bare `OK` / `ERROR` lines removed.
//! Decoders never fail: a reply that does not fit the grammar degrades to
//! fewer fields, or to [`Record::Raw`].
//!
//! ```rust
//! use modemo::decode::{Record, ResponseDecoder};
//!
//! let decoder = ResponseDecoder::new();
//! let record = decoder.decode("AT+CSQ", "AT+CSQ\r\r\n+CSQ: 20,99\r\n\r\nOK\r\n");
//! let Record::SignalQuality(signal) = record else { panic!() };
//! assert_eq!(signal.rssi_dbm, Some(-73));
//! ```

mod network;
mod packet;
mod quectel;
mod sim;
mod tokens;

use std::fmt;

pub use {
    network::{
        NetworkEntry, OperatorSelection, Registration, RegistrationKind, SignalQuality,
        access_tech_label, ber_bucket, registration_access_tech_label, rssi_to_dbm,
    },
    packet::{ContextState, PdpAddress, PdpContext},
    quectel::{LteCell, NetworkInfo, ServiceProvider, ServingCell},
    sim::{Identity, IdentityKind, Plmn, SimFile, SimStatus, decode_plmn_list},
};

/// Ordered `(name, value)` pairs describing one decoded record.
pub type FieldMap = Vec<(&'static str, FieldValue)>;

/// A single decoded value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Text value.
    Text(String),
    /// Integer value.
    Int(i64),
    /// Flag.
    Bool(bool),
    /// Repeated records (e.g. one per PDP context).
    List(Vec<FieldMap>),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => write!(f, "{text}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::List(items) => {
                let rendered: Vec<String> = items
                    .iter()
                    .map(|item| {
                        let inner: Vec<String> = item
                            .iter()
                            .map(|(name, value)| format!("{name}={value}"))
                            .collect();
                        format!("{{{}}}", inner.join(", "))
                    })
                    .collect();
                write!(f, "[{}]", rendered.join(", "))
            },
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

macro_rules! int_field_value {
    ($($ty:ty),*) => {
        $(impl From<$ty> for FieldValue {
            fn from(value: $ty) -> Self {
                Self::Int(i64::from(value))
            }
        })*
    };
}

int_field_value!(u8, u32, i32);

/// Builder for [`FieldMap`]s that skips absent optional values.
pub(crate) struct Fields(FieldMap);

impl Fields {
    pub(crate) fn new() -> Self {
        Self(Vec::new())
    }

    pub(crate) fn with(mut self, name: &'static str, value: impl Into<FieldValue>) -> Self {
        self.0
            .push((name, value.into()));
        self
    }

    pub(crate) fn with_opt<V: Into<FieldValue>>(self, name: &'static str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.with(name, value),
            None => self,
        }
    }

    pub(crate) fn build(self) -> FieldMap {
        self.0
    }
}

/// Typed result of decoding one response.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(
    feature = "serde",
    serde(tag = "kind", content = "data", rename_all = "snake_case")
)]
pub enum Record {
    /// Unrecognized family or unparsable reply; only the raw text is available.
    Raw,
    /// `+COPS?`
    Operator(OperatorSelection),
    /// `+COPS=?`
    NetworkScan(Vec<NetworkEntry>),
    /// `+CREG?`, `+CGREG?`, `+CEREG?`
    Registration(Registration),
    /// `+CSQ`
    SignalQuality(SignalQuality),
    /// `+CGDCONT?`, in reply order.
    PdpContexts(Vec<PdpContext>),
    /// `+CGACT?`
    ContextStates(Vec<ContextState>),
    /// `+CGPADDR`
    PdpAddresses(Vec<PdpAddress>),
    /// `+CGATT?`
    PacketAttach(bool),
    /// `+CPIN?`
    SimStatus(SimStatus),
    /// `+CRSM`
    SimFile(SimFile),
    /// Identification family.
    Identity(Identity),
    /// `ATI`
    Info(String),
    /// `+QENG="servingcell"`
    ServingCell(ServingCell),
    /// `+QNWINFO`
    NetworkInfo(NetworkInfo),
    /// `+QSPN`
    ServiceProvider(ServiceProvider),
}

impl Record {
    /// Whether no family grammar applied.
    pub fn is_raw(&self) -> bool {
        matches!(self, Self::Raw)
    }

    /// Flat field view of the record.
    pub fn fields(&self) -> FieldMap {
        fn list<T>(items: &[T], each: impl Fn(&T) -> FieldMap) -> FieldValue {
            FieldValue::List(
                items
                    .iter()
                    .map(each)
                    .collect(),
            )
        }

        match self {
            Self::Raw => Vec::new(),
            Self::Operator(op) => op.fields(),
            Self::NetworkScan(networks) => vec![("networks", list(networks, NetworkEntry::fields))],
            Self::Registration(reg) => reg.fields(),
            Self::SignalQuality(signal) => signal.fields(),
            Self::PdpContexts(contexts) => vec![("contexts", list(contexts, PdpContext::fields))],
            Self::ContextStates(states) => vec![(
                "contexts",
                list(states, |s| {
                    Fields::new()
                        .with("cid", s.cid)
                        .with("active", s.active)
                        .build()
                }),
            )],
            Self::PdpAddresses(addresses) => vec![(
                "addresses",
                list(addresses, |a| {
                    Fields::new()
                        .with("cid", a.cid)
                        .with("address", a.address.as_str())
                        .build()
                }),
            )],
            Self::PacketAttach(attached) => vec![("attached", FieldValue::Bool(*attached))],
            Self::SimStatus(sim) => sim.fields(),
            Self::SimFile(file) => file.fields(),
            Self::Identity(id) => id.fields(),
            Self::Info(text) => vec![("info", FieldValue::Text(text.clone()))],
            Self::ServingCell(cell) => cell.fields(),
            Self::NetworkInfo(info) => info.fields(),
            Self::ServiceProvider(spn) => spn.fields(),
        }
    }
}

/// Decoder function for one command family.
pub type DecodeFn = fn(&[&str]) -> Record;

struct Family {
    name: &'static str,
    keywords: &'static [&'static str],
    decode: DecodeFn,
}

/// Registry of command families.
pub struct ResponseDecoder {
    families: Vec<Family>,
}

impl Default for ResponseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseDecoder {
    /// Decoder with every built-in family registered.
    pub fn new() -> Self {
        let mut decoder = Self::empty();
        decoder
            .register("network_scan", &["+COPS=?"], network::decode_network_scan)
            .register("operator", &["+COPS"], network::decode_operator)
            .register(
                "registration",
                &["+CREG", "+CGREG", "+CEREG"],
                network::decode_registration,
            )
            .register("signal_quality", &["+CSQ"], network::decode_signal_quality)
            .register("pdp_contexts", &["+CGDCONT"], packet::decode_contexts)
            .register("context_states", &["+CGACT"], packet::decode_activation)
            .register("pdp_addresses", &["+CGPADDR"], packet::decode_addresses)
            .register("packet_attach", &["+CGATT"], packet::decode_attach)
            .register("sim_status", &["+CPIN"], sim::decode_sim_status)
            .register("sim_file", &["+CRSM"], sim::decode_sim_file)
            .register("imsi", &["+CIMI"], sim::decode_imsi)
            .register("iccid", &["+CCID", "+ICCID", "+QCCID"], sim::decode_iccid)
            .register("manufacturer", &["+CGMI", "+GMI"], sim::decode_manufacturer)
            .register("model", &["+CGMM", "+GMM"], sim::decode_model)
            .register("firmware", &["+CGMR", "+GMR"], sim::decode_firmware)
            .register("imei", &["+CGSN", "+GSN"], sim::decode_imei)
            .register("info", &["ATI"], sim::decode_info)
            .register("serving_cell", &["+QENG"], quectel::decode_serving_cell)
            .register("network_info", &["+QNWINFO"], quectel::decode_network_info)
            .register(
                "service_provider",
                &["+QSPN"],
                quectel::decode_service_provider,
            );
        decoder
    }

    /// Decoder with no families; every reply decodes to [`Record::Raw`].
    pub fn empty() -> Self {
        Self {
            families: Vec::new(),
        }
    }

    /// Add a family. Families registered earlier take precedence.
    pub fn register(
        &mut self,
        name: &'static str,
        keywords: &'static [&'static str],
        decode: DecodeFn,
    ) -> &mut Self {
        self.families
            .push(Family {
                name,
                keywords,
                decode,
            });
        self
    }

    fn family_for(&self, command: &str) -> Option<&Family> {
        let command = command
            .trim()
            .to_ascii_uppercase();
        self.families
            .iter()
            .find(|family| {
                family
                    .keywords
                    .iter()
                    .any(|keyword| command.contains(keyword))
            })
    }

    /// Name of the family that would decode `command`.
    pub fn family(&self, command: &str) -> Option<&'static str> {
        self.family_for(command)
            .map(|family| family.name)
    }

    /// Decode a raw reply to `command`.
    pub fn decode(&self, command: &str, raw: &str) -> Record {
        let Some(family) = self.family_for(command) else {
            return Record::Raw;
        };
        let lines = response_lines(command, raw);
        (family.decode)(&lines)
    }
}

/// Trimmed reply lines without the command echo and bare result codes.
pub fn response_lines<'a>(command: &str, raw: &'a str) -> Vec<&'a str> {
    let echo = command.trim();
    raw.split(['\r', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty() && *line != echo && *line != "OK" && *line != "ERROR")
        .collect()
}
