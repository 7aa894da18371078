//! Packet data grammars: PDP contexts, activation, addresses, attach state.

use super::{
    FieldMap, Fields, Record,
    tokens::{first_payload, payload, split_params},
};

/// One configured PDP context (`+CGDCONT?`).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PdpContext {
    /// Context id.
    pub cid: u8,
    /// PDP type ("IP", "IPV6", "IPV4V6").
    pub pdp_type: String,
    /// Access point name.
    pub apn: String,
    /// Assigned address; empty when the modem reported none.
    pub address: String,
}

impl PdpContext {
    /// Flat field view.
    pub fn fields(&self) -> FieldMap {
        Fields::new()
            .with("cid", self.cid)
            .with("pdp_type", self.pdp_type.as_str())
            .with("apn", self.apn.as_str())
            .with("pdp_addr", self.address.as_str())
            .build()
    }
}

pub(crate) fn decode_contexts(lines: &[&str]) -> Record {
    let contexts = lines
        .iter()
        .filter_map(|line| payload(line, "+CGDCONT:"))
        .filter_map(|text| {
            let params = split_params(text);
            if params.len() < 3 {
                return None;
            }
            Some(PdpContext {
                cid: params[0].int()?,
                pdp_type: params[1].text.clone(),
                apn: params[2].text.clone(),
                address: params
                    .get(3)
                    .map(|p| p.text.clone())
                    .unwrap_or_default(),
            })
        })
        .collect();
    Record::PdpContexts(contexts)
}

/// Activation state of one context (`+CGACT?`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ContextState {
    /// Context id.
    pub cid: u8,
    /// Whether the context is active.
    pub active: bool,
}

pub(crate) fn decode_activation(lines: &[&str]) -> Record {
    let states = lines
        .iter()
        .filter_map(|line| payload(line, "+CGACT:"))
        .filter_map(|text| {
            let params = split_params(text);
            Some(ContextState {
                cid: params.first()?.int()?,
                active: params.get(1)?.int::<u8>()? == 1,
            })
        })
        .collect();
    Record::ContextStates(states)
}

/// Address assigned to one context (`+CGPADDR`).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PdpAddress {
    /// Context id.
    pub cid: u8,
    /// Address text; empty when none is assigned.
    pub address: String,
}

pub(crate) fn decode_addresses(lines: &[&str]) -> Record {
    let addresses = lines
        .iter()
        .filter_map(|line| payload(line, "+CGPADDR:"))
        .filter_map(|text| {
            let params = split_params(text);
            Some(PdpAddress {
                cid: params.first()?.int()?,
                address: params
                    .get(1)
                    .map(|p| p.text.clone())
                    .unwrap_or_default(),
            })
        })
        .collect();
    Record::PdpAddresses(addresses)
}

pub(crate) fn decode_attach(lines: &[&str]) -> Record {
    first_payload(lines, "+CGATT:")
        .and_then(|text| text.parse::<u8>().ok())
        .map_or(Record::Raw, |state| Record::PacketAttach(state == 1))
}
