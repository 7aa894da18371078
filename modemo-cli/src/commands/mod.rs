//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod completions;
pub(crate) mod detect;
pub(crate) mod modem;
pub(crate) mod ports;
