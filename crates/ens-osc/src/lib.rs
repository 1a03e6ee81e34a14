//! ens-osc: Datagram wire protocol for Ensemble
//!
//! `(target, control, value)` commands arrive on UDP either as binary OSC
//! or as a plain text line. Both decode to the same
//! [`ens_core::NumericCommand`].

mod decode;
mod listener;

pub use decode::{CONDUCTOR_ADDRESS, WireError, decode, decode_binary, parse_text};
pub use listener::{OscListener, spawn};
