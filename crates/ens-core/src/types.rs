//! Identifiers and wire-level value types shared across crates

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ControlRef;

/// Server time in milliseconds since the Unix epoch
pub type Millis = f64;

/// Identity of one client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Stable numeric player identifier, never reused within a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player {}", self.0)
    }
}

/// `(target, control, value)` triple shared by the datagram wire and the bridge
///
/// `target`: `0` = global, `-1` = every player, `n > 0` = player `n`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericCommand {
    pub target: i64,
    pub control: ControlRef,
    pub value: f64,
}

impl NumericCommand {
    pub fn new(target: i64, control: impl Into<ControlRef>, value: f64) -> Self {
        Self {
            target,
            control: control.into(),
            value,
        }
    }
}

impl fmt::Display for NumericCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target={} control={} value={}", self.target, self.control, self.value)
    }
}
