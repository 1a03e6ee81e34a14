//! Datagram decoding
//!
//! Two encodings share the UDP port:
//!
//! - Binary OSC (`/conductor ,iii 2 1 60`), bundles included
//! - Raw text (`/conductor 2 1 60`), as sent by simple patchers
//!
//! A datagram whose address part (bytes before the first NUL) contains
//! whitespace is text; binary OSC addresses never do.

use rosc::{OscMessage, OscPacket, OscType};
use thiserror::Error;

use ens_core::{ControlRef, NumericCommand};

/// The only address carrying commands
pub const CONDUCTOR_ADDRESS: &str = "/conductor";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WireError {
    #[error("empty datagram")]
    Empty,

    #[error("malformed OSC packet: {0}")]
    Osc(String),

    #[error("text datagram is not UTF-8")]
    NotUtf8,

    #[error("unrecognized address '{0}'")]
    UnknownAddress(String),

    #[error("expected 3 arguments, got {0}")]
    ArgCount(usize),

    #[error("argument {index} is not usable: {found}")]
    BadArg { index: usize, found: String },
}

/// Decode one datagram into zero or more commands
///
/// A single message yields one command; a bundle yields one per valid
/// element (invalid elements are logged and skipped).
pub fn decode(datagram: &[u8]) -> Result<Vec<NumericCommand>, WireError> {
    if datagram.iter().all(|b| *b == 0 || b.is_ascii_whitespace()) {
        return Err(WireError::Empty);
    }
    if looks_like_text(datagram) {
        return parse_text(datagram).map(|cmd| vec![cmd]);
    }
    decode_binary(datagram)
}

fn looks_like_text(datagram: &[u8]) -> bool {
    datagram
        .split(|b| *b == 0)
        .next()
        .is_some_and(|head| head.iter().any(u8::is_ascii_whitespace))
}

// ═══════════════════════════════════════════════════════════════════════════════
// BINARY
// ═══════════════════════════════════════════════════════════════════════════════

pub fn decode_binary(datagram: &[u8]) -> Result<Vec<NumericCommand>, WireError> {
    let (_, packet) =
        rosc::decoder::decode_udp(datagram).map_err(|e| WireError::Osc(format!("{e:?}")))?;
    match packet {
        OscPacket::Message(msg) => from_message(&msg).map(|cmd| vec![cmd]),
        OscPacket::Bundle(_) => {
            let mut commands = Vec::new();
            flatten(packet, &mut commands);
            Ok(commands)
        }
    }
}

fn flatten(packet: OscPacket, commands: &mut Vec<NumericCommand>) {
    match packet {
        OscPacket::Message(msg) => match from_message(&msg) {
            Ok(cmd) => commands.push(cmd),
            Err(e) => log::warn!("[OSC] bundle element {} skipped: {e}", msg.addr),
        },
        OscPacket::Bundle(bundle) => {
            for inner in bundle.content {
                flatten(inner, commands);
            }
        }
    }
}

fn from_message(msg: &OscMessage) -> Result<NumericCommand, WireError> {
    if msg.addr != CONDUCTOR_ADDRESS {
        return Err(WireError::UnknownAddress(msg.addr.clone()));
    }
    let [target, control, value] = msg.args.as_slice() else {
        return Err(WireError::ArgCount(msg.args.len()));
    };

    let target = osc_number(target)
        .and_then(integral)
        .ok_or_else(|| bad_arg(0, target))?;
    let control = match control {
        OscType::String(name) => ControlRef::ByName(name.clone()),
        other => osc_number(other)
            .and_then(integral)
            .map(ControlRef::ById)
            .ok_or_else(|| bad_arg(1, other))?,
    };
    let value = osc_number(value).ok_or_else(|| bad_arg(2, value))?;

    Ok(NumericCommand {
        target,
        control,
        value,
    })
}

fn osc_number(arg: &OscType) -> Option<f64> {
    match arg {
        OscType::Int(v) => Some(*v as f64),
        OscType::Float(v) => Some(*v as f64),
        OscType::Double(v) => Some(*v),
        OscType::Long(v) => Some(*v as f64),
        _ => None,
    }
}

fn bad_arg(index: usize, arg: &OscType) -> WireError {
    WireError::BadArg {
        index,
        found: format!("{arg:?}"),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TEXT
// ═══════════════════════════════════════════════════════════════════════════════

/// Parse `"/address target control value"`
///
/// Tolerates `"/ address"`, a trailing `.` on numbers (`60.`), and
/// trailing NULs / whitespace. The control may be a name.
pub fn parse_text(datagram: &[u8]) -> Result<NumericCommand, WireError> {
    let text = std::str::from_utf8(datagram).map_err(|_| WireError::NotUtf8)?;
    let text = text.trim_end_matches(|c: char| c == '\0' || c.is_whitespace());

    let mut tokens = text.split_whitespace();
    let address = match tokens.next() {
        Some("/") => format!("/{}", tokens.next().unwrap_or_default()),
        Some(addr) => addr.to_string(),
        None => return Err(WireError::Empty),
    };
    if address != CONDUCTOR_ADDRESS {
        return Err(WireError::UnknownAddress(address));
    }

    let args: Vec<&str> = tokens.collect();
    let &[target, control, value] = args.as_slice() else {
        return Err(WireError::ArgCount(args.len()));
    };

    let text_arg = |index: usize, token: &str| WireError::BadArg {
        index,
        found: token.to_string(),
    };
    let target = text_number(target)
        .and_then(integral)
        .ok_or_else(|| text_arg(0, target))?;
    let control = match text_number(control) {
        Some(id) => ControlRef::ById(integral(id).ok_or_else(|| text_arg(1, control))?),
        None => ControlRef::ByName(control.to_string()),
    };
    let value = text_number(value).ok_or_else(|| text_arg(2, value))?;

    Ok(NumericCommand {
        target,
        control,
        value,
    })
}

fn text_number(token: &str) -> Option<f64> {
    let token = token.strip_suffix('.').unwrap_or(token);
    token.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn integral(value: f64) -> Option<i64> {
    (value.is_finite() && value.fract() == 0.0).then_some(value as i64)
}
