//! Phase Engine
//!
//! A player's score is a cycle of period `interval` whose phase zero is the
//! absolute server instant `anchor`. Receivers compute
//!
//! ```text
//! elapsed = now - anchor
//! cycle   = floor(elapsed / interval)
//! phase   = normalized_mod(elapsed, interval) / interval
//! ```
//!
//! When the period changes at instant `T`, the anchor is moved so that the
//! phase observed at `T` is the same under the old and the new period:
//!
//! ```text
//! fraction = normalized_mod(T - A, I_old) / I_old
//! A'       = T - fraction * I_new
//! ```

use crate::Millis;

/// `value mod modulus`, mapped into `[0, modulus)` for either sign of `value`
#[inline]
pub fn normalized_mod(value: f64, modulus: f64) -> f64 {
    let r = ((value % modulus) + modulus) % modulus;
    // (-tiny % m) + m can round up to exactly m
    if r >= modulus { 0.0 } else { r }
}

/// Phase in `[0, 1)` of a cycle anchored at `anchor` with period `interval`
#[inline]
pub fn phase_fraction(anchor: Millis, interval: f64, now: Millis) -> f64 {
    normalized_mod(now - anchor, interval) / interval
}

/// New anchor that keeps the phase continuous across a period change
///
/// A non-positive `old_interval` carries no phase information; the cycle
/// restarts at `now`.
pub fn recompute_anchor(anchor: Millis, old_interval: f64, new_interval: f64, now: Millis) -> Millis {
    if old_interval <= 0.0 || new_interval <= 0.0 {
        return now;
    }
    let fraction = phase_fraction(anchor, old_interval, now);
    now - fraction * new_interval
}

/// What a receiver renders at one instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseSample {
    pub cycle: i64,
    pub phase: f64,
}

/// Receiver-side cycle/phase computation
pub fn sample(anchor: Millis, interval: f64, now: Millis) -> PhaseSample {
    let elapsed = now - anchor;
    PhaseSample {
        cycle: (elapsed / interval).floor() as i64,
        phase: normalized_mod(elapsed, interval) / interval,
    }
}
