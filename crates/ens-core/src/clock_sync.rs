//! Clock synchronization
//!
//! Stateless on the server: a client sends its local send time, the server
//! echoes it together with its own clock. The client derives its offset from
//! the round trip and may repeat the exchange to refine the estimate.

use serde::{Deserialize, Serialize};

use crate::Millis;

/// Client → server probe
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPing {
    pub client_time: Millis,
}

/// Server → client answer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPong {
    pub client_time: Millis,
    pub server_time: Millis,
}

/// Answer a probe. Idempotent, no state.
pub fn pong(ping: SyncPing, now: Millis) -> SyncPong {
    SyncPong {
        client_time: ping.client_time,
        server_time: now,
    }
}

/// One completed ping/pong exchange as seen by the client
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSample {
    pub round_trip: Millis,
    /// `server_time - local_time`
    pub offset: Millis,
}

impl ClockSample {
    /// Assumes the server read its clock halfway through the round trip.
    pub fn from_exchange(pong: SyncPong, received_at: Millis) -> Self {
        let round_trip = (received_at - pong.client_time).max(0.0);
        let estimated_server_now = pong.server_time + round_trip / 2.0;
        Self {
            round_trip,
            offset: estimated_server_now - received_at,
        }
    }
}

/// Keeps the sample with the tightest round trip
///
/// Low-latency exchanges bound the offset error most tightly (error is at
/// most half the round trip), so repeated probing only ever improves it.
#[derive(Debug, Clone, Default)]
pub struct ClockEstimator {
    best: Option<ClockSample>,
    samples: usize,
}

impl ClockEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, sample: ClockSample) {
        self.samples += 1;
        match self.best {
            Some(best) if best.round_trip <= sample.round_trip => {}
            _ => self.best = Some(sample),
        }
    }

    pub fn offset(&self) -> Millis {
        self.best.map(|s| s.offset).unwrap_or(0.0)
    }

    /// Upper bound of the offset error
    pub fn uncertainty(&self) -> Option<Millis> {
        self.best.map(|s| s.round_trip / 2.0)
    }

    pub fn sample_count(&self) -> usize {
        self.samples
    }

    pub fn server_time(&self, local_now: Millis) -> Millis {
        local_now + self.offset()
    }
}
