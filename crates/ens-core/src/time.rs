//! Server clock

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::Millis;

/// Source of authoritative server time
///
/// Every timestamp the server hands out (phase anchors, play start
/// instants, sync pongs) is read from one injected clock.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Millis;
}

/// Wall clock, milliseconds since the Unix epoch
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Millis {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as f64
    }
}

/// Manually driven clock; clones share the same instant
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Millis>>,
}

impl ManualClock {
    pub fn new(start: Millis) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, now: Millis) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, delta: Millis) {
        *self.now.lock() += delta;
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Millis {
        *self.now.lock()
    }
}
