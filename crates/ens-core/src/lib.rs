//! ens-core: Shared types and pure algorithms for Ensemble
//!
//! Everything in this crate is synchronous and free of I/O so that the
//! session layer can call it from its single event loop:
//!
//! - Control registry (scene-scoped control table with dual addressing)
//! - Phase engine (phase-preserving anchor recomputation)
//! - Clock sync (server pong + reference client estimator)
//! - Server clock abstraction

mod clock_sync;
mod controls;
mod error;
mod phase;
mod time;
mod types;

pub use clock_sync::*;
pub use controls::*;
pub use error::*;
pub use phase::*;
pub use time::*;
pub use types::*;
