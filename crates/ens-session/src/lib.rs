//! ens-session: Session engine for Ensemble
//!
//! Owns all live state of a performance behind a single event loop:
//!
//! - Wire DTOs for the WebSocket channel (`protocol`)
//! - Room-scoped fan-out (`broadcast`)
//! - Player/conductor registry with stable ids (`registry`)
//! - Multi-channel command pipeline (`router`)
//! - Synchronized MP3 playback across fixed slots (`mp3`)
//! - The [`Hub`] task tying them together (`hub`)

pub mod broadcast;
pub mod hub;
pub mod mp3;
pub mod protocol;
pub mod registry;
pub mod router;

pub use broadcast::{Broadcaster, Outbound, Room};
pub use hub::{Hub, HubError, HubEvent, HubHandle, HubStats};
pub use mp3::{Mp3Config, Mp3Error, Mp3Scheduler, Mp3Slot, PlayState, SlotFile};
pub use protocol::{ClientMessage, ServerMessage};
pub use registry::{PlayerState, SessionRegistry};
pub use router::{ApplyReport, Command, CommandRouter, Rejection, Target};
