//! ens-server: Process wiring for Ensemble
//!
//! Loads [`ServerConfig`], starts the session hub, the datagram listener
//! and the HTTP/WebSocket surface.

pub mod config;
pub mod files;
pub mod server;

pub use config::ServerConfig;
pub use files::FileStore;
pub use server::{AppState, app, run};
