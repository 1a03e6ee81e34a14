//! Message definitions for the WebSocket channel
//!
//! Both directions use the envelope `{"event": <name>, "data": <payload>}`.
//! Unit events (`joinConductor`, `mp3Stop`, ...) may omit `data`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use ens_core::{
    ConnectionId, ControlDefinition, Millis, NumericCommand, PlayerDefaults, PlayerId, SyncPing,
    SyncPong,
};

use crate::mp3::{Mp3Slot, PlayState};
use crate::registry::PlayerState;

// ═══════════════════════════════════════════════════════════════════════════════
// CLIENT → SERVER
// ═══════════════════════════════════════════════════════════════════════════════

/// Inbound events from any client role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    SyncPing(SyncPing),
    JoinPlayer(JoinRequest),
    JoinConductor,
    SetPlayerPitch(SetPitchRequest),
    SetPlayerInterval(SetIntervalRequest),
    SetScene(SetSceneRequest),
    /// Controller bridge; `maxCommand` is the bridge script's event name
    #[serde(alias = "maxCommand")]
    NumericCommand(NumericCommand),
    JoinMp3Player(JoinRequest),
    JoinMp3Conductor,
    Mp3Ready(Mp3ReadyReport),
    Mp3Play(Mp3PlayRequest),
    Mp3Stop,
}

impl ClientMessage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SyncPing(_) => "syncPing",
            Self::JoinPlayer(_) => "joinPlayer",
            Self::JoinConductor => "joinConductor",
            Self::SetPlayerPitch(_) => "setPlayerPitch",
            Self::SetPlayerInterval(_) => "setPlayerInterval",
            Self::SetScene(_) => "setScene",
            Self::NumericCommand(_) => "numericCommand",
            Self::JoinMp3Player(_) => "joinMp3Player",
            Self::JoinMp3Conductor => "joinMp3Conductor",
            Self::Mp3Ready(_) => "mp3Ready",
            Self::Mp3Play(_) => "mp3Play",
            Self::Mp3Stop => "mp3Stop",
        }
    }
}

/// Player join; a missing name is accepted here and ignored by the hub
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JoinRequest {
    #[serde(default)]
    pub name: Option<String>,
}

/// `playerId` is the target player's connection identity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPitchRequest {
    pub player_id: ConnectionId,
    pub pitch: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetIntervalRequest {
    pub player_id: ConnectionId,
    pub interval: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetSceneRequest {
    pub scene: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mp3ReadyReport {
    pub slot_index: usize,
    pub file_id: String,
    #[serde(default)]
    pub duration: Option<f64>,
    pub ready: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mp3PlayRequest {
    #[serde(default)]
    pub seek_seconds: f64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SERVER → CLIENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Outbound events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    SyncPong(SyncPong),
    PlayerState(InitialPlayerState),
    PlayerUpdate(PlayerUpdate),
    ConductorPresence(ConductorPresence),
    FullState(AppStateView),
    StateUpdate(AppStateView),
    Mp3JoinSuccess(Mp3JoinSuccess),
    Mp3JoinError(Mp3JoinError),
    Mp3Assignment(Mp3Assignment),
    Mp3Play(Mp3PlayInstruction),
    Mp3Stop(Mp3StopNotice),
    Mp3FullState(Mp3StateView),
    Mp3StateUpdate(Mp3StateView),
}

impl ServerMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Sent once to a player right after a successful join
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialPlayerState {
    pub player_id: PlayerId,
    pub pitch: i64,
    pub interval: i64,
    pub conductor_present: bool,
    pub scene: String,
    pub phase_anchor: Millis,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub controls: BTreeMap<String, i64>,
}

/// Authoritative per-player parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    pub pitch: i64,
    pub interval: i64,
    pub scene: String,
    pub phase_anchor: Millis,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub controls: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConductorPresence {
    pub present: bool,
}

/// Aggregate state shown to conductors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStateView {
    pub players: BTreeMap<ConnectionId, PlayerState>,
    pub conductor_count: usize,
    pub scene: String,
    pub defaults: PlayerDefaults,
    pub phase_anchor: Millis,
    pub controls: Vec<ControlDefinition>,
    pub scenes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mp3JoinSuccess {
    pub slot_index: usize,
    pub file_id: Option<String>,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mp3JoinError {
    pub error: String,
}

/// File bound to (or removed from) the recipient's slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mp3Assignment {
    pub slot_index: usize,
    pub file_id: Option<String>,
    pub file_name: Option<String>,
}

/// Scheduled start; clients must keep `play_token` to honor a later stop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mp3PlayInstruction {
    pub play_token: String,
    pub start_instant: Millis,
    pub seek_seconds: f64,
    pub slot_index: usize,
    pub file_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mp3StopNotice {
    pub play_token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mp3StateView {
    pub slots: Vec<Mp3Slot>,
    pub play_state: Option<PlayState>,
}
