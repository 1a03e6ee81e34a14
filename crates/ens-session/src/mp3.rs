//! MP3 Sync Scheduler
//!
//! Fixed array of listening slots. Each slot pairs at most one client with
//! at most one uploaded file; the two lifecycles are independent. Playback
//! is a single scheduled start (`now + play lead`) fenced by a play token.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

use ens_core::{ConnectionId, Millis};

use crate::broadcast::{Broadcaster, Room};
use crate::protocol::{
    Mp3Assignment, Mp3JoinError, Mp3JoinSuccess, Mp3PlayInstruction, Mp3ReadyReport,
    Mp3StateView, Mp3StopNotice, ServerMessage,
};
use crate::registry::MAX_NAME_CHARS;

// ═══════════════════════════════════════════════════════════════════════════════
// TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mp3Config {
    pub slots: usize,
    /// Delay between a play request and the scheduled start
    pub play_lead_ms: Millis,
    /// Delay applied to catch-up starts for late joiners
    pub late_join_lead_ms: Millis,
}

impl Default for Mp3Config {
    fn default() -> Self {
        Self {
            slots: 8,
            play_lead_ms: 2_000.0,
            late_join_lead_ms: 500.0,
        }
    }
}

/// Uploaded file bound to a slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotFile {
    pub file_id: String,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mp3Slot {
    pub slot_index: usize,
    pub connection_id: Option<ConnectionId>,
    pub player_name: Option<String>,
    pub file_id: Option<String>,
    pub file_name: Option<String>,
    pub ready: bool,
    /// Seconds, as reported by the bound client
    pub duration: Option<f64>,
}

impl Mp3Slot {
    fn empty(slot_index: usize) -> Self {
        Self {
            slot_index,
            connection_id: None,
            player_name: None,
            file_id: None,
            file_name: None,
            ready: false,
            duration: None,
        }
    }

    fn assignment(&self) -> Mp3Assignment {
        Mp3Assignment {
            slot_index: self.slot_index,
            file_id: self.file_id.clone(),
            file_name: self.file_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayState {
    pub play_token: String,
    pub start_instant: Millis,
    pub seek_seconds: f64,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Mp3Error {
    #[error("all {0} slots are taken")]
    Full(usize),

    #[error("slot {index} does not exist (capacity {capacity})")]
    NoSuchSlot { index: usize, capacity: usize },

    #[error("invalid seek position {0}")]
    InvalidSeek(f64),

    #[error("missing or empty name")]
    InvalidName,

    #[error("{conn} is not bound to slot {slot_index}")]
    NotBound { conn: ConnectionId, slot_index: usize },

    #[error("file '{file_id}' is not assigned to slot {slot_index}")]
    StaleFile { file_id: String, slot_index: usize },
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCHEDULER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct Mp3Scheduler {
    config: Mp3Config,
    slots: Vec<Mp3Slot>,
    bindings: HashMap<ConnectionId, usize>,
    conductors: BTreeSet<ConnectionId>,
    play_state: Option<PlayState>,
}

impl Default for Mp3Scheduler {
    fn default() -> Self {
        Self::new(Mp3Config::default())
    }
}

impl Mp3Scheduler {
    pub fn new(config: Mp3Config) -> Self {
        Self {
            slots: (0..config.slots).map(Mp3Slot::empty).collect(),
            config,
            bindings: HashMap::new(),
            conductors: BTreeSet::new(),
            play_state: None,
        }
    }

    pub fn config(&self) -> &Mp3Config {
        &self.config
    }

    pub fn slots(&self) -> &[Mp3Slot] {
        &self.slots
    }

    pub fn play_state(&self) -> Option<&PlayState> {
        self.play_state.as_ref()
    }

    pub fn slot_of(&self, conn: ConnectionId) -> Option<usize> {
        self.bindings.get(&conn).copied()
    }

    pub fn bound_count(&self) -> usize {
        self.bindings.len()
    }

    pub fn snapshot(&self) -> Mp3StateView {
        Mp3StateView {
            slots: self.slots.clone(),
            play_state: self.play_state.clone(),
        }
    }

    fn slot_mut(&mut self, index: usize) -> Result<&mut Mp3Slot, Mp3Error> {
        let capacity = self.slots.len();
        self.slots
            .get_mut(index)
            .ok_or(Mp3Error::NoSuchSlot { index, capacity })
    }

    fn broadcast_state(&self, out: &Broadcaster) -> usize {
        out.to_room(Room::Mp3Conductors, &ServerMessage::Mp3StateUpdate(self.snapshot()))
    }

    // ─── Roles ──────────────────────────────────────────────────────────────

    /// Bind `conn` to the lowest free slot
    ///
    /// A connection that already holds a slot is re-told its slot. When
    /// every slot is taken the client gets `mp3JoinError` and nothing
    /// changes.
    pub fn join_player(
        &mut self,
        out: &mut Broadcaster,
        conn: ConnectionId,
        name: Option<&str>,
        now: Millis,
    ) -> Result<usize, Mp3Error> {
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or(Mp3Error::InvalidName)?;

        if let Some(index) = self.slot_of(conn) {
            self.send_join_success(out, conn, index, now);
            return Ok(index);
        }

        let Some(index) = self.slots.iter().position(|s| s.connection_id.is_none()) else {
            let err = Mp3Error::Full(self.slots.len());
            out.unicast(
                conn,
                ServerMessage::Mp3JoinError(Mp3JoinError {
                    error: err.to_string(),
                }),
            );
            log::info!("[Mp3] {conn} turned away: {err}");
            return Err(err);
        };

        let slot = &mut self.slots[index];
        slot.connection_id = Some(conn);
        slot.player_name = Some(name.chars().take(MAX_NAME_CHARS).collect());
        slot.ready = false;
        self.bindings.insert(conn, index);
        out.join(conn, Room::Mp3Players);
        log::info!("[Mp3] '{name}' ({conn}) bound to slot {index}");

        self.send_join_success(out, conn, index, now);
        self.broadcast_state(out);
        Ok(index)
    }

    fn send_join_success(&self, out: &Broadcaster, conn: ConnectionId, index: usize, now: Millis) {
        let slot = &self.slots[index];
        out.unicast(
            conn,
            ServerMessage::Mp3JoinSuccess(Mp3JoinSuccess {
                slot_index: index,
                file_id: slot.file_id.clone(),
                file_name: slot.file_name.clone(),
            }),
        );
        if let Some(instruction) = self.catch_up(index, now) {
            log::debug!(
                "[Mp3] late join on slot {index}: seek {:.3}s",
                instruction.seek_seconds
            );
            out.unicast(conn, ServerMessage::Mp3Play(instruction));
        }
    }

    pub fn join_conductor(&mut self, out: &mut Broadcaster, conn: ConnectionId) {
        self.conductors.insert(conn);
        out.join(conn, Room::Mp3Conductors);
        out.unicast(conn, ServerMessage::Mp3FullState(self.snapshot()));
    }

    pub fn is_conductor(&self, conn: ConnectionId) -> bool {
        self.conductors.contains(&conn)
    }

    /// Drop every MP3 role `conn` held; the slot keeps its file
    pub fn disconnect(&mut self, out: &mut Broadcaster, conn: ConnectionId) -> bool {
        let was_conductor = self.conductors.remove(&conn);
        out.leave(conn, Room::Mp3Conductors);

        let Some(index) = self.bindings.remove(&conn) else {
            return was_conductor;
        };
        out.leave(conn, Room::Mp3Players);
        let slot = &mut self.slots[index];
        slot.connection_id = None;
        slot.player_name = None;
        slot.ready = false;
        log::info!("[Mp3] {conn} released slot {index}");

        self.broadcast_state(out);
        true
    }

    // ─── Files ──────────────────────────────────────────────────────────────

    /// Put `file` in a slot; returns the superseded file, if any
    pub fn assign_file(
        &mut self,
        out: &Broadcaster,
        slot_index: usize,
        file: SlotFile,
    ) -> Result<Option<SlotFile>, Mp3Error> {
        let slot = self.slot_mut(slot_index)?;
        let previous = take_file(slot);
        slot.file_id = Some(file.file_id);
        slot.file_name = Some(file.file_name);
        log::info!(
            "[Mp3] slot {slot_index} ← '{}'",
            slot.file_name.as_deref().unwrap_or_default()
        );

        self.notify_assignment(out, slot_index);
        self.broadcast_state(out);
        Ok(previous)
    }

    pub fn remove_file(
        &mut self,
        out: &Broadcaster,
        slot_index: usize,
    ) -> Result<Option<SlotFile>, Mp3Error> {
        let previous = take_file(self.slot_mut(slot_index)?);
        if previous.is_some() {
            log::info!("[Mp3] slot {slot_index} cleared");
            self.notify_assignment(out, slot_index);
            self.broadcast_state(out);
        }
        Ok(previous)
    }

    fn notify_assignment(&self, out: &Broadcaster, slot_index: usize) {
        let slot = &self.slots[slot_index];
        if let Some(conn) = slot.connection_id {
            out.unicast(conn, ServerMessage::Mp3Assignment(slot.assignment()));
        }
    }

    /// Record a client's load status for its own slot's current file
    ///
    /// A client that becomes ready while playback is running gets a
    /// catch-up start, since a play that arrived before its file loaded
    /// was dropped on the client.
    pub fn report_ready(
        &mut self,
        out: &Broadcaster,
        conn: ConnectionId,
        report: &Mp3ReadyReport,
        now: Millis,
    ) -> Result<(), Mp3Error> {
        let slot_index = report.slot_index;
        if self.slot_of(conn) != Some(slot_index) {
            return Err(Mp3Error::NotBound { conn, slot_index });
        }
        let slot = self.slot_mut(slot_index)?;
        if slot.file_id.as_deref() != Some(report.file_id.as_str()) {
            return Err(Mp3Error::StaleFile {
                file_id: report.file_id.clone(),
                slot_index,
            });
        }

        let became_ready = report.ready && !slot.ready;
        slot.ready = report.ready;
        if let Some(duration) = report.duration.filter(|d| d.is_finite() && *d >= 0.0) {
            slot.duration = Some(duration);
        }

        if became_ready {
            if let Some(instruction) = self.catch_up(slot_index, now) {
                out.unicast(conn, ServerMessage::Mp3Play(instruction));
            }
        }
        self.broadcast_state(out);
        Ok(())
    }

    // ─── Transport ──────────────────────────────────────────────────────────

    /// Schedule a synchronized start; returns how many clients were told
    pub fn play(
        &mut self,
        out: &Broadcaster,
        seek_seconds: f64,
        now: Millis,
    ) -> Result<usize, Mp3Error> {
        if !seek_seconds.is_finite() || seek_seconds < 0.0 {
            return Err(Mp3Error::InvalidSeek(seek_seconds));
        }
        if let Some(old) = &self.play_state {
            log::debug!("[Mp3] play {} superseded", old.play_token);
        }

        let state = PlayState {
            play_token: uuid::Uuid::new_v4().to_string(),
            start_instant: now + self.config.play_lead_ms,
            seek_seconds,
        };
        let sent = self
            .slots
            .iter()
            .filter_map(|slot| {
                let conn = slot.connection_id?;
                let file_id = slot.file_id.clone()?;
                Some((conn, instruction(&state, slot.slot_index, file_id)))
            })
            .filter(|(conn, play)| out.unicast(*conn, ServerMessage::Mp3Play(play.clone())))
            .count();

        log::info!(
            "[Mp3] play {} at {:.0} seek {seek_seconds}s → {sent} clients",
            state.play_token,
            state.start_instant
        );
        self.play_state = Some(state);
        self.broadcast_state(out);
        Ok(sent)
    }

    /// Clear the play state and tell every MP3 player; `None` when idle
    pub fn stop(&mut self, out: &Broadcaster) -> Option<String> {
        let state = self.play_state.take()?;
        out.to_room(
            Room::Mp3Players,
            &ServerMessage::Mp3Stop(Mp3StopNotice {
                play_token: state.play_token.clone(),
            }),
        );
        log::info!("[Mp3] stop {}", state.play_token);
        self.broadcast_state(out);
        Some(state.play_token)
    }

    /// Start instruction for a client joining a running playback
    ///
    /// If the scheduled start has not passed yet the original instruction
    /// still applies; otherwise the client starts `late_join_lead_ms` from
    /// now with the playhead advanced by the time since the original start.
    pub fn catch_up(&self, slot_index: usize, now: Millis) -> Option<Mp3PlayInstruction> {
        let state = self.play_state.as_ref()?;
        let file_id = self.slots.get(slot_index)?.file_id.clone()?;
        if state.start_instant > now {
            return Some(instruction(state, slot_index, file_id));
        }
        let late_start = now + self.config.late_join_lead_ms;
        Some(Mp3PlayInstruction {
            play_token: state.play_token.clone(),
            start_instant: late_start,
            seek_seconds: state.seek_seconds + (late_start - state.start_instant) / 1_000.0,
            slot_index,
            file_id,
        })
    }
}

fn take_file(slot: &mut Mp3Slot) -> Option<SlotFile> {
    slot.ready = false;
    slot.duration = None;
    let file_id = slot.file_id.take()?;
    Some(SlotFile {
        file_id,
        file_name: slot.file_name.take().unwrap_or_default(),
    })
}

fn instruction(state: &PlayState, slot_index: usize, file_id: String) -> Mp3PlayInstruction {
    Mp3PlayInstruction {
        play_token: state.play_token.clone(),
        start_instant: state.start_instant,
        seek_seconds: state.seek_seconds,
        slot_index,
        file_id,
    }
}
