//! Session Registry
//!
//! Single-writer owner of player and conductor state. Exposes only
//! transactional operations (join / apply / leave / reset) that keep the
//! invariants:
//!
//! - player ids increase monotonically and are never reissued
//! - pitch/interval stay inside their control ranges
//! - a phase anchor never lies in the future

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use ens_core::{
    ConnectionId, ControlDefinition, ControlRef, ControlRegistry, INTERVAL, Millis, PITCH,
    PlayerId, recompute_anchor,
};

use crate::protocol::{AppStateView, InitialPlayerState, PlayerUpdate};
use crate::router::Rejection;

/// Longest accepted player name, in characters
pub const MAX_NAME_CHARS: usize = 50;

/// Server-side state of one player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub player_id: PlayerId,
    pub connection_id: ConnectionId,
    pub name: String,
    pub pitch: i64,
    pub interval: i64,
    pub phase_anchor: Millis,
    /// Values of scene controls beyond pitch/interval, keyed by control name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub controls: BTreeMap<String, i64>,
}

impl PlayerState {
    pub fn update(&self, scene: &str) -> PlayerUpdate {
        PlayerUpdate {
            pitch: self.pitch,
            interval: self.interval,
            scene: scene.to_string(),
            phase_anchor: self.phase_anchor,
            controls: self.controls.clone(),
        }
    }
}

/// What a disconnect removed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Departure {
    pub player: Option<PlayerState>,
    pub was_conductor: bool,
    /// The last conductor just left (1 → 0)
    pub conductors_gone: bool,
}

/// Owner of every player/conductor session
#[derive(Debug)]
pub struct SessionRegistry {
    players: BTreeMap<ConnectionId, PlayerState>,
    player_ids: HashMap<PlayerId, ConnectionId>,
    conductors: BTreeSet<ConnectionId>,
    next_player_id: u32,
    scene: String,
    global_anchor: Millis,
}

impl SessionRegistry {
    pub fn new(scene: &str, now: Millis) -> Self {
        Self {
            players: BTreeMap::new(),
            player_ids: HashMap::new(),
            conductors: BTreeSet::new(),
            next_player_id: 1,
            scene: scene.to_string(),
            global_anchor: now,
        }
    }

    // ─── Players ────────────────────────────────────────────────────────────

    /// Register a player with scene defaults and `phase_anchor = now`
    ///
    /// Returns `None` (and changes nothing) for a missing/blank name or a
    /// connection that is already a player.
    pub fn join_player(
        &mut self,
        conn: ConnectionId,
        name: Option<&str>,
        controls: &ControlRegistry,
        now: Millis,
    ) -> Option<&PlayerState> {
        let name = name.filter(|n| !n.trim().is_empty())?;
        if self.players.contains_key(&conn) {
            return None;
        }

        let player_id = PlayerId(self.next_player_id);
        self.next_player_id += 1;

        let defaults = controls.player_defaults(&self.scene);
        let extra = extra_controls(controls, &self.scene, &BTreeMap::new());

        self.player_ids.insert(player_id, conn);
        let state = PlayerState {
            player_id,
            connection_id: conn,
            name: name.chars().take(MAX_NAME_CHARS).collect(),
            pitch: defaults.pitch,
            interval: defaults.interval,
            phase_anchor: now,
            controls: extra,
        };
        self.players.insert(conn, state);
        self.players.get(&conn)
    }

    pub fn player(&self, conn: ConnectionId) -> Option<&PlayerState> {
        self.players.get(&conn)
    }

    pub fn connection_for(&self, player_id: PlayerId) -> Option<ConnectionId> {
        self.player_ids.get(&player_id).copied()
    }

    pub fn players(&self) -> impl Iterator<Item = &PlayerState> {
        self.players.values()
    }

    pub fn player_connections(&self) -> Vec<ConnectionId> {
        self.players.keys().copied().collect()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Apply one validated control to one player
    ///
    /// `interval` moves the phase anchor so the cycle continues without a
    /// jump. The range is re-checked here; nothing is clamped.
    pub fn apply_control(
        &mut self,
        conn: ConnectionId,
        control: &ControlDefinition,
        value: f64,
        now: Millis,
    ) -> Result<(), Rejection> {
        let value = control.validate(value)?;
        let player = self
            .players
            .get_mut(&conn)
            .ok_or(Rejection::UnknownConnection(conn))?;

        match control.name.as_str() {
            PITCH => player.pitch = value,
            INTERVAL => {
                player.phase_anchor = recompute_anchor(
                    player.phase_anchor,
                    player.interval as f64,
                    value as f64,
                    now,
                );
                player.interval = value;
            }
            other => {
                player.controls.insert(other.to_string(), value);
            }
        }
        Ok(())
    }

    // ─── Conductors ─────────────────────────────────────────────────────────

    /// Add a conductor; `Some(true)` on the 0 → 1 transition, `None` if the
    /// connection was already counted.
    pub fn join_conductor(&mut self, conn: ConnectionId) -> Option<bool> {
        let first = self.conductors.is_empty();
        self.conductors.insert(conn).then_some(first)
    }

    pub fn is_conductor(&self, conn: ConnectionId) -> bool {
        self.conductors.contains(&conn)
    }

    pub fn conductor_count(&self) -> usize {
        self.conductors.len()
    }

    pub fn conductor_present(&self) -> bool {
        !self.conductors.is_empty()
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────────

    /// Remove `conn` from every role it held. Its player id stays retired.
    pub fn leave(&mut self, conn: ConnectionId) -> Departure {
        let player = self.players.remove(&conn);
        if let Some(p) = &player {
            self.player_ids.remove(&p.player_id);
        }
        let was_conductor = self.conductors.remove(&conn);
        Departure {
            player,
            was_conductor,
            conductors_gone: was_conductor && self.conductors.is_empty(),
        }
    }

    // ─── Scene / global phase ───────────────────────────────────────────────

    pub fn scene(&self) -> &str {
        &self.scene
    }

    pub fn global_anchor(&self) -> Millis {
        self.global_anchor
    }

    /// Move every player's phase zero (and the global anchor) to `now`
    pub fn reset_phase(&mut self, now: Millis) {
        self.global_anchor = now;
        for player in self.players.values_mut() {
            player.phase_anchor = now;
        }
    }

    /// Switch scene, then restart every cycle at `now`
    ///
    /// Values the new scene's table does not accept fall back to its
    /// defaults; the extra controls map is rebuilt from the new table.
    pub fn set_scene(&mut self, scene: &str, controls: &ControlRegistry, now: Millis) {
        self.scene = scene.to_string();
        let defaults = controls.player_defaults(scene);
        for player in self.players.values_mut() {
            if !in_range(controls, scene, PITCH, player.pitch) {
                player.pitch = defaults.pitch;
            }
            if !in_range(controls, scene, INTERVAL, player.interval) {
                player.interval = defaults.interval;
            }
            player.controls = extra_controls(controls, scene, &player.controls);
        }
        self.reset_phase(now);
    }

    // ─── Views ──────────────────────────────────────────────────────────────

    pub fn initial_state(&self, conn: ConnectionId) -> Option<InitialPlayerState> {
        let player = self.players.get(&conn)?;
        Some(InitialPlayerState {
            player_id: player.player_id,
            pitch: player.pitch,
            interval: player.interval,
            conductor_present: self.conductor_present(),
            scene: self.scene.clone(),
            phase_anchor: player.phase_anchor,
            controls: player.controls.clone(),
        })
    }

    pub fn snapshot(&self, controls: &ControlRegistry) -> AppStateView {
        AppStateView {
            players: self.players.clone(),
            conductor_count: self.conductors.len(),
            scene: self.scene.clone(),
            defaults: controls.player_defaults(&self.scene),
            phase_anchor: self.global_anchor,
            controls: controls.controls(&self.scene).to_vec(),
            scenes: controls.scene_names(),
        }
    }
}

/// `true` when `scene` has no such control or accepts `value` for it
fn in_range(controls: &ControlRegistry, scene: &str, name: &str, value: i64) -> bool {
    controls
        .resolve(scene, &ControlRef::from(name))
        .is_none_or(|c| c.accepts(value as f64))
}

/// Extra (non pitch/interval) controls of `scene`, keeping accepted values
/// from `current`
fn extra_controls(
    controls: &ControlRegistry,
    scene: &str,
    current: &BTreeMap<String, i64>,
) -> BTreeMap<String, i64> {
    controls
        .controls(scene)
        .iter()
        .filter(|c| c.name != PITCH && c.name != INTERVAL)
        .map(|c| {
            let value = current
                .get(&c.name)
                .copied()
                .filter(|v| c.accepts(*v as f64))
                .unwrap_or(c.default_value);
            (c.name.clone(), value)
        })
        .collect()
}
