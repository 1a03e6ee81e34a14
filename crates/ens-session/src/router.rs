//! Command Router
//!
//! Every mutation request, whatever channel it arrived on, becomes a
//! [`Command`] and walks the same pipeline:
//!
//! ```text
//! RESOLVE_CONTROL → VALIDATE_TARGET → VALIDATE_RANGE → APPLY → BROADCAST
//! ```
//!
//! Channels:
//! - UI events naming a player by connection identity
//! - numeric `(target, control, value)` datagrams
//! - bridge `numericCommand` events (id or name addressing)
//!
//! Failures never reach the sender: the datagram wire has no response path,
//! so every [`Rejection`] is a logged no-op.

use thiserror::Error;

use ens_core::{
    ConnectionId, ControlDefinition, ControlRef, ControlRegistry, Millis, NumericCommand,
    PlayerId, SCENE_SELECT_ID, ValueError,
};

use crate::broadcast::{Broadcaster, Room};
use crate::protocol::ServerMessage;
use crate::registry::SessionRegistry;

/// Wire value addressing every connected player
pub const TARGET_ALL: i64 = -1;
/// Wire value reserved for global controls
pub const TARGET_GLOBAL: i64 = 0;

// ═══════════════════════════════════════════════════════════════════════════════
// COMMAND
// ═══════════════════════════════════════════════════════════════════════════════

/// Who a command applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Global,
    AllPlayers,
    Player(PlayerId),
    Connection(ConnectionId),
}

impl Target {
    pub fn from_wire(target: i64) -> Result<Self, Rejection> {
        match target {
            TARGET_GLOBAL => Ok(Self::Global),
            TARGET_ALL => Ok(Self::AllPlayers),
            n if n > 0 => u32::try_from(n)
                .map(|id| Self::Player(PlayerId(id)))
                .map_err(|_| Rejection::InvalidTarget(n)),
            n => Err(Rejection::InvalidTarget(n)),
        }
    }
}

/// Channel-independent mutation request
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub target: Target,
    pub control: ControlRef,
    pub value: f64,
}

impl Command {
    pub fn from_numeric(cmd: &NumericCommand) -> Result<Self, Rejection> {
        Ok(Self {
            target: Target::from_wire(cmd.target)?,
            control: cmd.control.clone(),
            value: cmd.value,
        })
    }

    pub fn for_connection(conn: ConnectionId, control: &str, value: f64) -> Self {
        Self {
            target: Target::Connection(conn),
            control: ControlRef::from(control),
            value,
        }
    }
}

/// How many targets a command reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApplyReport {
    pub applied: usize,
    pub attempted: usize,
}

/// Reasons a command was dropped
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejection {
    #[error("{0} is not a conductor")]
    NotConductor(ConnectionId),

    #[error("unknown control {0}")]
    UnknownControl(ControlRef),

    #[error("target {target} cannot address control '{control}'")]
    ReservedTarget { target: String, control: String },

    #[error("invalid target {0}")]
    InvalidTarget(i64),

    #[error("no connected {0}")]
    UnknownPlayer(PlayerId),

    #[error("{0} is not a player")]
    UnknownConnection(ConnectionId),

    #[error("unknown scene '{0}'")]
    UnknownScene(String),

    #[error(transparent)]
    Value(#[from] ValueError),
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROUTER
// ═══════════════════════════════════════════════════════════════════════════════

/// Resolves, validates, applies and propagates commands
#[derive(Debug, Clone, Default)]
pub struct CommandRouter {
    controls: ControlRegistry,
}

impl CommandRouter {
    pub fn new(controls: ControlRegistry) -> Self {
        Self { controls }
    }

    pub fn controls(&self) -> &ControlRegistry {
        &self.controls
    }

    pub fn route(
        &self,
        sessions: &mut SessionRegistry,
        out: &Broadcaster,
        command: &Command,
        now: Millis,
    ) -> Result<ApplyReport, Rejection> {
        // RESOLVE_CONTROL
        let control = self
            .controls
            .resolve(sessions.scene(), &command.control)
            .ok_or_else(|| Rejection::UnknownControl(command.control.clone()))?;

        // VALIDATE_TARGET
        let scene_select = control.id == SCENE_SELECT_ID;
        if scene_select != (command.target == Target::Global) {
            return Err(Rejection::ReservedTarget {
                target: format!("{:?}", command.target),
                control: control.name.clone(),
            });
        }
        let targets = match command.target {
            Target::Global => Vec::new(),
            Target::AllPlayers => sessions.player_connections(),
            Target::Player(id) => {
                vec![sessions.connection_for(id).ok_or(Rejection::UnknownPlayer(id))?]
            }
            Target::Connection(conn) => {
                sessions.player(conn).ok_or(Rejection::UnknownConnection(conn))?;
                vec![conn]
            }
        };

        // VALIDATE_RANGE
        let value = control.validate(command.value)?;

        // APPLY + BROADCAST
        if scene_select {
            let scene = self
                .controls
                .scene_at(value)
                .ok_or_else(|| Rejection::UnknownScene(format!("#{value}")))?
                .to_string();
            return self.change_scene(sessions, out, &scene, now);
        }
        Ok(self.apply_to_players(sessions, out, control, value, &targets, now))
    }

    fn apply_to_players(
        &self,
        sessions: &mut SessionRegistry,
        out: &Broadcaster,
        control: &ControlDefinition,
        value: i64,
        targets: &[ConnectionId],
        now: Millis,
    ) -> ApplyReport {
        let mut report = ApplyReport {
            applied: 0,
            attempted: targets.len(),
        };
        for &conn in targets {
            if let Err(e) = sessions.apply_control(conn, control, value as f64, now) {
                log::debug!("[Router] {} on {conn} skipped: {e}", control.name);
                continue;
            }
            report.applied += 1;
            if let Some(player) = sessions.player(conn) {
                out.unicast(conn, ServerMessage::PlayerUpdate(player.update(sessions.scene())));
            }
        }
        if report.applied > 0 {
            self.broadcast_state(sessions, out);
        }
        report
    }

    /// Switch scene and restart every player's cycle at `now`
    pub fn change_scene(
        &self,
        sessions: &mut SessionRegistry,
        out: &Broadcaster,
        scene: &str,
        now: Millis,
    ) -> Result<ApplyReport, Rejection> {
        if !self.controls.has_scene(scene) {
            return Err(Rejection::UnknownScene(scene.to_string()));
        }
        sessions.set_scene(scene, &self.controls, now);
        push_player_updates(sessions, out);
        self.broadcast_state(sessions, out);

        let count = sessions.player_count();
        log::info!("[Router] scene → '{scene}' ({count} players reset)");
        Ok(ApplyReport {
            applied: count,
            attempted: count,
        })
    }

    pub fn broadcast_state(&self, sessions: &SessionRegistry, out: &Broadcaster) -> usize {
        out.to_room(
            Room::Conductors,
            &ServerMessage::StateUpdate(sessions.snapshot(&self.controls)),
        )
    }
}

/// Send every player its authoritative update; returns players reached
pub fn push_player_updates(sessions: &SessionRegistry, out: &Broadcaster) -> usize {
    sessions
        .players()
        .filter(|p| {
            out.unicast(
                p.connection_id,
                ServerMessage::PlayerUpdate(p.update(sessions.scene())),
            )
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ens_core::{DEFAULT_SCENE, INTERVAL, PITCH, SceneControls, audio_score_controls};
    use tokio::sync::mpsc;

    struct Fixture {
        router: CommandRouter,
        sessions: SessionRegistry,
        out: Broadcaster,
        inboxes: Vec<mpsc::UnboundedReceiver<ServerMessage>>,
    }

    /// Two players (ids 1, 2 on connections 1, 2) and one conductor (connection 10)
    fn fixture() -> Fixture {
        let router = CommandRouter::default();
        let mut sessions = SessionRegistry::new(DEFAULT_SCENE, 0.0);
        let mut out = Broadcaster::new();
        let mut inboxes = Vec::new();
        for (conn, name) in [(1, "a"), (2, "b")] {
            let (tx, rx) = mpsc::unbounded_channel();
            out.register(ConnectionId(conn), tx);
            out.join(ConnectionId(conn), Room::Players);
            sessions.join_player(ConnectionId(conn), Some(name), router.controls(), 0.0);
            inboxes.push(rx);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        out.register(ConnectionId(10), tx);
        out.join(ConnectionId(10), Room::Conductors);
        sessions.join_conductor(ConnectionId(10));
        inboxes.push(rx);
        Fixture {
            router,
            sessions,
            out,
            inboxes,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn test_target_from_wire() {
        assert_eq!(Target::from_wire(0), Ok(Target::Global));
        assert_eq!(Target::from_wire(-1), Ok(Target::AllPlayers));
        assert_eq!(Target::from_wire(3), Ok(Target::Player(PlayerId(3))));
        assert_eq!(Target::from_wire(-2), Err(Rejection::InvalidTarget(-2)));
        assert!(Target::from_wire(i64::MAX).is_err());
    }

    #[test]
    fn test_numeric_pitch_to_one_player() {
        let mut f = fixture();
        let cmd = Command::from_numeric(&NumericCommand::new(2, 1, 60.0)).unwrap();
        let report = f.router.route(&mut f.sessions, &f.out, &cmd, 5.0).unwrap();

        assert_eq!(report, ApplyReport { applied: 1, attempted: 1 });
        assert_eq!(f.sessions.player(ConnectionId(2)).unwrap().pitch, 60);
        assert_eq!(f.sessions.player(ConnectionId(1)).unwrap().pitch, 69);

        assert!(drain(&mut f.inboxes[0]).is_empty());
        let to_player = drain(&mut f.inboxes[1]);
        assert!(matches!(&to_player[..], [ServerMessage::PlayerUpdate(u)] if u.pitch == 60));
        let to_conductor = drain(&mut f.inboxes[2]);
        assert!(matches!(&to_conductor[..], [ServerMessage::StateUpdate(_)]));
    }

    #[test]
    fn test_all_players_counts_successes() {
        let mut f = fixture();
        let cmd = Command::from_numeric(&NumericCommand::new(-1, INTERVAL, 500.0)).unwrap();
        let report = f.router.route(&mut f.sessions, &f.out, &cmd, 5.0).unwrap();
        assert_eq!(report, ApplyReport { applied: 2, attempted: 2 });
        assert!(f.sessions.players().all(|p| p.interval == 500));
    }

    #[test]
    fn test_missing_player_is_noop() {
        let mut f = fixture();
        let cmd = Command::from_numeric(&NumericCommand::new(9, PITCH, 60.0)).unwrap();
        assert_eq!(
            f.router.route(&mut f.sessions, &f.out, &cmd, 5.0),
            Err(Rejection::UnknownPlayer(PlayerId(9)))
        );
        assert!(f.inboxes.iter_mut().all(|rx| drain(rx).is_empty()));
    }

    #[test]
    fn test_unknown_control_and_reserved_target() {
        let mut f = fixture();
        let unknown = Command::from_numeric(&NumericCommand::new(1, 42, 1.0)).unwrap();
        assert!(matches!(
            f.router.route(&mut f.sessions, &f.out, &unknown, 5.0),
            Err(Rejection::UnknownControl(_))
        ));

        let pitch_on_global = Command::from_numeric(&NumericCommand::new(0, 1, 60.0)).unwrap();
        assert!(matches!(
            f.router.route(&mut f.sessions, &f.out, &pitch_on_global, 5.0),
            Err(Rejection::ReservedTarget { .. })
        ));

        let scene_on_player = Command::from_numeric(&NumericCommand::new(1, 100, 0.0)).unwrap();
        assert!(matches!(
            f.router.route(&mut f.sessions, &f.out, &scene_on_player, 5.0),
            Err(Rejection::ReservedTarget { .. })
        ));
    }

    #[test]
    fn test_out_of_range_rejected_not_clamped() {
        let mut f = fixture();
        let cmd = Command::from_numeric(&NumericCommand::new(-1, PITCH, 90.0)).unwrap();
        assert!(matches!(
            f.router.route(&mut f.sessions, &f.out, &cmd, 5.0),
            Err(Rejection::Value(ValueError::OutOfRange { .. }))
        ));
        assert!(f.sessions.players().all(|p| p.pitch == 69));
    }

    #[test]
    fn test_scene_select_resets_every_anchor() {
        let mut f = fixture();
        let cmd = Command::from_numeric(&NumericCommand::new(0, SCENE_SELECT_ID, 0.0)).unwrap();
        let report = f.router.route(&mut f.sessions, &f.out, &cmd, 4_321.0).unwrap();
        assert_eq!(report.applied, 2);
        assert!(f.sessions.players().all(|p| p.phase_anchor == 4_321.0));
        for rx in &mut f.inboxes[..2] {
            assert_eq!(drain(rx).len(), 1);
        }
    }

    #[test]
    fn test_change_scene_unknown_name_is_noop() {
        let mut f = fixture();
        assert_eq!(
            f.router.change_scene(&mut f.sessions, &f.out, "nope", 10.0),
            Err(Rejection::UnknownScene("nope".into()))
        );
        assert_eq!(f.sessions.global_anchor(), 0.0);
    }

    #[test]
    fn test_scene_select_refits_players_to_new_ranges() {
        let drone = SceneControls {
            scene_name: "drone".to_string(),
            controls: vec![ControlDefinition::new(1, PITCH, 24, 48, 1, 36)],
        };
        let router =
            CommandRouter::new(ControlRegistry::new(vec![audio_score_controls(), drone]).unwrap());
        let mut sessions = SessionRegistry::new(DEFAULT_SCENE, 0.0);
        let mut out = Broadcaster::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        out.register(ConnectionId(1), tx);
        sessions.join_player(ConnectionId(1), Some("a"), router.controls(), 0.0);
        assert_eq!(sessions.player(ConnectionId(1)).unwrap().pitch, 69);

        let cmd = Command::from_numeric(&NumericCommand::new(0, SCENE_SELECT_ID, 1.0)).unwrap();
        router.route(&mut sessions, &out, &cmd, 500.0).unwrap();

        assert_eq!(sessions.scene(), "drone");
        let player = sessions.player(ConnectionId(1)).unwrap();
        let pitch = router.controls().resolve("drone", &ControlRef::from(PITCH)).unwrap();
        assert!(pitch.accepts(player.pitch as f64));
        assert_eq!(player.pitch, 36);
        assert_eq!(player.interval, 1000);

        match &drain(&mut rx)[..] {
            [ServerMessage::PlayerUpdate(update)] => {
                assert_eq!(update.scene, "drone");
                assert_eq!(update.pitch, 36);
                assert_eq!(update.phase_anchor, 500.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
