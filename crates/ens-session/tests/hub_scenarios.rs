//! Hub Scenario Tests
//!
//! Drives a [`Hub`] synchronously through `handle()` with a manual clock:
//! - Presence transitions and the scene-reset broadcast
//! - Role isolation for UI, bridge and MP3 transport commands
//! - Wire vs. bridge equivalence
//! - MP3 capacity and late-join playhead
//! - Stable player ids across leave/join

use std::sync::Arc;

use ens_core::{ConnectionId, ControlRegistry, ManualClock, NumericCommand, PlayerId};
use ens_session::protocol::{
    JoinRequest, Mp3PlayRequest, SetIntervalRequest, SetPitchRequest, SetSceneRequest,
};
use ens_session::{ClientMessage, Hub, HubEvent, Mp3Config, ServerMessage, SlotFile};
use tokio::sync::{mpsc, oneshot};

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

type Inbox = mpsc::UnboundedReceiver<ServerMessage>;

struct Harness {
    hub: Hub,
    clock: Arc<ManualClock>,
    next: u64,
}

impl Harness {
    fn new() -> Self {
        Self::with_mp3(Mp3Config::default())
    }

    fn with_mp3(mp3: Mp3Config) -> Self {
        let clock = Arc::new(ManualClock::new(10_000.0));
        Self {
            hub: Hub::new(clock.clone(), ControlRegistry::default(), mp3),
            clock,
            next: 1,
        }
    }

    fn connect(&mut self) -> (ConnectionId, Inbox) {
        let conn = ConnectionId(self.next);
        self.next += 1;
        let (outbound, rx) = mpsc::unbounded_channel();
        self.hub.handle(HubEvent::Connected { conn, outbound });
        (conn, rx)
    }

    fn send(&mut self, conn: ConnectionId, message: ClientMessage) {
        self.hub.handle(HubEvent::Message { conn, message });
    }

    fn player(&mut self, name: &str) -> (ConnectionId, Inbox) {
        let (conn, mut rx) = self.connect();
        self.send(conn, join(name));
        drain(&mut rx);
        (conn, rx)
    }

    fn conductor(&mut self) -> (ConnectionId, Inbox) {
        let (conn, mut rx) = self.connect();
        self.send(conn, ClientMessage::JoinConductor);
        drain(&mut rx);
        (conn, rx)
    }

    fn assign(&mut self, slot_index: usize, file_id: &str) {
        let (reply, mut rx) = oneshot::channel();
        self.hub.handle(HubEvent::AssignFile {
            slot_index,
            file: SlotFile {
                file_id: file_id.into(),
                file_name: format!("{file_id}.mp3"),
            },
            reply,
        });
        assert!(rx.try_recv().unwrap().is_ok());
    }
}

fn join(name: &str) -> ClientMessage {
    ClientMessage::JoinPlayer(JoinRequest {
        name: Some(name.into()),
    })
}

fn drain(rx: &mut Inbox) -> Vec<ServerMessage> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

fn pitch_of(h: &Harness, conn: ConnectionId) -> i64 {
    h.hub.sessions().player(conn).unwrap().pitch
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRESENCE
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_player_join_sends_initial_state_and_notifies_conductors() {
    let mut h = Harness::new();
    let (_c, mut crx) = h.conductor();
    let (conn, mut rx) = h.connect();
    h.send(conn, join("ana"));

    match &drain(&mut rx)[..] {
        [ServerMessage::PlayerState(s)] => {
            assert_eq!(s.player_id, PlayerId(1));
            assert_eq!((s.pitch, s.interval), (69, 1000));
            assert!(s.conductor_present);
            assert_eq!(s.scene, "audioScore");
            assert_eq!(s.phase_anchor, 10_000.0);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(&drain(&mut crx)[..], [ServerMessage::StateUpdate(v)] if v.players.len() == 1));
}

#[test]
fn test_malformed_join_has_no_effect() {
    let mut h = Harness::new();
    let (_c, mut crx) = h.conductor();
    let (conn, mut rx) = h.connect();
    h.send(conn, ClientMessage::JoinPlayer(JoinRequest { name: None }));
    h.send(conn, join(""));

    assert!(drain(&mut rx).is_empty());
    assert!(drain(&mut crx).is_empty());
    assert_eq!(h.hub.sessions().player_count(), 0);
}

#[test]
fn test_first_conductor_resets_every_anchor_once() {
    let mut h = Harness::new();
    let (_a, mut arx) = h.player("a");
    h.clock.advance(1_234.0);
    let (_b, mut brx) = h.player("b");

    h.clock.set(20_000.0);
    let (c, mut crx) = h.connect();
    h.send(c, ClientMessage::JoinConductor);

    for rx in [&mut arx, &mut brx] {
        let msgs = drain(rx);
        let updates: Vec<_> = msgs
            .iter()
            .filter_map(|m| match m {
                ServerMessage::PlayerUpdate(u) => Some(u),
                _ => None,
            })
            .collect();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].phase_anchor, 20_000.0);
        assert!(msgs.contains(&ServerMessage::ConductorPresence(
            ens_session::protocol::ConductorPresence { present: true }
        )));
    }
    assert!(h.hub.sessions().players().all(|p| p.phase_anchor == 20_000.0));
    assert_eq!(h.hub.sessions().global_anchor(), 20_000.0);

    let to_conductor = drain(&mut crx);
    match to_conductor.first() {
        Some(ServerMessage::FullState(full)) => {
            assert_eq!(full.phase_anchor, 20_000.0);
            assert!(full.players.values().all(|p| p.phase_anchor == 20_000.0));
        }
        other => panic!("expected fullState first, got {other:?}"),
    }
    assert!(matches!(to_conductor.last(), Some(ServerMessage::StateUpdate(_))));
}

#[test]
fn test_second_conductor_does_not_reset() {
    let mut h = Harness::new();
    let (_first, _) = h.conductor();
    let (_p, mut prx) = h.player("p");
    h.clock.advance(500.0);
    let (_second, _) = h.conductor();

    assert!(drain(&mut prx).is_empty());
    assert_eq!(h.hub.sessions().global_anchor(), 10_000.0);
}

#[test]
fn test_last_conductor_leaving_clears_presence() {
    let mut h = Harness::new();
    let (a, _) = h.conductor();
    let (b, _) = h.conductor();
    let (_p, mut prx) = h.player("p");

    h.hub.handle(HubEvent::Disconnected { conn: a });
    assert!(drain(&mut prx).is_empty());

    h.hub.handle(HubEvent::Disconnected { conn: b });
    assert_eq!(
        drain(&mut prx),
        vec![ServerMessage::ConductorPresence(
            ens_session::protocol::ConductorPresence { present: false }
        )]
    );
    assert_eq!(h.hub.stats().conductors, 0);
}

#[test]
fn test_player_ids_strictly_increase() {
    let mut h = Harness::new();
    let (a, _) = h.player("a");
    let first = h.hub.sessions().player(a).unwrap().player_id;
    h.hub.handle(HubEvent::Disconnected { conn: a });

    let (b, _) = h.player("b");
    let (c, _) = h.player("c");
    let second = h.hub.sessions().player(b).unwrap().player_id;
    let third = h.hub.sessions().player(c).unwrap().player_id;
    assert!(first < second && second < third);
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMMANDS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_non_conductor_commands_have_no_effect() {
    let mut h = Harness::new();
    let (p, mut prx) = h.player("p");
    let (intruder, _) = h.connect();
    let before = h.hub.sessions().player(p).unwrap().clone();
    h.clock.advance(1_250.0);

    h.send(
        intruder,
        ClientMessage::SetPlayerPitch(SetPitchRequest {
            player_id: p,
            pitch: 40.0,
        }),
    );
    h.send(
        intruder,
        ClientMessage::SetPlayerInterval(SetIntervalRequest {
            player_id: p,
            interval: 400.0,
        }),
    );
    h.send(
        intruder,
        ClientMessage::NumericCommand(NumericCommand::new(-1, "pitch", 40.0)),
    );
    h.send(
        intruder,
        ClientMessage::SetScene(SetSceneRequest {
            scene: "audioScore".into(),
        }),
    );
    h.send(p, ClientMessage::NumericCommand(NumericCommand::new(1, 1, 40.0)));
    h.send(p, ClientMessage::NumericCommand(NumericCommand::new(1, 2, 400.0)));

    let after = h.hub.sessions().player(p).unwrap();
    assert_eq!(pitch_of(&h, p), 69);
    assert_eq!(after.interval, before.interval);
    assert_eq!(after.phase_anchor, before.phase_anchor);
    assert_eq!(after, &before);
    assert_eq!(h.hub.sessions().global_anchor(), 10_000.0);
    assert!(drain(&mut prx).is_empty());
}

#[test]
fn test_ui_interval_change_keeps_phase() {
    let mut h = Harness::new();
    let (c, _) = h.conductor();
    let (p, mut prx) = h.player("p");

    // anchor 10_000, interval 1000; at 12_250 the fraction is 0.25
    h.clock.set(12_250.0);
    h.send(
        c,
        ClientMessage::SetPlayerInterval(SetIntervalRequest {
            player_id: p,
            interval: 2000.0,
        }),
    );

    let player = h.hub.sessions().player(p).unwrap();
    assert_eq!(player.interval, 2000);
    approx::assert_abs_diff_eq!(player.phase_anchor, 12_250.0 - 0.25 * 2000.0);
    assert!(matches!(&drain(&mut prx)[..], [ServerMessage::PlayerUpdate(u)] if u.interval == 2000));
}

#[test]
fn test_wire_and_bridge_are_equivalent() {
    let mut h = Harness::new();
    let (c, _) = h.conductor();
    let (a, _) = h.player("a");
    let (b, _) = h.player("b");

    h.hub.handle(HubEvent::Wire(NumericCommand::new(2, 1, 60.0)));
    assert_eq!((pitch_of(&h, a), pitch_of(&h, b)), (69, 60));

    h.send(
        c,
        ClientMessage::NumericCommand(NumericCommand::new(1, "pitch", 61.0)),
    );
    assert_eq!((pitch_of(&h, a), pitch_of(&h, b)), (61, 60));
}

#[test]
fn test_wire_scene_select_resets_each_player_once() {
    let mut h = Harness::new();
    let (_c, mut crx) = h.conductor();
    let (_a, mut arx) = h.player("a");
    let (_b, mut brx) = h.player("b");
    drain(&mut crx);

    h.clock.set(50_000.0);
    h.hub.handle(HubEvent::Wire(NumericCommand::new(0, 100, 0.0)));

    for rx in [&mut arx, &mut brx] {
        assert!(matches!(
            &drain(rx)[..],
            [ServerMessage::PlayerUpdate(u)] if u.phase_anchor == 50_000.0
        ));
    }
    assert_eq!(drain(&mut crx).len(), 1);
}

#[test]
fn test_wire_out_of_range_and_unknown_are_silent() {
    let mut h = Harness::new();
    let (_c, mut crx) = h.conductor();
    let (a, mut arx) = h.player("a");
    drain(&mut crx);

    h.hub.handle(HubEvent::Wire(NumericCommand::new(-1, 1, 200.0)));
    h.hub.handle(HubEvent::Wire(NumericCommand::new(-1, 77, 60.0)));
    h.hub.handle(HubEvent::Wire(NumericCommand::new(-5, 1, 60.0)));
    h.hub.handle(HubEvent::Wire(NumericCommand::new(42, 1, 60.0)));

    assert_eq!(pitch_of(&h, a), 69);
    assert!(drain(&mut arx).is_empty());
    assert!(drain(&mut crx).is_empty());
}

#[test]
fn test_unknown_scene_name_is_noop() {
    let mut h = Harness::new();
    let (c, _) = h.conductor();
    let (_p, mut prx) = h.player("p");
    h.send(
        c,
        ClientMessage::SetScene(SetSceneRequest {
            scene: "nowhere".into(),
        }),
    );
    assert!(drain(&mut prx).is_empty());
    assert_eq!(h.hub.sessions().scene(), "audioScore");
}

// ═══════════════════════════════════════════════════════════════════════════════
// MP3
// ═══════════════════════════════════════════════════════════════════════════════

fn mp3_join(name: &str) -> ClientMessage {
    ClientMessage::JoinMp3Player(JoinRequest {
        name: Some(name.into()),
    })
}

#[test]
fn test_mp3_capacity_frees_exactly_one() {
    let mut h = Harness::with_mp3(Mp3Config {
        slots: 2,
        ..Mp3Config::default()
    });
    let (a, _) = h.connect();
    let (b, _) = h.connect();
    let (c, mut crx) = h.connect();
    let (d, mut drx) = h.connect();
    h.send(a, mp3_join("a"));
    h.send(b, mp3_join("b"));

    h.send(c, mp3_join("c"));
    assert!(matches!(&drain(&mut crx)[..], [ServerMessage::Mp3JoinError(_)]));
    assert_eq!(h.hub.mp3().bound_count(), 2);

    h.hub.handle(HubEvent::Disconnected { conn: a });
    h.send(c, mp3_join("c"));
    h.send(d, mp3_join("d"));

    assert!(matches!(
        &drain(&mut crx)[..],
        [ServerMessage::Mp3JoinSuccess(s)] if s.slot_index == 0
    ));
    assert!(matches!(&drain(&mut drx)[..], [ServerMessage::Mp3JoinError(_)]));
}

#[test]
fn test_mp3_transport_requires_mp3_conductor() {
    let mut h = Harness::new();
    let (p, mut prx) = h.connect();
    h.send(p, mp3_join("p"));
    h.assign(0, "song");
    drain(&mut prx);

    h.send(p, ClientMessage::Mp3Play(Mp3PlayRequest { seek_seconds: 0.0 }));
    assert!(h.hub.mp3().play_state().is_none());
    assert!(drain(&mut prx).is_empty());

    let (c, mut crx) = h.connect();
    h.send(c, ClientMessage::JoinMp3Conductor);
    assert!(matches!(&drain(&mut crx)[..], [ServerMessage::Mp3FullState(_)]));

    h.send(c, ClientMessage::Mp3Play(Mp3PlayRequest { seek_seconds: 3.0 }));
    match &drain(&mut prx)[..] {
        [ServerMessage::Mp3Play(play)] => {
            assert_eq!(play.start_instant, 12_000.0);
            assert_eq!(play.seek_seconds, 3.0);
            assert_eq!(play.file_id, "song");
        }
        other => panic!("unexpected {other:?}"),
    }

    h.send(c, ClientMessage::Mp3Stop);
    assert!(matches!(&drain(&mut prx)[..], [ServerMessage::Mp3Stop(_)]));
    assert!(h.hub.mp3().play_state().is_none());
}

#[test]
fn test_mp3_late_join_seek_tracks_elapsed_time() {
    let mut h = Harness::new();
    let (c, _) = h.connect();
    h.send(c, ClientMessage::JoinMp3Conductor);
    h.assign(0, "song");
    h.send(c, ClientMessage::Mp3Play(Mp3PlayRequest { seek_seconds: 5.0 }));

    // start at 12_000; joining at 20_000 starts at 20_500, 8.5s into playback
    h.clock.set(20_000.0);
    let (late, mut lrx) = h.connect();
    h.send(late, mp3_join("late"));

    match &drain(&mut lrx)[..] {
        [ServerMessage::Mp3JoinSuccess(s), ServerMessage::Mp3Play(play)] => {
            assert_eq!(s.file_id.as_deref(), Some("song"));
            assert_eq!(play.start_instant, 20_500.0);
            approx::assert_abs_diff_eq!(play.seek_seconds, 13.5, epsilon = 1e-9);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_mp3_disconnect_keeps_assignment() {
    let mut h = Harness::new();
    let (p, _) = h.connect();
    h.send(p, mp3_join("p"));
    h.assign(0, "keep");
    h.hub.handle(HubEvent::Disconnected { conn: p });

    let slot = &h.hub.mp3().slots()[0];
    assert!(slot.connection_id.is_none());
    assert_eq!(slot.file_id.as_deref(), Some("keep"));
    assert_eq!(h.hub.stats().connections, 0);
}
