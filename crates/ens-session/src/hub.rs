//! Event-Loop Hub
//!
//! One task owns every piece of mutable session state. WebSocket tasks,
//! the datagram listener and HTTP file handlers only send [`HubEvent`]s;
//! each event is handled to completion before the next is taken, so
//! wire-originated and UI-originated mutations are serialized.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use ens_core::{
    Clock, ConnectionId, ControlRegistry, DEFAULT_SCENE, INTERVAL, Millis, NumericCommand, PITCH,
    pong,
};

use crate::broadcast::{Broadcaster, Outbound, Room};
use crate::mp3::{Mp3Config, Mp3Error, Mp3Scheduler, SlotFile};
use crate::protocol::{ClientMessage, ConductorPresence, ServerMessage};
use crate::registry::SessionRegistry;
use crate::router::{Command, CommandRouter, Rejection, push_player_updates};

/// Reply channel for file operations
pub type FileReply = oneshot::Sender<Result<Option<SlotFile>, Mp3Error>>;

/// Everything the hub reacts to
#[derive(Debug)]
pub enum HubEvent {
    Connected {
        conn: ConnectionId,
        outbound: Outbound,
    },
    Message {
        conn: ConnectionId,
        message: ClientMessage,
    },
    Disconnected {
        conn: ConnectionId,
    },
    /// Decoded datagram; trusted, no connection identity
    Wire(NumericCommand),
    AssignFile {
        slot_index: usize,
        file: SlotFile,
        reply: FileReply,
    },
    RemoveFile {
        slot_index: usize,
        reply: FileReply,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

/// Counts reported by the health endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    pub connections: usize,
    pub players: usize,
    pub conductors: usize,
    pub scene: String,
    pub mp3_slots: usize,
    pub mp3_bound: usize,
    pub playing: bool,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HubError {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error(transparent)]
    Mp3(#[from] Mp3Error),

    #[error("{0} is not an MP3 conductor")]
    NotMp3Conductor(ConnectionId),

    #[error("missing or empty player name")]
    InvalidJoin,

    #[error("hub is not running")]
    Closed,
}

// ═══════════════════════════════════════════════════════════════════════════════
// HUB
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Hub {
    clock: Arc<dyn Clock>,
    sessions: SessionRegistry,
    router: CommandRouter,
    mp3: Mp3Scheduler,
    out: Broadcaster,
}

impl Hub {
    pub fn new(clock: Arc<dyn Clock>, controls: ControlRegistry, mp3: Mp3Config) -> Self {
        let scene = controls
            .scene_names()
            .into_iter()
            .next()
            .unwrap_or_else(|| DEFAULT_SCENE.to_string());
        Self {
            sessions: SessionRegistry::new(&scene, clock.now_ms()),
            router: CommandRouter::new(controls),
            mp3: Mp3Scheduler::new(mp3),
            out: Broadcaster::new(),
            clock,
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn mp3(&self) -> &Mp3Scheduler {
        &self.mp3
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.out
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.out.connection_count(),
            players: self.sessions.player_count(),
            conductors: self.sessions.conductor_count(),
            scene: self.sessions.scene().to_string(),
            mp3_slots: self.mp3.slots().len(),
            mp3_bound: self.mp3.bound_count(),
            playing: self.mp3.play_state().is_some(),
        }
    }

    /// Spawn the event loop on the current runtime
    pub fn start(self) -> (HubHandle, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(rx));
        (HubHandle::new(tx), task)
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<HubEvent>) {
        log::info!("[Hub] running (scene '{}')", self.sessions.scene());
        while let Some(event) = rx.recv().await {
            self.handle(event);
        }
        log::info!("[Hub] event channel closed");
    }

    pub fn handle(&mut self, event: HubEvent) {
        let now = self.clock.now_ms();
        match event {
            HubEvent::Connected { conn, outbound } => {
                log::debug!("[Hub] {conn} connected");
                self.out.register(conn, outbound);
            }
            HubEvent::Message { conn, message } => {
                let name = message.name();
                if let Err(e) = self.on_message(conn, message, now) {
                    log::debug!("[Hub] {name} from {conn} dropped: {e}");
                }
            }
            HubEvent::Disconnected { conn } => self.on_disconnect(conn),
            HubEvent::Wire(cmd) => {
                let result = Command::from_numeric(&cmd)
                    .and_then(|c| self.router.route(&mut self.sessions, &self.out, &c, now));
                match result {
                    Ok(report) => log::debug!(
                        "[Hub] wire {cmd}: applied {} of {}",
                        report.applied,
                        report.attempted
                    ),
                    Err(e) => log::debug!("[Hub] wire {cmd} dropped: {e}"),
                }
            }
            HubEvent::AssignFile {
                slot_index,
                file,
                reply,
            } => {
                let _ = reply.send(self.mp3.assign_file(&self.out, slot_index, file));
            }
            HubEvent::RemoveFile { slot_index, reply } => {
                let _ = reply.send(self.mp3.remove_file(&self.out, slot_index));
            }
            HubEvent::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn on_message(
        &mut self,
        conn: ConnectionId,
        message: ClientMessage,
        now: Millis,
    ) -> Result<(), HubError> {
        match message {
            ClientMessage::SyncPing(ping) => {
                self.out.unicast(conn, ServerMessage::SyncPong(pong(ping, now)));
            }
            ClientMessage::JoinPlayer(req) => self.join_player(conn, req.name.as_deref(), now)?,
            ClientMessage::JoinConductor => self.join_conductor(conn, now),
            ClientMessage::SetPlayerPitch(req) => {
                self.require_conductor(conn)?;
                let cmd = Command::for_connection(req.player_id, PITCH, req.pitch);
                self.router.route(&mut self.sessions, &self.out, &cmd, now)?;
            }
            ClientMessage::SetPlayerInterval(req) => {
                self.require_conductor(conn)?;
                let cmd = Command::for_connection(req.player_id, INTERVAL, req.interval);
                self.router.route(&mut self.sessions, &self.out, &cmd, now)?;
            }
            ClientMessage::SetScene(req) => {
                self.require_conductor(conn)?;
                self.router
                    .change_scene(&mut self.sessions, &self.out, &req.scene, now)?;
            }
            ClientMessage::NumericCommand(cmd) => {
                self.require_conductor(conn)?;
                let cmd = Command::from_numeric(&cmd)?;
                let report = self.router.route(&mut self.sessions, &self.out, &cmd, now)?;
                log::debug!(
                    "[Hub] bridge command from {conn}: applied {} of {}",
                    report.applied,
                    report.attempted
                );
            }
            ClientMessage::JoinMp3Player(req) => {
                self.mp3
                    .join_player(&mut self.out, conn, req.name.as_deref(), now)?;
            }
            ClientMessage::JoinMp3Conductor => self.mp3.join_conductor(&mut self.out, conn),
            ClientMessage::Mp3Ready(report) => {
                self.mp3.report_ready(&self.out, conn, &report, now)?;
            }
            ClientMessage::Mp3Play(req) => {
                self.require_mp3_conductor(conn)?;
                self.mp3.play(&self.out, req.seek_seconds, now)?;
            }
            ClientMessage::Mp3Stop => {
                self.require_mp3_conductor(conn)?;
                self.mp3.stop(&self.out);
            }
        }
        Ok(())
    }

    fn require_conductor(&self, conn: ConnectionId) -> Result<(), HubError> {
        if self.sessions.is_conductor(conn) {
            Ok(())
        } else {
            Err(Rejection::NotConductor(conn).into())
        }
    }

    fn require_mp3_conductor(&self, conn: ConnectionId) -> Result<(), HubError> {
        if self.mp3.is_conductor(conn) {
            Ok(())
        } else {
            Err(HubError::NotMp3Conductor(conn))
        }
    }

    // ─── Presence ───────────────────────────────────────────────────────────

    fn join_player(
        &mut self,
        conn: ConnectionId,
        name: Option<&str>,
        now: Millis,
    ) -> Result<(), HubError> {
        let player_id = self
            .sessions
            .join_player(conn, name, self.router.controls(), now)
            .map(|p| p.player_id)
            .ok_or(HubError::InvalidJoin)?;
        log::info!("[Hub] {player_id} joined on {conn}");

        self.out.join(conn, Room::Players);
        if let Some(initial) = self.sessions.initial_state(conn) {
            self.out.unicast(conn, ServerMessage::PlayerState(initial));
        }
        self.router.broadcast_state(&self.sessions, &self.out);
        Ok(())
    }

    fn join_conductor(&mut self, conn: ConnectionId, now: Millis) {
        let Some(first) = self.sessions.join_conductor(conn) else {
            log::debug!("[Hub] {conn} is already a conductor");
            return;
        };
        log::info!(
            "[Hub] conductor joined on {conn} ({} total)",
            self.sessions.conductor_count()
        );

        if first {
            self.sessions.reset_phase(now);
            self.out.to_room(
                Room::Players,
                &ServerMessage::ConductorPresence(ConductorPresence { present: true }),
            );
            push_player_updates(&self.sessions, &self.out);
        }

        self.out.unicast(
            conn,
            ServerMessage::FullState(self.sessions.snapshot(self.router.controls())),
        );
        self.out.join(conn, Room::Conductors);
        self.router.broadcast_state(&self.sessions, &self.out);
    }

    fn on_disconnect(&mut self, conn: ConnectionId) {
        self.out.unregister(conn);
        self.mp3.disconnect(&mut self.out, conn);

        let departure = self.sessions.leave(conn);
        if let Some(player) = &departure.player {
            log::info!("[Hub] {} ('{}') left", player.player_id, player.name);
        }
        if departure.conductors_gone {
            log::info!("[Hub] last conductor left");
            self.out.to_room(
                Room::Players,
                &ServerMessage::ConductorPresence(ConductorPresence { present: false }),
            );
        }
        if departure.player.is_some() || departure.was_conductor {
            self.router.broadcast_state(&self.sessions, &self.out);
        }
        log::debug!("[Hub] {conn} disconnected");
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Cloneable sender side of a running hub
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubEvent>,
    next_conn: Arc<AtomicU64>,
}

impl HubHandle {
    pub fn new(tx: mpsc::UnboundedSender<HubEvent>) -> Self {
        Self {
            tx,
            next_conn: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register a new connection and get its outbound stream
    pub fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerMessage>) {
        let conn = ConnectionId(self.next_conn.fetch_add(1, Ordering::Relaxed));
        let (outbound, rx) = mpsc::unbounded_channel();
        let _ = self.tx.send(HubEvent::Connected { conn, outbound });
        (conn, rx)
    }

    pub fn send(&self, conn: ConnectionId, message: ClientMessage) -> bool {
        self.tx.send(HubEvent::Message { conn, message }).is_ok()
    }

    pub fn disconnect(&self, conn: ConnectionId) {
        let _ = self.tx.send(HubEvent::Disconnected { conn });
    }

    pub fn wire(&self, cmd: NumericCommand) -> bool {
        self.tx.send(HubEvent::Wire(cmd)).is_ok()
    }

    pub async fn assign_file(
        &self,
        slot_index: usize,
        file: SlotFile,
    ) -> Result<Option<SlotFile>, HubError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubEvent::AssignFile {
                slot_index,
                file,
                reply,
            })
            .map_err(|_| HubError::Closed)?;
        Ok(rx.await.map_err(|_| HubError::Closed)??)
    }

    pub async fn remove_file(&self, slot_index: usize) -> Result<Option<SlotFile>, HubError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubEvent::RemoveFile { slot_index, reply })
            .map_err(|_| HubError::Closed)?;
        Ok(rx.await.map_err(|_| HubError::Closed)??)
    }

    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubEvent::Stats { reply })
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ens_core::{ManualClock, SyncPing};

    #[tokio::test]
    async fn test_handle_round_trip() {
        let clock = Arc::new(ManualClock::new(1_000.0));
        let hub = Hub::new(clock.clone(), ControlRegistry::default(), Mp3Config::default());
        let (handle, _task) = hub.start();

        let (conn, mut rx) = handle.connect();
        assert_eq!(conn, ConnectionId(1));
        assert!(handle.send(conn, ClientMessage::SyncPing(SyncPing { client_time: 5.0 })));

        match rx.recv().await {
            Some(ServerMessage::SyncPong(p)) => {
                assert_eq!(p.client_time, 5.0);
                assert_eq!(p.server_time, 1_000.0);
            }
            other => panic!("unexpected {other:?}"),
        }

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.mp3_slots, 8);

        let previous = handle
            .assign_file(
                0,
                SlotFile {
                    file_id: "f".into(),
                    file_name: "f.mp3".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(previous, None);
        assert!(matches!(
            handle.remove_file(99).await,
            Err(HubError::Mp3(Mp3Error::NoSuchSlot { .. }))
        ));
    }
}
