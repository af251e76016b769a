//! Room actor: one Tokio task that owns the room state and everything that
//! touches it.
//!
//! Commands, simulation ticks, patch ticks and grace-period expiries all
//! arrive through one `select!` loop, so no two of them ever run at the
//! same time and the state needs no locks. A grace timer runs in its own
//! task and reports back by posting [`RoomCommand::GraceExpired`] to the
//! room's channel.

use std::collections::HashMap;

use rand::SeedableRng;
use rand::rngs::StdRng;
use roomsync_protocol::{
    AppPayload, Entity, EntityId, EntityKind, Recipient, ServerMessage, SessionId,
    StateSnapshot, StateUpdate, UserId,
};
use roomsync_session::{Authenticator, Disconnect, GraceTimer, SessionRegistry};
use roomsync_tick::Ticker;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::state::generate_id;
use crate::{RoomConfig, RoomError, RoomState, Simulation, StateSynchronizer, router};

/// Channel for delivering outbound messages to one client's connection
/// handler. Unbounded so the room never waits on a slow client.
pub type ClientSender = mpsc::UnboundedSender<ServerMessage>;

/// What a successful join or resume hands back to the connection handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTicket {
    pub session_id: SessionId,
    pub reconnect_token: String,
}

/// Commands sent to the room actor.
pub(crate) enum RoomCommand {
    Join {
        user: UserId,
        sender: ClientSender,
        reply: oneshot::Sender<JoinTicket>,
    },

    Resume {
        session_id: SessionId,
        token: String,
        sender: ClientSender,
        reply: oneshot::Sender<Result<JoinTicket, RoomError>>,
    },

    Disconnect {
        session_id: SessionId,
        consented: bool,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },

    /// An application message from a client (fire-and-forget).
    Message { session_id: SessionId, data: String },

    Snapshot {
        reply: oneshot::Sender<StateSnapshot>,
    },

    Info {
        reply: oneshot::Sender<RoomInfo>,
    },

    /// Posted by a grace timer when its deadline passes.
    GraceExpired { session_id: SessionId, epoch: u64 },

    Shutdown,
}

/// Room metadata (not the entity state itself).
#[derive(Debug, Clone, PartialEq)]
pub struct RoomInfo {
    pub room_id: String,
    pub metadata: serde_json::Value,
    /// Connected sessions.
    pub clients: usize,
    /// Sessions waiting for a resume.
    pub awaiting_reconnect: usize,
    pub entities: usize,
    pub state_version: u64,
}

/// Handle to a running room. Cheap to clone.
///
/// The room stops when [`RoomHandle::shutdown`] is called or when every
/// handle has been dropped.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    room_id: String,
    sender: mpsc::Sender<RoomCommand>,
}

impl std::fmt::Debug for RoomCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Join { .. } => "Join",
            Self::Resume { .. } => "Resume",
            Self::Disconnect { .. } => "Disconnect",
            Self::Message { .. } => "Message",
            Self::Snapshot { .. } => "Snapshot",
            Self::Info { .. } => "Info",
            Self::GraceExpired { .. } => "GraceExpired",
            Self::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

impl RoomHandle {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RoomCommand,
    ) -> Result<T, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(make(reply_tx))
            .await
            .map_err(|_| RoomError::Unavailable)?;
        reply_rx.await.map_err(|_| RoomError::Unavailable)
    }

    /// Adds an already-authenticated user as a new session.
    ///
    /// The room sends `Welcome` on `sender` right away and a full state
    /// snapshot on the next patch tick.
    pub async fn join(&self, user: UserId, sender: ClientSender) -> Result<JoinTicket, RoomError> {
        self.request(|reply| RoomCommand::Join {
            user,
            sender,
            reply,
        })
        .await
    }

    /// Authenticates `token` and joins on success.
    ///
    /// Authentication runs in the caller's task, so a slow authenticator
    /// never holds up the room. A rejected token never reaches the room.
    pub async fn admit<A: Authenticator>(
        &self,
        auth: &A,
        token: &str,
        sender: ClientSender,
    ) -> Result<JoinTicket, RoomError> {
        let user = auth.authenticate(token).await?;
        self.join(user, sender).await
    }

    /// Resumes a session that is awaiting reconnection.
    pub async fn resume(
        &self,
        session_id: SessionId,
        token: String,
        sender: ClientSender,
    ) -> Result<JoinTicket, RoomError> {
        self.request(|reply| RoomCommand::Resume {
            session_id,
            token,
            sender,
            reply,
        })
        .await?
    }

    /// Reports that a session's connection ended. `consented` is true for an
    /// explicit leave, false for a network drop.
    pub async fn disconnect(
        &self,
        session_id: SessionId,
        consented: bool,
    ) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::Disconnect {
            session_id,
            consented,
            reply,
        })
        .await?
    }

    /// Delivers an application message (fire-and-forget).
    pub async fn send_message(&self, session_id: SessionId, data: String) -> Result<(), RoomError> {
        self.sender
            .send(RoomCommand::Message { session_id, data })
            .await
            .map_err(|_| RoomError::Unavailable)
    }

    /// The current room state, including changes not yet shipped.
    pub async fn snapshot(&self) -> Result<StateSnapshot, RoomError> {
        self.request(|reply| RoomCommand::Snapshot { reply }).await
    }

    pub async fn info(&self) -> Result<RoomInfo, RoomError> {
        self.request(|reply| RoomCommand::Info { reply }).await
    }

    /// Stops the room. Pending grace timers are cancelled and every client
    /// channel is closed.
    pub async fn shutdown(&self) -> Result<(), RoomError> {
        self.sender
            .send(RoomCommand::Shutdown)
            .await
            .map_err(|_| RoomError::Unavailable)
    }
}

/// The actor's state. Lives inside the spawned task.
struct RoomActor {
    room_id: String,
    config: RoomConfig,
    state: RoomState,
    sync: StateSynchronizer,
    sim: Simulation,
    sessions: SessionRegistry,
    clients: HashMap<SessionId, ClientSender>,
    timers: HashMap<SessionId, GraceTimer>,
    rng: StdRng,
    started: Instant,
    receiver: mpsc::Receiver<RoomCommand>,
    /// Handed to grace timers. Weak so the room still stops when every
    /// `RoomHandle` is gone.
    commands: mpsc::WeakSender<RoomCommand>,
}

impl RoomActor {
    async fn run(mut self) {
        let mut sim_ticker = Ticker::new(self.config.simulation_tick());
        let mut patch_ticker = Ticker::new(self.config.patch_tick());

        tracing::info!(
            room_id = %self.room_id,
            entities = self.state.len(),
            "room started"
        );

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => match cmd {
                    Some(RoomCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle(cmd),
                },
                info = sim_ticker.wait_for_tick() => {
                    self.sim.tick(&mut self.state, info.elapsed);
                    sim_ticker.record_tick_end();
                }
                _ = patch_ticker.wait_for_tick() => {
                    self.broadcast_state();
                    patch_ticker.record_tick_end();
                }
            }
        }

        // Dropping the timers cancels them; dropping the senders closes
        // every client's outbound channel.
        self.timers.clear();
        self.clients.clear();
        tracing::info!(room_id = %self.room_id, "room stopped");
    }

    fn handle(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Join {
                user,
                sender,
                reply,
            } => {
                let _ = reply.send(self.handle_join(user, sender));
            }
            RoomCommand::Resume {
                session_id,
                token,
                sender,
                reply,
            } => {
                let _ = reply.send(self.handle_resume(&session_id, &token, sender));
            }
            RoomCommand::Disconnect {
                session_id,
                consented,
                reply,
            } => {
                let _ = reply.send(self.handle_disconnect(&session_id, consented));
            }
            RoomCommand::Message { session_id, data } => {
                self.handle_message(&session_id, &data);
            }
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(StateSnapshot {
                    version: self.sync.version(),
                    entities: self.state.entities().clone(),
                });
            }
            RoomCommand::Info { reply } => {
                let _ = reply.send(self.info());
            }
            RoomCommand::GraceExpired { session_id, epoch } => {
                self.handle_grace_expired(&session_id, epoch);
            }
            // Handled by the run loop.
            RoomCommand::Shutdown => {}
        }
    }

    fn handle_join(&mut self, user: UserId, sender: ClientSender) -> JoinTicket {
        let state = &self.state;
        let session = self
            .sessions
            .create(user, |id| state.contains(&EntityId::from(id)));
        let ticket = JoinTicket {
            session_id: session.id.clone(),
            reconnect_token: session.reconnect_token.clone(),
        };
        let session_id = ticket.session_id.clone();

        if self
            .state
            .insert(EntityId::from(&session_id), Entity::player())
            .is_some()
        {
            let err = RoomError::InvariantViolation(format!(
                "new session {session_id} replaced an existing entity"
            ));
            tracing::error!(room_id = %self.room_id, error = %err, "join");
        }

        self.attach(&ticket, sender);
        tracing::info!(
            room_id = %self.room_id,
            %session_id,
            clients = self.clients.len(),
            "client joined"
        );
        ticket
    }

    fn handle_resume(
        &mut self,
        session_id: &SessionId,
        token: &str,
        sender: ClientSender,
    ) -> Result<JoinTicket, RoomError> {
        let session = self.sessions.reconnect(session_id, token)?;
        let ticket = JoinTicket {
            session_id: session.id.clone(),
            reconnect_token: session.reconnect_token.clone(),
        };

        if let Some(timer) = self.timers.remove(session_id) {
            timer.cancel();
        }
        self.set_connected(session_id, true);
        self.attach(&ticket, sender);

        tracing::info!(room_id = %self.room_id, %session_id, "client reconnected");
        Ok(ticket)
    }

    fn handle_disconnect(
        &mut self,
        session_id: &SessionId,
        consented: bool,
    ) -> Result<(), RoomError> {
        let outcome = self.sessions.disconnect(session_id, consented)?;
        self.clients.remove(session_id);
        self.sync.forget(session_id);

        match outcome {
            Disconnect::Terminated(_) => {
                self.remove_player(session_id);
                tracing::info!(room_id = %self.room_id, %session_id, consented, "client left");
            }
            Disconnect::Grace { epoch, deadline } => {
                self.set_connected(session_id, false);
                let timer = self.start_grace_timer(session_id.clone(), epoch, deadline);
                self.timers.insert(session_id.clone(), timer);
                tracing::info!(
                    room_id = %self.room_id,
                    %session_id,
                    "client dropped, awaiting reconnect"
                );
            }
        }
        Ok(())
    }

    fn handle_message(&mut self, session_id: &SessionId, data: &str) {
        let active = self.sessions.get(session_id).is_some_and(|s| s.is_active());
        if !active {
            tracing::warn!(
                room_id = %self.room_id,
                %session_id,
                "message from inactive session ignored"
            );
            return;
        }

        let outbound = router::dispatch(&mut self.state, session_id, data, &mut self.rng);
        for (recipient, payload) in outbound {
            self.deliver(recipient, payload);
        }
    }

    fn handle_grace_expired(&mut self, session_id: &SessionId, epoch: u64) {
        if self.sessions.expire(session_id, epoch).is_none() {
            return;
        }
        self.timers.remove(session_id);
        self.remove_player(session_id);
        tracing::info!(room_id = %self.room_id, %session_id, "reconnect window closed");
    }

    /// Registers the client channel, greets it, and queues its snapshot.
    fn attach(&mut self, ticket: &JoinTicket, sender: ClientSender) {
        let welcome = ServerMessage::Welcome {
            session_id: ticket.session_id.clone(),
            reconnect_token: ticket.reconnect_token.clone(),
            server_time: self.server_time(),
        };
        let _ = sender.send(welcome);
        self.clients.insert(ticket.session_id.clone(), sender);
        self.sync.request_snapshot(ticket.session_id.clone());
    }

    fn start_grace_timer(
        &self,
        session_id: SessionId,
        epoch: u64,
        deadline: Instant,
    ) -> GraceTimer {
        let commands = self.commands.clone();
        let expired = session_id.clone();
        GraceTimer::start(session_id, deadline, async move {
            if let Some(tx) = commands.upgrade() {
                let _ = tx
                    .send(RoomCommand::GraceExpired {
                        session_id: expired,
                        epoch,
                    })
                    .await;
            }
        })
    }

    fn set_connected(&mut self, session_id: &SessionId, value: bool) {
        match self.state.get_mut(&EntityId::from(session_id)) {
            Some(Entity {
                kind: EntityKind::Player { connected },
                ..
            }) => *connected = value,
            _ => {
                let err = RoomError::InvariantViolation(format!(
                    "session {session_id} has no player entity"
                ));
                tracing::error!(room_id = %self.room_id, error = %err, "set connected");
            }
        }
    }

    fn remove_player(&mut self, session_id: &SessionId) {
        if self.state.remove(&EntityId::from(session_id)).is_none() {
            let err = RoomError::InvariantViolation(format!(
                "terminated session {session_id} had no entity"
            ));
            tracing::error!(room_id = %self.room_id, error = %err, "remove player");
        }
    }

    fn broadcast_state(&mut self) {
        let frame = self.sync.tick(&mut self.state);

        if let Some(patch) = &frame.patch {
            let msg = ServerMessage::State {
                update: StateUpdate::Patch(patch.clone()),
            };
            for (id, tx) in &self.clients {
                if frame.wants_patch(id) {
                    let _ = tx.send(msg.clone());
                }
            }
        }

        if let Some(snapshot) = frame.snapshot {
            let msg = ServerMessage::State {
                update: StateUpdate::Snapshot(snapshot),
            };
            for id in &frame.snapshot_for {
                if let Some(tx) = self.clients.get(id) {
                    let _ = tx.send(msg.clone());
                }
            }
        }
    }

    fn deliver(&self, recipient: Recipient, payload: AppPayload) {
        match recipient {
            Recipient::All => {
                let msg = ServerMessage::Broadcast { payload };
                for tx in self.clients.values() {
                    let _ = tx.send(msg.clone());
                }
            }
            Recipient::Session(id) => {
                if let Some(tx) = self.clients.get(&id) {
                    let _ = tx.send(ServerMessage::Reply { payload });
                }
            }
        }
    }

    fn info(&self) -> RoomInfo {
        RoomInfo {
            room_id: self.room_id.clone(),
            metadata: self.config.metadata.clone(),
            clients: self.clients.len(),
            awaiting_reconnect: self.timers.len(),
            entities: self.state.len(),
            state_version: self.sync.version(),
        }
    }

    fn server_time(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Creates the room, spawns its enemies, and starts the actor task.
pub fn spawn_room(config: RoomConfig) -> RoomHandle {
    let mut rng = match config.rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let room_id = generate_id(&mut rng);

    let mut state = RoomState::new();
    let sim = Simulation::new();
    sim.populate_enemies(&mut state, config.initial_enemies, &mut rng);

    let (tx, rx) = mpsc::channel(config.command_buffer.max(1));

    let actor = RoomActor {
        room_id: room_id.clone(),
        sessions: SessionRegistry::new(config.reconnect_grace),
        config,
        state,
        sync: StateSynchronizer::new(),
        sim,
        clients: HashMap::new(),
        timers: HashMap::new(),
        rng,
        started: Instant::now(),
        receiver: rx,
        commands: tx.downgrade(),
    };

    tokio::spawn(actor.run());

    RoomHandle {
        room_id,
        sender: tx,
    }
}
