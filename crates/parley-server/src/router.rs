//! Realtime event router.
//!
//! A single tokio task owns the [`PresenceRegistry`] and every connection's
//! outbound queue. Gateways talk to it through a cloneable [`RouterHandle`]
//! (commands over an mpsc channel, replies over oneshot), so registry
//! mutations are serialized without a lock and no handler ever waits on
//! storage.
//!
//! Connection lifecycle: `connect` registers an unjoined connection for the
//! identity the handshake authenticated, `joinRoom` puts it in that
//! identity's room, `disconnect` always runs `leave`. A connection can only
//! ever join its own room.
//! Only joined connections are delivery targets. Fan-out uses `try_send`,
//! so a slow or vanished consumer loses that event and nobody else waits.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use parley_shared::constants::{MAX_CONNECTIONS_PER_USER, MAX_MESSAGE_CHARS};
use parley_shared::protocol::{ChatPayload, ClientEvent, ServerEvent, TypingNotice, TypingPayload};
use parley_shared::types::{DeliveryStatus, UserId};
use parley_shared::validation::{ensure_distinct, normalize_body};

use crate::error::ServerError;
use crate::presence::{ConnectionId, JoinOutcome, PresenceRegistry};
use crate::rate_limit::TokenBucket;

const COMMAND_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub max_connections_per_user: usize,
    pub event_rate_per_sec: f64,
    pub event_burst: f64,
    pub max_message_chars: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_connections_per_user: MAX_CONNECTIONS_PER_USER,
            event_rate_per_sec: 20.0,
            event_burst: 40.0,
            max_message_chars: MAX_MESSAGE_CHARS,
        }
    }
}

/// Presence snapshot for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceInfo {
    pub online: bool,
    pub connections: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouterStats {
    /// Identities with at least one joined connection.
    pub online_users: usize,
    /// Joined connections.
    pub joined_connections: usize,
    /// Open connections, joined or not.
    pub open_connections: usize,
}

enum RouterCommand {
    Connect {
        identity: UserId,
        outbound: mpsc::Sender<ServerEvent>,
        reply: oneshot::Sender<ConnectionId>,
    },
    Inbound {
        connection: ConnectionId,
        event: ClientEvent,
    },
    Disconnect {
        connection: ConnectionId,
    },
    Presence {
        user: UserId,
        reply: oneshot::Sender<PresenceInfo>,
    },
    Stats {
        reply: oneshot::Sender<RouterStats>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConnectionState {
    Connected,
    Joined(UserId),
}

struct ConnectionEntry {
    identity: UserId,
    outbound: mpsc::Sender<ServerEvent>,
    state: ConnectionState,
    bucket: TokenBucket,
}

/// Cloneable front door to the router task.
#[derive(Clone)]
pub struct RouterHandle {
    tx: mpsc::Sender<RouterCommand>,
}

impl RouterHandle {
    /// Register a new connection authenticated as `identity`. Events for it
    /// are pushed into `outbound`; the router dropping its sender means the
    /// connection was closed.
    pub async fn connect(
        &self,
        identity: UserId,
        outbound: mpsc::Sender<ServerEvent>,
    ) -> Result<ConnectionId, ServerError> {
        let (reply, rx) = oneshot::channel();
        self.send(RouterCommand::Connect {
            identity,
            outbound,
            reply,
        })
        .await?;
        rx.await.map_err(|_| ServerError::RouterUnavailable)
    }

    pub async fn dispatch(
        &self,
        connection: ConnectionId,
        event: ClientEvent,
    ) -> Result<(), ServerError> {
        self.send(RouterCommand::Inbound { connection, event }).await
    }

    pub async fn disconnect(&self, connection: ConnectionId) {
        if self
            .send(RouterCommand::Disconnect { connection })
            .await
            .is_err()
        {
            debug!(connection = %connection, "Router gone before disconnect");
        }
    }

    pub async fn presence(&self, user: UserId) -> Result<PresenceInfo, ServerError> {
        let (reply, rx) = oneshot::channel();
        self.send(RouterCommand::Presence { user, reply }).await?;
        rx.await.map_err(|_| ServerError::RouterUnavailable)
    }

    pub async fn stats(&self) -> Result<RouterStats, ServerError> {
        let (reply, rx) = oneshot::channel();
        self.send(RouterCommand::Stats { reply }).await?;
        rx.await.map_err(|_| ServerError::RouterUnavailable)
    }

    async fn send(&self, command: RouterCommand) -> Result<(), ServerError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| ServerError::RouterUnavailable)
    }
}

pub struct EventRouter {
    config: RouterConfig,
    registry: PresenceRegistry,
    connections: HashMap<ConnectionId, ConnectionEntry>,
    next_id: u64,
}

impl EventRouter {
    /// Start the router task and hand back its handle. The task exits once
    /// every handle has been dropped.
    pub fn spawn(config: RouterConfig) -> RouterHandle {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let router = EventRouter {
            config,
            registry: PresenceRegistry::new(),
            connections: HashMap::new(),
            next_id: 1,
        };
        tokio::spawn(router.run(rx));
        RouterHandle { tx }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<RouterCommand>) {
        info!(
            max_connections_per_user = self.config.max_connections_per_user,
            "Event router started"
        );
        while let Some(command) = rx.recv().await {
            self.handle(command);
        }
        info!("Event router stopped");
    }

    fn handle(&mut self, command: RouterCommand) {
        match command {
            RouterCommand::Connect {
                identity,
                outbound,
                reply,
            } => {
                let connection = self.register(identity, outbound);
                if reply.send(connection).is_err() {
                    // Gateway went away before learning its id.
                    self.drop_connection(connection);
                }
            }
            RouterCommand::Inbound { connection, event } => self.on_event(connection, event),
            RouterCommand::Disconnect { connection } => self.drop_connection(connection),
            RouterCommand::Presence { user, reply } => {
                let _ = reply.send(PresenceInfo {
                    online: self.registry.is_online(&user),
                    connections: self.registry.connection_count(&user),
                });
            }
            RouterCommand::Stats { reply } => {
                let _ = reply.send(RouterStats {
                    online_users: self.registry.online_users(),
                    joined_connections: self.registry.total_connections(),
                    open_connections: self.connections.len(),
                });
            }
        }
    }

    fn register(&mut self, identity: UserId, outbound: mpsc::Sender<ServerEvent>) -> ConnectionId {
        let connection = ConnectionId(self.next_id);
        self.next_id += 1;
        self.connections.insert(
            connection,
            ConnectionEntry {
                identity,
                outbound,
                state: ConnectionState::Connected,
                bucket: TokenBucket::new(self.config.event_burst),
            },
        );
        debug!(connection = %connection, open = self.connections.len(), "Connection registered");
        connection
    }

    fn drop_connection(&mut self, connection: ConnectionId) {
        if let Some(session) = self.registry.leave(connection) {
            debug!(
                user = %session.user.short(),
                connection = %session.connection,
                online_secs = (Utc::now() - session.joined_at).num_seconds(),
                "Session ended"
            );
        }
        if self.connections.remove(&connection).is_some() {
            debug!(connection = %connection, open = self.connections.len(), "Connection closed");
        }
    }

    fn on_event(&mut self, connection: ConnectionId, event: ClientEvent) {
        let (rate, burst) = (self.config.event_rate_per_sec, self.config.event_burst);
        let Some(entry) = self.connections.get_mut(&connection) else {
            debug!(connection = %connection, event = event.name(), "Event from unknown connection");
            return;
        };

        if !entry.bucket.try_consume(rate, burst) {
            warn!(connection = %connection, event = event.name(), "Event rate exceeded, dropping");
            return;
        }

        let ConnectionState::Joined(user) = entry.state.clone() else {
            match event {
                ClientEvent::JoinRoom(user) => self.join(connection, user),
                other => {
                    debug!(connection = %connection, event = other.name(), "Event before join, dropping");
                }
            }
            return;
        };

        match event {
            ClientEvent::JoinRoom(requested) => self.join(connection, requested),
            ClientEvent::SendMessage(payload) => self.on_send(connection, user, payload),
            ClientEvent::Typing(payload) => {
                self.on_typing(connection, user, payload, ServerEvent::Typing)
            }
            ClientEvent::StopTyping(payload) => {
                self.on_typing(connection, user, payload, ServerEvent::StopTyping)
            }
        }
    }

    fn join(&mut self, connection: ConnectionId, user: UserId) {
        let Some(identity) = self.connections.get(&connection).map(|e| &e.identity) else {
            return;
        };
        if identity != &user {
            warn!(
                connection = %connection,
                authenticated_as = %identity.short(),
                requested = %user.short(),
                "Join for another identity rejected"
            );
            return;
        }

        let already_joined = self.registry.user_of(connection).is_some();
        if !already_joined
            && self.registry.connection_count(&user) >= self.config.max_connections_per_user
        {
            warn!(
                user = %user.short(),
                connection = %connection,
                limit = self.config.max_connections_per_user,
                "Connection limit reached, closing connection"
            );
            self.drop_connection(connection);
            return;
        }

        match self.registry.join(user.clone(), connection) {
            JoinOutcome::Joined => {
                if let Some(entry) = self.connections.get_mut(&connection) {
                    entry.state = ConnectionState::Joined(user);
                }
            }
            JoinOutcome::AlreadyJoined => {
                debug!(user = %user.short(), connection = %connection, "Duplicate join ignored");
            }
            JoinOutcome::BoundToOther(owner) => {
                warn!(
                    connection = %connection,
                    bound_to = %owner.short(),
                    requested = %user.short(),
                    "Rejecting re-join as a different identity"
                );
            }
        }
    }

    fn on_send(&mut self, origin: ConnectionId, user: UserId, payload: ChatPayload) {
        if payload.sender_id != user {
            warn!(
                connection = %origin,
                joined_as = %user.short(),
                claimed = %payload.sender_id.short(),
                "Spoofed sendMessage dropped"
            );
            return;
        }

        let valid = ensure_distinct(&payload.sender_id, &payload.receiver_id)
            .and_then(|_| normalize_body(&payload.message, self.config.max_message_chars));
        if let Err(e) = valid {
            debug!(connection = %origin, error = %e, "Invalid sendMessage dropped");
            return;
        }

        let receiver = payload.receiver_id.clone();
        let event = ServerEvent::ReceiveMessage(ChatPayload {
            status: DeliveryStatus::Delivered,
            ..payload
        });

        let delivered = self.fan_out(&self.registry.route(&receiver), &event);
        if delivered == 0 {
            debug!(
                sender = %user.short(),
                receiver = %receiver.short(),
                "Receiver offline, realtime delivery skipped"
            );
        }

        // Mirror to the sender's other devices.
        let mut siblings = self.registry.route(&user);
        siblings.remove(&origin);
        self.fan_out(&siblings, &event);
    }

    fn on_typing(
        &mut self,
        origin: ConnectionId,
        user: UserId,
        payload: TypingPayload,
        wrap: fn(TypingNotice) -> ServerEvent,
    ) {
        if payload.receiver_id == user {
            debug!(connection = %origin, "Typing notice to self dropped");
            return;
        }

        let event = wrap(TypingNotice {
            sender_role: payload.sender_role,
            sender_id: user,
        });
        self.fan_out(&self.registry.route(&payload.receiver_id), &event);
    }

    /// Push `event` to each target; returns how many queues accepted it.
    fn fan_out(&self, targets: &HashSet<ConnectionId>, event: &ServerEvent) -> usize {
        let mut delivered = 0;
        for connection in targets {
            let Some(entry) = self.connections.get(connection) else {
                continue;
            };
            match entry.outbound.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(
                        target = %connection,
                        event = event.name(),
                        "Dropping event for slow connection"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(target = %connection, "Outbound queue closed");
                }
            }
        }
        delivered
    }
}
