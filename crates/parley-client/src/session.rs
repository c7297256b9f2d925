//! One signed-in chat session: the realtime client adapter.
//!
//! [`ChatClient`] owns the transport, the durable API, the local timelines
//! and the conversation list. Methods can be called directly, or the client
//! can be driven by [`ChatClient::run`], which multiplexes inbound frames,
//! [`ClientHandle`] commands, typing timers and the periodic refresh, and
//! reconnects with backoff when the transport drops.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use parley_shared::protocol::{ChatPayload, ClientEvent, ServerEvent, TypingPayload};
use parley_shared::types::{DeliveryStatus, SenderRole, UserId};
use parley_shared::validation::{ensure_distinct, normalize_body};

use crate::api::{full_history, MessageApi};
use crate::config::ClientConfig;
use crate::conversations::ConversationList;
use crate::error::{ClientError, Result};
use crate::timeline::{DisplayState, LocalMessage, Timeline};
use crate::transport::Transport;
use crate::typing::{TypingAction, TypingEmitter, TypingIndicator};

const COMMAND_BUFFER: usize = 64;
const NOTIFICATION_BUFFER: usize = 256;
const IDLE_WAKEUP: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Joined,
    Disconnected,
}

/// What the UI layer gets told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientNotification {
    /// New realtime message for one of our conversations.
    Message(ChatPayload),
    MessageConfirmed(LocalMessage),
    /// A durable write failed; the echo has been removed from the view.
    PersistenceFailed {
        message: LocalMessage,
        error: String,
    },
    Typing {
        sender_id: UserId,
        sender_role: SenderRole,
        active: bool,
    },
    ConversationsUpdated,
    Connection(ConnectionState),
}

enum ClientCommand {
    SendMessage {
        receiver: UserId,
        text: String,
        reply: oneshot::Sender<Result<LocalMessage>>,
    },
    OpenConversation {
        counterpart: UserId,
        reply: oneshot::Sender<Result<Vec<LocalMessage>>>,
    },
    Keystroke {
        receiver: UserId,
    },
    Shutdown,
}

/// Cloneable remote control for a client inside [`ChatClient::run`].
#[derive(Clone)]
pub struct ClientHandle {
    tx: mpsc::Sender<ClientCommand>,
}

impl ClientHandle {
    pub async fn send_message(&self, receiver: UserId, text: impl Into<String>) -> Result<LocalMessage> {
        let (reply, rx) = oneshot::channel();
        self.send(ClientCommand::SendMessage {
            receiver,
            text: text.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    pub async fn open_conversation(&self, counterpart: UserId) -> Result<Vec<LocalMessage>> {
        let (reply, rx) = oneshot::channel();
        self.send(ClientCommand::OpenConversation { counterpart, reply })
            .await?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    pub async fn keystroke(&self, receiver: UserId) -> Result<()> {
        self.send(ClientCommand::Keystroke { receiver }).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(ClientCommand::Shutdown).await
    }

    async fn send(&self, command: ClientCommand) -> Result<()> {
        self.tx.send(command).await.map_err(|_| ClientError::Closed)
    }
}

enum Step {
    Inbound(Option<Result<ServerEvent>>),
    Command(Option<ClientCommand>),
    Timer,
    Refresh,
}

pub struct ChatClient<A, T> {
    config: ClientConfig,
    me: UserId,
    role: SenderRole,
    api: A,
    transport: T,
    state: ConnectionState,
    timelines: HashMap<UserId, Timeline>,
    active: Option<UserId>,
    /// The open thread got a message the server still counts as unread.
    read_pending: bool,
    conversations: ConversationList,
    emitter: TypingEmitter,
    indicator: TypingIndicator,
    notifications: broadcast::Sender<ClientNotification>,
    command_tx: mpsc::Sender<ClientCommand>,
    commands: Option<mpsc::Receiver<ClientCommand>>,
}

impl<A, T> ChatClient<A, T>
where
    A: MessageApi,
    T: Transport,
{
    /// Build a session. Nothing is dialed until [`connect`](Self::connect).
    pub fn new(config: ClientConfig, me: UserId, role: SenderRole, api: A, transport: T) -> Self {
        let (command_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);
        Self {
            emitter: TypingEmitter::new(config.typing_idle, config.typing_renew),
            indicator: TypingIndicator::new(config.typing_expiry),
            conversations: ConversationList::new(me.clone()),
            config,
            me,
            role,
            api,
            transport,
            state: ConnectionState::Idle,
            timelines: HashMap::new(),
            active: None,
            read_pending: false,
            notifications,
            command_tx,
            commands: Some(commands),
        }
    }

    pub fn handle(&self) -> ClientHandle {
        ClientHandle {
            tx: self.command_tx.clone(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientNotification> {
        self.notifications.subscribe()
    }

    pub fn me(&self) -> &UserId {
        &self.me
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn timeline(&self, counterpart: &UserId) -> Option<&Timeline> {
        self.timelines.get(counterpart)
    }

    pub fn conversations(&self) -> &ConversationList {
        &self.conversations
    }

    pub fn typing_role(&self, sender: &UserId) -> Option<SenderRole> {
        self.indicator.typing_role(sender, Instant::now())
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// Dial, join our room, then resync everything from the durable side.
    pub async fn connect(&mut self) -> Result<()> {
        self.set_state(ConnectionState::Connecting);
        if let Err(e) = self.transport.connect().await {
            self.set_state(ConnectionState::Disconnected);
            return Err(e);
        }
        self.set_state(ConnectionState::Connected);

        if let Err(e) = self
            .transport
            .send(&ClientEvent::JoinRoom(self.me.clone()))
            .await
        {
            self.set_state(ConnectionState::Disconnected);
            return Err(e);
        }
        self.set_state(ConnectionState::Joined);
        info!(user = %self.me.short(), "Joined realtime room");

        if let Err(e) = self.refresh_all().await {
            warn!(error = %e, "Refresh after connect failed");
        }
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<()> {
        let policy = self.config.reconnect;
        let mut attempt = 0;
        loop {
            if !policy.allows(attempt) {
                self.set_state(ConnectionState::Disconnected);
                return Err(ClientError::Transport(format!(
                    "Gave up reconnecting after {attempt} attempts"
                )));
            }

            let delay = policy.delay_for_attempt(attempt);
            tokio::time::sleep(delay).await;
            match self.connect().await {
                Ok(()) => {
                    info!(attempt, "Reconnected");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Reconnect failed");
                    attempt += 1;
                }
            }
        }
    }

    /// Drive the session until [`ClientHandle::shutdown`]. Without a prior
    /// `connect()` this fails unless `auto_connect` is set.
    pub async fn run(&mut self) -> Result<()> {
        let mut commands = self.commands.take().ok_or(ClientError::Closed)?;
        let result = self.run_loop(&mut commands).await;
        self.commands = Some(commands);
        result
    }

    async fn run_loop(&mut self, commands: &mut mpsc::Receiver<ClientCommand>) -> Result<()> {
        if self.state != ConnectionState::Joined {
            if !self.config.auto_connect {
                return Err(ClientError::NotConnected);
            }
            self.reconnect().await?;
        }

        let mut refresh = tokio::time::interval(self.config.refresh_interval);
        refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        refresh.tick().await;

        loop {
            let deadline = tokio::time::Instant::from_std(self.next_deadline());
            let step = tokio::select! {
                inbound = self.transport.next_event() => Step::Inbound(inbound),
                command = commands.recv() => Step::Command(command),
                _ = tokio::time::sleep_until(deadline) => Step::Timer,
                _ = refresh.tick() => Step::Refresh,
            };

            match step {
                Step::Inbound(Some(Ok(event))) => {
                    self.handle_server_event(event);
                    if self.read_pending {
                        self.mark_active_read().await;
                    }
                }
                Step::Inbound(Some(Err(e))) => warn!(error = %e, "Dropping bad realtime frame"),
                Step::Inbound(None) => {
                    warn!(user = %self.me.short(), "Realtime connection lost");
                    self.set_state(ConnectionState::Disconnected);
                    self.reconnect().await?;
                }
                Step::Command(None) | Step::Command(Some(ClientCommand::Shutdown)) => {
                    self.transport.close().await;
                    self.set_state(ConnectionState::Idle);
                    info!(user = %self.me.short(), "Session stopped");
                    return Ok(());
                }
                Step::Command(Some(command)) => self.execute(command).await,
                Step::Timer => self.tick().await,
                Step::Refresh => {
                    if let Err(e) = self.refresh_conversations().await {
                        debug!(error = %e, "Periodic refresh failed");
                    }
                }
            }
        }
    }

    async fn execute(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::SendMessage {
                receiver,
                text,
                reply,
            } => {
                let _ = reply.send(self.send_message(&receiver, &text).await);
            }
            ClientCommand::OpenConversation { counterpart, reply } => {
                let _ = reply.send(self.open_conversation(&counterpart).await);
            }
            ClientCommand::Keystroke { receiver } => self.keystroke(&receiver).await,
            ClientCommand::Shutdown => {}
        }
    }

    fn next_deadline(&self) -> Instant {
        let fallback = Instant::now() + IDLE_WAKEUP;
        [self.emitter.deadline(), self.indicator.next_expiry()]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(fallback)
    }

    // -----------------------------------------------------------------------
    // Messaging
    // -----------------------------------------------------------------------

    /// Optimistic send: local echo and realtime emit first, then the durable
    /// write decides whether the echo is confirmed or rolled back.
    pub async fn send_message(&mut self, receiver: &UserId, text: &str) -> Result<LocalMessage> {
        ensure_distinct(&self.me, receiver)?;
        let body = normalize_body(text, self.config.max_message_chars)?;

        if let Some(action) = self.emitter.on_send() {
            self.emit_typing(action).await;
        }

        let timestamp = Utc::now();
        let echo = self
            .timelines
            .entry(receiver.clone())
            .or_default()
            .push_provisional(self.me.clone(), receiver.clone(), body.clone(), timestamp);
        let viewing = self.is_viewing(receiver);
        self.conversations
            .upsert(receiver, &self.me, &body, timestamp, viewing);

        let payload = ChatPayload {
            sender_id: self.me.clone(),
            receiver_id: receiver.clone(),
            message: body.clone(),
            timestamp,
            status: DeliveryStatus::Sent,
        };
        self.send_realtime(ClientEvent::SendMessage(payload)).await;

        match self.api.send_message(receiver, &body).await {
            Ok(message) => {
                let timeline = self.timelines.entry(receiver.clone()).or_default();
                let confirmed = timeline
                    .confirm(echo.local_id, &message)
                    .unwrap_or_else(|| LocalMessage {
                        server_id: Some(message.id),
                        state: DisplayState::Confirmed,
                        ..echo.clone()
                    });
                self.conversations
                    .confirm_latest(receiver, message.id, message.timestamp);
                debug!(id = %message.id, receiver = %receiver.short(), "Message confirmed");
                self.notify(ClientNotification::MessageConfirmed(confirmed.clone()));
                Ok(confirmed)
            }
            Err(e) => {
                error!(receiver = %receiver.short(), error = %e, "Durable send failed, rolling back");
                let failed = self
                    .timelines
                    .get_mut(receiver)
                    .and_then(|t| t.fail(echo.local_id))
                    .unwrap_or(LocalMessage {
                        state: DisplayState::Failed,
                        ..echo
                    });
                self.notify(ClientNotification::PersistenceFailed {
                    message: failed,
                    error: e.to_string(),
                });
                if let Err(refresh) = self.refresh_conversations().await {
                    debug!(error = %refresh, "Conversation refresh after failure failed");
                }
                Err(e)
            }
        }
    }

    /// Load the full history, mark it read and refresh the list.
    pub async fn open_conversation(&mut self, counterpart: &UserId) -> Result<Vec<LocalMessage>> {
        self.active = Some(counterpart.clone());

        let history = full_history(&self.api, counterpart).await?;
        let timeline = self.timelines.entry(counterpart.clone()).or_default();
        timeline.replace_with_history(history);
        let items = timeline.items().to_vec();

        self.mark_active_read().await;
        if let Err(e) = self.refresh_conversations().await {
            debug!(error = %e, "Conversation refresh failed");
        }
        Ok(items)
    }

    pub fn close_conversation(&mut self) {
        self.active = None;
        self.read_pending = false;
    }

    pub fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::ReceiveMessage(payload) => self.on_receive(payload),
            ServerEvent::Typing(notice) => {
                self.indicator
                    .on_typing(notice.sender_id.clone(), notice.sender_role, Instant::now());
                self.notify(ClientNotification::Typing {
                    sender_id: notice.sender_id,
                    sender_role: notice.sender_role,
                    active: true,
                });
            }
            ServerEvent::StopTyping(notice) => {
                if self.indicator.on_stop(&notice.sender_id) {
                    self.notify(ClientNotification::Typing {
                        sender_id: notice.sender_id,
                        sender_role: notice.sender_role,
                        active: false,
                    });
                }
            }
        }
    }

    fn on_receive(&mut self, payload: ChatPayload) {
        let counterpart = if payload.sender_id == self.me {
            payload.receiver_id.clone()
        } else if payload.receiver_id == self.me {
            payload.sender_id.clone()
        } else {
            warn!(
                sender = %payload.sender_id.short(),
                receiver = %payload.receiver_id.short(),
                "Ignoring message for someone else"
            );
            return;
        };

        let fresh = self
            .timelines
            .entry(counterpart.clone())
            .or_default()
            .apply_remote(&payload);
        if !fresh {
            debug!(counterpart = %counterpart.short(), "Duplicate realtime message");
            return;
        }

        let viewing = self.is_viewing(&counterpart);
        self.conversations.upsert(
            &counterpart,
            &payload.sender_id,
            &payload.message,
            payload.timestamp,
            viewing,
        );
        if payload.sender_id != self.me {
            self.indicator.on_stop(&payload.sender_id);
            if viewing {
                self.read_pending = true;
            }
        }

        self.notify(ClientNotification::Message(payload));
        self.notify(ClientNotification::ConversationsUpdated);
    }

    // -----------------------------------------------------------------------
    // Typing
    // -----------------------------------------------------------------------

    pub async fn keystroke(&mut self, receiver: &UserId) {
        for action in self.emitter.keystroke(receiver, Instant::now()) {
            self.emit_typing(action).await;
        }
    }

    /// Advance typing timers: idle `stopTyping`, expired peer indicators.
    pub async fn tick(&mut self) {
        let now = Instant::now();
        if let Some(action) = self.emitter.tick(now) {
            self.emit_typing(action).await;
        }
        for (sender_id, sender_role) in self.indicator.expire(now) {
            self.notify(ClientNotification::Typing {
                sender_id,
                sender_role,
                active: false,
            });
        }
    }

    async fn emit_typing(&mut self, action: TypingAction) {
        let event = match action {
            TypingAction::Start(receiver_id) => ClientEvent::Typing(TypingPayload {
                receiver_id,
                sender_role: self.role,
            }),
            TypingAction::Stop(receiver_id) => ClientEvent::StopTyping(TypingPayload {
                receiver_id,
                sender_role: self.role,
            }),
        };
        self.send_realtime(event).await;
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn send_realtime(&mut self, event: ClientEvent) {
        if self.state != ConnectionState::Joined {
            debug!(event = event.name(), "Not joined, skipping realtime emit");
            return;
        }
        if let Err(e) = self.transport.send(&event).await {
            debug!(event = event.name(), error = %e, "Realtime emit failed");
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Replace the list from the server. The open thread is never left
    /// showing unread: if the server still counts some (a live message we
    /// saw before it was stored, say), it is marked read again.
    pub async fn refresh_conversations(&mut self) -> Result<()> {
        let summaries = self.api.list_for_user().await?;
        self.conversations.replace(summaries);
        let stale_unread = self
            .active
            .as_ref()
            .and_then(|active| self.conversations.get(active))
            .is_some_and(|entry| entry.unread_count > 0);
        if stale_unread || self.read_pending {
            self.mark_active_read().await;
        }
        self.notify(ClientNotification::ConversationsUpdated);
        Ok(())
    }

    async fn mark_active_read(&mut self) {
        self.read_pending = false;
        let Some(counterpart) = self.active.clone() else {
            return;
        };
        match self.api.mark_read(&counterpart).await {
            Ok(updated) => {
                self.conversations.clear_unread(&counterpart);
                debug!(counterpart = %counterpart.short(), updated, "Marked conversation read");
            }
            Err(e) => {
                self.read_pending = true;
                warn!(counterpart = %counterpart.short(), error = %e, "Mark read failed");
            }
        }
    }

    async fn refresh_all(&mut self) -> Result<()> {
        self.refresh_conversations().await?;
        if let Some(counterpart) = self.active.clone() {
            let history = full_history(&self.api, &counterpart).await?;
            self.timelines
                .entry(counterpart)
                .or_default()
                .replace_with_history(history);
        }
        Ok(())
    }

    fn is_viewing(&self, counterpart: &UserId) -> bool {
        self.active.as_ref() == Some(counterpart)
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "Connection state changed");
            self.state = state;
            self.notify(ClientNotification::Connection(state));
        }
    }

    fn notify(&self, notification: ClientNotification) {
        let _ = self.notifications.send(notification);
    }
}
