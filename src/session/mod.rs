mod socket;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::{OutboundQueue, RoomBroker, SessionHandle};
use crate::error::RelayError;
use crate::presence::{PresenceTracker, Transition};
use crate::protocol::{Inbound, Outbound};
use crate::store::{Identity, MessageStore, ReadOutcome, Room};

pub use socket::drive;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ClientClosed,
    StreamEnded,
    TransportError,
    WriterStopped,
    IdleTimeout,
    Dropped,
}

#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: Uuid,
    pub room: Room,
    pub identity: Identity,
}

#[derive(Clone)]
pub struct Relay {
    pub broker: Arc<RoomBroker>,
    pub presence: Arc<PresenceTracker>,
    pub messages: Arc<dyn MessageStore>,
    pub queue_capacity: usize,
    pub persistence_timeout: Duration,
}

impl Relay {
    pub fn new(messages: Arc<dyn MessageStore>, queue_capacity: usize, persistence_timeout: Duration) -> Self {
        Self {
            broker: Arc::new(RoomBroker::new()),
            presence: Arc::new(PresenceTracker::new()),
            messages,
            queue_capacity,
            persistence_timeout,
        }
    }

    pub async fn connect(
        &self,
        room: Room,
        identity: Option<Identity>,
    ) -> Result<(ConnectionSession, OutboundQueue), RelayError> {
        let Some(identity) = identity else {
            warn!(room = %room.slug, "rejecting unauthenticated connection");
            return Err(RelayError::AuthRequired);
        };

        let session_id = Uuid::now_v7();
        let (handle, queue) =
            SessionHandle::new(session_id, identity.username.clone(), self.queue_capacity);
        let session = ConnectionSession {
            ctx: SessionContext {
                session_id,
                room,
                identity,
            },
            handle,
            relay: self.clone(),
            state: Mutex::new(SessionState::Connecting),
        };

        let ctx = &session.ctx;
        self.broker.join(&ctx.room.slug, session.handle.clone());
        let transition = self.presence.connection_opened(ctx.identity.user_id);
        *session.state.lock() = SessionState::Open;
        info!(session_id = %session_id, room = %ctx.room.slug, user = %ctx.identity.username, "session open");

        self.broker.send(
            &ctx.room.slug,
            &Outbound::UserJoin {
                username: ctx.identity.username.clone(),
            },
            None,
        );
        if let Some(transition) = transition {
            session.persist_presence(transition).await;
        }

        Ok((session, queue))
    }
}

pub struct ConnectionSession {
    ctx: SessionContext,
    handle: Arc<SessionHandle>,
    relay: Relay,
    state: Mutex<SessionState>,
}

impl ConnectionSession {
    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn id(&self) -> Uuid {
        self.ctx.session_id
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Errors are scoped to this frame; the session stays open.
    pub async fn handle_frame(&self, raw: &str) -> Result<(), RelayError> {
        if self.state() != SessionState::Open {
            debug!(session_id = %self.id(), "frame after close ignored");
            return Ok(());
        }

        let inbound = match Inbound::parse(raw) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(session_id = %self.id(), error = %e, "dropping frame");
                return Err(e);
            }
        };
        debug!(session_id = %self.id(), tag = inbound.tag(), "frame");

        match inbound {
            Inbound::Message { message, username } => self.on_message(message, &username).await,
            Inbound::Typing { is_typing, .. } => {
                self.on_typing(is_typing);
                Ok(())
            }
            Inbound::ReadReceipt { message_id } => self.on_read_receipt(message_id).await,
        }
    }

    async fn on_message(&self, content: String, claimed: &str) -> Result<(), RelayError> {
        let SessionContext { room, identity, .. } = &self.ctx;
        if claimed != identity.username {
            warn!(session_id = %self.id(), claimed, "ignoring client-supplied username");
        }

        let stored = match self
            .bounded(self.relay.messages.save_message(room.id, identity, &content))
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                warn!(session_id = %self.id(), error = %e, "message not persisted, not relaying");
                self.reply(&Outbound::error(&e));
                return Err(e);
            }
        };

        self.relay.broker.send(
            &room.slug,
            &Outbound::Message {
                message: content,
                username: identity.username.clone(),
                timestamp: stored.timestamp,
                message_id: stored.id,
            },
            None,
        );
        Ok(())
    }

    fn on_typing(&self, is_typing: bool) {
        self.relay.broker.send(
            &self.ctx.room.slug,
            &Outbound::Typing {
                username: self.ctx.identity.username.clone(),
                is_typing,
            },
            Some(self.id()),
        );
    }

    async fn on_read_receipt(&self, message_id: i64) -> Result<(), RelayError> {
        let user_id = self.ctx.identity.user_id;
        match self
            .bounded(self.relay.messages.mark_read(message_id, user_id))
            .await
        {
            Ok(ReadOutcome::MissingMessage) => {
                debug!(session_id = %self.id(), message_id, "read receipt for unknown message");
                Ok(())
            }
            Ok(outcome) => {
                debug!(session_id = %self.id(), message_id, ?outcome, "read receipt");
                Ok(())
            }
            Err(e) => {
                warn!(session_id = %self.id(), message_id, error = %e, "read receipt not persisted");
                self.reply(&Outbound::error(&e));
                Err(e)
            }
        }
    }

    fn reply(&self, envelope: &Outbound) {
        match envelope.to_frame() {
            Ok(frame) => {
                if let Err(e) = self.handle.deliver(frame) {
                    debug!(session_id = %self.id(), error = %e, "reply dropped");
                }
            }
            Err(e) => warn!(session_id = %self.id(), error = %e, "failed to serialize reply"),
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T, RelayError> {
        match tokio::time::timeout(self.relay.persistence_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(RelayError::Persistence(e)),
            Err(_) => Err(RelayError::PersistenceTimeout),
        }
    }

    async fn persist_presence(&self, transition: Transition) {
        let user_id = self.ctx.identity.user_id;
        let result = self
            .bounded(
                self.relay
                    .messages
                    .upsert_profile(user_id, transition.is_online(), transition.at()),
            )
            .await;
        if let Err(e) = result {
            warn!(user_id, error = %e, "failed to persist presence");
        }
    }

    /// Only the first call has effects. `user_leave` goes out only when this
    /// was the user's last connection.
    pub fn close(&self, reason: DisconnectReason) -> Option<Transition> {
        {
            let mut state = self.state.lock();
            match *state {
                SessionState::Closing | SessionState::Closed => return None,
                SessionState::Connecting | SessionState::Open => *state = SessionState::Closing,
            }
        }

        let SessionContext {
            session_id,
            room,
            identity,
        } = &self.ctx;
        self.relay.broker.leave(&room.slug, *session_id);
        let transition = self.relay.presence.connection_closed(identity.user_id);
        if transition.is_some() {
            self.relay.broker.send(
                &room.slug,
                &Outbound::UserLeave {
                    username: identity.username.clone(),
                },
                None,
            );
        }

        *self.state.lock() = SessionState::Closed;
        info!(session_id = %session_id, room = %room.slug, user = %identity.username, ?reason, "session closed");
        transition
    }

    pub async fn disconnect(&self, reason: DisconnectReason) {
        if let Some(transition) = self.close(reason) {
            self.persist_presence(transition).await;
        }
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.close(DisconnectReason::Dropped);
    }
}
