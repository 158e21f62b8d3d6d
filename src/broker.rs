use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::RelayError;
use crate::protocol::{Frame, Outbound};

#[derive(Debug)]
pub struct SessionHandle {
    pub id: Uuid,
    pub username: String,
    tx: broadcast::Sender<Frame>,
}

impl SessionHandle {
    pub fn new(id: Uuid, username: String, capacity: usize) -> (Arc<Self>, OutboundQueue) {
        let (tx, rx) = broadcast::channel(capacity.max(1));
        (
            Arc::new(SessionHandle { id, username, tx }),
            OutboundQueue { session_id: id, rx },
        )
    }

    /// Never waits. A full queue drops its oldest frame.
    pub fn deliver(&self, frame: Frame) -> Result<(), RelayError> {
        self.tx
            .send(frame)
            .map(|_| ())
            .map_err(|_| RelayError::StaleRecipient)
    }
}

#[derive(Debug)]
pub struct OutboundQueue {
    session_id: Uuid,
    rx: broadcast::Receiver<Frame>,
}

impl OutboundQueue {
    /// Next frame, or `None` once the session handle has been dropped.
    pub async fn recv(&mut self) -> Option<Frame> {
        loop {
            match self.rx.recv().await {
                Ok(frame) => return Some(frame),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(session_id = %self.session_id, skipped, "slow consumer, dropped oldest frames");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<Frame> {
        loop {
            match self.rx.try_recv() {
                Ok(frame) => return Some(frame),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(session_id = %self.session_id, skipped, "slow consumer, dropped oldest frames");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

#[derive(Default)]
struct Registry {
    rooms: HashMap<String, HashMap<Uuid, Arc<SessionHandle>>>,
    placement: HashMap<Uuid, String>,
}

#[derive(Default)]
pub struct RoomBroker {
    registry: RwLock<Registry>,
}

impl RoomBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, room: &str, session: Arc<SessionHandle>) {
        let mut registry = self.registry.write();
        let id = session.id;

        if let Some(previous) = registry.placement.insert(id, room.to_owned()) {
            if previous != room {
                Self::remove_member(&mut registry.rooms, &previous, id);
            }
        }
        registry
            .rooms
            .entry(room.to_owned())
            .or_default()
            .insert(id, session);

        debug!(room, session_id = %id, "joined room");
    }

    pub fn leave(&self, room: &str, session_id: Uuid) -> bool {
        let mut registry = self.registry.write();
        if registry.placement.get(&session_id).map(String::as_str) == Some(room) {
            registry.placement.remove(&session_id);
        }
        let removed = Self::remove_member(&mut registry.rooms, room, session_id);

        debug!(room, session_id = %session_id, removed, "left room");
        removed
    }

    fn remove_member(
        rooms: &mut HashMap<String, HashMap<Uuid, Arc<SessionHandle>>>,
        room: &str,
        session_id: Uuid,
    ) -> bool {
        let Some(members) = rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(&session_id).is_some();
        if members.is_empty() {
            rooms.remove(room);
        }
        removed
    }

    /// Delivers to a snapshot of the members taken before sending; members
    /// gone by delivery time are skipped. Returns how many queued the frame.
    pub fn send(&self, room: &str, envelope: &Outbound, exclude: Option<Uuid>) -> usize {
        let frame = match envelope.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(room, error = %e, "failed to serialize envelope");
                return 0;
            }
        };

        let recipients: Vec<Arc<SessionHandle>> = self
            .members(room)
            .into_iter()
            .filter(|member| Some(member.id) != exclude)
            .collect();

        let mut delivered = 0;
        for member in &recipients {
            match member.deliver(Arc::clone(&frame)) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(room, session_id = %member.id, error = %e, "dropping frame"),
            }
        }
        debug!(room, recipients = recipients.len(), delivered, "broadcast");
        delivered
    }

    pub fn members(&self, room: &str) -> Vec<Arc<SessionHandle>> {
        self.registry
            .read()
            .rooms
            .get(room)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn usernames(&self, room: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .members(room)
            .into_iter()
            .map(|member| member.username.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn room_count(&self) -> usize {
        self.registry.read().rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    fn handle(name: &str) -> (Arc<SessionHandle>, OutboundQueue) {
        SessionHandle::new(Uuid::now_v7(), name.to_owned(), 8)
    }

    fn typing(name: &str) -> Outbound {
        Outbound::Typing {
            username: name.to_owned(),
            is_typing: true,
        }
    }

    fn tag(frame: &Frame) -> String {
        let value: Value = serde_json::from_str(frame).unwrap();
        value["type"].as_str().unwrap().to_owned()
    }

    #[test]
    fn join_and_leave_track_membership() {
        let broker = RoomBroker::new();
        let (a, _qa) = handle("a");
        let (b, _qb) = handle("b");

        broker.join("general", a.clone());
        broker.join("general", b.clone());
        assert_eq!(broker.members("general").len(), 2);

        assert!(broker.leave("general", a.id));
        assert!(!broker.leave("general", a.id));
        assert_eq!(broker.usernames("general"), vec!["b".to_owned()]);

        broker.leave("general", b.id);
        assert_eq!(broker.room_count(), 0);
    }

    #[test]
    fn session_is_in_one_room_at_a_time() {
        let broker = RoomBroker::new();
        let (a, _qa) = handle("a");

        broker.join("general", a.clone());
        broker.join("random", a.clone());

        assert!(broker.members("general").is_empty());
        assert_eq!(broker.members("random").len(), 1);
        assert!(broker.leave("random", a.id));
        assert_eq!(broker.room_count(), 0);
    }

    #[test]
    fn send_reaches_members_of_that_room_only() {
        let broker = RoomBroker::new();
        let (a, mut qa) = handle("a");
        let (b, mut qb) = handle("b");
        let (c, mut qc) = handle("c");
        broker.join("general", a);
        broker.join("general", b);
        broker.join("random", c);

        let delivered = broker.send("general", &typing("x"), None);

        assert_eq!(delivered, 2);
        assert_eq!(tag(&qa.try_recv().unwrap()), "typing");
        assert_eq!(tag(&qb.try_recv().unwrap()), "typing");
        assert!(qc.try_recv().is_none());
    }

    #[test]
    fn send_skips_excluded_session() {
        let broker = RoomBroker::new();
        let (a, mut qa) = handle("a");
        let (b, mut qb) = handle("b");
        broker.join("general", a.clone());
        broker.join("general", b);

        assert_eq!(broker.send("general", &typing("a"), Some(a.id)), 1);
        assert!(qa.try_recv().is_none());
        assert!(qb.try_recv().is_some());
    }

    #[test]
    fn stale_recipient_is_dropped_silently() {
        let broker = RoomBroker::new();
        let (a, qa) = handle("a");
        let (b, mut qb) = handle("b");
        broker.join("general", a);
        broker.join("general", b);
        drop(qa);

        assert_eq!(broker.send("general", &typing("x"), None), 1);
        assert!(qb.try_recv().is_some());
    }

    #[test]
    fn send_to_empty_room_is_noop() {
        let broker = RoomBroker::new();
        assert_eq!(broker.send("nobody", &typing("x"), None), 0);
    }

    #[test]
    fn full_queue_drops_oldest() {
        let broker = RoomBroker::new();
        let (a, mut qa) = SessionHandle::new(Uuid::now_v7(), "a".into(), 2);
        broker.join("general", a);

        for name in ["one", "two", "three"] {
            broker.send("general", &Outbound::UserJoin { username: name.into() }, None);
        }

        let names: Vec<String> = std::iter::from_fn(|| qa.try_recv())
            .map(|frame| {
                let value: Value = serde_json::from_str(&frame).unwrap();
                value["username"].as_str().unwrap().to_owned()
            })
            .collect();
        assert_eq!(names, vec!["two".to_owned(), "three".to_owned()]);
    }

    #[tokio::test]
    async fn concurrent_joins_and_sends() {
        let broker = Arc::new(RoomBroker::new());
        let mut tasks = Vec::new();
        for i in 0..32 {
            let broker = broker.clone();
            tasks.push(tokio::spawn(async move {
                let (h, _q) = handle(&format!("user{i}"));
                broker.join("general", h.clone());
                broker.send("general", &typing("x"), Some(h.id));
                broker.leave("general", h.id);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(broker.room_count(), 0);
    }
}
