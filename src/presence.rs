use std::collections::HashMap;

use parking_lot::Mutex;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Online { at: OffsetDateTime },
    Offline { at: OffsetDateTime },
}

impl Transition {
    pub fn is_online(&self) -> bool {
        matches!(self, Transition::Online { .. })
    }

    pub fn at(&self) -> OffsetDateTime {
        match *self {
            Transition::Online { at } | Transition::Offline { at } => at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Presence {
    pub connections: usize,
    pub online: bool,
    pub last_seen: OffsetDateTime,
}

#[derive(Default)]
pub struct PresenceTracker {
    users: Mutex<HashMap<i64, Presence>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self, user_id: i64) -> Option<Transition> {
        let now = OffsetDateTime::now_utc();
        let mut users = self.users.lock();
        let presence = users.entry(user_id).or_insert(Presence {
            connections: 0,
            online: false,
            last_seen: now,
        });

        presence.connections += 1;
        if presence.connections == 1 {
            presence.online = true;
            presence.last_seen = now;
            Some(Transition::Online { at: now })
        } else {
            None
        }
    }

    /// Duplicate close signals never push the count below zero.
    pub fn connection_closed(&self, user_id: i64) -> Option<Transition> {
        let now = OffsetDateTime::now_utc();
        let mut users = self.users.lock();
        let presence = users.get_mut(&user_id)?;

        match presence.connections {
            0 => None,
            1 => {
                presence.connections = 0;
                presence.online = false;
                presence.last_seen = now;
                Some(Transition::Offline { at: now })
            }
            _ => {
                presence.connections -= 1;
                None
            }
        }
    }

    pub fn is_online(&self, user_id: i64) -> bool {
        self.users
            .lock()
            .get(&user_id)
            .is_some_and(|presence| presence.online)
    }

    pub fn last_seen(&self, user_id: i64) -> Option<OffsetDateTime> {
        self.users.lock().get(&user_id).map(|presence| presence.last_seen)
    }

    pub fn get(&self, user_id: i64) -> Option<Presence> {
        self.users.lock().get(&user_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn unknown_user_is_offline() {
        let tracker = PresenceTracker::new();
        assert!(!tracker.is_online(1));
        assert!(tracker.last_seen(1).is_none());
    }

    #[test]
    fn first_open_goes_online() {
        let tracker = PresenceTracker::new();
        let transition = tracker.connection_opened(1).unwrap();
        assert!(transition.is_online());
        assert!(tracker.is_online(1));
        assert_eq!(tracker.last_seen(1), Some(transition.at()));
    }

    #[test]
    fn second_session_keeps_user_online() {
        let tracker = PresenceTracker::new();
        assert!(tracker.connection_opened(1).is_some());
        assert!(tracker.connection_opened(1).is_none());

        assert!(tracker.connection_closed(1).is_none());
        assert!(tracker.is_online(1));

        let transition = tracker.connection_closed(1).unwrap();
        assert!(!transition.is_online());
        assert!(!tracker.is_online(1));
    }

    #[test]
    fn duplicate_close_is_ignored() {
        let tracker = PresenceTracker::new();
        tracker.connection_opened(1);
        assert!(tracker.connection_closed(1).is_some());
        assert!(tracker.connection_closed(1).is_none());
        assert!(tracker.connection_closed(2).is_none());

        assert_eq!(tracker.get(1).unwrap().connections, 0);
        assert!(tracker.connection_opened(1).is_some());
    }

    #[test]
    fn last_seen_only_moves_on_transitions() {
        let tracker = PresenceTracker::new();
        let online_at = tracker.connection_opened(1).unwrap().at();
        tracker.connection_opened(1);
        tracker.connection_closed(1);
        assert_eq!(tracker.last_seen(1), Some(online_at));
    }

    #[tokio::test]
    async fn concurrent_sessions_fire_one_transition_each_way() {
        let tracker = Arc::new(PresenceTracker::new());

        let opens: Vec<_> = (0..16)
            .map(|_| {
                let tracker = tracker.clone();
                tokio::spawn(async move { tracker.connection_opened(7) })
            })
            .collect();
        let mut online_events = 0;
        for task in opens {
            online_events += task.await.unwrap().is_some() as usize;
        }
        assert_eq!(online_events, 1);

        let closes: Vec<_> = (0..16)
            .map(|_| {
                let tracker = tracker.clone();
                tokio::spawn(async move { tracker.connection_closed(7) })
            })
            .collect();
        let mut offline_events = 0;
        for task in closes {
            offline_events += task.await.unwrap().is_some() as usize;
        }
        assert_eq!(offline_events, 1);
        assert!(!tracker.is_online(7));
    }
}
