use std::collections::HashSet;

use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Tracks the realtime connection and its room membership. One instance
/// lives at the application root and is passed down to whatever sends or
/// receives; there is deliberately no global connection object.
///
/// Room membership on the server is discarded on disconnect and the
/// broker keeps no backlog, so after every reconnect the rooms must be
/// rejoined and page 0 refetched for any open conversation.
#[derive(Debug)]
pub struct ChatConnection {
    state: ConnectionState,
    joined: HashSet<Uuid>,
    pending_joins: HashSet<Uuid>,
    needs_resync: bool,
    ever_connected: bool,
}

impl Default for ChatConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatConnection {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            joined: HashSet::new(),
            pending_joins: HashSet::new(),
            needs_resync: false,
            ever_connected: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn connecting(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    /// The transport came up. On a reconnect every previously joined room
    /// becomes pending again and a resync is flagged.
    pub fn connected(&mut self) {
        self.state = ConnectionState::Connected;
        if self.ever_connected {
            self.needs_resync = true;
            self.pending_joins.extend(self.joined.drain());
        }
        self.ever_connected = true;
    }

    /// The transport dropped. Server-side room membership is gone; keep
    /// the ids so `connected()` re-queues them.
    pub fn disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.pending_joins.extend(self.joined.drain());
    }

    /// Ask to be in a conversation room. Returns true when the caller
    /// should emit `join_conversation` now; otherwise the join is queued
    /// until the connection is up.
    pub fn request_join(&mut self, conversation_id: Uuid) -> bool {
        if self.joined.contains(&conversation_id) {
            return false;
        }
        if self.state == ConnectionState::Connected {
            self.pending_joins.remove(&conversation_id);
            true
        } else {
            self.pending_joins.insert(conversation_id);
            false
        }
    }

    /// The server acknowledged the join (or the emit was sent on a
    /// fire-and-forget transport).
    pub fn mark_joined(&mut self, conversation_id: Uuid) {
        self.pending_joins.remove(&conversation_id);
        self.joined.insert(conversation_id);
    }

    pub fn leave(&mut self, conversation_id: Uuid) {
        self.joined.remove(&conversation_id);
        self.pending_joins.remove(&conversation_id);
    }

    pub fn is_joined(&self, conversation_id: Uuid) -> bool {
        self.joined.contains(&conversation_id)
    }

    /// Joins queued while offline; call after `connected()` and emit a
    /// `join_conversation` for each.
    pub fn drain_pending_joins(&mut self) -> Vec<Uuid> {
        self.pending_joins.drain().collect()
    }

    /// True exactly once after a reconnect; the caller refetches page 0
    /// for the active conversation when it observes it.
    pub fn take_resync(&mut self) -> bool {
        std::mem::take(&mut self.needs_resync)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_connect_does_not_force_resync() {
        let mut conn = ChatConnection::new();
        conn.connecting();
        conn.connected();
        assert!(!conn.take_resync());
    }

    #[test]
    fn reconnect_requeues_rooms_and_flags_resync() {
        let mut conn = ChatConnection::new();
        conn.connected();

        let room = Uuid::new_v4();
        assert!(conn.request_join(room));
        conn.mark_joined(room);

        conn.disconnected();
        assert!(!conn.is_joined(room));

        conn.connected();
        assert!(conn.take_resync());
        // Resync is observed exactly once
        assert!(!conn.take_resync());

        let pending = conn.drain_pending_joins();
        assert_eq!(pending, vec![room]);
    }

    #[test]
    fn joins_queue_while_offline() {
        let mut conn = ChatConnection::new();
        let room = Uuid::new_v4();

        assert!(!conn.request_join(room));
        conn.connected();
        assert_eq!(conn.drain_pending_joins(), vec![room]);
    }

    #[test]
    fn joining_an_already_joined_room_is_a_noop() {
        let mut conn = ChatConnection::new();
        conn.connected();

        let room = Uuid::new_v4();
        assert!(conn.request_join(room));
        conn.mark_joined(room);
        assert!(!conn.request_join(room));
    }

    #[test]
    fn leave_clears_both_sets() {
        let mut conn = ChatConnection::new();
        let room = Uuid::new_v4();

        conn.request_join(room);
        conn.leave(room);
        conn.connected();
        assert!(conn.drain_pending_joins().is_empty());

        assert!(conn.request_join(room));
        conn.mark_joined(room);
        conn.leave(room);
        assert!(!conn.is_joined(room));
    }
}
