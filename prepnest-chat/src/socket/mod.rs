pub mod handlers;

use socketioxide::SocketIo;
use uuid::Uuid;

/// Room carrying message-level events for one conversation. Every member
/// with a live socket sits in it, the sender included; clients dedup by
/// message id.
pub fn conversation_room(conversation_id: Uuid) -> String {
    format!("conversation:{conversation_id}")
}

/// Per-user room for conversation lifecycle events (created, kicked).
/// These must reach users who have not joined the conversation room yet.
pub fn user_room(user_id: Uuid) -> String {
    format!("user:{user_id}")
}

/// Pull all of a user's live sockets out of a conversation room. Every
/// socket joins its user room at connect, so targeting that room reaches
/// each of them. Without this a kicked or departed member would keep
/// receiving new_message events until they reconnect.
pub fn evict_from_conversation(io: &SocketIo, user_id: Uuid, conversation_id: Uuid) {
    if let Err(e) = io
        .to(user_room(user_id))
        .leave(conversation_room(conversation_id))
    {
        tracing::warn!(
            error = %e,
            user_id = %user_id,
            conversation_id = %conversation_id,
            "failed to evict sockets from conversation room"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_names_are_namespaced() {
        let id = Uuid::nil();
        assert_eq!(
            conversation_room(id),
            "conversation:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(user_room(id), "user:00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn conversation_and_user_rooms_never_collide() {
        let id = Uuid::new_v4();
        assert_ne!(conversation_room(id), user_room(id));
    }

    #[test]
    fn evicting_with_no_connected_sockets_is_a_noop() {
        let (_layer, io) = SocketIo::new_layer();
        io.ns("/", |_socket: socketioxide::extract::SocketRef| ());

        // Nobody is in either room; the eviction must simply do nothing.
        evict_from_conversation(&io, Uuid::new_v4(), Uuid::new_v4());
    }
}
