use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// RabbitMQ event envelope wrapping all domain events.
///
/// Routing key format: `prepnest.{domain}.{entity}.{action}`
/// Example: `prepnest.chat.message.sent`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<T: Serialize> {
    pub id: Uuid,
    pub source: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub data: T,
}

impl<T: Serialize> Event<T> {
    pub fn new(source: impl Into<String>, event_type: impl Into<String>, data: T) -> Self {
        Self {
            id: Uuid::now_v7(),
            source: source.into(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            correlation_id: None,
            user_id: None,
            data,
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// RabbitMQ routing keys
pub mod routing_keys {
    // Auth events
    pub const AUTH_USER_REGISTERED: &str = "prepnest.auth.user.registered";
    pub const AUTH_USER_DELETED: &str = "prepnest.auth.user.deleted";

    // Chat events
    pub const CHAT_MESSAGE_SENT: &str = "prepnest.chat.message.sent";
    pub const CHAT_MESSAGE_DELETED: &str = "prepnest.chat.message.deleted";
    pub const CHAT_GROUP_CREATED: &str = "prepnest.chat.group.created";
}

/// Common event data payloads
pub mod payloads {
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct UserRegistered {
        pub user_id: Uuid,
        pub email: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct UserDeleted {
        pub user_id: Uuid,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct MessageSent {
        pub message_id: Uuid,
        pub conversation_id: Uuid,
        pub sender_id: Uuid,
        pub content_preview: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct MessageDeleted {
        pub message_id: Uuid,
        pub conversation_id: Uuid,
        pub sender_id: Uuid,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct GroupCreated {
        pub conversation_id: Uuid,
        pub admin_id: Uuid,
        pub member_ids: Vec<Uuid>,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_with_routing_metadata() {
        let event = Event::new(
            "prepnest-chat",
            routing_keys::CHAT_MESSAGE_SENT,
            payloads::MessageSent {
                message_id: Uuid::new_v4(),
                conversation_id: Uuid::new_v4(),
                sender_id: Uuid::new_v4(),
                content_preview: "hi".into(),
            },
        )
        .with_user(Uuid::new_v4());

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["source"], "prepnest-chat");
        assert_eq!(json["event_type"], "prepnest.chat.message.sent");
        assert!(json["user_id"].is_string());
        assert_eq!(json["data"]["content_preview"], "hi");
    }
}
