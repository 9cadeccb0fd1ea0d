use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message as delivered by the REST API and the `new_message` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read_by: Vec<Uuid>,
}

/// Roster entry; enough to render the conversation list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub is_group: bool,
    pub group_name: Option<String>,
    pub group_image_url: Option<String>,
    pub admin_id: Option<Uuid>,
    pub last_message_at: Option<DateTime<Utc>>,
}
