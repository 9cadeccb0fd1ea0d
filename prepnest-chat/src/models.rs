use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::{conversation_members, conversations, message_reads, messages};

// --- Conversation ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = conversations)]
pub struct Conversation {
    pub id: Uuid,
    pub is_group: bool,
    pub group_name: Option<String>,
    pub group_image_url: Option<String>,
    /// Exactly one admin for groups, always a member; null for DMs.
    pub admin_id: Option<Uuid>,
    /// Sorted participant-pair key, DMs only. The unique index on this
    /// column is what makes concurrent get-or-create calls converge.
    #[serde(skip_serializing)]
    pub dm_key: Option<String>,
    pub last_message_id: Option<Uuid>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = conversations)]
pub struct NewConversation {
    pub is_group: bool,
    pub group_name: Option<String>,
    pub group_image_url: Option<String>,
    pub admin_id: Option<Uuid>,
    pub dm_key: Option<String>,
}

// --- ConversationMember ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = conversation_members)]
pub struct ConversationMember {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = conversation_members)]
pub struct NewConversationMember {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
}

// --- Message ---

#[derive(Debug, Queryable, Identifiable, Serialize, Deserialize, Clone)]
#[diesel(table_name = messages)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage {
    /// v7 so insertion order is recoverable from the id alone.
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
}

// --- MessageRead ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = message_reads)]
pub struct MessageRead {
    pub id: Uuid,
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = message_reads)]
pub struct NewMessageRead {
    pub message_id: Uuid,
    pub user_id: Uuid,
}
