use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use diesel::dsl::{count_star, exists, not};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use prepnest_shared::errors::{AppError, AppResult, ErrorCode};
use prepnest_shared::types::api::ApiResponse;
use prepnest_shared::types::auth::AuthUser;
use prepnest_shared::types::pagination::{Paginated, PaginationParams};

use crate::events::publisher;
use crate::models::{Conversation, Message, NewMessage, NewMessageRead};
use crate::routes::conversations::is_member;
use crate::schema::{conversation_members, conversations, message_reads, messages};
use crate::socket::conversation_room;
use crate::AppState;

// --- Request DTOs ---

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub conversation_id: Uuid,
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
}

// --- Response DTOs ---

#[derive(Debug, Serialize)]
pub struct MessageWithReads {
    #[serde(flatten)]
    pub message: Message,
    pub read_by: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub total_unread: i64,
}

// --- Helpers ---

const MEDIA_TYPES: &[&str] = &["image", "video", "file"];

/// A message must carry text or media; whitespace-only text counts as empty.
fn body_is_empty(content: Option<&str>, media_url: Option<&str>) -> bool {
    content.map_or(true, |c| c.trim().is_empty())
        && media_url.map_or(true, |u| u.trim().is_empty())
}

fn validate_media(media_url: Option<&str>, media_type: Option<&str>) -> AppResult<()> {
    if media_url.map_or(false, |u| !u.trim().is_empty()) {
        match media_type {
            Some(t) if MEDIA_TYPES.contains(&t) => Ok(()),
            _ => Err(AppError::new(
                ErrorCode::ValidationError,
                "media_type must be one of: image, video, file",
            )),
        }
    } else {
        Ok(())
    }
}

fn content_preview(content: Option<&str>) -> String {
    content.unwrap_or("[media]").chars().take(100).collect()
}

fn verify_membership(
    conn: &mut diesel::pg::PgConnection,
    conversation_id: Uuid,
    user_id: Uuid,
) -> AppResult<()> {
    if !is_member(conn, conversation_id, user_id)? {
        return Err(AppError::new(
            ErrorCode::NotConversationMember,
            "you are not a member of this conversation",
        ));
    }
    Ok(())
}

/// Read-by sets for a batch of messages, keyed by message id.
fn load_read_by(
    conn: &mut diesel::pg::PgConnection,
    message_ids: &[Uuid],
) -> AppResult<HashMap<Uuid, Vec<Uuid>>> {
    if message_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows: Vec<(Uuid, Uuid)> = message_reads::table
        .filter(message_reads::message_id.eq_any(message_ids))
        .select((message_reads::message_id, message_reads::user_id))
        .load::<(Uuid, Uuid)>(conn)
        .map_err(AppError::Database)?;

    let mut map: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for (mid, uid) in rows {
        map.entry(mid).or_default().push(uid);
    }
    Ok(map)
}

fn message_payload(conversation_id: Uuid, message: &Message, read_by: &[Uuid]) -> serde_json::Value {
    serde_json::json!({
        "conversation_id": conversation_id,
        "message": {
            "id": message.id,
            "conversation_id": message.conversation_id,
            "sender_id": message.sender_id,
            "content": message.content,
            "media_url": message.media_url,
            "media_type": message.media_type,
            "read_by": read_by,
            "created_at": message.created_at,
        }
    })
}

// --- Handlers ---

/// POST /messages - send a message into a conversation.
///
/// The broadcast goes to the whole conversation room, sender included;
/// clients deduplicate their own echo by message id.
pub async fn send_message(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendMessageRequest>,
) -> AppResult<Json<ApiResponse<MessageWithReads>>> {
    if body_is_empty(req.content.as_deref(), req.media_url.as_deref()) {
        return Err(AppError::new(
            ErrorCode::EmptyMessage,
            "message must have content or media",
        ));
    }
    validate_media(req.media_url.as_deref(), req.media_type.as_deref())?;

    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;
    let conversation_id = req.conversation_id;

    verify_membership(&mut conn, conversation_id, auth_user.id)?;

    let message = conn
        .transaction::<Message, diesel::result::Error, _>(|conn| {
            let new_message = NewMessage {
                id: Uuid::now_v7(),
                conversation_id,
                sender_id: auth_user.id,
                content: req.content.clone(),
                media_url: req.media_url.clone(),
                media_type: req.media_type.clone(),
            };

            let message: Message = diesel::insert_into(messages::table)
                .values(&new_message)
                .get_result(conn)?;

            // Sender has read their own message
            diesel::insert_into(message_reads::table)
                .values(&NewMessageRead {
                    message_id: message.id,
                    user_id: auth_user.id,
                })
                .on_conflict((message_reads::message_id, message_reads::user_id))
                .do_nothing()
                .execute(conn)?;

            diesel::update(conversations::table.find(conversation_id))
                .set((
                    conversations::last_message_id.eq(message.id),
                    conversations::last_message_at.eq(message.created_at),
                    conversations::updated_at.eq(Utc::now()),
                ))
                .execute(conn)?;

            Ok(message)
        })
        .map_err(AppError::Database)?;

    let read_by = vec![auth_user.id];
    let payload = message_payload(conversation_id, &message, &read_by);

    // Fire-and-forget: a failed broadcast never rolls back the write;
    // clients recover on their next page-0 fetch.
    let result = state
        .io
        .to(conversation_room(conversation_id))
        .emit("new_message", &payload);
    tracing::debug!(
        sender = %auth_user.id,
        conversation = %conversation_id,
        message = %message.id,
        success = result.is_ok(),
        "socket emit new_message"
    );

    publisher::publish_message_sent(
        &state.rabbitmq,
        message.id,
        conversation_id,
        auth_user.id,
        &content_preview(req.content.as_deref()),
    )
    .await;

    Ok(Json(ApiResponse::ok(MessageWithReads { message, read_by })))
}

/// GET /conversations/:id/messages - paginated history, page 0 = most
/// recent batch, each page internally oldest-first.
///
/// Side effect: every message the caller had not yet read gains a read
/// receipt, and a message_read event per newly-read message goes to the
/// conversation room.
pub async fn list_messages(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<Uuid>,
    Query(params): Query<PaginationParams>,
) -> AppResult<Json<ApiResponse<Paginated<MessageWithReads>>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    verify_membership(&mut conn, conversation_id, auth_user.id)?;

    // Mark everything currently unread as read by the caller
    let newly_read: Vec<Uuid> = messages::table
        .filter(messages::conversation_id.eq(conversation_id))
        .filter(not(exists(
            message_reads::table
                .filter(message_reads::message_id.eq(messages::id))
                .filter(message_reads::user_id.eq(auth_user.id)),
        )))
        .select(messages::id)
        .load::<Uuid>(&mut conn)
        .map_err(AppError::Database)?;

    if !newly_read.is_empty() {
        let rows: Vec<NewMessageRead> = newly_read
            .iter()
            .map(|mid| NewMessageRead {
                message_id: *mid,
                user_id: auth_user.id,
            })
            .collect();

        // Conflict no-op keeps the receipt append idempotent under
        // concurrent fetches from the same user.
        diesel::insert_into(message_reads::table)
            .values(&rows)
            .on_conflict((message_reads::message_id, message_reads::user_id))
            .do_nothing()
            .execute(&mut conn)
            .map_err(AppError::Database)?;
    }

    let total: i64 = messages::table
        .filter(messages::conversation_id.eq(conversation_id))
        .select(count_star())
        .first::<i64>(&mut conn)
        .map_err(AppError::Database)?;

    // Newest first for windowing, then reversed so the page itself reads
    // oldest to newest - the client merge algorithm depends on this.
    let mut items: Vec<Message> = messages::table
        .filter(messages::conversation_id.eq(conversation_id))
        .order((messages::created_at.desc(), messages::id.desc()))
        .offset(params.offset() as i64)
        .limit(params.limit() as i64)
        .load::<Message>(&mut conn)
        .map_err(AppError::Database)?;
    items.reverse();

    let page_ids: Vec<Uuid> = items.iter().map(|m| m.id).collect();
    let mut read_map = load_read_by(&mut conn, &page_ids)?;

    let items: Vec<MessageWithReads> = items
        .into_iter()
        .map(|message| {
            let read_by = read_map.remove(&message.id).unwrap_or_default();
            MessageWithReads { message, read_by }
        })
        .collect();

    for mid in &newly_read {
        let _ = state.io.to(conversation_room(conversation_id)).emit(
            "message_read",
            &serde_json::json!({
                "conversation_id": conversation_id,
                "message_id": mid,
                "user_id": auth_user.id,
            }),
        );
    }

    let paginated = Paginated::new(items, total as u64, &params);
    Ok(Json(ApiResponse::ok(paginated)))
}

/// DELETE /messages/:id - hard delete, sender only.
pub async fn delete_message(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    let message: Message = messages::table
        .find(message_id)
        .first::<Message>(&mut conn)
        .optional()
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::new(ErrorCode::MessageNotFound, "message not found"))?;

    if message.sender_id != auth_user.id {
        return Err(AppError::new(
            ErrorCode::NotMessageSender,
            "you can only delete your own messages",
        ));
    }

    let conversation_id = message.conversation_id;

    conn.transaction::<(), diesel::result::Error, _>(|conn| {
        // Read receipts go with the message via FK cascade
        diesel::delete(messages::table.find(message_id)).execute(conn)?;

        let conv: Conversation = conversations::table
            .find(conversation_id)
            .first::<Conversation>(conn)?;

        // Recompute the last-message pointer when we just deleted it
        if conv.last_message_id == Some(message_id) {
            let latest: Option<Message> = messages::table
                .filter(messages::conversation_id.eq(conversation_id))
                .order((messages::created_at.desc(), messages::id.desc()))
                .first::<Message>(conn)
                .optional()?;

            diesel::update(conversations::table.find(conversation_id))
                .set((
                    conversations::last_message_id.eq(latest.as_ref().map(|m| m.id)),
                    conversations::last_message_at.eq(latest.as_ref().map(|m| m.created_at)),
                ))
                .execute(conn)?;
        }

        Ok(())
    })
    .map_err(AppError::Database)?;

    let _ = state.io.to(conversation_room(conversation_id)).emit(
        "message_deleted",
        &serde_json::json!({
            "conversation_id": conversation_id,
            "message_id": message_id,
        }),
    );

    publisher::publish_message_deleted(&state.rabbitmq, message_id, conversation_id, auth_user.id)
        .await;

    tracing::info!(
        message = %message_id,
        conversation = %conversation_id,
        sender = %auth_user.id,
        "message deleted"
    );

    Ok(Json(ApiResponse::ok(serde_json::json!({
        "message_id": message_id,
        "conversation_id": conversation_id,
    }))))
}

/// GET /unread-count - total unread messages across all conversations
pub async fn get_unread_count(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<UnreadCountResponse>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    let conv_ids: Vec<Uuid> = conversation_members::table
        .filter(conversation_members::user_id.eq(auth_user.id))
        .select(conversation_members::conversation_id)
        .load::<Uuid>(&mut conn)
        .map_err(AppError::Database)?;

    let total_unread: i64 = if conv_ids.is_empty() {
        0
    } else {
        messages::table
            .filter(messages::conversation_id.eq_any(&conv_ids))
            .filter(not(exists(
                message_reads::table
                    .filter(message_reads::message_id.eq(messages::id))
                    .filter(message_reads::user_id.eq(auth_user.id)),
            )))
            .select(count_star())
            .first::<i64>(&mut conn)
            .map_err(AppError::Database)?
    };

    Ok(Json(ApiResponse::ok(UnreadCountResponse { total_unread })))
}

// --- Tests ---

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_requires_content_or_media() {
        assert!(body_is_empty(None, None));
        assert!(body_is_empty(Some("   "), Some("")));
        assert!(!body_is_empty(Some("hi"), None));
        assert!(!body_is_empty(None, Some("https://cdn/x.png")));
    }

    #[test]
    fn media_type_must_be_known_when_media_present() {
        assert!(validate_media(Some("https://cdn/x.png"), Some("image")).is_ok());
        assert!(validate_media(Some("https://cdn/x.mp4"), Some("video")).is_ok());
        assert!(validate_media(Some("https://cdn/x.pdf"), Some("file")).is_ok());
        assert!(validate_media(Some("https://cdn/x.png"), Some("gif")).is_err());
        assert!(validate_media(Some("https://cdn/x.png"), None).is_err());
        // No media, no constraint
        assert!(validate_media(None, None).is_ok());
    }

    #[test]
    fn preview_truncates_to_100_chars() {
        let long = "x".repeat(300);
        assert_eq!(content_preview(Some(&long)).chars().count(), 100);
        assert_eq!(content_preview(None), "[media]");
    }

    #[test]
    fn payload_carries_read_by() {
        let message = Message {
            id: Uuid::now_v7(),
            conversation_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            content: Some("hello".into()),
            media_url: None,
            media_type: None,
            created_at: Utc::now(),
        };
        let payload = message_payload(message.conversation_id, &message, &[message.sender_id]);
        assert_eq!(payload["message"]["content"], "hello");
        assert_eq!(
            payload["message"]["read_by"][0],
            serde_json::json!(message.sender_id)
        );
    }
}
