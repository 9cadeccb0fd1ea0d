use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use diesel::dsl::{count_star, exists, not};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use prepnest_shared::errors::{AppError, AppResult, ErrorCode};
use prepnest_shared::types::api::ApiResponse;
use prepnest_shared::types::auth::AuthUser;

use crate::models::{Conversation, ConversationMember, Message, NewConversation, NewConversationMember};
use crate::schema::{conversation_members, conversations, message_reads, messages};
use crate::socket::user_room;
use crate::AppState;

// --- Response DTOs ---

#[derive(Debug, Serialize)]
pub struct ConversationPreview {
    pub id: Uuid,
    pub is_group: bool,
    pub group_name: Option<String>,
    pub group_image_url: Option<String>,
    pub partner_id: Option<Uuid>,
    pub partner_name: Option<String>,
    pub partner_avatar: Option<String>,
    pub partner_online: bool,
    pub created_at: DateTime<Utc>,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: i64,
}

#[derive(Debug, Serialize)]
pub struct ConversationDetail {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub members: Vec<EnrichedMember>,
}

#[derive(Debug, Serialize, Clone)]
pub struct EnrichedMember {
    pub user_id: Uuid,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub is_online: bool,
    pub joined_at: DateTime<Utc>,
}

// --- Request DTOs ---

#[derive(Debug, Deserialize)]
pub struct CreateDmRequest {
    pub user_id: Uuid,
}

/// Profile summary returned by the user service's internal batch endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UserSummary {
    pub user_id: Uuid,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

// --- Helpers ---

/// Canonical DM pair key: sorted "min:max" uuid pair, identical for
/// (a, b) and (b, a). Backed by a unique index so concurrent
/// get-or-create calls for the same pair converge on one conversation.
pub fn dm_key(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}:{hi}")
}

/// Count messages in a conversation that carry no read receipt for `user_id`.
pub fn unread_count(
    conn: &mut diesel::pg::PgConnection,
    conversation_id: Uuid,
    user_id: Uuid,
) -> AppResult<i64> {
    messages::table
        .filter(messages::conversation_id.eq(conversation_id))
        .filter(not(exists(
            message_reads::table
                .filter(message_reads::message_id.eq(messages::id))
                .filter(message_reads::user_id.eq(user_id)),
        )))
        .select(count_star())
        .first::<i64>(conn)
        .map_err(AppError::Database)
}

pub fn is_member(
    conn: &mut diesel::pg::PgConnection,
    conversation_id: Uuid,
    user_id: Uuid,
) -> AppResult<bool> {
    conversation_members::table
        .filter(conversation_members::conversation_id.eq(conversation_id))
        .filter(conversation_members::user_id.eq(user_id))
        .select(count_star())
        .first::<i64>(conn)
        .map(|c| c > 0)
        .map_err(AppError::Database)
}

/// Fetch profile summaries for a set of user ids from the user service.
/// A transport failure surfaces as ServiceUnavailable; callers that only
/// enrich (and can live with missing profiles) drop it with
/// `unwrap_or_default`, callers that decide existence propagate it.
pub async fn fetch_user_summaries(
    client: &reqwest::Client,
    user_service_url: &str,
    user_ids: &[Uuid],
) -> AppResult<std::collections::HashMap<Uuid, UserSummary>> {
    if user_ids.is_empty() {
        return Ok(Default::default());
    }

    let url = format!("{user_service_url}/internal/profiles/batch");
    let summaries: Vec<UserSummary> = client
        .post(&url)
        .json(&serde_json::json!({ "user_ids": user_ids }))
        .send()
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "user service unreachable");
            AppError::new(ErrorCode::ServiceUnavailable, "user lookup failed, try again")
        })?
        .json()
        .await
        .map_err(|e| AppError::Internal(e.into()))?;

    Ok(summaries.into_iter().map(|s| (s.user_id, s)).collect())
}

pub async fn enrich_members(
    state: &AppState,
    raw_members: &[ConversationMember],
) -> Vec<EnrichedMember> {
    let user_ids: Vec<Uuid> = raw_members.iter().map(|m| m.user_id).collect();
    let profiles = fetch_user_summaries(&state.http_client, &state.config.user_service_url, &user_ids)
        .await
        .unwrap_or_default();

    let presence_keys: Vec<String> = user_ids.iter().map(|id| format!("online:{id}")).collect();
    let online = state
        .redis
        .exists_multi(&presence_keys)
        .await
        .unwrap_or_else(|_| vec![false; user_ids.len()]);

    raw_members
        .iter()
        .zip(online)
        .map(|(m, is_online)| {
            let profile = profiles.get(&m.user_id);
            EnrichedMember {
                user_id: m.user_id,
                display_name: profile.and_then(|p| p.display_name.clone()),
                avatar_url: profile.and_then(|p| p.avatar_url.clone()),
                is_online,
                joined_at: m.joined_at,
            }
        })
        .collect()
}

fn load_members(
    conn: &mut diesel::pg::PgConnection,
    conversation_id: Uuid,
) -> AppResult<Vec<ConversationMember>> {
    conversation_members::table
        .filter(conversation_members::conversation_id.eq(conversation_id))
        .order(conversation_members::joined_at.asc())
        .load::<ConversationMember>(conn)
        .map_err(AppError::Database)
}

// --- Handlers ---

/// POST /dm - return the existing DM with the target user, creating it on
/// first request. Idempotent and race-safe through the dm_key unique index.
pub async fn get_or_create_dm(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateDmRequest>,
) -> AppResult<Json<ApiResponse<ConversationDetail>>> {
    if req.user_id == auth_user.id {
        return Err(AppError::new(
            ErrorCode::DmWithSelf,
            "cannot start a conversation with yourself",
        ));
    }

    // The target must be a known user. An unreachable user service is a
    // transient failure, not proof the user is missing.
    let known =
        fetch_user_summaries(&state.http_client, &state.config.user_service_url, &[req.user_id])
            .await?;
    if !known.contains_key(&req.user_id) {
        return Err(AppError::new(ErrorCode::UserNotFound, "user not found"));
    }

    let key = dm_key(auth_user.id, req.user_id);
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    let (conversation, created) = conn
        .transaction::<(Conversation, bool), diesel::result::Error, _>(|conn| {
            let new_conv = NewConversation {
                is_group: false,
                group_name: None,
                group_image_url: None,
                admin_id: None,
                dm_key: Some(key.clone()),
            };

            // Atomic find-or-insert: the loser of a concurrent race gets
            // None back and selects the winner's row.
            let inserted: Option<Conversation> = diesel::insert_into(conversations::table)
                .values(&new_conv)
                .on_conflict(conversations::dm_key)
                .do_nothing()
                .get_result(conn)
                .optional()?;

            match inserted {
                Some(conv) => {
                    let members = vec![
                        NewConversationMember {
                            conversation_id: conv.id,
                            user_id: auth_user.id,
                        },
                        NewConversationMember {
                            conversation_id: conv.id,
                            user_id: req.user_id,
                        },
                    ];
                    diesel::insert_into(conversation_members::table)
                        .values(&members)
                        .execute(conn)?;
                    Ok((conv, true))
                }
                None => {
                    let existing = conversations::table
                        .filter(conversations::dm_key.eq(&key))
                        .first::<Conversation>(conn)?;
                    Ok((existing, false))
                }
            }
        })
        .map_err(AppError::Database)?;

    let raw_members = load_members(&mut conn, conversation.id)?;
    let members = enrich_members(&state, &raw_members).await;

    if created {
        tracing::info!(
            conversation_id = %conversation.id,
            initiator = %auth_user.id,
            partner = %req.user_id,
            "DM conversation created"
        );

        // Both parties need to join the new room; push the conversation to
        // their user rooms so connected clients can do so immediately.
        let payload = serde_json::json!({ "conversation": conversation });
        for uid in [auth_user.id, req.user_id] {
            let _ = state.io.to(user_room(uid)).emit("conversation_created", &payload);
        }
    }

    Ok(Json(ApiResponse::ok(ConversationDetail { conversation, members })))
}

/// GET /conversations - list the caller's conversations with last message
/// preview and unread count, most recently active first.
pub async fn list_conversations(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<ConversationPreview>>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;
    let user_id = auth_user.id;

    let conv_ids: Vec<Uuid> = conversation_members::table
        .filter(conversation_members::user_id.eq(user_id))
        .select(conversation_members::conversation_id)
        .load::<Uuid>(&mut conn)
        .map_err(AppError::Database)?;

    if conv_ids.is_empty() {
        return Ok(Json(ApiResponse::ok(vec![])));
    }

    let convs: Vec<Conversation> = conversations::table
        .filter(conversations::id.eq_any(&conv_ids))
        .load::<Conversation>(&mut conn)
        .map_err(AppError::Database)?;

    let mut previews = Vec::with_capacity(convs.len());
    for conv in convs {
        let unread = unread_count(&mut conn, conv.id, user_id)?;

        let last_msg: Option<Message> = match conv.last_message_id {
            Some(mid) => messages::table
                .find(mid)
                .first::<Message>(&mut conn)
                .optional()
                .map_err(AppError::Database)?,
            None => None,
        };

        // For DMs, the partner is the other member
        let partner_id = if !conv.is_group {
            conversation_members::table
                .filter(conversation_members::conversation_id.eq(conv.id))
                .filter(conversation_members::user_id.ne(user_id))
                .select(conversation_members::user_id)
                .first::<Uuid>(&mut conn)
                .optional()
                .map_err(AppError::Database)?
        } else {
            None
        };

        let last_message = last_msg.map(|m| m.content.unwrap_or_else(|| "[media]".to_string()));

        previews.push(ConversationPreview {
            id: conv.id,
            is_group: conv.is_group,
            group_name: conv.group_name,
            group_image_url: conv.group_image_url,
            partner_id,
            partner_name: None,
            partner_avatar: None,
            partner_online: false,
            created_at: conv.created_at,
            last_message,
            last_message_at: conv.last_message_at,
            unread_count: unread,
        });
    }

    // Enrich DM previews with partner profile and presence
    let partner_ids: Vec<Uuid> = previews.iter().filter_map(|p| p.partner_id).collect();
    if !partner_ids.is_empty() {
        let profiles =
            fetch_user_summaries(&state.http_client, &state.config.user_service_url, &partner_ids)
                .await
                .unwrap_or_default();
        let presence_keys: Vec<String> =
            partner_ids.iter().map(|id| format!("online:{id}")).collect();
        let online: std::collections::HashMap<Uuid, bool> = partner_ids
            .iter()
            .copied()
            .zip(
                state
                    .redis
                    .exists_multi(&presence_keys)
                    .await
                    .unwrap_or_else(|_| vec![false; partner_ids.len()]),
            )
            .collect();

        for preview in &mut previews {
            if let Some(pid) = preview.partner_id {
                if let Some(profile) = profiles.get(&pid) {
                    preview.partner_name = profile.display_name.clone();
                    preview.partner_avatar = profile.avatar_url.clone();
                }
                preview.partner_online = online.get(&pid).copied().unwrap_or(false);
            }
        }
    }

    // Most recently active first, falling back to conversation created_at
    previews.sort_by(|a, b| {
        let a_time = a.last_message_at.unwrap_or(a.created_at);
        let b_time = b.last_message_at.unwrap_or(b.created_at);
        b_time.cmp(&a_time)
    });

    Ok(Json(ApiResponse::ok(previews)))
}

/// GET /conversations/:id - conversation details with enriched members
pub async fn get_conversation(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<ConversationDetail>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    if !is_member(&mut conn, conversation_id, auth_user.id)? {
        return Err(AppError::new(
            ErrorCode::NotConversationMember,
            "you are not a member of this conversation",
        ));
    }

    let conversation: Conversation = conversations::table
        .find(conversation_id)
        .first::<Conversation>(&mut conn)
        .optional()
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::new(ErrorCode::ConversationNotFound, "conversation not found"))?;

    let raw_members = load_members(&mut conn, conversation_id)?;
    let members = enrich_members(&state, &raw_members).await;

    Ok(Json(ApiResponse::ok(ConversationDetail { conversation, members })))
}

// --- Tests ---

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dm_key_is_symmetric() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(dm_key(a, b), dm_key(b, a));
    }

    #[test]
    fn dm_key_orders_low_uuid_first() {
        let a = Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
        let b = Uuid::parse_str("00000000-0000-0000-0000-000000000002").unwrap();
        assert_eq!(dm_key(b, a), format!("{a}:{b}"));
    }

    #[test]
    fn dm_key_distinguishes_pairs() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        assert_ne!(dm_key(a, b), dm_key(a, c));
    }

    #[tokio::test]
    async fn user_lookup_outage_is_transient_not_missing_user() {
        // Port 9 (discard) refuses connections; the lookup must surface a
        // retryable ServiceUnavailable instead of claiming the user is gone.
        let client = reqwest::Client::new();
        let err = fetch_user_summaries(&client, "http://127.0.0.1:9", &[Uuid::new_v4()])
            .await
            .unwrap_err();

        match err {
            AppError::Known { code, .. } => assert_eq!(code, ErrorCode::ServiceUnavailable),
            other => panic!("expected ServiceUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_id_set_skips_the_user_service() {
        // No ids means no request, so even an unreachable service succeeds.
        let client = reqwest::Client::new();
        let summaries = fetch_user_summaries(&client, "http://127.0.0.1:9", &[])
            .await
            .unwrap();
        assert!(summaries.is_empty());
    }
}
