use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use prepnest_shared::errors::{AppError, AppResult, ErrorCode};
use prepnest_shared::types::api::ApiResponse;
use prepnest_shared::types::auth::AuthUser;

use crate::events::publisher;
use crate::models::{Conversation, ConversationMember, NewConversation, NewConversationMember};
use crate::routes::conversations::{is_member, ConversationDetail};
use crate::schema::{conversation_members, conversations};
use crate::socket::{conversation_room, evict_from_conversation, user_room};
use crate::AppState;

// --- Request DTOs ---

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    pub participant_emails: Vec<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EditGroupRequest {
    pub name: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct KickMemberRequest {
    pub member_id: Uuid,
}

/// User-service resolution of an email address.
#[derive(Debug, Deserialize)]
struct ResolvedUser {
    user_id: Uuid,
    email: String,
}

// --- Helpers ---

const MAX_GROUP_NAME: usize = 100;

fn validate_group_name(name: &str) -> AppResult<String> {
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::new(ErrorCode::GroupNameRequired, "group name is required"));
    }
    if name.chars().count() > MAX_GROUP_NAME {
        return Err(AppError::new(
            ErrorCode::ValidationError,
            format!("group name max {MAX_GROUP_NAME} characters"),
        ));
    }
    Ok(name)
}

/// Set equality on member lists, order- and duplicate-insensitive.
fn same_member_set(a: &[Uuid], b: &[Uuid]) -> bool {
    let a: HashSet<Uuid> = a.iter().copied().collect();
    let b: HashSet<Uuid> = b.iter().copied().collect();
    a == b
}

fn load_group(
    conn: &mut diesel::pg::PgConnection,
    conversation_id: Uuid,
) -> AppResult<Conversation> {
    let conversation: Conversation = conversations::table
        .find(conversation_id)
        .first::<Conversation>(conn)
        .optional()
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::new(ErrorCode::ConversationNotFound, "conversation not found"))?;

    if !conversation.is_group {
        return Err(AppError::new(
            ErrorCode::NotGroupConversation,
            "not a group conversation",
        ));
    }

    Ok(conversation)
}

fn require_admin(conversation: &Conversation, user_id: Uuid) -> AppResult<()> {
    if conversation.admin_id != Some(user_id) {
        return Err(AppError::new(
            ErrorCode::NotGroupAdmin,
            "only the group admin can do this",
        ));
    }
    Ok(())
}

fn member_ids(
    conn: &mut diesel::pg::PgConnection,
    conversation_id: Uuid,
) -> AppResult<Vec<Uuid>> {
    conversation_members::table
        .filter(conversation_members::conversation_id.eq(conversation_id))
        .select(conversation_members::user_id)
        .load::<Uuid>(conn)
        .map_err(AppError::Database)
}

/// Resolve participant emails to user ids via the user service. Unknown
/// emails are dropped with a warning - matching the platform's historical
/// behavior (see DESIGN.md).
async fn resolve_emails(state: &AppState, emails: &[String]) -> AppResult<Vec<Uuid>> {
    if emails.is_empty() {
        return Ok(vec![]);
    }

    let url = format!("{}/internal/users/by-emails", state.config.user_service_url);
    let resolved: Vec<ResolvedUser> = state
        .http_client
        .post(&url)
        .json(&serde_json::json!({ "emails": emails }))
        .send()
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "user service unreachable");
            AppError::new(ErrorCode::ServiceUnavailable, "user lookup failed, try again")
        })?
        .json()
        .await
        .map_err(|e| AppError::Internal(e.into()))?;

    let found: HashSet<&str> = resolved.iter().map(|r| r.email.as_str()).collect();
    for email in emails {
        if !found.contains(email.as_str()) {
            tracing::warn!(email = %email, "unknown participant email dropped");
        }
    }

    Ok(resolved.into_iter().map(|r| r.user_id).collect())
}

// --- Handlers ---

/// POST /groups - create a group conversation. The creator becomes admin
/// and is always a member.
pub async fn create_group(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateGroupRequest>,
) -> AppResult<Json<ApiResponse<ConversationDetail>>> {
    let name = validate_group_name(&req.name)?;

    let mut all_member_ids = resolve_emails(&state, &req.participant_emails).await?;
    if !all_member_ids.contains(&auth_user.id) {
        all_member_ids.push(auth_user.id);
    }
    // Duplicate emails resolve to duplicate ids; the member insert needs
    // each id once
    let mut seen = HashSet::new();
    all_member_ids.retain(|id| seen.insert(*id));

    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    // Reject an exact duplicate: same name, identical member set
    let candidates: Vec<Conversation> = conversations::table
        .filter(conversations::is_group.eq(true))
        .filter(conversations::group_name.eq(&name))
        .load::<Conversation>(&mut conn)
        .map_err(AppError::Database)?;

    for candidate in &candidates {
        let existing = member_ids(&mut conn, candidate.id)?;
        if same_member_set(&existing, &all_member_ids) {
            return Err(AppError::new(
                ErrorCode::GroupAlreadyExists,
                "an identical group already exists",
            ));
        }
    }

    let conversation = conn
        .transaction::<Conversation, diesel::result::Error, _>(|conn| {
            let new_conv = NewConversation {
                is_group: true,
                group_name: Some(name.clone()),
                group_image_url: req.image_url.clone(),
                admin_id: Some(auth_user.id),
                dm_key: None,
            };

            let conversation: Conversation = diesel::insert_into(conversations::table)
                .values(&new_conv)
                .get_result(conn)?;

            let new_members: Vec<NewConversationMember> = all_member_ids
                .iter()
                .map(|uid| NewConversationMember {
                    conversation_id: conversation.id,
                    user_id: *uid,
                })
                .collect();

            diesel::insert_into(conversation_members::table)
                .values(&new_members)
                .execute(conn)?;

            Ok(conversation)
        })
        .map_err(AppError::Database)?;

    tracing::info!(
        conversation_id = %conversation.id,
        admin = %auth_user.id,
        members = all_member_ids.len(),
        "group created"
    );

    // Members need to join the new room; push to their user rooms
    let payload = serde_json::json!({ "conversation": conversation });
    for uid in &all_member_ids {
        let _ = state.io.to(user_room(*uid)).emit("conversation_created", &payload);
    }

    publisher::publish_group_created(
        &state.rabbitmq,
        conversation.id,
        auth_user.id,
        all_member_ids.clone(),
    )
    .await;

    let raw_members: Vec<ConversationMember> = conversation_members::table
        .filter(conversation_members::conversation_id.eq(conversation.id))
        .load::<ConversationMember>(&mut conn)
        .map_err(AppError::Database)?;
    let members = super::conversations::enrich_members(&state, &raw_members).await;

    Ok(Json(ApiResponse::ok(ConversationDetail { conversation, members })))
}

/// POST /groups/:id/join
pub async fn join_group(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<ConversationMember>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    load_group(&mut conn, conversation_id)?;

    if is_member(&mut conn, conversation_id, auth_user.id)? {
        return Err(AppError::new(
            ErrorCode::AlreadyGroupMember,
            "you are already a member of this group",
        ));
    }

    let member: ConversationMember = diesel::insert_into(conversation_members::table)
        .values(&NewConversationMember {
            conversation_id,
            user_id: auth_user.id,
        })
        .get_result(&mut conn)
        .map_err(AppError::Database)?;

    let _ = state.io.to(conversation_room(conversation_id)).emit(
        "member_joined",
        &serde_json::json!({
            "conversation_id": conversation_id,
            "user_id": auth_user.id,
        }),
    );

    Ok(Json(ApiResponse::ok(member)))
}

/// POST /groups/:id/leave
///
/// When the admin leaves, adminship passes to the longest-standing
/// remaining member; a group left empty is deleted outright.
pub async fn leave_group(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    let conversation = load_group(&mut conn, conversation_id)?;

    if !is_member(&mut conn, conversation_id, auth_user.id)? {
        return Err(AppError::new(
            ErrorCode::NotGroupMember,
            "you are not a member of this group",
        ));
    }

    let was_admin = conversation.admin_id == Some(auth_user.id);

    let (new_admin, group_deleted) = conn
        .transaction::<(Option<Uuid>, bool), diesel::result::Error, _>(|conn| {
            diesel::delete(
                conversation_members::table
                    .filter(conversation_members::conversation_id.eq(conversation_id))
                    .filter(conversation_members::user_id.eq(auth_user.id)),
            )
            .execute(conn)?;

            if !was_admin {
                return Ok((None, false));
            }

            let successor: Option<Uuid> = conversation_members::table
                .filter(conversation_members::conversation_id.eq(conversation_id))
                .order(conversation_members::joined_at.asc())
                .select(conversation_members::user_id)
                .first::<Uuid>(conn)
                .optional()?;

            match successor {
                Some(next) => {
                    diesel::update(conversations::table.find(conversation_id))
                        .set(conversations::admin_id.eq(next))
                        .execute(conn)?;
                    Ok((Some(next), false))
                }
                None => {
                    // Last member out; messages cascade with the conversation
                    diesel::delete(conversations::table.find(conversation_id)).execute(conn)?;
                    Ok((None, true))
                }
            }
        })
        .map_err(AppError::Database)?;

    if group_deleted {
        tracing::info!(conversation_id = %conversation_id, "empty group deleted");
    } else {
        let _ = state.io.to(conversation_room(conversation_id)).emit(
            "member_left",
            &serde_json::json!({
                "conversation_id": conversation_id,
                "user_id": auth_user.id,
                "new_admin": new_admin,
            }),
        );
    }
    // The leaver's sockets must stop receiving this conversation's events
    evict_from_conversation(&state.io, auth_user.id, conversation_id);

    Ok(Json(ApiResponse::ok(serde_json::json!({
        "conversation_id": conversation_id,
        "new_admin": new_admin,
        "deleted": group_deleted,
    }))))
}

/// POST /groups/:id/edit - admin-only name/image update
pub async fn edit_group(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<EditGroupRequest>,
) -> AppResult<Json<ApiResponse<Conversation>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    let conversation = load_group(&mut conn, conversation_id)?;
    require_admin(&conversation, auth_user.id)?;

    let name = match &req.name {
        Some(n) => Some(validate_group_name(n)?),
        None => None,
    };

    let updated: Conversation = diesel::update(conversations::table.find(conversation_id))
        .set((
            conversations::group_name.eq(name.clone().or(conversation.group_name)),
            conversations::group_image_url.eq(req.image_url.clone().or(conversation.group_image_url)),
            conversations::updated_at.eq(Utc::now()),
        ))
        .get_result(&mut conn)
        .map_err(AppError::Database)?;

    let _ = state.io.to(conversation_room(conversation_id)).emit(
        "group_updated",
        &serde_json::json!({
            "conversation_id": conversation_id,
            "name": updated.group_name,
            "image_url": updated.group_image_url,
        }),
    );

    Ok(Json(ApiResponse::ok(updated)))
}

/// POST /groups/:id/kick - admin-only member removal
pub async fn kick_member(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<KickMemberRequest>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    let conversation = load_group(&mut conn, conversation_id)?;
    require_admin(&conversation, auth_user.id)?;

    if req.member_id == auth_user.id {
        return Err(AppError::new(
            ErrorCode::ValidationError,
            "use leave to exit your own group",
        ));
    }

    let removed = diesel::delete(
        conversation_members::table
            .filter(conversation_members::conversation_id.eq(conversation_id))
            .filter(conversation_members::user_id.eq(req.member_id)),
    )
    .execute(&mut conn)
    .map_err(AppError::Database)?;

    if removed == 0 {
        return Err(AppError::new(
            ErrorCode::NotGroupMember,
            "that user is not a member of this group",
        ));
    }

    let payload = serde_json::json!({
        "conversation_id": conversation_id,
        "user_id": req.member_id,
    });
    let _ = state
        .io
        .to(conversation_room(conversation_id))
        .emit("member_kicked", &payload);
    // The kicked user may not have the room open; hit their user room too
    let _ = state.io.to(user_room(req.member_id)).emit("member_kicked", &payload);
    // A kicked client cannot be trusted to leave the room on its own
    evict_from_conversation(&state.io, req.member_id, conversation_id);

    tracing::info!(
        conversation_id = %conversation_id,
        kicked = %req.member_id,
        by = %auth_user.id,
        "member kicked from group"
    );

    Ok(Json(ApiResponse::ok(payload)))
}

/// DELETE /groups/:id - admin-only; messages and read receipts cascade.
pub async fn delete_group(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let mut conn = state.db.get().map_err(|e| AppError::Internal(e.into()))?;

    let conversation = load_group(&mut conn, conversation_id)?;
    require_admin(&conversation, auth_user.id)?;

    diesel::delete(conversations::table.find(conversation_id))
        .execute(&mut conn)
        .map_err(AppError::Database)?;

    let _ = state.io.to(conversation_room(conversation_id)).emit(
        "group_deleted",
        &serde_json::json!({ "conversation_id": conversation_id }),
    );

    tracing::info!(
        conversation_id = %conversation_id,
        admin = %auth_user.id,
        "group deleted"
    );

    Ok(Json(ApiResponse::ok(serde_json::json!({
        "conversation_id": conversation_id,
    }))))
}

// --- Tests ---

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_set_comparison_ignores_order_and_duplicates() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        assert!(same_member_set(&[a, b, c], &[c, a, b]));
        assert!(same_member_set(&[a, b, a], &[b, a]));
        assert!(!same_member_set(&[a, b], &[a, c]));
        assert!(!same_member_set(&[a, b], &[a, b, c]));
    }

    #[test]
    fn group_name_is_trimmed_and_bounded() {
        assert_eq!(validate_group_name("  dsa crew  ").unwrap(), "dsa crew");
        assert!(validate_group_name("   ").is_err());
        assert!(validate_group_name(&"x".repeat(101)).is_err());
        assert!(validate_group_name(&"x".repeat(100)).is_ok());
    }
}
