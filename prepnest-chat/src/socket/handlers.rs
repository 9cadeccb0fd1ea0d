use std::sync::Arc;

use diesel::prelude::*;
use serde::Serialize;
use socketioxide::extract::{Data, SocketRef};
use uuid::Uuid;

use prepnest_shared::middleware::validate_jwt_with_secret;

use crate::schema::conversation_members;
use crate::socket::{conversation_room, user_room};
use crate::AppState;

const PRESENCE_TTL_SECS: u64 = 120;

#[derive(Debug, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

fn get_user_id(socket: &SocketRef) -> Option<Uuid> {
    socket.extensions.get::<Uuid>()
}

pub async fn on_connect_with_state(socket: SocketRef, state: Arc<AppState>) {
    let user_id = match authenticate_socket(&socket, &state) {
        Ok(id) => id,
        Err(msg) => {
            tracing::warn!(error = %msg, "chat socket auth failed");
            let _ = socket.emit(
                "error",
                &ErrorPayload {
                    code: "AUTH_FAILED".into(),
                    message: msg,
                },
            );
            socket.disconnect().ok();
            return;
        }
    };

    // Store user_id in socket extensions
    socket.extensions.insert(user_id);

    // Join the per-user room so lifecycle events reach this user even
    // before any conversation room is joined
    socket.join(user_room(user_id)).ok();

    // Auto-join every conversation the user is already a member of; a
    // second socket from the same user joins the same rooms, which is fine
    match member_conversation_ids(&state, user_id) {
        Ok(ids) => {
            let joined = ids.len();
            for conversation_id in ids {
                socket.join(conversation_room(conversation_id)).ok();
            }
            tracing::info!(user_id = %user_id, sid = %socket.id, rooms = joined, "chat socket connected");
        }
        Err(e) => {
            // Connection stays up; client can still join rooms explicitly
            tracing::error!(error = %e, user_id = %user_id, "failed to auto-join conversation rooms");
        }
    }

    // Set presence in Redis with a TTL; heartbeats refresh it
    let _ = state
        .redis
        .set(&format!("online:{user_id}"), "1", PRESENCE_TTL_SECS)
        .await;

    let _ = socket.emit("connected", &serde_json::json!({ "user_id": user_id }));

    socket.on("join_conversation", {
        let state = state.clone();
        move |socket: SocketRef, Data::<serde_json::Value>(payload)| {
            let state = state.clone();
            async move {
                on_join_conversation(socket, payload, &state).await;
            }
        }
    });

    socket.on("leave_conversation", {
        move |socket: SocketRef, Data::<serde_json::Value>(payload)| async move {
            on_leave_conversation(socket, payload);
        }
    });

    // Heartbeat handler - refresh presence TTL
    socket.on("heartbeat", {
        let state = state.clone();
        move |socket: SocketRef| {
            let state = state.clone();
            async move {
                if let Some(user_id) = get_user_id(&socket) {
                    let _ = state
                        .redis
                        .set(&format!("online:{user_id}"), "1", PRESENCE_TTL_SECS)
                        .await;
                }
            }
        }
    });

    socket.on_disconnect({
        let state = state.clone();
        move |socket: SocketRef| {
            let state = state.clone();
            async move {
                on_disconnect_with_state(socket, state).await;
            }
        }
    });
}

/// Explicit room join after the user was added to a conversation while
/// already connected. Membership is checked against the database; joining
/// a room the socket is already in is a no-op.
async fn on_join_conversation(socket: SocketRef, payload: serde_json::Value, state: &Arc<AppState>) {
    let user_id = match get_user_id(&socket) {
        Some(id) => id,
        None => return,
    };

    let conversation_id = match parse_conversation_id(&payload) {
        Some(id) => id,
        None => {
            tracing::warn!("join_conversation missing conversation_id");
            return;
        }
    };

    let allowed = match check_membership(state, conversation_id, user_id) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(error = %e, "membership check failed");
            return;
        }
    };

    if !allowed {
        let _ = socket.emit(
            "error",
            &ErrorPayload {
                code: "NOT_A_MEMBER".into(),
                message: "you are not a member of this conversation".into(),
            },
        );
        return;
    }

    socket.join(conversation_room(conversation_id)).ok();
    tracing::debug!(user_id = %user_id, conversation_id = %conversation_id, "joined conversation room");
}

fn on_leave_conversation(socket: SocketRef, payload: serde_json::Value) {
    if let Some(conversation_id) = parse_conversation_id(&payload) {
        socket.leave(conversation_room(conversation_id)).ok();
    }
}

async fn on_disconnect_with_state(socket: SocketRef, state: Arc<AppState>) {
    let user_id = match get_user_id(&socket) {
        Some(id) => id,
        None => return,
    };

    tracing::info!(user_id = %user_id, sid = %socket.id, "chat socket disconnected");

    // The presence key also expires on its own if this delete is lost
    let _ = state.redis.del(&format!("online:{user_id}")).await;
}

fn parse_conversation_id(payload: &serde_json::Value) -> Option<Uuid> {
    payload
        .get("conversation_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
}

fn member_conversation_ids(state: &Arc<AppState>, user_id: Uuid) -> anyhow::Result<Vec<Uuid>> {
    let mut conn = state.db.get()?;
    let ids = conversation_members::table
        .filter(conversation_members::user_id.eq(user_id))
        .select(conversation_members::conversation_id)
        .load::<Uuid>(&mut conn)?;
    Ok(ids)
}

fn check_membership(
    state: &Arc<AppState>,
    conversation_id: Uuid,
    user_id: Uuid,
) -> anyhow::Result<bool> {
    let mut conn = state.db.get()?;
    let count: i64 = conversation_members::table
        .filter(conversation_members::conversation_id.eq(conversation_id))
        .filter(conversation_members::user_id.eq(user_id))
        .count()
        .get_result(&mut conn)?;
    Ok(count > 0)
}

fn authenticate_socket(socket: &SocketRef, state: &Arc<AppState>) -> Result<Uuid, String> {
    let connect_info = socket.req_parts();

    // Extract token from query string ?token=xxx
    let query = connect_info.uri.query().unwrap_or_default();
    let token = query
        .split('&')
        .find_map(|pair| {
            let mut split = pair.splitn(2, '=');
            let key = split.next()?;
            let value = split.next()?;
            if key == "token" {
                Some(value.to_string())
            } else {
                None
            }
        })
        .ok_or_else(|| "missing token query parameter".to_string())?;

    let claims = validate_jwt_with_secret(&token, &state.config.jwt_secret)
        .map_err(|e| format!("invalid token: {e}"))?;

    if claims.is_expired() {
        return Err("token has expired".into());
    }

    Ok(claims.sub)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_id_parsed_from_payload() {
        let id = Uuid::new_v4();
        let payload = serde_json::json!({ "conversation_id": id.to_string() });
        assert_eq!(parse_conversation_id(&payload), Some(id));
    }

    #[test]
    fn malformed_payloads_yield_none() {
        assert_eq!(parse_conversation_id(&serde_json::json!({})), None);
        assert_eq!(
            parse_conversation_id(&serde_json::json!({ "conversation_id": "nope" })),
            None
        );
        assert_eq!(
            parse_conversation_id(&serde_json::json!({ "conversation_id": 7 })),
            None
        );
    }
}
