use std::sync::Arc;

use diesel::prelude::*;
use futures_lite::StreamExt;
use lapin::options::BasicAckOptions;
use uuid::Uuid;

use prepnest_shared::clients::db::DbPool;
use prepnest_shared::types::event::{payloads, routing_keys, Event};

use crate::schema::{conversation_members, conversations};
use crate::socket::evict_from_conversation;
use crate::AppState;

/// Listen for auth.user.deleted events and scrub the user's memberships.
pub async fn listen_user_deleted(state: Arc<AppState>) -> anyhow::Result<()> {
    let consumer = state
        .rabbitmq
        .subscribe("prepnest-chat.auth.user.deleted", routing_keys::AUTH_USER_DELETED)
        .await?;

    tracing::info!("listening for auth.user.deleted events");

    let mut consumer = consumer;
    while let Some(delivery) = consumer.next().await {
        match delivery {
            Ok(delivery) => {
                match serde_json::from_slice::<Event<payloads::UserDeleted>>(&delivery.data) {
                    Ok(event) => {
                        let user_id = event.data.user_id;
                        tracing::info!(user_id = %user_id, "received user.deleted event");

                        match remove_user_memberships(&state.db, user_id) {
                            Ok(affected) => {
                                for conversation_id in affected {
                                    evict_from_conversation(&state.io, user_id, conversation_id);
                                }
                            }
                            Err(e) => {
                                tracing::error!(
                                    error = %e,
                                    user_id = %user_id,
                                    "failed to remove deleted user's memberships"
                                );
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to deserialize user.deleted event");
                    }
                }
                let _ = delivery.ack(BasicAckOptions::default()).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "consumer error");
            }
        }
    }

    Ok(())
}

/// Drop the user from every conversation, returning the ids of the
/// conversations they were in. A group the user administered passes to the
/// longest-standing remaining member; any conversation left without members
/// is deleted (messages cascade with it). Messages the user already sent
/// stay in place.
fn remove_user_memberships(db: &DbPool, user_id: Uuid) -> anyhow::Result<Vec<Uuid>> {
    let mut conn = db.get()?;

    let affected = conn.transaction::<Vec<Uuid>, diesel::result::Error, _>(|conn| {
        let affected: Vec<Uuid> = conversation_members::table
            .filter(conversation_members::user_id.eq(user_id))
            .select(conversation_members::conversation_id)
            .load::<Uuid>(conn)?;

        diesel::delete(conversation_members::table.filter(conversation_members::user_id.eq(user_id)))
            .execute(conn)?;

        for &conversation_id in &affected {
            let remaining: Option<Uuid> = conversation_members::table
                .filter(conversation_members::conversation_id.eq(conversation_id))
                .order(conversation_members::joined_at.asc())
                .select(conversation_members::user_id)
                .first::<Uuid>(conn)
                .optional()?;

            match remaining {
                None => {
                    diesel::delete(conversations::table.find(conversation_id)).execute(conn)?;
                }
                Some(successor) => {
                    // Only touch admin_id if the deleted user held it
                    diesel::update(
                        conversations::table
                            .find(conversation_id)
                            .filter(conversations::admin_id.eq(user_id)),
                    )
                    .set(conversations::admin_id.eq(successor))
                    .execute(conn)?;
                }
            }
        }

        Ok(affected)
    })?;

    tracing::info!(user_id = %user_id, "removed deleted user from conversations");
    Ok(affected)
}
