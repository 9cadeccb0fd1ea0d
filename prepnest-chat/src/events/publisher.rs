use uuid::Uuid;

use prepnest_shared::clients::rabbitmq::RabbitMQClient;
use prepnest_shared::types::event::{payloads, routing_keys, Event};

// Publishing is fire-and-forget: the HTTP response never waits on the
// broker, a failure is logged and the event is lost.

pub async fn publish_message_sent(
    rabbitmq: &RabbitMQClient,
    message_id: Uuid,
    conversation_id: Uuid,
    sender_id: Uuid,
    content_preview: &str,
) {
    let event = Event::new(
        "prepnest-chat",
        routing_keys::CHAT_MESSAGE_SENT,
        payloads::MessageSent {
            message_id,
            conversation_id,
            sender_id,
            content_preview: content_preview.to_string(),
        },
    )
    .with_user(sender_id);

    if let Err(e) = rabbitmq.publish(&event).await {
        tracing::error!(error = %e, "failed to publish message.sent event");
    }
}

pub async fn publish_message_deleted(
    rabbitmq: &RabbitMQClient,
    message_id: Uuid,
    conversation_id: Uuid,
    sender_id: Uuid,
) {
    let event = Event::new(
        "prepnest-chat",
        routing_keys::CHAT_MESSAGE_DELETED,
        payloads::MessageDeleted {
            message_id,
            conversation_id,
            sender_id,
        },
    )
    .with_user(sender_id);

    if let Err(e) = rabbitmq.publish(&event).await {
        tracing::error!(error = %e, "failed to publish message.deleted event");
    }
}

pub async fn publish_group_created(
    rabbitmq: &RabbitMQClient,
    conversation_id: Uuid,
    admin_id: Uuid,
    member_ids: Vec<Uuid>,
) {
    let event = Event::new(
        "prepnest-chat",
        routing_keys::CHAT_GROUP_CREATED,
        payloads::GroupCreated {
            conversation_id,
            admin_id,
            member_ids,
        },
    )
    .with_user(admin_id);

    if let Err(e) = rabbitmq.publish(&event).await {
        tracing::error!(error = %e, "failed to publish group.created event");
    }
}
