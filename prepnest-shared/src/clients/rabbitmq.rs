use anyhow::Context;
use lapin::{
    options::*, types::FieldTable, BasicProperties, Channel, Connection, ConnectionProperties,
    Consumer,
};
use serde::Serialize;

use crate::types::Event;

/// Topic exchange all prepnest services publish to.
const EXCHANGE_NAME: &str = "prepnest.events";

#[derive(Clone)]
pub struct RabbitMQClient {
    channel: Channel,
}

impl RabbitMQClient {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let conn = Connection::connect(url, ConnectionProperties::default())
            .await
            .context("connecting to RabbitMQ")?;
        let channel = conn.create_channel().await.context("opening channel")?;

        channel
            .exchange_declare(
                EXCHANGE_NAME,
                lapin::ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("declaring exchange {EXCHANGE_NAME}"))?;

        tracing::info!(url = %url, exchange = %EXCHANGE_NAME, "connected to RabbitMQ");
        Ok(Self { channel })
    }

    /// Publish an event, routed by its `event_type` (e.g.
    /// `prepnest.chat.message.sent`). Waits for broker confirmation.
    pub async fn publish<T: Serialize>(&self, event: &Event<T>) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(event).context("serializing event")?;

        self.channel
            .basic_publish(
                EXCHANGE_NAME,
                &event.event_type,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(2), // persistent
            )
            .await
            .context("publishing event")?
            .await
            .context("awaiting publish confirmation")?;

        tracing::debug!(
            routing_key = %event.event_type,
            event_id = %event.id,
            "event published"
        );

        Ok(())
    }

    /// Declare a durable queue bound to one routing key and start consuming.
    pub async fn subscribe(&self, queue_name: &str, routing_key: &str) -> anyhow::Result<Consumer> {
        self.channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("declaring queue {queue_name}"))?;

        self.channel
            .queue_bind(
                queue_name,
                EXCHANGE_NAME,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("binding {queue_name} to {routing_key}"))?;

        let consumer = self
            .channel
            .basic_consume(
                queue_name,
                &format!("{queue_name}-consumer"),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .context("starting consumer")?;

        tracing::info!(
            queue = %queue_name,
            routing_key = %routing_key,
            "subscribed to RabbitMQ queue"
        );

        Ok(consumer)
    }
}
