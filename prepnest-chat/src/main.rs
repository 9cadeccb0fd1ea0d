use axum::{routing::{get, post, delete}, Router};
use std::sync::Arc;
use socketioxide::SocketIo;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

mod config;
mod events;
mod models;
mod routes;
mod schema;
mod socket;

use config::AppConfig;
use prepnest_shared::clients::db::{create_pool, DbPool};
use prepnest_shared::clients::rabbitmq::RabbitMQClient;
use prepnest_shared::clients::redis::RedisClient;
use prepnest_shared::middleware::init_metrics;

pub struct AppState {
    pub db: DbPool,
    pub config: AppConfig,
    pub rabbitmq: RabbitMQClient,
    pub redis: RedisClient,
    pub io: SocketIo,
    pub http_client: reqwest::Client,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    prepnest_shared::middleware::init_tracing("prepnest-chat");

    let config = AppConfig::load()?;
    let port = config.port;

    let db = create_pool(&config.database_url)?;
    let rabbitmq = RabbitMQClient::connect(&config.rabbitmq_url).await?;
    let redis = RedisClient::connect(&config.redis_url).await?;
    let metrics_handle = init_metrics()?;

    // Build Socket.IO layer - we need io in AppState for emitting from REST routes
    let (sio_layer, io) = SocketIo::builder().build_layer();

    let http_client = reqwest::Client::new();
    let state = Arc::new(AppState {
        db,
        config,
        rabbitmq,
        redis,
        io: io.clone(),
        http_client,
        metrics_handle,
    });

    // Configure the Socket.IO namespace with state via closure
    io.ns("/", {
        let state = state.clone();
        move |socket: socketioxide::extract::SocketRef| {
            let state = state.clone();
            async move {
                crate::socket::handlers::on_connect_with_state(socket, state).await;
            }
        }
    });

    // Spawn RabbitMQ subscriber for user.deleted events
    let sub_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = events::subscriber::listen_user_deleted(sub_state).await {
            tracing::error!(error = %e, "user.deleted subscriber failed");
        }
    });

    let app = Router::new()
        // Health + metrics
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::health::metrics))
        // Conversations
        .route("/dm", post(routes::conversations::get_or_create_dm))
        .route("/conversations", get(routes::conversations::list_conversations))
        .route("/conversations/:id", get(routes::conversations::get_conversation))
        // Groups
        .route("/groups", post(routes::groups::create_group))
        .route("/groups/:id/join", post(routes::groups::join_group))
        .route("/groups/:id/leave", post(routes::groups::leave_group))
        .route("/groups/:id/edit", post(routes::groups::edit_group))
        .route("/groups/:id/kick", post(routes::groups::kick_member))
        .route("/groups/:id", delete(routes::groups::delete_group))
        // Messages
        .route("/conversations/:id/messages", get(routes::messages::list_messages))
        .route("/messages", post(routes::messages::send_message))
        .route("/messages/:id", delete(routes::messages::delete_message))
        .route("/unread-count", get(routes::messages::get_unread_count))
        .layer(axum::middleware::from_fn(prepnest_shared::middleware::metrics_middleware))
        .layer(sio_layer)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, "prepnest-chat starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
