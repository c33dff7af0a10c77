use axum::{Json, Router, routing::get};
use parlor::{AppState, config::Config, hub::Hub, lifecycle::RoomLifecycle, rooms, store};
use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    let db_pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect(&config.database_url)
        .await?;
    store::setup(&db_pool).await?;
    tracing::info!("database ready");

    let (hub, hub_handle) = Hub::new(db_pool.clone());
    tokio::spawn(hub.run());
    tokio::spawn(RoomLifecycle::new(db_pool.clone(), hub_handle.clone()).run());

    let app_state = AppState {
        db_pool,
        hub: hub_handle,
        config: config.clone(),
    };
    let app = Router::new()
        .route("/health", get(health))
        .nest("/ws", rooms::router())
        .with_state(app_state)
        .layer(CorsLayer::permissive());

    tracing::info!(addr = %config.bind_addr, "listening");
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
