use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use ledger_rs::{config::Config, health::health, queue::scheduler::Scheduler};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    tracing::info!("starting ledger service");

    let config = Config::from_env().expect("failed to load configuration from environment");

    tracing::info!(host = %config.host, port = config.port, "configuration loaded");

    tracing::info!("connecting to database");
    let pool = ledger_rs::db::init_pool(&config.database_url)
        .await
        .expect("failed to connect to database");

    tracing::info!("running migrations");
    sqlx::migrate!("./db/migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    let scheduler = Arc::new(Scheduler::new(pool.clone(), config.clone()));
    tokio::spawn(scheduler.run());

    let app = Router::new().route("/api/health", get(health)).layer(
        CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "ledger service listening");

    let listener = tokio::net::TcpListener::bind(addr).await.expect("failed to bind address");

    axum::serve(listener, app).await.expect("server failed to start");
}
