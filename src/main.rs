//! IoT Farming backend
//!
//! Ingests greenhouse sensor readings, classifies them against per-type
//! threshold profiles, persists device status and telemetry, and streams
//! status snapshots to dashboards over WebSocket.

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod classifier;
mod config;
mod db;
mod error;
mod fallback;
mod handlers;
mod ingest;
mod models;
mod simulator;
mod state;
mod storage;
mod validation;
mod websocket;

use crate::config::Settings;
use crate::simulator::TelemetrySimulator;
use crate::state::AppState;
use crate::storage::Storage;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env
    dotenv::dotenv().ok();

    // Logging
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,iot_farming=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();

    // Load configuration
    let settings = Settings::from_env()?;
    let bind_address = format!("{}:{}", settings.server.host, settings.server.port);

    info!("Starting IoT farming backend");
    info!("Binding server to {}", bind_address);

    let storage = Storage::connect(&settings.database).await;

    // Shared application state
    let app_state = Arc::new(RwLock::new(
        AppState::new(storage).with_broadcast_interval(settings.broadcast.interval()),
    ));

    // ---------------------------------------------------------------------
    // Telemetry simulator background task
    // IMPORTANT: use actix_rt::spawn (NOT tokio::spawn)
    // ---------------------------------------------------------------------
    if settings.simulator.enabled {
        let simulator = TelemetrySimulator::new(&settings.simulator);
        let simulator_state = app_state.clone();

        actix_rt::spawn(async move {
            simulator.run(simulator_state).await;
        });
    } else {
        info!("Telemetry simulator disabled");
    }

    // ---------------------------------------------------------------------
    // HTTP + WebSocket server
    // ---------------------------------------------------------------------
    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .wrap(tracing_actix_web::TracingLogger::default())
            .configure(handlers::configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}
