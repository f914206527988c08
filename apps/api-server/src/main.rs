//! # Sluice API Server
//!
//! Actix-web host that puts fixed-window throttling in front of its routes.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{App, HttpServer, web};
use sluice_infra::InMemoryCounterStore;
use tracing_actix_web::TracingLogger;

mod config;
mod handlers;
mod middleware;
mod state;
mod telemetry;
mod throttle;

use config::AppConfig;
use middleware::ThrottleMiddleware;
use state::AppState;
use telemetry::{TelemetryConfig, init_telemetry};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_telemetry(&TelemetryConfig::from_env());

    let config = AppConfig::from_env();

    tracing::info!(
        "Starting Sluice API Server on {}:{}",
        config.host,
        config.port
    );

    let state = AppState::new(&config).await?;

    if let Some(store) = state.memory_store.clone() {
        spawn_purge(store, config.throttle.purge_interval);
    }

    HttpServer::new(move || {
        App::new()
            .wrap(ThrottleMiddleware::new(state.throttle.clone()))
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(handlers::configure_routes)
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await?;

    Ok(())
}

/// Periodically drop expired in-memory buckets.
fn spawn_purge(store: Arc<InMemoryCounterStore>, every: Duration) {
    actix_rt::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let purged = store.purge_expired().await;
            if purged > 0 {
                tracing::debug!(purged, "Purged expired throttle buckets");
            }
        }
    });
}
