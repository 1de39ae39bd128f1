//! Deferred deep-link attribution service: entry point.
//!
//! Records referral-link clicks together with a device fingerprint and,
//! when the installed app first launches, matches the launching device
//! back to the most likely click so the referral code can be recovered.

mod api;
mod classifier;
mod config;
mod db;
mod errors;
mod fingerprint;
mod landing;
mod matcher;
mod scoring;

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use db::SqliteClickStore;
use matcher::Matcher;
use scoring::{WeightTable, DEFAULT_WEIGHTS};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url, config.db_max_connections).await?;

    let weights = WeightTable::new(DEFAULT_WEIGHTS.to_vec())?;
    for entry in weights.entries() {
        info!(
            "Feature {} weighted {} bp ({:?})",
            entry.feature.as_str(),
            entry.basis_points,
            entry.rule
        );
    }
    info!(
        "Matching up to {} candidates with confidence floor {}",
        config.candidate_limit, config.confidence_floor
    );

    let matcher = Matcher::new(
        Arc::new(SqliteClickStore::new(pool.clone())),
        weights,
        config.confidence_floor,
        config.candidate_limit,
    );

    let api_state = Arc::new(api::ApiState {
        pool,
        matcher: Arc::new(matcher),
        config: config.clone(),
    });

    let app = api::router(api_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    // Peer addresses back the client IP when no proxy header is present.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
