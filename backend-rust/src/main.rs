use std::sync::Arc;

use anyhow::Context;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use positioning_backend::anchors::{load_anchor_file, AnchorDirectory};
use positioning_backend::config::EngineConfig;
use positioning_backend::handlers::router;
use positioning_backend::ingest_hub::start_ingest_hub;
use positioning_backend::store::{MemoryStore, PgStore, PositionStore};
use positioning_backend::PositionEngine;

// ─── Store selection ──────────────────────────────────────────────────────────

async fn open_store(config: &EngineConfig) -> anyhow::Result<Arc<dyn PositionStore>> {
    let Some(url) = config.database_url.as_deref() else {
        warn!("DATABASE_URL not set, history is kept in memory only");
        return Ok(Arc::new(MemoryStore::new()));
    };
    let store = PgStore::connect(url, config.store_timeout)
        .await
        .context("connecting to DATABASE_URL")?;
    store.ensure_schema().await.context("preparing history schema")?;
    info!("History store: PostgreSQL");
    Ok(Arc::new(store))
}

// ─── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "positioning_backend=info".into()),
        )
        .init();

    info!("📍 Positioning backend starting...");

    let config = EngineConfig::from_env();
    let directory = load_anchor_file(&config.anchors_file).await?;
    if directory.active_anchors().len() < config.solver.min_ranges {
        warn!(
            "Only {} active anchors configured; tags cannot be resolved until at least {} are active",
            directory.active_anchors().len(),
            config.solver.min_ranges
        );
    }

    let store = open_store(&config).await?;
    let engine = Arc::new(PositionEngine::new(&config, Arc::new(directory), store));

    tokio::spawn(start_ingest_hub(config.ingest_udp_port, engine.clone()));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = router(engine).layer(cors);

    let addr = format!("0.0.0.0:{}", config.http_port);
    info!("🚀 Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}
