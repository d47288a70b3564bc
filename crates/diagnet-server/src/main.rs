use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use diagnet_ingest::{spawn_pipeline, ConnectionStatus, IngestMetrics};
use diagnet_storage::sqlite::SqliteReadingStore;
use diagnet_storage::ReadingStore;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use diagnet_analysis::analyzer::Analyzer;
use diagnet_server::app;
use diagnet_server::config::ServerConfig;
use diagnet_server::identity::StaticIdentityProvider;
use diagnet_server::state::AppState;

const MAINTENANCE_INTERVAL_SECS: u64 = 3600;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("diagnet=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/server.toml".to_string());

    let config = ServerConfig::load(&config_path)?;
    config.validate()?;
    tracing::info!(config = %config_path, "diagnet-server starting");

    let store: Arc<dyn ReadingStore> =
        Arc::new(SqliteReadingStore::open(Path::new(&config.data_dir))?);
    let ingest_metrics = Arc::new(IngestMetrics::default());
    let mqtt_status = Arc::new(ConnectionStatus::default());
    let quality = Arc::new(config.quality.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pipeline = spawn_pipeline(
        config.mqtt.clone(),
        config.ingest.clone(),
        Arc::clone(&quality),
        Arc::clone(&store),
        Arc::clone(&ingest_metrics),
        Arc::clone(&mqtt_status),
        shutdown_rx.clone(),
    );

    let maintenance = tokio::spawn(maintenance_loop(
        Arc::clone(&store),
        config.retention.days,
        config.compression.age_days,
        shutdown_rx,
    ));

    let state = AppState {
        store,
        analyzer: Arc::new(Analyzer::new(config.analysis.clone())),
        identity: Arc::new(StaticIdentityProvider::from_entries(&config.auth.users)),
        ingest_metrics,
        mqtt_status,
        quality,
        jwt_secret: Arc::new(config.auth.secret.clone()),
        token_ttl_ms: config.auth.token_ttl_ms,
        clock_skew: chrono::Duration::seconds(config.ingest.clock_skew_s),
        request_timeout: Duration::from_secs(config.http.request_timeout_s),
        start_time: Utc::now(),
    };

    let app = app::build_http_app(state);
    let listener = tokio::net::TcpListener::bind(&config.http.bind).await?;
    tracing::info!(bind = %config.http.bind, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    // Stop the pipeline: the subscriber quits accepting, the persister
    // drains within its grace window.
    let _ = shutdown_tx.send(true);
    let _ = pipeline.subscriber.await;
    let _ = pipeline.persister.await;
    let _ = maintenance.await;

    tracing::info!("diagnet-server stopped");
    Ok(())
}

/// Hourly retention and compression pass over the chunk store.
async fn maintenance_loop(
    store: Arc<dyn ReadingStore>,
    retention_days: u32,
    compression_age_days: u32,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(Duration::from_secs(MAINTENANCE_INTERVAL_SECS));
    loop {
        tokio::select! {
            _ = tick.tick() => {
                let now = Utc::now();
                let retention_cutoff = now - chrono::Duration::days(retention_days as i64);
                match store.drop_before(retention_cutoff) {
                    Ok(0) => {}
                    Ok(dropped) => tracing::info!(dropped, "retention pass dropped readings"),
                    Err(e) => tracing::error!(error = %e, "retention pass failed"),
                }

                let compression_cutoff = now - chrono::Duration::days(compression_age_days as i64);
                match store.compress_before(compression_cutoff) {
                    Ok(0) => {}
                    Ok(chunks) => tracing::info!(chunks, "compacted chunks"),
                    Err(e) => tracing::error!(error = %e, "compression pass failed"),
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}
