//! Taxa Server - Main entry point

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use taxa_common::logging::{init_logging, LogConfig};
use tokio::signal;
use tracing::{info, warn};

use taxa_server::config::Config;
use taxa_server::ingest::{ImportCoordinator, ImportJob, ImportPhase};
use taxa_server::lineage::LineageEngine;
use taxa_server::store::{PgStore, TaxonStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with configuration from environment
    let log_config = LogConfig::builder()
        .log_file_prefix("taxa-server")
        .filter_directives("taxa_server=debug,sqlx=warn,reqwest=info")
        .build();

    // Environment variables take precedence over the defaults above
    let log_config = LogConfig::from_env_with(log_config)?;
    let _log_guard = init_logging(&log_config)?;

    info!("Starting Taxa Server");

    let config = Config::load()?;
    info!(
        batch_size = config.import.batch_size,
        auto_import = config.import.auto_import,
        "Configuration loaded"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout_secs))
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;
    info!("Database connection pool established");

    let store = PgStore::new(pool)
        .with_query_timeout(Duration::from_secs(config.lineage.query_timeout_secs));
    store.migrate().await.context("Failed to run migrations")?;
    info!("Database migrations completed");

    let store: Arc<dyn TaxonStore> = Arc::new(store);
    let coordinator = ImportCoordinator::new(
        Arc::clone(&store),
        config.source_provider()?,
        config.import_config(),
    );
    let engine = LineageEngine::new(Arc::clone(&store), config.lineage_config());

    if config.import.auto_import {
        match coordinator.start_if_empty().await? {
            Some(outcome) => info!(job_id = %outcome.job_id(), "Initial import started"),
            None => {
                info!(nodes = store.count_nodes().await?, "Taxonomy already loaded");
                log_reference_lineage(&engine).await;
            },
        }
    } else {
        info!("Automatic import is disabled (TAXA_AUTO_IMPORT=false)");
    }

    let progress = tokio::spawn(log_progress(coordinator.clone(), engine));

    shutdown_signal().await;

    let job = coordinator.shutdown().await;
    progress.abort();
    if job.phase == ImportPhase::Failed && job.last_error.as_ref().is_some_and(|e| e.is_cancelled()) {
        warn!(job_id = %job.id, "Import cancelled by shutdown; re-run to resume");
    }

    info!("Server shut down gracefully");

    Ok(())
}

/// Log every published job snapshot until the channel closes
async fn log_progress(coordinator: ImportCoordinator, engine: LineageEngine) {
    let mut rx = coordinator.subscribe();
    let mut last_phase = rx.borrow().phase;

    while rx.changed().await.is_ok() {
        let job: ImportJob = rx.borrow_and_update().clone();
        if job.phase != last_phase {
            info!(job_id = %job.id, phase = %job.phase, "Import phase");
            last_phase = job.phase;
        }
        match job.phase {
            ImportPhase::Loading => info!(
                nodes = job.counts.nodes_committed,
                edges = job.counts.edges_committed,
                "Import progress: {:.1}%",
                job.completion_percentage()
            ),
            ImportPhase::Complete => log_reference_lineage(&engine).await,
            ImportPhase::Failed => {
                if let Some(error) = &job.last_error {
                    warn!(phase = %error.phase, kind = %error.kind, "Import failed: {}", error.message);
                }
            },
            _ => {},
        }
    }
}

/// Sanity read of the configured reference taxon
async fn log_reference_lineage(engine: &LineageEngine) {
    let reference = engine.reference_taxon();
    match engine.lineage(reference).await {
        Ok(path) => info!(
            taxon_id = reference,
            depth = path.len(),
            "Reference lineage: {}",
            path.to_display_string()
        ),
        Err(e) if e.is_not_found() => info!(taxon_id = reference, "Reference taxon not in the loaded taxonomy"),
        Err(e) => warn!(taxon_id = reference, error = %e, "Reference lineage unreadable"),
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
