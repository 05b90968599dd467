//! One-shot taxonomy queries against the configured store
//!
//! Usage:
//!   cargo run --bin taxa_query -- lineage 9606
//!   cargo run --bin taxa_query -- compare 9606 10090
//!   cargo run --bin taxa_query -- search mouse --limit 5
//!   cargo run --bin taxa_query -- import --dir ./taxdump

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use taxa_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use taxa_common::TaxonId;
use tracing::error;

use taxa_server::config::Config;
use taxa_server::ingest::taxdump::{LocalTaxdump, SourceProvider};
use taxa_server::ingest::{ImportCoordinator, ImportPhase};
use taxa_server::lineage::LineageEngine;
use taxa_server::store::{PgStore, TaxonStore};

#[derive(Parser, Debug)]
#[command(name = "taxa_query")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log debug output to the console
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Lineage of a taxon, from the taxon up to the root
    Lineage { id: TaxonId },

    /// Lowest common ancestor of two taxa
    Compare {
        a: TaxonId,
        /// Defaults to the configured reference taxon
        b: Option<TaxonId>,
    },

    /// Search species by scientific or common name
    Search {
        query: String,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Run an import and wait for it to finish
    Import {
        /// Extracted taxdump directory; defaults to the configured source
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Warn })
        .output(LogOutput::Console)
        .log_file_prefix("taxa-query")
        .build();
    let log_config = LogConfig::from_env_with(log_config.clone()).unwrap_or(log_config);
    let _log_guard = init_logging(&log_config).ok();

    match execute(&cli).await {
        Ok(output) => {
            let rendered = if cli.pretty {
                serde_json::to_string_pretty(&output)
            } else {
                serde_json::to_string(&output)
            };
            match rendered {
                Ok(text) => println!("{}", text),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    process::exit(1);
                },
            }
        },
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            process::exit(1);
        },
    }
}

async fn execute(cli: &Cli) -> Result<serde_json::Value> {
    let config = Config::load()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;
    let store = PgStore::new(pool)
        .with_query_timeout(Duration::from_secs(config.lineage.query_timeout_secs));
    if matches!(cli.command, Command::Import { .. }) {
        store.migrate().await.context("Failed to run migrations")?;
    }
    let store: Arc<dyn TaxonStore> = Arc::new(store);
    let engine = LineageEngine::new(Arc::clone(&store), config.lineage_config());

    match &cli.command {
        Command::Lineage { id } => {
            let path = engine.lineage(*id).await?;
            Ok(json!({
                "taxon_id": id,
                "depth": path.len(),
                "display": path.to_display_string(),
                "lineage": path.nodes,
            }))
        },
        Command::Compare { a, b } => {
            let result = match b {
                Some(b) => engine.compare(*a, *b).await?,
                None => engine.compare_with_reference(*a).await?,
            };
            Ok(json!({
                "ancestor": result.ancestor,
                "path_a": result.path_a_ids(),
                "path_b": result.path_b_ids(),
                "shared_count": result.shared_count(),
            }))
        },
        Command::Search { query, limit } => {
            let matches = store.search(query, *limit).await?;
            Ok(json!({ "query": query, "count": matches.len(), "results": matches }))
        },
        Command::Import { dir } => {
            let source: Arc<dyn SourceProvider> = match dir {
                Some(dir) => Arc::new(
                    LocalTaxdump::new(dir).with_expected_records(config.source.expected_records),
                ),
                None => config.source_provider()?,
            };
            let coordinator = ImportCoordinator::new(Arc::clone(&store), source, config.import_config());
            coordinator.trigger();
            let job = coordinator.wait().await;
            if job.phase != ImportPhase::Complete {
                let reason = job
                    .last_error
                    .as_ref()
                    .map(|e| format!("{} during {}: {}", e.kind, e.phase, e.message))
                    .unwrap_or_else(|| format!("ended in phase {}", job.phase));
                anyhow::bail!("Import failed: {}", reason);
            }
            Ok(job.to_json()?)
        },
    }
}
