//! Configuration management

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use taxa_common::TaxonId;

use crate::ingest::taxdump::{
    DownloadConfig, LoaderConfig, LocalTaxdump, NcbiTaxdumpDownloader, SourceProvider,
    DEFAULT_TAXDUMP_URL,
};
use crate::ingest::ImportConfig;
use crate::lineage::LineageConfig;

// ============================================================================
// Database Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/taxa";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

// ============================================================================
// Import Configuration Constants
// ============================================================================

/// Default records per loader batch.
pub const DEFAULT_BATCH_SIZE: usize = crate::ingest::taxdump::loader::DEFAULT_BATCH_SIZE;

/// Default attempts per batch before the load fails.
pub const DEFAULT_MAX_RETRIES: u32 = crate::ingest::taxdump::loader::DEFAULT_MAX_RETRIES;

/// Default base delay between batch retries in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// Default bound on a single batch commit in seconds.
pub const DEFAULT_BATCH_TIMEOUT_SECS: u64 = 120;

/// Default number of ids whose lineage is checked after a load.
pub const DEFAULT_VERIFY_SAMPLE_SIZE: usize = 16;

/// Default cache directory for the downloaded taxdump.
pub const DEFAULT_CACHE_DIR: &str = "./data/taxdump";

// ============================================================================
// Lineage Configuration Constants
// ============================================================================

/// Default per-read timeout of lineage queries in seconds.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 10;

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub import: ImportSettings,
    pub source: SourceConfig,
    pub lineage: LineageSettings,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Import pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSettings {
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub batch_timeout_secs: u64,
    pub verify_sample_size: usize,
    /// Import on startup when the store is empty
    pub auto_import: bool,
}

/// Where taxdump files come from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Read an already extracted taxdump from here instead of downloading
    pub local_dir: Option<PathBuf>,
    pub taxdump_url: String,
    pub cache_dir: PathBuf,
    pub expected_records: Option<u64>,
}

/// Lineage query configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageSettings {
    pub max_depth: usize,
    pub reference_taxon: TaxonId,
    pub query_timeout_secs: u64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_opt<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();
        let config = Config {
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL").unwrap_or(defaults.database.url),
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS),
                min_connections: env_or("DATABASE_MIN_CONNECTIONS", DEFAULT_DATABASE_MIN_CONNECTIONS),
                connect_timeout_secs: env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
                idle_timeout_secs: env_or("DATABASE_IDLE_TIMEOUT", DEFAULT_DATABASE_IDLE_TIMEOUT_SECS),
            },
            import: ImportSettings {
                batch_size: env_or("TAXA_BATCH_SIZE", DEFAULT_BATCH_SIZE),
                max_retries: env_or("TAXA_MAX_RETRIES", DEFAULT_MAX_RETRIES),
                retry_delay_ms: env_or("TAXA_RETRY_DELAY_MS", DEFAULT_RETRY_DELAY_MS),
                batch_timeout_secs: env_or("TAXA_BATCH_TIMEOUT_SECS", DEFAULT_BATCH_TIMEOUT_SECS),
                verify_sample_size: env_or("TAXA_VERIFY_SAMPLE_SIZE", DEFAULT_VERIFY_SAMPLE_SIZE),
                auto_import: env_or("TAXA_AUTO_IMPORT", true),
            },
            source: SourceConfig {
                local_dir: std::env::var("TAXA_SOURCE_DIR")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .map(PathBuf::from),
                taxdump_url: std::env::var("TAXA_TAXDUMP_URL").unwrap_or(defaults.source.taxdump_url),
                cache_dir: std::env::var("TAXA_CACHE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.source.cache_dir),
                expected_records: env_opt("TAXA_EXPECTED_RECORDS"),
            },
            lineage: LineageSettings {
                max_depth: env_or("TAXA_MAX_DEPTH", crate::lineage::DEFAULT_MAX_DEPTH),
                reference_taxon: env_or(
                    "TAXA_REFERENCE_TAXON",
                    crate::lineage::DEFAULT_REFERENCE_TAXON,
                ),
                query_timeout_secs: env_or("TAXA_QUERY_TIMEOUT_SECS", DEFAULT_QUERY_TIMEOUT_SECS),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.import.batch_size == 0 {
            anyhow::bail!("TAXA_BATCH_SIZE must be greater than 0");
        }

        if self.import.max_retries == 0 {
            anyhow::bail!("TAXA_MAX_RETRIES must be greater than 0");
        }

        if self.lineage.max_depth == 0 {
            anyhow::bail!("TAXA_MAX_DEPTH must be greater than 0");
        }

        if self.source.local_dir.is_none() && self.source.taxdump_url.is_empty() {
            anyhow::bail!("Either TAXA_SOURCE_DIR or TAXA_TAXDUMP_URL must be set");
        }

        Ok(())
    }

    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig::default()
            .with_batch_size(self.import.batch_size)
            .with_max_retries(self.import.max_retries)
            .with_retry_delay(Duration::from_millis(self.import.retry_delay_ms))
            .with_batch_timeout(Duration::from_secs(self.import.batch_timeout_secs))
    }

    pub fn import_config(&self) -> ImportConfig {
        ImportConfig {
            loader: self.loader_config(),
            verify_sample_size: self.import.verify_sample_size,
            reference_taxon: Some(self.lineage.reference_taxon),
            max_depth: self.lineage.max_depth,
        }
    }

    pub fn lineage_config(&self) -> LineageConfig {
        LineageConfig::default()
            .with_max_depth(self.lineage.max_depth)
            .with_reference_taxon(self.lineage.reference_taxon)
            .with_query_timeout(Duration::from_secs(self.lineage.query_timeout_secs))
    }

    /// Local directory when configured, the NCBI downloader otherwise
    pub fn source_provider(&self) -> anyhow::Result<Arc<dyn SourceProvider>> {
        let expected = self.source.expected_records;
        if let Some(dir) = &self.source.local_dir {
            return Ok(Arc::new(LocalTaxdump::new(dir).with_expected_records(expected)));
        }

        let download = DownloadConfig::new(&self.source.cache_dir)
            .with_url(&self.source.taxdump_url)
            .with_expected_records(expected);
        let downloader =
            NcbiTaxdumpDownloader::new(download).context("Failed to build taxdump downloader")?;
        Ok(Arc::new(downloader))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            import: ImportSettings {
                batch_size: DEFAULT_BATCH_SIZE,
                max_retries: DEFAULT_MAX_RETRIES,
                retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
                batch_timeout_secs: DEFAULT_BATCH_TIMEOUT_SECS,
                verify_sample_size: DEFAULT_VERIFY_SAMPLE_SIZE,
                auto_import: true,
            },
            source: SourceConfig {
                local_dir: None,
                taxdump_url: DEFAULT_TAXDUMP_URL.to_string(),
                cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
                expected_records: None,
            },
            lineage: LineageSettings {
                max_depth: crate::lineage::DEFAULT_MAX_DEPTH,
                reference_taxon: crate::lineage::DEFAULT_REFERENCE_TAXON,
                query_timeout_secs: DEFAULT_QUERY_TIMEOUT_SECS,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "DATABASE_URL",
        "TAXA_BATCH_SIZE",
        "TAXA_SOURCE_DIR",
        "TAXA_REFERENCE_TAXON",
        "TAXA_AUTO_IMPORT",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lineage.reference_taxon, 9606);
        assert_eq!(config.import_config().verify_sample_size, DEFAULT_VERIFY_SAMPLE_SIZE);
    }

    #[test]
    fn test_invalid_pool_sizes_rejected() {
        let mut config = Config::default();
        config.database.min_connections = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_load_reads_environment() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgresql://db.example/taxa");
        std::env::set_var("TAXA_BATCH_SIZE", "250");
        std::env::set_var("TAXA_SOURCE_DIR", "/tmp/taxdump");
        std::env::set_var("TAXA_REFERENCE_TAXON", "10090");
        std::env::set_var("TAXA_AUTO_IMPORT", "false");

        let config = Config::load().unwrap();
        assert_eq!(config.database.url, "postgresql://db.example/taxa");
        assert_eq!(config.loader_config().batch_size, 250);
        assert_eq!(config.source.local_dir, Some(PathBuf::from("/tmp/taxdump")));
        assert_eq!(config.lineage_config().reference_taxon, 10090);
        assert!(!config.import.auto_import);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_zero_batch_size_fails_validation() {
        clear_env();
        std::env::set_var("TAXA_BATCH_SIZE", "0");
        assert!(Config::load().is_err());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_local_dir_selects_local_source() {
        clear_env();
        let mut config = Config::default();
        config.source.local_dir = Some(PathBuf::from("/data/taxdump"));
        let source = config.source_provider().unwrap();
        assert!(source.describe().contains("/data/taxdump"));
    }
}
