//! NCBI taxdump download
//!
//! Streams `taxdump.tar.gz` over HTTPS into a cache directory and extracts
//! `nodes.dmp` and `names.dmp` next to it. A complete extracted pair in the
//! cache is reused unless `force` is set.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use futures::StreamExt;
use reqwest::Client;
use tar::Archive;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::source::{LocalTaxdump, SourceProvider, SourceStreams, NAMES_FILE, NODES_FILE};
use crate::error::SourceError;

/// Public NCBI taxonomy dump
pub const DEFAULT_TAXDUMP_URL: &str = "https://ftp.ncbi.nlm.nih.gov/pub/taxonomy/taxdump.tar.gz";

const ARCHIVE_FILE: &str = "taxdump.tar.gz";

/// Downloader settings
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub url: String,
    pub cache_dir: PathBuf,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
    /// Re-download even when the cache is complete
    pub force: bool,
    pub expected_records: Option<u64>,
}

impl DownloadConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            url: DEFAULT_TAXDUMP_URL.to_string(),
            cache_dir: cache_dir.into(),
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(30 * 60),
            force: false,
            expected_records: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_expected_records(mut self, expected: Option<u64>) -> Self {
        self.expected_records = expected;
        self
    }
}

/// [`SourceProvider`] that fetches the NCBI archive on demand
pub struct NcbiTaxdumpDownloader {
    client: Client,
    config: DownloadConfig,
}

impl NcbiTaxdumpDownloader {
    pub fn new(config: DownloadConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("taxa-server/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    fn cached(&self) -> LocalTaxdump {
        LocalTaxdump::new(&self.config.cache_dir).with_expected_records(self.config.expected_records)
    }

    /// Ensure an extracted taxdump is in the cache and return its directory
    pub async fn fetch(&self) -> Result<PathBuf, SourceError> {
        let cached = self.cached();
        if !self.config.force && cached.is_complete() {
            info!(dir = %cached.dir().display(), "Using cached taxdump");
            return Ok(cached.dir().to_path_buf());
        }

        tokio::fs::create_dir_all(&self.config.cache_dir).await?;
        let archive = self.config.cache_dir.join(ARCHIVE_FILE);
        self.download_with_retry(&archive).await?;

        let dir = self.config.cache_dir.clone();
        let archive_path = archive.clone();
        tokio::task::spawn_blocking(move || extract_taxdump(&archive_path, &dir))
            .await
            .map_err(|e| SourceError::Archive(format!("extraction task failed: {}", e)))??;

        if let Err(e) = tokio::fs::remove_file(&archive).await {
            debug!(error = %e, "Could not remove downloaded archive");
        }

        Ok(self.config.cache_dir.clone())
    }

    /// Linear backoff: `retry_delay * attempt`. Client errors (4xx) are not retried.
    async fn download_with_retry(&self, dest: &Path) -> Result<u64, SourceError> {
        let mut attempt = 1;
        loop {
            match self.download_once(dest).await {
                Ok(bytes) => return Ok(bytes),
                Err(SourceError::HttpStatus { url, status }) if (400..500).contains(&status) => {
                    return Err(SourceError::HttpStatus { url, status });
                },
                Err(e) if attempt < self.config.max_retries => {
                    let delay = self.config.retry_delay * attempt;
                    warn!(
                        attempt,
                        max_retries = self.config.max_retries,
                        error = %e,
                        "Taxdump download failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }

    async fn download_once(&self, dest: &Path) -> Result<u64, SourceError> {
        info!(url = %self.config.url, "Downloading taxdump");
        let response = self.client.get(&self.config.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::HttpStatus {
                url: self.config.url.clone(),
                status: status.as_u16(),
            });
        }

        let partial = dest.with_extension("part");
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&partial, dest).await?;

        info!(bytes = written, mb = written / (1024 * 1024), "Downloaded taxdump archive");
        Ok(written)
    }
}

/// Extract `nodes.dmp` and `names.dmp` from a `.tar.gz` into `dir`
///
/// Members are written to a temporary name first so an interrupted
/// extraction never leaves a file that looks complete.
pub fn extract_taxdump(archive: &Path, dir: &Path) -> Result<(), SourceError> {
    let file = std::fs::File::open(archive)?;
    let mut tar = Archive::new(GzDecoder::new(file));
    let mut found_nodes = false;
    let mut found_names = false;

    let entries = tar
        .entries()
        .map_err(|e| SourceError::Archive(format!("failed to read tar archive: {}", e)))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| SourceError::Archive(format!("failed to read tar entry: {}", e)))?;
        let path = entry
            .path()
            .map_err(|e| SourceError::Archive(format!("invalid entry path: {}", e)))?
            .into_owned();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        let wanted = match name {
            NODES_FILE => &mut found_nodes,
            NAMES_FILE => &mut found_names,
            _ => {
                debug!(file = name, "Skipping archive member");
                continue;
            },
        };

        let target = dir.join(name);
        let partial = target.with_extension("dmp.part");
        let mut out = std::fs::File::create(&partial)?;
        let bytes = std::io::copy(&mut entry, &mut out)?;
        std::fs::rename(&partial, &target)?;
        *wanted = true;
        debug!(file = name, bytes, "Extracted archive member");

        if found_nodes && found_names {
            return Ok(());
        }
    }

    let missing = if found_nodes { NAMES_FILE } else { NODES_FILE };
    Err(SourceError::Archive(format!("{} not found in archive", missing)))
}

#[async_trait]
impl SourceProvider for NcbiTaxdumpDownloader {
    async fn open(&self) -> Result<SourceStreams, SourceError> {
        let dir = self.fetch().await?;
        LocalTaxdump::new(dir)
            .with_expected_records(self.config.expected_records)
            .open()
            .await
    }

    fn describe(&self) -> String {
        format!(
            "NCBI taxdump from {} (cache {})",
            self.config.url,
            self.config.cache_dir.display()
        )
    }
}
