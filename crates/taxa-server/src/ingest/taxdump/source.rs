//! Where taxdump streams come from

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::SourceError;

/// Hierarchy records file name inside a taxdump
pub const NODES_FILE: &str = "nodes.dmp";
/// Name records file name inside a taxdump
pub const NAMES_FILE: &str = "names.dmp";

/// The two readable taxdump streams
pub struct SourceStreams {
    pub nodes: Box<dyn Read + Send>,
    pub names: Box<dyn Read + Send>,
    /// Expected node count, when the provider knows it
    pub expected_records: Option<u64>,
}

impl std::fmt::Debug for SourceStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceStreams")
            .field("expected_records", &self.expected_records)
            .finish_non_exhaustive()
    }
}

/// Supplies fresh taxdump streams for each import
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Open both streams; called once per import attempt
    async fn open(&self) -> Result<SourceStreams, SourceError>;

    /// Human-readable origin, for logs
    fn describe(&self) -> String;
}

/// Extracted taxdump in a local directory
#[derive(Debug, Clone)]
pub struct LocalTaxdump {
    dir: PathBuf,
    expected_records: Option<u64>,
}

impl LocalTaxdump {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            expected_records: None,
        }
    }

    pub fn with_expected_records(mut self, expected: Option<u64>) -> Self {
        self.expected_records = expected;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether both files are present
    pub fn is_complete(&self) -> bool {
        self.dir.join(NODES_FILE).is_file() && self.dir.join(NAMES_FILE).is_file()
    }

    fn open_file(&self, name: &str) -> Result<File, SourceError> {
        let path = self.dir.join(name);
        if !path.is_file() {
            return Err(SourceError::MissingFile(path.display().to_string()));
        }
        Ok(File::open(&path)?)
    }
}

#[async_trait]
impl SourceProvider for LocalTaxdump {
    async fn open(&self) -> Result<SourceStreams, SourceError> {
        let nodes = self.open_file(NODES_FILE)?;
        let names = self.open_file(NAMES_FILE)?;
        debug!(dir = %self.dir.display(), "Opened local taxdump");

        Ok(SourceStreams {
            nodes: Box::new(nodes),
            names: Box::new(names),
            expected_records: self.expected_records,
        })
    }

    fn describe(&self) -> String {
        format!("local taxdump at {}", self.dir.display())
    }
}

/// Taxdump content held in memory
#[derive(Debug, Clone)]
pub struct StaticSource {
    nodes: Arc<[u8]>,
    names: Arc<[u8]>,
    expected_records: Option<u64>,
}

impl StaticSource {
    pub fn new(nodes: impl Into<Vec<u8>>, names: impl Into<Vec<u8>>) -> Self {
        Self {
            nodes: nodes.into().into(),
            names: names.into().into(),
            expected_records: None,
        }
    }

    pub fn with_expected_records(mut self, expected: Option<u64>) -> Self {
        self.expected_records = expected;
        self
    }
}

#[async_trait]
impl SourceProvider for StaticSource {
    async fn open(&self) -> Result<SourceStreams, SourceError> {
        Ok(SourceStreams {
            nodes: Box::new(Cursor::new(Arc::clone(&self.nodes))),
            names: Box::new(Cursor::new(Arc::clone(&self.names))),
            expected_records: self.expected_records,
        })
    }

    fn describe(&self) -> String {
        format!("in-memory taxdump ({} + {} bytes)", self.nodes.len(), self.names.len())
    }
}
