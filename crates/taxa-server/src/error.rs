//! Server-specific error types

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use taxa_common::TaxonId;
use thiserror::Error;

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors raised by a [`TaxonStore`](crate::store::TaxonStore) backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Integrity violation: {0}")]
    Integrity(String),
}

/// PostgreSQL error codes worth retrying: serialization failure, deadlock,
/// admin shutdown, connection failures and too many connections.
const TRANSIENT_SQLSTATES: &[&str] = &["40001", "40P01", "57P01", "08000", "08003", "08006", "53300"];

impl StoreError {
    /// Whether retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(e) => match e {
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => true,
                sqlx::Error::Database(db) => db
                    .code()
                    .is_some_and(|code| TRANSIENT_SQLSTATES.contains(&code.as_ref())),
                _ => false,
            },
            StoreError::Timeout(_) | StoreError::Unavailable(_) => true,
            StoreError::Integrity(_) => false,
        }
    }
}

/// The hierarchy cannot be turned into a single rooted tree
///
/// Always fatal: nothing is written when building fails.
#[derive(Error, Debug)]
pub enum HierarchyError {
    #[error("Malformed hierarchy: no root node (a node that is its own parent)")]
    NoRoot,

    #[error("Malformed hierarchy: {} root nodes found ({roots:?})", roots.len())]
    MultipleRoots { roots: Vec<TaxonId> },

    #[error("Malformed hierarchy: {count} nodes reference a missing parent (sample child→parent: {samples:?})")]
    DanglingParents {
        count: usize,
        samples: Vec<(TaxonId, TaxonId)>,
    },

    #[error("Malformed hierarchy: node {node} never reaches the root")]
    Cycle { node: TaxonId },

    #[error("Malformed hierarchy: lineage of taxon {node} has {depth} levels, more than the limit of {max_depth}")]
    TooDeep {
        node: TaxonId,
        depth: usize,
        max_depth: usize,
    },

    #[error("Failed to read source stream: {0}")]
    Read(#[from] std::io::Error),
}

impl HierarchyError {
    /// Structural problems as opposed to I/O failures
    pub fn is_malformed(&self) -> bool {
        !matches!(self, HierarchyError::Read(_))
    }
}

/// Loader stage: all nodes are written before any edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStage {
    Nodes,
    Edges,
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadStage::Nodes => write!(f, "nodes"),
            LoadStage::Edges => write!(f, "edges"),
        }
    }
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Load failed in {stage} stage at batch {batch_index} (offset {offset}) after {attempts} attempt(s): {source}")]
    Failure {
        stage: LoadStage,
        batch_index: usize,
        offset: usize,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("Load cancelled before {stage} batch {batch_index}")]
    Cancelled { stage: LoadStage, batch_index: usize },
}

/// Errors raised while obtaining the two taxdump streams
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download of {url} failed with HTTP status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Source file not found: {0}")]
    MissingFile(String),

    #[error("Archive error: {0}")]
    Archive(String),
}

/// Reasons an import job ends in `failed`
#[derive(Error, Debug)]
pub enum ImportError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Import cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ImportError {
    /// Short machine-readable kind recorded on the job
    pub fn kind(&self) -> &'static str {
        match self {
            ImportError::Source(_) => "source",
            ImportError::Hierarchy(e) if e.is_malformed() => "malformed_hierarchy",
            ImportError::Hierarchy(_) => "source",
            ImportError::Load(LoadError::Cancelled { .. }) | ImportError::Cancelled => "cancelled",
            ImportError::Load(LoadError::Failure { .. }) => "load_failure",
            ImportError::Store(_) => "store",
            ImportError::Verification(_) => "verification",
            ImportError::Internal(_) => "internal",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == "cancelled"
    }
}

/// Errors returned by lineage queries
#[derive(Error, Debug)]
pub enum LineageError {
    #[error("Taxon {0} not found")]
    NodeNotFound(TaxonId),

    #[error("Cycle detected walking up from taxon {start}: taxon {at} reached at depth {depth}")]
    CycleDetected {
        start: TaxonId,
        at: TaxonId,
        depth: usize,
    },

    #[error("Lineages of taxa {a} and {b} do not share a root")]
    DisjointLineages { a: TaxonId, b: TaxonId },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LineageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LineageError::NodeNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(StoreError::Unavailable("connection reset".into()).is_transient());
        assert!(!StoreError::Integrity("missing parent".into()).is_transient());
        assert!(!StoreError::Database(sqlx::Error::RowNotFound).is_transient());
    }

    #[test]
    fn test_import_error_kind() {
        assert_eq!(ImportError::Cancelled.kind(), "cancelled");
        assert_eq!(
            ImportError::from(HierarchyError::NoRoot).kind(),
            "malformed_hierarchy"
        );
        let too_deep = HierarchyError::TooDeep {
            node: 300,
            depth: 300,
            max_depth: 128,
        };
        assert_eq!(ImportError::from(too_deep).kind(), "malformed_hierarchy");
        let cancelled = ImportError::from(LoadError::Cancelled {
            stage: LoadStage::Edges,
            batch_index: 3,
        });
        assert!(cancelled.is_cancelled());
    }

    #[test]
    fn test_load_failure_message_carries_position() {
        let err = LoadError::Failure {
            stage: LoadStage::Nodes,
            batch_index: 7,
            offset: 35_000,
            attempts: 3,
            source: StoreError::Timeout(Duration::from_secs(30)),
        };
        let msg = err.to_string();
        assert!(msg.contains("nodes stage"));
        assert!(msg.contains("batch 7"));
        assert!(msg.contains("offset 35000"));
    }
}
