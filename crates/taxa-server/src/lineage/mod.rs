//! Lineage queries over a [`TaxonStore`]
//!
//! [`LineageEngine`] is stateless between calls and only reads, so it can be
//! used while an import is still writing. A node whose parent link has not been
//! committed yet simply reads as missing.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use taxa_common::{TaxonId, TaxonNode};
use tracing::{debug, instrument};

use crate::error::{LineageError, StoreError, StoreResult};
use crate::store::TaxonStore;

pub mod models;

pub use models::{ComparisonResult, LineagePath};

/// Longest lineage accepted before the walk is treated as a cycle
pub const DEFAULT_MAX_DEPTH: usize = 128;
/// *Homo sapiens*
pub const DEFAULT_REFERENCE_TAXON: TaxonId = 9606;
/// Bound on each store read made by a query
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct LineageConfig {
    pub max_depth: usize,
    pub reference_taxon: TaxonId,
    pub query_timeout: Duration,
}

impl Default for LineageConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            reference_taxon: DEFAULT_REFERENCE_TAXON,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

impl LineageConfig {
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    pub fn with_reference_taxon(mut self, reference: TaxonId) -> Self {
        self.reference_taxon = reference;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }
}

#[derive(Clone)]
pub struct LineageEngine {
    store: Arc<dyn TaxonStore>,
    config: LineageConfig,
}

impl LineageEngine {
    pub fn new(store: Arc<dyn TaxonStore>, config: LineageConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &LineageConfig {
        &self.config
    }

    pub fn reference_taxon(&self) -> TaxonId {
        self.config.reference_taxon
    }

    async fn bounded<T>(&self, fut: impl Future<Output = StoreResult<T>>) -> Result<T, LineageError> {
        match tokio::time::timeout(self.config.query_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StoreError::Timeout(self.config.query_timeout).into()),
        }
    }

    /// Shared walk guard: a repeated id or a walk longer than `max_depth`
    fn check_step(
        &self,
        start: TaxonId,
        current: TaxonId,
        depth: usize,
        seen: &mut HashSet<TaxonId>,
    ) -> Result<(), LineageError> {
        if depth >= self.config.max_depth || !seen.insert(current) {
            return Err(LineageError::CycleDetected {
                start,
                at: current,
                depth,
            });
        }
        Ok(())
    }

    /// Nodes from `id` up to the root, inclusive at both ends
    #[instrument(skip(self), level = "debug")]
    pub async fn lineage(&self, id: TaxonId) -> Result<LineagePath, LineageError> {
        let mut nodes: Vec<TaxonNode> = Vec::new();
        let mut seen = HashSet::new();
        let mut current = id;

        loop {
            self.check_step(id, current, nodes.len(), &mut seen)?;
            let node = self
                .bounded(self.store.get_node(current))
                .await?
                .ok_or(LineageError::NodeNotFound(current))?;

            let parent = node.parent_id;
            let is_root = node.is_root();
            nodes.push(node);
            if is_root {
                break;
            }
            current = parent;
        }

        debug!(taxon = id, depth = nodes.len(), "Resolved lineage");
        Ok(LineagePath::new(nodes))
    }

    /// Ids from `id` up to the root, read through parent links only
    pub async fn ancestor_ids(&self, id: TaxonId) -> Result<Vec<TaxonId>, LineageError> {
        let mut ids = Vec::new();
        let mut seen = HashSet::new();
        let mut current = id;

        loop {
            self.check_step(id, current, ids.len(), &mut seen)?;
            let parent = self
                .bounded(self.store.get_parent(current))
                .await?
                .ok_or(LineageError::NodeNotFound(current))?;

            ids.push(current);
            if parent == current {
                return Ok(ids);
            }
            current = parent;
        }
    }

    /// Lowest common ancestor of `a` and `b` and the two paths below it
    #[instrument(skip(self), level = "debug")]
    pub async fn compare(&self, a: TaxonId, b: TaxonId) -> Result<ComparisonResult, LineageError> {
        if a == b {
            let path = self.lineage(a).await?;
            let ancestor = path.nodes[0].clone();
            return Ok(ComparisonResult {
                ancestor,
                path_a: Vec::new(),
                path_b: Vec::new(),
                shared: path.nodes,
            });
        }

        let (lineage_a, lineage_b) = tokio::try_join!(self.lineage(a), self.lineage(b))?;
        let mut nodes_a = lineage_a.nodes;
        let mut nodes_b = lineage_b.nodes;

        let common = nodes_a
            .iter()
            .rev()
            .zip(nodes_b.iter().rev())
            .take_while(|(x, y)| x.taxon_id == y.taxon_id)
            .count();
        if common == 0 {
            return Err(LineageError::DisjointLineages { a, b });
        }

        let shared = nodes_a.split_off(nodes_a.len() - common);
        nodes_b.truncate(nodes_b.len() - common);
        nodes_a.reverse();
        nodes_b.reverse();

        Ok(ComparisonResult {
            ancestor: shared[0].clone(),
            path_a: nodes_a,
            path_b: nodes_b,
            shared,
        })
    }

    /// [`compare`](Self::compare) against the configured reference taxon
    pub async fn compare_with_reference(&self, a: TaxonId) -> Result<ComparisonResult, LineageError> {
        self.compare(a, self.config.reference_taxon).await
    }
}
