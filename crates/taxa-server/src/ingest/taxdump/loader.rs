//! Batched, retrying writer from a [`Hierarchy`] into a [`TaxonStore`]
//!
//! Two stages run back to back: every node's attributes, then every parent
//! link. Both are pulled lazily from iterators, one batch at a time. Each batch is one store transaction. Writes overwrite by id, so
//! re-running against a partially loaded store converges to the same content.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use taxa_common::{ParentEdge, TaxonAttributes};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::hierarchy::Hierarchy;
use crate::error::{LoadError, LoadStage, StoreError, StoreResult};
use crate::store::TaxonStore;

/// Default records per batch
pub const DEFAULT_BATCH_SIZE: usize = 5_000;
/// Default attempts per batch, first attempt included
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default base delay between attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Default bound on one batch transaction
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Bulk loader configuration
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub batch_timeout: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
        }
    }
}

impl LoaderConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }
}

/// Outcome of a completed load
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub nodes_committed: usize,
    pub edges_committed: usize,
    pub node_batches: usize,
    pub edge_batches: usize,
    /// Attempts beyond the first, summed over all batches
    pub retries: u32,
    pub elapsed_ms: u64,
}

impl LoadReport {
    pub fn summary(&self) -> String {
        format!(
            "{} nodes in {} batches, {} edges in {} batches, {} retries, {:.1}s",
            self.nodes_committed,
            self.node_batches,
            self.edges_committed,
            self.edge_batches,
            self.retries,
            self.elapsed_ms as f64 / 1000.0
        )
    }
}

enum Batch {
    Nodes(Vec<TaxonAttributes>),
    Edges(Vec<ParentEdge>),
}

impl Batch {
    fn len(&self) -> usize {
        match self {
            Batch::Nodes(nodes) => nodes.len(),
            Batch::Edges(edges) => edges.len(),
        }
    }
}

#[derive(Default)]
struct StageOutcome {
    records: usize,
    batches: usize,
    retries: u32,
}

/// Writes a validated hierarchy into a store
pub struct BulkLoader {
    store: Arc<dyn TaxonStore>,
    config: LoaderConfig,
}

impl BulkLoader {
    pub fn new(store: Arc<dyn TaxonStore>, config: LoaderConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Load a validated hierarchy
    pub async fn load_hierarchy<F>(
        &self,
        hierarchy: &Hierarchy,
        cancel: &CancellationToken,
        progress: F,
    ) -> Result<LoadReport, LoadError>
    where
        F: FnMut(LoadStage, usize) + Send,
    {
        info!(nodes = hierarchy.len(), root = hierarchy.root_id(), "Loading hierarchy into store");
        self.load(hierarchy.attributes(), hierarchy.edges(), cancel, progress)
            .await
    }

    /// Load every node, then every edge
    ///
    /// `progress` is called after each committed batch with the stage and the
    /// number of records committed so far in that stage. `cancel` is checked
    /// before each batch; a batch already committing is never interrupted.
    /// The edge iterator is not touched until every node batch is committed.
    pub async fn load<A, E, F>(
        &self,
        attributes: A,
        edges: E,
        cancel: &CancellationToken,
        mut progress: F,
    ) -> Result<LoadReport, LoadError>
    where
        A: IntoIterator<Item = TaxonAttributes>,
        A::IntoIter: Send,
        E: IntoIterator<Item = ParentEdge>,
        E::IntoIter: Send,
        F: FnMut(LoadStage, usize) + Send,
    {
        let started = Instant::now();
        let batch_size = self.config.batch_size.max(1);
        debug!(batch_size, "Starting bulk load");

        let mut attributes = attributes.into_iter();
        let nodes = self
            .run_stage(
                LoadStage::Nodes,
                std::iter::from_fn(|| {
                    let chunk: Vec<_> = attributes.by_ref().take(batch_size).collect();
                    (!chunk.is_empty()).then_some(Batch::Nodes(chunk))
                }),
                cancel,
                &mut progress,
            )
            .await?;

        let mut edges = edges.into_iter();
        let links = self
            .run_stage(
                LoadStage::Edges,
                std::iter::from_fn(|| {
                    let chunk: Vec<_> = edges.by_ref().take(batch_size).collect();
                    (!chunk.is_empty()).then_some(Batch::Edges(chunk))
                }),
                cancel,
                &mut progress,
            )
            .await?;

        let report = LoadReport {
            nodes_committed: nodes.records,
            edges_committed: links.records,
            node_batches: nodes.batches,
            edge_batches: links.batches,
            retries: nodes.retries + links.retries,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!("Load complete: {}", report.summary());
        Ok(report)
    }

    async fn run_stage<I, F>(
        &self,
        stage: LoadStage,
        batches: I,
        cancel: &CancellationToken,
        progress: &mut F,
    ) -> Result<StageOutcome, LoadError>
    where
        I: Iterator<Item = Batch> + Send,
        F: FnMut(LoadStage, usize) + Send,
    {
        let mut outcome = StageOutcome::default();
        info!(%stage, "Starting load stage");

        for (batch_index, batch) in batches.enumerate() {
            if cancel.is_cancelled() {
                info!(%stage, batch_index, "Load cancelled at batch boundary");
                return Err(LoadError::Cancelled { stage, batch_index });
            }

            let attempts = self
                .commit_with_retry(&batch, stage, batch_index, outcome.records)
                .await?;

            outcome.records += batch.len();
            outcome.batches += 1;
            outcome.retries += attempts - 1;
            debug!(
                %stage,
                batch_index,
                committed = outcome.records,
                attempts,
                "Committed batch"
            );
            progress(stage, outcome.records);
        }

        info!(
            %stage,
            records = outcome.records,
            batches = outcome.batches,
            "Load stage complete"
        );
        Ok(outcome)
    }

    /// Returns the number of attempts the batch took
    async fn commit_with_retry(
        &self,
        batch: &Batch,
        stage: LoadStage,
        batch_index: usize,
        offset: usize,
    ) -> Result<u32, LoadError> {
        let max_retries = self.config.max_retries.max(1);
        let mut attempt = 1;
        loop {
            match self.commit_batch(batch).await {
                Ok(()) => return Ok(attempt),
                Err(e) if e.is_transient() && attempt < max_retries => {
                    let delay = self.config.retry_delay * attempt;
                    warn!(
                        %stage,
                        batch_index,
                        offset,
                        attempt,
                        max_retries,
                        error = %e,
                        "Batch failed with transient error, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(source) => {
                    return Err(LoadError::Failure {
                        stage,
                        batch_index,
                        offset,
                        attempts: attempt,
                        source,
                    })
                },
            }
        }
    }

    async fn commit_batch(&self, batch: &Batch) -> StoreResult<()> {
        let write = async {
            let mut tx = self.store.begin().await?;
            match batch {
                Batch::Nodes(nodes) => tx.upsert_nodes(nodes).await?,
                Batch::Edges(edges) => tx.upsert_edges(edges).await?,
            }
            tx.commit().await
        };

        match tokio::time::timeout(self.config.batch_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.config.batch_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::taxdump::hierarchy::HierarchyBuilder;
    use crate::ingest::taxdump::parser::NodeRecord;
    use crate::store::MemoryStore;

    fn chain(len: i64) -> Hierarchy {
        let mut builder = HierarchyBuilder::new();
        for id in 1..=len {
            builder.add_node(NodeRecord {
                taxon_id: id,
                parent_id: (id - 1).max(1),
                rank: None,
            });
        }
        builder.build().unwrap()
    }

    #[tokio::test]
    async fn test_load_in_batches_reports_progress() {
        let store = MemoryStore::new();
        let loader = BulkLoader::new(
            Arc::new(store.clone()),
            LoaderConfig::default().with_batch_size(4),
        );

        let mut seen = Vec::new();
        let report = loader
            .load_hierarchy(&chain(10), &CancellationToken::new(), |stage, n| seen.push((stage, n)))
            .await
            .unwrap();

        assert_eq!(report.nodes_committed, 10);
        assert_eq!(report.edges_committed, 10);
        assert_eq!(report.node_batches, 3);
        assert_eq!(report.edge_batches, 3);
        assert_eq!(report.retries, 0);
        assert_eq!(seen.first(), Some(&(LoadStage::Nodes, 4)));
        assert_eq!(seen.last(), Some(&(LoadStage::Edges, 10)));
        assert_eq!(store.count_nodes().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_batch_writes_nothing() {
        let store = MemoryStore::new();
        let loader = BulkLoader::new(Arc::new(store.clone()), LoaderConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = loader
            .load_hierarchy(&chain(3), &cancel, |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LoadError::Cancelled {
                stage: LoadStage::Nodes,
                batch_index: 0
            }
        ));
        assert_eq!(store.attribute_count().await, 0);
    }

    #[tokio::test]
    async fn test_load_from_plain_iterators() {
        let store = MemoryStore::new();
        let loader = BulkLoader::new(
            Arc::new(store.clone()),
            LoaderConfig::default().with_batch_size(2),
        );
        let nodes = chain(5);

        let report = loader
            .load(
                nodes.nodes().map(|n| n.attributes()),
                nodes.nodes().map(|n| n.edge()),
                &CancellationToken::new(),
                |_, _| {},
            )
            .await
            .unwrap();

        assert_eq!(report.node_batches, 3);
        assert_eq!(report.edges_committed, 5);
        assert_eq!(store.count_nodes().await.unwrap(), 5);
    }

    #[test]
    fn test_config_clamps() {
        let config = LoaderConfig::default().with_batch_size(0).with_max_retries(0);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.max_retries, 1);
    }
}
