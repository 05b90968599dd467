//! Import coordinator
//!
//! Runs download/read → parse → load → verify as one background job and
//! publishes every state change through a `watch` channel. At most one job
//! is active per coordinator; triggering while a job runs returns the running
//! job instead of starting another.
//!
//! ```text
//! idle → downloading → parsing → loading → verifying → complete
//!              └──────────┴──────────┴──────────┴────→ failed
//! ```

use std::io::{self, BufReader, Read};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use taxa_common::TaxonId;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::jobs::{ImportJob, ImportPhase};
use super::taxdump::{BulkLoader, Hierarchy, LoaderConfig, SourceProvider};
use crate::error::{ImportError, LoadStage, StoreResult};
use crate::lineage::{LineageConfig, LineageEngine, DEFAULT_MAX_DEPTH, DEFAULT_REFERENCE_TAXON};
use crate::store::TaxonStore;

/// Read buffer for the taxdump streams
const READ_BUFFER_BYTES: usize = 1 << 20;

/// Import pipeline settings
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub loader: LoaderConfig,
    /// Evenly spaced ids whose lineage is resolved after loading
    pub verify_sample_size: usize,
    /// Always verified first when present in the hierarchy
    pub reference_taxon: Option<TaxonId>,
    pub max_depth: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            loader: LoaderConfig::default(),
            verify_sample_size: 16,
            reference_taxon: Some(DEFAULT_REFERENCE_TAXON),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Result of [`ImportCoordinator::trigger`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started(Uuid),
    /// A job was already active; its id is returned
    AlreadyRunning(Uuid),
}

impl TriggerOutcome {
    pub fn job_id(&self) -> Uuid {
        match self {
            TriggerOutcome::Started(id) | TriggerOutcome::AlreadyRunning(id) => *id,
        }
    }
}

/// Stream wrapper that fails every read once the job is cancelled, so an
/// abandoned parse stops at its next buffer refill
struct CancellableReader<R> {
    inner: R,
    cancel: CancellationToken,
}

impl<R: Read> Read for CancellableReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::Other, "import cancelled"));
        }
        self.inner.read(buf)
    }
}

struct ActiveJob {
    id: Uuid,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

struct Inner {
    store: Arc<dyn TaxonStore>,
    source: Arc<dyn SourceProvider>,
    config: ImportConfig,
    active: Mutex<Option<ActiveJob>>,
    status: watch::Sender<ImportJob>,
}

/// Owns the single import job of a store
#[derive(Clone)]
pub struct ImportCoordinator {
    inner: Arc<Inner>,
}

impl ImportCoordinator {
    pub fn new(
        store: Arc<dyn TaxonStore>,
        source: Arc<dyn SourceProvider>,
        config: ImportConfig,
    ) -> Self {
        let (status, _) = watch::channel(ImportJob::idle());
        Self {
            inner: Arc::new(Inner {
                store,
                source,
                config,
                active: Mutex::new(None),
                status,
            }),
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<ActiveJob>> {
        self.inner.active()
    }

    /// Start an import unless one is already running
    ///
    /// Must be called from within a tokio runtime.
    pub fn trigger(&self) -> TriggerOutcome {
        let mut active = self.active();
        let current = self.inner.status.borrow().clone();
        if current.phase.is_active() {
            return TriggerOutcome::AlreadyRunning(current.id);
        }

        let job = ImportJob::start();
        let id = job.id;
        let cancel = CancellationToken::new();
        self.inner.status.send_replace(job.clone());

        let inner = Arc::clone(&self.inner);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { inner.run(job, token).await });

        *active = Some(ActiveJob {
            id,
            cancel,
            handle: Some(handle),
        });
        info!(job_id = %id, "Import triggered");
        TriggerOutcome::Started(id)
    }

    /// Trigger an import when the store holds no nodes
    pub async fn start_if_empty(&self) -> StoreResult<Option<TriggerOutcome>> {
        let count = self.inner.store.count_nodes().await?;
        if count > 0 {
            info!(nodes = count, "Store already populated, skipping import");
            return Ok(None);
        }
        info!("Store is empty, starting import");
        Ok(Some(self.trigger()))
    }

    /// Cancel the running job; `false` when nothing is running
    ///
    /// The job stops at its next checkpoint (source open, parse buffer refill,
    /// batch boundary, verification step) and ends `failed` with a `cancelled`
    /// error. A job that has not yet published a terminal phase when this
    /// returns `true` never ends `complete`.
    pub fn cancel(&self) -> bool {
        let active = self.active();
        if !self.inner.status.borrow().phase.is_active() {
            return false;
        }
        match active.as_ref() {
            Some(job) => {
                info!(job_id = %job.id, "Cancelling import");
                job.cancel.cancel();
                true
            },
            None => false,
        }
    }

    /// Current job snapshot
    pub fn status(&self) -> ImportJob {
        self.inner.status.borrow().clone()
    }

    /// Receiver that sees every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<ImportJob> {
        self.inner.status.subscribe()
    }

    /// Wait until no job is active and return the last snapshot
    pub async fn wait(&self) -> ImportJob {
        let mut rx = self.subscribe();
        let settled = rx.wait_for(|job| !job.phase.is_active()).await;
        match settled {
            Ok(job) => job.clone(),
            Err(_) => self.status(),
        }
    }

    /// Cancel any running job and wait for its task to finish
    pub async fn shutdown(&self) -> ImportJob {
        self.cancel();
        let handle = self.active().as_mut().and_then(|job| job.handle.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Import task ended abnormally");
            }
        }
        self.status()
    }
}

impl Inner {
    fn active(&self) -> MutexGuard<'_, Option<ActiveJob>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, job: &ImportJob) {
        self.status.send_replace(job.clone());
    }

    fn transition(&self, job: &mut ImportJob, next: ImportPhase) {
        if job.advance(next) {
            info!(job_id = %job.id, phase = %next, "Import phase changed");
            self.publish(job);
        } else {
            warn!(job_id = %job.id, from = %job.phase, to = %next, "Ignoring invalid phase change");
        }
    }

    async fn run(self: Arc<Self>, mut job: ImportJob, cancel: CancellationToken) {
        info!(job_id = %job.id, source = %self.source.describe(), "Starting import");

        let outcome = AssertUnwindSafe(self.pipeline(&mut job, &cancel))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(ImportError::Internal("import task panicked".to_string())));

        self.finish(job, outcome, &cancel);
    }

    /// Publish the terminal snapshot
    ///
    /// Runs under the `active` lock `cancel` takes, so a cancel accepted while
    /// the job still looked active always wins over a late success.
    fn finish(&self, mut job: ImportJob, outcome: Result<(), ImportError>, cancel: &CancellationToken) {
        let _active = self.active();
        let outcome = match outcome {
            Ok(()) if cancel.is_cancelled() => Err(ImportError::Cancelled),
            other => other,
        };

        match outcome {
            Ok(()) => {
                self.transition(&mut job, ImportPhase::Complete);
                info!(
                    job_id = %job.id,
                    nodes = job.counts.nodes_committed,
                    "Import complete"
                );
            },
            Err(e) => {
                if e.is_cancelled() {
                    warn!(job_id = %job.id, phase = %job.phase, "Import cancelled");
                } else {
                    error!(job_id = %job.id, phase = %job.phase, error = %e, "Import failed");
                }
                job.fail(&e);
                self.publish(&job);
            },
        }
    }

    async fn pipeline(
        &self,
        job: &mut ImportJob,
        cancel: &CancellationToken,
    ) -> Result<(), ImportError> {
        // Phase 1: obtain both streams
        info!("Phase 1: Opening taxdump source");
        let streams = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ImportError::Cancelled),
            opened = self.source.open() => opened?,
        };
        job.counts.total_expected = streams.expected_records;
        self.transition(job, ImportPhase::Parsing);

        // Phase 2: parse and validate off the async runtime
        info!("Phase 2: Parsing and validating hierarchy");
        let max_depth = self.config.max_depth;
        let nodes = CancellableReader {
            inner: streams.nodes,
            cancel: cancel.clone(),
        };
        let names = CancellableReader {
            inner: streams.names,
            cancel: cancel.clone(),
        };
        let parse = tokio::task::spawn_blocking(move || {
            Hierarchy::from_readers_with_max_depth(
                BufReader::with_capacity(READ_BUFFER_BYTES, nodes),
                BufReader::with_capacity(READ_BUFFER_BYTES, names),
                max_depth,
            )
        });
        let hierarchy = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ImportError::Cancelled),
            parsed = parse => parsed
                .map_err(|e| ImportError::Internal(format!("parse task failed: {}", e)))??,
        };

        let stats = hierarchy.stats();
        if let Some(hint) = job.counts.total_expected {
            if hint != hierarchy.len() as u64 {
                warn!(expected = hint, built = hierarchy.len(), "Built node count differs from source hint");
            }
        }
        job.counts.records_parsed = stats.records_parsed() as u64;
        job.counts.lines_skipped = stats.lines_skipped() as u64;
        job.counts.total_expected = Some(hierarchy.len() as u64);
        self.transition(job, ImportPhase::Loading);

        // Phase 3: batched load
        info!("Phase 3: Loading {} nodes", hierarchy.len());
        let loader = BulkLoader::new(Arc::clone(&self.store), self.config.loader.clone());
        let report = loader
            .load(hierarchy.attributes(), hierarchy.edges(), cancel, |stage, committed| {
                match stage {
                    LoadStage::Nodes => job.counts.nodes_committed = committed as u64,
                    LoadStage::Edges => job.counts.edges_committed = committed as u64,
                }
                job.touch();
                self.publish(job);
            })
            .await?;
        info!("Loaded: {}", report.summary());
        self.transition(job, ImportPhase::Verifying);

        // Phase 4: verification
        info!("Phase 4: Verifying store");
        self.verify(&hierarchy, cancel).await
    }

    async fn verify(&self, hierarchy: &Hierarchy, cancel: &CancellationToken) -> Result<(), ImportError> {
        let checkpoint = || {
            if cancel.is_cancelled() {
                Err(ImportError::Cancelled)
            } else {
                Ok(())
            }
        };

        checkpoint()?;
        let engine = LineageEngine::new(
            Arc::clone(&self.store),
            LineageConfig::default().with_max_depth(self.config.max_depth),
        );

        let root = hierarchy.root_id();
        let root_lineage = engine
            .ancestor_ids(root)
            .await
            .map_err(|e| ImportError::Verification(format!("root {} not readable: {}", root, e)))?;
        if root_lineage != [root] {
            return Err(ImportError::Verification(format!(
                "lineage of root {} is {:?}",
                root, root_lineage
            )));
        }

        checkpoint()?;
        let stored = self.store.count_nodes().await?;
        let built = hierarchy.len() as u64;
        if stored < built {
            return Err(ImportError::Verification(format!(
                "store holds {} nodes, expected at least {}",
                stored, built
            )));
        }
        if stored > built.saturating_mul(10) {
            return Err(ImportError::Verification(format!(
                "store holds {} nodes, more than ten times the {} built",
                stored, built
            )));
        }

        let sample = hierarchy.sample_ids(self.config.verify_sample_size, self.config.reference_taxon);
        for id in &sample {
            checkpoint()?;
            let lineage = engine.lineage(*id).await.map_err(|e| {
                ImportError::Verification(format!("lineage of sampled taxon {} failed: {}", id, e))
            })?;
            if lineage.root().map(|n| n.taxon_id) != Some(root) {
                return Err(ImportError::Verification(format!(
                    "lineage of sampled taxon {} does not end at root {}",
                    id, root
                )));
            }
        }

        info!(stored, built, sampled = sample.len(), "Verification passed");
        Ok(())
    }
}
