//! Shared fixtures for taxa-server integration tests

#![allow(dead_code)]

use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use taxa_common::{ParentEdge, TaxonAttributes, TaxonId, TaxonNode};
use taxa_server::error::SourceError;
use taxa_server::ingest::taxdump::{SourceProvider, SourceStreams, StaticSource};
use taxa_server::store::{MemoryStore, StoreTransaction, TaxonStore};
use taxa_server::{StoreError, StoreResult};

/// `nodes.dmp` line
pub fn node_line(id: TaxonId, parent: TaxonId, rank: &str) -> String {
    format!("{id}\t|\t{parent}\t|\t{rank}\t|\t\t|\t0\t|\n")
}

/// `names.dmp` line
pub fn name_line(id: TaxonId, name: &str, class: &str) -> String {
    format!("{id}\t|\t{name}\t|\t\t|\t{class}\t|\n")
}

/// Small tree: root(1) → A(2) → {B(3), C(4)}
pub fn small_taxdump() -> (String, String) {
    let nodes = [
        node_line(1, 1, "no rank"),
        node_line(2, 1, "genus"),
        node_line(3, 2, "species"),
        node_line(4, 2, "species"),
    ]
    .concat();
    let names = [
        name_line(1, "root", "scientific name"),
        name_line(2, "A", "scientific name"),
        name_line(3, "B", "scientific name"),
        name_line(4, "C", "scientific name"),
        name_line(4, "sea", "genbank common name"),
    ]
    .concat();
    (nodes, names)
}

/// Straight chain 1 ← 2 ← ... ← len, every node named `taxon {id}`
pub fn chain_taxdump(len: TaxonId) -> (String, String) {
    let nodes: String = (1..=len)
        .map(|id| node_line(id, (id - 1).max(1), "no rank"))
        .collect();
    let names: String = (1..=len)
        .map(|id| name_line(id, &format!("taxon {id}"), "scientific name"))
        .collect();
    (nodes, names)
}

/// Commit the given `(id, parent)` pairs into a fresh memory store
pub async fn memory_store_with(edges: &[(TaxonId, TaxonId, &str)]) -> MemoryStore {
    let store = MemoryStore::new();
    let mut tx = store.begin().await.unwrap();
    let attributes: Vec<TaxonAttributes> = edges
        .iter()
        .map(|&(id, parent, name)| TaxonNode::new(id, parent, name).attributes())
        .collect();
    let links: Vec<ParentEdge> = edges
        .iter()
        .map(|&(id, parent, _)| ParentEdge::new(id, parent))
        .collect();
    tx.upsert_nodes(&attributes).await.unwrap();
    tx.upsert_edges(&links).await.unwrap();
    tx.commit().await.unwrap();
    store
}

/// Memory store that injects commit failures and latency
#[derive(Clone)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    transient_failures: Arc<AtomicUsize>,
    fatal_commit: Option<usize>,
    commits: Arc<AtomicUsize>,
    delay: Duration,
    read_delay: Duration,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            transient_failures: Arc::new(AtomicUsize::new(0)),
            fatal_commit: None,
            commits: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
            read_delay: Duration::ZERO,
        }
    }

    /// Fail the next `count` commits with a transient error
    pub fn with_transient_failures(self, count: usize) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Fail the commit with this zero-based index with a non-transient error
    pub fn with_fatal_commit(mut self, index: usize) -> Self {
        self.fatal_commit = Some(index);
        self
    }

    /// Sleep this long in every `begin`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sleep this long in every `get_node` / `get_parent`
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    async fn read_pause(&self) {
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
    }

    pub fn commit_attempts(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaxonStore for FlakyStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(Box::new(FlakyTransaction {
            inner: self.inner.begin().await?,
            store: self.clone(),
        }))
    }

    async fn get_node(&self, id: TaxonId) -> StoreResult<Option<TaxonNode>> {
        self.read_pause().await;
        self.inner.get_node(id).await
    }

    async fn get_parent(&self, id: TaxonId) -> StoreResult<Option<TaxonId>> {
        self.read_pause().await;
        self.inner.get_parent(id).await
    }

    async fn count_nodes(&self) -> StoreResult<u64> {
        self.inner.count_nodes().await
    }

    async fn search(&self, query: &str, limit: usize) -> StoreResult<Vec<TaxonNode>> {
        self.inner.search(query, limit).await
    }
}

struct FlakyTransaction {
    inner: Box<dyn StoreTransaction>,
    store: FlakyStore,
}

#[async_trait]
impl StoreTransaction for FlakyTransaction {
    async fn upsert_node(&mut self, node: &TaxonAttributes) -> StoreResult<()> {
        self.inner.upsert_node(node).await
    }

    async fn upsert_edge(&mut self, edge: ParentEdge) -> StoreResult<()> {
        self.inner.upsert_edge(edge).await
    }

    async fn upsert_nodes(&mut self, nodes: &[TaxonAttributes]) -> StoreResult<()> {
        self.inner.upsert_nodes(nodes).await
    }

    async fn upsert_edges(&mut self, edges: &[ParentEdge]) -> StoreResult<()> {
        self.inner.upsert_edges(edges).await
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let index = self.store.commits.fetch_add(1, Ordering::SeqCst);
        if self.store.fatal_commit == Some(index) {
            return Err(StoreError::Integrity("injected failure".to_string()));
        }
        let remaining = self.store.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.store.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("injected outage".to_string()));
        }
        self.inner.commit().await
    }
}

/// In-memory taxdump whose `open` and stream reads are slowed down
pub struct SlowSource {
    inner: StaticSource,
    open_delay: Duration,
    read_delay: Duration,
}

impl SlowSource {
    pub fn new(taxdump: (String, String)) -> Self {
        let (nodes, names) = taxdump;
        Self {
            inner: StaticSource::new(nodes, names),
            open_delay: Duration::ZERO,
            read_delay: Duration::ZERO,
        }
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Blocking sleep before every read of either stream
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }
}

#[async_trait]
impl SourceProvider for SlowSource {
    async fn open(&self) -> Result<SourceStreams, SourceError> {
        tokio::time::sleep(self.open_delay).await;
        let streams = self.inner.open().await?;
        Ok(SourceStreams {
            nodes: Box::new(SlowReader {
                inner: streams.nodes,
                delay: self.read_delay,
            }),
            names: Box::new(SlowReader {
                inner: streams.names,
                delay: self.read_delay,
            }),
            expected_records: streams.expected_records,
        })
    }

    fn describe(&self) -> String {
        "slow in-memory taxdump".to_string()
    }
}

struct SlowReader {
    inner: Box<dyn Read + Send>,
    delay: Duration,
}

impl Read for SlowReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        std::thread::sleep(self.delay);
        self.inner.read(buf)
    }
}
