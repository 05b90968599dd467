//! Taxonomy store abstraction
//!
//! The engine talks to storage only through [`TaxonStore`] and the
//! [`StoreTransaction`] it hands out. Two backends ship with the crate:
//!
//! - [`MemoryStore`]: `HashMap` tables behind a `tokio` lock, used by tests and
//!   one-shot tooling
//! - [`PgStore`]: PostgreSQL via `sqlx`
//!
//! Node attributes and parent links are written separately. A node is only
//! returned by [`TaxonStore::get_node`] once its parent link is committed too,
//! so readers never observe a half-written node during an import.

use async_trait::async_trait;
use taxa_common::{ParentEdge, TaxonAttributes, TaxonId, TaxonNode};

use crate::error::StoreResult;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Rank that name search is restricted to
pub const SEARCH_RANK: &str = "species";

/// Read and write access to the taxonomy
#[async_trait]
pub trait TaxonStore: Send + Sync {
    /// Open a write transaction
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;

    /// A fully committed node, or `None` when the id is unknown or its parent
    /// link is not committed yet
    async fn get_node(&self, id: TaxonId) -> StoreResult<Option<TaxonNode>>;

    /// Parent id of a fully committed node; the root returns its own id
    async fn get_parent(&self, id: TaxonId) -> StoreResult<Option<TaxonId>>;

    /// Number of fully committed nodes
    async fn count_nodes(&self) -> StoreResult<u64>;

    /// Case-insensitive name search over species
    ///
    /// Matches are ranked: common-name prefix first, then scientific-name
    /// prefix, then alphabetical by scientific name.
    async fn search(&self, query: &str, limit: usize) -> StoreResult<Vec<TaxonNode>>;
}

/// One batch of writes, applied atomically on [`commit`](Self::commit)
///
/// Dropping a transaction without committing discards its writes.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Insert or overwrite the attributes of a node, keyed by id
    async fn upsert_node(&mut self, node: &TaxonAttributes) -> StoreResult<()>;

    /// Insert or overwrite a node's parent link
    async fn upsert_edge(&mut self, edge: ParentEdge) -> StoreResult<()>;

    async fn upsert_nodes(&mut self, nodes: &[TaxonAttributes]) -> StoreResult<()> {
        for node in nodes {
            self.upsert_node(node).await?;
        }
        Ok(())
    }

    async fn upsert_edges(&mut self, edges: &[ParentEdge]) -> StoreResult<()> {
        for edge in edges {
            self.upsert_edge(*edge).await?;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// Sort key for search results, smaller sorts first
pub(crate) fn search_rank_key(node: &TaxonNode, needle_lower: &str) -> (u8, u8, String) {
    let common_prefix = node
        .common_name
        .as_deref()
        .is_some_and(|c| c.to_lowercase().starts_with(needle_lower));
    let scientific_prefix = node.scientific_name.to_lowercase().starts_with(needle_lower);
    (
        u8::from(!common_prefix),
        u8::from(!scientific_prefix),
        node.scientific_name.clone(),
    )
}
