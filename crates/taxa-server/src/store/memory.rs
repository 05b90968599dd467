//! In-memory store

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use taxa_common::{ParentEdge, TaxonAttributes, TaxonId, TaxonNode};
use tokio::sync::RwLock;

use super::{search_rank_key, StoreTransaction, TaxonStore, SEARCH_RANK};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Default)]
struct Tables {
    attributes: HashMap<TaxonId, TaxonAttributes>,
    parents: HashMap<TaxonId, TaxonId>,
}

impl Tables {
    fn node(&self, id: TaxonId) -> Option<TaxonNode> {
        let parent = *self.parents.get(&id)?;
        let attributes = self.attributes.get(&id)?.clone();
        Some(attributes.with_parent(parent))
    }
}

/// `HashMap`-backed store with the same visibility rules as [`PgStore`](super::PgStore)
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every committed node in id order
    pub async fn snapshot(&self) -> Vec<TaxonNode> {
        let tables = self.tables.read().await;
        let mut ids: Vec<TaxonId> = tables.parents.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter().filter_map(|id| tables.node(id)).collect()
    }

    /// Number of nodes with attributes written, parent link or not
    pub async fn attribute_count(&self) -> usize {
        self.tables.read().await.attributes.len()
    }
}

#[async_trait]
impl TaxonStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        Ok(Box::new(MemoryTransaction {
            tables: Arc::clone(&self.tables),
            attributes: Vec::new(),
            edges: Vec::new(),
        }))
    }

    async fn get_node(&self, id: TaxonId) -> StoreResult<Option<TaxonNode>> {
        Ok(self.tables.read().await.node(id))
    }

    async fn get_parent(&self, id: TaxonId) -> StoreResult<Option<TaxonId>> {
        let tables = self.tables.read().await;
        Ok(tables
            .parents
            .get(&id)
            .copied()
            .filter(|_| tables.attributes.contains_key(&id)))
    }

    async fn count_nodes(&self) -> StoreResult<u64> {
        let tables = self.tables.read().await;
        let count = tables
            .parents
            .keys()
            .filter(|id| tables.attributes.contains_key(id))
            .count();
        Ok(count as u64)
    }

    async fn search(&self, query: &str, limit: usize) -> StoreResult<Vec<TaxonNode>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let tables = self.tables.read().await;
        let mut matches: Vec<TaxonNode> = tables
            .parents
            .keys()
            .filter_map(|&id| tables.node(id))
            .filter(|node| node.rank.as_deref() == Some(SEARCH_RANK))
            .filter(|node| {
                node.scientific_name.to_lowercase().contains(&needle)
                    || node
                        .common_name
                        .as_deref()
                        .is_some_and(|c| c.to_lowercase().contains(&needle))
            })
            .collect();

        matches.sort_by_cached_key(|node| search_rank_key(node, &needle));
        matches.truncate(limit);
        Ok(matches)
    }
}

/// Buffers writes and applies them under one write lock on commit
struct MemoryTransaction {
    tables: Arc<RwLock<Tables>>,
    attributes: Vec<TaxonAttributes>,
    edges: Vec<ParentEdge>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn upsert_node(&mut self, node: &TaxonAttributes) -> StoreResult<()> {
        self.attributes.push(node.clone());
        Ok(())
    }

    async fn upsert_edge(&mut self, edge: ParentEdge) -> StoreResult<()> {
        self.edges.push(edge);
        Ok(())
    }

    async fn upsert_nodes(&mut self, nodes: &[TaxonAttributes]) -> StoreResult<()> {
        self.attributes.extend_from_slice(nodes);
        Ok(())
    }

    async fn upsert_edges(&mut self, edges: &[ParentEdge]) -> StoreResult<()> {
        self.edges.extend_from_slice(edges);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTransaction {
            tables,
            attributes,
            edges,
        } = *self;
        let mut tables = tables.write().await;

        let pending: HashSet<TaxonId> = attributes.iter().map(|a| a.taxon_id).collect();
        let committed = &*tables;
        let known = |id: TaxonId| pending.contains(&id) || committed.attributes.contains_key(&id);
        for edge in &edges {
            if !known(edge.child_id) {
                return Err(StoreError::Integrity(format!(
                    "parent link for unknown taxon {}",
                    edge.child_id
                )));
            }
            if !known(edge.parent_id) {
                return Err(StoreError::Integrity(format!(
                    "taxon {} references missing parent {}",
                    edge.child_id, edge.parent_id
                )));
            }
        }

        for node in attributes {
            tables.attributes.insert(node.taxon_id, node);
        }
        for edge in edges {
            tables.parents.insert(edge.child_id, edge.parent_id);
        }
        Ok(())
    }
}
