//! PostgreSQL store
//!
//! One `taxa` table (see `migrations/`). Node attributes are inserted with a
//! NULL `parent_id`; the edge phase fills it in. Reads filter on
//! `parent_id IS NOT NULL`, which is what keeps half-written nodes invisible.
//! Batch writes bind whole columns as arrays and expand them with `UNNEST`,
//! so a batch is one round trip regardless of its size.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction};
use taxa_common::{ParentEdge, TaxonAttributes, TaxonId, TaxonNode};
use tracing::debug;

use super::{StoreTransaction, TaxonStore, SEARCH_RANK};
use crate::error::{StoreError, StoreResult};

/// Default bound on a single store round trip
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

const SELECT_NODE: &str = r#"
    SELECT taxon_id, parent_id, scientific_name, common_name, rank
    FROM taxa
    WHERE taxon_id = $1 AND parent_id IS NOT NULL
"#;

const UPSERT_NODES: &str = r#"
    INSERT INTO taxa (taxon_id, scientific_name, common_name, rank)
    SELECT * FROM UNNEST($1::BIGINT[], $2::TEXT[], $3::TEXT[], $4::TEXT[])
    ON CONFLICT (taxon_id) DO UPDATE SET
        scientific_name = EXCLUDED.scientific_name,
        common_name = EXCLUDED.common_name,
        rank = EXCLUDED.rank,
        updated_at = NOW()
"#;

const UPSERT_EDGES: &str = r#"
    UPDATE taxa SET parent_id = e.parent_id, updated_at = NOW()
    FROM UNNEST($1::BIGINT[], $2::BIGINT[]) AS e(child_id, parent_id)
    WHERE taxa.taxon_id = e.child_id
"#;

const SEARCH: &str = r#"
    SELECT taxon_id, parent_id, scientific_name, common_name, rank
    FROM taxa
    WHERE parent_id IS NOT NULL
      AND rank = $1
      AND (scientific_name ILIKE $2 OR common_name ILIKE $2)
    ORDER BY
        CASE WHEN common_name ILIKE $3 THEN 0 ELSE 1 END,
        CASE WHEN scientific_name ILIKE $3 THEN 0 ELSE 1 END,
        scientific_name
    LIMIT $4
"#;

/// [`TaxonStore`] backed by a PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    query_timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.into()))
    }
}

async fn bounded<T, F>(timeout: Duration, fut: F) -> StoreResult<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(StoreError::from),
        Err(_) => Err(StoreError::Timeout(timeout)),
    }
}

fn row_to_node(row: &sqlx::postgres::PgRow) -> Result<TaxonNode, sqlx::Error> {
    Ok(TaxonNode {
        taxon_id: row.try_get("taxon_id")?,
        parent_id: row.try_get("parent_id")?,
        scientific_name: row.try_get("scientific_name")?,
        common_name: row.try_get("common_name")?,
        rank: row.try_get("rank")?,
    })
}

/// Escape `LIKE` wildcards so user input matches literally
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl TaxonStore for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let tx = bounded(self.query_timeout, self.pool.begin()).await?;
        Ok(Box::new(PgTransaction {
            tx,
            timeout: self.query_timeout,
        }))
    }

    async fn get_node(&self, id: TaxonId) -> StoreResult<Option<TaxonNode>> {
        let row = bounded(
            self.query_timeout,
            sqlx::query(SELECT_NODE).bind(id).fetch_optional(&self.pool),
        )
        .await?;
        row.as_ref().map(row_to_node).transpose().map_err(StoreError::from)
    }

    async fn get_parent(&self, id: TaxonId) -> StoreResult<Option<TaxonId>> {
        bounded(
            self.query_timeout,
            sqlx::query_scalar::<_, TaxonId>(
                "SELECT parent_id FROM taxa WHERE taxon_id = $1 AND parent_id IS NOT NULL",
            )
            .bind(id)
            .fetch_optional(&self.pool),
        )
        .await
    }

    async fn count_nodes(&self) -> StoreResult<u64> {
        let count: i64 = bounded(
            self.query_timeout,
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM taxa WHERE parent_id IS NOT NULL")
                .fetch_one(&self.pool),
        )
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn search(&self, query: &str, limit: usize) -> StoreResult<Vec<TaxonNode>> {
        let needle = escape_like(query.trim());
        if needle.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let rows = bounded(
            self.query_timeout,
            sqlx::query(SEARCH)
                .bind(SEARCH_RANK)
                .bind(format!("%{}%", needle))
                .bind(format!("{}%", needle))
                .bind(i64::try_from(limit).unwrap_or(i64::MAX))
                .fetch_all(&self.pool),
        )
        .await?;

        rows.iter()
            .map(row_to_node)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }
}

struct PgTransaction {
    tx: Transaction<'static, Postgres>,
    timeout: Duration,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn upsert_node(&mut self, node: &TaxonAttributes) -> StoreResult<()> {
        self.upsert_nodes(std::slice::from_ref(node)).await
    }

    async fn upsert_edge(&mut self, edge: ParentEdge) -> StoreResult<()> {
        self.upsert_edges(&[edge]).await
    }

    async fn upsert_nodes(&mut self, nodes: &[TaxonAttributes]) -> StoreResult<()> {
        if nodes.is_empty() {
            return Ok(());
        }

        let mut ids = Vec::with_capacity(nodes.len());
        let mut scientific = Vec::with_capacity(nodes.len());
        let mut common = Vec::with_capacity(nodes.len());
        let mut ranks = Vec::with_capacity(nodes.len());
        for node in nodes {
            ids.push(node.taxon_id);
            scientific.push(node.scientific_name.clone());
            common.push(node.common_name.clone());
            ranks.push(node.rank.clone());
        }

        let result = bounded(
            self.timeout,
            sqlx::query(UPSERT_NODES)
                .bind(ids)
                .bind(scientific)
                .bind(common)
                .bind(ranks)
                .execute(&mut *self.tx),
        )
        .await?;

        debug!(rows = result.rows_affected(), "Upserted taxon attributes");
        Ok(())
    }

    async fn upsert_edges(&mut self, edges: &[ParentEdge]) -> StoreResult<()> {
        if edges.is_empty() {
            return Ok(());
        }

        let (children, parents): (Vec<TaxonId>, Vec<TaxonId>) =
            edges.iter().map(|e| (e.child_id, e.parent_id)).unzip();

        let result = bounded(
            self.timeout,
            sqlx::query(UPSERT_EDGES)
                .bind(children)
                .bind(parents)
                .execute(&mut *self.tx),
        )
        .await?;

        let updated = result.rows_affected();
        if updated < edges.len() as u64 {
            return Err(StoreError::Integrity(format!(
                "{} of {} parent links reference taxa without attributes",
                edges.len() as u64 - updated,
                edges.len()
            )));
        }

        debug!(rows = updated, "Upserted parent links");
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        bounded(self.timeout, self.tx.commit()).await
    }
}
