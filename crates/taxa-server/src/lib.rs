//! Taxa Server Library
//!
//! Taxonomy import and lineage queries over NCBI taxdump data.
//!
//! # Overview
//!
//! - **Ingestion**: streaming `nodes.dmp` / `names.dmp` parsing, hierarchy
//!   validation and batched, idempotent loading
//! - **Import Jobs**: one background job per store with observable phases
//!   and cancellation
//! - **Lineage**: root paths and lowest common ancestors of two taxa
//! - **Storage**: PostgreSQL via SQLx, plus an in-memory store
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use taxa_server::ingest::taxdump::LocalTaxdump;
//! use taxa_server::ingest::{ImportConfig, ImportCoordinator};
//! use taxa_server::lineage::{LineageConfig, LineageEngine};
//! use taxa_server::store::MemoryStore;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let coordinator = ImportCoordinator::new(
//!     store.clone(),
//!     Arc::new(LocalTaxdump::new("taxdump")),
//!     ImportConfig::default(),
//! );
//! coordinator.trigger();
//! let job = coordinator.wait().await;
//! println!("import finished in phase {}", job.phase);
//!
//! let engine = LineageEngine::new(store, LineageConfig::default());
//! let lineage = engine.lineage(9606).await?;
//! println!("{}", lineage.to_display_string());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod ingest;
pub mod lineage;
pub mod store;

// Re-export commonly used types
pub use error::{ImportError, LineageError, StoreError, StoreResult};
