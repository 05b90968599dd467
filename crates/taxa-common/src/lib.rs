//! Taxa Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, error handling and logging for the taxa workspace.
//!
//! # Overview
//!
//! - **Types**: [`TaxonNode`], [`ParentEdge`] and the [`TaxonId`] alias used by
//!   every component that reads or writes the taxonomy
//! - **Error Handling**: [`TaxaError`] and the crate [`Result`] alias
//! - **Logging**: tracing subscriber setup shared by all binaries
//!
//! # Example
//!
//! ```
//! use taxa_common::TaxonNode;
//!
//! let human = TaxonNode::new(9606, 9605, "Homo sapiens")
//!     .with_common_name("human")
//!     .with_rank("species");
//!
//! assert_eq!(human.display_name(), "human");
//! assert!(!human.is_root());
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, TaxaError};
pub use types::{ParentEdge, TaxonAttributes, TaxonId, TaxonNode};
