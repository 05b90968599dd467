//! NCBI taxdump ingestion
//!
//! - [`parser`]: `nodes.dmp` / `names.dmp` lines into typed records
//! - [`hierarchy`]: records into a validated rooted tree
//! - [`loader`]: the tree into a [`TaxonStore`](crate::store::TaxonStore), in batches
//! - [`source`] / [`download`]: where the two files come from
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use taxa_server::ingest::taxdump::{BulkLoader, Hierarchy, LoaderConfig};
//! use taxa_server::store::MemoryStore;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let nodes = std::io::BufReader::new(std::fs::File::open("taxdump/nodes.dmp")?);
//! let names = std::io::BufReader::new(std::fs::File::open("taxdump/names.dmp")?);
//! let hierarchy = Hierarchy::from_readers(nodes, names)?;
//!
//! let loader = BulkLoader::new(Arc::new(MemoryStore::new()), LoaderConfig::default());
//! let report = loader.load_hierarchy(&hierarchy, &CancellationToken::new(), |_, _| {}).await?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

pub mod download;
pub mod hierarchy;
pub mod loader;
pub mod parser;
pub mod source;

// Re-export commonly used types
pub use download::{DownloadConfig, NcbiTaxdumpDownloader, DEFAULT_TAXDUMP_URL};
pub use hierarchy::{BuildStats, Hierarchy, HierarchyBuilder};
pub use loader::{BulkLoader, LoadReport, LoaderConfig};
pub use parser::{NameClass, NameRecord, NameRecords, NodeRecord, NodeRecords, ParseStats};
pub use source::{LocalTaxdump, SourceProvider, SourceStreams, StaticSource};
