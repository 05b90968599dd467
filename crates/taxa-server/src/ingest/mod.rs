//! Taxonomy import
//!
//! [`taxdump`] turns the NCBI flat files into a validated hierarchy and loads
//! it; [`coordinator`] runs that pipeline as a single background job whose
//! state is described in [`jobs`].

pub mod coordinator;
pub mod jobs;
pub mod taxdump;

pub use coordinator::{ImportConfig, ImportCoordinator, TriggerOutcome};
pub use jobs::{ImportCounts, ImportJob, ImportPhase, JobError};
