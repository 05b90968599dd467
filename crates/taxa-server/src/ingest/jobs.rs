//! Import job state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ImportError;

/// Import job phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportPhase {
    Idle,
    Downloading,
    Parsing,
    Loading,
    Verifying,
    Complete,
    Failed,
}

impl ImportPhase {
    pub fn as_str(&self) -> &str {
        match self {
            ImportPhase::Idle => "idle",
            ImportPhase::Downloading => "downloading",
            ImportPhase::Parsing => "parsing",
            ImportPhase::Loading => "loading",
            ImportPhase::Verifying => "verifying",
            ImportPhase::Complete => "complete",
            ImportPhase::Failed => "failed",
        }
    }

    /// `complete` and `failed` end a job
    pub fn is_terminal(&self) -> bool {
        matches!(self, ImportPhase::Complete | ImportPhase::Failed)
    }

    /// A job in this phase is holding the coordinator
    pub fn is_active(&self) -> bool {
        !self.is_terminal() && *self != ImportPhase::Idle
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: ImportPhase) -> bool {
        use ImportPhase::*;
        match (self, next) {
            (Idle | Complete | Failed, Downloading) => true,
            (Downloading, Parsing) | (Parsing, Loading) | (Loading, Verifying) => true,
            (Verifying, Complete) => true,
            (Downloading | Parsing | Loading | Verifying, Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ImportPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    /// Phase the job was in when the error happened
    pub phase: ImportPhase,
    /// Short machine-readable kind (`load_failure`, `cancelled`, ...)
    pub kind: String,
    pub message: String,
}

impl JobError {
    pub fn new(phase: ImportPhase, error: &ImportError) -> Self {
        Self {
            phase,
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == "cancelled"
    }
}

/// Record counters of a job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportCounts {
    pub records_parsed: u64,
    pub lines_skipped: u64,
    pub nodes_committed: u64,
    pub edges_committed: u64,
    /// Nodes the import will write, once known
    pub total_expected: Option<u64>,
}

/// Snapshot of an import job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: Uuid,
    pub phase: ImportPhase,
    pub counts: ImportCounts,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<JobError>,
}

impl ImportJob {
    /// The placeholder published before any import has run
    pub fn idle() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::nil(),
            phase: ImportPhase::Idle,
            counts: ImportCounts::default(),
            started_at: now,
            updated_at: now,
            finished_at: None,
            last_error: None,
        }
    }

    /// A freshly triggered job
    pub fn start() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            phase: ImportPhase::Downloading,
            counts: ImportCounts::default(),
            started_at: now,
            updated_at: now,
            finished_at: None,
            last_error: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Move to `next`; invalid transitions are ignored and reported as `false`
    pub fn advance(&mut self, next: ImportPhase) -> bool {
        if !self.phase.can_transition_to(next) {
            return false;
        }
        self.phase = next;
        self.touch();
        if next.is_terminal() {
            self.finished_at = Some(self.updated_at);
        }
        true
    }

    /// Fail in the current phase
    pub fn fail(&mut self, error: &ImportError) {
        let error = JobError::new(self.phase, error);
        if self.advance(ImportPhase::Failed) {
            self.last_error = Some(error);
        }
    }

    /// Committed records over expected records (nodes and edges), 0-100
    pub fn completion_percentage(&self) -> f64 {
        match self.counts.total_expected {
            Some(total) if total > 0 => {
                let done = self.counts.nodes_committed + self.counts.edges_committed;
                (done as f64 / (2 * total) as f64 * 100.0).min(100.0)
            },
            _ if self.phase == ImportPhase::Complete => 100.0,
            _ => 0.0,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}
