//! Core taxonomy types

use serde::{Deserialize, Serialize};

use crate::error::{Result, TaxaError};

/// Externally assigned taxon identifier (NCBI taxid)
pub type TaxonId = i64;

/// A node of the taxonomy tree
///
/// The root is the one node whose `parent_id` equals its own `taxon_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonNode {
    /// Taxon ID (e.g., 9606 for Homo sapiens)
    pub taxon_id: TaxonId,
    /// Parent taxon ID; equal to `taxon_id` for the root
    pub parent_id: TaxonId,
    /// Scientific name (e.g., "Homo sapiens")
    pub scientific_name: String,
    /// Common name (e.g., "human"), optional
    pub common_name: Option<String>,
    /// Taxonomic rank (e.g., "species", "genus"), optional
    pub rank: Option<String>,
}

impl TaxonNode {
    pub fn new(taxon_id: TaxonId, parent_id: TaxonId, scientific_name: impl Into<String>) -> Self {
        Self {
            taxon_id,
            parent_id,
            scientific_name: scientific_name.into(),
            common_name: None,
            rank: None,
        }
    }

    pub fn with_common_name(mut self, common_name: impl Into<String>) -> Self {
        self.common_name = Some(common_name.into());
        self
    }

    pub fn with_rank(mut self, rank: impl Into<String>) -> Self {
        self.rank = Some(rank.into());
        self
    }

    /// Whether this node is the root sentinel (its own parent)
    pub fn is_root(&self) -> bool {
        self.parent_id == self.taxon_id
    }

    /// Common name when known, scientific name otherwise
    pub fn display_name(&self) -> &str {
        self.common_name.as_deref().unwrap_or(&self.scientific_name)
    }

    /// Everything about this node except its parent link
    pub fn attributes(&self) -> TaxonAttributes {
        TaxonAttributes {
            taxon_id: self.taxon_id,
            scientific_name: self.scientific_name.clone(),
            common_name: self.common_name.clone(),
            rank: self.rank.clone(),
        }
    }

    /// The parent edge of this node
    pub fn edge(&self) -> ParentEdge {
        ParentEdge {
            child_id: self.taxon_id,
            parent_id: self.parent_id,
        }
    }

    /// Validate the node for consistency
    pub fn validate(&self) -> Result<()> {
        if self.taxon_id < 0 {
            return Err(TaxaError::InvalidTaxon(format!(
                "taxon ID must not be negative, got {}",
                self.taxon_id
            )));
        }
        if self.scientific_name.trim().is_empty() {
            return Err(TaxaError::InvalidTaxon(format!(
                "taxon {} has an empty scientific name",
                self.taxon_id
            )));
        }
        Ok(())
    }
}

/// Node attributes as written by the loader's node phase
///
/// Stores hold attributes and parent links separately; a node is only
/// readable as a [`TaxonNode`] once both are committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonAttributes {
    pub taxon_id: TaxonId,
    pub scientific_name: String,
    pub common_name: Option<String>,
    pub rank: Option<String>,
}

impl TaxonAttributes {
    pub fn with_parent(self, parent_id: TaxonId) -> TaxonNode {
        TaxonNode {
            taxon_id: self.taxon_id,
            parent_id,
            scientific_name: self.scientific_name,
            common_name: self.common_name,
            rank: self.rank,
        }
    }
}

/// A child → parent link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParentEdge {
    pub child_id: TaxonId,
    pub parent_id: TaxonId,
}

impl ParentEdge {
    pub fn new(child_id: TaxonId, parent_id: TaxonId) -> Self {
        Self {
            child_id,
            parent_id,
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.child_id == self.parent_id
    }
}
