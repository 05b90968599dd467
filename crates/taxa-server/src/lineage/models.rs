//! Lineage query results

use serde::{Deserialize, Serialize};
use taxa_common::{TaxonId, TaxonNode};

/// Nodes from the queried taxon up to and including the root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineagePath {
    pub nodes: Vec<TaxonNode>,
}

impl LineagePath {
    pub(crate) fn new(nodes: Vec<TaxonNode>) -> Self {
        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The taxon the lineage was requested for
    pub fn queried(&self) -> Option<&TaxonNode> {
        self.nodes.first()
    }

    pub fn root(&self) -> Option<&TaxonNode> {
        self.nodes.last()
    }

    pub fn ids(&self) -> Vec<TaxonId> {
        self.nodes.iter().map(|n| n.taxon_id).collect()
    }

    /// Display names from the root down, joined with `" > "`
    pub fn to_display_string(&self) -> String {
        self.nodes
            .iter()
            .rev()
            .map(TaxonNode::display_name)
            .collect::<Vec<_>>()
            .join(" > ")
    }
}

/// Lowest common ancestor of two taxa and the paths below it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub ancestor: TaxonNode,
    /// From just below the ancestor down to the first taxon
    pub path_a: Vec<TaxonNode>,
    /// From just below the ancestor down to the second taxon
    pub path_b: Vec<TaxonNode>,
    /// Lineage of the ancestor: the ancestor first, the root last
    pub shared: Vec<TaxonNode>,
}

impl ComparisonResult {
    /// Nodes present in both lineages
    pub fn shared(&self) -> &[TaxonNode] {
        &self.shared
    }

    pub fn shared_count(&self) -> usize {
        self.shared.len()
    }

    pub fn path_a_ids(&self) -> Vec<TaxonId> {
        self.path_a.iter().map(|n| n.taxon_id).collect()
    }

    pub fn path_b_ids(&self) -> Vec<TaxonId> {
        self.path_b.iter().map(|n| n.taxon_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_string_is_root_first() {
        let path = LineagePath::new(vec![
            TaxonNode::new(9606, 9605, "Homo sapiens").with_common_name("human"),
            TaxonNode::new(9605, 1, "Homo"),
            TaxonNode::new(1, 1, "root"),
        ]);
        assert_eq!(path.to_display_string(), "root > Homo > human");
        assert_eq!(path.queried().map(|n| n.taxon_id), Some(9606));
        assert!(path.root().is_some_and(TaxonNode::is_root));
    }
}
