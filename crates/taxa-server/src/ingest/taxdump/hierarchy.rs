//! Hierarchy assembly and validation
//!
//! [`HierarchyBuilder`] collects parsed node and name records, then
//! [`HierarchyBuilder::build`] checks that they form a single rooted tree and
//! produces the [`Hierarchy`] the loader writes.

use std::collections::{HashMap, HashSet};
use std::io::BufRead;

use serde::{Deserialize, Serialize};
use taxa_common::{ParentEdge, TaxonAttributes, TaxonId, TaxonNode};
use tracing::{debug, info};

use super::parser::{NameClass, NameRecord, NameRecords, NodeRecord, NodeRecords, ParseStats};
use crate::error::HierarchyError;
use crate::lineage::DEFAULT_MAX_DEPTH;

/// Number of child→parent pairs kept in a `DanglingParents` error
const DANGLING_SAMPLE_SIZE: usize = 10;

/// Scientific name used for nodes that have no `scientific name` record
pub fn placeholder_name(id: TaxonId) -> String {
    format!("taxon {}", id)
}

#[derive(Debug, Default)]
struct NameSlots {
    scientific: Option<String>,
    genbank_common: Option<String>,
    common: Option<String>,
}

/// Counters describing one build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStats {
    pub node_lines: ParseStats,
    pub name_lines: ParseStats,
    /// Node records overwritten by a later record with the same id
    pub duplicate_nodes: usize,
    /// Nodes that fell back to the placeholder name
    pub unnamed_nodes: usize,
    /// Name records whose id is not in the hierarchy
    pub orphan_names: usize,
}

impl BuildStats {
    /// Records parsed across both streams
    pub fn records_parsed(&self) -> usize {
        self.node_lines.records + self.name_lines.records
    }

    /// Malformed lines skipped across both streams
    pub fn lines_skipped(&self) -> usize {
        self.node_lines.skipped + self.name_lines.skipped
    }
}

/// Accumulates records; the last record for an id wins
#[derive(Debug)]
pub struct HierarchyBuilder {
    nodes: HashMap<TaxonId, (TaxonId, Option<String>)>,
    names: HashMap<TaxonId, NameSlots>,
    stats: BuildStats,
    max_depth: usize,
}

impl Default for HierarchyBuilder {
    fn default() -> Self {
        Self {
            nodes: HashMap::new(),
            names: HashMap::new(),
            stats: BuildStats::default(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl HierarchyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Longest lineage, root included, that `build` accepts
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    pub fn add_node(&mut self, record: NodeRecord) {
        if self
            .nodes
            .insert(record.taxon_id, (record.parent_id, record.rank))
            .is_some()
        {
            self.stats.duplicate_nodes += 1;
        }
    }

    pub fn add_name(&mut self, record: NameRecord) {
        let slots = self.names.entry(record.taxon_id).or_default();
        let slot = match record.class {
            NameClass::Scientific => &mut slots.scientific,
            NameClass::GenbankCommon => &mut slots.genbank_common,
            NameClass::Common => &mut slots.common,
        };
        *slot = Some(record.name);
    }

    /// Consume a whole `nodes.dmp` stream
    pub fn read_nodes<R: BufRead>(&mut self, reader: R) -> Result<ParseStats, HierarchyError> {
        let mut records = NodeRecords::new(reader);
        for record in records.by_ref() {
            self.add_node(record?);
        }
        let stats = records.stats();
        self.stats.node_lines = self.stats.node_lines.merge(&stats);
        debug!(
            records = stats.records,
            skipped = stats.skipped,
            "Read nodes.dmp"
        );
        Ok(stats)
    }

    /// Consume a whole `names.dmp` stream
    pub fn read_names<R: BufRead>(&mut self, reader: R) -> Result<ParseStats, HierarchyError> {
        let mut records = NameRecords::new(reader);
        for record in records.by_ref() {
            self.add_name(record?);
        }
        let stats = records.stats();
        self.stats.name_lines = self.stats.name_lines.merge(&stats);
        debug!(
            records = stats.records,
            skipped = stats.skipped,
            filtered = stats.filtered,
            "Read names.dmp"
        );
        Ok(stats)
    }

    /// Validate and freeze the hierarchy
    pub fn build(self) -> Result<Hierarchy, HierarchyError> {
        let HierarchyBuilder {
            mut nodes,
            mut names,
            mut stats,
            max_depth,
        } = self;

        let root_id = find_root(&nodes)?;
        check_dangling(&nodes)?;
        check_depths(&nodes, root_id, max_depth)?;

        let mut ids: Vec<TaxonId> = nodes.keys().copied().collect();
        ids.sort_unstable();

        let mut built = Vec::with_capacity(ids.len());
        for id in ids {
            let Some((parent_id, rank)) = nodes.remove(&id) else {
                continue;
            };
            let slots = names.remove(&id).unwrap_or_default();
            let scientific_name = slots.scientific.unwrap_or_else(|| {
                stats.unnamed_nodes += 1;
                placeholder_name(id)
            });

            built.push(TaxonNode {
                taxon_id: id,
                parent_id,
                scientific_name,
                common_name: slots.genbank_common.or(slots.common),
                rank,
            });
        }
        stats.orphan_names = names.len();

        info!(
            nodes = built.len(),
            root = root_id,
            unnamed = stats.unnamed_nodes,
            orphan_names = stats.orphan_names,
            "Hierarchy validated"
        );

        Ok(Hierarchy {
            nodes: built,
            root_id,
            stats,
        })
    }
}

fn find_root(nodes: &HashMap<TaxonId, (TaxonId, Option<String>)>) -> Result<TaxonId, HierarchyError> {
    let mut roots: Vec<TaxonId> = nodes
        .iter()
        .filter(|(id, (parent, _))| *id == parent)
        .map(|(id, _)| *id)
        .collect();
    roots.sort_unstable();

    match roots.as_slice() {
        [] => Err(HierarchyError::NoRoot),
        [root] => Ok(*root),
        _ => Err(HierarchyError::MultipleRoots { roots }),
    }
}

fn check_dangling(nodes: &HashMap<TaxonId, (TaxonId, Option<String>)>) -> Result<(), HierarchyError> {
    let mut dangling: Vec<(TaxonId, TaxonId)> = nodes
        .iter()
        .filter(|(_, (parent, _))| !nodes.contains_key(parent))
        .map(|(id, (parent, _))| (*id, *parent))
        .collect();

    if dangling.is_empty() {
        return Ok(());
    }

    dangling.sort_unstable();
    let count = dangling.len();
    dangling.truncate(DANGLING_SAMPLE_SIZE);
    Err(HierarchyError::DanglingParents {
        count,
        samples: dangling,
    })
}

/// Every chain must end at the root within `max_depth` levels. Lineage
/// lengths are memoized, so each node is walked once.
fn check_depths(
    nodes: &HashMap<TaxonId, (TaxonId, Option<String>)>,
    root_id: TaxonId,
    max_depth: usize,
) -> Result<(), HierarchyError> {
    let mut depths: HashMap<TaxonId, usize> = HashMap::with_capacity(nodes.len());
    depths.insert(root_id, 1);
    let mut path: Vec<TaxonId> = Vec::new();
    let mut on_path: HashSet<TaxonId> = HashSet::new();

    for &start in nodes.keys() {
        path.clear();
        on_path.clear();
        let mut current = start;
        let base = loop {
            if let Some(&depth) = depths.get(&current) {
                break depth;
            }
            if !on_path.insert(current) {
                return Err(HierarchyError::Cycle { node: current });
            }
            path.push(current);
            match nodes.get(&current) {
                Some((parent, _)) => current = *parent,
                None => break 0,
            }
        };

        let deepest = base + path.len();
        if deepest > max_depth {
            return Err(HierarchyError::TooDeep {
                node: path[0],
                depth: deepest,
                max_depth,
            });
        }
        for (offset, id) in path.iter().rev().enumerate() {
            depths.insert(*id, base + offset + 1);
        }
    }
    Ok(())
}

/// A validated taxonomy, nodes held in id order
#[derive(Debug, Clone)]
pub struct Hierarchy {
    nodes: Vec<TaxonNode>,
    root_id: TaxonId,
    stats: BuildStats,
}

impl Hierarchy {
    /// Build from the two raw streams in one go
    pub fn from_readers<N: BufRead, M: BufRead>(nodes: N, names: M) -> Result<Self, HierarchyError> {
        Self::from_readers_with_max_depth(nodes, names, DEFAULT_MAX_DEPTH)
    }

    pub fn from_readers_with_max_depth<N: BufRead, M: BufRead>(
        nodes: N,
        names: M,
        max_depth: usize,
    ) -> Result<Self, HierarchyError> {
        let mut builder = HierarchyBuilder::new().with_max_depth(max_depth);
        builder.read_nodes(nodes)?;
        builder.read_names(names)?;
        builder.build()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root_id(&self) -> TaxonId {
        self.root_id
    }

    pub fn stats(&self) -> &BuildStats {
        &self.stats
    }

    pub fn get(&self, id: TaxonId) -> Option<&TaxonNode> {
        self.nodes
            .binary_search_by_key(&id, |n| n.taxon_id)
            .ok()
            .map(|idx| &self.nodes[idx])
    }

    pub fn contains(&self, id: TaxonId) -> bool {
        self.get(id).is_some()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TaxonNode> + '_ {
        self.nodes.iter()
    }

    /// Node attributes for the loader's node stage
    pub fn attributes(&self) -> impl Iterator<Item = TaxonAttributes> + '_ {
        self.nodes.iter().map(TaxonNode::attributes)
    }

    /// Parent links for the loader's edge stage; the root yields its self-loop
    pub fn edges(&self) -> impl Iterator<Item = ParentEdge> + '_ {
        self.nodes.iter().map(TaxonNode::edge)
    }

    /// Deterministic sample of ids for post-load verification
    ///
    /// `preferred` comes first when present, followed by evenly spaced ids.
    pub fn sample_ids(&self, count: usize, preferred: Option<TaxonId>) -> Vec<TaxonId> {
        let mut sample = Vec::with_capacity(count + 1);
        if let Some(id) = preferred.filter(|id| self.contains(*id)) {
            sample.push(id);
        }
        if count == 0 || self.nodes.is_empty() {
            return sample;
        }

        let step = (self.nodes.len() / count).max(1);
        for node in self.nodes.iter().step_by(step).take(count) {
            if !sample.contains(&node.taxon_id) {
                sample.push(node.taxon_id);
            }
        }
        sample
    }
}
