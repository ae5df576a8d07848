//! Graph mutation journal for incremental updates

use crate::model::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Identity of an edge: edges carry no id of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    pub source: NodeId,
    pub target: NodeId,
    pub kind: EdgeKind,
}

impl EdgeKey {
    pub fn new(source: NodeId, target: NodeId, kind: EdgeKind) -> Self {
        EdgeKey { source, target, kind }
    }
}

/// Every mutation applied to a graph while journaling was on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDelta {
    /// Nodes added in this update.
    pub added_nodes: Vec<NodeId>,
    /// Nodes removed in this update.
    pub removed_nodes: Vec<NodeId>,
    /// Nodes whose payload changed (range, name, binding ...).
    pub modified_nodes: Vec<NodeId>,
    /// Edges added in this update.
    pub added_edges: Vec<EdgeKey>,
    /// Edges removed in this update.
    pub removed_edges: Vec<EdgeKey>,
    /// Edges whose source/confidence changed.
    pub modified_edges: Vec<EdgeKey>,
}

impl GraphDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if this delta is empty (no changes).
    pub fn is_empty(&self) -> bool {
        self.mutation_count() == 0
    }

    pub fn mutation_count(&self) -> usize {
        self.added_nodes.len()
            + self.removed_nodes.len()
            + self.modified_nodes.len()
            + self.added_edges.len()
            + self.removed_edges.len()
            + self.modified_edges.len()
    }

    /// Append another delta recorded after this one.
    pub fn merge(&mut self, other: GraphDelta) {
        self.added_nodes.extend(other.added_nodes);
        self.removed_nodes.extend(other.removed_nodes);
        self.modified_nodes.extend(other.modified_nodes);
        self.added_edges.extend(other.added_edges);
        self.removed_edges.extend(other.removed_edges);
        self.modified_edges.extend(other.modified_edges);
    }

    /// Ids of every node touched by this delta, including both ends of
    /// changed edges. Removed ids are included so holders know to drop them.
    pub fn changed_nodes(&self) -> BTreeSet<NodeId> {
        let mut ids: BTreeSet<NodeId> = self
            .added_nodes
            .iter()
            .chain(&self.removed_nodes)
            .chain(&self.modified_nodes)
            .copied()
            .collect();
        for key in self
            .added_edges
            .iter()
            .chain(&self.removed_edges)
            .chain(&self.modified_edges)
        {
            ids.insert(key.source);
            ids.insert(key.target);
        }
        ids
    }
}
