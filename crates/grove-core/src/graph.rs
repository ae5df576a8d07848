//! Graph wrapper using petgraph::StableDiGraph with engine-assigned NodeIds

use crate::diff::{EdgeKey, GraphDelta};
use crate::error::GraphError;
use crate::model::*;
use crate::symbols::SymbolTable;
use petgraph::Direction;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The code graph: typed nodes, typed edges keyed by `(source, target, kind)`,
/// and indices for id, name and path lookup.
///
/// `StableDiGraph` recycles vacated slots, so petgraph indices are never
/// exposed; callers only see [`NodeId`]s, which are never reused.
#[derive(Clone)]
pub struct Graph {
    inner: StableDiGraph<GraphNode, GraphEdge>,
    ids: HashMap<NodeId, NodeIndex>,
    edges: HashMap<EdgeKey, EdgeIndex>,
    names: SymbolTable,
    files: HashMap<PathBuf, NodeId>,
    next_id: u64,
    journal: Option<GraphDelta>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("node_count", &self.inner.node_count())
            .field("edge_count", &self.inner.edge_count())
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl Graph {
    pub fn new() -> Self {
        Graph {
            inner: StableDiGraph::new(),
            ids: HashMap::new(),
            edges: HashMap::new(),
            names: SymbolTable::new(),
            files: HashMap::new(),
            next_id: 1,
            journal: None,
        }
    }

    /// Start recording mutations. Any previous journal is discarded.
    pub fn begin_journal(&mut self) {
        self.journal = Some(GraphDelta::new());
    }

    /// Stop recording and return everything recorded since `begin_journal`.
    pub fn take_journal(&mut self) -> GraphDelta {
        self.journal.take().unwrap_or_default()
    }

    fn record(&mut self, f: impl FnOnce(&mut GraphDelta)) {
        if let Some(journal) = self.journal.as_mut() {
            f(journal);
        }
    }

    /// Add a node. The graph assigns a fresh id, overwriting `node.id`.
    pub fn insert_node(&mut self, mut node: GraphNode) -> Result<NodeId, GraphError> {
        if node.kind == NodeKind::File && self.files.contains_key(&node.file_path) {
            return Err(GraphError::InvalidOperation(format!(
                "file {} is already in the graph",
                display_path(&node.file_path)
            )));
        }
        let id = NodeId(self.next_id);
        self.next_id += 1;
        node.id = id;

        if let Some(name) = &node.name {
            self.names.insert(name, id);
        }
        if node.kind == NodeKind::File {
            self.files.insert(node.file_path.clone(), id);
        }
        let idx = self.inner.add_node(node);
        self.ids.insert(id, idx);
        self.record(|j| j.added_nodes.push(id));
        Ok(id)
    }

    /// Mutate a node in place. Returns whether anything changed; unchanged
    /// updates are not journaled.
    pub fn update_node(
        &mut self,
        id: NodeId,
        f: impl FnOnce(&mut GraphNode),
    ) -> Result<bool, GraphError> {
        let idx = *self.ids.get(&id).ok_or(GraphError::NodeNotFound(id))?;
        let weight = self
            .inner
            .node_weight_mut(idx)
            .ok_or_else(|| GraphError::IndexMismatch(format!("{id} has no weight")))?;
        let before = weight.clone();
        f(weight);
        weight.id = id;
        weight.kind = before.kind;
        if *weight == before {
            return Ok(false);
        }
        let (name, path) = (weight.name.clone(), weight.file_path.clone());

        if before.name != name {
            if let Some(old) = &before.name {
                self.names.remove(old, id);
            }
            if let Some(new) = &name {
                self.names.insert(new, id);
            }
        }
        if before.kind == NodeKind::File && before.file_path != path {
            if self.files.contains_key(&path) {
                return Err(GraphError::InvalidOperation(format!(
                    "file {} is already in the graph",
                    display_path(&path)
                )));
            }
            self.files.remove(&before.file_path);
            self.files.insert(path, id);
        }
        self.record(|j| j.modified_nodes.push(id));
        Ok(true)
    }

    /// Remove a node and every edge touching it.
    ///
    /// Removing a `File` also removes every symbol and import it owns; removing
    /// a symbol also removes its nested symbols. Imports bound to a removed
    /// node fall back to `Unresolved`.
    pub fn remove_node(&mut self, id: NodeId) -> Result<GraphNode, GraphError> {
        let node = self.node(id).ok_or(GraphError::NodeNotFound(id))?.clone();

        let mut owned: Vec<NodeId> = match &node.detail {
            NodeDetail::File { symbols, imports, .. } => {
                symbols.iter().chain(imports.iter()).copied().collect()
            }
            _ => Vec::new(),
        };
        owned.extend(
            self.edges_from(id)
                .filter(|e| e.kind == EdgeKind::Contains)
                .map(|e| e.target),
        );
        for child in owned {
            if self.contains(child) {
                self.remove_node(child)?;
            }
        }

        let bound_here: Vec<NodeId> = self
            .edges_to(id)
            .filter(|e| e.kind == EdgeKind::Imports)
            .map(|e| e.source)
            .filter(|src| {
                self.node(*src)
                    .and_then(GraphNode::binding)
                    .is_some_and(|b| b.target() == Some(id))
            })
            .collect();
        if !bound_here.is_empty() {
            tracing::debug!("Unbinding {} import(s) of removed {}", bound_here.len(), node.name());
        }
        for import in bound_here {
            let reason = format!("{} was removed", node.name());
            self.update_node(import, |n| {
                if let NodeDetail::Import { binding, .. } = &mut n.detail {
                    *binding = ImportBinding::Unresolved(reason);
                }
            })?;
        }

        if node.kind != NodeKind::File {
            if let Some(file) = self.files.get(&node.file_path).copied() {
                if file != id {
                    self.update_node(file, |f| {
                        if let NodeDetail::File { symbols, imports, .. } = &mut f.detail {
                            symbols.retain(|s| *s != id);
                            imports.retain(|s| *s != id);
                        }
                    })?;
                }
            }
        }

        let idx = *self.ids.get(&id).ok_or(GraphError::NodeNotFound(id))?;
        let touching: Vec<EdgeKey> = self
            .inner
            .edges_directed(idx, Direction::Outgoing)
            .chain(self.inner.edges_directed(idx, Direction::Incoming))
            .map(|e| e.weight().key())
            .collect();
        for key in touching {
            self.edges.remove(&key);
            self.record(|j| j.removed_edges.push(key));
        }

        self.ids.remove(&id);
        let removed = self
            .inner
            .remove_node(idx)
            .ok_or_else(|| GraphError::IndexMismatch(format!("{id} vanished during removal")))?;
        if let Some(name) = &removed.name {
            self.names.remove(name, id);
        }
        if removed.kind == NodeKind::File {
            self.files.remove(&removed.file_path);
        }
        self.record(|j| j.removed_nodes.push(id));
        Ok(removed)
    }

    /// Insert an edge. Idempotent: inserting an identical edge is a no-op and
    /// returns `false`. Both endpoints must exist.
    pub fn insert_edge(&mut self, edge: GraphEdge) -> Result<bool, GraphError> {
        let key = edge.key();
        let source = *self.ids.get(&key.source).ok_or(GraphError::DanglingEdge(key))?;
        let target = *self.ids.get(&key.target).ok_or(GraphError::DanglingEdge(key))?;

        if let Some(&eidx) = self.edges.get(&key) {
            let existing = self
                .inner
                .edge_weight_mut(eidx)
                .ok_or_else(|| GraphError::IndexMismatch(format!("{key:?} has no weight")))?;
            if *existing == edge {
                return Ok(false);
            }
            *existing = edge;
            self.record(|j| j.modified_edges.push(key));
            return Ok(true);
        }

        let eidx = self.inner.add_edge(source, target, edge);
        self.edges.insert(key, eidx);
        self.record(|j| j.added_edges.push(key));
        Ok(true)
    }

    /// Remove an edge by key.
    pub fn remove_edge(&mut self, key: &EdgeKey) -> Option<GraphEdge> {
        let eidx = self.edges.remove(key)?;
        let removed = self.inner.remove_edge(eidx);
        if removed.is_some() {
            let key = *key;
            self.record(|j| j.removed_edges.push(key));
        }
        removed
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.ids.contains_key(&id)
    }

    /// Get a node by ID.
    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.ids.get(&id).and_then(|idx| self.inner.node_weight(*idx))
    }

    pub fn edge(&self, key: &EdgeKey) -> Option<&GraphEdge> {
        self.edges.get(key).and_then(|idx| self.inner.edge_weight(*idx))
    }

    pub fn has_edge(&self, source: NodeId, target: NodeId, kind: EdgeKind) -> bool {
        self.edges.contains_key(&EdgeKey::new(source, target, kind))
    }

    /// File node for a project path.
    pub fn file_node(&self, path: &Path) -> Option<NodeId> {
        self.files.get(path).copied()
    }

    /// Total number of nodes.
    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    /// Total number of edges.
    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    /// Iterate over all nodes.
    pub fn all_nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.inner.node_weights()
    }

    /// Iterate over all edges.
    pub fn all_edges(&self) -> impl Iterator<Item = &GraphEdge> {
        self.inner.edge_weights()
    }

    /// All nodes of a specific kind.
    pub fn nodes_of_type(&self, kind: NodeKind) -> impl Iterator<Item = &GraphNode> {
        self.inner.node_weights().filter(move |n| n.kind == kind)
    }

    /// Outgoing edges from a node. Empty for unknown ids.
    pub fn edges_from(&self, source: NodeId) -> impl Iterator<Item = &GraphEdge> {
        self.ids.get(&source).into_iter().flat_map(move |idx| {
            self.inner
                .edges_directed(*idx, Direction::Outgoing)
                .map(|e| e.weight())
        })
    }

    /// Incoming edges to a node. Empty for unknown ids.
    pub fn edges_to(&self, target: NodeId) -> impl Iterator<Item = &GraphEdge> {
        self.ids.get(&target).into_iter().flat_map(move |idx| {
            self.inner
                .edges_directed(*idx, Direction::Incoming)
                .map(|e| e.weight())
        })
    }

    /// Nodes carrying exactly this simple name, in id order.
    pub fn find_by_name(&self, name: &str) -> Vec<NodeId> {
        self.names.lookup(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.names()
    }

    /// Verify that every edge endpoint, owned-node list and import binding
    /// points at a live node and that all indices agree with the storage.
    pub fn check_consistency(&self) -> Result<(), GraphError> {
        if self.ids.len() != self.inner.node_count() {
            return Err(GraphError::IndexMismatch(format!(
                "{} ids for {} nodes",
                self.ids.len(),
                self.inner.node_count()
            )));
        }
        if self.edges.len() != self.inner.edge_count() {
            return Err(GraphError::IndexMismatch(format!(
                "{} edge keys for {} edges",
                self.edges.len(),
                self.inner.edge_count()
            )));
        }
        for (id, idx) in &self.ids {
            match self.inner.node_weight(*idx) {
                Some(node) if node.id == *id => {}
                _ => return Err(GraphError::IndexMismatch(format!("{id} points at the wrong slot"))),
            }
        }
        for edge in self.inner.edge_weights() {
            let key = edge.key();
            if !self.contains(key.source) || !self.contains(key.target) {
                return Err(GraphError::DanglingEdge(key));
            }
            if !self.edges.contains_key(&key) {
                return Err(GraphError::IndexMismatch(format!("{key:?} is not indexed")));
            }
        }
        for (path, id) in &self.files {
            if self.node(*id).is_none_or(|n| &n.file_path != path) {
                return Err(GraphError::IndexMismatch(format!(
                    "path index for {} is stale",
                    display_path(path)
                )));
            }
        }
        for node in self.inner.node_weights() {
            match &node.detail {
                NodeDetail::File { symbols, imports, .. } => {
                    if let Some(missing) = symbols.iter().chain(imports).find(|id| !self.contains(**id)) {
                        return Err(GraphError::InvalidOperation(format!(
                            "{} lists removed node {missing}",
                            display_path(&node.file_path)
                        )));
                    }
                }
                NodeDetail::Symbol { parent: Some(parent), .. } if !self.contains(*parent) => {
                    return Err(GraphError::InvalidOperation(format!(
                        "{} has removed parent {parent}",
                        node.qualified_name
                    )));
                }
                NodeDetail::Import { binding: ImportBinding::Resolved(target), .. } => {
                    if !self.contains(*target) {
                        return Err(GraphError::InvalidOperation(format!(
                            "import {} is bound to removed node {target}",
                            node.id
                        )));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}
