//! Name index for symbol lookup

use crate::model::NodeId;
use std::collections::{BTreeSet, HashMap};

/// Maps simple names to the nodes carrying them.
///
/// Owned by [`crate::Graph`] and kept in step with node insert/update/remove,
/// so it is cloned together with the graph it indexes.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    by_name: HashMap<String, BTreeSet<NodeId>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, id: NodeId) {
        self.by_name.entry(name.to_string()).or_default().insert(id);
    }

    pub fn remove(&mut self, name: &str, id: NodeId) {
        if let Some(ids) = self.by_name.get_mut(name) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_name.remove(name);
            }
        }
    }

    /// All nodes named `name`, in id order.
    pub fn lookup(&self, name: &str) -> Vec<NodeId> {
        self.by_name
            .get(name)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
