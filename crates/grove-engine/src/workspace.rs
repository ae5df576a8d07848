//! Committed engine state: the graph plus the sources it was built from
//!
//! A `Workspace` is a value. Transactions clone the committed one, mutate
//! the clone and publish it whole, so readers never see a half-applied
//! change. Graph, texts and trees are either small or reference counted,
//! which keeps the clone affordable.

use grove_core::{Graph, GraphNode, Language, NodeId, NodeKind};
use grove_indexer::{Cst, FileFacts, ModulePlan};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One applied text replacement, kept for stale-range validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedEdit {
    /// Workspace sequence number of the commit that applied it.
    pub sequence: u64,
    pub start: usize,
    pub old_end: usize,
    pub new_end: usize,
}

impl AppliedEdit {
    /// Whether a range computed before this edit no longer means the same
    /// text: the edit starts inside or before it.
    pub fn invalidates(&self, start: usize, end: usize) -> bool {
        self.start < end || self.start <= start
    }
}

/// A file the engine knows about: content, tree, extracted facts and the
/// graph nodes built from them.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub(crate) path: PathBuf,
    pub(crate) language: Language,
    pub(crate) node: NodeId,
    pub(crate) cst: Cst,
    pub(crate) facts: Arc<FileFacts>,
    /// Graph ids parallel to `facts.symbols`.
    pub(crate) symbols: Vec<NodeId>,
    /// Graph ids parallel to `facts.imports`.
    pub(crate) imports: Vec<NodeId>,
    /// Module candidates parallel to `facts.imports`.
    pub(crate) plans: Vec<ModulePlan>,
    /// Sequence at which the current content lineage started (add, rename).
    pub(crate) created: u64,
    pub(crate) history: VecDeque<AppliedEdit>,
    /// Edits at or below this sequence have been forgotten.
    pub(crate) history_floor: u64,
}

impl SourceFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Id of the `File` node.
    pub fn id(&self) -> NodeId {
        self.node
    }

    pub fn text(&self) -> &Arc<str> {
        self.cst.text()
    }

    pub fn cst(&self) -> &Cst {
        &self.cst
    }

    pub fn facts(&self) -> &FileFacts {
        &self.facts
    }

    /// Symbol node ids in declaration order.
    pub fn symbols(&self) -> &[NodeId] {
        &self.symbols
    }

    pub fn imports(&self) -> &[NodeId] {
        &self.imports
    }

    pub fn has_errors(&self) -> bool {
        !self.facts.error_ranges.is_empty()
    }

    /// Index into `facts.symbols` of a symbol node of this file.
    pub(crate) fn symbol_index(&self, id: NodeId) -> Option<usize> {
        self.symbols.iter().position(|s| *s == id)
    }

    /// Whether a range computed against workspace sequence `base` still
    /// addresses the same text.
    pub(crate) fn range_is_current(&self, base: u64, start: usize, end: usize) -> bool {
        if base < self.created || base < self.history_floor {
            return false;
        }
        self.history
            .iter()
            .filter(|e| e.sequence > base)
            .all(|e| !e.invalidates(start, end))
    }

    pub(crate) fn record_edit(&mut self, edit: AppliedEdit, keep: usize) {
        self.history.push_back(edit);
        while self.history.len() > keep.max(1) {
            if let Some(dropped) = self.history.pop_front() {
                self.history_floor = self.history_floor.max(dropped.sequence);
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Workspace {
    pub(crate) graph: Graph,
    pub(crate) files: BTreeMap<PathBuf, SourceFile>,
    /// Candidate path (file or package directory) to the files whose
    /// imports may resolve there.
    pub(crate) importers: BTreeMap<PathBuf, BTreeSet<PathBuf>>,
    /// One placeholder node per external module.
    pub(crate) externals: BTreeMap<(Language, String), NodeId>,
    /// Number of committed transactions.
    pub(crate) sequence: u64,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn file(&self, path: &Path) -> Option<&SourceFile> {
        self.files.get(path)
    }

    pub fn files(&self) -> impl Iterator<Item = &SourceFile> {
        self.files.values()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.keys().map(PathBuf::as_path)
    }

    /// Owning file and symbol index of a symbol node.
    pub(crate) fn locate(&self, id: NodeId) -> Option<(&SourceFile, usize)> {
        let node = self.graph.node(id)?;
        if !node.kind.is_symbol() {
            return None;
        }
        let file = self.files.get(&node.file_path)?;
        let idx = file.symbol_index(id)?;
        Some((file, idx))
    }

    /// The file a node belongs to (itself for `File` nodes).
    pub(crate) fn owning_file(&self, id: NodeId) -> Option<&SourceFile> {
        let node: &GraphNode = self.graph.node(id)?;
        match node.kind {
            NodeKind::ExternalModule => None,
            _ => self.files.get(&node.file_path),
        }
    }

    /// Files of `language` directly inside `dir`, in path order.
    pub(crate) fn package_files(&self, dir: &Path, language: Language) -> Vec<&SourceFile> {
        self.files
            .values()
            .filter(|f| f.language == language && f.path.parent().is_some_and(|p| p == dir))
            .collect()
    }

    pub(crate) fn index_plans(&mut self, importer: &Path, plans: &[ModulePlan]) {
        for candidate in plans.iter().flat_map(ModulePlan::all) {
            self.importers
                .entry(candidate.path().to_path_buf())
                .or_default()
                .insert(importer.to_path_buf());
        }
    }

    pub(crate) fn unindex_plans(&mut self, importer: &Path, plans: &[ModulePlan]) {
        for candidate in plans.iter().flat_map(ModulePlan::all) {
            if let Some(set) = self.importers.get_mut(candidate.path()) {
                set.remove(importer);
                if set.is_empty() {
                    self.importers.remove(candidate.path());
                }
            }
        }
    }

    /// Files with an import that may resolve to `path`, either directly or
    /// as a member of its package directory.
    pub(crate) fn importers_of(&self, path: &Path) -> BTreeSet<PathBuf> {
        let mut found = BTreeSet::new();
        if let Some(set) = self.importers.get(path) {
            found.extend(set.iter().cloned());
        }
        if let Some(set) = path.parent().and_then(|dir| self.importers.get(dir)) {
            found.extend(set.iter().cloned());
        }
        found.remove(path);
        found
    }
}
