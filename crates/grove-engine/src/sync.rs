//! Sync engine: turn new file content into the smallest graph change
//!
//! A [`Syncer`] works on a private copy of the workspace. File-level steps
//! (`apply_text`, `remove`, `rename`) update that file's own nodes and note
//! which other files may see a difference; [`Syncer::converge`] then re-binds
//! and re-links exactly those files and checks the result.

use crate::error::SyncError;
use crate::resolve::{bind_file, collect_externals, exposes_imports, link_file};
use crate::workspace::{AppliedEdit, SourceFile, Workspace};
use grove_core::{
    EdgeKey, EdgeKind, EngineConfig, GraphDelta, GraphEdge, GraphNode, ImportBinding, Language,
    NodeDetail, NodeId, NodeKind, SourceRange, display_path,
};
use grove_indexer::cst::{point_at, to_point};
use grove_indexer::{
    Cst, FileFacts, ImportFact, ParserPool, SymbolFact, TextEdit, extract, plan, rewrite_module_uses,
    rewrite_specifier,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// A change to make on disk once the transaction commits.
#[derive(Debug, Clone, PartialEq)]
pub enum DiskOp {
    Write(PathBuf, Arc<str>),
    Remove(PathBuf),
}

impl DiskOp {
    pub fn path(&self) -> &Path {
        match self {
            DiskOp::Write(path, _) | DiskOp::Remove(path) => path,
        }
    }
}

/// What a converged sync produced.
#[derive(Debug)]
pub(crate) struct SyncOutcome {
    pub delta: GraphDelta,
    pub disk: Vec<DiskOp>,
}

pub(crate) struct Syncer<'a> {
    ws: &'a mut Workspace,
    pool: &'a ParserPool,
    config: &'a EngineConfig,
    /// Sequence number the commit will get.
    sequence: u64,
    bind: BTreeSet<PathBuf>,
    link: BTreeSet<PathBuf>,
    /// Files whose visible names changed, or that appeared or vanished.
    changed: BTreeSet<PathBuf>,
    /// Languages of removed files, for finding their package siblings.
    removed: BTreeMap<PathBuf, Language>,
    disk: Vec<DiskOp>,
}

impl<'a> Syncer<'a> {
    pub(crate) fn new(ws: &'a mut Workspace, pool: &'a ParserPool, config: &'a EngineConfig) -> Self {
        let sequence = ws.sequence + 1;
        ws.graph.begin_journal();
        Syncer {
            ws,
            pool,
            config,
            sequence,
            bind: BTreeSet::new(),
            link: BTreeSet::new(),
            changed: BTreeSet::new(),
            removed: BTreeMap::new(),
            disk: Vec::new(),
        }
    }

    /// Queue a disk change to perform if the transaction commits.
    pub(crate) fn write_back(&mut self, op: DiskOp) {
        self.disk.push(op);
    }

    /// Current content of a file in the working copy.
    pub(crate) fn file_text(&self, path: &Path) -> Option<Arc<str>> {
        self.ws.files.get(path).map(|f| f.text().clone())
    }

    /// Parse `text` as the new content of `path` and update the file's nodes.
    /// A single edit is reparsed incrementally; anything else from scratch.
    pub(crate) fn apply_text(
        &mut self,
        path: &Path,
        text: Arc<str>,
        edits: Vec<TextEdit>,
    ) -> Result<(), SyncError> {
        let language = Language::from_path(path);
        let cst = match (self.ws.files.get(path), edits.as_slice()) {
            (Some(previous), [edit]) if previous.language == language => {
                self.pool.reparse(path, &previous.cst, Some(*edit), text)?
            }
            _ => self.pool.parse_file(path, language, text)?,
        };
        let facts = extract(&cst);
        self.install(path, cst, facts, &edits)
    }

    /// Install an already parsed file (bulk loading parses in parallel).
    pub(crate) fn install(
        &mut self,
        path: &Path,
        cst: Cst,
        facts: FileFacts,
        edits: &[TextEdit],
    ) -> Result<(), SyncError> {
        let language = cst.language();
        let text = cst.text().clone();
        let previous = self.ws.files.remove(path);
        if let Some(previous) = &previous {
            self.ws.unindex_plans(path, &previous.plans);
        }

        let file_id = match &previous {
            Some(previous) => previous.node,
            None => self
                .ws
                .graph
                .insert_node(file_node(path, language, &text, &facts, &[], &[]))?,
        };

        let symbols = self.sync_symbols(path, language, file_id, previous.as_ref(), &facts)?;
        let imports = self.sync_imports(path, language, file_id, previous.as_ref(), &facts)?;
        let node = file_node(path, language, &text, &facts, &symbols, &imports);
        self.ws.graph.update_node(file_id, |n| *n = node)?;

        let lang_config = self.config.language(language);
        let plans: Vec<_> = facts
            .imports
            .iter()
            .map(|import| plan(language, path, import, &lang_config))
            .collect();
        self.ws.index_plans(path, &plans);

        let visible_change = previous
            .as_ref()
            .is_none_or(|p| signature(&p.facts) != signature(&facts));
        if visible_change {
            self.changed.insert(path.to_path_buf());
        }

        let (created, history, history_floor) = match previous {
            Some(previous) => (previous.created, previous.history, previous.history_floor),
            None => (self.sequence, VecDeque::new(), 0),
        };
        let mut file = SourceFile {
            path: path.to_path_buf(),
            language,
            node: file_id,
            cst,
            facts: Arc::new(facts),
            symbols,
            imports,
            plans,
            created,
            history,
            history_floor,
        };
        for edit in edits {
            file.record_edit(
                AppliedEdit {
                    sequence: self.sequence,
                    start: edit.start,
                    old_end: edit.old_end,
                    new_end: edit.new_end,
                },
                self.config.edit_history,
            );
        }
        debug!(
            "Synced {}: {} symbols, {} imports, {} parse errors",
            path.display(),
            file.symbols.len(),
            file.imports.len(),
            file.facts.error_ranges.len()
        );
        self.ws.files.insert(path.to_path_buf(), file);
        self.bind.insert(path.to_path_buf());
        self.link.insert(path.to_path_buf());
        Ok(())
    }

    /// Drop a file and everything it owns.
    pub(crate) fn remove(&mut self, path: &Path) -> Result<(), SyncError> {
        let file = self
            .ws
            .files
            .remove(path)
            .ok_or_else(|| SyncError::UnknownFile(path.to_path_buf()))?;
        self.ws.unindex_plans(path, &file.plans);
        self.ws.graph.remove_node(file.node)?;
        self.removed.insert(path.to_path_buf(), file.language);
        self.changed.insert(path.to_path_buf());
        self.bind.remove(path);
        self.link.remove(path);
        Ok(())
    }

    /// Move a file, keeping its node ids, and point Python and ECMAScript
    /// importers at the new path.
    pub(crate) fn rename(&mut self, from: &Path, to: &Path) -> Result<(), SyncError> {
        if !self.ws.files.contains_key(from) {
            return Err(SyncError::UnknownFile(from.to_path_buf()));
        }
        let rewrites = self.importer_rewrites(from, to);

        let mut file = self
            .ws
            .files
            .remove(from)
            .ok_or_else(|| SyncError::UnknownFile(from.to_path_buf()))?;
        self.ws.unindex_plans(from, &file.plans);
        let target = to.to_path_buf();
        for id in file.symbols.iter().chain(&file.imports) {
            self.ws.graph.update_node(*id, |n| n.file_path = target.clone())?;
        }
        self.ws.graph.update_node(file.node, |n| n.file_path = target.clone())?;
        file.path = target.clone();
        file.created = self.sequence;
        file.history.clear();
        file.history_floor = self.sequence;
        let text = file.text().clone();
        self.ws.files.insert(target.clone(), file);
        self.apply_text(to, text.clone(), Vec::new())?;

        self.removed.insert(from.to_path_buf(), Language::from_path(from));
        self.changed.insert(from.to_path_buf());
        self.changed.insert(target.clone());
        self.disk.push(DiskOp::Remove(from.to_path_buf()));
        self.disk.push(DiskOp::Write(target, text));

        for (importer, edits) in rewrites {
            let Some(current) = self.ws.files.get(&importer) else {
                continue;
            };
            let mut text = current.text().to_string();
            let mut applied = Vec::new();
            for (range, replacement) in edits.into_iter().rev() {
                if range.end > text.len() || !text.is_char_boundary(range.start) || !text.is_char_boundary(range.end) {
                    continue;
                }
                text.replace_range(range.start..range.end, &replacement);
                applied.push(TextEdit::replace(range, replacement.len()));
            }
            if applied.is_empty() {
                continue;
            }
            info!(
                "Rewrote {} import(s) in {} for {} -> {}",
                applied.len(),
                importer.display(),
                from.display(),
                to.display()
            );
            let text: Arc<str> = Arc::from(text);
            self.apply_text(&importer, text.clone(), applied)?;
            self.disk.push(DiskOp::Write(importer, text));
        }
        Ok(())
    }

    /// Specifier replacements, per importer in source order, for every
    /// import whose module currently resolves to `from`, plus the dotted
    /// uses of plain `import a.b` imports.
    fn importer_rewrites(&self, from: &Path, to: &Path) -> BTreeMap<PathBuf, Vec<(grove_core::ByteRange, String)>> {
        let mut rewrites: BTreeMap<PathBuf, Vec<(grove_core::ByteRange, String)>> = BTreeMap::new();
        for importer in self.ws.importers_of(from) {
            let Some(file) = self.ws.files.get(&importer) else {
                continue;
            };
            let config = self.config.language(file.language);
            for (idx, import) in file.facts.imports.iter().enumerate() {
                if !self.points_into(file, idx, from) {
                    continue;
                }
                let range = import.module_range;
                let Some(original) = file.text().get(range.start..range.end) else {
                    continue;
                };
                if let Some(replacement) =
                    rewrite_specifier(file.language, &importer, import, original, to, &config)
                {
                    if replacement != original {
                        let uses = rewrite_module_uses(
                            file.language,
                            import,
                            &file.facts.references,
                            file.text(),
                            &replacement,
                        );
                        let edits = rewrites.entry(importer.clone()).or_default();
                        edits.push((range, replacement));
                        edits.extend(uses);
                    }
                }
            }
        }
        for edits in rewrites.values_mut() {
            edits.sort_by_key(|(range, _)| range.start);
            edits.dedup_by_key(|(range, _)| range.start);
        }
        rewrites
    }

    /// Whether import `idx` of `file` resolves through a module candidate
    /// that is `target`.
    fn points_into(&self, file: &SourceFile, idx: usize, target: &Path) -> bool {
        let via_module = file.plans[idx].module.iter().any(|c| c.matches(target));
        let bound = self
            .ws
            .graph
            .node(file.imports[idx])
            .and_then(GraphNode::binding)
            .and_then(ImportBinding::target)
            .and_then(|id| self.ws.graph.node(id))
            .is_some_and(|n| n.file_path == target);
        via_module && bound
    }

    /// Re-bind and re-link everything affected by the file-level steps,
    /// then verify the graph.
    pub(crate) fn converge(mut self) -> Result<SyncOutcome, SyncError> {
        let mut propagated = BTreeSet::new();
        loop {
            while let Some(path) = self.changed.pop_first() {
                if !propagated.insert(path.clone()) {
                    continue;
                }
                for importer in self.ws.importers_of(&path) {
                    self.bind.insert(importer.clone());
                    self.link.insert(importer);
                }
                for sibling in self.package_siblings(&path) {
                    self.link.insert(sibling);
                }
            }
            let pending = std::mem::take(&mut self.bind);
            if pending.is_empty() {
                break;
            }
            for path in pending {
                bind_file(self.ws, &path)?;
                // Whatever this file re-exports may look different now.
                if self.ws.files.get(&path).is_some_and(exposes_imports) {
                    self.changed.insert(path);
                }
            }
        }

        for path in std::mem::take(&mut self.link) {
            link_file(self.ws, &path)?;
        }
        let collected = collect_externals(self.ws)?;
        if collected > 0 {
            debug!("Dropped {} unused external modules", collected);
        }
        check(self.ws)?;
        self.ws.sequence = self.sequence;
        Ok(SyncOutcome {
            delta: self.ws.graph.take_journal(),
            disk: self.disk,
        })
    }

    /// Other files of the same Go or Java package as `path`.
    fn package_siblings(&self, path: &Path) -> Vec<PathBuf> {
        let language = self
            .ws
            .files
            .get(path)
            .map(|f| f.language)
            .or_else(|| self.removed.get(path).copied())
            .unwrap_or(Language::Other);
        if !matches!(language, Language::Go | Language::Java) {
            return Vec::new();
        }
        let Some(dir) = path.parent() else {
            return Vec::new();
        };
        self.ws
            .package_files(dir, language)
            .into_iter()
            .filter(|f| f.path != path)
            .map(|f| f.path.clone())
            .collect()
    }

    /// Pair old and new symbols, update paired nodes in place, insert the
    /// rest and remove what disappeared. Returns ids parallel to
    /// `facts.symbols`.
    fn sync_symbols(
        &mut self,
        path: &Path,
        language: Language,
        file_id: NodeId,
        previous: Option<&SourceFile>,
        facts: &FileFacts,
    ) -> Result<Vec<NodeId>, SyncError> {
        let (old_facts, old_ids): (&[SymbolFact], &[NodeId]) = match previous {
            Some(p) => (&p.facts.symbols, &p.symbols),
            None => (&[], &[]),
        };
        let (paired, taken) = pair_symbols(old_facts, old_ids, &facts.symbols);

        let graph = &mut self.ws.graph;
        let mut ids: Vec<NodeId> = Vec::with_capacity(facts.symbols.len());
        for (idx, symbol) in facts.symbols.iter().enumerate() {
            let parent = symbol.parent.and_then(|p| ids.get(p).copied());
            let node = GraphNode {
                id: NodeId::default(),
                kind: symbol.kind,
                name: Some(symbol.name.clone()),
                qualified_name: symbol.qualified_name.clone(),
                file_path: path.to_path_buf(),
                range: symbol.range,
                language,
                detail: NodeDetail::Symbol {
                    parent,
                    exported: symbol.exported,
                },
            };
            let id = match paired[idx] {
                Some(id) => {
                    graph.update_node(id, |n| *n = node)?;
                    id
                }
                None => {
                    let id = graph.insert_node(node)?;
                    graph.insert_edge(GraphEdge::structural(file_id, id, EdgeKind::Defines))?;
                    id
                }
            };

            let stale: Vec<EdgeKey> = graph
                .edges_to(id)
                .filter(|e| e.kind == EdgeKind::Contains && Some(e.source) != parent)
                .map(GraphEdge::key)
                .collect();
            for key in stale {
                graph.remove_edge(&key);
            }
            if let Some(parent) = parent {
                graph.insert_edge(GraphEdge::structural(parent, id, EdgeKind::Contains))?;
            }
            ids.push(id);
        }

        for (old, id) in old_ids.iter().enumerate() {
            if !taken[old] && graph.contains(*id) {
                graph.remove_node(*id)?;
            }
        }
        Ok(ids)
    }

    fn sync_imports(
        &mut self,
        path: &Path,
        language: Language,
        file_id: NodeId,
        previous: Option<&SourceFile>,
        facts: &FileFacts,
    ) -> Result<Vec<NodeId>, SyncError> {
        let (old_facts, old_ids): (&[ImportFact], &[NodeId]) = match previous {
            Some(p) => (&p.facts.imports, &p.imports),
            None => (&[], &[]),
        };
        let mut slots: HashMap<ImportKey<'_>, VecDeque<usize>> = HashMap::new();
        for (idx, import) in old_facts.iter().enumerate() {
            slots.entry(ImportKey::of(import)).or_default().push_back(idx);
        }

        let graph = &mut self.ws.graph;
        let mut taken = vec![false; old_ids.len()];
        let mut ids = Vec::with_capacity(facts.imports.len());
        for import in &facts.imports {
            let node = GraphNode {
                id: NodeId::default(),
                kind: NodeKind::Import,
                name: Some(import.display_name()),
                qualified_name: import.display_name(),
                file_path: path.to_path_buf(),
                range: import.range,
                language,
                detail: NodeDetail::Import {
                    module: import.module.clone(),
                    member: import.member.clone(),
                    alias: import.alias.clone(),
                    wildcard: import.wildcard,
                    binding: ImportBinding::Unresolved("not resolved yet".to_string()),
                },
            };
            let reuse = slots.get_mut(&ImportKey::of(import)).and_then(VecDeque::pop_front);
            let id = match reuse {
                Some(old) => {
                    taken[old] = true;
                    let id = old_ids[old];
                    graph.update_node(id, |n| {
                        let binding = n.binding().cloned();
                        *n = node;
                        if let (Some(binding), NodeDetail::Import { binding: slot, .. }) =
                            (binding, &mut n.detail)
                        {
                            *slot = binding;
                        }
                    })?;
                    id
                }
                None => {
                    let id = graph.insert_node(node)?;
                    graph.insert_edge(GraphEdge::structural(file_id, id, EdgeKind::Imports))?;
                    id
                }
            };
            ids.push(id);
        }

        for (old, id) in old_ids.iter().enumerate() {
            if !taken[old] && graph.contains(*id) {
                graph.remove_node(*id)?;
            }
        }
        Ok(ids)
    }
}

fn file_node(
    path: &Path,
    language: Language,
    text: &str,
    facts: &FileFacts,
    symbols: &[NodeId],
    imports: &[NodeId],
) -> GraphNode {
    GraphNode {
        id: NodeId::default(),
        kind: NodeKind::File,
        name: path.file_name().map(|n| n.to_string_lossy().into_owned()),
        qualified_name: display_path(path),
        file_path: path.to_path_buf(),
        range: SourceRange {
            start_byte: 0,
            end_byte: text.len(),
            start: grove_core::Point::default(),
            end: to_point(point_at(text, text.len())),
        },
        language,
        detail: NodeDetail::File {
            symbols: symbols.to_vec(),
            imports: imports.to_vec(),
            error_ranges: facts.error_ranges.clone(),
        },
    }
}

/// Imports are paired by what they say, in order of appearance.
#[derive(PartialEq, Eq, Hash)]
struct ImportKey<'f> {
    module: &'f str,
    member: Option<&'f str>,
    local: Option<&'f str>,
    wildcard: bool,
}

impl<'f> ImportKey<'f> {
    fn of(import: &'f ImportFact) -> Self {
        ImportKey {
            module: &import.module,
            member: import.member.as_deref(),
            local: import.local.as_deref(),
            wildcard: import.wildcard,
        }
    }
}

/// Pair new symbols with old ones: by `(kind, qualified name, occurrence)`,
/// then by unchanged text under the same parent (renames), then by name
/// under the same parent (renamed parent, edited body). Returns the old id
/// for each new symbol and which old symbols were taken.
pub(crate) fn pair_symbols(
    old: &[SymbolFact],
    old_ids: &[NodeId],
    new: &[SymbolFact],
) -> (Vec<Option<NodeId>>, Vec<bool>) {
    let mut paired: Vec<Option<NodeId>> = vec![None; new.len()];
    let mut taken = vec![false; old.len()];

    let mut slots: HashMap<(NodeKind, &str), VecDeque<usize>> = HashMap::new();
    for (idx, symbol) in old.iter().enumerate() {
        slots
            .entry((symbol.kind, symbol.qualified_name.as_str()))
            .or_default()
            .push_back(idx);
    }
    for (idx, symbol) in new.iter().enumerate() {
        if let Some(old_idx) = slots
            .get_mut(&(symbol.kind, symbol.qualified_name.as_str()))
            .and_then(VecDeque::pop_front)
        {
            paired[idx] = Some(old_ids[old_idx]);
            taken[old_idx] = true;
        }
    }

    type SameSymbol = fn(&SymbolFact, &SymbolFact) -> bool;
    let passes: [SameSymbol; 2] = [
        |a, b| a.shape_hash == b.shape_hash,
        |a, b| a.name == b.name,
    ];
    for same in passes {
        for idx in 0..new.len() {
            if paired[idx].is_some() {
                continue;
            }
            let symbol = &new[idx];
            let parent = symbol.parent.map(|p| paired[p]);
            let found = old.iter().enumerate().position(|(old_idx, candidate)| {
                !taken[old_idx]
                    && candidate.kind == symbol.kind
                    && candidate.parent.map(|p| Some(old_ids[p])) == parent
                    && same(candidate, symbol)
            });
            if let Some(old_idx) = found {
                paired[idx] = Some(old_ids[old_idx]);
                taken[old_idx] = true;
            }
        }
    }
    (paired, taken)
}

/// Everything about a file that other files can observe through imports,
/// inheritance or member access.
fn signature(facts: &FileFacts) -> Vec<String> {
    let mut parts: Vec<String> = facts
        .symbols
        .iter()
        .map(|s| {
            let bases: Vec<String> = s
                .bases
                .iter()
                .map(|b| std::iter::once(b.name.as_str()).chain(b.path.iter().map(String::as_str)).collect::<Vec<_>>().join("."))
                .collect();
            format!("{}:{}:{}", s.kind.as_str(), s.qualified_name, bases.join(","))
        })
        .collect();
    parts.extend(facts.surface());
    parts.extend(facts.imports.iter().map(|i| {
        format!(
            "{}|{:?}|{:?}|{}|{}",
            i.module, i.member, i.local, i.wildcard, i.reexport
        )
    }));
    parts.extend(facts.package.iter().map(|p| format!("package {p}")));
    parts
}

/// Engine-level post-conditions on top of the graph's own checks.
pub(crate) fn check(ws: &Workspace) -> Result<(), SyncError> {
    ws.graph
        .check_consistency()
        .map_err(|e| SyncError::Inconsistent(e.to_string()))?;

    for file in ws.files.values() {
        if ws.graph.file_node(&file.path) != Some(file.node) {
            return Err(SyncError::Inconsistent(format!(
                "{} has no matching file node",
                display_path(&file.path)
            )));
        }
        for id in file.symbols.iter().chain(&file.imports) {
            let owned = ws.graph.node(*id).is_some_and(|n| n.file_path == file.path);
            if !owned {
                return Err(SyncError::Inconsistent(format!(
                    "{} lost node {id}",
                    display_path(&file.path)
                )));
            }
        }
        for id in &file.imports {
            let targets = ws
                .graph
                .edges_from(*id)
                .filter(|e| e.kind == EdgeKind::Imports)
                .count();
            if targets > 1 {
                return Err(SyncError::Inconsistent(format!(
                    "import {id} in {} has {targets} targets",
                    display_path(&file.path)
                )));
            }
        }
    }
    if ws.graph.nodes_of_type(NodeKind::File).count() != ws.files.len() {
        return Err(SyncError::Inconsistent(
            "file nodes and sources disagree".to_string(),
        ));
    }
    Ok(())
}
