//! Import binding and usage linking
//!
//! Both passes read a file's extracted facts and write edges that start at
//! that file's nodes. Cross-file lookups follow re-exports and wildcard
//! imports on demand, with a visited set so cyclic imports terminate.

use crate::error::SyncError;
use crate::workspace::{SourceFile, Workspace};
use grove_core::{
    EdgeKey, EdgeKind, EdgeSource, GraphEdge, GraphNode, ImportBinding, Language, NodeDetail,
    NodeId, NodeKind, SourceRange,
};
use grove_indexer::{
    Candidate, Decl, Fallback, ImportFact, NameRef, RefKind, ReferenceFact, Scope, ScopeId,
    ScopeKind, ScopeTree,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use tracing::debug;

/// `self.x` resolved to a member of the enclosing class.
pub const SELF_MEMBER_CONFIDENCE: f32 = 0.8;
/// `self.x` resolved to a member inherited from a base class.
pub const INHERITED_MEMBER_CONFIDENCE: f32 = 0.7;
/// `getattr(obj, "x")` and friends.
pub const STRING_LOOKUP_CONFIDENCE: f32 = 0.5;

/// What an import statement points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Resolution {
    Node(NodeId),
    Unresolved(String),
    External(String),
}

/// Files satisfying the first candidate that is present.
fn first_present<'w>(
    ws: &'w Workspace,
    language: Language,
    candidates: &[Candidate],
) -> Vec<&'w SourceFile> {
    for candidate in candidates {
        match candidate {
            Candidate::File(path) => {
                if let Some(file) = ws.files.get(path) {
                    return vec![file];
                }
            }
            Candidate::Package(dir) => {
                let files = ws.package_files(dir, language);
                if !files.is_empty() {
                    return files;
                }
            }
        }
    }
    Vec::new()
}

/// Whether importers of `file` can see the names an import binds.
fn exposes(language: Language, import: &ImportFact) -> bool {
    match language {
        Language::Python => import.scope == ScopeTree::ROOT,
        Language::JavaScript | Language::TypeScript | Language::Rust => import.reexport,
        Language::Go | Language::Java | Language::Other => false,
    }
}

/// Whether anything `file` imports is visible to its own importers.
pub(crate) fn exposes_imports(file: &SourceFile) -> bool {
    file.facts.imports.iter().any(|i| exposes(file.language, i))
}

/// Resolve import `idx` of `file` against the files currently present.
pub(crate) fn resolve_import(
    ws: &Workspace,
    file: &SourceFile,
    idx: usize,
    visited: &mut BTreeSet<PathBuf>,
) -> Resolution {
    let import = &file.facts.imports[idx];
    let plan = &file.plans[idx];
    let modules = first_present(ws, file.language, &plan.module);

    if let Some(module) = modules.first() {
        let member = match &import.member {
            Some(member) if !import.wildcard => member,
            _ => return Resolution::Node(module.node),
        };
        if let Some(found) = lookup_member(ws, &modules, member, visited) {
            return found;
        }
        if let Some(submodule) = first_present(ws, file.language, &plan.member).first() {
            return Resolution::Node(submodule.node);
        }
        return Resolution::Unresolved(format!("{member} not found in {}", import.module));
    }

    if import.member.is_some() {
        if let Some(submodule) = first_present(ws, file.language, &plan.member).first() {
            return Resolution::Node(submodule.node);
        }
    }
    match &plan.fallback {
        Fallback::Unresolved(reason) => Resolution::Unresolved(reason.clone()),
        Fallback::External(name) => Resolution::External(name.clone()),
    }
}

/// Find what `name` means to an importer of `files`: a top-level symbol,
/// or whatever a re-exported or wildcard import makes visible.
fn lookup_member(
    ws: &Workspace,
    files: &[&SourceFile],
    name: &str,
    visited: &mut BTreeSet<PathBuf>,
) -> Option<Resolution> {
    for file in files {
        if !visited.insert(file.path.clone()) {
            continue;
        }
        let facts = &file.facts;
        let name = if name == "default" {
            match &facts.default_export {
                Some(default) => default.as_str(),
                None => continue,
            }
        } else {
            name
        };

        if let Some(idx) = facts.top_level_symbol(name) {
            return Some(Resolution::Node(file.symbols[idx]));
        }

        let root = facts.scopes.root();
        if let Some(imp) = root.import(name) {
            if exposes(file.language, &facts.imports[imp]) {
                match resolve_import(ws, file, imp, visited) {
                    Resolution::Unresolved(_) => {}
                    found => return Some(found),
                }
            }
        }

        for &wildcard in root.wildcards() {
            if !exposes(file.language, &facts.imports[wildcard]) {
                continue;
            }
            let modules = first_present(ws, file.language, &file.plans[wildcard].module);
            if let Some(found) = lookup_member(ws, &modules, name, visited) {
                return Some(found);
            }
        }
    }
    None
}

fn external_node(ws: &mut Workspace, language: Language, name: &str) -> Result<NodeId, SyncError> {
    if let Some(id) = ws.externals.get(&(language, name.to_string())) {
        return Ok(*id);
    }
    let id = ws.graph.insert_node(GraphNode {
        id: NodeId::default(),
        kind: NodeKind::ExternalModule,
        name: Some(name.to_string()),
        qualified_name: name.to_string(),
        file_path: PathBuf::new(),
        range: SourceRange::default(),
        language,
        detail: NodeDetail::External,
    })?;
    ws.externals.insert((language, name.to_string()), id);
    Ok(id)
}

/// Drop external placeholders nothing imports any more.
pub(crate) fn collect_externals(ws: &mut Workspace) -> Result<usize, SyncError> {
    let unused: Vec<((Language, String), NodeId)> = ws
        .externals
        .iter()
        .filter(|(_, id)| ws.graph.edges_to(**id).next().is_none())
        .map(|(key, id)| (key.clone(), *id))
        .collect();
    for (key, id) in &unused {
        ws.graph.remove_node(*id)?;
        ws.externals.remove(key);
    }
    Ok(unused.len())
}

/// Re-bind every import of `path`. Returns whether any binding changed.
pub(crate) fn bind_file(ws: &mut Workspace, path: &Path) -> Result<bool, SyncError> {
    let Some(file) = ws.files.get(path) else {
        return Ok(false);
    };
    let language = file.language;
    let resolutions: Vec<(NodeId, Resolution)> = (0..file.imports.len())
        .map(|idx| {
            let resolution = resolve_import(ws, file, idx, &mut BTreeSet::new());
            (file.imports[idx], resolution)
        })
        .collect();

    let mut changed = false;
    for (import, resolution) in resolutions {
        let (binding, target) = match resolution {
            Resolution::Node(id) => (ImportBinding::Resolved(id), Some(id)),
            Resolution::Unresolved(reason) => (ImportBinding::Unresolved(reason), None),
            Resolution::External(name) => {
                let placeholder = external_node(ws, language, &name)?;
                (ImportBinding::External(name), Some(placeholder))
            }
        };
        if let ImportBinding::Unresolved(reason) = &binding {
            debug!("Unresolved import in {}: {}", path.display(), reason);
        }

        changed |= ws.graph.update_node(import, |node| {
            if let NodeDetail::Import { binding: current, .. } = &mut node.detail {
                *current = binding;
            }
        })?;

        let stale: Vec<EdgeKey> = ws
            .graph
            .edges_from(import)
            .filter(|e| e.kind == EdgeKind::Imports && Some(e.target) != target)
            .map(GraphEdge::key)
            .collect();
        for key in stale {
            ws.graph.remove_edge(&key);
        }
        if let Some(target) = target {
            ws.graph
                .insert_edge(GraphEdge::structural(import, target, EdgeKind::Imports))?;
        }
    }
    Ok(changed)
}

// ---- Usage linking ----

/// Result of looking a name up in one scope.
enum Lookup {
    Found(NodeId, usize),
    /// Bound here, but to nothing in the graph (a local, an external or
    /// unresolved import). Stops the search.
    Opaque,
    Missing,
}

/// Recompute the `References` and `Inherits` edges leaving `path`'s nodes.
pub(crate) fn link_file(ws: &mut Workspace, path: &Path) -> Result<(), SyncError> {
    let Some(file) = ws.files.get(path) else {
        return Ok(());
    };
    let desired = desired_edges(ws, file);
    let owners: Vec<NodeId> = std::iter::once(file.node)
        .chain(file.symbols.iter().copied())
        .collect();
    let current: Vec<EdgeKey> = owners
        .iter()
        .flat_map(|owner| ws.graph.edges_from(*owner))
        .filter(|e| matches!(e.kind, EdgeKind::References | EdgeKind::Inherits))
        .map(GraphEdge::key)
        .collect();

    for key in current {
        if !desired.contains_key(&key) {
            ws.graph.remove_edge(&key);
        }
    }
    for edge in desired.into_values() {
        ws.graph.insert_edge(edge)?;
    }
    Ok(())
}

fn keep_strongest(edges: &mut BTreeMap<EdgeKey, GraphEdge>, edge: GraphEdge) {
    match edges.get(&edge.key()) {
        Some(existing) if existing.confidence >= edge.confidence => {}
        _ => {
            edges.insert(edge.key(), edge);
        }
    }
}

fn desired_edges(ws: &Workspace, file: &SourceFile) -> BTreeMap<EdgeKey, GraphEdge> {
    let mut edges = BTreeMap::new();

    for reference in &file.facts.references {
        let source = reference
            .owner
            .and_then(|o| file.symbols.get(o).copied())
            .unwrap_or(file.node);
        let Some((target, origin, confidence)) = resolve_reference(ws, file, reference) else {
            continue;
        };
        if target == source {
            continue;
        }
        let edge = match origin {
            EdgeSource::Structural => GraphEdge::structural(source, target, EdgeKind::References),
            EdgeSource::Dynamic => GraphEdge::dynamic(source, target, confidence),
        };
        keep_strongest(&mut edges, edge);
    }

    for (idx, symbol) in file.facts.symbols.iter().enumerate() {
        if symbol.kind != NodeKind::Class {
            continue;
        }
        for base in bases_of(ws, file, idx) {
            if base != file.symbols[idx] {
                keep_strongest(
                    &mut edges,
                    GraphEdge::structural(file.symbols[idx], base, EdgeKind::Inherits),
                );
            }
        }
    }
    edges
}

fn resolve_reference(
    ws: &Workspace,
    file: &SourceFile,
    reference: &ReferenceFact,
) -> Option<(NodeId, EdgeSource, f32)> {
    let class = reference
        .owner
        .and_then(|owner| file.facts.enclosing_class(owner))
        .and_then(|idx| file.symbols.get(idx).copied());

    match reference.kind {
        RefKind::Name => resolve_name(ws, file, reference.scope, &reference.target)
            .map(|id| (id, EdgeSource::Structural, 1.0)),
        RefKind::SelfMember => {
            let (id, inherited) = member_of_class(ws, class?, &reference.target.name)?;
            let confidence = if inherited {
                INHERITED_MEMBER_CONFIDENCE
            } else {
                SELF_MEMBER_CONFIDENCE
            };
            Some((id, EdgeSource::Dynamic, confidence))
        }
        RefKind::StringLookup => class
            .and_then(|class| member_of_class(ws, class, &reference.target.name))
            .map(|(id, _)| id)
            .or_else(|| resolve_name(ws, file, reference.scope, &reference.target))
            .map(|id| (id, EdgeSource::Dynamic, STRING_LOOKUP_CONFIDENCE)),
    }
}

/// Resolve a use of `name.path…` from `scope`: enclosing scopes innermost
/// first (definitions, then imports, then wildcard imports at each level),
/// then other files of the same Go or Java package.
pub(crate) fn resolve_name(
    ws: &Workspace,
    file: &SourceFile,
    scope: ScopeId,
    target: &NameRef,
) -> Option<NodeId> {
    // Java resolves unqualified field and method names through the class body.
    let class_bodies_visible = file.language == Language::Java;

    for (id, level) in file.facts.scopes.chain(scope) {
        if level.kind == ScopeKind::Class && id != scope && !class_bodies_visible {
            continue;
        }
        match lookup_in_scope(ws, file, level, target) {
            Lookup::Found(node, consumed) => return follow(ws, node, &target.path[consumed..]),
            Lookup::Opaque => return None,
            Lookup::Missing => {}
        }
    }

    if matches!(file.language, Language::Go | Language::Java) {
        let dir = file.path.parent()?;
        for sibling in ws.package_files(dir, file.language) {
            if sibling.path == file.path || sibling.facts.package != file.facts.package {
                continue;
            }
            if let Some(idx) = sibling.facts.top_level_symbol(&target.name) {
                return follow(ws, sibling.symbols[idx], &target.path);
            }
        }
    }
    None
}

fn lookup_in_scope(ws: &Workspace, file: &SourceFile, scope: &Scope, target: &NameRef) -> Lookup {
    match scope.definition(&target.name) {
        Some(Decl::Symbol(idx)) => return Lookup::Found(file.symbols[idx], 0),
        Some(Decl::Local) => return Lookup::Opaque,
        None => {}
    }

    // `import a.b` binds the dotted name; match the longest prefix of the use.
    let mut keys = vec![target.name.clone()];
    for segment in &target.path {
        let longer = format!("{}.{}", keys[keys.len() - 1], segment);
        keys.push(longer);
    }
    for (consumed, key) in keys.iter().enumerate().rev() {
        if let Some(imp) = scope.import(key) {
            return match import_target(ws, file, imp) {
                Some(node) => Lookup::Found(node, consumed),
                None => Lookup::Opaque,
            };
        }
    }

    for &wildcard in scope.wildcards() {
        if import_target(ws, file, wildcard).is_none() {
            continue;
        }
        let modules = first_present(ws, file.language, &file.plans[wildcard].module);
        if let Some(Resolution::Node(node)) =
            lookup_member(ws, &modules, &target.name, &mut BTreeSet::new())
        {
            return Lookup::Found(node, 0);
        }
    }
    Lookup::Missing
}

/// Bound target of an import, unless it is external or unresolved.
fn import_target(ws: &Workspace, file: &SourceFile, imp: usize) -> Option<NodeId> {
    let id = *file.imports.get(imp)?;
    let target = ws.graph.node(id)?.binding()?.target()?;
    ws.graph.contains(target).then_some(target)
}

/// Walk `path` from `start` through module members and class members.
/// Stops at the deepest symbol reached; a missing module member fails.
fn follow(ws: &Workspace, start: NodeId, path: &[String]) -> Option<NodeId> {
    let mut current = start;
    for segment in path {
        let node = ws.graph.node(current)?;
        match node.kind {
            NodeKind::File => {
                let file = ws.files.get(&node.file_path)?;
                let files = match (file.language, file.path.parent()) {
                    (Language::Go | Language::Java, Some(dir)) => ws.package_files(dir, file.language),
                    _ => vec![file],
                };
                match lookup_member(ws, &files, segment, &mut BTreeSet::new()) {
                    Some(Resolution::Node(next)) => current = next,
                    _ => return None,
                }
            }
            NodeKind::Class => {
                let member = ws
                    .locate(current)
                    .and_then(|(file, idx)| file.facts.member(idx, segment).map(|m| file.symbols[m]));
                match member {
                    Some(next) => current = next,
                    None => break,
                }
            }
            _ => break,
        }
    }
    let kind = ws.graph.node(current)?.kind;
    kind.is_symbol().then_some(current)
}

/// Classes named as bases of class `idx` in `file`.
fn bases_of(ws: &Workspace, file: &SourceFile, idx: usize) -> Vec<NodeId> {
    let symbol = &file.facts.symbols[idx];
    symbol
        .bases
        .iter()
        .filter_map(|base| resolve_name(ws, file, symbol.scope, base))
        .filter(|id| ws.graph.node(*id).is_some_and(|n| n.kind == NodeKind::Class))
        .collect()
}

/// Member `name` of `class` or, breadth first, of its bases. The flag is
/// set when the member was found on a base.
fn member_of_class(ws: &Workspace, class: NodeId, name: &str) -> Option<(NodeId, bool)> {
    let mut queue = VecDeque::from([(class, false)]);
    let mut seen = BTreeSet::new();
    while let Some((current, inherited)) = queue.pop_front() {
        if !seen.insert(current) {
            continue;
        }
        let Some((file, idx)) = ws.locate(current) else {
            continue;
        };
        if let Some(member) = file.facts.member(idx, name) {
            return Some((file.symbols[member], inherited));
        }
        queue.extend(bases_of(ws, file, idx).into_iter().map(|base| (base, true)));
    }
    None
}
