//! Read-only queries over one committed workspace
//!
//! A [`Snapshot`] pins the workspace it was taken from: results stay valid
//! (and mutually consistent) until the caller drops it, whatever commits in
//! the meantime.

use crate::workspace::{SourceFile, Workspace};
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use grove_core::{
    EdgeKind, EdgeSource, GraphEdge, GraphNode, ImportBinding, Language, NodeDetail, NodeId,
    NodeKind,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Restricts `find_by_name` results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchScope {
    /// Symbols of one file.
    File(PathBuf),
    /// Symbols of files under a directory (recursively).
    Directory(PathBuf),
    Language(Language),
    /// Direct members of a class.
    Within(NodeId),
}

/// One `References` edge into a symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Usage {
    /// Using symbol, or the File node for module-level code.
    pub user: NodeId,
    pub source: EdgeSource,
    pub confidence: f32,
}

impl Usage {
    pub fn is_dynamic(&self) -> bool {
        self.source == EdgeSource::Dynamic
    }
}

/// A node reached by a bounded traversal, with its distance from the start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Reached {
    pub depth: usize,
    pub id: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportInfo {
    pub id: NodeId,
    pub module: String,
    pub member: Option<String>,
    pub alias: Option<String>,
    pub wildcard: bool,
    pub binding: ImportBinding,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: NodeId,
    pub kind: NodeKind,
    pub qualified_name: String,
    pub path: PathBuf,
    pub score: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub files: usize,
    pub functions: usize,
    pub classes: usize,
    pub variables: usize,
    pub imports: usize,
    pub unresolved_imports: usize,
    pub external_modules: usize,
    pub edges: usize,
    pub dynamic_edges: usize,
    pub files_with_errors: usize,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    workspace: Arc<Workspace>,
    default_depth: usize,
}

impl Snapshot {
    pub(crate) fn new(workspace: Arc<Workspace>, default_depth: usize) -> Self {
        Snapshot {
            workspace,
            default_depth,
        }
    }

    /// Number of transactions committed before this snapshot was taken.
    pub fn sequence(&self) -> u64 {
        self.workspace.sequence()
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Any node by id.
    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.workspace.graph().node(id)
    }

    /// The `File` node for a project path.
    pub fn get_file(&self, path: impl AsRef<Path>) -> Option<&GraphNode> {
        let id = self.workspace.graph().file_node(path.as_ref())?;
        self.node(id)
    }

    /// Content, tree and facts of a file.
    pub fn source(&self, path: impl AsRef<Path>) -> Option<&SourceFile> {
        self.workspace.file(path.as_ref())
    }

    /// A function, class or variable node.
    pub fn get_symbol(&self, id: NodeId) -> Option<&GraphNode> {
        self.node(id).filter(|n| n.kind.is_symbol())
    }

    /// Symbols with this simple name, in id order.
    pub fn find_by_name(&self, name: &str, scope: Option<&SearchScope>) -> Vec<&GraphNode> {
        self.workspace
            .graph()
            .find_by_name(name)
            .into_iter()
            .filter_map(|id| self.get_symbol(id))
            .filter(|node| match scope {
                None => true,
                Some(SearchScope::File(path)) => node.file_path == *path,
                Some(SearchScope::Directory(dir)) => node.file_path.starts_with(dir),
                Some(SearchScope::Language(language)) => node.language == *language,
                Some(SearchScope::Within(parent)) => node.parent() == Some(*parent),
            })
            .collect()
    }

    /// Every `References` edge targeting `id`, ordered by user.
    pub fn usages_of(&self, id: NodeId) -> Vec<Usage> {
        let mut usages: Vec<Usage> = self
            .workspace
            .graph()
            .edges_to(id)
            .filter(|e| e.kind == EdgeKind::References)
            .map(|e| Usage {
                user: e.source,
                source: e.edge_source,
                confidence: e.confidence,
            })
            .collect();
        usages.sort_by_key(|u| u.user);
        usages
    }

    /// Nodes `id` transitively depends on through `Imports` and `References`
    /// edges, at most `depth` hops away (configured default when `None`).
    pub fn dependencies_of(&self, id: NodeId, depth: Option<usize>) -> Vec<Reached> {
        self.traverse(id, depth.unwrap_or(self.default_depth), |graph, node| {
            graph
                .edges_from(node)
                .filter(|e| depends(e))
                .map(|e| e.target)
                .collect()
        })
    }

    /// Nodes that transitively depend on `id`: the reverse of
    /// [`Snapshot::dependencies_of`].
    pub fn blast_radius(&self, id: NodeId, depth: Option<usize>) -> Vec<Reached> {
        self.traverse(id, depth.unwrap_or(self.default_depth), |graph, node| {
            graph
                .edges_to(node)
                .filter(|e| depends(e))
                .map(|e| e.source)
                .collect()
        })
    }

    fn traverse(
        &self,
        start: NodeId,
        max_depth: usize,
        next: impl Fn(&grove_core::Graph, NodeId) -> Vec<NodeId>,
    ) -> Vec<Reached> {
        let graph = self.workspace.graph();
        if !graph.contains(start) {
            return Vec::new();
        }
        let mut seen = BTreeSet::from([start]);
        let mut queue = VecDeque::from([(start, 0usize)]);
        let mut reached = Vec::new();
        while let Some((node, depth)) = queue.pop_front() {
            if depth == max_depth {
                continue;
            }
            for neighbour in next(graph, node) {
                if seen.insert(neighbour) {
                    reached.push(Reached {
                        depth: depth + 1,
                        id: neighbour,
                    });
                    queue.push_back((neighbour, depth + 1));
                }
            }
        }
        reached.sort();
        reached
    }

    /// True when nothing references the symbol and it is not exported.
    /// `None` for ids that are not symbols.
    pub fn is_dead(&self, id: NodeId) -> Option<bool> {
        let node = self.get_symbol(id)?;
        Some(!node.is_exported() && self.usages_of(id).is_empty())
    }

    /// Imports of a file in source order.
    pub fn imports_of(&self, path: impl AsRef<Path>) -> Vec<ImportInfo> {
        let Some(file) = self.workspace.file(path.as_ref()) else {
            return Vec::new();
        };
        file.imports()
            .iter()
            .filter_map(|id| self.import_info(*id))
            .collect()
    }

    pub fn import_binding(&self, id: NodeId) -> Option<&ImportBinding> {
        self.node(id)?.binding()
    }

    fn import_info(&self, id: NodeId) -> Option<ImportInfo> {
        match &self.node(id)?.detail {
            NodeDetail::Import {
                module,
                member,
                alias,
                wildcard,
                binding,
            } => Some(ImportInfo {
                id,
                module: module.clone(),
                member: member.clone(),
                alias: alias.clone(),
                wildcard: *wildcard,
                binding: binding.clone(),
            }),
            _ => None,
        }
    }

    /// Every import cycle between files, each listed once, rotated to start
    /// at its smallest path.
    pub fn import_cycles(&self) -> Vec<Vec<PathBuf>> {
        let edges = self.file_imports();
        let mut cycles = BTreeSet::new();
        for &start in edges.keys() {
            let mut path = vec![start];
            find_cycles(start, start, &edges, &mut path, &mut cycles);
        }
        cycles.into_iter().collect()
    }

    /// File-level import graph: importer to the files its resolved imports
    /// land in.
    fn file_imports(&self) -> BTreeMap<&Path, BTreeSet<&Path>> {
        let graph = self.workspace.graph();
        let mut edges: BTreeMap<&Path, BTreeSet<&Path>> = BTreeMap::new();
        for file in self.workspace.files() {
            let targets = edges.entry(file.path()).or_default();
            for import in file.imports() {
                let target = graph
                    .node(*import)
                    .and_then(GraphNode::binding)
                    .and_then(ImportBinding::target)
                    .and_then(|id| self.workspace.owning_file(id));
                if let Some(target) = target {
                    targets.insert(target.path());
                }
            }
        }
        edges
    }

    /// Fuzzy symbol search over qualified names, best match first.
    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        let matcher = SkimMatcherV2::default();
        let mut hits: Vec<SearchHit> = self
            .workspace
            .graph()
            .all_nodes()
            .filter(|n| n.kind.is_symbol())
            .filter_map(|n| {
                let score = matcher.fuzzy_match(&n.qualified_name, query)?;
                Some(SearchHit {
                    id: n.id,
                    kind: n.kind,
                    qualified_name: n.qualified_name.clone(),
                    path: n.file_path.clone(),
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.cmp(&a.score).then(a.id.cmp(&b.id)));
        hits.truncate(limit);
        hits
    }

    pub fn stats(&self) -> GraphStats {
        let graph = self.workspace.graph();
        let mut stats = GraphStats::default();
        for node in graph.all_nodes() {
            match node.kind {
                NodeKind::File => stats.files += 1,
                NodeKind::Function => stats.functions += 1,
                NodeKind::Class => stats.classes += 1,
                NodeKind::Variable => stats.variables += 1,
                NodeKind::Import => {
                    stats.imports += 1;
                    if matches!(node.binding(), Some(ImportBinding::Unresolved(_))) {
                        stats.unresolved_imports += 1;
                    }
                }
                NodeKind::ExternalModule => stats.external_modules += 1,
            }
        }
        stats.edges = graph.edge_count();
        stats.dynamic_edges = graph.all_edges().filter(|e| e.is_dynamic()).count();
        stats.files_with_errors = self.workspace.files().filter(|f| f.has_errors()).count();
        stats
    }

    /// `(edge kind, source key, target key)` for every edge, keyed by
    /// content rather than id so two builds of one project compare equal.
    pub fn edge_triples(&self) -> BTreeSet<(EdgeKind, String, String)> {
        let graph = self.workspace.graph();
        graph
            .all_edges()
            .filter_map(|e| {
                let source = graph.node(e.source)?.stable_key();
                let target = graph.node(e.target)?.stable_key();
                Some((e.kind, source, target))
            })
            .collect()
    }
}

fn depends(edge: &GraphEdge) -> bool {
    matches!(edge.kind, EdgeKind::Imports | EdgeKind::References)
}

/// Simple cycles through `start` whose other members all sort after it,
/// so every cycle is found exactly once, from its smallest file. Only the
/// active path is excluded from the walk.
fn find_cycles<'a>(
    start: &'a Path,
    node: &'a Path,
    edges: &BTreeMap<&'a Path, BTreeSet<&'a Path>>,
    path: &mut Vec<&'a Path>,
    cycles: &mut BTreeSet<Vec<PathBuf>>,
) {
    for &next in edges.get(node).into_iter().flatten() {
        if next == start {
            cycles.insert(path.iter().map(|p| p.to_path_buf()).collect());
        } else if next > start && !path.contains(&next) {
            path.push(next);
            find_cycles(start, next, edges, path, cycles);
            path.pop();
        }
    }
}
