//! Core data structures for the code graph

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Unique, stable identifier for a node.
///
/// Ids are handed out by [`crate::Graph`] from a monotonic counter and are
/// never reused, even after the node they named has been removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Discriminates what kind of code entity a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    // ── Structural ──────────────────────────────────────────
    File,

    // ── Code entities (tree-sitter extracted) ───────────────
    Function,
    Class,
    Variable,
    Import,

    // ── Resolution placeholders ─────────────────────────────
    ExternalModule,
}

impl NodeKind {
    /// Function, class or variable definitions.
    pub fn is_symbol(self) -> bool {
        matches!(self, NodeKind::Function | NodeKind::Class | NodeKind::Variable)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Function => "function",
            NodeKind::Class => "class",
            NodeKind::Variable => "variable",
            NodeKind::Import => "import",
            NodeKind::ExternalModule => "external",
        }
    }
}

/// Supported languages for syntax-aware parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Go,
    Rust,
    Java,
    Other,
}

impl Language {
    pub const SUPPORTED: [Language; 6] = [
        Language::Python,
        Language::JavaScript,
        Language::TypeScript,
        Language::Go,
        Language::Rust,
        Language::Java,
    ];

    /// Detect language from file extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("py") | Some("pyi") => Language::Python,
            Some("js") | Some("jsx") | Some("mjs") | Some("cjs") => Language::JavaScript,
            Some("ts") | Some("tsx") | Some("mts") | Some("cts") => Language::TypeScript,
            Some("go") => Language::Go,
            Some("rs") => Language::Rust,
            Some("java") => Language::Java,
            _ => Language::Other,
        }
    }

    pub fn is_supported(self) -> bool {
        self != Language::Other
    }

    pub fn name(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Go => "go",
            Language::Rust => "rust",
            Language::Java => "java",
            Language::Other => "other",
        }
    }
}

/// A row/column position, zero based, column counted in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Point {
    pub row: usize,
    pub column: usize,
}

impl Point {
    pub fn new(row: usize, column: usize) -> Self {
        Point { row, column }
    }
}

/// Half-open byte range `[start, end)` into a file's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct ByteRange {
    pub start: usize,
    pub end: usize,
}

impl ByteRange {
    pub fn new(start: usize, end: usize) -> Self {
        ByteRange { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }
}

/// Location of a node in its owning file, in both byte and point form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct SourceRange {
    pub start_byte: usize,
    pub end_byte: usize,
    pub start: Point,
    pub end: Point,
}

impl SourceRange {
    pub fn bytes(&self) -> ByteRange {
        ByteRange::new(self.start_byte, self.end_byte)
    }
}

/// What kind of relationship this edge represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EdgeKind {
    /// File → symbol it defines.
    Defines,
    /// Symbol (or File, for module-level code) → symbol it uses.
    References,
    /// File → Import, and Import → bound target.
    Imports,
    /// Class → base class.
    Inherits,
    /// Parent symbol → nested symbol.
    Contains,
}

/// How this edge was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EdgeSource {
    /// Determined by syntax and name resolution. Always 1.0 confidence.
    Structural,
    /// Inferred from a dynamic access pattern (`self.x`, `getattr(o, "x")`).
    Dynamic,
}

/// A directed edge in the code graph. Keyed by `(source, target, kind)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub kind: EdgeKind,
    pub edge_source: EdgeSource,
    /// 1.0 for Structural, below 1.0 for Dynamic.
    pub confidence: f32,
}

impl GraphEdge {
    pub fn structural(source: NodeId, target: NodeId, kind: EdgeKind) -> Self {
        GraphEdge {
            source,
            target,
            kind,
            edge_source: EdgeSource::Structural,
            confidence: 1.0,
        }
    }

    pub fn dynamic(source: NodeId, target: NodeId, confidence: f32) -> Self {
        GraphEdge {
            source,
            target,
            kind: EdgeKind::References,
            edge_source: EdgeSource::Dynamic,
            confidence,
        }
    }

    pub fn key(&self) -> crate::diff::EdgeKey {
        crate::diff::EdgeKey {
            source: self.source,
            target: self.target,
            kind: self.kind,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        self.edge_source == EdgeSource::Dynamic
    }
}

/// Binding state of an `Import` node. Exactly one per import.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportBinding {
    Resolved(NodeId),
    Unresolved(String),
    External(String),
}

impl ImportBinding {
    pub fn target(&self) -> Option<NodeId> {
        match self {
            ImportBinding::Resolved(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, ImportBinding::Resolved(_))
    }
}

/// Kind-specific payload of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeDetail {
    File {
        /// Symbols defined by the file, in declaration order.
        symbols: Vec<NodeId>,
        imports: Vec<NodeId>,
        /// Byte ranges the parser could not make sense of.
        error_ranges: Vec<ByteRange>,
    },
    Symbol {
        parent: Option<NodeId>,
        exported: bool,
    },
    Import {
        /// Module specifier as written (`a.b`, `./util`, `crate::x`).
        module: String,
        /// Imported member, if the statement names one.
        member: Option<String>,
        alias: Option<String>,
        wildcard: bool,
        binding: ImportBinding,
    },
    External,
}

/// A single node in the code graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphNode {
    pub id: NodeId,
    pub kind: NodeKind,
    /// `None` for anonymous constructs.
    pub name: Option<String>,
    /// Dotted path inside the owning file (`Outer.method`).
    pub qualified_name: String,
    /// Project-relative path; empty for external modules.
    pub file_path: PathBuf,
    pub range: SourceRange,
    pub language: Language,
    pub detail: NodeDetail,
}

impl GraphNode {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    pub fn binding(&self) -> Option<&ImportBinding> {
        match &self.detail {
            NodeDetail::Import { binding, .. } => Some(binding),
            _ => None,
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        match &self.detail {
            NodeDetail::Symbol { parent, .. } => *parent,
            _ => None,
        }
    }

    pub fn is_exported(&self) -> bool {
        matches!(self.detail, NodeDetail::Symbol { exported: true, .. })
    }

    /// Order-independent identity used when comparing two builds of the same project.
    pub fn stable_key(&self) -> String {
        match self.kind {
            NodeKind::ExternalModule => {
                format!("external:{}:{}", self.language.name(), self.name())
            }
            NodeKind::File => format!("file:{}", display_path(&self.file_path)),
            kind => format!(
                "{}:{}:{}@{}",
                kind.as_str(),
                display_path(&self.file_path),
                self.qualified_name,
                self.range.start_byte
            ),
        }
    }
}

/// Forward-slash rendering of a project path.
pub fn display_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Lexically normalize a relative path: drops `.` segments and folds `..`.
///
/// Returns `None` when `..` would climb above the root.
pub fn normalize_path(path: &Path) -> Option<PathBuf> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::Normal(part) => parts.push(part),
            Component::RootDir | Component::Prefix(_) => {}
        }
    }
    Some(parts.into_iter().collect())
}
