//! Language extractor trait and the per-file facts it produces
//!
//! Extractors walk a CST and report what the file declares (symbols,
//! imports, scopes) and which names it uses. They never look at other files;
//! binding names to graph nodes is the resolver's job.

use crate::cst::{Cst, source_range};
use crate::scope::{Decl, ScopeId, ScopeKind, ScopeTree};
use grove_core::{ByteRange, Language, NodeKind, SourceRange};
use serde::Serialize;
use std::collections::BTreeSet;
use std::hash::{DefaultHasher, Hash, Hasher};
use tree_sitter::Node;

/// A possibly dotted name as written at a use site: `a.b.c` is
/// `name = "a"`, `path = ["b", "c"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NameRef {
    pub name: String,
    pub path: Vec<String>,
    pub range: ByteRange,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolFact {
    pub kind: NodeKind,
    pub name: String,
    /// Dotted path through enclosing symbols (`Outer.method`).
    pub qualified_name: String,
    pub range: SourceRange,
    pub name_range: ByteRange,
    /// Enclosing symbol, by index.
    pub parent: Option<usize>,
    /// Scope the symbol is declared in.
    pub scope: ScopeId,
    pub exported: bool,
    /// Hash of the full definition text.
    pub body_hash: u64,
    /// Hash of the definition text with the name cut out.
    pub shape_hash: u64,
    /// Base classes / implemented interfaces as written.
    pub bases: Vec<NameRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportFact {
    /// Module specifier as written, quotes stripped.
    pub module: String,
    pub member: Option<String>,
    pub alias: Option<String>,
    /// Name bound in the importing scope. `None` for wildcard and
    /// side-effect imports.
    pub local: Option<String>,
    pub wildcard: bool,
    /// `export ... from` style imports that also extend this file's exports.
    pub reexport: bool,
    pub range: SourceRange,
    /// Where the specifier text sits, for rewriting on rename.
    pub module_range: ByteRange,
    pub scope: ScopeId,
}

impl ImportFact {
    pub fn new(module: impl Into<String>, range: SourceRange, module_range: ByteRange) -> Self {
        ImportFact {
            module: module.into(),
            member: None,
            alias: None,
            local: None,
            wildcard: false,
            reexport: false,
            range,
            module_range,
            scope: ScopeTree::ROOT,
        }
    }

    pub fn member(mut self, member: impl Into<String>) -> Self {
        self.member = Some(member.into());
        self
    }

    pub fn alias(mut self, alias: Option<String>) -> Self {
        self.alias = alias;
        self
    }

    pub fn local(mut self, local: impl Into<String>) -> Self {
        self.local = Some(local.into());
        self
    }

    pub fn wildcard(mut self) -> Self {
        self.wildcard = true;
        self.local = None;
        self
    }

    pub fn reexport(mut self) -> Self {
        self.reexport = true;
        self
    }

    /// Name shown on the import node.
    pub fn display_name(&self) -> String {
        if let Some(local) = &self.local {
            return local.clone();
        }
        match (&self.member, self.wildcard) {
            (_, true) => format!("{}.*", self.module),
            (Some(member), false) => member.clone(),
            (None, false) => self.module.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RefKind {
    /// Ordinary lexical name use.
    Name,
    /// `self.x` / `this.x`: member of the enclosing class.
    SelfMember,
    /// `getattr(obj, "x")` and friends.
    StringLookup,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceFact {
    pub target: NameRef,
    pub kind: RefKind,
    pub scope: ScopeId,
    /// Innermost enclosing symbol; `None` means module-level code.
    pub owner: Option<usize>,
}

/// Everything one file declares and uses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileFacts {
    pub language: Language,
    /// Symbols in declaration (pre-)order; parents precede children.
    pub symbols: Vec<SymbolFact>,
    pub imports: Vec<ImportFact>,
    pub references: Vec<ReferenceFact>,
    pub scopes: ScopeTree,
    /// Names listed in an explicit export list (`__all__`, `export { .. }`).
    pub exports: Vec<String>,
    pub default_export: Option<String>,
    /// Declared package (Go `package`, Java `package`).
    pub package: Option<String>,
    pub error_ranges: Vec<ByteRange>,
}

impl FileFacts {
    fn empty(language: Language, len: usize) -> Self {
        FileFacts {
            language,
            symbols: Vec::new(),
            imports: Vec::new(),
            references: Vec::new(),
            scopes: ScopeTree::new(ByteRange::new(0, len)),
            exports: Vec::new(),
            default_export: None,
            package: None,
            error_ranges: Vec::new(),
        }
    }

    /// Symbols declared directly in the module scope.
    pub fn top_level(&self) -> impl Iterator<Item = (usize, &SymbolFact)> {
        self.symbols
            .iter()
            .enumerate()
            .filter(|(_, s)| s.parent.is_none() && s.scope == ScopeTree::ROOT)
    }

    /// The module-level meaning of `name`, last declaration winning.
    pub fn top_level_symbol(&self, name: &str) -> Option<usize> {
        match self.scopes.root().definition(name) {
            Some(Decl::Symbol(idx)) => Some(idx),
            _ => None,
        }
    }

    /// Names visible to importers: top-level symbols and module-scope imports.
    pub fn surface(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = self.top_level().map(|(_, s)| s.name.clone()).collect();
        names.extend(
            self.imports
                .iter()
                .filter(|i| i.scope == ScopeTree::ROOT)
                .filter_map(|i| i.local.clone()),
        );
        names.extend(self.default_export.iter().map(|d| format!("default={d}")));
        names
    }

    /// Direct member of a class-like symbol.
    pub fn member(&self, parent: usize, name: &str) -> Option<usize> {
        self.symbols
            .iter()
            .enumerate()
            .rev()
            .find(|(_, s)| s.parent == Some(parent) && s.name == name)
            .map(|(i, _)| i)
    }

    /// Innermost class symbol enclosing (or equal to) `symbol`.
    pub fn enclosing_class(&self, symbol: usize) -> Option<usize> {
        let mut current = Some(symbol);
        while let Some(idx) = current {
            let fact = self.symbols.get(idx)?;
            if fact.kind == NodeKind::Class {
                return Some(idx);
            }
            current = fact.parent;
        }
        None
    }
}

pub trait LanguageExtractor: Send + Sync {
    fn language(&self) -> Language;

    /// Visit one CST node. Implementations match on the node kind and fall
    /// back to `builder.visit_children` for anything uninteresting.
    fn visit(&self, node: Node<'_>, builder: &mut FactsBuilder<'_>);

    /// Post-pass over the finished facts (export lists, default exports).
    fn finish(&self, _facts: &mut FileFacts) {}
}

/// Extract facts from a parsed file. Parse errors only shrink what is found.
pub fn extract(cst: &Cst) -> FileFacts {
    let text = cst.text();
    let Some(extractor) = crate::languages::get_extractor(cst.language()) else {
        return FileFacts::empty(cst.language(), text.len());
    };

    let mut builder = FactsBuilder::new(text, cst.language());
    extractor.visit(cst.root(), &mut builder);
    let mut facts = builder.finish();
    facts.error_ranges = cst.error_ranges();
    extractor.finish(&mut facts);
    if !facts.exports.is_empty() {
        let exported: BTreeSet<String> = facts.exports.iter().cloned().collect();
        for symbol in facts.symbols.iter_mut() {
            if symbol.parent.is_none() && exported.contains(&symbol.name) {
                symbol.exported = true;
            }
        }
    }
    facts
}

/// Mutable state threaded through an extractor's walk.
pub struct FactsBuilder<'s> {
    src: &'s str,
    facts: FileFacts,
    scope: ScopeId,
    owner: Option<usize>,
    /// Receiver names that mean "the enclosing instance".
    self_names: Vec<String>,
}

impl<'s> FactsBuilder<'s> {
    pub fn new(src: &'s str, language: Language) -> Self {
        let self_names = match language {
            Language::Python => vec!["self".to_string(), "cls".to_string()],
            Language::JavaScript | Language::TypeScript | Language::Java => vec!["this".to_string()],
            Language::Rust => vec!["self".to_string()],
            Language::Go | Language::Other => Vec::new(),
        };
        FactsBuilder {
            src,
            facts: FileFacts::empty(language, src.len()),
            scope: ScopeTree::ROOT,
            owner: None,
            self_names,
        }
    }

    pub fn finish(self) -> FileFacts {
        self.facts
    }

    pub fn language(&self) -> Language {
        self.facts.language
    }

    pub fn src(&self) -> &'s str {
        self.src
    }

    pub fn symbol_count(&self) -> usize {
        self.facts.symbols.len()
    }

    /// Whether `name` denotes the enclosing instance here (`self`, `this`,
    /// a Go receiver) and a class is in scope to resolve members against.
    pub fn is_self(&self, name: &str) -> bool {
        self.enclosing_class().is_some() && self.self_names.iter().any(|s| s == name)
    }

    /// Treat `name` as a receiver alias while running `f` (Go methods).
    pub fn with_self_name(&mut self, name: &str, f: impl FnOnce(&mut Self)) {
        self.self_names.push(name.to_string());
        f(self);
        self.self_names.pop();
    }

    pub fn text(&self, node: Node<'_>) -> &'s str {
        self.src.get(node.byte_range()).unwrap_or("")
    }

    pub fn visit_children(&mut self, node: Node<'_>, extractor: &dyn LanguageExtractor) {
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
        for child in children {
            extractor.visit(child, self);
        }
    }

    /// Visit a child field if present.
    pub fn visit_field(&mut self, node: Node<'_>, field: &str, extractor: &dyn LanguageExtractor) {
        if let Some(child) = node.child_by_field_name(field) {
            extractor.visit(child, self);
        }
    }

    pub fn scope_kind(&self) -> ScopeKind {
        self.facts.scopes.get(self.scope).kind
    }

    pub fn at_module_root(&self) -> bool {
        self.scope == ScopeTree::ROOT
    }

    /// Inside a function body: assignments create locals, not symbols.
    pub fn in_function(&self) -> bool {
        self.scope_kind() == ScopeKind::Function
    }

    pub fn owner(&self) -> Option<usize> {
        self.owner
    }

    pub fn enclosing_class(&self) -> Option<usize> {
        self.owner.and_then(|o| self.facts.enclosing_class(o))
    }

    pub fn symbol(&self, idx: usize) -> &SymbolFact {
        &self.facts.symbols[idx]
    }

    /// Whether `name` is already declared as a symbol in the current scope.
    pub fn declared_here(&self, name: &str) -> bool {
        matches!(
            self.facts.scopes.get(self.scope).definition(name),
            Some(Decl::Symbol(_))
        )
    }

    /// Top-level symbol by name, for post-hoc fixups like `impl` blocks.
    pub fn top_level_symbol(&self, name: &str) -> Option<usize> {
        self.facts.top_level_symbol(name)
    }

    /// Record a definition whose name is the text of `name_node`.
    pub fn define(
        &mut self,
        kind: NodeKind,
        name_node: Node<'_>,
        def_node: Node<'_>,
        exported: bool,
    ) -> usize {
        let name = self.text(name_node).to_string();
        let name_range = ByteRange::new(name_node.start_byte(), name_node.end_byte());
        self.define_named(kind, &name, name_range, def_node, exported)
    }

    pub fn define_named(
        &mut self,
        kind: NodeKind,
        name: &str,
        name_range: ByteRange,
        def_node: Node<'_>,
        exported: bool,
    ) -> usize {
        let parent = self.owner;
        let qualified_name = match parent {
            Some(p) => format!("{}.{}", self.facts.symbols[p].qualified_name, name),
            None => name.to_string(),
        };
        let body = self.text(def_node);
        let start = def_node.start_byte();
        let body_hash = hash_of(&(kind, body));
        let shape_hash = {
            let cut_start = name_range.start.saturating_sub(start).min(body.len());
            let cut_end = name_range.end.saturating_sub(start).min(body.len());
            let head = body.get(..cut_start).unwrap_or("");
            let tail = body.get(cut_end..).unwrap_or("");
            hash_of(&(kind, head, tail))
        };

        let idx = self.facts.symbols.len();
        self.facts.symbols.push(SymbolFact {
            kind,
            name: name.to_string(),
            qualified_name,
            range: source_range(def_node),
            name_range,
            parent,
            scope: self.scope,
            exported,
            body_hash,
            shape_hash,
            bases: Vec::new(),
        });
        self.facts.scopes.define(self.scope, name, Decl::Symbol(idx));
        idx
    }

    /// Run `f` inside the body of `symbol`, in a fresh scope of `kind`.
    pub fn in_symbol(
        &mut self,
        symbol: usize,
        kind: ScopeKind,
        node: Node<'_>,
        f: impl FnOnce(&mut Self),
    ) {
        let range = ByteRange::new(node.start_byte(), node.end_byte());
        let scope = self.facts.scopes.push(kind, self.scope, range, Some(symbol));
        let (saved_scope, saved_owner) = (self.scope, self.owner);
        self.scope = scope;
        self.owner = Some(symbol);
        f(self);
        self.scope = saved_scope;
        self.owner = saved_owner;
    }

    /// Run `f` in a scope without an owning symbol (lambdas, closures,
    /// `impl` blocks for types declared elsewhere).
    pub fn in_anonymous(&mut self, kind: ScopeKind, node: Node<'_>, f: impl FnOnce(&mut Self)) {
        let range = ByteRange::new(node.start_byte(), node.end_byte());
        let scope = self.facts.scopes.push(kind, self.scope, range, None);
        let saved = self.scope;
        self.scope = scope;
        f(self);
        self.scope = saved;
    }

    /// Attribute uses in `f` to `symbol` without opening a scope
    /// (initializers of module-level variables).
    pub fn with_owner(&mut self, symbol: usize, f: impl FnOnce(&mut Self)) {
        let saved = self.owner;
        self.owner = Some(symbol);
        f(self);
        self.owner = saved;
    }

    pub fn bind_local(&mut self, name: &str) {
        if !name.is_empty() {
            self.facts.scopes.define(self.scope, name, Decl::Local);
        }
    }

    /// Bind every identifier inside a (possibly destructuring) pattern.
    pub fn bind_pattern(&mut self, node: Node<'_>, identifier_kinds: &[&str]) {
        for name_node in pattern_names(node, identifier_kinds) {
            let name = self.text(name_node);
            self.bind_local(name);
        }
    }

    /// Use of a plain identifier.
    pub fn reference(&mut self, node: Node<'_>) {
        let name = self.text(node).to_string();
        self.reference_path(name, Vec::new(), ByteRange::new(node.start_byte(), node.end_byte()));
    }

    pub fn reference_path(&mut self, name: String, path: Vec<String>, range: ByteRange) {
        if name.is_empty() {
            return;
        }
        self.push_reference(NameRef { name, path, range }, RefKind::Name);
    }

    /// `self.member` inside a class body.
    pub fn self_member(&mut self, member: &str, range: ByteRange) {
        self.push_reference(
            NameRef {
                name: member.to_string(),
                path: Vec::new(),
                range,
            },
            RefKind::SelfMember,
        );
    }

    /// Attribute looked up through a string literal.
    pub fn string_lookup(&mut self, name: &str, range: ByteRange) {
        if name.is_empty() || !name.chars().all(|c| c == '_' || c.is_alphanumeric()) {
            return;
        }
        self.push_reference(
            NameRef {
                name: name.to_string(),
                path: Vec::new(),
                range,
            },
            RefKind::StringLookup,
        );
    }

    fn push_reference(&mut self, target: NameRef, kind: RefKind) {
        self.facts.references.push(ReferenceFact {
            target,
            kind,
            scope: self.scope,
            owner: self.owner,
        });
    }

    /// Record an import in the current scope and bind its local name.
    pub fn import(&mut self, mut fact: ImportFact) {
        fact.scope = self.scope;
        let idx = self.facts.imports.len();
        if fact.wildcard {
            self.facts.scopes.bind_wildcard(self.scope, idx);
        } else if let Some(local) = &fact.local {
            self.facts.scopes.bind_import(self.scope, local, idx);
        }
        self.facts.imports.push(fact);
    }

    pub fn add_base(&mut self, symbol: usize, base: NameRef) {
        if let Some(fact) = self.facts.symbols.get_mut(symbol) {
            if !base.name.is_empty() {
                fact.bases.push(base);
            }
        }
    }

    pub fn mark_exported(&mut self, name: &str) {
        if !self.facts.exports.iter().any(|e| e == name) {
            self.facts.exports.push(name.to_string());
        }
    }

    pub fn set_default_export(&mut self, name: &str) {
        self.facts.default_export = Some(name.to_string());
        self.mark_exported(name);
    }

    pub fn set_package(&mut self, package: &str) {
        self.facts.package = Some(package.to_string());
    }
}

/// Identifier nodes bound by a (possibly destructuring) pattern. Default
/// values and type annotations inside the pattern are skipped.
pub fn pattern_names<'t>(node: Node<'t>, identifier_kinds: &[&str]) -> Vec<Node<'t>> {
    if identifier_kinds.contains(&node.kind()) {
        return vec![node];
    }
    let skipped: Vec<usize> = ["right", "type", "default"]
        .iter()
        .chain(if node.kind() == "pair_pattern" { None } else { Some(&"value") })
        .filter_map(|field| node.child_by_field_name(field))
        .map(|n| n.id())
        .collect();
    let mut names = Vec::new();
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if !skipped.contains(&child.id()) {
            names.extend(pattern_names(child, identifier_kinds));
        }
    }
    names
}

fn hash_of<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Unquote a string literal's source text (`'x'`, `"x"`, `` `x` ``).
pub fn unquote(text: &str) -> &str {
    let trimmed = text.trim();
    for quote in ['"', '\'', '`'] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|t| t.strip_suffix(quote))
        {
            return inner;
        }
    }
    trimmed
}

/// Split a member chain such as `a.b.c` into a [`NameRef`].
///
/// `object_field`/`property_field` name the fields of the language's member
/// node kind; returns `None` when the chain does not start at an identifier.
pub fn member_chain(
    node: Node<'_>,
    src: &str,
    member_kinds: &[&str],
    object_field: &str,
    property_field: &str,
    identifier_kinds: &[&str],
) -> Option<NameRef> {
    let mut path = Vec::new();
    let mut current = node;
    loop {
        if member_kinds.contains(&current.kind()) {
            let property = current.child_by_field_name(property_field)?;
            path.push(src.get(property.byte_range())?.to_string());
            current = current.child_by_field_name(object_field)?;
        } else if identifier_kinds.contains(&current.kind()) {
            path.reverse();
            return Some(NameRef {
                name: src.get(current.byte_range())?.to_string(),
                path,
                range: ByteRange::new(node.start_byte(), node.end_byte()),
            });
        } else {
            return None;
        }
    }
}

/// Innermost non-member object of a member chain, e.g. the call in `f().x.y`.
pub fn chain_root<'t>(node: Node<'t>, member_kinds: &[&str], object_field: &str) -> Node<'t> {
    let mut current = node;
    while member_kinds.contains(&current.kind()) {
        match current.child_by_field_name(object_field) {
            Some(object) => current = object,
            None => break,
        }
    }
    current
}
