//! Rust language extractor

use crate::cst::source_range;
use crate::extractor::{
    FactsBuilder, ImportFact, LanguageExtractor, NameRef, chain_root, member_chain,
};
use crate::scope::ScopeKind;
use grove_core::{ByteRange, Language, NodeKind};
use tree_sitter::Node;

const BINDINGS: &[&str] = &["identifier", "shorthand_field_identifier"];
const FIELD: &[&str] = &["field_expression"];
const PATH_ROOTS: &[&str] = &["crate", "self", "super"];

pub struct RustExtractor;

impl LanguageExtractor for RustExtractor {
    fn language(&self) -> Language {
        Language::Rust
    }

    fn visit(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        match node.kind() {
            "function_item" | "function_signature_item" => self.function(node, b),
            "struct_item" | "enum_item" | "union_item" | "type_item" | "trait_item" => {
                self.type_item(node, b)
            }
            "const_item" | "static_item" => self.value_item(node, b),
            "mod_item" => self.module(node, b),
            "impl_item" => self.impl_block(node, b),
            "use_declaration" => self.use_declaration(node, b),
            "extern_crate_declaration" => {
                if let Some(name) = node.child_by_field_name("name") {
                    let crate_name = b.text(name);
                    let local = node
                        .child_by_field_name("alias")
                        .map(|a| b.text(a))
                        .unwrap_or(crate_name);
                    b.import(
                        ImportFact::new(crate_name, source_range(node), byte_range(name)).local(local),
                    );
                }
            }
            "let_declaration" => {
                b.visit_field(node, "type", self);
                b.visit_field(node, "value", self);
                b.visit_field(node, "alternative", self);
                if let Some(pattern) = node.child_by_field_name("pattern") {
                    b.bind_pattern(pattern, BINDINGS);
                }
            }
            "let_condition" => {
                b.visit_field(node, "value", self);
                if let Some(pattern) = node.child_by_field_name("pattern") {
                    b.bind_pattern(pattern, BINDINGS);
                }
            }
            "for_expression" => {
                b.visit_field(node, "value", self);
                b.in_anonymous(ScopeKind::Function, node, |b| {
                    if let Some(pattern) = node.child_by_field_name("pattern") {
                        b.bind_pattern(pattern, BINDINGS);
                    }
                    b.visit_field(node, "body", self);
                });
            }
            "match_arm" => b.in_anonymous(ScopeKind::Function, node, |b| {
                if let Some(pattern) = node.child_by_field_name("pattern") {
                    b.bind_pattern(pattern, BINDINGS);
                }
                b.visit_field(node, "value", self);
            }),
            "closure_expression" => b.in_anonymous(ScopeKind::Function, node, |b| {
                if let Some(params) = node.child_by_field_name("parameters") {
                    self.parameters(params, b);
                }
                b.visit_field(node, "return_type", self);
                b.visit_field(node, "body", self);
            }),
            "field_expression" => self.field_expression(node, b),
            "scoped_identifier" | "scoped_type_identifier" => self.scoped(node, b),
            "macro_invocation" => b.visit_field(node, "token_tree", self),
            "struct_expression" => {
                b.visit_field(node, "name", self);
                b.visit_field(node, "body", self);
            }
            "field_initializer" => b.visit_field(node, "value", self),
            "enum_variant" => {
                b.visit_field(node, "body", self);
                b.visit_field(node, "value", self);
            }
            "shorthand_field_initializer" | "identifier" | "type_identifier" => b.reference(node),
            "attribute_item" | "inner_attribute_item" | "line_comment" | "block_comment"
            | "field_identifier" | "primitive_type" | "string_literal" | "lifetime" => {}
            _ => b.visit_children(node, self),
        }
    }
}

impl RustExtractor {
    fn function(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        let Some(name) = node.child_by_field_name("name") else {
            return b.visit_children(node, self);
        };
        let idx = b.define(NodeKind::Function, name, node, is_public(node));
        b.in_symbol(idx, ScopeKind::Function, node, |b| {
            b.visit_field(node, "type_parameters", self);
            if let Some(params) = node.child_by_field_name("parameters") {
                self.parameters(params, b);
            }
            b.visit_field(node, "return_type", self);
            b.visit_field(node, "body", self);
        });
    }

    fn parameters(&self, params: Node<'_>, b: &mut FactsBuilder<'_>) {
        let mut cursor = params.walk();
        let children: Vec<Node<'_>> = params.named_children(&mut cursor).collect();
        for param in children {
            match param.kind() {
                "parameter" => {
                    b.visit_field(param, "type", self);
                    if let Some(pattern) = param.child_by_field_name("pattern") {
                        b.bind_pattern(pattern, BINDINGS);
                    }
                }
                "self_parameter" | "variadic_parameter" => {}
                // Closure parameters are bare patterns.
                _ => b.bind_pattern(param, BINDINGS),
            }
        }
    }

    fn type_item(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        let Some(name) = node.child_by_field_name("name") else {
            return b.visit_children(node, self);
        };
        let idx = b.define(NodeKind::Class, name, node, is_public(node));
        b.in_symbol(idx, ScopeKind::Class, node, |b| {
            b.visit_field(node, "type_parameters", self);
            b.visit_field(node, "bounds", self);
            b.visit_field(node, "type", self);
            b.visit_field(node, "body", self);
        });
    }

    fn value_item(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        let Some(name) = node.child_by_field_name("name") else {
            return b.visit_children(node, self);
        };
        b.visit_field(node, "type", self);
        let idx = b.define(NodeKind::Variable, name, node, is_public(node));
        if let Some(value) = node.child_by_field_name("value") {
            b.with_owner(idx, |b| self.visit(value, b));
        }
    }

    /// `mod foo;` pulls in another file; `mod foo { .. }` is a namespace.
    fn module(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        let module = b.text(name);
        match node.child_by_field_name("body") {
            None => {
                let mut fact = ImportFact::new(format!("self::{module}"), source_range(node), byte_range(name))
                    .local(module);
                if is_public(node) {
                    fact = fact.reexport();
                }
                b.import(fact);
            }
            Some(body) => {
                let idx = b.define(NodeKind::Class, name, node, is_public(node));
                b.in_symbol(idx, ScopeKind::Module, node, |b| b.visit_children(body, self));
            }
        }
    }

    /// Methods in `impl T` become members of `T` when `T` is declared
    /// earlier in this file. `impl Trait for T` also records `Trait` as a
    /// base of `T`.
    fn impl_block(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        let self_type = node.child_by_field_name("type");
        let owner = self_type
            .and_then(impl_type_name)
            .and_then(|t| b.top_level_symbol(b.text(t)))
            .filter(|&idx| b.symbol(idx).kind == NodeKind::Class);

        let trait_ref = node
            .child_by_field_name("trait")
            .and_then(|t| path_ref(t, b));
        if let Some(trait_ref) = &trait_ref {
            if let Some(owner) = owner {
                b.add_base(owner, trait_ref.clone());
            }
        }

        b.visit_field(node, "type_parameters", self);
        b.visit_field(node, "trait", self);
        b.visit_field(node, "type", self);

        let Some(body) = node.child_by_field_name("body") else {
            return;
        };
        match owner {
            Some(owner) => b.in_symbol(owner, ScopeKind::Class, node, |b| b.visit_children(body, self)),
            None => b.in_anonymous(ScopeKind::Class, node, |b| b.visit_children(body, self)),
        }
    }

    fn use_declaration(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        let Some(argument) = node.child_by_field_name("argument") else {
            return;
        };
        let public = is_public(node);
        let range = source_range(node);
        let mut paths = Vec::new();
        use_paths(argument, &[], b, &mut paths);
        // Inside an inline `mod`, `super` is the file's own module.
        if !b.at_module_root() && b.scope_kind() == ScopeKind::Module {
            for path in &mut paths {
                if let Some(first) = path.segments.first_mut().filter(|s| s.as_str() == "super") {
                    *first = "self".to_string();
                }
            }
        }

        for path in paths {
            let UsePath { mut segments, alias, wildcard, range: module_range } = path;
            if wildcard {
                let fact = ImportFact::new(segments.join("::"), range, module_range).wildcard();
                b.import(if public { fact.reexport() } else { fact });
                continue;
            }
            // `use a::b::{self}` imports `a::b` itself.
            if segments.len() > 1 && segments.last().is_some_and(|s| s == "self") {
                segments.pop();
            }
            let Some(last) = segments.pop() else {
                continue;
            };
            let local = alias.clone().unwrap_or_else(|| last.clone());
            let fact = if segments.is_empty() {
                ImportFact::new(last, range, module_range).alias(alias).local(local)
            } else {
                ImportFact::new(segments.join("::"), range, module_range)
                    .member(last)
                    .alias(alias)
                    .local(local)
            };
            b.import(if public { fact.reexport() } else { fact });
        }
    }

    fn field_expression(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        match member_chain(node, b.src(), FIELD, "value", "field", &["identifier", "self"]) {
            Some(chain) if b.is_self(&chain.name) && !chain.path.is_empty() => {
                b.self_member(&chain.path[0], chain.range);
            }
            Some(chain) if chain.name == "self" => {}
            Some(chain) => b.reference_path(chain.name, chain.path, chain.range),
            None => {
                let root = chain_root(node, FIELD, "value");
                self.visit(root, b);
            }
        }
    }

    /// `Foo::new`, `module::func`, `Self::helper`.
    fn scoped(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        let Some(reference) = path_ref(node, b) else {
            return b.visit_children(node, self);
        };
        if reference.name == "Self" {
            if let Some(member) = reference.path.first() {
                if b.enclosing_class().is_some() {
                    b.self_member(member, reference.range);
                }
            }
            return;
        }
        if PATH_ROOTS.contains(&reference.name.as_str()) {
            return;
        }
        b.reference_path(reference.name, reference.path, reference.range);
    }
}

struct UsePath {
    segments: Vec<String>,
    alias: Option<String>,
    wildcard: bool,
    range: ByteRange,
}

/// Flatten a use tree (`a::{b, c::d as e, f::*}`) into one path per import.
fn use_paths(node: Node<'_>, prefix: &[String], b: &FactsBuilder<'_>, out: &mut Vec<UsePath>) {
    let with_prefix = |segments: Vec<String>| -> Vec<String> {
        prefix.iter().cloned().chain(segments).collect()
    };
    match node.kind() {
        "identifier" | "crate" | "self" | "super" | "scoped_identifier" | "metavariable" => {
            if let Some(segments) = path_segments(node, b) {
                out.push(UsePath {
                    segments: with_prefix(segments),
                    alias: None,
                    wildcard: false,
                    range: byte_range(node),
                });
            }
        }
        "use_as_clause" => {
            let (Some(path), Some(alias)) = (
                node.child_by_field_name("path"),
                node.child_by_field_name("alias"),
            ) else {
                return;
            };
            if let Some(segments) = path_segments(path, b) {
                out.push(UsePath {
                    segments: with_prefix(segments),
                    alias: Some(b.text(alias).to_string()),
                    wildcard: false,
                    range: byte_range(path),
                });
            }
        }
        "use_wildcard" => {
            let mut cursor = node.walk();
            let path = node.named_children(&mut cursor).next();
            let segments = path.and_then(|p| path_segments(p, b)).unwrap_or_default();
            out.push(UsePath {
                segments: with_prefix(segments),
                alias: None,
                wildcard: true,
                range: byte_range(path.unwrap_or(node)),
            });
        }
        "scoped_use_list" => {
            let segments = node
                .child_by_field_name("path")
                .and_then(|p| path_segments(p, b))
                .unwrap_or_default();
            let nested = with_prefix(segments);
            if let Some(list) = node.child_by_field_name("list") {
                use_paths(list, &nested, b, out);
            }
        }
        "use_list" => {
            let mut cursor = node.walk();
            let items: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
            for item in items {
                use_paths(item, prefix, b, out);
            }
        }
        _ => {}
    }
}

/// `a::b::c` as segments. `None` for paths with generics or other noise.
fn path_segments(node: Node<'_>, b: &FactsBuilder<'_>) -> Option<Vec<String>> {
    match node.kind() {
        "identifier" | "type_identifier" | "crate" | "self" | "super" | "metavariable" => {
            Some(vec![b.text(node).to_string()])
        }
        "scoped_identifier" | "scoped_type_identifier" => {
            let mut segments = match node.child_by_field_name("path") {
                Some(path) => path_segments(path, b)?,
                // `::std::x`
                None => Vec::new(),
            };
            segments.push(b.text(node.child_by_field_name("name")?).to_string());
            Some(segments)
        }
        _ => None,
    }
}

fn path_ref(node: Node<'_>, b: &FactsBuilder<'_>) -> Option<NameRef> {
    let node = match node.kind() {
        "generic_type" => node.child_by_field_name("type")?,
        _ => node,
    };
    let mut segments = path_segments(node, b)?.into_iter();
    let name = segments.next()?;
    Some(NameRef {
        name,
        path: segments.collect(),
        range: byte_range(node),
    })
}

/// The nominal type an `impl` block is for.
fn impl_type_name(node: Node<'_>) -> Option<Node<'_>> {
    match node.kind() {
        "type_identifier" => Some(node),
        "generic_type" => impl_type_name(node.child_by_field_name("type")?),
        _ => None,
    }
}

fn is_public(node: Node<'_>) -> bool {
    let mut cursor = node.walk();
    let public = node
        .named_children(&mut cursor)
        .any(|child| child.kind() == "visibility_modifier");
    public
}

fn byte_range(node: Node<'_>) -> ByteRange {
    ByteRange::new(node.start_byte(), node.end_byte())
}
