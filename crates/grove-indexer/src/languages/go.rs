//! Go language extractor

use crate::cst::source_range;
use crate::extractor::{FactsBuilder, ImportFact, LanguageExtractor, chain_root, member_chain, unquote};
use crate::scope::ScopeKind;
use grove_core::{ByteRange, Language, NodeKind};
use tree_sitter::Node;

const IDENTIFIERS: &[&str] = &["identifier", "package_identifier", "type_identifier"];
const SELECTOR: &[&str] = &["selector_expression"];

pub struct GoExtractor;

/// Go exports by capitalization.
fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase)
}

impl LanguageExtractor for GoExtractor {
    fn language(&self) -> Language {
        Language::Go
    }

    fn visit(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        match node.kind() {
            "package_clause" => {
                let mut cursor = node.walk();
                let name = node
                    .named_children(&mut cursor)
                    .find(|c| c.kind() == "package_identifier");
                if let Some(name) = name {
                    let package = b.text(name);
                    b.set_package(package);
                }
            }
            "import_spec" => self.import_spec(node, b),
            "function_declaration" => self.function(node, b),
            "method_declaration" => self.method(node, b),
            "type_spec" | "type_alias" => self.type_spec(node, b),
            "const_spec" | "var_spec" => self.value_spec(node, b),
            "short_var_declaration" => {
                b.visit_field(node, "right", self);
                if let Some(left) = node.child_by_field_name("left") {
                    b.bind_pattern(left, &["identifier"]);
                }
            }
            "range_clause" => {
                b.visit_field(node, "right", self);
                if let Some(left) = node.child_by_field_name("left") {
                    b.bind_pattern(left, &["identifier"]);
                }
            }
            "func_literal" => b.in_anonymous(ScopeKind::Function, node, |b| {
                self.signature_and_body(node, b);
            }),
            "selector_expression" => self.selector(node, b),
            "qualified_type" => {
                let (Some(package), Some(name)) = (
                    node.child_by_field_name("package"),
                    node.child_by_field_name("name"),
                ) else {
                    return;
                };
                let range = ByteRange::new(node.start_byte(), node.end_byte());
                b.reference_path(b.text(package).to_string(), vec![b.text(name).to_string()], range);
            }
            "keyed_element" => {
                // `Point{X: 1}`: the key is a field name, only the value is a use.
                let mut cursor = node.walk();
                let parts: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
                if let Some(value) = parts.last() {
                    self.visit(*value, b);
                }
            }
            "identifier" | "type_identifier" => b.reference(node),
            "comment" | "field_identifier" | "label_name" | "interpreted_string_literal"
            | "raw_string_literal" => {}
            _ => b.visit_children(node, self),
        }
    }
}

impl GoExtractor {
    fn import_spec(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        let Some(path) = node.child_by_field_name("path") else {
            return;
        };
        let module = unquote(b.text(path)).to_string();
        let module_range = ByteRange::new(path.start_byte(), path.end_byte());
        let fact = ImportFact::new(module.as_str(), source_range(node), module_range);

        let fact = match node.child_by_field_name("name") {
            Some(name) if name.kind() == "dot" => fact.wildcard(),
            // `import _ "x"` is for side effects only.
            Some(name) if name.kind() == "blank_identifier" => fact,
            Some(name) => {
                let alias = b.text(name);
                fact.alias(Some(alias.to_string())).local(alias)
            }
            None => {
                let last = module.rsplit('/').next().unwrap_or(module.as_str());
                fact.local(last)
            }
        };
        b.import(fact);
    }

    fn function(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        let Some(name) = node.child_by_field_name("name") else {
            return b.visit_children(node, self);
        };
        let exported = is_exported(b.text(name));
        let idx = b.define(NodeKind::Function, name, node, exported);
        b.in_symbol(idx, ScopeKind::Function, node, |b| {
            self.signature_and_body(node, b);
        });
    }

    /// Methods hang off their receiver type when it is declared earlier in
    /// the file; the receiver name then acts like `self`.
    fn method(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        let Some(name) = node.child_by_field_name("name") else {
            return b.visit_children(node, self);
        };
        let receiver = node.child_by_field_name("receiver");
        let receiver_type = receiver.and_then(|r| find_kind(r, "type_identifier"));
        let receiver_name = receiver
            .and_then(|r| find_kind(r, "parameter_declaration"))
            .and_then(|p| p.child_by_field_name("name"))
            .map(|n| b.text(n));
        let owner = receiver_type.and_then(|t| b.top_level_symbol(b.text(t)));

        let exported = is_exported(b.text(name));
        let define_and_walk = |b: &mut FactsBuilder<'_>| {
            let idx = b.define(NodeKind::Function, name, node, exported);
            b.in_symbol(idx, ScopeKind::Function, node, |b| {
                if let Some(receiver) = receiver {
                    self.parameters(receiver, b);
                }
                self.signature_and_body(node, b);
            });
        };

        // Method names live outside the package namespace.
        b.in_anonymous(ScopeKind::Class, node, |b| match (owner, receiver_name) {
            (Some(owner), Some(receiver_name)) => b.with_owner(owner, |b| {
                b.with_self_name(receiver_name, define_and_walk);
            }),
            (Some(owner), None) => b.with_owner(owner, define_and_walk),
            (None, _) => {
                if let Some(receiver_type) = receiver_type {
                    b.reference(receiver_type);
                }
                define_and_walk(b);
            }
        });
    }

    fn signature_and_body(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        b.visit_field(node, "type_parameters", self);
        if let Some(params) = node.child_by_field_name("parameters") {
            self.parameters(params, b);
        }
        b.visit_field(node, "result", self);
        b.visit_field(node, "body", self);
    }

    fn parameters(&self, params: Node<'_>, b: &mut FactsBuilder<'_>) {
        let mut cursor = params.walk();
        let decls: Vec<Node<'_>> = params.named_children(&mut cursor).collect();
        for decl in decls {
            b.visit_field(decl, "type", self);
            let mut cursor = decl.walk();
            let names: Vec<Node<'_>> = decl.children_by_field_name("name", &mut cursor).collect();
            for name in names {
                b.bind_local(b.text(name));
            }
        }
    }

    fn type_spec(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        let Some(name) = node.child_by_field_name("name") else {
            return b.visit_children(node, self);
        };
        let exported = is_exported(b.text(name));
        let idx = b.define(NodeKind::Class, name, node, exported);
        b.in_symbol(idx, ScopeKind::Class, node, |b| {
            b.visit_field(node, "type_parameters", self);
            b.visit_field(node, "type", self);
        });
    }

    fn value_spec(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        b.visit_field(node, "type", self);
        let mut cursor = node.walk();
        let names: Vec<Node<'_>> = node.children_by_field_name("name", &mut cursor).collect();

        if b.in_function() {
            b.visit_field(node, "value", self);
            for name in names {
                b.bind_local(b.text(name));
            }
            return;
        }

        let mut first = None;
        for name in names {
            if b.text(name) == "_" {
                continue;
            }
            let exported = is_exported(b.text(name));
            let idx = b.define(NodeKind::Variable, name, node, exported);
            first.get_or_insert(idx);
        }
        match first {
            Some(owner) => b.with_owner(owner, |b| b.visit_field(node, "value", self)),
            None => b.visit_field(node, "value", self),
        }
    }

    fn selector(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        match member_chain(node, b.src(), SELECTOR, "operand", "field", IDENTIFIERS) {
            Some(chain) if b.is_self(&chain.name) && !chain.path.is_empty() => {
                b.self_member(&chain.path[0], chain.range);
            }
            Some(chain) => b.reference_path(chain.name, chain.path, chain.range),
            None => {
                let root = chain_root(node, SELECTOR, "operand");
                self.visit(root, b);
            }
        }
    }
}

/// First descendant of `kind`, depth-first.
fn find_kind<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    if node.kind() == kind {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
    children.into_iter().find_map(|child| find_kind(child, kind))
}
