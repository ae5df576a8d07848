//! Python language extractor

use crate::cst::source_range;
use crate::extractor::{
    FactsBuilder, ImportFact, LanguageExtractor, chain_root, member_chain, pattern_names, unquote,
};
use crate::scope::ScopeKind;
use grove_core::{ByteRange, Language, NodeKind};
use tree_sitter::Node;

const IDENTIFIERS: &[&str] = &["identifier"];
const ATTRIBUTE: &[&str] = &["attribute"];

/// Builtins that take an attribute name as a string literal.
const STRING_LOOKUPS: &[&str] = &["getattr", "setattr", "hasattr", "delattr"];

pub struct PythonExtractor;

impl LanguageExtractor for PythonExtractor {
    fn language(&self) -> Language {
        Language::Python
    }

    fn visit(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        match node.kind() {
            "function_definition" => self.function(node, b),
            "class_definition" => self.class(node, b),
            "import_statement" => self.import(node, b),
            "import_from_statement" => self.import_from(node, b),
            "future_import_statement" | "global_statement" | "nonlocal_statement" | "comment" => {}
            "assignment" => self.assignment(node, b),
            "augmented_assignment" => self.augmented_assignment(node, b),
            "for_statement" | "for_in_clause" => {
                b.visit_field(node, "right", self);
                if let Some(left) = node.child_by_field_name("left") {
                    self.bind_targets(left, b);
                }
                b.visit_field(node, "body", self);
                b.visit_field(node, "alternative", self);
            }
            "as_pattern" => {
                let mut cursor = node.walk();
                let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
                let alias = node.child_by_field_name("alias");
                for child in children {
                    if alias.is_some_and(|a| a.id() == child.id()) {
                        self.bind_targets(child, b);
                    } else {
                        self.visit(child, b);
                    }
                }
            }
            "except_clause" => self.except_clause(node, b),
            "named_expression" => {
                b.visit_field(node, "value", self);
                if let Some(name) = node.child_by_field_name("name") {
                    self.bind_targets(name, b);
                }
            }
            "lambda" => b.in_anonymous(ScopeKind::Function, node, |b| {
                if let Some(params) = node.child_by_field_name("parameters") {
                    b.bind_pattern(params, IDENTIFIERS);
                }
                b.visit_field(node, "body", self);
            }),
            "attribute" => self.attribute(node, b),
            "call" => self.call(node, b),
            "keyword_argument" => b.visit_field(node, "value", self),
            "identifier" => b.reference(node),
            _ => b.visit_children(node, self),
        }
    }
}

impl PythonExtractor {
    fn function(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        let Some(name) = node.child_by_field_name("name") else {
            return b.visit_children(node, self);
        };
        let params = node.child_by_field_name("parameters");
        // Defaults and annotations are evaluated in the enclosing scope.
        if let Some(params) = params {
            self.parameter_defaults(params, b);
        }
        b.visit_field(node, "return_type", self);

        let idx = b.define(NodeKind::Function, name, node, false);
        b.in_symbol(idx, ScopeKind::Function, node, |b| {
            if let Some(params) = params {
                b.bind_pattern(params, IDENTIFIERS);
            }
            b.visit_field(node, "body", self);
        });
    }

    fn parameter_defaults(&self, params: Node<'_>, b: &mut FactsBuilder<'_>) {
        let mut cursor = params.walk();
        let children: Vec<Node<'_>> = params.named_children(&mut cursor).collect();
        for param in children {
            b.visit_field(param, "value", self);
            b.visit_field(param, "type", self);
        }
    }

    fn class(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        let Some(name) = node.child_by_field_name("name") else {
            return b.visit_children(node, self);
        };
        let idx = b.define(NodeKind::Class, name, node, false);

        if let Some(supers) = node.child_by_field_name("superclasses") {
            let mut cursor = supers.walk();
            let args: Vec<Node<'_>> = supers.named_children(&mut cursor).collect();
            b.with_owner(idx, |b| {
                for arg in args {
                    match arg.kind() {
                        "identifier" | "attribute" => {
                            if let Some(base) =
                                member_chain(arg, b.src(), ATTRIBUTE, "object", "attribute", IDENTIFIERS)
                            {
                                b.add_base(idx, base.clone());
                                b.reference_path(base.name, base.path, base.range);
                            }
                        }
                        _ => self.visit(arg, b),
                    }
                }
            });
        }

        b.in_symbol(idx, ScopeKind::Class, node, |b| {
            b.visit_field(node, "body", self);
        });
    }

    fn import(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        let range = source_range(node);
        let mut cursor = node.walk();
        let names: Vec<Node<'_>> = node.children_by_field_name("name", &mut cursor).collect();
        for name in names {
            let fact = match name.kind() {
                "dotted_name" => {
                    let module = b.text(name);
                    ImportFact::new(module, range, byte_range(name)).local(module)
                }
                "aliased_import" => {
                    let (Some(module), Some(alias)) = (
                        name.child_by_field_name("name"),
                        name.child_by_field_name("alias"),
                    ) else {
                        continue;
                    };
                    let alias = b.text(alias);
                    ImportFact::new(b.text(module), range, byte_range(module))
                        .alias(Some(alias.to_string()))
                        .local(alias)
                }
                _ => continue,
            };
            b.import(fact);
        }
    }

    fn import_from(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        let Some(module) = node.child_by_field_name("module_name") else {
            return;
        };
        let range = source_range(node);
        let specifier = b.text(module).to_string();
        let module_range = byte_range(module);

        let mut cursor = node.walk();
        let wildcard = node
            .named_children(&mut cursor)
            .any(|child| child.kind() == "wildcard_import");
        if wildcard {
            b.import(ImportFact::new(specifier, range, module_range).wildcard());
            return;
        }

        let mut cursor = node.walk();
        let names: Vec<Node<'_>> = node.children_by_field_name("name", &mut cursor).collect();
        for name in names {
            let (member, alias) = match name.kind() {
                "dotted_name" => (b.text(name), None),
                "aliased_import" => {
                    let Some(member) = name.child_by_field_name("name") else {
                        continue;
                    };
                    let alias = name.child_by_field_name("alias").map(|a| b.text(a).to_string());
                    (b.text(member), alias)
                }
                _ => continue,
            };
            let local = alias.clone().unwrap_or_else(|| member.to_string());
            b.import(
                ImportFact::new(specifier.as_str(), range, module_range)
                    .member(member)
                    .alias(alias)
                    .local(local),
            );
        }
    }

    fn assignment(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        b.visit_field(node, "type", self);
        let left = node.child_by_field_name("left");
        let right = node.child_by_field_name("right");

        if let (Some(left), Some(right)) = (left, right) {
            if !b.in_function() && b.text(left) == "__all__" {
                self.export_list(right, b);
            }
        }

        let defined = match left {
            Some(left) => self.assignment_targets(left, node, b),
            None => Vec::new(),
        };
        if let Some(right) = right {
            match defined.first() {
                Some(&symbol) => b.with_owner(symbol, |b| self.visit(right, b)),
                None => self.visit(right, b),
            }
        }
    }

    fn augmented_assignment(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        let (Some(left), Some(right)) = (
            node.child_by_field_name("left"),
            node.child_by_field_name("right"),
        ) else {
            return b.visit_children(node, self);
        };
        if !b.in_function() && b.text(left) == "__all__" {
            self.export_list(right, b);
        }
        self.visit(left, b);
        self.visit(right, b);
    }

    /// `__all__ = ["a", "b"]`
    fn export_list(&self, list: Node<'_>, b: &mut FactsBuilder<'_>) {
        let mut cursor = list.walk();
        let items: Vec<Node<'_>> = list.named_children(&mut cursor).collect();
        for item in items {
            if item.kind() == "string" {
                let name = unquote(b.text(item)).to_string();
                b.mark_exported(&name);
            }
        }
    }

    /// Targets of a plain assignment. Module and class level names become
    /// variables; inside functions they are locals. Attribute and subscript
    /// targets are uses of their object.
    fn assignment_targets(
        &self,
        target: Node<'_>,
        statement: Node<'_>,
        b: &mut FactsBuilder<'_>,
    ) -> Vec<usize> {
        match target.kind() {
            "identifier" => {
                let name = b.text(target);
                if b.in_function() {
                    b.bind_local(name);
                    Vec::new()
                } else if b.declared_here(name) {
                    // Rebinding an existing variable: keep the first definition.
                    Vec::new()
                } else {
                    vec![b.define(NodeKind::Variable, target, statement, false)]
                }
            }
            "pattern_list" | "tuple_pattern" | "list_pattern" | "tuple" | "list" => {
                let mut cursor = target.walk();
                let items: Vec<Node<'_>> = target.named_children(&mut cursor).collect();
                items
                    .into_iter()
                    .flat_map(|item| self.assignment_targets(item, statement, b))
                    .collect()
            }
            "list_splat_pattern" | "parenthesized_expression" => {
                let mut cursor = target.walk();
                let inner: Vec<Node<'_>> = target.named_children(&mut cursor).collect();
                inner
                    .into_iter()
                    .flat_map(|item| self.assignment_targets(item, statement, b))
                    .collect()
            }
            _ => {
                self.visit(target, b);
                Vec::new()
            }
        }
    }

    /// Loop, `with` and `except` targets: locals at any level.
    fn bind_targets(&self, target: Node<'_>, b: &mut FactsBuilder<'_>) {
        match target.kind() {
            "attribute" | "subscript" => self.visit(target, b),
            _ => {
                for name in pattern_names(target, IDENTIFIERS) {
                    let name = b.text(name);
                    b.bind_local(name);
                }
            }
        }
    }

    /// `except E as e:` in both the old flat and the `as_pattern` shapes.
    fn except_clause(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
        let mut after_as = false;
        for child in children {
            if !child.is_named() {
                after_as = child.kind() == "as";
                continue;
            }
            if after_as && child.kind() == "identifier" {
                b.bind_local(b.text(child));
            } else {
                self.visit(child, b);
            }
            after_as = false;
        }
    }

    fn attribute(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        match member_chain(node, b.src(), ATTRIBUTE, "object", "attribute", IDENTIFIERS) {
            Some(chain) if b.is_self(&chain.name) && !chain.path.is_empty() => {
                b.self_member(&chain.path[0], chain.range);
            }
            Some(chain) => b.reference_path(chain.name, chain.path, chain.range),
            None => {
                let root = chain_root(node, ATTRIBUTE, "object");
                self.visit(root, b);
            }
        }
    }

    fn call(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        if let (Some(function), Some(args)) = (
            node.child_by_field_name("function"),
            node.child_by_field_name("arguments"),
        ) {
            if function.kind() == "identifier" && STRING_LOOKUPS.contains(&b.text(function)) {
                let mut cursor = args.walk();
                let positional: Vec<Node<'_>> = args.named_children(&mut cursor).collect();
                if let Some(literal) = positional.get(1).filter(|n| n.kind() == "string") {
                    let name = unquote(b.text(*literal)).to_string();
                    b.string_lookup(&name, byte_range(*literal));
                }
            }
        }
        b.visit_children(node, self);
    }
}

fn byte_range(node: Node<'_>) -> ByteRange {
    ByteRange::new(node.start_byte(), node.end_byte())
}
