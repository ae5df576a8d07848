//! JavaScript extractor. The TypeScript extractor reuses [`visit_common`]
//! for everything the two grammars share.

use crate::cst::source_range;
use crate::extractor::{
    FactsBuilder, ImportFact, LanguageExtractor, NameRef, chain_root, member_chain, pattern_names,
    unquote,
};
use crate::scope::{ScopeKind, ScopeTree};
use grove_core::{ByteRange, Language, NodeKind};
use tree_sitter::Node;

pub(super) const IDENTIFIERS: &[&str] = &["identifier", "this"];
pub(super) const MEMBER: &[&str] = &["member_expression"];
/// Identifier kinds that introduce bindings inside patterns.
pub(super) const BINDINGS: &[&str] = &["identifier", "shorthand_property_identifier_pattern"];

const FUNCTION_VALUES: &[&str] = &[
    "arrow_function",
    "function_expression",
    "function",
    "generator_function",
];
const CLASS_VALUES: &[&str] = &["class"];

pub struct JavaScriptExtractor;

impl LanguageExtractor for JavaScriptExtractor {
    fn language(&self) -> Language {
        Language::JavaScript
    }

    fn visit(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        visit_common(self, node, b);
    }
}

/// Node kinds shared by the JavaScript and TypeScript grammars.
pub(super) fn visit_common(ex: &dyn LanguageExtractor, node: Node<'_>, b: &mut FactsBuilder<'_>) {
    match node.kind() {
        "function_declaration" | "generator_function_declaration" | "function_signature" => {
            function_declaration(ex, node, b)
        }
        "class_declaration" | "abstract_class_declaration" => class_declaration(ex, node, b),
        "class" => match node.child_by_field_name("name") {
            Some(_) => class_declaration(ex, node, b),
            None => class_body(ex, node, b),
        },
        "arrow_function" | "function_expression" | "function" | "generator_function" => {
            b.in_anonymous(ScopeKind::Function, node, |b| function_body(ex, node, b))
        }
        "method_definition" | "method_signature" | "abstract_method_signature" => {
            method(ex, node, b)
        }
        "field_definition" | "public_field_definition" => field(ex, node, b),
        "lexical_declaration" | "variable_declaration" => {
            let mut cursor = node.walk();
            let declarators: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
            for declarator in declarators {
                if declarator.kind() == "variable_declarator" {
                    variable_declarator(ex, declarator, b);
                } else {
                    ex.visit(declarator, b);
                }
            }
        }
        "import_statement" => import_statement(node, b),
        "export_statement" => export_statement(ex, node, b),
        "for_in_statement" => {
            b.visit_field(node, "right", ex);
            if let Some(left) = node.child_by_field_name("left") {
                if b.in_function() || node.child_by_field_name("kind").is_some() {
                    b.bind_pattern(left, BINDINGS);
                } else {
                    ex.visit(left, b);
                }
            }
            b.visit_field(node, "body", ex);
        }
        "catch_clause" => b.in_anonymous(ScopeKind::Function, node, |b| {
            if let Some(param) = node.child_by_field_name("parameter") {
                b.bind_pattern(param, BINDINGS);
            }
            b.visit_field(node, "body", ex);
        }),
        "member_expression" => member(ex, node, b),
        "call_expression" => {
            if let Some(module) = require_specifier(node, b) {
                let range = source_range(node);
                b.import(ImportFact::new(module.0, range, module.1));
                return;
            }
            b.visit_children(node, ex);
        }
        "pair" => b.visit_field(node, "value", ex),
        "identifier" | "shorthand_property_identifier" => b.reference(node),
        "comment" | "property_identifier" | "private_property_identifier" | "statement_identifier"
        | "string" | "regex" | "number" => {}
        _ => b.visit_children(node, ex),
    }
}

fn function_declaration(ex: &dyn LanguageExtractor, node: Node<'_>, b: &mut FactsBuilder<'_>) {
    let Some(name) = node.child_by_field_name("name") else {
        return b.in_anonymous(ScopeKind::Function, node, |b| function_body(ex, node, b));
    };
    let idx = b.define(NodeKind::Function, name, node, false);
    b.in_symbol(idx, ScopeKind::Function, node, |b| function_body(ex, node, b));
}

/// Parameters and body of any function-like node, inside its own scope.
pub(super) fn function_body(ex: &dyn LanguageExtractor, node: Node<'_>, b: &mut FactsBuilder<'_>) {
    for field in ["parameters", "parameter"] {
        if let Some(params) = node.child_by_field_name(field) {
            parameters(ex, params, b);
        }
    }
    b.visit_field(node, "return_type", ex);
    b.visit_field(node, "body", ex);
}

/// Bind parameter names and visit default values and annotations.
fn parameters(ex: &dyn LanguageExtractor, params: Node<'_>, b: &mut FactsBuilder<'_>) {
    if params.kind() == "identifier" {
        b.bind_local(b.text(params));
        return;
    }
    let mut cursor = params.walk();
    let children: Vec<Node<'_>> = params.named_children(&mut cursor).collect();
    for param in children {
        // TypeScript wraps each parameter: `required_parameter(pattern, type, value)`.
        let pattern = param.child_by_field_name("pattern").unwrap_or(param);
        b.bind_pattern(pattern, BINDINGS);
        for field in ["right", "value", "type"] {
            b.visit_field(param, field, ex);
        }
        default_values(ex, pattern, b);
    }
}

/// Default values nested in destructuring patterns (`{a = f()}`).
fn default_values(ex: &dyn LanguageExtractor, pattern: Node<'_>, b: &mut FactsBuilder<'_>) {
    let mut cursor = pattern.walk();
    let children: Vec<Node<'_>> = pattern.named_children(&mut cursor).collect();
    for child in children {
        if matches!(child.kind(), "assignment_pattern" | "object_assignment_pattern") {
            b.visit_field(child, "right", ex);
        }
        if child.kind().ends_with("pattern") {
            default_values(ex, child, b);
        }
    }
}

fn class_declaration(ex: &dyn LanguageExtractor, node: Node<'_>, b: &mut FactsBuilder<'_>) {
    let Some(name) = node.child_by_field_name("name") else {
        return class_body(ex, node, b);
    };
    let idx = b.define(NodeKind::Class, name, node, false);

    let mut cursor = node.walk();
    let heritage: Vec<Node<'_>> = node
        .named_children(&mut cursor)
        .filter(|c| c.kind() == "class_heritage")
        .collect();
    b.with_owner(idx, |b| {
        for clause in heritage {
            heritage_clause(ex, idx, clause, b);
        }
    });

    b.in_symbol(idx, ScopeKind::Class, node, |b| class_body(ex, node, b));
}

fn class_body(ex: &dyn LanguageExtractor, node: Node<'_>, b: &mut FactsBuilder<'_>) {
    if let Some(body) = node.child_by_field_name("body") {
        b.visit_children(body, ex);
    }
}

/// `extends A` / `implements I, J`. Every named type becomes a base of
/// `class` and a use from it.
pub(super) fn heritage_clause(
    ex: &dyn LanguageExtractor,
    class: usize,
    clause: Node<'_>,
    b: &mut FactsBuilder<'_>,
) {
    let mut cursor = clause.walk();
    let parts: Vec<Node<'_>> = clause.named_children(&mut cursor).collect();
    for part in parts {
        match type_name(part, b) {
            Some(base) => {
                b.add_base(class, base.clone());
                b.reference_path(base.name, base.path, base.range);
                // Generic arguments are ordinary type uses.
                b.visit_field(part, "type_arguments", ex);
            }
            None => match part.kind() {
                "extends_clause" | "implements_clause" | "extends_type_clause" => {
                    heritage_clause(ex, class, part, b)
                }
                _ => ex.visit(part, b),
            },
        }
    }
}

/// Name of a class or type expression as a dotted reference.
pub(super) fn type_name(node: Node<'_>, b: &FactsBuilder<'_>) -> Option<NameRef> {
    match node.kind() {
        "identifier" | "type_identifier" | "member_expression" => {
            member_chain(node, b.src(), MEMBER, "object", "property", &["identifier", "type_identifier"])
        }
        "nested_type_identifier" => {
            let module = node.child_by_field_name("module")?;
            let name = node.child_by_field_name("name")?;
            let mut base = type_name(module, b)?;
            base.path.push(b.text(name).to_string());
            base.range = ByteRange::new(node.start_byte(), node.end_byte());
            Some(base)
        }
        "generic_type" => type_name(node.child_by_field_name("name")?, b),
        _ => None,
    }
}

fn method(ex: &dyn LanguageExtractor, node: Node<'_>, b: &mut FactsBuilder<'_>) {
    let Some(name) = node.child_by_field_name("name") else {
        return b.visit_children(node, ex);
    };
    if name.kind() == "computed_property_name" {
        ex.visit(name, b);
        return b.in_anonymous(ScopeKind::Function, node, |b| function_body(ex, node, b));
    }
    let idx = b.define(NodeKind::Function, name, node, false);
    b.in_symbol(idx, ScopeKind::Function, node, |b| function_body(ex, node, b));
}

fn field(ex: &dyn LanguageExtractor, node: Node<'_>, b: &mut FactsBuilder<'_>) {
    let name = node
        .child_by_field_name("property")
        .or_else(|| node.child_by_field_name("name"));
    let Some(name) = name.filter(|n| n.kind() != "computed_property_name") else {
        return b.visit_children(node, ex);
    };
    b.visit_field(node, "type", ex);
    let value = node.child_by_field_name("value");
    let kind = match value {
        Some(v) if FUNCTION_VALUES.contains(&v.kind()) => NodeKind::Function,
        _ => NodeKind::Variable,
    };
    let idx = b.define(kind, name, node, false);
    if let Some(value) = value {
        if kind == NodeKind::Function {
            b.in_symbol(idx, ScopeKind::Function, value, |b| function_body(ex, value, b));
        } else {
            b.with_owner(idx, |b| ex.visit(value, b));
        }
    }
}

fn variable_declarator(ex: &dyn LanguageExtractor, node: Node<'_>, b: &mut FactsBuilder<'_>) {
    let Some(name) = node.child_by_field_name("name") else {
        return b.visit_children(node, ex);
    };
    b.visit_field(node, "type", ex);
    let value = node.child_by_field_name("value");

    if let Some(value) = value {
        if let Some((module, module_range)) = require_specifier(value, b) {
            require_bindings(name, module, module_range, source_range(node), b);
            return;
        }
    }

    if b.in_function() {
        if let Some(value) = value {
            ex.visit(value, b);
        }
        b.bind_pattern(name, BINDINGS);
        return;
    }

    if name.kind() != "identifier" {
        // Module-level destructuring declares one variable per bound name.
        let names = pattern_names(name, BINDINGS);
        let defined: Vec<usize> = names
            .into_iter()
            .map(|n| b.define(NodeKind::Variable, n, node, false))
            .collect();
        if let Some(value) = value {
            match defined.first() {
                Some(&first) => b.with_owner(first, |b| ex.visit(value, b)),
                None => ex.visit(value, b),
            }
        }
        return;
    }

    match value {
        Some(value) if FUNCTION_VALUES.contains(&value.kind()) => {
            let idx = b.define(NodeKind::Function, name, node, false);
            b.in_symbol(idx, ScopeKind::Function, value, |b| function_body(ex, value, b));
        }
        Some(value) if CLASS_VALUES.contains(&value.kind()) => {
            let idx = b.define(NodeKind::Class, name, node, false);
            b.in_symbol(idx, ScopeKind::Class, value, |b| class_body(ex, value, b));
        }
        Some(value) => {
            let idx = b.define(NodeKind::Variable, name, node, false);
            b.with_owner(idx, |b| ex.visit(value, b));
        }
        None => {
            b.define(NodeKind::Variable, name, node, false);
        }
    }
}

/// `require("x")` call: specifier text and range.
fn require_specifier(node: Node<'_>, b: &FactsBuilder<'_>) -> Option<(String, ByteRange)> {
    if node.kind() != "call_expression" {
        return None;
    }
    let function = node.child_by_field_name("function")?;
    if function.kind() != "identifier" || b.text(function) != "require" {
        return None;
    }
    let args = node.child_by_field_name("arguments")?;
    let mut cursor = args.walk();
    let first = args.named_children(&mut cursor).next()?;
    if first.kind() != "string" {
        return None;
    }
    Some((
        unquote(b.text(first)).to_string(),
        ByteRange::new(first.start_byte(), first.end_byte()),
    ))
}

/// `const x = require(..)` and `const {a, b: c} = require(..)`.
fn require_bindings(
    pattern: Node<'_>,
    module: String,
    module_range: ByteRange,
    range: grove_core::SourceRange,
    b: &mut FactsBuilder<'_>,
) {
    match pattern.kind() {
        "identifier" => {
            let local = b.text(pattern);
            b.import(ImportFact::new(module, range, module_range).local(local));
        }
        "object_pattern" => {
            let mut cursor = pattern.walk();
            let props: Vec<Node<'_>> = pattern.named_children(&mut cursor).collect();
            for prop in props {
                let (member, local) = match prop.kind() {
                    "shorthand_property_identifier_pattern" => (b.text(prop), b.text(prop)),
                    "pair_pattern" => {
                        let (Some(key), Some(value)) = (
                            prop.child_by_field_name("key"),
                            prop.child_by_field_name("value"),
                        ) else {
                            continue;
                        };
                        if value.kind() != "identifier" {
                            continue;
                        }
                        (b.text(key), b.text(value))
                    }
                    _ => continue,
                };
                let alias = (member != local).then(|| local.to_string());
                b.import(
                    ImportFact::new(module.as_str(), range, module_range)
                        .member(member)
                        .alias(alias)
                        .local(local),
                );
            }
        }
        _ => b.import(ImportFact::new(module, range, module_range)),
    }
}

fn import_statement(node: Node<'_>, b: &mut FactsBuilder<'_>) {
    let Some(source) = node.child_by_field_name("source") else {
        return;
    };
    let module = unquote(b.text(source)).to_string();
    let module_range = ByteRange::new(source.start_byte(), source.end_byte());
    let range = source_range(node);

    let mut cursor = node.walk();
    let clause = node
        .named_children(&mut cursor)
        .find(|c| c.kind() == "import_clause");
    let Some(clause) = clause else {
        // Side-effect import.
        b.import(ImportFact::new(module, range, module_range));
        return;
    };

    let mut cursor = clause.walk();
    let parts: Vec<Node<'_>> = clause.named_children(&mut cursor).collect();
    for part in parts {
        match part.kind() {
            "identifier" => {
                let local = b.text(part);
                b.import(
                    ImportFact::new(module.as_str(), range, module_range)
                        .member("default")
                        .local(local),
                );
            }
            "namespace_import" => {
                let mut cursor = part.walk();
                let Some(name) = part.named_children(&mut cursor).find(|c| c.kind() == "identifier")
                else {
                    continue;
                };
                let local = b.text(name);
                b.import(ImportFact::new(module.as_str(), range, module_range).local(local));
            }
            "named_imports" => {
                let mut cursor = part.walk();
                let specifiers: Vec<Node<'_>> = part
                    .named_children(&mut cursor)
                    .filter(|c| c.kind() == "import_specifier")
                    .collect();
                for spec in specifiers {
                    let Some(name) = spec.child_by_field_name("name") else {
                        continue;
                    };
                    let member = unquote(b.text(name));
                    let alias = spec.child_by_field_name("alias").map(|a| b.text(a).to_string());
                    let local = alias.clone().unwrap_or_else(|| member.to_string());
                    b.import(
                        ImportFact::new(module.as_str(), range, module_range)
                            .member(member)
                            .alias(alias)
                            .local(local),
                    );
                }
            }
            _ => {}
        }
    }
}

fn export_statement(ex: &dyn LanguageExtractor, node: Node<'_>, b: &mut FactsBuilder<'_>) {
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
    let is_default = children.iter().any(|c| c.kind() == "default");

    if let Some(source) = node.child_by_field_name("source") {
        return reexport(node, source, &children, b);
    }

    if let Some(declaration) = node.child_by_field_name("declaration") {
        let declared = visit_declared(ex, declaration, b);
        for name in &declared {
            b.mark_exported(name);
        }
        if is_default {
            if let Some(first) = declared.first() {
                b.set_default_export(first);
            }
        }
        return;
    }

    if let Some(value) = node.child_by_field_name("value") {
        if value.kind() == "identifier" {
            let name = b.text(value);
            b.set_default_export(name);
            b.reference(value);
        } else if FUNCTION_VALUES.contains(&value.kind()) && value.child_by_field_name("name").is_some() {
            // `export default function App() {}` may parse as an expression.
            let before = b.symbol_count();
            function_declaration(ex, value, b);
            if before < b.symbol_count() {
                let name = b.symbol(before).name.clone();
                b.set_default_export(&name);
            }
        } else if let Some(first) = visit_declared(ex, value, b).first() {
            // `export default class Foo {}` parses as a named class expression.
            b.set_default_export(first);
        }
        return;
    }

    // `export { a, b as c }`
    for clause in children.iter().filter(|c| c.kind() == "export_clause") {
        let mut cursor = clause.walk();
        let specifiers: Vec<Node<'_>> = clause.named_children(&mut cursor).collect();
        for spec in specifiers {
            let Some(name) = spec.child_by_field_name("name") else {
                continue;
            };
            let local = b.text(name);
            b.reference(name);
            match spec.child_by_field_name("alias").map(|a| b.text(a)) {
                Some("default") => b.set_default_export(local),
                _ => b.mark_exported(local),
            }
        }
    }
}

/// Visit `node` and return the module-level names it declared.
fn visit_declared(ex: &dyn LanguageExtractor, node: Node<'_>, b: &mut FactsBuilder<'_>) -> Vec<String> {
    let before = b.symbol_count();
    ex.visit(node, b);
    (before..b.symbol_count())
        .map(|i| b.symbol(i))
        .filter(|s| s.parent.is_none() && s.scope == ScopeTree::ROOT)
        .map(|s| s.name.clone())
        .collect()
}

/// `export .. from "m"`: imports that also extend this module's surface.
fn reexport(node: Node<'_>, source: Node<'_>, children: &[Node<'_>], b: &mut FactsBuilder<'_>) {
    let module = unquote(b.text(source)).to_string();
    let module_range = ByteRange::new(source.start_byte(), source.end_byte());
    let range = source_range(node);

    for child in children {
        match child.kind() {
            "*" => b.import(ImportFact::new(module.as_str(), range, module_range).wildcard().reexport()),
            "namespace_export" => {
                let mut cursor = child.walk();
                let Some(name) = child.named_children(&mut cursor).next() else {
                    continue;
                };
                let local = unquote(b.text(name)).to_string();
                b.mark_exported(&local);
                b.import(
                    ImportFact::new(module.as_str(), range, module_range)
                        .local(local)
                        .reexport(),
                );
            }
            "export_clause" => {
                let mut cursor = child.walk();
                let specifiers: Vec<Node<'_>> = child.named_children(&mut cursor).collect();
                for spec in specifiers {
                    let Some(name) = spec.child_by_field_name("name") else {
                        continue;
                    };
                    let member = unquote(b.text(name));
                    let alias = spec.child_by_field_name("alias").map(|a| b.text(a).to_string());
                    let local = alias.clone().unwrap_or_else(|| member.to_string());
                    b.mark_exported(&local);
                    b.import(
                        ImportFact::new(module.as_str(), range, module_range)
                            .member(member)
                            .alias(alias)
                            .local(local)
                            .reexport(),
                    );
                }
            }
            _ => {}
        }
    }
}

fn member(ex: &dyn LanguageExtractor, node: Node<'_>, b: &mut FactsBuilder<'_>) {
    match member_chain(node, b.src(), MEMBER, "object", "property", IDENTIFIERS) {
        Some(chain) if b.is_self(&chain.name) && !chain.path.is_empty() => {
            b.self_member(&chain.path[0], chain.range);
        }
        Some(chain) if chain.name == "this" => {}
        Some(chain) => b.reference_path(chain.name, chain.path, chain.range),
        None => {
            let root = chain_root(node, MEMBER, "object");
            ex.visit(root, b);
        }
    }
}
