//! Java language extractor

use crate::cst::source_range;
use crate::extractor::{FactsBuilder, ImportFact, LanguageExtractor, NameRef, chain_root, member_chain};
use crate::scope::ScopeKind;
use grove_core::{ByteRange, Language, NodeKind};
use tree_sitter::Node;

const ACCESS: &[&str] = &["field_access"];
const IDENTIFIERS: &[&str] = &["identifier", "this"];

pub struct JavaExtractor;

impl LanguageExtractor for JavaExtractor {
    fn language(&self) -> Language {
        Language::Java
    }

    fn visit(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        match node.kind() {
            "package_declaration" => {
                let mut cursor = node.walk();
                let name = node
                    .named_children(&mut cursor)
                    .find(|c| matches!(c.kind(), "scoped_identifier" | "identifier"));
                if let Some(name) = name {
                    let package = b.text(name);
                    b.set_package(package);
                }
            }
            "import_declaration" => self.import(node, b),
            "class_declaration" | "interface_declaration" | "enum_declaration"
            | "record_declaration" | "annotation_type_declaration" => self.type_declaration(node, b),
            "method_declaration" | "constructor_declaration" | "compact_constructor_declaration" => {
                self.method(node, b)
            }
            "field_declaration" | "constant_declaration" => self.field(node, b),
            "enum_constant" => {
                b.visit_field(node, "arguments", self);
                b.visit_field(node, "body", self);
            }
            "local_variable_declaration" => {
                b.visit_field(node, "type", self);
                let mut cursor = node.walk();
                let declarators: Vec<Node<'_>> =
                    node.children_by_field_name("declarator", &mut cursor).collect();
                for declarator in declarators {
                    b.visit_field(declarator, "value", self);
                    if let Some(name) = declarator.child_by_field_name("name") {
                        b.bind_local(b.text(name));
                    }
                }
            }
            "lambda_expression" => b.in_anonymous(ScopeKind::Function, node, |b| {
                if let Some(params) = node.child_by_field_name("parameters") {
                    self.parameters(params, b);
                }
                b.visit_field(node, "body", self);
            }),
            "catch_clause" => b.in_anonymous(ScopeKind::Function, node, |b| {
                b.visit_children(node, self);
            }),
            "catch_formal_parameter" | "resource" | "enhanced_for_statement" => {
                b.visit_field(node, "type", self);
                b.visit_field(node, "value", self);
                if let Some(name) = node.child_by_field_name("name") {
                    b.bind_local(b.text(name));
                }
                let mut cursor = node.walk();
                let types: Vec<Node<'_>> = node
                    .named_children(&mut cursor)
                    .filter(|c| c.kind() == "catch_type")
                    .collect();
                for ty in types {
                    self.visit(ty, b);
                }
                b.visit_field(node, "body", self);
            }
            "method_invocation" => self.invocation(node, b),
            "field_access" => self.field_access(node, b),
            "identifier" | "type_identifier" => b.reference(node),
            "line_comment" | "block_comment" | "modifiers" | "string_literal" => {}
            _ => b.visit_children(node, self),
        }
    }
}

impl JavaExtractor {
    /// `import a.b.C;`, `import a.b.*;`, `import static a.b.C.m;`
    fn import(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        let mut cursor = node.walk();
        let Some(path) = node
            .named_children(&mut cursor)
            .find(|c| matches!(c.kind(), "scoped_identifier" | "identifier"))
        else {
            return;
        };
        let mut cursor = node.walk();
        let wildcard = node.children(&mut cursor).any(|c| c.kind() == "asterisk");
        let text = b.text(path);
        let module_range = ByteRange::new(path.start_byte(), path.end_byte());
        let range = source_range(node);

        let fact = if wildcard {
            ImportFact::new(text, range, module_range).wildcard()
        } else {
            match text.rsplit_once('.') {
                Some((module, member)) => ImportFact::new(module, range, module_range)
                    .member(member)
                    .local(member),
                None => ImportFact::new(text, range, module_range).local(text),
            }
        };
        b.import(fact);
    }

    fn type_declaration(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        let Some(name) = node.child_by_field_name("name") else {
            return b.visit_children(node, self);
        };
        let idx = b.define(NodeKind::Class, name, node, is_public(node, b));

        let mut cursor = node.walk();
        let heritage: Vec<Node<'_>> = node
            .named_children(&mut cursor)
            .filter(|c| matches!(c.kind(), "superclass" | "super_interfaces" | "extends_interfaces"))
            .collect();
        b.with_owner(idx, |b| {
            for clause in heritage {
                for base in type_refs(clause, b) {
                    b.add_base(idx, base.clone());
                    b.reference_path(base.name, base.path, base.range);
                }
            }
        });

        b.in_symbol(idx, ScopeKind::Class, node, |b| {
            if let Some(params) = node.child_by_field_name("parameters") {
                // Record components are fields.
                self.parameters(params, b);
            }
            b.visit_field(node, "body", self);
        });
    }

    fn method(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        let Some(name) = node.child_by_field_name("name") else {
            return b.visit_children(node, self);
        };
        b.visit_field(node, "type", self);
        let idx = b.define(NodeKind::Function, name, node, is_public(node, b));
        b.in_symbol(idx, ScopeKind::Function, node, |b| {
            if let Some(params) = node.child_by_field_name("parameters") {
                self.parameters(params, b);
            }
            b.visit_field(node, "body", self);
        });
    }

    fn parameters(&self, params: Node<'_>, b: &mut FactsBuilder<'_>) {
        if params.kind() == "identifier" {
            b.bind_local(b.text(params));
            return;
        }
        let mut cursor = params.walk();
        let children: Vec<Node<'_>> = params.named_children(&mut cursor).collect();
        for param in children {
            match param.kind() {
                "identifier" => b.bind_local(b.text(param)),
                "formal_parameter" => {
                    b.visit_field(param, "type", self);
                    if let Some(name) = param.child_by_field_name("name") {
                        b.bind_local(b.text(name));
                    }
                }
                "spread_parameter" => {
                    let mut cursor = param.walk();
                    let parts: Vec<Node<'_>> = param.named_children(&mut cursor).collect();
                    for part in parts {
                        match part.kind() {
                            "variable_declarator" => {
                                if let Some(name) = part.child_by_field_name("name") {
                                    b.bind_local(b.text(name));
                                }
                            }
                            _ => self.visit(part, b),
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn field(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        b.visit_field(node, "type", self);
        let exported = is_public(node, b);
        let mut cursor = node.walk();
        let declarators: Vec<Node<'_>> =
            node.children_by_field_name("declarator", &mut cursor).collect();
        for declarator in declarators {
            let Some(name) = declarator.child_by_field_name("name") else {
                continue;
            };
            let idx = b.define(NodeKind::Variable, name, node, exported);
            if let Some(value) = declarator.child_by_field_name("value") {
                b.with_owner(idx, |b| self.visit(value, b));
            }
        }
    }

    /// `m()` names a method in scope, `this.m()` a member of this class;
    /// `obj.m()` only uses `obj`.
    fn invocation(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        let name = node.child_by_field_name("name");
        match node.child_by_field_name("object") {
            None => {
                if let Some(name) = name {
                    b.reference(name);
                }
            }
            Some(object) if object.kind() == "this" => {
                if let (Some(name), true) = (name, b.is_self("this")) {
                    b.self_member(b.text(name), ByteRange::new(node.start_byte(), node.end_byte()));
                }
            }
            Some(object) => match member_chain(object, b.src(), ACCESS, "object", "field", &["identifier"]) {
                Some(mut chain) => {
                    if let Some(name) = name {
                        chain.path.push(b.text(name).to_string());
                    }
                    b.reference_path(chain.name, chain.path, chain.range);
                }
                None => self.visit(object, b),
            },
        }
        b.visit_field(node, "type_arguments", self);
        b.visit_field(node, "arguments", self);
    }

    fn field_access(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        match member_chain(node, b.src(), ACCESS, "object", "field", IDENTIFIERS) {
            Some(chain) if b.is_self(&chain.name) && !chain.path.is_empty() => {
                b.self_member(&chain.path[0], chain.range);
            }
            Some(chain) if chain.name == "this" => {}
            Some(chain) => b.reference_path(chain.name, chain.path, chain.range),
            None => {
                let root = chain_root(node, ACCESS, "object");
                self.visit(root, b);
            }
        }
    }
}

/// Named types in an `extends` / `implements` clause.
fn type_refs(clause: Node<'_>, b: &FactsBuilder<'_>) -> Vec<NameRef> {
    let mut refs = Vec::new();
    let mut stack = vec![clause];
    while let Some(node) = stack.pop() {
        match node.kind() {
            "type_identifier" => refs.push(NameRef {
                name: b.text(node).to_string(),
                path: Vec::new(),
                range: ByteRange::new(node.start_byte(), node.end_byte()),
            }),
            "generic_type" => {
                // The raw type only; arguments are not bases.
                let mut cursor = node.walk();
                if let Some(raw) = node
                    .named_children(&mut cursor)
                    .find(|c| matches!(c.kind(), "type_identifier" | "scoped_type_identifier"))
                {
                    stack.push(raw);
                }
            }
            "scoped_type_identifier" => {
                let segments: Vec<String> = b.text(node).split('.').map(|s| s.trim().to_string()).collect();
                if let Some((first, rest)) = segments.split_first() {
                    refs.push(NameRef {
                        name: first.clone(),
                        path: rest.to_vec(),
                        range: ByteRange::new(node.start_byte(), node.end_byte()),
                    });
                }
            }
            _ => {
                let mut cursor = node.walk();
                let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
                stack.extend(children.into_iter().rev());
            }
        }
    }
    refs
}

fn is_public(node: Node<'_>, b: &FactsBuilder<'_>) -> bool {
    let mut cursor = node.walk();
    let public = node
        .named_children(&mut cursor)
        .filter(|c| c.kind() == "modifiers")
        .any(|m| b.text(m).split_whitespace().any(|word| word == "public"));
    public
}
