//! TypeScript extractor: type-level declarations on top of the JavaScript walk

use super::javascript::{heritage_clause, type_name, visit_common};
use crate::extractor::{FactsBuilder, LanguageExtractor};
use crate::scope::ScopeKind;
use grove_core::{Language, NodeKind};
use tree_sitter::Node;

pub struct TypeScriptExtractor;

impl LanguageExtractor for TypeScriptExtractor {
    fn language(&self) -> Language {
        Language::TypeScript
    }

    fn visit(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        match node.kind() {
            "interface_declaration" => self.interface(node, b),
            "type_alias_declaration" | "enum_declaration" => self.type_declaration(node, b),
            "type_identifier" => b.reference(node),
            "nested_type_identifier" => match type_name(node, b) {
                Some(name) => b.reference_path(name.name, name.path, name.range),
                None => b.visit_children(node, self),
            },
            "predefined_type" | "literal_type" | "property_signature_name" => {}
            "property_signature" => {
                // Interface members are part of the type, not symbols.
                b.visit_field(node, "type", self);
            }
            "internal_module" | "module" => b.visit_field(node, "body", self),
            "ambient_declaration" => b.visit_children(node, self),
            _ => visit_common(self, node, b),
        }
    }
}

impl TypeScriptExtractor {
    fn interface(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        let Some(name) = node.child_by_field_name("name") else {
            return b.visit_children(node, self);
        };
        let idx = b.define(NodeKind::Class, name, node, false);
        b.visit_field(node, "type_parameters", self);

        let mut cursor = node.walk();
        let extends: Vec<Node<'_>> = node
            .named_children(&mut cursor)
            .filter(|c| c.kind() == "extends_type_clause")
            .collect();
        b.with_owner(idx, |b| {
            for clause in extends {
                heritage_clause(self, idx, clause, b);
            }
        });

        b.in_symbol(idx, ScopeKind::Class, node, |b| {
            b.visit_field(node, "body", self);
        });
    }

    /// `type T = ..` and `enum E {..}` are class-like symbols.
    fn type_declaration(&self, node: Node<'_>, b: &mut FactsBuilder<'_>) {
        let Some(name) = node.child_by_field_name("name") else {
            return b.visit_children(node, self);
        };
        let idx = b.define(NodeKind::Class, name, node, false);
        b.in_symbol(idx, ScopeKind::Class, node, |b| {
            b.visit_field(node, "type_parameters", self);
            b.visit_field(node, "value", self);
            b.visit_field(node, "body", self);
        });
    }
}
