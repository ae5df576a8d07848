//! Concrete syntax trees and the edit arithmetic needed for incremental reparse

use grove_core::{ByteRange, Language, SourceRange};
use std::sync::Arc;
use tree_sitter::{InputEdit, Node, Tree};

/// A parsed file: the tree plus the exact text it was parsed from.
///
/// Trees are replaced on reparse, never mutated in place; cloning is cheap.
#[derive(Clone)]
pub struct Cst {
    tree: Tree,
    text: Arc<str>,
    language: Language,
}

impl std::fmt::Debug for Cst {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cst")
            .field("language", &self.language)
            .field("root", &self.root_kind())
            .field("bytes", &self.text.len())
            .finish()
    }
}

impl Cst {
    pub(crate) fn new(tree: Tree, text: Arc<str>, language: Language) -> Self {
        Cst { tree, text, language }
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn text(&self) -> &Arc<str> {
        &self.text
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    pub fn root_kind(&self) -> &'static str {
        self.tree.root_node().kind()
    }

    pub fn has_errors(&self) -> bool {
        self.tree.root_node().has_error()
    }

    /// Byte ranges of `ERROR` and missing nodes, in source order.
    /// Errors nested inside an error node are not reported separately.
    pub fn error_ranges(&self) -> Vec<ByteRange> {
        let mut ranges = Vec::new();
        let mut stack = vec![self.tree.root_node()];
        while let Some(node) = stack.pop() {
            if node.is_error() || node.is_missing() {
                ranges.push(ByteRange::new(node.start_byte(), node.end_byte()));
                continue;
            }
            if !node.has_error() {
                continue;
            }
            let mut cursor = node.walk();
            stack.extend(node.children(&mut cursor));
        }
        ranges.sort();
        ranges
    }

    /// Kind of the smallest named node spanning `offset`.
    pub fn node_kind_at(&self, offset: usize) -> Option<&'static str> {
        if offset > self.text.len() {
            return None;
        }
        self.tree
            .root_node()
            .named_descendant_for_byte_range(offset, offset)
            .map(|n| n.kind())
    }
}

/// One text replacement: bytes `[start, old_end)` of the old text became
/// `[start, new_end)` of the new text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextEdit {
    pub start: usize,
    pub old_end: usize,
    pub new_end: usize,
}

impl TextEdit {
    pub fn replace(range: ByteRange, new_len: usize) -> Self {
        TextEdit {
            start: range.start,
            old_end: range.end,
            new_end: range.start + new_len,
        }
    }

    /// Tree-sitter edit descriptor, with row/column points computed from
    /// both versions of the text.
    pub fn input_edit(&self, old_text: &str, new_text: &str) -> InputEdit {
        InputEdit {
            start_byte: self.start,
            old_end_byte: self.old_end,
            new_end_byte: self.new_end,
            start_position: point_at(old_text, self.start),
            old_end_position: point_at(old_text, self.old_end),
            new_end_position: point_at(new_text, self.new_end),
        }
    }
}

/// Row/column of a byte offset, clamped to the end of the text.
pub fn point_at(text: &str, offset: usize) -> tree_sitter::Point {
    let offset = offset.min(text.len());
    let before = &text.as_bytes()[..offset];
    let row = before.iter().filter(|b| **b == b'\n').count();
    let column = match before.iter().rposition(|b| *b == b'\n') {
        Some(newline) => offset - newline - 1,
        None => offset,
    };
    tree_sitter::Point { row, column }
}

pub fn to_point(point: tree_sitter::Point) -> grove_core::Point {
    grove_core::Point::new(point.row, point.column)
}

pub fn source_range(node: Node<'_>) -> SourceRange {
    SourceRange {
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
        start: to_point(node.start_position()),
        end: to_point(node.end_position()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_at() {
        let text = "ab\ncd\n";
        assert_eq!(point_at(text, 0), tree_sitter::Point { row: 0, column: 0 });
        assert_eq!(point_at(text, 4), tree_sitter::Point { row: 1, column: 1 });
        assert_eq!(point_at(text, 99), tree_sitter::Point { row: 2, column: 0 });
    }

    #[test]
    fn test_input_edit_points() {
        let old = "x = 1\ny = 2\n";
        let new = "x = 1\nzz = 2\n";
        let edit = TextEdit::replace(ByteRange::new(6, 7), 2);
        let input = edit.input_edit(old, new);

        assert_eq!(input.start_byte, 6);
        assert_eq!(input.old_end_byte, 7);
        assert_eq!(input.new_end_byte, 8);
        assert_eq!(input.new_end_position, tree_sitter::Point { row: 1, column: 2 });
    }
}
