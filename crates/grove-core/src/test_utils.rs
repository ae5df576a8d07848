//! Test utilities for Grove

use crate::model::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A file node with an empty symbol list.
pub fn file_node(path: &str) -> GraphNode {
    let file_path = PathBuf::from(path);
    GraphNode {
        id: NodeId::default(),
        kind: NodeKind::File,
        name: file_path.file_name().map(|n| n.to_string_lossy().into_owned()),
        qualified_name: path.to_string(),
        language: Language::from_path(&file_path),
        file_path,
        range: SourceRange::default(),
        detail: NodeDetail::File {
            symbols: Vec::new(),
            imports: Vec::new(),
            error_ranges: Vec::new(),
        },
    }
}

/// A symbol node owned by `path`.
pub fn symbol_node(kind: NodeKind, name: &str, path: &str) -> GraphNode {
    let file_path = PathBuf::from(path);
    GraphNode {
        id: NodeId::default(),
        kind,
        name: Some(name.to_string()),
        qualified_name: name.to_string(),
        language: Language::from_path(&file_path),
        file_path,
        range: SourceRange::default(),
        detail: NodeDetail::Symbol {
            parent: None,
            exported: false,
        },
    }
}

pub fn import_node(module: &str, member: Option<&str>, path: &str) -> GraphNode {
    let file_path = PathBuf::from(path);
    GraphNode {
        id: NodeId::default(),
        kind: NodeKind::Import,
        name: Some(member.unwrap_or(module).to_string()),
        qualified_name: member.unwrap_or(module).to_string(),
        language: Language::from_path(&file_path),
        file_path,
        range: SourceRange::default(),
        detail: NodeDetail::Import {
            module: module.to_string(),
            member: member.map(str::to_string),
            alias: None,
            wildcard: false,
            binding: ImportBinding::Unresolved("not yet bound".to_string()),
        },
    }
}

/// Create a repository with a specific file structure
pub fn create_repo_with_structure(structure: &[(&str, &str)]) -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    write_files(temp_dir.path(), structure);
    temp_dir
}

pub fn write_files(root: &Path, structure: &[(&str, &str)]) {
    for (path, content) in structure {
        let full_path = root.join(path);

        // Create parent directories if needed
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).unwrap();
        }

        fs::write(&full_path, content).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_repo_with_structure() {
        let temp_dir = create_repo_with_structure(&[("pkg/a.py", "x = 1\n"), ("grove.toml", "")]);
        let root = temp_dir.path();

        assert!(root.join("pkg/a.py").exists());
        assert!(root.join("grove.toml").exists());
    }
}
