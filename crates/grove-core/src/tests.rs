//! Unit tests for grove-core module

use crate::test_utils::*;
use crate::*;
use std::path::{Path, PathBuf};

/// File `a.py` defining `f`, with the Defines edge in place.
fn graph_with_function() -> (Graph, NodeId, NodeId) {
    let mut graph = Graph::new();
    let file = graph.insert_node(file_node("a.py")).unwrap();
    let mut f = symbol_node(NodeKind::Function, "f", "a.py");
    f.range.end_byte = 14;
    let f = graph.insert_node(f).unwrap();
    graph
        .update_node(file, |n| {
            if let NodeDetail::File { symbols, .. } = &mut n.detail {
                symbols.push(f);
            }
        })
        .unwrap();
    graph
        .insert_edge(GraphEdge::structural(file, f, EdgeKind::Defines))
        .unwrap();
    (graph, file, f)
}

#[test]
fn test_insert_and_lookup() {
    let (graph, file, f) = graph_with_function();

    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.edge_count(), 1);
    assert_eq!(graph.file_node(Path::new("a.py")), Some(file));
    assert_eq!(graph.find_by_name("f"), vec![f]);
    assert!(graph.has_edge(file, f, EdgeKind::Defines));
    assert_eq!(graph.nodes_of_type(NodeKind::Function).count(), 1);
    assert_eq!(graph.edges_from(file).count(), 1);
    assert_eq!(graph.edges_to(f).count(), 1);
    graph.check_consistency().unwrap();
}

#[test]
fn test_edge_insert_is_idempotent() {
    let (mut graph, file, f) = graph_with_function();

    let again = graph
        .insert_edge(GraphEdge::structural(file, f, EdgeKind::Defines))
        .unwrap();
    assert!(!again);
    assert_eq!(graph.edge_count(), 1);

    graph
        .insert_edge(GraphEdge::structural(file, f, EdgeKind::References))
        .unwrap();
    assert_eq!(graph.edge_count(), 2);

    // Same key, different payload replaces the weight in place.
    let changed = graph.insert_edge(GraphEdge::dynamic(file, f, 0.5)).unwrap();
    assert!(changed);
    assert_eq!(graph.edge_count(), 2);
    let key = EdgeKey::new(file, f, EdgeKind::References);
    assert!(graph.edge(&key).unwrap().is_dynamic());
}

#[test]
fn test_edge_to_missing_node_is_rejected() {
    let (mut graph, file, _) = graph_with_function();

    let result = graph.insert_edge(GraphEdge::structural(file, NodeId(999), EdgeKind::References));
    assert!(matches!(result, Err(GraphError::DanglingEdge(_))));
    assert_eq!(graph.edge_count(), 1);
}

#[test]
fn test_remove_file_cascades() {
    let (mut graph, file, f) = graph_with_function();
    let other = graph.insert_node(file_node("b.py")).unwrap();
    graph
        .insert_edge(GraphEdge::structural(other, f, EdgeKind::References))
        .unwrap();

    graph.remove_node(file).unwrap();

    assert!(!graph.contains(f));
    assert!(graph.contains(other));
    assert_eq!(graph.edge_count(), 0);
    assert!(graph.find_by_name("f").is_empty());
    assert_eq!(graph.file_node(Path::new("a.py")), None);
    graph.check_consistency().unwrap();
}

#[test]
fn test_remove_symbol_updates_owner_and_bindings() {
    let (mut graph, file, f) = graph_with_function();
    let b = graph.insert_node(file_node("b.py")).unwrap();
    let mut import = import_node("a", Some("f"), "b.py");
    import.detail = NodeDetail::Import {
        module: "a".into(),
        member: Some("f".into()),
        alias: None,
        wildcard: false,
        binding: ImportBinding::Resolved(f),
    };
    let import = graph.insert_node(import).unwrap();
    graph
        .insert_edge(GraphEdge::structural(b, import, EdgeKind::Imports))
        .unwrap();
    graph
        .insert_edge(GraphEdge::structural(import, f, EdgeKind::Imports))
        .unwrap();

    graph.remove_node(f).unwrap();

    let file_symbols = match &graph.node(file).unwrap().detail {
        NodeDetail::File { symbols, .. } => symbols.clone(),
        other => panic!("unexpected detail {other:?}"),
    };
    assert!(file_symbols.is_empty());
    let binding = graph.node(import).unwrap().binding().cloned().unwrap();
    assert!(matches!(binding, ImportBinding::Unresolved(_)));
    graph.check_consistency().unwrap();
}

#[test]
fn test_ids_are_never_reused() {
    let mut graph = Graph::new();
    let first = graph.insert_node(file_node("a.py")).unwrap();
    graph.remove_node(first).unwrap();
    let second = graph.insert_node(file_node("a.py")).unwrap();

    assert_ne!(first, second);
    assert!(second > first);
}

#[test]
fn test_update_node_reindexes() {
    let (mut graph, file, f) = graph_with_function();

    let changed = graph
        .update_node(f, |n| n.name = Some("g".to_string()))
        .unwrap();
    assert!(changed);
    assert!(graph.find_by_name("f").is_empty());
    assert_eq!(graph.find_by_name("g"), vec![f]);

    graph
        .update_node(file, |n| n.file_path = PathBuf::from("a2.py"))
        .unwrap();
    assert_eq!(graph.file_node(Path::new("a2.py")), Some(file));
    assert_eq!(graph.file_node(Path::new("a.py")), None);
}

#[test]
fn test_journal_skips_noop_updates() {
    let (mut graph, _, f) = graph_with_function();
    graph.begin_journal();

    let changed = graph.update_node(f, |n| n.range.end_byte = 14).unwrap();
    assert!(!changed);
    assert!(graph.take_journal().is_empty());

    graph.begin_journal();
    graph.update_node(f, |n| n.range.end_byte = 20).unwrap();
    let delta = graph.take_journal();
    assert_eq!(delta.modified_nodes, vec![f]);
    assert_eq!(delta.mutation_count(), 1);
}

#[test]
fn test_journal_records_cascade() {
    let (mut graph, file, f) = graph_with_function();
    graph.begin_journal();
    graph.remove_node(file).unwrap();
    let delta = graph.take_journal();

    assert!(delta.removed_nodes.contains(&file));
    assert!(delta.removed_nodes.contains(&f));
    assert_eq!(delta.removed_edges, vec![EdgeKey::new(file, f, EdgeKind::Defines)]);
    insta::assert_json_snapshot!(delta.changed_nodes(), @r###"
    [
      1,
      2
    ]
    "###);
}

#[test]
fn test_duplicate_file_is_rejected() {
    let mut graph = Graph::new();
    graph.insert_node(file_node("a.py")).unwrap();
    let result = graph.insert_node(file_node("a.py"));
    assert!(matches!(result, Err(GraphError::InvalidOperation(_))));
}

#[test]
fn test_stable_key_ignores_ids() {
    let mut a = symbol_node(NodeKind::Function, "f", "pkg/a.py");
    let mut b = a.clone();
    a.id = NodeId(3);
    b.id = NodeId(42);
    assert_eq!(a.stable_key(), b.stable_key());
    assert_eq!(a.stable_key(), "function:pkg/a.py:f@0");
}

#[test]
fn test_language_detection() {
    let test_cases = vec![
        ("test.rs", Language::Rust),
        ("main.ts", Language::TypeScript),
        ("view.tsx", Language::TypeScript),
        ("app.js", Language::JavaScript),
        ("lib.py", Language::Python),
        ("main.go", Language::Go),
        ("Main.java", Language::Java),
        ("unknown.xyz", Language::Other),
    ];

    for (filename, expected) in test_cases {
        let detected = Language::from_path(Path::new(filename));
        assert_eq!(detected, expected, "Failed for {}", filename);
    }
}

#[test]
fn test_normalize_path() {
    assert_eq!(normalize_path(Path::new("./pkg/../a.py")), Some(PathBuf::from("a.py")));
    assert_eq!(normalize_path(Path::new("pkg/sub/./b.py")), Some(PathBuf::from("pkg/sub/b.py")));
    assert_eq!(normalize_path(Path::new("../outside.py")), None);
    assert_eq!(display_path(Path::new("pkg/sub/b.py")), "pkg/sub/b.py");
}

#[test]
fn test_config_from_toml() {
    let config = EngineConfig::from_toml_str(
        r#"
        root = "project"
        write_through = true
        exclude = ["vendor/**"]

        [languages.python]
        source_roots = ["src"]
        resolution_order = ["source_roots", "package_relative"]

        [languages.go]
        module_prefix = "example.com/app"
        "#,
    )
    .unwrap();

    assert_eq!(config.root, PathBuf::from("project"));
    assert!(config.write_through);
    let python = config.language(Language::Python);
    assert_eq!(python.source_roots, vec![PathBuf::from("src")]);
    assert_eq!(
        python.resolution_order,
        vec![ResolutionStep::SourceRoots, ResolutionStep::PackageRelative]
    );
    let go = config.language(Language::Go);
    assert_eq!(go.module_prefix.as_deref(), Some("example.com/app"));
    assert_eq!(go.source_roots, vec![PathBuf::from(".")]);
    // Unlisted languages fall back to defaults.
    assert_eq!(config.language(Language::Java), LanguageConfig::default());
    assert!(config.exclude_set().unwrap().is_match("vendor/lib/x.py"));
}

#[test]
fn test_config_rejects_bad_values() {
    let empty_order = EngineConfig::from_toml_str(
        r#"
        [languages.python]
        resolution_order = []
        "#,
    );
    assert!(matches!(empty_order, Err(ConfigError::Invalid(_))));

    let bad_glob = EngineConfig::from_toml_str(r#"exclude = ["a/[b"]"#);
    assert!(matches!(bad_glob, Err(ConfigError::Glob { .. })));
}

#[test]
fn test_config_load_resolves_root() {
    let dir = create_repo_with_structure(&[("grove.toml", "root = \"src\"\n")]);
    let config = EngineConfig::load(&dir.path().join("grove.toml")).unwrap();
    assert_eq!(config.root, dir.path().join("src"));
}
