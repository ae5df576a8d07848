//! Integration tests for Grove
//!
//! These drive whole projects through the public API: loading from disk,
//! transactions with write-through, concurrent readers and the async path.

use grove::{
    ByteRange, EditTransaction, EdgeKind, Engine, EngineConfig, FileAddTransaction,
    FileRemoveTransaction, FileRenameTransaction, ImportBinding, NodeId, RejectReason, Snapshot,
    TransactionResult, open_project,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("grove=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Write `files` under a fresh temporary directory.
fn project(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (path, content) in files {
        let full = dir.path().join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }
    dir
}

fn write_through(root: &Path) -> EngineConfig {
    EngineConfig {
        write_through: true,
        parser_workers: 2,
        ..EngineConfig::for_root(root)
    }
}

fn symbol(snapshot: &Snapshot, path: &str, name: &str) -> NodeId {
    snapshot
        .find_by_name(name, Some(&grove::SearchScope::File(path.into())))
        .first()
        .map(|n| n.id)
        .unwrap_or_else(|| panic!("no {name} in {path}"))
}

fn assert_consistent(snapshot: &Snapshot) {
    let graph = snapshot.workspace().graph();
    graph.check_consistency().unwrap();
    for edge in graph.all_edges() {
        assert!(graph.contains(edge.source), "dangling source in {:?}", edge);
        assert!(graph.contains(edge.target), "dangling target in {:?}", edge);
    }
}

const A_PY: &str = "def f():\n    return 1\n";
const B_PY: &str = "from a import f\n\ndef g():\n    return f()\n";

#[test]
fn test_open_indexes_supported_files() {
    init_tracing();
    let dir = project(&[
        ("a.py", A_PY),
        ("b.py", B_PY),
        ("web/util.ts", "export function fmt(x: number): string { return `${x}`; }\n"),
        ("web/app.ts", "import { fmt } from './util';\nexport const label = fmt(1);\n"),
        ("src/main.rs", "mod util;\nuse crate::util::helper;\n\nfn main() { helper(); }\n"),
        ("src/util.rs", "pub fn helper() {}\n"),
        ("README.md", "# not code\n"),
        ("node_modules/dep/index.js", "export const x = 1;\n"),
    ]);
    let engine = Engine::open(EngineConfig::for_root(dir.path())).unwrap();
    let snapshot = engine.snapshot();

    assert_eq!(snapshot.stats().files, 6);
    assert!(snapshot.get_file("README.md").is_none());
    assert!(snapshot.get_file("node_modules/dep/index.js").is_none());

    let fmt = symbol(&snapshot, "web/util.ts", "fmt");
    assert_eq!(
        snapshot.imports_of("web/app.ts")[0].binding,
        ImportBinding::Resolved(fmt)
    );
    let helper = symbol(&snapshot, "src/util.rs", "helper");
    assert!(
        snapshot
            .imports_of("src/main.rs")
            .iter()
            .any(|i| i.binding == ImportBinding::Resolved(helper))
    );
    assert!(!snapshot.usages_of(helper).is_empty());
    assert_consistent(&snapshot);
}

#[test]
fn test_open_project_reads_config_file() {
    let dir = project(&[
        (
            "grove.toml",
            "exclude = [\"generated/**\"]\n\n[languages.python]\nsource_roots = [\"src\"]\n",
        ),
        ("src/lib/tools.py", "def tool():\n    pass\n"),
        ("app.py", "from lib.tools import tool\n\ntool()\n"),
        ("generated/out.py", "x = 1\n"),
    ]);
    let engine = open_project(dir.path()).unwrap();
    let snapshot = engine.snapshot();

    assert!(snapshot.get_file("generated/out.py").is_none());
    let tool = symbol(&snapshot, "src/lib/tools.py", "tool");
    assert_eq!(
        snapshot.imports_of("app.py")[0].binding,
        ImportBinding::Resolved(tool)
    );
}

#[test]
fn test_config_validation() {
    let config = EngineConfig::from_toml_str(
        "write_through = true\nedit_history = 8\n\n[languages.go]\nmodule_prefix = \"example.com/app\"\n",
    )
    .unwrap();
    assert!(config.write_through);
    assert_eq!(config.edit_history, 8);
    assert_eq!(
        config.language(grove::Language::Go).module_prefix.as_deref(),
        Some("example.com/app")
    );

    assert!(EngineConfig::from_toml_str("exclude = [\"[\"]\n").is_err());
    assert!(
        EngineConfig::from_toml_str("[languages.python]\nresolution_order = []\n").is_err()
    );
}

#[test]
fn test_delete_symbol_scenario() {
    let dir = project(&[("a.py", A_PY), ("b.py", B_PY)]);
    let engine = Engine::open(write_through(dir.path())).unwrap();
    let before = engine.snapshot();
    let f = symbol(&before, "a.py", "f");

    let result = engine.submit(EditTransaction::new(
        "a.py",
        ByteRange::new(0, A_PY.len()),
        "def other():\n    return 2\n",
    ));
    assert!(result.is_committed(), "{:?}", result);

    let after = engine.snapshot();
    assert_eq!(
        after.imports_of("b.py")[0].binding,
        ImportBinding::Unresolved("f not found in a".to_string())
    );
    assert!(after.usages_of(f).is_empty());
    let g = symbol(&after, "b.py", "g");
    assert!(
        after
            .workspace()
            .graph()
            .edges_from(g)
            .all(|e| e.kind != EdgeKind::References)
    );
    assert_eq!(
        fs::read_to_string(dir.path().join("a.py")).unwrap(),
        "def other():\n    return 2\n"
    );
    assert_consistent(&after);
}

#[test]
fn test_rename_scenario_with_write_through() {
    let dir = project(&[("a.py", A_PY), ("b.py", B_PY)]);
    let engine = Engine::open(write_through(dir.path())).unwrap();
    let f = symbol(&engine.snapshot(), "a.py", "f");

    let result = engine.submit(FileRenameTransaction::new("a.py", "a2.py"));
    let commit = result.commit().expect("rename commits");
    assert!(commit.changed.contains(&f));

    assert!(!dir.path().join("a.py").exists());
    assert_eq!(fs::read_to_string(dir.path().join("a2.py")).unwrap(), A_PY);
    assert_eq!(
        fs::read_to_string(dir.path().join("b.py")).unwrap(),
        "from a2 import f\n\ndef g():\n    return f()\n"
    );

    let snapshot = engine.snapshot();
    assert_eq!(symbol(&snapshot, "a2.py", "f"), f);
    assert_eq!(snapshot.imports_of("b.py")[0].binding, ImportBinding::Resolved(f));
    assert_consistent(&snapshot);
}

#[test]
fn test_js_rename_rewrites_relative_specifier() {
    let engine = Engine::from_sources(
        EngineConfig::for_root("/virtual"),
        [
            ("src/util.js", "export function fmt() {}\n"),
            ("src/app/main.js", "import { fmt } from '../util';\nfmt();\n"),
        ],
    )
    .unwrap();
    let fmt = symbol(&engine.snapshot(), "src/util.js", "fmt");

    let result = engine.submit(FileRenameTransaction::new("src/util.js", "src/shared/util.js"));
    assert!(result.is_committed(), "{:?}", result);

    let snapshot = engine.snapshot();
    assert_eq!(
        snapshot.source("src/app/main.js").unwrap().text().as_ref(),
        "import { fmt } from '../shared/util';\nfmt();\n"
    );
    assert_eq!(
        snapshot.imports_of("src/app/main.js")[0].binding,
        ImportBinding::Resolved(fmt)
    );
}

#[test]
fn test_import_cycle_scenario() {
    let dir = project(&[
        ("x.py", "import y\n\ndef a():\n    return y.b()\n"),
        ("y.py", "import x\n\ndef b():\n    return x.a()\n"),
    ]);
    let engine = Engine::open(EngineConfig::for_root(dir.path())).unwrap();
    let snapshot = engine.snapshot();

    let cycles = snapshot.import_cycles();
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0], vec![PathBuf::from("x.py"), PathBuf::from("y.py")]);

    // `y.b` follows the module binding to the function.
    let a = symbol(&snapshot, "x.py", "a");
    let b = symbol(&snapshot, "y.py", "b");
    assert_eq!(snapshot.usages_of(b)[0].user, a);
    assert_eq!(snapshot.usages_of(a)[0].user, b);

    // Breaking the cycle removes it from the report.
    let result = engine.submit(EditTransaction::new(
        "y.py",
        ByteRange::new(0, "import x\n".len()),
        "",
    ));
    assert!(result.is_committed());
    assert!(engine.snapshot().import_cycles().is_empty());
}

#[test]
fn test_failed_disk_write_rolls_back() {
    let dir = project(&[("a.py", A_PY), ("b.py", B_PY)]);
    // A directory where the renamed file would go makes the write fail.
    fs::create_dir_all(dir.path().join("a2.py")).unwrap();
    let engine = Engine::open(write_through(dir.path())).unwrap();
    let before = engine.snapshot();

    let result = engine.submit(FileRenameTransaction::new("a.py", "a2.py"));
    let TransactionResult::Rejected(rejection) = &result else {
        panic!("expected rejection, got {:?}", result);
    };
    assert_eq!(rejection.reason, RejectReason::Io);

    // Files already touched were restored and the graph never changed.
    assert_eq!(fs::read_to_string(dir.path().join("a.py")).unwrap(), A_PY);
    assert_eq!(fs::read_to_string(dir.path().join("b.py")).unwrap(), B_PY);
    let after = engine.snapshot();
    assert_eq!(after.sequence(), before.sequence());
    assert_eq!(after.edge_triples(), before.edge_triples());
    assert!(after.get_file("a.py").is_some());
}

#[test]
fn test_graph_stays_consistent_through_edit_sequence() {
    let engine = Engine::from_sources(
        EngineConfig::for_root("/virtual"),
        [("a.py", A_PY), ("b.py", B_PY)],
    )
    .unwrap();
    let steps: Vec<grove::Transaction> = vec![
        FileAddTransaction::new("c.py", "from b import g\n\nclass C:\n    def run(self):\n        return g()\n").into(),
        EditTransaction::new("a.py", ByteRange::new(0, 0), "import os\n").into(),
        FileRemoveTransaction::new("b.py").into(),
        FileAddTransaction::new("b.py", "def g():\n    pass\n").into(),
        FileRenameTransaction::new("c.py", "pkg/c.py").into(),
        EditTransaction::new("a.py", ByteRange::new(0, 10), "").into(),
        FileRemoveTransaction::new("a.py").into(),
    ];
    let mut last = engine.snapshot().sequence();
    for step in steps {
        let result = engine.submit(step);
        let commit = result.commit().unwrap_or_else(|| panic!("{:?}", result));
        assert_eq!(commit.sequence, last + 1);
        last = commit.sequence;
        let snapshot = engine.snapshot();
        assert_consistent(&snapshot);
        for path in snapshot.workspace().paths() {
            assert_eq!(engine.resync(path).unwrap(), 0, "{}", path.display());
        }
    }
}

#[test]
fn test_incremental_matches_fresh_build() {
    let engine = Engine::from_sources(
        EngineConfig::for_root("/virtual"),
        [("a.py", A_PY), ("b.py", B_PY), ("c.py", "from b import g\n")],
    )
    .unwrap();
    let edit = EditTransaction::new("a.py", ByteRange::new(4, 5), "f2");
    assert!(engine.submit(edit).is_committed());
    let fix = EditTransaction::new("b.py", ByteRange::new(14, 15), "f2");
    assert!(engine.submit(fix).is_committed());

    let rebuilt = Engine::from_sources(
        EngineConfig::for_root("/virtual"),
        engine
            .snapshot()
            .workspace()
            .files()
            .map(|f| (f.path().to_path_buf(), f.text().to_string()))
            .collect::<Vec<_>>(),
    )
    .unwrap();
    assert_eq!(
        engine.snapshot().edge_triples(),
        rebuilt.snapshot().edge_triples()
    );
}

#[test]
fn test_readers_never_see_partial_state() {
    let engine = Engine::from_sources(
        EngineConfig::for_root("/virtual"),
        [("a.py", A_PY), ("b.py", B_PY)],
    )
    .unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                let mut seen = 0;
                while !done.load(Ordering::SeqCst) {
                    let snapshot = engine.snapshot();
                    assert_consistent(&snapshot);
                    // Either both files are there or the pair was swapped whole.
                    let files = snapshot.stats().files;
                    assert!(files == 2 || files == 3, "{files} files");
                    seen += 1;
                }
                seen
            })
        })
        .collect();

    for round in 0..20 {
        let path = format!("extra{round}.py");
        let add = engine.submit(FileAddTransaction::new(path.as_str(), "from a import f\nf()\n"));
        assert!(add.is_committed());
        let remove = engine.submit(FileRemoveTransaction::new(path.as_str()));
        assert!(remove.is_committed());
    }
    done.store(true, Ordering::SeqCst);
    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }
}

#[tokio::test]
async fn test_async_submission() {
    let engine = Engine::from_sources(EngineConfig::for_root("/virtual"), [("a.py", A_PY)]).unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .submit_async(FileAddTransaction::new(
                        format!("m{i}.py"),
                        "from a import f\n\ndef use():\n    return f()\n",
                    ))
                    .await
            })
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap().is_committed());
    }

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.stats().files, 9);
    assert_eq!(snapshot.usages_of(symbol(&snapshot, "a.py", "f")).len(), 8);
    assert_eq!(snapshot.sequence(), 9);
}

#[test]
fn test_parse_errors_are_recovered() {
    let engine = Engine::from_sources(
        EngineConfig::for_root("/virtual"),
        [("broken.py", "def ok():\n    return 1\n\ndef broken(:\n    pass\n")],
    )
    .unwrap();
    let snapshot = engine.snapshot();
    assert!(snapshot.source("broken.py").unwrap().has_errors());
    assert_eq!(snapshot.stats().files_with_errors, 1);
    assert!(!snapshot.find_by_name("ok", None).is_empty());

    let fixed = EditTransaction::new("broken.py", ByteRange::new(35, 36), "x):");
    assert!(engine.submit(fixed).is_committed());
    assert!(!engine.snapshot().source("broken.py").unwrap().has_errors());
}

#[test]
fn test_imports_snapshot() {
    let engine = Engine::from_sources(
        EngineConfig::for_root("/virtual"),
        [
            ("a.py", A_PY),
            (
                "main.py",
                "import os\nfrom a import f\nfrom a import missing\nfrom .nowhere import x\n",
            ),
        ],
    )
    .unwrap();
    let snapshot = engine.snapshot();
    let imports: Vec<(String, Option<String>, String)> = snapshot
        .imports_of("main.py")
        .into_iter()
        .map(|i| {
            let binding = match i.binding {
                ImportBinding::Resolved(id) => {
                    format!("resolved {}", snapshot.node(id).unwrap().qualified_name)
                }
                ImportBinding::Unresolved(reason) => format!("unresolved: {reason}"),
                ImportBinding::External(module) => format!("external {module}"),
            };
            (i.module, i.member, binding)
        })
        .collect();
    insta::assert_json_snapshot!(imports, @r#"
    [
      [
        "os",
        null,
        "external os"
      ],
      [
        "a",
        "f",
        "resolved f"
      ],
      [
        "a",
        "missing",
        "unresolved: missing not found in a"
      ],
      [
        ".nowhere",
        "x",
        "unresolved: module .nowhere not found"
      ]
    ]
    "#);
}
