//! Unit tests for grove-engine

use crate::engine::Engine;
use crate::query::{SearchScope, Snapshot};
use crate::resolve::{SELF_MEMBER_CONFIDENCE, STRING_LOOKUP_CONFIDENCE};
use crate::transaction::{
    EditTransaction, FileAddTransaction, FileRemoveTransaction, FileRenameTransaction,
    RejectReason, TransactionResult, TransactionState,
};
use grove_core::{ByteRange, EdgeKind, EngineConfig, ImportBinding, NodeId, NodeKind};
use std::path::Path;

fn engine(files: &[(&str, &str)]) -> Engine {
    let config = EngineConfig {
        parser_workers: 2,
        ..EngineConfig::for_root("/project")
    };
    Engine::from_sources(config, files.iter().copied()).unwrap()
}

fn symbol(snapshot: &Snapshot, path: &str, qualified: &str) -> NodeId {
    let name = qualified.rsplit('.').next().unwrap_or(qualified);
    snapshot
        .find_by_name(name, Some(&SearchScope::File(path.into())))
        .into_iter()
        .find(|n| n.qualified_name == qualified)
        .map(|n| n.id)
        .unwrap_or_else(|| panic!("no symbol {qualified} in {path}"))
}

fn binding(snapshot: &Snapshot, path: &str, idx: usize) -> ImportBinding {
    snapshot.imports_of(path)[idx].binding.clone()
}

fn rejection(result: &TransactionResult) -> RejectReason {
    result
        .rejection()
        .unwrap_or_else(|| panic!("expected a rejection, got {:?}", result))
        .reason
}

const A_PY: &str = "def f():\n    return 1\n\ndef unused():\n    pass\n";
const B_PY: &str = "from a import f\n\ndef g():\n    return f()\n";

#[test]
fn test_python_import_binds_and_links() {
    let engine = engine(&[("a.py", A_PY), ("b.py", B_PY)]);
    let snapshot = engine.snapshot();

    let f = symbol(&snapshot, "a.py", "f");
    let g = symbol(&snapshot, "b.py", "g");
    assert_eq!(binding(&snapshot, "b.py", 0), ImportBinding::Resolved(f));

    let usages = snapshot.usages_of(f);
    assert_eq!(usages.len(), 1);
    assert_eq!(usages[0].user, g);
    assert!(!usages[0].is_dynamic());

    assert_eq!(snapshot.is_dead(f), Some(false));
    assert_eq!(snapshot.is_dead(symbol(&snapshot, "a.py", "unused")), Some(true));
    assert_eq!(snapshot.is_dead(snapshot.get_file("a.py").unwrap().id), None);
}

#[test]
fn test_deleting_symbol_unbinds_importer() {
    let engine = engine(&[("a.py", A_PY), ("b.py", B_PY)]);
    let before = engine.snapshot();
    let f = symbol(&before, "a.py", "f");
    let g = symbol(&before, "b.py", "g");

    // Drop `def f` (and the blank line after it).
    let end = A_PY.find("def unused").unwrap();
    let result = engine.submit(EditTransaction::new("a.py", ByteRange::new(0, end), ""));
    let commit = result.commit().expect("edit commits").clone();
    assert!(commit.changed.contains(&f));

    let after = engine.snapshot();
    assert!(after.get_symbol(f).is_none());
    assert_eq!(
        binding(&after, "b.py", 0),
        ImportBinding::Unresolved("f not found in a".to_string())
    );
    assert!(
        after
            .workspace()
            .graph()
            .edges_from(g)
            .all(|e| e.kind != EdgeKind::References)
    );
    // The old snapshot is untouched.
    assert_eq!(before.usages_of(f).len(), 1);
}

#[test]
fn test_adding_target_file_resolves_importer() {
    let engine = engine(&[("b.py", B_PY)]);
    assert_eq!(
        binding(&engine.snapshot(), "b.py", 0),
        ImportBinding::External("a".to_string())
    );
    assert_eq!(engine.snapshot().stats().external_modules, 1);

    let result = engine.submit(FileAddTransaction::new("a.py", A_PY));
    assert!(result.is_committed());

    let snapshot = engine.snapshot();
    let f = symbol(&snapshot, "a.py", "f");
    assert_eq!(binding(&snapshot, "b.py", 0), ImportBinding::Resolved(f));
    // Nothing points at the placeholder any more.
    assert_eq!(snapshot.stats().external_modules, 0);
}

#[test]
fn test_removing_file_cascades() {
    let engine = engine(&[
        ("a.js", "export function f() { return 1; }\n"),
        ("b.js", "import { f } from './a';\nexport function g() { return f(); }\n"),
    ]);
    let f = symbol(&engine.snapshot(), "a.js", "f");

    let result = engine.submit(FileRemoveTransaction::new("a.js"));
    assert!(result.is_committed());

    let snapshot = engine.snapshot();
    assert!(snapshot.get_file("a.js").is_none());
    assert!(snapshot.node(f).is_none());
    assert!(matches!(
        binding(&snapshot, "b.js", 0),
        ImportBinding::Unresolved(reason) if reason.contains("./a")
    ));
    assert!(snapshot.workspace().graph().check_consistency().is_ok());
}

#[test]
fn test_edits_keep_symbol_ids() {
    let source = "class Shape:\n    def area(self):\n        return 0\n\ndef total(x):\n    return x\n";
    let engine = engine(&[("m.py", source)]);
    let before = engine.snapshot();
    let shape = symbol(&before, "m.py", "Shape");
    let area = symbol(&before, "m.py", "Shape.area");
    let total = symbol(&before, "m.py", "total");

    // Body edit.
    let at = source.find("return 0").unwrap();
    let edit = EditTransaction::new("m.py", ByteRange::new(at, at + 8), "return 42");
    assert!(engine.submit(edit).is_committed());

    // Rename `total` to `sum_all`, body unchanged.
    let text = engine.snapshot().source("m.py").unwrap().text().clone();
    let at = text.find("def total").unwrap() + 4;
    let rename = EditTransaction::new("m.py", ByteRange::new(at, at + 5), "sum_all");
    assert!(engine.submit(rename).is_committed());

    let after = engine.snapshot();
    assert_eq!(symbol(&after, "m.py", "Shape"), shape);
    assert_eq!(symbol(&after, "m.py", "Shape.area"), area);
    assert_eq!(symbol(&after, "m.py", "sum_all"), total);
}

#[test]
fn test_dynamic_member_references() {
    let source = r#"
class Service:
    def start(self):
        self.helper()
        getattr(self, "stop")

    def helper(self):
        pass

    def stop(self):
        pass
"#;
    let engine = engine(&[("svc.py", source)]);
    let snapshot = engine.snapshot();
    let start = symbol(&snapshot, "svc.py", "Service.start");

    let helper = snapshot.usages_of(symbol(&snapshot, "svc.py", "Service.helper"));
    assert_eq!(helper.len(), 1);
    assert_eq!(helper[0].user, start);
    assert!(helper[0].is_dynamic());
    assert_eq!(helper[0].confidence, SELF_MEMBER_CONFIDENCE);

    let stop = snapshot.usages_of(symbol(&snapshot, "svc.py", "Service.stop"));
    assert_eq!(stop.len(), 1);
    assert_eq!(stop[0].confidence, STRING_LOOKUP_CONFIDENCE);
    assert_eq!(snapshot.stats().dynamic_edges, 2);
}

#[test]
fn test_inheritance_edges() {
    let engine = engine(&[
        ("base.py", "class Base:\n    def run(self):\n        pass\n"),
        (
            "child.py",
            "from base import Base\n\nclass Child(Base):\n    def go(self):\n        self.run()\n",
        ),
    ]);
    let snapshot = engine.snapshot();
    let base = symbol(&snapshot, "base.py", "Base");
    let child = symbol(&snapshot, "child.py", "Child");
    assert!(
        snapshot
            .workspace()
            .graph()
            .has_edge(child, base, EdgeKind::Inherits)
    );
    let run = snapshot.usages_of(symbol(&snapshot, "base.py", "Base.run"));
    assert_eq!(run.len(), 1);
    assert!(run[0].confidence < SELF_MEMBER_CONFIDENCE);
}

#[test]
fn test_stale_range_in_batch_is_rejected() {
    let source = "x = 1\ny = 2\nz = 3\n";
    let engine = engine(&[("m.py", source)]);

    // Both ranges were computed against the same content. The first edit
    // lands on line 2 and shifts line 3; the line 1 edit is unaffected.
    let results = engine.submit_batch([
        EditTransaction::new("m.py", ByteRange::new(6, 11), "y = 200").with_priority(10),
        EditTransaction::new("m.py", ByteRange::new(12, 17), "z = 300"),
        EditTransaction::new("m.py", ByteRange::new(0, 5), "x = 100"),
    ]);
    assert!(results[0].is_committed());
    assert_eq!(rejection(&results[1]), RejectReason::StaleRange);
    assert!(results[2].is_committed());

    let text = engine.snapshot().source("m.py").unwrap().text().to_string();
    assert_eq!(text, "x = 100\ny = 200\nz = 3\n");
}

#[test]
fn test_based_on_older_snapshot_is_stale() {
    let engine = engine(&[("m.py", "x = 1\ny = 2\n")]);
    let base = engine.snapshot().sequence();
    assert!(
        engine
            .submit(EditTransaction::new("m.py", ByteRange::new(0, 5), "x = 10"))
            .is_committed()
    );

    let stale = EditTransaction::new("m.py", ByteRange::new(6, 11), "y = 20").based_on(base);
    assert_eq!(rejection(&engine.submit(stale)), RejectReason::StaleRange);

    let fresh = engine.snapshot().sequence();
    let current = EditTransaction::new("m.py", ByteRange::new(7, 12), "y = 20").based_on(fresh);
    assert!(engine.submit(current).is_committed());
}

#[test]
fn test_edit_queued_during_a_batch_sees_earlier_commits() {
    let engine = engine(&[("m.py", "x = 1\ny = 2\n")]);
    let first = engine.enqueue(EditTransaction::new("m.py", ByteRange::new(0, 5), "x = 1000").with_priority(10));
    let first_id = first.id();
    let backlog: Vec<_> = (0..40)
        .map(|i| engine.enqueue(FileAddTransaction::new(format!("f{i}.py"), "def h():\n    return 1\n")))
        .collect();

    let worker = engine.clone();
    let batch = std::thread::spawn(move || worker.process_pending());

    // The line 1 edit has shifted line 2; this range is read after it landed.
    while !engine.status(first_id).is_some_and(TransactionState::is_terminal) {
        std::thread::yield_now();
    }
    assert_eq!(engine.status(first_id), Some(TransactionState::Committed));
    let text = engine.snapshot().source("m.py").unwrap().text().to_string();
    let at = text.find("y = 2").unwrap();
    let second = engine.submit(EditTransaction::new("m.py", ByteRange::new(at, at + 5), "y = 20"));
    assert!(second.is_committed(), "{:?}", second);

    batch.join().unwrap();
    assert!(first.wait().is_committed());
    assert!(backlog.into_iter().all(|h| h.wait().is_committed()));
    let text = engine.snapshot().source("m.py").unwrap().text().to_string();
    assert_eq!(text, "x = 1000\ny = 20\n");
}

#[test]
fn test_priority_orders_application() {
    let engine = engine(&[]);
    let results = engine.submit_batch([
        FileAddTransaction::new("low.py", "a = 1\n"),
        FileAddTransaction::new("high.py", "b = 1\n").with_priority(5),
        FileAddTransaction::new("low2.py", "c = 1\n"),
    ]);
    let sequence = |idx: usize| results[idx].commit().unwrap().sequence;
    assert!(sequence(1) < sequence(0));
    assert!(sequence(0) < sequence(2));
}

#[test]
fn test_cancel_only_while_queued() {
    let engine = engine(&[]);
    let handle = engine.enqueue(FileAddTransaction::new("a.py", "x = 1\n"));
    let id = handle.id();
    assert_eq!(engine.status(id), Some(TransactionState::Queued));

    assert!(engine.cancel(id));
    assert!(!engine.cancel(id));
    assert_eq!(engine.status(id), Some(TransactionState::Rejected));
    assert_eq!(rejection(&handle.wait()), RejectReason::Cancelled);
    assert!(engine.snapshot().get_file("a.py").is_none());

    let done = engine.enqueue(FileAddTransaction::new("b.py", "y = 1\n"));
    let done_id = done.id();
    assert!(done.wait().is_committed());
    assert!(!engine.cancel(done_id));
    assert_eq!(engine.status(done_id), Some(TransactionState::Committed));
}

#[test]
fn test_validation_rejections() {
    let engine = engine(&[("a.py", "x = 1\n")]);
    let cases = [
        (
            engine.submit(EditTransaction::new("missing.py", ByteRange::new(0, 0), "y")),
            RejectReason::FileNotFound,
        ),
        (
            engine.submit(EditTransaction::new("a.py", ByteRange::new(3, 99), "y")),
            RejectReason::InvalidRange,
        ),
        (
            engine.submit(FileAddTransaction::new("a.py", "")),
            RejectReason::FileExists,
        ),
        (
            engine.submit(FileAddTransaction::new("notes.txt", "hello")),
            RejectReason::UnsupportedLanguage,
        ),
        (
            engine.submit(FileAddTransaction::new("../outside.py", "")),
            RejectReason::InvalidPath,
        ),
        (
            engine.submit(FileRemoveTransaction::new("nope.py")),
            RejectReason::FileNotFound,
        ),
        (
            engine.submit(FileRenameTransaction::new("a.py", "a.py")),
            RejectReason::FileExists,
        ),
    ];
    for (result, expected) in &cases {
        assert_eq!(rejection(result), *expected, "{:?}", result);
    }
    assert_eq!(RejectReason::StaleRange.code(), "stale_range");
    assert_eq!(engine.snapshot().sequence(), 1);
}

#[test]
fn test_rejection_leaves_state_untouched() {
    let engine = engine(&[("a.py", A_PY), ("b.py", B_PY)]);
    let before = engine.snapshot();
    let result = engine.submit(EditTransaction::new("a.py", ByteRange::new(0, 500), ""));
    assert_eq!(rejection(&result), RejectReason::InvalidRange);

    let after = engine.snapshot();
    assert_eq!(after.sequence(), before.sequence());
    assert_eq!(after.edge_triples(), before.edge_triples());
    assert_eq!(
        after.source("a.py").unwrap().text(),
        before.source("a.py").unwrap().text()
    );
}

#[test]
fn test_resync_is_idempotent() {
    let engine = engine(&[
        ("a.py", A_PY),
        ("b.py", B_PY),
        ("svc.ts", "import { f } from './util';\nexport class Svc { run() { return f(); } }\n"),
        ("util.ts", "export function f() { return 1; }\n"),
    ]);
    let sequence = engine.snapshot().sequence();
    for path in ["a.py", "b.py", "svc.ts", "util.ts"] {
        assert_eq!(engine.resync(path).unwrap(), 0, "{path}");
    }
    assert_eq!(engine.snapshot().sequence(), sequence);
    assert!(engine.resync("missing.py").is_err());
}

#[test]
fn test_resolution_is_order_independent() {
    let files = [
        ("a.py", A_PY),
        ("b.py", B_PY),
        ("pkg/__init__.py", "from .core import run\n"),
        ("pkg/core.py", "def run():\n    return helper()\n\ndef helper():\n    pass\n"),
        ("main.py", "from pkg import run\n\nrun()\n"),
    ];
    let forward = engine(&files);
    // Same project, built one file at a time in the opposite order.
    let backward = engine(&[]);
    for (path, content) in files.iter().rev() {
        assert!(backward.submit(FileAddTransaction::new(*path, *content)).is_committed());
    }

    assert_eq!(
        forward.snapshot().edge_triples(),
        backward.snapshot().edge_triples()
    );
}

#[test]
fn test_reexport_through_package_init() {
    let engine = engine(&[
        ("pkg/__init__.py", "from .core import run\n"),
        ("pkg/core.py", "def run():\n    pass\n"),
        ("main.py", "from pkg import run\n\nrun()\n"),
    ]);
    let snapshot = engine.snapshot();
    let run = symbol(&snapshot, "pkg/core.py", "run");
    assert_eq!(binding(&snapshot, "main.py", 0), ImportBinding::Resolved(run));
    let main = snapshot.get_file("main.py").unwrap().id;
    assert!(snapshot.usages_of(run).iter().any(|u| u.user == main));
}

#[test]
fn test_go_package_members_are_shared() {
    let engine = engine(&[
        ("server/a.go", "package server\n\nfunc Start() { helper() }\n"),
        ("server/b.go", "package server\n\nfunc helper() {}\n"),
    ]);
    let snapshot = engine.snapshot();
    let helper = symbol(&snapshot, "server/b.go", "helper");
    let start = symbol(&snapshot, "server/a.go", "Start");
    assert_eq!(snapshot.usages_of(helper)[0].user, start);

    // Removing the sibling drops the cross-file edge.
    assert!(engine.submit(FileRemoveTransaction::new("server/b.go")).is_committed());
    let snapshot = engine.snapshot();
    assert!(
        snapshot
            .workspace()
            .graph()
            .edges_from(start)
            .all(|e| e.kind != EdgeKind::References)
    );
}

#[test]
fn test_dependencies_and_blast_radius() {
    let engine = engine(&[
        ("a.py", A_PY),
        ("b.py", B_PY),
        ("c.py", "from b import g\n\ndef h():\n    return g()\n"),
    ]);
    let snapshot = engine.snapshot();
    let f = symbol(&snapshot, "a.py", "f");
    let g = symbol(&snapshot, "b.py", "g");
    let h = symbol(&snapshot, "c.py", "h");

    let deps: Vec<NodeId> = snapshot.dependencies_of(h, None).iter().map(|r| r.id).collect();
    assert!(deps.contains(&g));
    assert!(deps.contains(&f));

    let shallow = snapshot.dependencies_of(h, Some(1));
    assert_eq!(shallow.len(), 1);
    assert_eq!(shallow[0].id, g);

    let radius: Vec<NodeId> = snapshot.blast_radius(f, None).iter().map(|r| r.id).collect();
    assert!(radius.contains(&g));
    assert!(radius.contains(&h));
    assert!(snapshot.blast_radius(h, None).is_empty());
}

#[test]
fn test_import_cycles_are_reported() {
    let engine = engine(&[
        ("x.py", "from y import b\n\ndef a():\n    return b()\n"),
        ("y.py", "from x import a\n\ndef b():\n    return a()\n"),
        ("z.py", "from x import a\n"),
    ]);
    let snapshot = engine.snapshot();
    assert_eq!(
        snapshot.import_cycles(),
        vec![vec![Path::new("x.py").to_path_buf(), Path::new("y.py").to_path_buf()]]
    );
    // Resolution terminated and bound both sides.
    assert!(binding(&snapshot, "x.py", 0).is_resolved());
    assert!(binding(&snapshot, "y.py", 0).is_resolved());
}

#[test]
fn test_overlapping_import_cycles_are_all_reported() {
    let engine = engine(&[
        ("x.py", "import y\nimport z\n"),
        ("y.py", "import z\n"),
        ("z.py", "import x\n"),
    ]);
    let paths = |names: &[&str]| -> Vec<std::path::PathBuf> {
        names.iter().map(|n| Path::new(n).to_path_buf()).collect()
    };
    assert_eq!(
        engine.snapshot().import_cycles(),
        vec![paths(&["x.py", "y.py", "z.py"]), paths(&["x.py", "z.py"])]
    );
}

#[test]
fn test_find_by_name_scopes() {
    let engine = engine(&[
        ("a.py", "def run():\n    pass\n"),
        ("lib/b.py", "class Job:\n    def run(self):\n        pass\n"),
        ("c.js", "export function run() {}\n"),
    ]);
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.find_by_name("run", None).len(), 3);
    assert_eq!(
        snapshot
            .find_by_name("run", Some(&SearchScope::Directory("lib".into())))
            .len(),
        1
    );
    assert_eq!(
        snapshot
            .find_by_name("run", Some(&SearchScope::Language(grove_core::Language::JavaScript)))
            .len(),
        1
    );
    let job = symbol(&snapshot, "lib/b.py", "Job");
    let members = snapshot.find_by_name("run", Some(&SearchScope::Within(job)));
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].qualified_name, "Job.run");
}

#[test]
fn test_fuzzy_search() {
    let engine = engine(&[(
        "svc.py",
        "class PaymentService:\n    def refund_order(self):\n        pass\n\ndef unrelated():\n    pass\n",
    )]);
    let hits = engine.snapshot().search("refund", 5);
    assert!(!hits.is_empty());
    assert_eq!(hits[0].qualified_name, "PaymentService.refund_order");
    assert_eq!(hits[0].kind, NodeKind::Function);
    assert!(engine.snapshot().search("zzzz", 5).is_empty());
}

#[test]
fn test_python_rename_rewrites_importers() {
    let engine = engine(&[("a.py", A_PY), ("b.py", B_PY)]);
    let before = engine.snapshot();
    let file = before.get_file("a.py").unwrap().id;
    let f = symbol(&before, "a.py", "f");

    let result = engine.submit(FileRenameTransaction::new("a.py", "a2.py"));
    assert!(result.is_committed(), "{:?}", result);

    let after = engine.snapshot();
    assert!(after.get_file("a.py").is_none());
    assert_eq!(after.get_file("a2.py").unwrap().id, file);
    assert_eq!(symbol(&after, "a2.py", "f"), f);
    assert_eq!(
        after.source("b.py").unwrap().text().as_ref(),
        "from a2 import f\n\ndef g():\n    return f()\n"
    );
    assert_eq!(binding(&after, "b.py", 0), ImportBinding::Resolved(f));
    assert_eq!(after.usages_of(f).len(), 1);
}

#[test]
fn test_rename_rewrites_dotted_module_uses() {
    let engine = engine(&[
        ("pkg/__init__.py", ""),
        ("pkg/a.py", "def f():\n    return 1\n"),
        ("main.py", "import pkg.a\n\ndef g():\n    return pkg.a.f()\n"),
    ]);
    let f = symbol(&engine.snapshot(), "pkg/a.py", "f");

    let result = engine.submit(FileRenameTransaction::new("pkg/a.py", "pkg/b.py"));
    assert!(result.is_committed(), "{:?}", result);

    let after = engine.snapshot();
    assert_eq!(
        after.source("main.py").unwrap().text().as_ref(),
        "import pkg.b\n\ndef g():\n    return pkg.b.f()\n"
    );
    let module = after.get_file("pkg/b.py").unwrap().id;
    assert_eq!(binding(&after, "main.py", 0), ImportBinding::Resolved(module));
    assert_eq!(symbol(&after, "pkg/b.py", "f"), f);
    assert!(!after.usages_of(f).is_empty());
}

#[test]
fn test_snapshot_stats() {
    let engine = engine(&[
        ("a.py", A_PY),
        ("b.py", B_PY),
        ("ext.py", "import requests\n"),
    ]);
    let stats = engine.snapshot().stats();
    insta::assert_json_snapshot!(stats, @r#"
    {
      "files": 3,
      "functions": 3,
      "classes": 0,
      "variables": 0,
      "imports": 2,
      "unresolved_imports": 0,
      "external_modules": 1,
      "edges": 8,
      "dynamic_edges": 0,
      "files_with_errors": 0
    }
    "#);
}
