//! Module specifier to file candidates, per language
//!
//! Candidates are computed from paths alone; the resolver checks them
//! against the files actually present. All paths are relative to the
//! project root.

use crate::extractor::{ImportFact, RefKind, ReferenceFact};
use grove_core::{ByteRange, Language, LanguageConfig, ResolutionStep, display_path, normalize_path};
use std::path::{Component, Path, PathBuf};

/// Place where a module may live.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Candidate {
    File(PathBuf),
    /// Every file of the importer's language directly inside a directory
    /// (Go and Java packages).
    Package(PathBuf),
}

impl Candidate {
    pub fn path(&self) -> &Path {
        match self {
            Candidate::File(p) | Candidate::Package(p) => p,
        }
    }

    /// Whether a file at `path` would satisfy this candidate.
    pub fn matches(&self, path: &Path) -> bool {
        match self {
            Candidate::File(p) => p == path,
            Candidate::Package(dir) => path.parent().is_some_and(|parent| parent == dir),
        }
    }
}

/// How to bind an import when none of the candidates exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fallback {
    /// The specifier names a place inside the project that is missing.
    Unresolved(String),
    /// The specifier names something outside the analyzed files.
    External(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModulePlan {
    /// Where the imported module may live, best first.
    pub module: Vec<Candidate>,
    /// Where the imported member may live when it is itself a module
    /// (`from pkg import sub`, `use crate::a::b`).
    pub member: Vec<Candidate>,
    pub fallback: Fallback,
}

impl ModulePlan {
    fn unresolved(reason: impl Into<String>) -> Self {
        ModulePlan {
            module: Vec::new(),
            member: Vec::new(),
            fallback: Fallback::Unresolved(reason.into()),
        }
    }

    /// Every candidate, for reverse lookups from a changed file to its importers.
    pub fn all(&self) -> impl Iterator<Item = &Candidate> {
        self.module.iter().chain(self.member.iter())
    }
}

/// Compute where `import` (found in `importer`) may point.
pub fn plan(
    language: Language,
    importer: &Path,
    import: &ImportFact,
    config: &LanguageConfig,
) -> ModulePlan {
    match language {
        Language::Python => plan_python(importer, import, config),
        Language::JavaScript | Language::TypeScript => plan_ecma(language, importer, import, config),
        Language::Go => plan_go(import, config),
        Language::Rust => plan_rust(importer, import),
        Language::Java => plan_java(import, config),
        Language::Other => ModulePlan::unresolved("unsupported language"),
    }
}

/// Directories searched for non-relative specifiers, in configured order.
fn search_dirs(importer: &Path, config: &LanguageConfig) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    for step in &config.resolution_order {
        match step {
            ResolutionStep::PackageRelative => dirs.push(parent_dir(importer)),
            ResolutionStep::SourceRoots => dirs.extend(config.source_roots.iter().cloned()),
        }
    }
    let mut seen = Vec::new();
    dirs.into_iter()
        .filter_map(|d| normalize_path(&d))
        .filter(|d| {
            let fresh = !seen.contains(d);
            if fresh {
                seen.push(d.clone());
            }
            fresh
        })
        .collect()
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

fn join_segments<'a>(base: &Path, segments: impl IntoIterator<Item = &'a str>) -> PathBuf {
    let mut path = base.to_path_buf();
    for segment in segments {
        path.push(segment);
    }
    path
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut text = path.as_os_str().to_os_string();
    text.push(suffix);
    PathBuf::from(text)
}

fn files(paths: impl IntoIterator<Item = PathBuf>) -> Vec<Candidate> {
    paths
        .into_iter()
        .filter_map(|p| normalize_path(&p))
        .map(Candidate::File)
        .collect()
}

// ---- Python ----

fn python_module_files(module_dir: &Path) -> Vec<PathBuf> {
    if module_dir.as_os_str().is_empty() {
        return vec![PathBuf::from("__init__.py")];
    }
    vec![with_suffix(module_dir, ".py"), module_dir.join("__init__.py")]
}

fn plan_python(importer: &Path, import: &ImportFact, config: &LanguageConfig) -> ModulePlan {
    let spec = import.module.as_str();
    let dots = spec.chars().take_while(|c| *c == '.').count();
    let rest: Vec<&str> = spec[dots..].split('.').filter(|s| !s.is_empty()).collect();

    let bases = if dots > 0 {
        let mut base = parent_dir(importer);
        for _ in 1..dots {
            match base.parent() {
                Some(parent) if !base.as_os_str().is_empty() => base = parent.to_path_buf(),
                _ => return ModulePlan::unresolved(format!("relative import {spec} goes above the project root")),
            }
        }
        vec![base]
    } else {
        search_dirs(importer, config)
    };

    let mut module = Vec::new();
    let mut member = Vec::new();
    for base in &bases {
        let module_dir = join_segments(base, rest.iter().copied());
        module.extend(files(python_module_files(&module_dir)));
        if let Some(name) = &import.member {
            member.extend(files(python_module_files(&module_dir.join(name))));
        }
    }

    let fallback = if dots > 0 {
        Fallback::Unresolved(format!("module {spec} not found"))
    } else {
        Fallback::External(rest.first().copied().unwrap_or(spec).to_string())
    };
    ModulePlan { module, member, fallback }
}

// ---- JavaScript / TypeScript ----

const JS_EXTENSIONS: &[&str] = &["js", "jsx", "mjs", "cjs", "ts", "tsx"];
const TS_EXTENSIONS: &[&str] = &["ts", "tsx", "d.ts", "js", "jsx", "mjs", "cjs"];

fn is_relative_specifier(spec: &str) -> bool {
    spec == "." || spec == ".." || spec.starts_with("./") || spec.starts_with("../") || spec.starts_with('/')
}

/// `./x` resolves to `x`, `x.<ext>` or `x/index.<ext>`.
fn with_extensions(base: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    let has_extension = base
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| JS_EXTENSIONS.contains(&e));
    if has_extension {
        paths.push(base.to_path_buf());
        // TypeScript sources are imported with the `.js` they compile to.
        if base.extension().is_some_and(|e| e == "js") {
            paths.push(base.with_extension("ts"));
            paths.push(base.with_extension("tsx"));
        }
    }
    for ext in extensions {
        paths.push(with_suffix(base, &format!(".{ext}")));
    }
    for ext in extensions {
        paths.push(base.join(format!("index.{ext}")));
    }
    paths
}

/// `@scope/pkg/sub` belongs to package `@scope/pkg`; `pkg/sub` to `pkg`.
fn package_name(spec: &str) -> String {
    let mut parts = spec.split('/');
    match parts.next() {
        Some(scope) if scope.starts_with('@') => match parts.next() {
            Some(name) => format!("{scope}/{name}"),
            None => scope.to_string(),
        },
        Some(first) => first.to_string(),
        None => spec.to_string(),
    }
}

fn plan_ecma(
    language: Language,
    importer: &Path,
    import: &ImportFact,
    config: &LanguageConfig,
) -> ModulePlan {
    let spec = import.module.as_str();
    let extensions = if language == Language::TypeScript {
        TS_EXTENSIONS
    } else {
        JS_EXTENSIONS
    };

    if is_relative_specifier(spec) {
        let base = if let Some(absolute) = spec.strip_prefix('/') {
            PathBuf::from(absolute)
        } else {
            parent_dir(importer).join(spec)
        };
        let Some(base) = normalize_path(&base) else {
            return ModulePlan::unresolved(format!("cannot find module '{spec}': path leaves the project"));
        };
        return ModulePlan {
            module: files(with_extensions(&base, extensions)),
            member: Vec::new(),
            fallback: Fallback::Unresolved(format!("cannot find module '{spec}'")),
        };
    }

    // Bare specifiers only ever resolve against source roots.
    let module = config
        .source_roots
        .iter()
        .filter(|_| config.resolution_order.contains(&ResolutionStep::SourceRoots))
        .flat_map(|root| files(with_extensions(&root.join(spec), extensions)))
        .collect();
    ModulePlan {
        module,
        member: Vec::new(),
        fallback: Fallback::External(package_name(spec)),
    }
}

// ---- Go ----

fn plan_go(import: &ImportFact, config: &LanguageConfig) -> ModulePlan {
    let spec = import.module.as_str();
    let local = config.module_prefix.as_deref().and_then(|prefix| {
        if spec == prefix {
            Some("")
        } else {
            spec.strip_prefix(prefix).and_then(|rest| rest.strip_prefix('/'))
        }
    });

    let packages = |rel: &str| -> Vec<Candidate> {
        config
            .source_roots
            .iter()
            .filter_map(|root| normalize_path(&join_segments(root, rel.split('/').filter(|s| !s.is_empty()))))
            .map(Candidate::Package)
            .collect()
    };

    match local {
        Some(rel) => ModulePlan {
            module: packages(rel),
            member: Vec::new(),
            fallback: Fallback::Unresolved(format!("package {spec} not found")),
        },
        None => ModulePlan {
            module: packages(spec),
            member: Vec::new(),
            fallback: Fallback::External(spec.to_string()),
        },
    }
}

// ---- Rust ----

fn is_module_root(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| matches!(n, "mod.rs" | "lib.rs" | "main.rs"))
}

/// Directory holding the submodules of the module defined by `file`.
fn rust_module_dir(file: &Path) -> PathBuf {
    let parent = parent_dir(file);
    if is_module_root(file) {
        return parent;
    }
    match file.file_stem() {
        Some(stem) => parent.join(stem),
        None => parent,
    }
}

/// Nearest `src` ancestor, else the directory of the file.
fn rust_crate_dir(file: &Path) -> PathBuf {
    let mut current = file.parent();
    while let Some(dir) = current {
        if dir.file_name().is_some_and(|n| n == "src") {
            return dir.to_path_buf();
        }
        current = dir.parent();
    }
    parent_dir(file)
}

/// Files that may define the module whose submodules live in `dir`.
fn rust_module_files(dir: &Path) -> Vec<PathBuf> {
    vec![
        with_suffix(dir, ".rs"),
        dir.join("mod.rs"),
        dir.join("lib.rs"),
        dir.join("main.rs"),
    ]
}

fn plan_rust(importer: &Path, import: &ImportFact) -> ModulePlan {
    let spec = import.module.as_str();
    let segments: Vec<&str> = spec.split("::").filter(|s| !s.is_empty()).collect();
    let Some((&first, rest)) = segments.split_first() else {
        return ModulePlan::unresolved("empty path");
    };

    let (mut dir, mut module_files) = match first {
        "crate" => {
            let dir = rust_crate_dir(importer);
            (dir.clone(), vec![dir.join("lib.rs"), dir.join("main.rs")])
        }
        "self" => (rust_module_dir(importer), vec![importer.to_path_buf()]),
        "super" => {
            let dir = parent_dir(&rust_module_dir(importer));
            (dir.clone(), rust_module_files(&dir))
        }
        other => {
            return ModulePlan {
                module: Vec::new(),
                member: Vec::new(),
                fallback: Fallback::External(other.to_string()),
            };
        }
    };

    for segment in rest {
        if *segment == "super" {
            dir = parent_dir(&dir);
        } else {
            dir = dir.join(segment);
        }
        module_files = rust_module_files(&dir);
    }

    let member = import
        .member
        .as_ref()
        .map(|m| files(rust_module_files(&dir.join(m))))
        .unwrap_or_default();
    ModulePlan {
        module: files(module_files),
        member,
        fallback: Fallback::Unresolved(format!("module {spec} not found")),
    }
}

// ---- Java ----

fn plan_java(import: &ImportFact, config: &LanguageConfig) -> ModulePlan {
    let spec = import.module.as_str();
    let segments: Vec<&str> = spec.split('.').collect();
    let mut module = Vec::new();
    let mut member = Vec::new();
    for root in &config.source_roots {
        let dir = join_segments(root, segments.iter().copied());
        if let Some(dir) = normalize_path(&dir) {
            module.push(Candidate::Package(dir.clone()));
            if let Some(name) = &import.member {
                member.extend(files([dir.join(format!("{name}.java"))]));
            }
        }
        // `import static a.B.m` names a member of class file `a/B.java`.
        module.extend(files([with_suffix(&join_segments(root, segments.iter().copied()), ".java")]));
    }
    ModulePlan {
        module,
        member,
        fallback: Fallback::External(spec.to_string()),
    }
}

// ---- Rename rewriting ----

/// New text for the specifier of `import` (currently `original`, the exact
/// source text at `import.module_range`) after its target moved from
/// `old_path` to `new_path`. `None` when the language or import shape is not
/// rewritten.
pub fn rewrite_specifier(
    language: Language,
    importer: &Path,
    import: &ImportFact,
    original: &str,
    new_path: &Path,
    config: &LanguageConfig,
) -> Option<String> {
    match language {
        Language::Python => rewrite_python(importer, import, new_path, config),
        Language::JavaScript | Language::TypeScript => rewrite_ecma(importer, import, original, new_path),
        _ => None,
    }
}

/// Dotted module path of a Python file relative to `base`.
fn python_module_of(path: &Path, base: &Path) -> Option<Vec<String>> {
    let relative = path.strip_prefix(base).ok()?;
    let mut parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let file = parts.pop()?;
    let stem = file.strip_suffix(".py")?;
    if stem != "__init__" {
        parts.push(stem.to_string());
    }
    Some(parts)
}

fn rewrite_python(
    importer: &Path,
    import: &ImportFact,
    new_path: &Path,
    config: &LanguageConfig,
) -> Option<String> {
    let spec = import.module.as_str();
    if spec.starts_with('.') {
        let importer_dir = parent_dir(importer);
        let common = common_prefix(&importer_dir, new_path);
        let ups = importer_dir.components().count() - common.components().count();
        let module = python_module_of(new_path, &common)?;
        return Some(format!("{}{}", ".".repeat(ups + 1), module.join(".")));
    }

    let module = search_dirs(importer, config)
        .iter()
        .find_map(|base| python_module_of(new_path, base).filter(|m| !m.is_empty()))?
        .join(".");
    // `import a` binds `a`; keep that name so uses in the importer still resolve.
    // A dotted name is no valid alias: its uses are rewritten instead.
    if binds_module_path(import) && !spec.contains('.') && module != spec {
        return Some(format!("{module} as {spec}"));
    }
    Some(module)
}

/// `import a` or `import a.b`: the importer names the module by its path.
fn binds_module_path(import: &ImportFact) -> bool {
    import.member.is_none()
        && import.alias.is_none()
        && !import.wildcard
        && import.local.as_deref() == Some(import.module.as_str())
}

/// Spans in the importer where a dotted `import a.b` is used as `a.b.x`,
/// each paired with `new_module` to replace the `a.b` prefix. Empty unless
/// the import is a plain dotted Python import.
pub fn rewrite_module_uses(
    language: Language,
    import: &ImportFact,
    references: &[ReferenceFact],
    text: &str,
    new_module: &str,
) -> Vec<(ByteRange, String)> {
    let spec = import.module.as_str();
    if language != Language::Python || !spec.contains('.') || !binds_module_path(import) {
        return Vec::new();
    }
    let segments: Vec<&str> = spec.split('.').collect();
    let rest = &segments[1..];
    let mut uses: Vec<(ByteRange, String)> = references
        .iter()
        .filter(|r| r.kind == RefKind::Name && r.target.name == segments[0])
        .filter(|r| r.target.path.len() >= rest.len() && r.target.path[..rest.len()] == *rest)
        .filter_map(|r| {
            let start = r.target.range.start;
            let end = start + spec.len();
            let continues = text
                .get(end..)?
                .starts_with(|c: char| c == '_' || c.is_alphanumeric());
            (text.get(start..end)? == spec && !continues)
                .then(|| (ByteRange::new(start, end), new_module.to_string()))
        })
        .collect();
    uses.sort_by_key(|(range, _)| range.start);
    uses.dedup_by_key(|(range, _)| range.start);
    uses
}

fn rewrite_ecma(importer: &Path, import: &ImportFact, original: &str, new_path: &Path) -> Option<String> {
    let spec = import.module.as_str();
    if !is_relative_specifier(spec) {
        return None;
    }
    let quote = original.chars().next().filter(|c| matches!(c, '"' | '\'' | '`'))?;

    let spec_has_extension = Path::new(spec)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| JS_EXTENSIONS.contains(&e));
    let spec_is_index = Path::new(spec).file_name().is_some_and(|n| n == "index");
    let new_is_index = new_path.file_stem().is_some_and(|s| s == "index");

    let target = if spec_has_extension {
        new_path.to_path_buf()
    } else if new_is_index && !spec_is_index {
        // Imported through its directory.
        parent_dir(new_path)
    } else {
        new_path.with_extension("")
    };

    let mut relative = relative_path(&parent_dir(importer), &target);
    if !relative.starts_with("../") {
        relative = if relative.is_empty() {
            ".".to_string()
        } else {
            format!("./{relative}")
        };
    }
    Some(format!("{quote}{relative}{quote}"))
}

fn common_prefix(a: &Path, b: &Path) -> PathBuf {
    a.components()
        .zip(b.components())
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| x)
        .collect()
}

/// Forward-slash path from directory `from` to `to`.
fn relative_path(from: &Path, to: &Path) -> String {
    let common = common_prefix(from, to);
    let ups = from.components().count() - common.components().count();
    let mut parts: Vec<String> = std::iter::repeat_n("..".to_string(), ups).collect();
    if let Ok(rest) = to.strip_prefix(&common) {
        parts.extend(
            rest.components()
                .filter(|c| matches!(c, Component::Normal(_)))
                .map(|c| c.as_os_str().to_string_lossy().into_owned()),
        );
    }
    display_path(&parts.iter().collect::<PathBuf>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use grove_core::{ByteRange, SourceRange};

    fn fact(module: &str) -> ImportFact {
        ImportFact::new(module, SourceRange::default(), ByteRange::new(0, 0))
    }

    #[test]
    fn test_python_relative_and_absolute() {
        let config = LanguageConfig::default();
        let from = fact("..util").member("helpers");
        let plan = plan(Language::Python, Path::new("pkg/sub/mod.py"), &from, &config);
        assert_eq!(
            plan.module,
            vec![
                Candidate::File(PathBuf::from("pkg/util.py")),
                Candidate::File(PathBuf::from("pkg/util/__init__.py")),
            ]
        );
        assert_eq!(plan.member[0], Candidate::File(PathBuf::from("pkg/util/helpers.py")));
        assert!(matches!(plan.fallback, Fallback::Unresolved(_)));

        let absolute = plan_python(Path::new("pkg/b.py"), &fact("a").member("f"), &config);
        assert_eq!(absolute.module[0], Candidate::File(PathBuf::from("pkg/a.py")));
        assert!(absolute.module.contains(&Candidate::File(PathBuf::from("a.py"))));
        assert_eq!(absolute.fallback, Fallback::External("a".into()));
    }

    #[test]
    fn test_relative_import_above_root() {
        let plan = plan_python(Path::new("a.py"), &fact("...x"), &LanguageConfig::default());
        assert!(plan.module.is_empty());
        assert!(matches!(plan.fallback, Fallback::Unresolved(_)));
    }

    #[test]
    fn test_ecma_probing() {
        let config = LanguageConfig::default();
        let plan = plan(Language::TypeScript, Path::new("src/app.ts"), &fact("./util"), &config);
        assert_eq!(plan.module[0], Candidate::File(PathBuf::from("src/util.ts")));
        assert!(plan.module.contains(&Candidate::File(PathBuf::from("src/util/index.ts"))));

        let bare = super::plan(Language::JavaScript, Path::new("app.js"), &fact("@scope/pkg/deep"), &config);
        assert_eq!(bare.fallback, Fallback::External("@scope/pkg".into()));
    }

    #[test]
    fn test_rust_paths() {
        let mut import = fact("crate::graph");
        import.member = Some("Graph".into());
        let plan = plan_rust(Path::new("core/src/lib.rs"), &import);
        assert!(plan.module.contains(&Candidate::File(PathBuf::from("core/src/graph.rs"))));
        assert!(plan.module.contains(&Candidate::File(PathBuf::from("core/src/graph/mod.rs"))));

        let module = plan_rust(Path::new("src/model.rs"), &fact("self::types"));
        assert_eq!(module.module[0], Candidate::File(PathBuf::from("src/model/types.rs")));

        let external = plan_rust(Path::new("src/lib.rs"), &fact("std::collections"));
        assert_eq!(external.fallback, Fallback::External("std".into()));
    }

    #[test]
    fn test_go_module_prefix() {
        let config = LanguageConfig {
            module_prefix: Some("example.com/app".into()),
            ..LanguageConfig::default()
        };
        let plan = plan_go(&fact("example.com/app/store"), &config);
        assert_eq!(plan.module, vec![Candidate::Package(PathBuf::from("store"))]);
        assert!(plan.module[0].matches(Path::new("store/db.go")));

        let std = plan_go(&fact("fmt"), &config);
        assert_eq!(std.fallback, Fallback::External("fmt".into()));
    }

    #[test]
    fn test_rewrite_specifiers() {
        let config = LanguageConfig::default();
        let plain = fact("a").local("a");
        assert_eq!(
            rewrite_specifier(Language::Python, Path::new("b.py"), &plain, "a", Path::new("a2.py"), &config),
            Some("a2 as a".to_string())
        );

        let from = fact("a").member("f").local("f");
        assert_eq!(
            rewrite_specifier(Language::Python, Path::new("b.py"), &from, "a", Path::new("lib/a2.py"), &config),
            Some("lib.a2".to_string())
        );

        let js = fact("../util");
        assert_eq!(
            rewrite_specifier(
                Language::JavaScript,
                Path::new("src/app/main.js"),
                &js,
                "'../util'",
                Path::new("src/shared/util.js"),
                &config,
            ),
            Some("'../shared/util'".to_string())
        );
    }
}
