//! Engine configuration
//!
//! Supplied explicitly at engine construction; nothing here is read from
//! process-wide state. Can be loaded from TOML:
//!
//! ```toml
//! root = "."
//! exclude = ["vendor/**"]
//! write_through = false
//!
//! [languages.python]
//! source_roots = ["src", "."]
//! resolution_order = ["package_relative", "source_roots"]
//!
//! [languages.go]
//! module_prefix = "example.com/app"
//! ```

use crate::error::ConfigError;
use crate::model::Language;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One step of a language's import resolution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStep {
    /// Resolve against the importing file's own directory (package).
    PackageRelative,
    /// Resolve against each configured source root, in order.
    SourceRoots,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageConfig {
    /// Project-relative directories that absolute module paths are resolved against.
    pub source_roots: Vec<PathBuf>,
    pub resolution_order: Vec<ResolutionStep>,
    /// Module path prefix owned by this project (Go module path).
    pub module_prefix: Option<String>,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        LanguageConfig {
            source_roots: vec![PathBuf::from(".")],
            resolution_order: vec![ResolutionStep::PackageRelative, ResolutionStep::SourceRoots],
            module_prefix: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Project root used for loading sources and write-through.
    pub root: PathBuf,
    pub languages: BTreeMap<Language, LanguageConfig>,
    /// Glob patterns (relative to `root`) that are never indexed.
    pub exclude: Vec<String>,
    /// Parser worker threads; 0 picks the available parallelism.
    pub parser_workers: usize,
    /// Also write committed file content to disk under `root`.
    pub write_through: bool,
    /// Applied edits remembered per file for stale-range validation.
    pub edit_history: usize,
    /// Depth used by traversal queries when the caller passes none.
    pub default_dependency_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            root: PathBuf::from("."),
            languages: BTreeMap::new(),
            exclude: vec![
                "**/.git/**".to_string(),
                "**/node_modules/**".to_string(),
                "**/target/**".to_string(),
            ],
            parser_workers: 0,
            write_through: false,
            edit_history: 64,
            default_dependency_depth: 8,
        }
    }
}

impl EngineConfig {
    /// Default configuration rooted at `root`.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        EngineConfig {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file. A relative `root` is taken relative to the file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&source)?;
        if config.root.is_relative() {
            if let Some(dir) = path.parent() {
                config.root = dir.join(&config.root).components().collect();
            }
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (language, lang) in &self.languages {
            if lang.resolution_order.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "{} has an empty resolution_order",
                    language.name()
                )));
            }
            if let Some(root) = lang.source_roots.iter().find(|r| r.is_absolute()) {
                return Err(ConfigError::Invalid(format!(
                    "source root {} must be relative to the project root",
                    root.display()
                )));
            }
        }
        self.exclude_set().map(|_| ())
    }

    /// Resolution settings for a language, falling back to the defaults.
    pub fn language(&self, language: Language) -> LanguageConfig {
        self.languages.get(&language).cloned().unwrap_or_default()
    }

    pub fn with_language(mut self, language: Language, config: LanguageConfig) -> Self {
        self.languages.insert(language, config);
        self
    }

    pub fn exclude_set(&self) -> Result<GlobSet, ConfigError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.exclude {
            let glob = Glob::new(pattern).map_err(|source| ConfigError::Glob {
                pattern: pattern.clone(),
                source,
            })?;
            builder.add(glob);
        }
        builder.build().map_err(|source| ConfigError::Glob {
            pattern: self.exclude.join(", "),
            source,
        })
    }

    pub fn parser_workers(&self) -> usize {
        if self.parser_workers > 0 {
            return self.parser_workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get().max(2))
            .unwrap_or(2)
    }
}
