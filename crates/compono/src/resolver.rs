//! Import resolution and module discovery
//!
//! Files are identified by graph keys: paths relative to the project root (the
//! entry file's directory) with `/` separators. Relative import sources are joined
//! onto the importing file's directory; bare sources are looked up in
//! `node_modules` directories from the importer up to the project root.

use std::{
    collections::VecDeque,
    fs,
    path::PathBuf,
};

use anyhow::{Context, Result, anyhow};
use log::{debug, trace, warn};
use rustc_hash::FxHashSet;

use crate::{ast::Program, parser::parse_source};

/// Directory part of a graph key, empty for files at the root
fn parent_key(key: &str) -> &str {
    key.rfind('/').map_or("", |idx| &key[..idx])
}

fn is_relative(source: &str) -> bool {
    source.starts_with("./") || source.starts_with("../") || source == "." || source == ".."
}

/// Lexically resolve an import source against the importing file's key
///
/// Bare sources (package names) are returned unchanged.
pub fn resolve_specifier(from: &str, source: &str) -> String {
    let joined = if is_relative(source) {
        let base = parent_key(from);
        if base.is_empty() {
            source.to_owned()
        } else {
            format!("{base}/{source}")
        }
    } else if let Some(absolute) = source.strip_prefix('/') {
        absolute.to_owned()
    } else {
        return source.to_owned();
    };
    normalize_key(&joined)
}

/// Collapse `.` and `..` segments without touching the filesystem
fn normalize_key(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// A file discovered from the entry point
#[derive(Debug, Clone)]
pub struct LoadedModule {
    pub key: String,
    pub path: PathBuf,
    pub source: String,
    pub program: Program,
}

/// Filesystem-backed module resolver
#[derive(Debug, Clone)]
pub struct ModuleResolver {
    root: PathBuf,
    extensions: Vec<String>,
}

impl ModuleResolver {
    pub fn new(root: impl Into<PathBuf>, extensions: Vec<String>) -> Self {
        Self {
            root: root.into(),
            extensions,
        }
    }

    fn exists(&self, key: &str) -> bool {
        !key.is_empty() && self.root.join(key).is_file()
    }

    /// Try `key`, `key<ext>` and `key/index<ext>` in that order
    fn probe(&self, key: &str) -> Option<String> {
        if self.exists(key) {
            return Some(key.to_owned());
        }
        let with_ext = self.extensions.iter().map(|ext| format!("{key}{ext}"));
        let index = self.extensions.iter().map(|ext| {
            if key.is_empty() {
                format!("index{ext}")
            } else {
                format!("{key}/index{ext}")
            }
        });
        with_ext.chain(index).find(|candidate| self.exists(candidate))
    }

    /// Resolve an import source to the graph key of an existing file
    ///
    /// Missing relative files are an error; unresolvable packages yield `None`.
    pub fn resolve(&self, from: &str, source: &str) -> Result<Option<String>> {
        if is_relative(source) || source.starts_with('/') {
            let key = resolve_specifier(from, source);
            return self
                .probe(&key)
                .map(Some)
                .ok_or_else(|| anyhow!("Cannot resolve '{source}' imported from '{from}'"));
        }

        let mut dir = parent_key(from).to_owned();
        loop {
            let candidate = if dir.is_empty() {
                format!("node_modules/{source}")
            } else {
                format!("{dir}/node_modules/{source}")
            };
            if let Some(found) = self.probe(&candidate) {
                trace!("Resolved package '{source}' from '{from}' to '{found}'");
                return Ok(Some(found));
            }
            if dir.is_empty() {
                break;
            }
            dir = parent_key(&dir).to_owned();
        }

        warn!("Package '{source}' imported from '{from}' was not found; leaving it external");
        Ok(None)
    }

    /// Read and parse every file reachable from `entry_key`, breadth first
    pub fn load_graph(&self, entry_key: &str) -> Result<Vec<LoadedModule>> {
        let mut modules = Vec::new();
        let mut seen: FxHashSet<String> = FxHashSet::default();
        let mut queue = VecDeque::from([entry_key.to_owned()]);
        seen.insert(entry_key.to_owned());

        while let Some(key) = queue.pop_front() {
            let path = self.root.join(&key);
            let source = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read module '{}'", path.display()))?;
            let mut program = parse_source(&source, &key);

            for import in &mut program.imports {
                let Some(spec) = import.source.as_deref() else {
                    continue;
                };
                if import.is_style() {
                    continue;
                }
                let resolved = self
                    .resolve(&key, spec)
                    .with_context(|| format!("Failed to resolve imports of '{key}'"))?;
                if let Some(target) = &resolved
                    && seen.insert(target.clone())
                {
                    queue.push_back(target.clone());
                }
                import.resolved = resolved;
            }

            modules.push(LoadedModule {
                key,
                path,
                source,
                program,
            });
        }

        debug!(
            "Loaded {} modules starting from '{entry_key}'",
            modules.len()
        );
        Ok(modules)
    }
}
