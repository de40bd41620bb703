//! Per-file and cross-file analysis
//!
//! The analyzer walks each parsed program once, populating the dependency graph
//! and recording facts later stages need: which components a file declares and
//! uses, which imports are stylesheets, which top-level statements run for their
//! side effects, and which components look asynchronous. Cross-file questions
//! (unused exports, chunk assignment) are answered from the accumulated state.
//!
//! Component usage is a naming heuristic: any imported name starting with
//! `create` counts as a used component. There is no scope resolution.

use log::{debug, trace};
use rustc_hash::FxHashSet;

use crate::{
    ast::{Declaration, Program, Statement},
    dependency_graph::DependencyGraph,
    resolver::resolve_specifier,
    types::{FxIndexMap, FxIndexSet},
};

/// Facts gathered from one file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAnalysis {
    /// Component names declared in the file
    pub components: Vec<String>,
    /// Graph keys of imported files
    pub dependencies: FxIndexSet<String>,
    /// Component names this file imports
    pub used_components: FxIndexSet<String>,
    /// Top-level calls and bare imports executed for their effects
    pub side_effects: Vec<String>,
    /// `.css` / `.scss` sources
    pub style_imports: Vec<String>,
    /// Declared components that look asynchronous
    pub async_components: Vec<String>,
}

/// Partition of files into delivery buckets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkSet {
    pub main: FxIndexSet<String>,
    pub vendor: FxIndexSet<String>,
    pub async_chunks: FxIndexMap<String, FxIndexSet<String>>,
}

impl ChunkSet {
    /// Total number of files across all buckets
    pub fn file_count(&self) -> usize {
        self.main.len()
            + self.vendor.len()
            + self.async_chunks.values().map(FxIndexSet::len).sum::<usize>()
    }
}

/// An exported name recorded for the unused-export lint
#[derive(Debug, Clone)]
struct ExportRecord {
    file: String,
    name: String,
    is_default: bool,
}

/// Analyzer owning the dependency graph for one compile
#[derive(Debug)]
pub struct Analyzer {
    graph: DependencyGraph,
    files: FxIndexMap<String, FileAnalysis>,
    /// Component names imported anywhere
    used_components: FxIndexSet<String>,
    /// Every specifier name imported anywhere
    imported_names: FxIndexSet<String>,
    /// `"<resolved source>:<specifier>"` for every named import
    used_exports: FxHashSet<String>,
    exports: Vec<ExportRecord>,
    vendor_marker: String,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new("node_modules")
    }
}

impl Analyzer {
    pub fn new(vendor_marker: impl Into<String>) -> Self {
        Self {
            graph: DependencyGraph::new(),
            files: FxIndexMap::default(),
            used_components: FxIndexSet::default(),
            imported_names: FxIndexSet::default(),
            used_exports: FxHashSet::default(),
            exports: Vec::new(),
            vendor_marker: vendor_marker.into(),
        }
    }

    /// Analyze one program, adding its node and edges to the graph
    pub fn analyze(&mut self, program: &Program) -> &FileAnalysis {
        let file = program.file.as_str();
        self.graph.add_node(file);
        let mut analysis = FileAnalysis {
            components: program.components.iter().map(|c| c.name.clone()).collect(),
            ..FileAnalysis::default()
        };

        for import in &program.imports {
            let Some(source) = import.source.as_deref() else {
                trace!("Import without source in '{file}' produces no edge");
                continue;
            };
            if import.is_style() {
                analysis.style_imports.push(source.to_owned());
                continue;
            }

            let target = import
                .resolved
                .clone()
                .unwrap_or_else(|| resolve_specifier(file, source));
            self.graph.add_edge(file, &target);
            analysis.dependencies.insert(target.clone());

            if import.specifiers.is_empty() {
                analysis.side_effects.push(format!("import {source}"));
            }
            for specifier in &import.specifiers {
                if specifier.starts_with("create") {
                    analysis.used_components.insert(specifier.clone());
                    self.used_components.insert(specifier.clone());
                }
                self.imported_names.insert(specifier.clone());
                self.used_exports.insert(format!("{target}:{specifier}"));
            }
        }

        for stmt in &program.body {
            if let Statement::Call(call) = stmt {
                analysis.side_effects.push(call.callee.clone());
            }
        }

        analysis.async_components = program
            .components
            .iter()
            .filter(|c| is_async_component(c))
            .map(|c| c.name.clone())
            .collect();

        let mut exported_names = Vec::new();
        for export in &program.exports {
            for name in export.exported_names() {
                exported_names.push(name.to_owned());
                self.exports.push(ExportRecord {
                    file: file.to_owned(),
                    name: name.to_owned(),
                    is_default: export.is_default,
                });
            }
        }

        if let Some(node) = self.graph.node_mut(file) {
            node.imports.clone_from(&program.imports);
            node.exports = exported_names;
        }

        debug!(
            "Analyzed '{file}': {} dependencies, {} components ({} async), {} style imports",
            analysis.dependencies.len(),
            analysis.components.len(),
            analysis.async_components.len(),
            analysis.style_imports.len()
        );

        self.files.insert(file.to_owned(), analysis);
        &self.files[file]
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn file(&self, file: &str) -> Option<&FileAnalysis> {
        self.files.get(file)
    }

    pub fn files(&self) -> impl Iterator<Item = (&str, &FileAnalysis)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Component names imported by any analyzed file
    pub fn used_components(&self) -> &FxIndexSet<String> {
        &self.used_components
    }

    /// Specifier names imported by any analyzed file
    pub fn imported_names(&self) -> &FxIndexSet<String> {
        &self.imported_names
    }

    /// `(file, component)` pairs for every async component
    pub fn async_components(&self) -> Vec<(String, String)> {
        self.files
            .iter()
            .flat_map(|(file, analysis)| {
                analysis
                    .async_components
                    .iter()
                    .map(move |name| (file.clone(), name.clone()))
            })
            .collect()
    }

    /// Non-default exports that no analyzed import references, as `"file:name"`
    ///
    /// Default exports are never reported, and imports of a default export are
    /// not tracked either, so this is a lint signal rather than a guarantee.
    pub fn get_unused_exports(&self) -> Vec<String> {
        self.exports
            .iter()
            .filter(|record| !record.is_default)
            .map(|record| format!("{}:{}", record.file, record.name))
            .filter(|key| !self.used_exports.contains(key))
            .collect()
    }

    /// Assign every analyzed file to exactly one bucket
    ///
    /// Vendor paths win over async components, which win over main.
    pub fn calculate_chunks(&self) -> ChunkSet {
        let mut chunks = ChunkSet::default();
        for (file, analysis) in &self.files {
            if file.contains(&self.vendor_marker) {
                chunks.vendor.insert(file.clone());
            } else if let Some(name) = analysis.async_components.first() {
                chunks
                    .async_chunks
                    .entry(name.clone())
                    .or_default()
                    .insert(file.clone());
            } else {
                chunks.main.insert(file.clone());
            }
        }
        debug!(
            "Analyzer chunks: {} main, {} vendor, {} async",
            chunks.main.len(),
            chunks.vendor.len(),
            chunks.async_chunks.len()
        );
        chunks
    }
}

/// Naming heuristic for components that load asynchronously
pub fn is_async_component(decl: &Declaration) -> bool {
    decl.name.contains("Async")
        || decl.name.contains("Lazy")
        || decl.params.iter().any(|param| {
            let lower = param.to_ascii_lowercase();
            lower.contains("async") || lower.contains("promise")
        })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::parser::parse_source;

    fn analyze_all(sources: &[(&str, &str)]) -> Analyzer {
        let mut analyzer = Analyzer::default();
        for (file, source) in sources {
            analyzer.analyze(&parse_source(source, file));
        }
        analyzer
    }

    #[test]
    fn test_graph_population_and_component_usage() {
        let analyzer = analyze_all(&[
            ("a.js", "import { createButton } from './b.js';\nimport './theme.css';"),
            (
                "b.js",
                "export function createButton() {}\nexport function createUnused() {}",
            ),
        ]);

        let a = analyzer.file("a.js").expect("a.js analyzed");
        assert_eq!(a.dependencies.iter().collect::<Vec<_>>(), vec!["b.js"]);
        assert_eq!(a.style_imports, vec!["./theme.css"]);
        assert!(analyzer.used_components().contains("createButton"));
        assert_eq!(analyzer.graph().get_entry_points(), vec!["a.js"]);
        assert!(analyzer.graph().is_consistent());
    }

    #[test]
    fn test_null_source_import_adds_no_edge() {
        let analyzer = analyze_all(&[("a.js", "import { createThing }")]);
        assert_eq!(analyzer.graph().edges_from("a.js").count(), 0);
        assert!(analyzer.file("a.js").expect("analyzed").dependencies.is_empty());
    }

    #[test]
    fn test_unused_exports() {
        let analyzer = analyze_all(&[
            ("a.js", "import { used } from './b.js';"),
            (
                "b.js",
                "export function used() {}\nexport function unused() {}\nexport default function main() {}",
            ),
        ]);
        assert_eq!(analyzer.get_unused_exports(), vec!["b.js:unused"]);
    }

    #[test]
    fn test_async_component_heuristics() {
        let analyzer = analyze_all(&[(
            "views.js",
            "export function createLazyChart() {}\n\
             export function createTable(dataPromise) {}\n\
             export function createHeader(title) {}",
        )]);
        assert_eq!(
            analyzer.file("views.js").expect("analyzed").async_components,
            vec!["createLazyChart", "createTable"]
        );
    }

    #[test]
    fn test_calculate_chunks_precedence() {
        let analyzer = analyze_all(&[
            ("app.js", "import { createLazyPanel } from './panel.js';"),
            ("panel.js", "export function createLazyPanel() {}"),
            (
                "node_modules/lib/index.js",
                "export function createAsyncWidget() {}",
            ),
        ]);
        let chunks = analyzer.calculate_chunks();
        assert_eq!(chunks.main.iter().collect::<Vec<_>>(), vec!["app.js"]);
        assert_eq!(
            chunks.vendor.iter().collect::<Vec<_>>(),
            vec!["node_modules/lib/index.js"]
        );
        assert_eq!(
            chunks.async_chunks["createLazyPanel"]
                .iter()
                .collect::<Vec<_>>(),
            vec!["panel.js"]
        );
        assert_eq!(chunks.file_count(), 3);
    }

    #[test]
    fn test_side_effects() {
        let analyzer = analyze_all(&[(
            "main.js",
            "import './polyfills.js';\nregisterAll();\nconsole.log('ready');",
        )]);
        assert_eq!(
            analyzer.file("main.js").expect("analyzed").side_effects,
            vec!["import ./polyfills.js", "registerAll", "console.log"]
        );
    }
}
