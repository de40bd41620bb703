//! End-to-end compile
//!
//! A compile loads every module reachable from the entry, analyzes all of them,
//! optimizes each program in place and emits the artifacts of every configured
//! target. Artifacts are generated in memory first and only written once every
//! stage has succeeded. Any error ends the compile with a failure result; there
//! is no partial output.

use std::{
    fs,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow};
use log::{debug, info, warn};

use crate::{
    analyzer::{Analyzer, ChunkSet},
    bundle_generator::{Bundle, BundleGenerator},
    config::Config,
    optimizer::{OptimizationReport, Optimizer},
    registry::ComponentRegistry,
    resolver::{LoadedModule, ModuleResolver},
    runtime::{
        RuntimeOptions, SERVICE_WORKER_FILENAME, generate_html, generate_runtime,
        generate_service_worker,
    },
    types::Target,
};

/// Outcome of one compile
#[derive(Debug, Clone)]
pub enum CompileResult {
    Success {
        duration: Duration,
        /// Every file written, in write order
        outputs: Vec<PathBuf>,
        stats: Box<CompileStats>,
    },
    Failure {
        /// Error message including its context chain
        error: String,
        /// Full error report, only when debugging is enabled
        stack: Option<String>,
    },
}

impl CompileResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Name, file and size of an emitted bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleSummary {
    pub name: String,
    pub filename: String,
    pub size: usize,
    pub is_async: bool,
}

impl From<&Bundle> for BundleSummary {
    fn from(bundle: &Bundle) -> Self {
        Self {
            name: bundle.name.clone(),
            filename: bundle.filename.clone(),
            size: bundle.size,
            is_async: bundle.is_async,
        }
    }
}

/// Bucket sizes of the analyzer's chunk partition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkSummary {
    pub main: usize,
    pub vendor: usize,
    pub async_chunks: usize,
}

impl From<&ChunkSet> for ChunkSummary {
    fn from(chunks: &ChunkSet) -> Self {
        Self {
            main: chunks.main.len(),
            vendor: chunks.vendor.len(),
            async_chunks: chunks.async_chunks.len(),
        }
    }
}

/// What a successful compile produced and removed
#[derive(Debug, Clone, Default)]
pub struct CompileStats {
    pub modules: usize,
    pub components: usize,
    pub bundles: Vec<BundleSummary>,
    pub removed_exports: usize,
    pub removed_debug_statements: usize,
    pub removed_dead_functions: usize,
    pub inlinable_components: usize,
    /// `"file:name"` for exports nothing imports
    pub unused_exports: Vec<String>,
    /// Groups of mutually dependent files
    pub circular_dependencies: Vec<Vec<String>>,
    pub analyzer_chunks: ChunkSummary,
    pub registry: ComponentRegistry,
}

/// A file ready to be written
#[derive(Debug)]
struct Artifact {
    path: PathBuf,
    contents: String,
}

/// Compiles one project as described by a [`Config`]
#[derive(Debug, Clone)]
pub struct Compiler {
    config: Config,
    optimizer: Optimizer,
}

impl Compiler {
    pub fn new(config: Config) -> Self {
        let optimizer = Optimizer::new(config.inline_threshold);
        Self { config, optimizer }
    }

    /// Run the whole pipeline, converting any error into a failure result
    pub fn compile(&self) -> CompileResult {
        let started = Instant::now();
        match self.run() {
            Ok((outputs, stats)) => {
                let duration = started.elapsed();
                info!(
                    "Compiled {} modules into {} files in {duration:?}",
                    stats.modules,
                    outputs.len()
                );
                CompileResult::Success {
                    duration,
                    outputs,
                    stats: Box::new(stats),
                }
            }
            Err(err) => {
                warn!("Compile failed: {err:#}");
                CompileResult::Failure {
                    error: format!("{err:#}"),
                    stack: self.config.debug.then(|| format!("{err:?}")),
                }
            }
        }
    }

    fn run(&self) -> Result<(Vec<PathBuf>, CompileStats)> {
        let entry = self
            .config
            .entry
            .as_deref()
            .ok_or_else(|| anyhow!("No entry file configured"))?;
        let root = self
            .config
            .project_root()
            .ok_or_else(|| anyhow!("No entry file configured"))?;
        let entry_key = entry
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("Invalid entry path '{}'", entry.display()))?;

        debug!("Stage 1: Loading modules from '{}'", entry.display());
        let resolver = ModuleResolver::new(root, self.config.extensions.clone());
        let mut modules = resolver.load_graph(entry_key)?;

        debug!("Stage 2: Analyzing {} modules", modules.len());
        let mut analyzer = Analyzer::new(self.config.vendor_marker.as_str());
        for module in &modules {
            analyzer.analyze(&module.program);
        }
        let mut stats = self.analysis_stats(&analyzer);

        debug!("Stage 3: Optimizing");
        let mut report = OptimizationReport::default();
        for module in &mut modules {
            report += self.optimizer.optimize(&mut module.program, &analyzer);
        }
        stats.removed_exports = report.removed_exports;
        stats.removed_debug_statements = report.removed_debug_statements;
        stats.removed_dead_functions = report.removed_dead_functions;
        stats.inlinable_components = report.inlinable_components;
        stats.registry = ComponentRegistry::from_modules(&modules);
        stats.components = stats.registry.len();

        debug!("Stage 4: Generating artifacts");
        let title = entry
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("app");
        let mut artifacts = Vec::new();
        for target in &self.config.targets {
            let out_dir = self.config.out_dir.join(target.dir_name());
            let bundles = match target {
                Target::Web => self.emit_web(&modules, &analyzer, &out_dir, title, &mut artifacts)?,
            };
            stats.bundles.extend(bundles.iter().map(BundleSummary::from));
        }

        debug!("Stage 5: Writing {} artifacts", artifacts.len());
        let outputs = write_artifacts(artifacts)?;
        Ok((outputs, stats))
    }

    fn analysis_stats(&self, analyzer: &Analyzer) -> CompileStats {
        let circular_dependencies = analyzer.graph().strongly_connected_components();
        if !circular_dependencies.is_empty() {
            warn!(
                "Found {} groups of circular dependencies: {circular_dependencies:?}",
                circular_dependencies.len()
            );
        }
        let unused_exports = analyzer.get_unused_exports();
        if !unused_exports.is_empty() {
            info!("Unused exports: {}", unused_exports.join(", "));
        }
        CompileStats {
            modules: analyzer.graph().len(),
            unused_exports,
            circular_dependencies,
            analyzer_chunks: ChunkSummary::from(&analyzer.calculate_chunks()),
            ..CompileStats::default()
        }
    }

    /// Generate the web target's bundles, runtime, HTML and service worker
    fn emit_web(
        &self,
        modules: &[LoadedModule],
        analyzer: &Analyzer,
        out_dir: &Path,
        title: &str,
        artifacts: &mut Vec<Artifact>,
    ) -> Result<Vec<Bundle>> {
        let generator = BundleGenerator::new(modules);
        let chunks = generator.create_chunks(analyzer);
        let mut bundles = generator.generate_bundles(&chunks)?;

        let runtime = generate_runtime(
            &bundles,
            &RuntimeOptions {
                live_reload: self.config.mode.is_development(),
                live_reload_port: self.config.live_reload_port,
                generated_at: generator.generated_at(),
            },
        );
        bundles.insert(0, runtime);

        let html = generate_html(title, &bundles, self.config.service_worker);
        if self.config.service_worker {
            artifacts.push(Artifact {
                path: out_dir.join(SERVICE_WORKER_FILENAME),
                contents: generate_service_worker(&bundles),
            });
        }
        artifacts.extend(bundles.iter().map(|bundle| Artifact {
            path: out_dir.join(&bundle.filename),
            contents: bundle.code.clone(),
        }));
        artifacts.push(Artifact {
            path: out_dir.join("index.html"),
            contents: html,
        });
        Ok(bundles)
    }
}

fn write_artifacts(artifacts: Vec<Artifact>) -> Result<Vec<PathBuf>> {
    let mut outputs = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        if let Some(dir) = artifact.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create output directory '{}'", dir.display()))?;
        }
        fs::write(&artifact.path, &artifact.contents)
            .with_context(|| format!("Failed to write '{}'", artifact.path.display()))?;
        debug!(
            "Wrote {} ({} bytes)",
            artifact.path.display(),
            artifact.contents.len()
        );
        outputs.push(artifact.path);
    }
    Ok(outputs)
}
