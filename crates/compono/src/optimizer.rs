//! AST optimization passes
//!
//! Passes run in a fixed order over one program at a time:
//!
//! 1. tree shaking of exports and components
//! 2. removal of `console.*` and `debugger` statements
//! 3. style inlining (reserved, currently a no-op)
//! 4. dead function elimination
//! 5. constant folding (reserved, currently a no-op)
//! 6. marking of small components as inlinable
//!
//! Tree shaking must run before dead code elimination: the live set of the latter
//! is seeded from the components and exports the former retained.
//!
//! Passes mutate the program in place. Statements they drop are recorded in
//! [`Program::removed`] so code emission can leave them out.

use std::collections::VecDeque;

use log::{debug, trace};
use rustc_hash::FxHashSet;

use crate::{
    analyzer::Analyzer,
    ast::{Declaration, Export, Program, Span, Statement},
};

/// Default body size, in tokens, below which a component is marked inlinable
pub const DEFAULT_INLINE_THRESHOLD: usize = 100;

/// Counts of what the passes changed in one program
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizationReport {
    pub removed_exports: usize,
    pub removed_components: usize,
    pub removed_debug_statements: usize,
    pub removed_dead_functions: usize,
    pub inlinable_components: usize,
}

impl std::ops::AddAssign for OptimizationReport {
    fn add_assign(&mut self, other: Self) {
        self.removed_exports += other.removed_exports;
        self.removed_components += other.removed_components;
        self.removed_debug_statements += other.removed_debug_statements;
        self.removed_dead_functions += other.removed_dead_functions;
        self.inlinable_components += other.inlinable_components;
    }
}

/// Runs the optimization passes
#[derive(Debug, Clone)]
pub struct Optimizer {
    inline_threshold: usize,
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new(DEFAULT_INLINE_THRESHOLD)
    }
}

impl Optimizer {
    pub fn new(inline_threshold: usize) -> Self {
        Self { inline_threshold }
    }

    /// Run every pass over `program`
    ///
    /// `analyzer` must already have seen every program of the compile so that
    /// cross-file usage is complete.
    pub fn optimize(&self, program: &mut Program, analyzer: &Analyzer) -> OptimizationReport {
        let mut report = OptimizationReport::default();
        let used = used_names(program, analyzer);

        self.tree_shake(program, &used, &mut report);
        self.remove_debug_code(program, &mut report);
        self.inline_styles(program);
        self.eliminate_dead_code(program, &mut report);
        self.fold_constants(program);
        self.inline_small_components(program, &mut report);

        debug!("Optimized '{}': {report:?}", program.file);
        report
    }

    /// Drop exports and components nothing imports
    ///
    /// Default exports are always kept. A dropped export whose declaration is
    /// still referenced inside the file is demoted to a local declaration; a
    /// dropped `export const` keeps its binding.
    fn tree_shake(
        &self,
        program: &mut Program,
        used: &FxHashSet<String>,
        report: &mut OptimizationReport,
    ) {
        let local_refs = local_references(program);
        let exports = std::mem::take(&mut program.exports);

        for mut export in exports {
            if export.is_default {
                program.exports.push(export);
                continue;
            }

            report.removed_exports += export.retain_specifiers(|name| used.contains(name));
            let keep = match &export.declaration {
                Some(decl) => used.contains(&decl.name),
                None => !export.specifiers.is_empty(),
            };

            if keep {
                program.exports.push(export);
                continue;
            }
            if export.declaration.is_some() {
                report.removed_exports += 1;
            }
            self.drop_export(program, export, &local_refs);
        }

        let before = program.components.len();
        program.components.retain(|c| used.contains(&c.name));
        report.removed_components = before - program.components.len();
        debug!(
            "Tree shaking '{}' kept {} exports and {} components",
            program.file,
            program.exports.len(),
            program.components.len()
        );
    }

    fn drop_export(&self, program: &mut Program, export: Export, local_refs: &FxHashSet<String>) {
        match (export.declaration, export.value_span) {
            (Some(decl), _) if local_refs.contains(&decl.name) => {
                trace!("Demoting export '{}' to a local declaration", decl.name);
                program.removed.push(Span::new(export.span.start, decl.span.start));
                program.body.push(Statement::Declaration(decl));
            }
            (None, Some(value)) => {
                program.removed.push(Span::new(export.span.start, value.start));
            }
            (decl, _) => {
                trace!(
                    "Removing export {:?} from '{}'",
                    decl.map(|d| d.name),
                    program.file
                );
                program.removed.push(export.span);
            }
        }
    }

    /// Remove top-level `console.*(...)` calls and `debugger` statements
    fn remove_debug_code(&self, program: &mut Program, report: &mut OptimizationReport) {
        let before = program.body.len();
        let mut removed = Vec::new();
        program.body.retain(|stmt| match stmt {
            Statement::Call(call)
                if call.callee.starts_with("console.") || call.callee == "debugger" =>
            {
                removed.push(call.span);
                false
            }
            _ => true,
        });
        report.removed_debug_statements = before - program.body.len();
        program.removed.extend(removed);
    }

    fn inline_styles(&self, program: &mut Program) {
        trace!("Style inlining is not implemented; '{}' unchanged", program.file);
    }

    /// Drop local functions that no retained code can reach
    ///
    /// The live set starts from component names and parameters, retained exports
    /// and top-level code, then follows references between declarations.
    fn eliminate_dead_code(&self, program: &mut Program, report: &mut OptimizationReport) {
        let live = live_names(program);
        let before = program.body.len();
        let mut removed = Vec::new();
        program.body.retain(|stmt| match stmt {
            Statement::Declaration(decl) if !decl.is_component() && !live.contains(&decl.name) => {
                trace!("Eliminating dead function '{}'", decl.name);
                removed.push(decl.span);
                false
            }
            _ => true,
        });
        report.removed_dead_functions = before - program.body.len();
        program.removed.extend(removed);
    }

    fn fold_constants(&self, program: &mut Program) {
        trace!("Constant folding is not implemented; '{}' unchanged", program.file);
    }

    /// Flag components whose body is shorter than the inline threshold
    fn inline_small_components(&self, program: &mut Program, report: &mut OptimizationReport) {
        let mut inlinable = FxHashSet::default();
        for component in &mut program.components {
            component.inline = component.body_span.len() < self.inline_threshold;
            if component.inline {
                inlinable.insert(component.name.clone());
            }
        }

        let sync = |decl: &mut Declaration| {
            if decl.is_component() {
                decl.inline = inlinable.contains(&decl.name);
            }
        };
        program
            .exports
            .iter_mut()
            .filter_map(|e| e.declaration.as_mut())
            .for_each(sync);
        program
            .body
            .iter_mut()
            .filter_map(|stmt| match stmt {
                Statement::Declaration(decl) => Some(decl),
                Statement::Call(_) => None,
            })
            .for_each(sync);

        report.inlinable_components = inlinable.len();
    }
}

/// Names that keep an export alive: this file's import specifiers, every
/// component imported anywhere and every other name imported anywhere
fn used_names(program: &Program, analyzer: &Analyzer) -> FxHashSet<String> {
    program
        .imports
        .iter()
        .filter(|i| !i.reexport)
        .flat_map(|i| i.specifiers.iter())
        .chain(analyzer.used_components())
        .chain(analyzer.imported_names())
        .cloned()
        .collect()
}

/// Names referenced by top-level code or by any declaration other than itself
fn local_references(program: &Program) -> FxHashSet<String> {
    let mut refs: FxHashSet<String> = program.references.iter().cloned().collect();
    for decl in program.declarations() {
        refs.extend(decl.references.iter().filter(|r| **r != decl.name).cloned());
    }
    refs
}

fn live_names(program: &Program) -> FxHashSet<String> {
    let mut live: FxHashSet<String> = FxHashSet::default();
    let mut queue: VecDeque<&str> = VecDeque::new();

    let roots = program
        .components
        .iter()
        .flat_map(|c| std::iter::once(&c.name).chain(&c.params).chain(&c.references))
        .chain(program.references.iter())
        .chain(program.exports.iter().flat_map(|e| {
            e.locals
                .iter()
                .chain(&e.specifiers)
                .chain(e.declaration.iter().flat_map(|d| &d.references))
        }))
        .chain(program.declarations().filter(|d| d.is_component()).flat_map(|d| &d.references));
    for name in roots {
        if live.insert(name.clone()) {
            queue.push_back(name);
        }
    }

    let functions: Vec<&Declaration> = program
        .body
        .iter()
        .filter_map(|stmt| match stmt {
            Statement::Declaration(decl) if !decl.is_component() => Some(decl),
            _ => None,
        })
        .collect();
    while let Some(name) = queue.pop_front() {
        for decl in functions.iter().filter(|d| d.name == name) {
            for reference in &decl.references {
                if live.insert(reference.clone()) {
                    queue.push_back(reference);
                }
            }
        }
    }
    live
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::parser::parse_source;

    /// Analyze every file, then optimize the one named `target`
    fn optimize_file(
        optimizer: &Optimizer,
        sources: &[(&str, &str)],
        target: &str,
    ) -> (Program, OptimizationReport) {
        let mut analyzer = Analyzer::default();
        let mut programs: Vec<Program> = sources
            .iter()
            .map(|(file, source)| parse_source(source, file))
            .collect();
        for program in &programs {
            analyzer.analyze(program);
        }
        let idx = programs
            .iter()
            .position(|p| p.file == target)
            .expect("target file present");
        let mut program = programs.swap_remove(idx);
        let report = optimizer.optimize(&mut program, &analyzer);
        (program, report)
    }

    fn export_names(program: &Program) -> Vec<&str> {
        program
            .exports
            .iter()
            .flat_map(Export::exported_names)
            .collect()
    }

    #[test]
    fn test_tree_shake_keeps_imported_component() {
        let (program, report) = optimize_file(
            &Optimizer::default(),
            &[
                ("a.js", "import { createButton } from './b.js';\ncreateButton();"),
                (
                    "b.js",
                    "export function createButton() { return 1; }\n\
                     export function createUnused() { return 2; }",
                ),
            ],
            "b.js",
        );
        assert_eq!(export_names(&program), vec!["createButton"]);
        let components: Vec<_> = program.components.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(components, vec!["createButton"]);
        assert_eq!(report.removed_exports, 1);
        assert_eq!(report.removed_components, 1);
    }

    #[test]
    fn test_tree_shake_plain_exports() {
        let (program, _) = optimize_file(
            &Optimizer::default(),
            &[
                ("a.js", "import { x } from './b.js';"),
                ("b.js", "export function x() {}\nexport function y() {}"),
            ],
            "b.js",
        );
        assert_eq!(export_names(&program), vec!["x"]);
    }

    #[test]
    fn test_default_export_always_retained() {
        let (program, report) = optimize_file(
            &Optimizer::default(),
            &[("main.js", "export default function main() { return 1; }")],
            "main.js",
        );
        assert_eq!(export_names(&program), vec!["default"]);
        assert_eq!(report.removed_exports, 0);
    }

    #[test]
    fn test_export_list_filtered_per_name() {
        let (program, report) = optimize_file(
            &Optimizer::default(),
            &[
                ("a.js", "import { a } from './b.js';"),
                ("b.js", "const a = 1;\nconst b = 2;\nexport { a, b };"),
            ],
            "b.js",
        );
        assert_eq!(program.exports[0].specifiers, vec!["a"]);
        assert_eq!(report.removed_exports, 1);
    }

    #[test]
    fn test_aliased_and_reexported_names_shaken_by_exported_name() {
        let (program, report) = optimize_file(
            &Optimizer::default(),
            &[
                ("main.js", "import { shown, renamed } from './index.js';"),
                (
                    "index.js",
                    "const a = 1;\nexport { a as shown, a as hidden };\n\
                     export { kept as renamed } from './x.js';",
                ),
                ("x.js", "export const kept = 1;"),
            ],
            "index.js",
        );
        assert_eq!(program.exports[0].bindings().collect::<Vec<_>>(), vec![("a", "shown")]);
        assert_eq!(
            program.exports[1].bindings().collect::<Vec<_>>(),
            vec![("kept", "renamed")]
        );
        assert_eq!(report.removed_exports, 1);
    }

    #[test]
    fn test_remove_debug_code() {
        let source = "console.log('a');\ndebugger;\nregister();";
        let (program, report) =
            optimize_file(&Optimizer::default(), &[("main.js", source)], "main.js");
        let callees: Vec<_> = program
            .body
            .iter()
            .filter_map(|stmt| match stmt {
                Statement::Call(call) => Some(call.callee.as_str()),
                Statement::Declaration(_) => None,
            })
            .collect();
        assert_eq!(callees, vec!["register"]);
        assert_eq!(report.removed_debug_statements, 2);
        let removed: Vec<_> = program.removed.iter().map(|s| s.slice(source)).collect();
        assert_eq!(removed, vec!["console.log('a');", "debugger;"]);
    }

    #[test]
    fn test_dead_code_follows_references() {
        let (program, report) = optimize_file(
            &Optimizer::default(),
            &[
                ("main.js", "import { createView } from './view.js';"),
                (
                    "view.js",
                    "function helper() { return format(); }\n\
                     function format() { return 1; }\n\
                     function unused() {}\n\
                     function onClick() {}\n\
                     export function createView(onClick) { return helper(); }",
                ),
            ],
            "view.js",
        );
        assert_eq!(
            program.function_names().collect::<Vec<_>>(),
            vec!["helper", "format", "onClick"]
        );
        assert_eq!(report.removed_dead_functions, 1);
    }

    #[test]
    fn test_dropped_export_referenced_locally_is_demoted() {
        let source = "export function helper() { return 1; }\n\
                      export function createView() { return helper(); }";
        let (program, _) = optimize_file(
            &Optimizer::default(),
            &[
                ("main.js", "import { createView } from './view.js';"),
                ("view.js", source),
            ],
            "view.js",
        );
        assert_eq!(export_names(&program), vec!["createView"]);
        assert_eq!(program.function_names().collect::<Vec<_>>(), vec!["helper"]);
        assert_eq!(program.removed.len(), 1);
        assert_eq!(program.removed[0].slice(source), "export ");
    }

    #[test]
    fn test_small_components_marked_inline() {
        let (program, report) = optimize_file(
            &Optimizer::new(6),
            &[
                ("main.js", "import { createSmall, createBig } from './ui.js';"),
                (
                    "ui.js",
                    "export function createSmall() { return 1; }\n\
                     export function createBig() { const a = 1; const b = 2; return a + b; }",
                ),
            ],
            "ui.js",
        );
        let flags: Vec<_> = program
            .components
            .iter()
            .map(|c| (c.name.as_str(), c.inline))
            .collect();
        assert_eq!(flags, vec![("createSmall", true), ("createBig", false)]);
        assert!(program.exports[0].declaration.as_ref().expect("declaration").inline);
        assert_eq!(report.inlinable_components, 1);
    }
}
