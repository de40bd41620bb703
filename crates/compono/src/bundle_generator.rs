//! Web bundle generation
//!
//! Each bundle is a self-registering script: its modules are wrapped as numbered
//! factory functions, registered in a page-wide module table and the first one is
//! executed as the bundle's entry. Module code is produced from the original
//! source text with imports and exports rewritten and optimizer removals dropped.

use std::fmt::Write as _;

use anyhow::{Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, trace};

use crate::{
    analyzer::Analyzer,
    ast::{Export, Import, Program, Span},
    resolver::{LoadedModule, resolve_specifier},
    types::{FxIndexMap, FxIndexSet},
};

/// Name of the bundle holding every statically reachable file
pub const MAIN_CHUNK: &str = "main";

/// A generated script file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub name: String,
    pub filename: String,
    pub code: String,
    pub hash: String,
    /// Length of `code` in bytes
    pub size: usize,
    pub is_async: bool,
}

/// Chunk layout for the web target
///
/// This partition is deliberately independent of [`Analyzer::calculate_chunks`]:
/// every file lands in `main`, and async components additionally get a chunk of
/// their own. The two layouts are reported side by side in compile stats.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebChunks {
    pub main: FxIndexSet<String>,
    /// Component names shipped in the main chunk
    pub components: Vec<String>,
    pub vendor: FxIndexSet<String>,
    pub async_chunks: FxIndexMap<String, FxIndexSet<String>>,
}

/// Emits bundles for a set of optimized modules
#[derive(Debug)]
pub struct BundleGenerator<'a> {
    modules: FxIndexMap<&'a str, &'a LoadedModule>,
    generated_at: DateTime<Utc>,
}

impl<'a> BundleGenerator<'a> {
    /// `modules` must start with the entry file
    pub fn new(modules: &'a [LoadedModule]) -> Self {
        Self::with_timestamp(modules, Utc::now())
    }

    pub fn with_timestamp(modules: &'a [LoadedModule], generated_at: DateTime<Utc>) -> Self {
        Self {
            modules: modules.iter().map(|m| (m.key.as_str(), m)).collect(),
            generated_at,
        }
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    /// Partition files for the web target
    pub fn create_chunks(&self, analyzer: &Analyzer) -> WebChunks {
        let mut chunks = WebChunks {
            main: self.modules.keys().map(|k| (*k).to_owned()).collect(),
            components: self
                .modules
                .values()
                .flat_map(|m| m.program.components.iter().map(|c| c.name.clone()))
                .collect(),
            ..WebChunks::default()
        };
        for (file, name) in analyzer.async_components() {
            if self.modules.contains_key(file.as_str()) {
                chunks.async_chunks.entry(name).or_default().insert(file);
            }
        }
        debug!(
            "Web chunks: {} files in main, {} async chunks",
            chunks.main.len(),
            chunks.async_chunks.len()
        );
        chunks
    }

    /// Generate the main bundle followed by one bundle per async chunk
    pub fn generate_bundles(&self, chunks: &WebChunks) -> Result<Vec<Bundle>> {
        let mut bundles = Vec::with_capacity(1 + chunks.async_chunks.len());
        if !chunks.main.is_empty() {
            bundles.push(self.generate_bundle(&chunks.main, MAIN_CHUNK)?);
        }
        for (name, files) in &chunks.async_chunks {
            let mut bundle = self.generate_bundle(files, name)?;
            bundle.is_async = true;
            bundles.push(bundle);
        }
        Ok(bundles)
    }

    /// Wrap `files` into one bundle named `name`; the first file is its entry
    pub fn generate_bundle(&self, files: &FxIndexSet<String>, name: &str) -> Result<Bundle> {
        let mut body = String::new();
        let _ = writeln!(body, "(function (modules) {{");
        body.push_str(LOADER_PRELUDE);
        let _ = writeln!(
            body,
            "  bundles[{}] = __require(modules[0][0]);",
            js_string(name)
        );
        let _ = writeln!(body, "}})([");

        for (index, key) in files.iter().enumerate() {
            let module = self
                .modules
                .get(key.as_str())
                .ok_or_else(|| anyhow!("Bundle '{name}' references unknown module '{key}'"))?;
            let code = emit_module(&module.source, &module.program);
            trace!("Module {index} of bundle '{name}' is '{key}'");
            let _ = writeln!(body, "  // {index}: {key}");
            let _ = writeln!(
                body,
                "  [{}, function (module, exports, __require) {{",
                js_string(key)
            );
            for line in code.trim().lines() {
                if line.is_empty() {
                    body.push('\n');
                } else {
                    let _ = writeln!(body, "    {line}");
                }
            }
            let _ = writeln!(body, "  }}],");
        }
        body.push_str("]);\n");

        let hash = content_hash(&body);
        let code = format!("{}\n{body}", self.header(name));
        debug!("Generated bundle '{name}' with {} modules", files.len());
        Ok(Bundle {
            name: name.to_owned(),
            filename: format!("{name}.{hash}.js"),
            size: code.len(),
            code,
            hash,
            is_async: false,
        })
    }

    fn header(&self, name: &str) -> String {
        format!(
            "/* Bundle: {name} | Generated: {} */",
            self.generated_at.to_rfc3339_opts(SecondsFormat::Millis, true)
        )
    }
}

const LOADER_PRELUDE: &str = r#"  var root = (window.__compono = window.__compono || {});
  var registry = (root.modules = root.modules || {});
  var cache = (root.cache = root.cache || {});
  var bundles = (root.bundles = root.bundles || {});
  function __require(id) {
    if (cache[id]) return cache[id].exports;
    var factory = registry[id];
    if (!factory) throw new Error("Module not found: " + id);
    var module = (cache[id] = { exports: {} });
    factory(module, module.exports, __require);
    return module.exports;
  }
  modules.forEach(function (entry) {
    if (!registry[entry[0]]) registry[entry[0]] = entry[1];
  });
"#;

/// First eight hex digits of a 32-bit rolling hash over UTF-16 code units
///
/// `hash = hash * 31 + unit` with wrapping arithmetic, then the absolute value in
/// base 16. A cache-busting fingerprint, not a collision-resistant digest.
pub fn content_hash(text: &str) -> String {
    let hash = text.encode_utf16().fold(0_i32, |hash, unit| {
        hash.wrapping_mul(31).wrapping_add(i32::from(unit))
    });
    let mut hex = format!("{:x}", hash.unsigned_abs());
    hex.truncate(8);
    hex
}

/// Quote `value` as a double-quoted JavaScript string literal
pub fn js_string(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for ch in value.chars() {
        match ch {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '<' => quoted.push_str("\\u003c"),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}

/// Produce the body of a module factory from its source and optimized program
pub fn emit_module(source: &str, program: &Program) -> String {
    let mut edits: Vec<(Span, String)> = Vec::new();
    for import in program.imports.iter().filter(|i| !i.reexport) {
        edits.push((import.span, emit_import(source, &program.file, import)));
    }
    for export in &program.exports {
        let reexported = export.source.as_deref().map(|spec| {
            program
                .imports
                .iter()
                .find(|i| i.reexport && i.span == export.span)
                .and_then(|i| i.resolved.clone())
                .unwrap_or_else(|| resolve_specifier(&program.file, spec))
        });
        edits.push((export.span, emit_export(source, export, reexported.as_deref())));
    }
    edits.extend(program.removed.iter().map(|span| (*span, String::new())));
    edits.sort_by_key(|(span, _)| span.start);

    let mut out = String::with_capacity(source.len());
    let mut cursor = 0;
    for (span, replacement) in edits {
        if span.start < cursor {
            trace!(
                "Skipping overlapping edit at {}..{} in '{}'",
                span.start, span.end, program.file
            );
            continue;
        }
        out.push_str(source.get(cursor..span.start).unwrap_or_default());
        out.push_str(&replacement);
        cursor = span.end.max(cursor);
    }
    out.push_str(source.get(cursor..).unwrap_or_default());
    out
}

fn emit_import(source: &str, file: &str, import: &Import) -> String {
    let Some(spec) = import.source.as_deref() else {
        return String::new();
    };
    if import.is_style() {
        return String::new();
    }
    let target = import
        .resolved
        .clone()
        .unwrap_or_else(|| resolve_specifier(file, spec));
    let require = format!("__require({})", js_string(&target));

    let text = import.span.slice(source);
    let clause = text
        .rfind(spec)
        .and_then(|pos| text[..pos].rfind("from"))
        .map_or("", |pos| &text[..pos]);
    let clause = clause.strip_prefix("import").unwrap_or(clause).trim();
    if clause.is_empty() {
        return format!("{require};");
    }

    let (head, named) = match (clause.find('{'), clause.rfind('}')) {
        (Some(open), Some(close)) if open < close => {
            (&clause[..open], Some(&clause[open + 1..close]))
        }
        _ => (clause, None),
    };
    let head = head.trim().trim_end_matches(',').trim_end();

    let mut lines = Vec::new();
    if let Some(namespace) = head.strip_prefix('*') {
        let name = namespace.trim_start().strip_prefix("as").unwrap_or(namespace);
        lines.push(format!("const {} = {require};", name.trim()));
    } else if !head.is_empty() {
        lines.push(format!("const {head} = {require}.default;"));
    }
    if let Some(named) = named {
        let bindings: Vec<String> = named
            .split(',')
            .map(str::trim)
            .filter(|binding| !binding.is_empty())
            .map(|binding| binding.replacen(" as ", ": ", 1))
            .collect();
        lines.push(format!("const {{ {} }} = {require};", bindings.join(", ")));
    }
    lines.join("\n")
}

fn emit_export(source: &str, export: &Export, reexported: Option<&str>) -> String {
    if let Some(decl) = &export.declaration {
        let target = if export.is_default { "default" } else { &decl.name };
        return format!(
            "{}\nexports.{target} = {};",
            decl.span.slice(source),
            decl.name
        );
    }

    let value = export.value_span.map(|span| span.slice(source));
    match value {
        Some(text) if export.is_default => {
            format!("exports.default = {};", text.trim_end().trim_end_matches(';'))
        }
        Some(text) => {
            let mut out = text.to_owned();
            for (local, exported) in export.bindings() {
                let _ = write!(out, "\nexports.{exported} = {local};");
            }
            out
        }
        None => {
            let module = reexported.map(|key| format!("__require({})", js_string(key)));
            export
                .bindings()
                .map(|(local, exported)| match &module {
                    Some(module) => format!("exports.{exported} = {module}.{local};"),
                    None => format!("exports.{exported} = {local};"),
                })
                .collect::<Vec<_>>()
                .join("\n")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::parser::parse_source;

    fn module(key: &str, source: &str) -> LoadedModule {
        LoadedModule {
            key: key.to_owned(),
            path: PathBuf::from(key),
            source: source.to_owned(),
            program: parse_source(source, key),
        }
    }

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn files(keys: &[&str]) -> FxIndexSet<String> {
        keys.iter().map(|k| (*k).to_owned()).collect()
    }

    #[test]
    fn test_content_hash_is_short_hex() {
        assert_eq!(content_hash(""), "0");
        assert_eq!(content_hash("a"), "61");
        assert_eq!(content_hash("ab"), "c21");
        let long = content_hash("function createButton() { return 1; }");
        assert!(long.len() <= 8);
        assert!(long.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_bundle_is_deterministic() {
        let modules = vec![
            module("main.js", "import { createApp } from './app.js';\ncreateApp();"),
            module("app.js", "export function createApp() { return 1; }"),
        ];
        let first = BundleGenerator::with_timestamp(&modules, fixed_time())
            .generate_bundle(&files(&["main.js", "app.js"]), "main")
            .expect("bundle");
        let second = BundleGenerator::new(&modules)
            .generate_bundle(&files(&["main.js", "app.js"]), "main")
            .expect("bundle");

        assert_eq!(first.hash, second.hash);
        assert_eq!(first.filename, second.filename);
        assert_eq!(first.filename, format!("main.{}.js", first.hash));
        assert!(
            first
                .code
                .starts_with("/* Bundle: main | Generated: 2024-05-01T12:00:00.000Z */")
        );
        assert_eq!(first.size, first.code.len());
    }

    #[test]
    fn test_content_change_changes_hash() {
        let before = vec![module("main.js", "export function createApp() { return 1; }")];
        let after = vec![module("main.js", "export function createApp() { return 2; }")];
        let hash = |modules: &[LoadedModule]| {
            BundleGenerator::new(modules)
                .generate_bundle(&files(&["main.js"]), "main")
                .expect("bundle")
                .hash
        };
        assert_ne!(hash(&before), hash(&after));
    }

    #[test]
    fn test_first_file_is_module_zero() {
        let modules = vec![module("main.js", "start();"), module("lib.js", "")];
        let bundle = BundleGenerator::new(&modules)
            .generate_bundle(&files(&["main.js", "lib.js"]), "main")
            .expect("bundle");
        let entry = bundle.code.find("// 0: main.js").expect("entry module");
        let second = bundle.code.find("// 1: lib.js").expect("second module");
        assert!(entry < second);
        assert!(bundle.code.contains("bundles[\"main\"] = __require(modules[0][0]);"));
    }

    #[test]
    fn test_unknown_module_is_an_error() {
        let modules = vec![module("main.js", "")];
        let err = BundleGenerator::new(&modules)
            .generate_bundle(&files(&["ghost.js"]), "main")
            .expect_err("unknown module");
        assert!(err.to_string().contains("ghost.js"));
    }

    #[test]
    fn test_emit_module_rewrites_imports_and_exports() {
        let source = "import { a, b } from './x.js';\n\
                      import Theme from './theme.js';\n\
                      import './reset.css';\n\
                      export function createCard(props) { return a(props); }\n\
                      export const size = 3;\n\
                      export default { b };";
        let code = emit_module(source, &parse_source(source, "ui/card.js"));
        assert_eq!(
            code,
            "const { a, b } = __require(\"ui/x.js\");\n\
             const Theme = __require(\"ui/theme.js\").default;\n\
             \n\
             function createCard(props) { return a(props); }\n\
             exports.createCard = createCard;\n\
             const size = 3;\n\
             exports.size = size;\n\
             exports.default = { b };"
        );
    }

    #[test]
    fn test_emit_import_aliases_and_namespaces() {
        let source = "import App, { helper as h } from './app.js';\n\
                      import * as utils from './utils.js';\n\
                      import './polyfill.js';";
        let code = emit_module(source, &parse_source(source, "main.js"));
        assert_eq!(
            code,
            "const App = __require(\"app.js\").default;\n\
             const { helper: h } = __require(\"app.js\");\n\
             const utils = __require(\"utils.js\");\n\
             __require(\"polyfill.js\");"
        );
    }

    #[test]
    fn test_emit_export_aliases_and_reexports() {
        let source = "const a = 1;\n\
                      export { a as b };\n\
                      export { x, y as z } from './lib/x.js';";
        let code = emit_module(source, &parse_source(source, "ui/index.js"));
        assert_eq!(
            code,
            "const a = 1;\n\
             exports.b = a;\n\
             exports.x = __require(\"ui/lib/x.js\").x;\n\
             exports.z = __require(\"ui/lib/x.js\").y;"
        );
    }

    #[test]
    fn test_emit_module_drops_removed_spans() {
        let source = "console.log('x');\nregister();";
        let mut program = parse_source(source, "main.js");
        program.removed.push(program.body[0].span());
        assert_eq!(emit_module(source, &program), "\nregister();");
    }

    #[test]
    fn test_web_chunks_put_every_file_in_main() {
        let modules = vec![
            module("main.js", "import { createLazyChart } from './chart.js';"),
            module("chart.js", "export function createLazyChart() {}"),
        ];
        let mut analyzer = Analyzer::default();
        for m in &modules {
            analyzer.analyze(&m.program);
        }
        let generator = BundleGenerator::new(&modules);
        let chunks = generator.create_chunks(&analyzer);
        assert_eq!(chunks.main, files(&["main.js", "chart.js"]));
        assert_eq!(chunks.components, vec!["createLazyChart"]);
        assert!(chunks.vendor.is_empty());
        assert_eq!(chunks.async_chunks["createLazyChart"], files(&["chart.js"]));

        let bundles = generator.generate_bundles(&chunks).expect("bundles");
        let summary: Vec<_> = bundles.iter().map(|b| (b.name.as_str(), b.is_async)).collect();
        assert_eq!(summary, vec![("main", false), ("createLazyChart", true)]);
    }
}
