use std::{fs, path::Path};

use compono::{
    compiler::{CompileResult, CompileStats, Compiler},
    config::Config,
    types::Mode,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn write(root: &Path, key: &str, contents: &str) {
    let path = root.join(key);
    fs::create_dir_all(path.parent().expect("fixture has a parent")).expect("create dirs");
    fs::write(path, contents).expect("write fixture");
}

fn config(dir: &TempDir, entry: &str) -> Config {
    Config {
        entry: Some(dir.path().join("src").join(entry)),
        out_dir: dir.path().join("dist"),
        ..Config::default()
    }
}

fn expect_success(result: CompileResult) -> CompileStats {
    match result {
        CompileResult::Success { stats, outputs, .. } => {
            assert!(outputs.iter().all(|path| path.is_file()));
            *stats
        }
        CompileResult::Failure { error, .. } => panic!("compile failed: {error}"),
    }
}

fn three_file_project(dir: &TempDir) {
    let src = dir.path().join("src");
    write(
        &src,
        "main.js",
        "import { createApp } from './app.js';\n\
         console.log('booting');\n\
         document.body.appendChild(createApp());",
    );
    write(
        &src,
        "app.js",
        "import { createButton } from './ui/button.js';\n\
         export function createApp() { return createButton('go'); }",
    );
    write(
        &src,
        "ui/button.js",
        "function unusedHelper() { return 0; }\n\
         export function createButton(label) { return label; }\n\
         export function createUnused() { return 2; }",
    );
}

#[test]
fn test_three_files_produce_main_and_runtime() {
    let dir = TempDir::new().expect("temp dir");
    three_file_project(&dir);

    let stats = expect_success(Compiler::new(config(&dir, "main.js")).compile());
    let names: Vec<_> = stats.bundles.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["runtime", "main"]);
    assert_eq!(stats.modules, 3);

    let web = dir.path().join("dist/web");
    let html = fs::read_to_string(web.join("index.html")).expect("index.html written");
    let runtime = html
        .find("<script src=\"runtime.js\"></script>")
        .expect("runtime script tag");
    let main = html
        .find(&format!("<script src=\"{}\"></script>", stats.bundles[1].filename))
        .expect("main script tag");
    let body_end = html.find("</body>").expect("closing body");
    assert!(runtime < main && main < body_end);
    assert!(web.join("runtime.js").is_file());
    assert!(!web.join("sw.js").exists());
}

#[test]
fn test_optimizations_reach_bundle_code() {
    let dir = TempDir::new().expect("temp dir");
    three_file_project(&dir);

    let stats = expect_success(Compiler::new(config(&dir, "main.js")).compile());
    let main = &stats.bundles[1];
    let code = fs::read_to_string(dir.path().join("dist/web").join(&main.filename))
        .expect("main bundle written");

    assert!(code.starts_with("/* Bundle: main | Generated: "));
    assert!(code.contains("exports.createButton = createButton;"));
    assert!(code.contains("const { createButton } = __require(\"ui/button.js\");"));
    assert!(!code.contains("createUnused"));
    assert!(!code.contains("unusedHelper"));
    assert!(!code.contains("console.log"));
    assert_eq!(stats.removed_exports, 1);
    assert_eq!(stats.removed_debug_statements, 1);
    assert_eq!(stats.removed_dead_functions, 1);
    assert!(stats.registry.load_component("createButton").is_ok());
    assert!(stats.registry.load_component("createUnused").is_err());
}

#[test]
fn test_repeated_compiles_are_deterministic() {
    let dir = TempDir::new().expect("temp dir");
    three_file_project(&dir);
    let compiler = Compiler::new(config(&dir, "main.js"));

    let first = expect_success(compiler.compile());
    let second = expect_success(compiler.compile());
    assert_eq!(first.bundles, second.bundles);
}

#[test]
fn test_circular_imports_do_not_block_bundling() {
    let dir = TempDir::new().expect("temp dir");
    let src = dir.path().join("src");
    write(&src, "a.js", "import { b } from './b.js';\nexport function a() { return b(); }");
    write(&src, "b.js", "import { a } from './a.js';\nexport function b() { return a(); }");

    let stats = expect_success(Compiler::new(config(&dir, "a.js")).compile());
    assert_eq!(stats.circular_dependencies.len(), 1);
    let mut group = stats.circular_dependencies[0].clone();
    group.sort();
    assert_eq!(group, vec!["a.js", "b.js"]);
}

#[test]
fn test_async_components_get_their_own_bundle() {
    let dir = TempDir::new().expect("temp dir");
    let src = dir.path().join("src");
    write(&src, "main.js", "import { createLazyChart } from './chart.js';");
    write(&src, "chart.js", "export function createLazyChart(dataPromise) { return 1; }");

    let mut config = config(&dir, "main.js");
    config.mode = Mode::Development;
    config.service_worker = true;
    let stats = expect_success(Compiler::new(config).compile());

    let chart = stats
        .bundles
        .iter()
        .find(|b| b.name == "createLazyChart")
        .expect("async bundle");
    assert!(chart.is_async);

    let web = dir.path().join("dist/web");
    let html = fs::read_to_string(web.join("index.html")).expect("index.html");
    assert!(!html.contains(&chart.filename));
    assert!(html.contains("serviceWorker"));

    let runtime = fs::read_to_string(web.join("runtime.js")).expect("runtime.js");
    assert!(runtime.contains(&chart.filename));
    assert!(runtime.contains("WebSocket"));

    let sw = fs::read_to_string(web.join("sw.js")).expect("sw.js");
    assert!(sw.contains(&format!("\"/{}\"", chart.filename)));
    assert!(sw.contains("\"/index.html\""));
}

#[test]
fn test_missing_import_fails_without_output() {
    let dir = TempDir::new().expect("temp dir");
    write(
        &dir.path().join("src"),
        "main.js",
        "import { createGhost } from './ghost.js';",
    );

    let result = Compiler::new(config(&dir, "main.js")).compile();
    let CompileResult::Failure { error, stack } = result else {
        panic!("expected failure");
    };
    assert!(error.contains("./ghost.js"), "{error}");
    assert_eq!(stack, None);
    assert!(!dir.path().join("dist").exists());

    let mut debug_config = config(&dir, "main.js");
    debug_config.debug = true;
    let CompileResult::Failure { stack, .. } = Compiler::new(debug_config).compile() else {
        panic!("expected failure");
    };
    assert!(stack.is_some());
}

#[test]
fn test_unwritable_output_fails_the_compile() {
    let dir = TempDir::new().expect("temp dir");
    three_file_project(&dir);
    let blocker = dir.path().join("dist");
    fs::write(&blocker, "not a directory").expect("write blocker");

    let result = Compiler::new(config(&dir, "main.js")).compile();
    let CompileResult::Failure { error, .. } = result else {
        panic!("expected failure");
    };
    assert!(error.contains(&blocker.display().to_string()), "{error}");
    assert_eq!(
        fs::read_to_string(&blocker).expect("blocker untouched"),
        "not a directory"
    );
}

#[test]
fn test_barrel_reexports_are_bundled() {
    let dir = TempDir::new().expect("temp dir");
    let src = dir.path().join("src");
    write(&src, "main.js", "import { createCard } from './ui/index.js';\ncreateCard();");
    write(&src, "ui/index.js", "export { createCard } from './card.js';");
    write(&src, "ui/card.js", "export function createCard() { return 1; }");

    let stats = expect_success(Compiler::new(config(&dir, "main.js")).compile());
    assert_eq!(stats.modules, 3);
    let main = &stats.bundles[1];
    let code = fs::read_to_string(dir.path().join("dist/web").join(&main.filename))
        .expect("main bundle written");
    assert!(code.contains("exports.createCard = __require(\"ui/card.js\").createCard;"));
    assert!(code.contains("exports.createCard = createCard;"));
}
