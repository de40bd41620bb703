//! Page-level artifacts: runtime loader, HTML entry and service worker

use std::fmt::Write as _;

use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;

use crate::bundle_generator::{Bundle, content_hash, js_string};

/// File name of the runtime loader
pub const RUNTIME_FILENAME: &str = "runtime.js";

/// File name of the service worker
pub const SERVICE_WORKER_FILENAME: &str = "sw.js";

/// Settings that shape the runtime loader
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// Connect to the live-reload server and reload on any message
    pub live_reload: bool,
    pub live_reload_port: u16,
    pub generated_at: DateTime<Utc>,
}

/// Emit the runtime loader as a bundle named `runtime`
///
/// The loader exposes `load(url)` and `loadAsync(name)` on `window.__compono`;
/// `loadAsync` only knows the bundles flagged async.
pub fn generate_runtime(bundles: &[Bundle], options: &RuntimeOptions) -> Bundle {
    let mut body = String::from("(function (global) {\n  \"use strict\";\n");
    body.push_str("  var asyncModules = {\n");
    for bundle in bundles.iter().filter(|b| b.is_async) {
        let _ = writeln!(
            body,
            "    {}: {},",
            js_string(&bundle.name),
            js_string(&bundle.filename)
        );
    }
    body.push_str("  };\n");
    body.push_str(RUNTIME_LOADER);
    if options.live_reload {
        body.push_str(&LIVE_RELOAD.replace("__PORT__", &options.live_reload_port.to_string()));
    }
    body.push_str("})(window);\n");

    let hash = content_hash(&body);
    let code = format!(
        "/* Bundle: runtime | Generated: {} */\n{body}",
        options
            .generated_at
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    );
    debug!(
        "Generated runtime with {} async modules (live reload: {})",
        bundles.iter().filter(|b| b.is_async).count(),
        options.live_reload
    );
    Bundle {
        name: "runtime".to_owned(),
        filename: RUNTIME_FILENAME.to_owned(),
        size: code.len(),
        code,
        hash,
        is_async: false,
    }
}

const RUNTIME_LOADER: &str = r#"  var root = (global.__compono = global.__compono || {});
  var bundles = (root.bundles = root.bundles || {});

  function load(url) {
    return new Promise(function (resolve, reject) {
      var script = document.createElement("script");
      script.src = url;
      script.async = true;
      script.onload = function () { resolve(url); };
      script.onerror = function () { reject(new Error("Failed to load " + url)); };
      document.head.appendChild(script);
    });
  }

  function loadAsync(name) {
    var url = asyncModules[name];
    if (!url) return Promise.reject(new Error("Unknown async module: " + name));
    if (bundles[name]) return Promise.resolve(bundles[name]);
    return load(url).then(function () { return bundles[name]; });
  }

  root.load = load;
  root.loadAsync = loadAsync;
"#;

const LIVE_RELOAD: &str = r#"
  var socket = new WebSocket("ws://" + global.location.hostname + ":__PORT__");
  socket.onmessage = function () { global.location.reload(); };
"#;

/// HTML entry page loading every non-async bundle in order
pub fn generate_html(title: &str, bundles: &[Bundle], register_service_worker: bool) -> String {
    let mut html = String::from("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("  <meta charset=\"utf-8\">\n");
    html.push_str("  <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    let _ = writeln!(html, "  <title>{}</title>", escape_html(title));
    html.push_str("</head>\n<body>\n  <div id=\"app\"></div>\n");
    for bundle in bundles.iter().filter(|b| !b.is_async) {
        let _ = writeln!(html, "  <script src=\"{}\"></script>", bundle.filename);
    }
    if register_service_worker {
        let _ = writeln!(
            html,
            "  <script>\n    if (\"serviceWorker\" in navigator) {{\n      \
             navigator.serviceWorker.register(\"/{SERVICE_WORKER_FILENAME}\");\n    }}\n  </script>"
        );
    }
    html.push_str("</body>\n</html>\n");
    html
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Cache name derived from the set of bundle filenames
pub fn cache_name(bundles: &[Bundle]) -> String {
    let names: Vec<&str> = bundles.iter().map(|b| b.filename.as_str()).collect();
    format!("compono-{}", content_hash(&names.join(",")))
}

/// Service worker precaching every bundle plus the entry page
///
/// Fetches are served cache-first with a network fallback; activation deletes
/// every cache except the current one.
pub fn generate_service_worker(bundles: &[Bundle]) -> String {
    let mut assets = vec![js_string("/"), js_string("/index.html")];
    assets.extend(bundles.iter().map(|b| js_string(&format!("/{}", b.filename))));

    let mut sw = String::new();
    let _ = writeln!(sw, "var CACHE_NAME = {};", js_string(&cache_name(bundles)));
    let _ = writeln!(sw, "var ASSETS = [\n  {}\n];", assets.join(",\n  "));
    sw.push_str(SERVICE_WORKER_HANDLERS);
    sw
}

const SERVICE_WORKER_HANDLERS: &str = r#"
self.addEventListener("install", function (event) {
  event.waitUntil(
    caches.open(CACHE_NAME).then(function (cache) {
      return cache.addAll(ASSETS);
    })
  );
});

self.addEventListener("fetch", function (event) {
  event.respondWith(
    caches.match(event.request).then(function (cached) {
      return cached || fetch(event.request);
    })
  );
});

self.addEventListener("activate", function (event) {
  event.waitUntil(
    caches.keys().then(function (names) {
      return Promise.all(
        names
          .filter(function (name) { return name !== CACHE_NAME; })
          .map(function (name) { return caches.delete(name); })
      );
    })
  );
});
"#;
