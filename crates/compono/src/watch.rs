//! Watch mode
//!
//! Filesystem events are forwarded into a channel that a single loop consumes,
//! so compiles never overlap and run in the order changes arrive. Events that
//! pile up while a compile is running are coalesced into one follow-up compile.

use std::{
    path::Path,
    sync::mpsc::{Receiver, channel},
};

use anyhow::{Context, Result, anyhow};
use log::{debug, info, trace};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::{
    compiler::{CompileResult, Compiler},
    config::Config,
    messaging::{BUILD_COMPLETE, BUILD_FAILED, ReloadPublisher},
};

/// Watch the project directory and recompile on every change
///
/// Runs an initial compile, then blocks until the watcher shuts down.
pub fn watch(
    config: Config,
    publisher: &dyn ReloadPublisher,
    callback: impl FnMut(&CompileResult),
) -> Result<()> {
    let root = config
        .project_root()
        .ok_or_else(|| anyhow!("No entry file configured"))?
        .to_path_buf();
    let out_dir = std::path::absolute(&config.out_dir)
        .with_context(|| format!("Invalid output directory '{}'", config.out_dir.display()))?;

    let (tx, rx) = channel();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) if is_relevant(&event, &out_dir) => {
                trace!("Change detected: {:?}", event.paths);
                let _ = tx.send(());
            }
            Ok(_) => {}
            Err(err) => debug!("Watch error: {err}"),
        },
        notify::Config::default(),
    )
    .context("Failed to create file watcher")?;
    watcher
        .watch(&root, RecursiveMode::Recursive)
        .with_context(|| format!("Failed to watch '{}'", root.display()))?;
    info!("Watching {} for changes", root.display());

    run_watch_loop(&Compiler::new(config), &rx, publisher, callback);
    Ok(())
}

/// Content changes outside the output directory
fn is_relevant(event: &Event, out_dir: &Path) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event.paths.iter().any(|path| !is_output(path, out_dir))
}

fn is_output(path: &Path, out_dir: &Path) -> bool {
    std::path::absolute(path).is_ok_and(|path| path.starts_with(out_dir))
}

/// Compile once, then once more per batch of change notifications
///
/// Returns when every sender of `changes` has been dropped.
pub fn run_watch_loop(
    compiler: &Compiler,
    changes: &Receiver<()>,
    publisher: &dyn ReloadPublisher,
    mut callback: impl FnMut(&CompileResult),
) {
    loop {
        let result = compiler.compile();
        publish(publisher, &result);
        callback(&result);

        if changes.recv().is_err() {
            debug!("Watcher closed; leaving watch loop");
            return;
        }
        let coalesced = changes.try_iter().count();
        if coalesced > 0 {
            trace!("Coalesced {coalesced} additional change events");
        }
    }
}

fn publish(publisher: &dyn ReloadPublisher, result: &CompileResult) {
    match result {
        CompileResult::Success { stats, .. } => {
            let files: Vec<&str> = stats.bundles.iter().map(|b| b.filename.as_str()).collect();
            publisher.publish(BUILD_COMPLETE, &files.join(","));
        }
        CompileResult::Failure { error, .. } => publisher.publish(BUILD_FAILED, error),
    }
}
