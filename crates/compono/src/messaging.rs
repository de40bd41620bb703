//! Reload notifications
//!
//! The compiler does not run a live-reload server. It only announces build
//! outcomes through a [`ReloadPublisher`], which callers connect to whatever
//! transport pushes messages to the browser.

use std::sync::Mutex;

use log::info;

/// Topic published after a successful build
pub const BUILD_COMPLETE: &str = "build:complete";

/// Topic published after a failed build
pub const BUILD_FAILED: &str = "build:failed";

/// Sink for build events
pub trait ReloadPublisher: Send + Sync {
    fn publish(&self, topic: &str, payload: &str);
}

/// Publisher that only logs events
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPublisher;

impl ReloadPublisher for LogPublisher {
    fn publish(&self, topic: &str, payload: &str) {
        info!("[{topic}] {payload}");
    }
}

/// Publisher that keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<(String, String)>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events published so far, oldest first
    pub fn events(&self) -> Vec<(String, String)> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl ReloadPublisher for RecordingPublisher {
    fn publish(&self, topic: &str, payload: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push((topic.to_owned(), payload.to_owned()));
        }
    }
}
