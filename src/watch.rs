//! Batches add/remove calls to the underlying file watcher as input-file
//! sets evolve. The watcher itself is an external collaborator; the core
//! only ever diffs old vs new sets and issues the difference.

use std::path::PathBuf;

/// The externally injected, debounced recursive watcher.
pub trait WatchSink: Send + Sync {
    fn add(&self, files: &[PathBuf]);
    fn remove(&self, files: &[PathBuf]);
}

/// A `WatchSink` that drops everything, used when `start(isTest = true)`
/// installs no real watchers.
pub struct NullWatchSink;

impl WatchSink for NullWatchSink {
    fn add(&self, _files: &[PathBuf]) {}
    fn remove(&self, _files: &[PathBuf]) {}
}

pub struct WatchSetManager {
    sink: Box<dyn WatchSink>,
    pending_add: Vec<PathBuf>,
    pending_remove: Vec<PathBuf>,
}

impl WatchSetManager {
    pub fn new(sink: Box<dyn WatchSink>) -> Self {
        WatchSetManager { sink, pending_add: Vec::new(), pending_remove: Vec::new() }
    }

    pub fn queue_add(&mut self, files: impl IntoIterator<Item = PathBuf>) {
        self.pending_add.extend(files);
    }

    pub fn queue_remove(&mut self, files: impl IntoIterator<Item = PathBuf>) {
        self.pending_remove.extend(files);
    }

    /// Issues batched add/remove calls to the underlying watcher. This
    /// happens before waking waiters or advancing state, so callers must
    /// invoke this before those steps within a reconciliation pass.
    pub fn flush(&mut self) {
        if !self.pending_add.is_empty() {
            self.sink.add(&self.pending_add);
            self.pending_add.clear();
        }
        if !self.pending_remove.is_empty() {
            self.sink.remove(&self.pending_remove);
            self.pending_remove.clear();
        }
    }
}
