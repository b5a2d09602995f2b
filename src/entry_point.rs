//! The per-handler record and its key.

use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::path::PathBuf;

use crossbeam_channel::Sender;

use crate::concurrency::ConcurrentJob;
use crate::error::RequestError;

/// Runtime family for a handler. Detection beyond this coarse distinction is
/// a host concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Runtime {
    Node,
    Go,
    Python,
}

/// Ordering hint among dirty entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RebuildPriority {
    Off,
    Low,
    High,
}

/// Identifies an entry point by `(srcPath, handler)`. Joined with `#`, which
/// cannot appear in either component (both are filesystem paths / symbol
/// names), so the join is unambiguous and can be used directly as a map key
/// and log token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryPointKey {
    pub src_path: String,
    pub handler: String,
}

impl EntryPointKey {
    pub fn new(src_path: impl Into<String>, handler: impl Into<String>) -> Self {
        EntryPointKey { src_path: src_path.into(), handler: handler.into() }
    }
}

impl fmt::Display for EntryPointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.src_path, self.handler)
    }
}

/// Descriptor of the last successful build output (`outArtifact`).
#[derive(Debug, Clone)]
pub struct BuildArtifact {
    pub entry_file: PathBuf,
    pub handler_symbol: String,
    pub out_dir: PathBuf,
    /// Original handler path, posix-separated, as given in config.
    pub original_path: String,
}

/// What a waiter on `getBuiltHandler` receives.
#[derive(Debug, Clone)]
pub struct BuiltHandler {
    pub runtime: Runtime,
    pub artifact: BuildArtifact,
}

pub(crate) type Waiter = Sender<Result<BuiltHandler, RequestError>>;

/// Per-handler record. Created at startup and lives for the life of the
/// process.
pub struct EntryPoint {
    pub key: EntryPointKey,
    pub runtime: Runtime,
    pub has_error: bool,
    /// A handle to the in-flight build, if one is running.
    pub build_in_flight: Option<ConcurrentJob>,
    pub out_artifact: Option<BuildArtifact>,
    pub input_files: HashSet<PathBuf>,
    pub rebuild_priority: RebuildPriority,
    pub pending_requests: VecDeque<Waiter>,
    /// Node-like only.
    pub tsconfig: Option<PathBuf>,
    /// Node-like only; opaque to the core. Disposed of
    /// (dropped) on teardown, never inspected.
    pub incremental_builder: Option<Box<dyn Any + Send>>,
}

impl EntryPoint {
    pub fn new(key: EntryPointKey, runtime: Runtime, tsconfig: Option<PathBuf>) -> Self {
        EntryPoint {
            key,
            runtime,
            has_error: false,
            build_in_flight: None,
            out_artifact: None,
            input_files: HashSet::new(),
            rebuild_priority: RebuildPriority::Off,
            pending_requests: VecDeque::new(),
            tsconfig,
            incremental_builder: None,
        }
    }

    pub fn is_building(&self) -> bool {
        self.build_in_flight.is_some()
    }

    pub fn is_dirty(&self) -> bool {
        self.is_building() || self.rebuild_priority != RebuildPriority::Off
    }

    /// Sanity check used by tests: a waiter can only be pending while the
    /// entry point is building or dirty, never while fully clean.
    #[cfg(test)]
    pub fn check_invariants(&self) {
        if !self.pending_requests.is_empty() {
            assert!(self.is_building() || self.rebuild_priority != RebuildPriority::Off);
        }
        if self.rebuild_priority == RebuildPriority::High {
            // Need not hold immediately after a successful build; callers
            // check this only at the points where it actually applies, not
            // unconditionally here.
        }
    }

    pub fn raise_priority(&mut self, priority: RebuildPriority) {
        if priority > self.rebuild_priority {
            self.rebuild_priority = priority;
        }
    }
}
