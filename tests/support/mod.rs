//! Fakes for the host-injected collaborators, so integration tests drive the
//! orchestrator without a real bundler, Go toolchain, linter, or type
//! checker. Mirrors the `tests/support/` split between generic test
//! plumbing (`timeout`) and fixture helpers (`project`).

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rebuild_orchestrator::{
    BuildArtifact, BuildOutcome, Bundler, ChildHandle, InfraBuildOutcome, NodeBuildRequest,
    ProcessRunner, WatchSink,
};

/// Panics if `func` has not returned within `dur`, same contract as
/// `tests::support::timeout` in the rls test suite.
pub fn timeout<F>(dur: Duration, func: F)
where
    F: FnOnce() + Send + 'static,
{
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        func();
        let _ = tx.send(());
    });
    rx.recv_timeout(dur).expect("test timed out");
}

/// A fake node/infra bundler. Successful builds return a fixed input-file
/// set per entry point (defaulting to the single `src_path` file passed in
/// the test fixture); entries named in `fail_handlers` report failure
/// instead. A configurable delay lets tests observe the `Building`/dirty
/// window before completion.
pub struct FakeBundler {
    pub delay: Duration,
    pub node_inputs: Mutex<HashMap<String, HashSet<PathBuf>>>,
    pub fail_handlers: Mutex<HashSet<String>>,
    pub infra_inputs: Mutex<HashSet<PathBuf>>,
    pub infra_fail: Mutex<bool>,
    pub node_build_count: AtomicUsize,
    pub infra_build_count: AtomicUsize,
}

impl FakeBundler {
    pub fn new() -> Self {
        FakeBundler {
            delay: Duration::from_millis(20),
            node_inputs: Mutex::new(HashMap::new()),
            fail_handlers: Mutex::new(HashSet::new()),
            infra_inputs: Mutex::new(HashSet::new()),
            infra_fail: Mutex::new(false),
            node_build_count: AtomicUsize::new(0),
            infra_build_count: AtomicUsize::new(0),
        }
    }

    pub fn set_inputs(&self, key: &str, files: HashSet<PathBuf>) {
        self.node_inputs.lock().unwrap().insert(key.to_owned(), files);
    }

    pub fn set_failing(&self, key: &str, failing: bool) {
        let mut fail = self.fail_handlers.lock().unwrap();
        if failing {
            fail.insert(key.to_owned());
        } else {
            fail.remove(key);
        }
    }
}

impl Bundler for FakeBundler {
    fn build_node(
        &self,
        req: NodeBuildRequest<'_>,
    ) -> anyhow::Result<(BuildOutcome, Option<Box<dyn std::any::Any + Send>>)> {
        self.node_build_count.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        let key_str = req.key.to_string();
        if self.fail_handlers.lock().unwrap().contains(&key_str) {
            return Ok((BuildOutcome::Failure { message: "simulated build failure".to_owned() }, None));
        }
        let input_files = self
            .node_inputs
            .lock()
            .unwrap()
            .get(&key_str)
            .cloned()
            .unwrap_or_else(|| {
                std::iter::once(req.app_path.join(req.key.src_path.clone())).collect()
            });
        let artifact = BuildArtifact {
            entry_file: req.app_path.join(&req.key.src_path),
            handler_symbol: req.handler.rsplit('.').next().unwrap_or("").to_owned(),
            out_dir: req.app_path.join(".build"),
            original_path: req.handler.to_owned(),
        };
        Ok((BuildOutcome::Success { input_files, artifact }, None))
    }

    fn build_infra(&self, app_path: &Path) -> anyhow::Result<InfraBuildOutcome> {
        self.infra_build_count.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        if *self.infra_fail.lock().unwrap() {
            return Ok(InfraBuildOutcome::Failure { message: "simulated infra build failure".to_owned() });
        }
        let _ = app_path;
        Ok(InfraBuildOutcome::Success { input_files: self.infra_inputs.lock().unwrap().clone() })
    }
}

/// Spawns trivial real `sh` processes so `ChildHandle`'s waiter thread has a
/// genuine child to observe, without needing a real Go toolchain, linter, or
/// type checker. `delay` controls how long each fake "build"/"check"
/// appears to run; `fail` makes it exit non-zero.
pub struct FakeProcessRunner {
    pub go_delay: Duration,
    pub lint_delay: Duration,
    pub go_fail: Mutex<HashSet<PathBuf>>,
    pub go_in_flight: Arc<AtomicUsize>,
    pub go_peak: Arc<AtomicUsize>,
    pub kills: Mutex<Vec<u32>>,
    pub lint_spawns: AtomicUsize,
    pub type_check_spawns: AtomicUsize,
}

impl FakeProcessRunner {
    pub fn new() -> Self {
        FakeProcessRunner {
            go_delay: Duration::from_millis(150),
            lint_delay: Duration::from_millis(300),
            go_fail: Mutex::new(HashSet::new()),
            go_in_flight: Arc::new(AtomicUsize::new(0)),
            go_peak: Arc::new(AtomicUsize::new(0)),
            kills: Mutex::new(Vec::new()),
            lint_spawns: AtomicUsize::new(0),
            type_check_spawns: AtomicUsize::new(0),
        }
    }

    fn spawn_sh(&self, exit_code: i32, delay: Duration, on_exit: impl FnOnce() + Send + 'static) -> io::Result<ChildHandle> {
        let millis = delay.as_millis();
        let child = Command::new("sh")
            .arg("-c")
            .arg(format!("sleep {}.{:03}; exit {}", millis / 1000, millis % 1000, exit_code))
            .spawn()?;
        let handle = ChildHandle::from_child(child);
        let done = handle.completion_signal();
        std::thread::spawn(move || {
            let _ = done.recv();
            on_exit();
        });
        Ok(handle)
    }
}

impl ProcessRunner for FakeProcessRunner {
    fn spawn_go_build(&self, handler_path: &Path, _out_rel_path: &Path) -> io::Result<ChildHandle> {
        let fail = self.go_fail.lock().unwrap().contains(handler_path);
        self.go_in_flight.fetch_add(1, Ordering::SeqCst);
        self.go_peak.fetch_max(self.go_in_flight.load(Ordering::SeqCst), Ordering::SeqCst);
        let in_flight = self.go_in_flight.clone();
        self.spawn_sh(if fail { 1 } else { 0 }, self.go_delay, move || {
            in_flight.fetch_sub(1, Ordering::SeqCst);
        })
    }

    fn spawn_lint(&self, _files: &[PathBuf], _color: bool) -> io::Result<ChildHandle> {
        self.lint_spawns.fetch_add(1, Ordering::SeqCst);
        self.spawn_sh(0, self.lint_delay, || {})
    }

    fn spawn_type_check(&self, _src_path: &Path, _pretty: bool) -> io::Result<ChildHandle> {
        self.type_check_spawns.fetch_add(1, Ordering::SeqCst);
        self.spawn_sh(0, Duration::from_millis(300), || {})
    }

    fn kill(&self, pid: u32) {
        self.kills.lock().unwrap().push(pid);
        #[cfg(unix)]
        {
            let _ = Command::new("kill").arg(pid.to_string()).status();
        }
    }
}

/// Records every add/remove call instead of talking to a real watcher.
#[derive(Default)]
pub struct RecordingWatchSink {
    pub added: Mutex<Vec<PathBuf>>,
    pub removed: Mutex<Vec<PathBuf>>,
}

impl WatchSink for RecordingWatchSink {
    fn add(&self, files: &[PathBuf]) {
        self.added.lock().unwrap().extend_from_slice(files);
    }

    fn remove(&self, files: &[PathBuf]) {
        self.removed.lock().unwrap().extend_from_slice(files);
    }
}

/// Lets a test keep an `Arc` handle to assert on after handing a sink to
/// `Orchestrator::start`, which otherwise takes ownership via `Box`. A
/// newtype is required here because `WatchSink` (local) can't be implemented
/// directly for `Arc<RecordingWatchSink>` (foreign generic container) under
/// the orphan rules.
pub struct ArcWatchSink(pub Arc<RecordingWatchSink>);

impl WatchSink for ArcWatchSink {
    fn add(&self, files: &[PathBuf]) {
        self.0.add(files);
    }

    fn remove(&self, files: &[PathBuf]) {
        self.0.remove(files);
    }
}
