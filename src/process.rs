//! Child-process spawning for go builds, lint, and type-check, grounded
//! in the command-building style of `build/external.rs`.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{bounded, select, Receiver};
use log::trace;

/// Result of a finished child process: whether it exited successfully. The
/// exit code itself is not otherwise interpreted by the core.
#[derive(Debug, Clone)]
pub struct ChildOutcome {
    pub success: bool,
}

// An uninhabited message type: the channel is never sent a value, only
// closed. Closing it is how a single exit event is broadcast to every
// independent clone of `done` (same trick as `concurrency::ConcurrentJob`).
pub enum Never {}

/// A handle to a spawned child with cooperative `kill()`: killing does not
/// reap the child itself, it only requests termination. A background waiter
/// thread reports the actual exit, and only then is the handle considered
/// finished (Design Notes: "the scheduler may abandon a handle only after
/// the child reports exit").
///
/// More than one caller may need to learn of the same child's exit (the
/// registry polling `is_live`, and a dedicated watcher thread re-triggering
/// reconciliation) so completion is broadcast via a closed channel rather
/// than delivered to a single consumer.
pub struct ChildHandle {
    kill_requested: Arc<AtomicBool>,
    pid: u32,
    done: Receiver<Never>,
    outcome: Arc<Mutex<Option<Result<ChildOutcome, String>>>>,
}

impl ChildHandle {
    /// Wraps an already-spawned child process. Exposed publicly so a custom
    /// `ProcessRunner` (tests, an alternative toolchain) can produce a
    /// `ChildHandle` for its own spawned children without reimplementing the
    /// waiter-thread/broadcast plumbing.
    pub fn from_child(child: Child) -> Self {
        Self::spawn(child)
    }

    fn spawn(mut child: Child) -> Self {
        let pid = child.id();
        let (tx, rx) = bounded::<Never>(0);
        let outcome = Arc::new(Mutex::new(None));
        let kill_requested = Arc::new(AtomicBool::new(false));
        let outcome_writer = Arc::clone(&outcome);
        thread::spawn(move || {
            let result = child
                .wait()
                .map(|status| ChildOutcome { success: status.success() })
                .map_err(|e| e.to_string());
            *outcome_writer.lock().unwrap() = Some(result);
            drop(tx); // closing broadcasts completion to every clone of `rx`
        });
        ChildHandle { kill_requested, pid, done: rx, outcome }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_live(&self) -> bool {
        !is_closed(&self.done)
    }

    /// A fresh signal of this same child's completion, independent from the
    /// original handle's (closing is broadcast to every clone).
    pub fn completion_signal(&self) -> Receiver<Never> {
        self.done.clone()
    }

    /// Blocks the calling thread until the child exits, returning the
    /// outcome observed by the background waiter thread. Safe to call more
    /// than once, or from more than one clone of this handle's signal.
    pub fn wait_blocking(&self) -> Result<ChildOutcome, String> {
        let _ = self.done.recv();
        match self.outcome.lock().unwrap().clone() {
            Some(result) => result,
            None => Err("child waiter thread dropped".to_owned()),
        }
    }

    /// Requests termination. Does not block; the handle remains "live" until
    /// the waiter thread observes the exit.
    pub fn kill(&self, kill_fn: impl FnOnce(u32)) {
        if !self.kill_requested.swap(true, Ordering::SeqCst) {
            trace!("killing stale checker process pid={}", self.pid);
            kill_fn(self.pid);
        }
    }
}

fn is_closed(chan: &Receiver<Never>) -> bool {
    select! {
        recv(chan) -> msg => match msg {
            Err(_) => true,
            Ok(never) => match never {}
        },
        default => false,
    }
}

/// Externally injected process-spawning collaborator. Kept as a trait so
/// tests can substitute fakes instead of spawning real subprocesses.
pub trait ProcessRunner: Send + Sync {
    fn spawn_go_build(&self, handler_path: &Path, out_rel_path: &Path) -> io::Result<ChildHandle>;
    fn spawn_lint(&self, files: &[PathBuf], color: bool) -> io::Result<ChildHandle>;
    fn spawn_type_check(&self, src_path: &Path, pretty: bool) -> io::Result<ChildHandle>;
    fn kill(&self, pid: u32);
}

/// Default `ProcessRunner` backed by real subprocesses.
pub struct SystemProcessRunner {
    pub go_binary: PathBuf,
    pub lint_worker: PathBuf,
    pub type_check_binary: PathBuf,
}

impl SystemProcessRunner {
    pub fn new(go_binary: PathBuf, lint_worker: PathBuf, type_check_binary: PathBuf) -> Self {
        SystemProcessRunner { go_binary, lint_worker, type_check_binary }
    }
}

impl ProcessRunner for SystemProcessRunner {
    fn spawn_go_build(&self, handler_path: &Path, out_rel_path: &Path) -> io::Result<ChildHandle> {
        let child = Command::new(&self.go_binary)
            .arg("build")
            .arg("-ldflags")
            .arg("-s -w")
            .arg("-o")
            .arg(out_rel_path)
            .arg(handler_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        Ok(ChildHandle::spawn(child))
    }

    fn spawn_lint(&self, files: &[PathBuf], color: bool) -> io::Result<ChildHandle> {
        let mut cmd = Command::new(&self.lint_worker);
        cmd.args(files);
        if !color {
            cmd.arg("--no-color");
        }
        cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        Ok(ChildHandle::spawn(cmd.spawn()?))
    }

    fn spawn_type_check(&self, src_path: &Path, pretty: bool) -> io::Result<ChildHandle> {
        let child = Command::new(&self.type_check_binary)
            .current_dir(src_path)
            .arg("--noEmit")
            .arg("--pretty")
            .arg(if pretty { "true" } else { "false" })
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()?;
        Ok(ChildHandle::spawn(child))
    }

    fn kill(&self, pid: u32) {
        #[cfg(unix)]
        {
            let _ = Command::new("kill").arg(pid.to_string()).status();
        }
        #[cfg(windows)]
        {
            let _ = Command::new("taskkill").args(&["/PID", &pid.to_string(), "/F"]).status();
        }
    }
}
