//! Accounting for long-running work that happens off the control thread.

use std::thread;

use crossbeam_channel::{bounded, select, Receiver, Select, Sender};

/// A handle for some long-running computation off the control thread (a
/// spawned build, a child process, a host callback running on its own
/// thread). It can be used, indirectly, to wait for completion.
///
/// All concurrent activity — spawning a thread, starting a child process,
/// invoking a host callback asynchronously — should be covered by a
/// `ConcurrentJob` so that `Jobs::wait_for_all` gives a complete picture of
/// in-flight work, which keeps tests (and graceful shutdown) deterministic.
///
/// `JobToken` is the worker-side counterpart. Dropping a `JobToken` signals
/// that the corresponding job has finished.
#[must_use]
pub struct ConcurrentJob {
    chan: Receiver<Never>,
}

pub struct JobToken {
    _chan: Sender<Never>,
}

#[derive(Default)]
pub struct Jobs {
    jobs: Vec<ConcurrentJob>,
}

impl Jobs {
    pub fn add(&mut self, job: ConcurrentJob) {
        self.gc();
        self.jobs.push(job);
    }

    /// Blocks the current thread until all pending jobs are finished.
    pub fn wait_for_all(&mut self) {
        while !self.jobs.is_empty() {
            let done: usize = {
                let mut select = Select::new();
                for job in &self.jobs {
                    select.recv(&job.chan);
                }

                let oper = select.select();
                let oper_index = oper.index();
                let chan = &self.jobs[oper_index].chan;
                assert!(oper.recv(chan).is_err());
                oper_index
            };
            drop(self.jobs.swap_remove(done));
        }
    }

    pub fn is_empty(&mut self) -> bool {
        self.gc();
        self.jobs.is_empty()
    }

    fn gc(&mut self) {
        self.jobs.retain(|job| !job.is_completed())
    }
}

impl ConcurrentJob {
    pub fn new() -> (ConcurrentJob, JobToken) {
        let (tx, rx) = bounded(0);
        let job = ConcurrentJob { chan: rx };
        let token = JobToken { _chan: tx };
        (job, token)
    }

    fn is_completed(&self) -> bool {
        is_closed(&self.chan)
    }
}

impl Drop for ConcurrentJob {
    fn drop(&mut self) {
        if self.is_completed() || thread::panicking() {
            return;
        }
        panic!("orphaned concurrent job");
    }
}

// We never actually send a message through the channel, we just check
// whether it has been closed, so the message type is uninhabited.
enum Never {}

/// Non-blocking.
fn is_closed(chan: &Receiver<Never>) -> bool {
    select! {
        recv(chan) -> msg => match msg {
            Err(_) => true,
            Ok(never) => match never {}
        },
        default => false,
    }
}
