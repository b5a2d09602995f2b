//! The single-threaded reconciliation loop: a single logical thread of
//! control running one reconciliation pass at a time. One [`Engine`] owns
//! every mutable registry and state machine; every public operation and
//! every external-work completion arrives as an [`Event`] on one channel and
//! is handled by exactly one thread.
//!
//! Generalizes `BuildQueue::run_thread` (one background thread draining a
//! `Mutex<(Build, Build)>`, `rls/src/build/mod.rs`) to a wider event
//! surface.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use log::trace;
use std::sync::Mutex;

use crate::bundler::Bundler;
use crate::busy::BusyReporter;
use crate::concurrency::Jobs;
use crate::config::{ChecksumData, OrchestratorConfig};
use crate::entry_point::EntryPointKey;
use crate::infra::CdkState;
use crate::orchestrator::{HostCallbacks, OrchestratorState};
use crate::outcome::BuildOutcome;
use crate::process::{ChildHandle, ProcessRunner};
use crate::registry::Registries;
use crate::request::BuiltHandlerRequest;
use crate::watch::WatchSetManager;

pub enum Event {
    FileChanged(PathBuf),
    BuildFinished { key: EntryPointKey, outcome: BuildOutcome },
    CheckerExited { src_path: String },
    GetBuiltHandler(BuiltHandlerRequest),
    InfraFileChanged(PathBuf),
    InfraBuildFinished(crate::infra::InfraBuildOutcome),
    InfraSynthFinished(crate::infra::SynthOutcome),
    InfraCheckerExited,
    InfraDeployFinished(Result<(), String>),
    OnInput,
    Stop,
}

pub struct Engine {
    pub(crate) registries: Registries,
    pub(crate) infra: CdkState,
    pub(crate) infra_dirty: bool,
    pub(crate) infra_input_files: HashSet<PathBuf>,
    pub(crate) infra_checksum_data: ChecksumData,
    pub(crate) infra_lint_proc: Option<ChildHandle>,
    pub(crate) infra_type_check_proc: Option<ChildHandle>,
    pub(crate) infra_tsconfig: Option<PathBuf>,
    pub(crate) infra_cancel_requested: Arc<AtomicBool>,
    pub(crate) watch: WatchSetManager,
    pub(crate) busy_handlers: BusyReporter,
    pub(crate) busy_infra: BusyReporter,
    pub(crate) process_runner: Arc<dyn ProcessRunner>,
    pub(crate) bundler: Arc<dyn Bundler>,
    pub(crate) config: OrchestratorConfig,
    pub(crate) callbacks: HostCallbacks,
    pub(crate) event_tx: Sender<Event>,
    pub(crate) go_in_flight: HashSet<EntryPointKey>,
    pub(crate) builder_concurrency: usize,
    pub(crate) jobs: Jobs,
    pub(crate) stopped: bool,
    /// Published after every reconciliation pass so `Orchestrator::get_state`
    /// can read a snapshot without round-tripping through the event queue.
    pub(crate) state: Arc<Mutex<OrchestratorState>>,
}

impl Engine {
    /// Drains events until a `Stop` event or the channel is closed.
    /// Returns after the final reconciliation pass.
    pub fn run(&mut self, rx: &Receiver<Event>) {
        while let Ok(event) = rx.recv() {
            self.handle_event(event);
            if self.stopped {
                break;
            }
        }
        self.jobs.wait_for_all();
    }

    /// Drains events until every configured handler has a settled build
    /// (neither building nor queued), or the channel is closed. Used by
    /// `start` to observe the initial build's success/failure without also
    /// waiting on lint, type-check, or infra, none of which gate `start`'s
    /// outcome.
    pub fn run_until_handlers_settled(&mut self, rx: &Receiver<Event>) {
        let settled = |engine: &Engine| !engine.registries.entry_points.values().any(|ep| ep.is_dirty());
        if !settled(self) {
            while let Ok(event) = rx.recv() {
                self.handle_event(event);
                if settled(self) || self.stopped {
                    break;
                }
            }
        }
    }

    pub(crate) fn handle_event(&mut self, event: Event) {
        trace!("handling event");
        match event {
            Event::Stop => {
                self.stopped = true;
                return;
            }
            Event::FileChanged(path) => self.on_file_changed(&path),
            Event::BuildFinished { key, outcome } => self.on_build_finished(key, outcome),
            Event::CheckerExited { src_path } => self.on_checker_exited(&src_path),
            Event::GetBuiltHandler(req) => self.on_get_built_handler(req),
            Event::InfraFileChanged(path) => self.on_infra_file_changed(path),
            Event::InfraBuildFinished(outcome) => self.on_infra_build_finished(outcome),
            Event::InfraSynthFinished(outcome) => self.on_infra_synth_finished(outcome),
            Event::InfraCheckerExited => self.on_infra_checker_exited(),
            Event::InfraDeployFinished(result) => self.on_infra_deploy_finished(result),
            Event::OnInput => self.on_input(),
        }
        self.reconcile();
    }

    /// One reconciliation pass: dispatch handler builds, run the
    /// lint/type-check coordinator, advance the infra state machine, flush
    /// the watch set, and report busy edges. Called after every event.
    pub(crate) fn reconcile(&mut self) {
        self.reconcile_handlers();
        self.reconcile_checkers();
        self.reconcile_infra();
        self.watch.flush();
        self.report_busy();
    }

    fn report_busy(&mut self) {
        let handlers_busy = self.registries.entry_points.values().any(|ep| ep.is_dirty())
            || self
                .registries
                .source_paths
                .values()
                .any(|sp| sp.needs_recheck || sp.has_live_checker());
        let any_handler_error = self.registries.entry_points.values().any(|ep| ep.has_error);
        self.busy_handlers.poll(handlers_busy, any_handler_error);

        let infra_busy = !matches!(self.infra, CdkState::Idle);
        let infra_failed = matches!(
            self.infra,
            CdkState::BuildFailed | CdkState::SynthFailed
        );
        self.busy_infra.poll(infra_busy, infra_failed);

        *self.state.lock().unwrap() = OrchestratorState {
            is_processing_lambda_changes: self.busy_handlers.is_busy(),
            is_processing_infra_changes: self.busy_infra.is_busy(),
            infra_state: self.infra_state_label(),
        };
    }

    pub(crate) fn post(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }
}
