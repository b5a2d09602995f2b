//! The public API surface. `Orchestrator` owns the background control
//! thread running [`Engine::run`] and talks to
//! it exclusively over the event channel — mirroring the
//! `ActionProvider`/`BuildQueue` split between a thin public facade and a
//! single background worker thread.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use log::info;

use crate::bundler::Bundler;
use crate::config::OrchestratorConfig;
use crate::engine::{Engine, Event};
use crate::entry_point::{BuiltHandler, EntryPointKey};
use crate::error::{ConfigError, RequestError};
use crate::infra::{CdkState, ReDeployFn, ReSynthFn};
use crate::process::ProcessRunner;
use crate::registry::Registries;
use crate::request::BuiltHandlerRequest;
use crate::watch::{NullWatchSink, WatchSetManager, WatchSink};

/// Host-supplied infra callbacks (`onReSynthApp`, `onReDeployApp`).
/// Not serializable, so kept out of [`OrchestratorConfig`]. Cheap to clone:
/// each field is an `Arc` to the same underlying closure, shared by every
/// infra background thread that needs to invoke it.
#[derive(Clone)]
pub struct HostCallbacks {
    pub on_re_synth_app: Arc<ReSynthFn>,
    pub on_re_deploy_app: Arc<ReDeployFn>,
}

/// A coarse snapshot for `getState()`, republished by the control thread
/// after every reconciliation pass.
#[derive(Debug, Clone)]
pub struct OrchestratorState {
    pub is_processing_lambda_changes: bool,
    pub is_processing_infra_changes: bool,
    pub infra_state: &'static str,
}

impl Default for OrchestratorState {
    fn default() -> Self {
        OrchestratorState {
            is_processing_lambda_changes: false,
            is_processing_infra_changes: false,
            infra_state: "idle",
        }
    }
}

/// The live rebuild orchestrator. Constructed once per dev-loop session;
/// `start` spins up the background control thread, `stop` tears it down.
pub struct Orchestrator {
    event_tx: Sender<Event>,
    worker: Option<JoinHandle<()>>,
    state: Arc<Mutex<OrchestratorState>>,
}

impl Orchestrator {
    /// Builds every configured handler once, synchronously, before
    /// returning; installs watchers unless `is_test` is set.
    pub fn start(
        config: OrchestratorConfig,
        callbacks: HostCallbacks,
        process_runner: Arc<dyn ProcessRunner>,
        bundler: Arc<dyn Bundler>,
        watch_sink: Option<Box<dyn WatchSink>>,
        is_test: bool,
    ) -> Result<Self, ConfigError> {
        if config.lambda_handlers.is_empty() {
            return Err(ConfigError::NoHandlers);
        }

        let mut registries = Registries::new();
        for h in &config.lambda_handlers {
            let tsconfig = if matches!(h.runtime, crate::entry_point::Runtime::Node) {
                find_tsconfig(&config.app_path, &h.src_path)
            } else {
                None
            };
            registries.register(
                EntryPointKey::new(h.src_path.clone(), h.handler.clone()),
                h.runtime,
                tsconfig,
            );
        }

        let sink: Box<dyn WatchSink> = if is_test {
            Box::new(NullWatchSink)
        } else {
            watch_sink.unwrap_or_else(|| Box::new(NullWatchSink))
        };

        let infra_tsconfig = find_tsconfig(&config.app_path, ".");
        let builder_concurrency = num_cpus::get();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let state = Arc::new(Mutex::new(OrchestratorState::default()));

        let mut engine = Engine {
            registries,
            infra: CdkState::Idle,
            infra_dirty: false,
            infra_input_files: config.cdk_input_files.iter().cloned().collect::<HashSet<_>>(),
            infra_checksum_data: config.cdk_checksum_data.clone(),
            infra_lint_proc: None,
            infra_type_check_proc: None,
            infra_tsconfig,
            infra_cancel_requested: Arc::new(AtomicBool::new(false)),
            watch: WatchSetManager::new(sink),
            busy_handlers: crate::busy::BusyReporter::new("lambda handlers"),
            busy_infra: crate::busy::BusyReporter::new("infrastructure"),
            process_runner,
            bundler,
            config,
            callbacks,
            event_tx: event_tx.clone(),
            go_in_flight: HashSet::new(),
            builder_concurrency,
            jobs: crate::concurrency::Jobs::default(),
            stopped: false,
            state: Arc::clone(&state),
        };

        let handler_count = engine.registries.entry_points.len();

        // Initial build: mark every entry point dirty at LOW and run the
        // reconciliation loop to quiescence before handing off to the
        // background thread, so a failure can be reported synchronously.
        for key in engine.registries.entry_points.keys().cloned().collect::<Vec<_>>() {
            engine.mark_dirty(&key, crate::entry_point::RebuildPriority::Low);
        }
        engine.reconcile();
        engine.run_until_handlers_settled(&event_rx);

        let any_handler_failed = engine.registries.entry_points.values().any(|ep| ep.has_error);
        if any_handler_failed {
            return Err(ConfigError::InitialBuildFailed);
        }

        info!("orchestrator starting with {} lambda handlers", handler_count);
        let worker = std::thread::spawn(move || {
            engine.run(&event_rx);
        });

        Ok(Orchestrator { event_tx, worker: Some(worker), state })
    }

    /// Stops accepting new events; the background thread drains
    /// in-flight jobs before exiting.
    pub fn stop(&mut self) {
        let _ = self.event_tx.send(Event::Stop);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    /// Returns the current busy-status snapshot.
    pub fn get_state(&self) -> OrchestratorState {
        self.state.lock().unwrap().clone()
    }

    /// Blocks the calling thread until the handler is clean, or its build
    /// fails.
    pub fn get_built_handler(
        &self,
        src_path: impl Into<String>,
        handler: impl Into<String>,
    ) -> Result<BuiltHandler, RequestError> {
        let key = EntryPointKey::new(src_path.into(), handler.into());
        let (req, rx) = BuiltHandlerRequest::new(key);
        if self.event_tx.send(Event::GetBuiltHandler(req)).is_err() {
            return Err(RequestError::ShuttingDown);
        }
        rx.recv().unwrap_or(Err(RequestError::ShuttingDown))
    }

    /// Notifies the engine that user input arrived, for callers that want
    /// to prioritize interactive rebuilds.
    pub fn on_input(&self) {
        let _ = self.event_tx.send(Event::OnInput);
    }

    /// Feeds a watcher-observed file change into the engine. The host's
    /// watcher decides whether a path belongs to the handler file index or
    /// the infra input set and posts the matching event.
    pub fn notify_file_changed(&self, path: PathBuf, is_infra: bool) {
        let event = if is_infra { Event::InfraFileChanged(path) } else { Event::FileChanged(path) };
        let _ = self.event_tx.send(event);
    }
}

fn find_tsconfig(app_path: &std::path::Path, src_path: &str) -> Option<PathBuf> {
    let candidate = app_path.join(src_path).join("tsconfig.json");
    if candidate.is_file() {
        Some(candidate)
    } else {
        let root_candidate = app_path.join("tsconfig.json");
        if root_candidate.is_file() {
            Some(root_candidate)
        } else {
            None
        }
    }
}
