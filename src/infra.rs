//! The Infrastructure State Machine, `CdkState`. Orders rebuild → synth →
//! optional redeploy for the infra code, with coalescing of edits that
//! arrive while an async step is in flight.
//!
//! Grounded in the same single-control-thread, event-driven shape as
//! `scheduler.rs` and `checker.rs`; the per-stack checksum comparison is
//! grounded in `actions/post_build.rs`, which hashes analysis data with
//! `std::collections::hash_map::DefaultHasher` to detect whether anything
//! actually changed before doing further work.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{error, trace, warn};

use crate::checker::{has_extension, is_ts_or_js, under_third_party};
use crate::concurrency::ConcurrentJob;
use crate::config::ChecksumData;
use crate::engine::{Engine, Event};

/// A CDK synth result: one template (or equivalent) per stack, keyed by
/// stack name. Opaque beyond being hashed into a checksum per stack.
pub type SynthManifest = HashMap<String, serde_json::Value>;

/// The state of the infra pipeline. `Idle`, `BuildFailed`, and `SynthFailed`
/// are terminal until the next file change; the rest represent an async
/// step in flight or awaiting the user.
#[derive(Debug)]
pub enum CdkState {
    Idle,
    BuildPending,
    Building,
    /// Build succeeded; lint/type-check were already kicked off for the new
    /// input set, waiting only for this engine to get around to starting
    /// synth (no async op is in flight yet, so an edit here discards it and
    /// returns straight to `BuildPending` rather than setting a latch).
    SynthPending,
    Synthesizing,
    AwaitingApproval { checksums: ChecksumData },
    Deploying { checksums: ChecksumData },
    BuildFailed,
    SynthFailed,
}

/// Result of one infra build (the `Building` state), parallel to
/// [`crate::outcome::BuildOutcome`] but without a [`crate::entry_point::BuildArtifact`]
/// since there is no single entry point for the whole infra app.
pub enum InfraBuildOutcome {
    Success { input_files: std::collections::HashSet<PathBuf> },
    Failure { message: String },
}

/// Why an in-flight synth ended without producing a usable manifest.
pub enum SynthError {
    /// The host cancelled the synth because a new edit arrived mid-flight;
    /// an in-flight synth may be cancelled by the host.
    Cancelled,
    Failed(String),
}

/// Outcome of one synth attempt, reported back as an [`Event::InfraSynthFinished`].
pub enum SynthOutcome {
    Success { checksums: ChecksumData },
    Cancelled,
    Failure { message: String },
}

/// Hashes each stack's manifest entry independently so an unchanged stack's
/// checksum is stable across synths, the same technique `post_build.rs`
/// uses to detect unchanged analysis data via `DefaultHasher`.
fn compute_checksums(manifest: &SynthManifest) -> ChecksumData {
    manifest
        .iter()
        .map(|(stack, template)| {
            let bytes = serde_json::to_vec(template).unwrap_or_default();
            let mut hasher = DefaultHasher::new();
            Hash::hash_slice(&bytes, &mut hasher);
            (stack.clone(), format!("{:x}", hasher.finish()))
        })
        .collect()
}

impl Engine {
    /// Dispatches the next async step, if any, for the current infra
    /// state. Called from every reconciliation pass.
    pub(crate) fn reconcile_infra(&mut self) {
        match self.infra {
            CdkState::BuildPending => self.start_infra_build(),
            CdkState::SynthPending => self.start_infra_synth(),
            _ => {}
        }
    }

    pub(crate) fn on_infra_file_changed(&mut self, _path: PathBuf) {
        match self.infra {
            CdkState::Idle | CdkState::BuildFailed | CdkState::SynthFailed => {
                trace!("infra file changed, entering BuildPending");
                self.infra = CdkState::BuildPending;
            }
            CdkState::BuildPending => {}
            CdkState::Building | CdkState::Deploying { .. } => {
                trace!("infra file changed mid-flight, latching a follow-up rebuild");
                self.infra_dirty = true;
            }
            CdkState::Synthesizing => {
                trace!("infra file changed mid-synth, requesting cancellation");
                self.infra_dirty = true;
                self.infra_cancel_requested.store(true, Ordering::SeqCst);
            }
            CdkState::SynthPending | CdkState::AwaitingApproval { .. } => {
                // No async op in flight yet (or the host is only waiting on
                // `onInput`); the queued step is simply discarded.
                self.infra = CdkState::BuildPending;
            }
        }
    }

    fn start_infra_build(&mut self) {
        self.infra = CdkState::Building;
        let (job, token) = ConcurrentJob::new();
        self.jobs.add(job);
        let bundler = self.bundler.clone();
        let app_path = self.config.app_path.clone();
        let tx = self.event_tx.clone();
        std::thread::spawn(move || {
            let outcome = match bundler.build_infra(&app_path) {
                Ok(outcome) => outcome,
                Err(e) => InfraBuildOutcome::Failure { message: e.to_string() },
            };
            drop(token);
            let _ = tx.send(Event::InfraBuildFinished(outcome));
        });
    }

    pub(crate) fn on_infra_build_finished(&mut self, outcome: InfraBuildOutcome) {
        match outcome {
            InfraBuildOutcome::Success { input_files } => {
                trace!("infra build succeeded");
                let old = std::mem::replace(&mut self.infra_input_files, input_files.clone());
                let added: Vec<_> = input_files.difference(&old).cloned().collect();
                let removed: Vec<_> = old.difference(&input_files).cloned().collect();
                self.watch.queue_add(added);
                self.watch.queue_remove(removed);
                // Issue the real watcher calls before advancing any state
                // below (kicking off checkers, transitioning `infra`).
                self.watch.flush();

                // Kick off lint/type-check scoped to the new infra input
                // set, identical policy to the handler checker coordinator.
                self.restart_infra_checkers();

                if self.infra_dirty {
                    self.infra_dirty = false;
                    self.infra = CdkState::BuildPending;
                } else {
                    self.infra = CdkState::SynthPending;
                }
            }
            InfraBuildOutcome::Failure { message } => {
                error!("infra build failed: {}", message);
                if self.infra_dirty {
                    self.infra_dirty = false;
                    self.infra = CdkState::BuildPending;
                } else {
                    self.infra = CdkState::BuildFailed;
                }
            }
        }
    }

    fn start_infra_synth(&mut self) {
        self.infra = CdkState::Synthesizing;
        self.infra_cancel_requested.store(false, Ordering::SeqCst);
        let (job, token) = ConcurrentJob::new();
        self.jobs.add(job);
        let cancel = self.infra_cancel_requested.clone();
        let callbacks = self.callbacks.clone();
        let tx = self.event_tx.clone();
        std::thread::spawn(move || {
            let outcome = match (callbacks.on_re_synth_app)(&cancel) {
                Ok(manifest) => SynthOutcome::Success { checksums: compute_checksums(&manifest) },
                Err(SynthError::Cancelled) => SynthOutcome::Cancelled,
                Err(SynthError::Failed(message)) => SynthOutcome::Failure { message },
            };
            drop(token);
            let _ = tx.send(Event::InfraSynthFinished(outcome));
        });
    }

    pub(crate) fn on_infra_synth_finished(&mut self, outcome: SynthOutcome) {
        match outcome {
            SynthOutcome::Success { checksums } => {
                if self.infra_dirty {
                    self.infra_dirty = false;
                    self.infra = CdkState::BuildPending;
                } else {
                    trace!("infra synth succeeded, awaiting approval");
                    self.infra = CdkState::AwaitingApproval { checksums };
                }
            }
            SynthOutcome::Cancelled => {
                trace!("infra synth cancelled, restarting from build");
                self.infra_dirty = false;
                self.infra = CdkState::BuildPending;
            }
            SynthOutcome::Failure { message } => {
                error!("infra synth failed: {}", message);
                if self.infra_dirty {
                    self.infra_dirty = false;
                    self.infra = CdkState::BuildPending;
                } else {
                    self.infra = CdkState::SynthFailed;
                }
            }
        }
    }

    /// Approves a pending deploy. A no-op outside `AwaitingApproval` (there
    /// is nothing to approve).
    pub(crate) fn on_input(&mut self) {
        if let CdkState::AwaitingApproval { checksums } = &self.infra {
            let checksums = checksums.clone();
            self.start_infra_deploy(checksums);
        } else {
            trace!("onInput() ignored: not awaiting approval");
        }
    }

    fn start_infra_deploy(&mut self, new_checksums: ChecksumData) {
        // Only changed stacks are sent to the host's deploy callback.
        let changed: ChecksumData = new_checksums
            .iter()
            .filter(|(stack, sum)| self.infra_checksum_data.get(*stack) != Some(*sum))
            .map(|(stack, sum)| (stack.clone(), sum.clone()))
            .collect();
        self.infra = CdkState::Deploying { checksums: new_checksums };
        let (job, token) = ConcurrentJob::new();
        self.jobs.add(job);
        let callbacks = self.callbacks.clone();
        let tx = self.event_tx.clone();
        std::thread::spawn(move || {
            let result = (callbacks.on_re_deploy_app)(changed).map_err(|e| e.to_string());
            drop(token);
            let _ = tx.send(Event::InfraDeployFinished(result));
        });
    }

    pub(crate) fn on_infra_deploy_finished(&mut self, result: Result<(), String>) {
        let deployed_checksums = match &self.infra {
            CdkState::Deploying { checksums } => checksums.clone(),
            _ => ChecksumData::new(),
        };
        match result {
            Ok(()) => {
                trace!("infra deploy succeeded");
                self.infra_checksum_data.extend(deployed_checksums);
            }
            Err(e) => warn!("infra deploy failed: {}", e),
        }
        if self.infra_dirty {
            self.infra_dirty = false;
            self.infra = CdkState::BuildPending;
        } else {
            self.infra = CdkState::Idle;
        }
    }

    fn restart_infra_checkers(&mut self) {
        let lint_files: Vec<PathBuf> = self
            .infra_input_files
            .iter()
            .filter(|f| is_ts_or_js(f) && !under_third_party(f))
            .cloned()
            .collect();
        let ts_files: Vec<PathBuf> =
            self.infra_input_files.iter().filter(|f| has_extension(f, "ts")).cloned().collect();
        let tsconfig = self.infra_tsconfig.clone();

        if let Some(proc) = self.infra_lint_proc.take() {
            let runner = self.process_runner.clone();
            proc.kill(|pid| runner.kill(pid));
            spawn_infra_checker_exit_watcher(&proc, self.event_tx.clone());
        }
        if let Some(proc) = self.infra_type_check_proc.take() {
            let runner = self.process_runner.clone();
            proc.kill(|pid| runner.kill(pid));
            spawn_infra_checker_exit_watcher(&proc, self.event_tx.clone());
        }

        if self.config.is_lint_enabled && !lint_files.is_empty() {
            let color = std::env::var("NO_COLOR").map(|v| v != "true" && v != "1").unwrap_or(true);
            match self.process_runner.spawn_lint(&lint_files, color) {
                Ok(proc) => {
                    spawn_infra_checker_exit_watcher(&proc, self.event_tx.clone());
                    self.infra_lint_proc = Some(proc);
                }
                Err(e) => warn!("failed to start infra lint: {}", e),
            }
        }

        if self.config.is_type_check_enabled {
            if let Some(tsconfig) = &tsconfig {
                if !ts_files.is_empty() {
                    let pretty = std::env::var("NO_COLOR").is_err();
                    let dir = tsconfig.parent().unwrap_or_else(|| tsconfig.as_path());
                    match self.process_runner.spawn_type_check(dir, pretty) {
                        Ok(proc) => {
                            spawn_infra_checker_exit_watcher(&proc, self.event_tx.clone());
                            self.infra_type_check_proc = Some(proc);
                        }
                        Err(e) => warn!("failed to start infra type-check: {}", e),
                    }
                }
            }
        }
    }

    pub(crate) fn infra_state_label(&self) -> &'static str {
        match self.infra {
            CdkState::Idle => "idle",
            CdkState::BuildPending => "build_pending",
            CdkState::Building => "building",
            CdkState::SynthPending => "synth_pending",
            CdkState::Synthesizing => "synthesizing",
            CdkState::AwaitingApproval { .. } => "awaiting_approval",
            CdkState::Deploying { .. } => "deploying",
            CdkState::BuildFailed => "build_failed",
            CdkState::SynthFailed => "synth_failed",
        }
    }

    pub(crate) fn on_infra_checker_exited(&mut self) {
        if let Some(proc) = &self.infra_lint_proc {
            if !proc.is_live() {
                self.infra_lint_proc = None;
            }
        }
        if let Some(proc) = &self.infra_type_check_proc {
            if !proc.is_live() {
                self.infra_type_check_proc = None;
            }
        }
    }
}

fn spawn_infra_checker_exit_watcher(
    proc: &crate::process::ChildHandle,
    tx: crossbeam_channel::Sender<Event>,
) {
    let done = proc.completion_signal();
    std::thread::spawn(move || {
        let _ = done.recv();
        let _ = tx.send(Event::InfraCheckerExited);
    });
}

/// A cancellable synth callback handle, injected at construction time
/// (`onReSynthApp`). Takes a shared flag the core sets when a
/// new edit arrives mid-synth so the host can abort early and return
/// `SynthError::Cancelled` instead of racing a stale synth to completion.
pub type ReSynthFn =
    dyn Fn(&AtomicBool) -> Result<SynthManifest, SynthError> + Send + Sync;

/// The deploy callback handle (`onReDeployApp`), given only the
/// stacks whose checksum changed.
pub type ReDeployFn = dyn Fn(ChecksumData) -> anyhow::Result<()> + Send + Sync;
