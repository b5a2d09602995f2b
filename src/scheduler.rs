//! The Handler Build Scheduler. Generalizes `BuildQueue` (one slot per
//! priority, one build thread, `rls/src/build/mod.rs`) to three runtime
//! families with different dispatch rules.

use std::path::Path;

use log::{error, trace, warn};

use crate::bundler::NodeBuildRequest;
use crate::concurrency::ConcurrentJob;
use crate::engine::{Engine, Event};
use crate::entry_point::{BuildArtifact, EntryPointKey, RebuildPriority, Runtime};
use crate::outcome::BuildOutcome;

impl Engine {
    pub(crate) fn on_file_changed(&mut self, path: &Path) {
        let is_go_source = path.extension().map_or(false, |ext| ext == "go");
        if is_go_source {
            let keys = self.registries.all_go_keys();
            trace!("go source changed, marking {} go entry points dirty", keys.len());
            for key in keys {
                self.mark_dirty(&key, RebuildPriority::Low);
            }
            return;
        }

        let keys: Vec<EntryPointKey> = self.registries.file_index.entry_points_for(path).to_vec();
        if keys.is_empty() {
            trace!("file change matches no entry point, ignoring: {:?}", path);
            return;
        }
        for key in keys {
            self.mark_dirty(&key, RebuildPriority::Low);
        }
    }

    pub(crate) fn mark_dirty(&mut self, key: &EntryPointKey, priority: RebuildPriority) {
        if let Some(ep) = self.registries.entry_points.get_mut(key) {
            ep.raise_priority(priority);
        }
    }

    /// Classifies, dispatches under concurrency caps, and emits busy
    /// edges (the edge emission itself lives in `Engine::report_busy`, this
    /// only dispatches new work).
    pub(crate) fn reconcile_handlers(&mut self) {
        self.dispatch_node_builds();
        self.dispatch_go_builds();
        self.dispatch_python_builds();
    }

    fn dispatch_node_builds(&mut self) {
        let dirty: Vec<EntryPointKey> = self
            .registries
            .entry_points
            .iter()
            .filter(|(_, ep)| {
                ep.runtime == Runtime::Node
                    && ep.rebuild_priority != RebuildPriority::Off
                    && !ep.is_building()
            })
            .map(|(k, _)| k.clone())
            .collect();
        for key in dirty {
            self.start_node_build(&key);
        }
    }

    fn start_node_build(&mut self, key: &EntryPointKey) {
        let handler_cfg = match self.config.lambda_handlers.iter().find(|h| {
            h.src_path == key.src_path && h.handler == key.handler
        }) {
            Some(h) => h.clone(),
            None => return,
        };
        let (job, token) = ConcurrentJob::new();
        let (shutdown_job, shutdown_token) = ConcurrentJob::new();
        self.jobs.add(shutdown_job);
        let ep = self.registries.entry_points.get_mut(key).expect("registered entry point");
        ep.build_in_flight = Some(job);
        ep.rebuild_priority = RebuildPriority::Off;

        let app_path = self.config.app_path.clone();
        let bundler = self.bundler.clone();
        let tx = self.event_tx.clone();
        let key = key.clone();
        let tsconfig = ep.tsconfig.clone();

        std::thread::spawn(move || {
            let req = NodeBuildRequest {
                key: &key,
                app_path: &app_path,
                handler: &handler_cfg.handler,
                bundle: handler_cfg.bundle.as_ref(),
                tsconfig: tsconfig.as_deref(),
                incremental_builder: None,
            };
            let outcome = match bundler.build_node(req) {
                Ok((outcome, _builder)) => outcome,
                Err(e) => BuildOutcome::Failure { message: e.to_string() },
            };
            // Drop both tokens before publishing the outcome: by the time the
            // event is observable on the control thread, `ep.build_in_flight`
            // is safe to drop without racing this thread's own exit.
            drop(token);
            drop(shutdown_token);
            let _ = tx.send(Event::BuildFinished { key, outcome });
        });
    }

    fn dispatch_go_builds(&mut self) {
        let mut candidates: Vec<EntryPointKey> = self
            .registries
            .entry_points
            .iter()
            .filter(|(_, ep)| {
                ep.runtime == Runtime::Go
                    && ep.rebuild_priority != RebuildPriority::Off
                    && !ep.is_building()
            })
            .map(|(k, _)| k.clone())
            .collect();

        // HIGH-priority items precede LOW; within a priority, insertion
        // order.
        candidates.sort_by_key(|k| {
            let ep = &self.registries.entry_points[k];
            (std::cmp::Reverse(ep.rebuild_priority), self.registries.order_of(k))
        });

        let mut free_slots = self.builder_concurrency.saturating_sub(self.go_in_flight.len());
        for key in candidates {
            if free_slots == 0 {
                break;
            }
            self.start_go_build(&key);
            free_slots -= 1;
        }
    }

    fn start_go_build(&mut self, key: &EntryPointKey) {
        let handler_cfg = match self.config.lambda_handlers.iter().find(|h| {
            h.src_path == key.src_path && h.handler == key.handler
        }) {
            Some(h) => h.clone(),
            None => return,
        };
        let (job, token) = ConcurrentJob::new();
        let (shutdown_job, shutdown_token) = ConcurrentJob::new();
        self.jobs.add(shutdown_job);
        let ep = self.registries.entry_points.get_mut(key).expect("registered entry point");
        ep.build_in_flight = Some(job);
        ep.rebuild_priority = RebuildPriority::Off;
        self.go_in_flight.insert(key.clone());

        let handler_path = self.config.app_path.join(&key.src_path).join(&handler_cfg.handler);
        let out_rel = Path::new(".build").join(format!(
            "{}{}",
            key.to_string().replace('/', "_"),
            self.process_runner_suffix()
        ));
        let runner = self.process_runner.clone();
        let tx = self.event_tx.clone();
        let key = key.clone();
        let out_dir = handler_path.parent().map(Path::to_path_buf).unwrap_or_default();

        std::thread::spawn(move || {
            let outcome = match runner.spawn_go_build(&handler_path, &out_rel) {
                Ok(child) => match child.wait_blocking() {
                    Ok(result) if result.success => BuildOutcome::Success {
                        input_files: std::iter::once(handler_path.clone()).collect(),
                        artifact: BuildArtifact {
                            entry_file: handler_path.clone(),
                            handler_symbol: String::new(),
                            out_dir,
                            original_path: key.handler.clone(),
                        },
                    },
                    Ok(_) => BuildOutcome::Failure { message: format!("go build failed for {}", key) },
                    Err(e) => BuildOutcome::Failure { message: e },
                },
                Err(e) => BuildOutcome::Failure { message: format!("could not spawn go build: {}", e) },
            };
            drop(token);
            drop(shutdown_token);
            let _ = tx.send(Event::BuildFinished { key, outcome });
        });
    }

    fn process_runner_suffix(&self) -> &'static str {
        if cfg!(windows) {
            ".exe"
        } else {
            ""
        }
    }

    /// No build step; transition is synchronous and always succeeds.
    /// Never participates in file-change-driven rebuilds beyond the
    /// initial build.
    fn dispatch_python_builds(&mut self) {
        let dirty: Vec<EntryPointKey> = self
            .registries
            .entry_points
            .iter()
            .filter(|(_, ep)| ep.runtime == Runtime::Python && ep.rebuild_priority != RebuildPriority::Off)
            .map(|(k, _)| k.clone())
            .collect();
        for key in dirty {
            let handler_cfg = match self.config.lambda_handlers.iter().find(|h| {
                h.src_path == key.src_path && h.handler == key.handler
            }) {
                Some(h) => h.clone(),
                None => continue,
            };
            let handler_path = self.config.app_path.join(&key.src_path).join(&handler_cfg.handler);
            let out_dir = handler_path.parent().map(Path::to_path_buf).unwrap_or_default();
            let outcome = BuildOutcome::Success {
                input_files: Default::default(),
                artifact: BuildArtifact {
                    entry_file: handler_path.clone(),
                    handler_symbol: String::new(),
                    out_dir,
                    original_path: handler_cfg.handler.clone(),
                },
            };
            self.on_build_finished(key, outcome);
        }
    }

    /// Handles a completed build's outcome.
    pub(crate) fn on_build_finished(&mut self, key: EntryPointKey, outcome: BuildOutcome) {
        self.go_in_flight.remove(&key);
        let src_path = key.src_path.clone();
        match outcome {
            BuildOutcome::Success { input_files, artifact } => {
                trace!("build succeeded for {}", key);
                let old_inputs = {
                    let ep = match self.registries.entry_points.get_mut(&key) {
                        Some(ep) => ep,
                        None => return,
                    };
                    ep.build_in_flight = None;
                    ep.has_error = false;
                    let old_inputs = ep.input_files.clone();
                    ep.input_files = input_files.clone();
                    ep.out_artifact = Some(artifact);
                    old_inputs
                };

                let (added, removed) = self.registries.file_index.diff_update(&key, &old_inputs, &input_files);
                let is_first_build = old_inputs.is_empty();
                self.watch.queue_add(added.clone());
                self.watch.queue_remove(removed);
                // Issue the real watcher calls before waking waiters or
                // advancing any state below.
                self.watch.flush();

                // A newly added file may have been edited between build
                // start and completion, predating watch registration;
                // there is no mtime signal available here, so the
                // conservative choice is to always re-mark dirty at LOW
                // rather than risk silently losing an edit. Skipped on the
                // entry point's first successful build, where every input
                // file is necessarily "added" and there is no prior build
                // to have raced against.
                let ep = self.registries.entry_points.get_mut(&key).expect("entry point");
                if !added.is_empty() && !is_first_build {
                    ep.raise_priority(RebuildPriority::Low);
                }
                if ep.rebuild_priority == RebuildPriority::Off {
                    for waiter in ep.pending_requests.drain(..) {
                        if let Some(artifact) = ep.out_artifact.clone() {
                            let _ = waiter.send(Ok(crate::entry_point::BuiltHandler {
                                runtime: ep.runtime,
                                artifact,
                            }));
                        }
                    }
                }

                let union_inputs: Vec<_> = self
                    .registries
                    .keys_in_source_path(&src_path)
                    .flat_map(|k| self.registries.entry_points[k].input_files.iter().cloned())
                    .collect();
                let sp = self.registries.ensure_source_path(&src_path);
                sp.needs_recheck = true;
                sp.input_files = union_inputs.into_iter().collect();
            }
            BuildOutcome::Failure { message } => {
                error!("build failed for {}: {}", key, message);
                let ep = match self.registries.entry_points.get_mut(&key) {
                    Some(ep) => ep,
                    None => return,
                };
                ep.build_in_flight = None;
                ep.has_error = true;
                for waiter in ep.pending_requests.drain(..) {
                    let _ = waiter.send(Err(crate::error::RequestError::BuildFailed {
                        src_path: key.src_path.clone(),
                        handler: key.handler.clone(),
                        cause: message.clone(),
                    }));
                }
                if !self.registries.source_paths.contains_key(&src_path) {
                    warn!("build failed before first successful build for {}", key);
                }
            }
        }
    }
}
