//! The Lint/TypeCheck Coordinator.

use std::path::PathBuf;

use log::trace;

use crate::engine::{Engine, Event};

const THIRD_PARTY_MODULES_DIR: &str = "node_modules";

impl Engine {
    pub(crate) fn reconcile_checkers(&mut self) {
        let src_paths: Vec<String> = self
            .registries
            .source_paths
            .iter()
            .filter(|(src_path, sp)| sp.needs_recheck && self.registries.source_path_is_checkable(src_path))
            .map(|(k, _)| k.clone())
            .collect();

        for src_path in src_paths {
            self.restart_checkers_for(&src_path);
        }
    }

    fn restart_checkers_for(&mut self, src_path: &str) {
        trace!("restarting checkers for {}", src_path);
        let (lint_files, ts_files, tsconfig) = {
            let sp = match self.registries.source_paths.get(src_path) {
                Some(sp) => sp,
                None => return,
            };
            let lint_files: Vec<PathBuf> = sp
                .input_files
                .iter()
                .filter(|f| is_ts_or_js(f) && !under_third_party(f))
                .cloned()
                .collect();
            let ts_files: Vec<PathBuf> =
                sp.input_files.iter().filter(|f| has_extension(f, "ts")).cloned().collect();
            (lint_files, ts_files, sp.tsconfig.clone())
        };

        if let Some(sp) = self.registries.source_paths.get_mut(src_path) {
            // Terminate stale processes — they are now operating on stale
            // inputs. This is `StaleCheckerTermination`, not an error.
            if let Some(proc) = sp.lint_proc.take() {
                let runner = self.process_runner.clone();
                proc.kill(|pid| runner.kill(pid));
                spawn_checker_exit_watcher(&proc, src_path.to_owned(), self.event_tx.clone());
            }
            if let Some(proc) = sp.type_check_proc.take() {
                let runner = self.process_runner.clone();
                proc.kill(|pid| runner.kill(pid));
                spawn_checker_exit_watcher(&proc, src_path.to_owned(), self.event_tx.clone());
            }
        }

        if self.config.is_lint_enabled && !lint_files.is_empty() {
            let color = std::env::var("NO_COLOR").map(|v| v != "true" && v != "1").unwrap_or(true);
            match self.process_runner.spawn_lint(&lint_files, color) {
                Ok(proc) => {
                    spawn_checker_exit_watcher(&proc, src_path.to_owned(), self.event_tx.clone());
                    self.registries.source_paths.get_mut(src_path).unwrap().lint_proc = Some(proc);
                }
                Err(e) => log::warn!("failed to start lint for {}: {}", src_path, e),
            }
        }

        if self.config.is_type_check_enabled {
            if let Some(tsconfig) = &tsconfig {
                if !ts_files.is_empty() {
                    let pretty = std::env::var("NO_COLOR").is_err();
                    let dir = tsconfig.parent().unwrap_or_else(|| tsconfig.as_path());
                    match self.process_runner.spawn_type_check(dir, pretty) {
                        Ok(proc) => {
                            spawn_checker_exit_watcher(&proc, src_path.to_owned(), self.event_tx.clone());
                            self.registries.source_paths.get_mut(src_path).unwrap().type_check_proc = Some(proc);
                        }
                        Err(e) => log::warn!("failed to start type-check for {}: {}", src_path, e),
                    }
                }
            }
        }

        if let Some(sp) = self.registries.source_paths.get_mut(src_path) {
            sp.needs_recheck = false;
        }
    }

    pub(crate) fn on_checker_exited(&mut self, src_path: &str) {
        // Clear a handle only once we actually observe it has exited,
        // otherwise leave it (it may still be the live one).
        if let Some(sp) = self.registries.source_paths.get_mut(src_path) {
            if let Some(proc) = &sp.lint_proc {
                if !proc.is_live() {
                    sp.lint_proc = None;
                }
            }
            if let Some(proc) = &sp.type_check_proc {
                if !proc.is_live() {
                    sp.type_check_proc = None;
                }
            }
        }
    }
}

pub(crate) fn has_extension(path: &std::path::Path, ext: &str) -> bool {
    path.extension().map_or(false, |e| e == ext)
}

pub(crate) fn is_ts_or_js(path: &std::path::Path) -> bool {
    has_extension(path, "ts") || has_extension(path, "js")
}

pub(crate) fn under_third_party(path: &std::path::Path) -> bool {
    path.components().any(|c| c.as_os_str() == THIRD_PARTY_MODULES_DIR)
}

/// Watches one checker process's eventual exit — whether it was just killed
/// for being stale or left to run to completion — and posts `CheckerExited`
/// so a later reconciliation pass clears the handle and re-evaluates busy
/// status. Takes its own clone of the completion
/// signal, so any number of these can watch the same process independently
/// of whoever still owns the `ChildHandle` itself.
fn spawn_checker_exit_watcher(
    proc: &crate::process::ChildHandle,
    src_path: String,
    tx: crossbeam_channel::Sender<Event>,
) {
    let done = proc.completion_signal();
    std::thread::spawn(move || {
        let _ = done.recv();
        let _ = tx.send(Event::CheckerExited { src_path });
    });
}
