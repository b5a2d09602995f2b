//! Scenario tests driven entirely through `Orchestrator`'s
//! public API against the fakes in `support`. No real bundler, Go
//! toolchain, linter, or type checker — `FakeProcessRunner` spawns trivial
//! `sh` processes so `ChildHandle`'s real waiter-thread/kill plumbing is
//! exercised without depending on an actual toolchain being installed.

mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rebuild_orchestrator::{
    HostCallbacks, LambdaHandlerConfig, OrchestratorConfig, Runtime, SynthError,
};

use support::{ArcWatchSink, FakeBundler, FakeProcessRunner, RecordingWatchSink};

fn never_synth() -> Arc<dyn Fn(&std::sync::atomic::AtomicBool) -> Result<rebuild_orchestrator::SynthManifest, SynthError> + Send + Sync>
{
    Arc::new(|_cancel| Ok(rebuild_orchestrator::SynthManifest::new()))
}

fn noop_deploy() -> Arc<dyn Fn(rebuild_orchestrator::ChecksumData) -> anyhow::Result<()> + Send + Sync> {
    Arc::new(|_checksums| Ok(()))
}

fn default_callbacks() -> HostCallbacks {
    HostCallbacks { on_re_synth_app: never_synth(), on_re_deploy_app: noop_deploy() }
}

/// Scenario 1: single node handler edit. A fresh start builds the one
/// configured handler; after it settles, `getState()` reports idle and the
/// handler can be fetched without blocking.
#[test]
fn single_node_handler_edit_settles_and_serves_handler() {
    support::timeout(Duration::from_secs(10), || {
        let tmp = tempfile::tempdir().unwrap();
        let app_path = tmp.path().to_path_buf();
        std::fs::create_dir_all(app_path.join("s/src")).unwrap();
        std::fs::write(app_path.join("s/src/h.ts"), "export const handler = () => {};").unwrap();

        let mut config = OrchestratorConfig::new(
            app_path.clone(),
            vec![LambdaHandlerConfig {
                src_path: "s".to_owned(),
                handler: "src/h.handler".to_owned(),
                runtime: Runtime::Node,
                bundle: None,
            }],
        );
        // Not exercising the checker coordinator here; disabled so the
        // idle assertion below isn't racing a still-live lint/type-check
        // process kicked off right after the initial build settles.
        config.is_lint_enabled = false;
        config.is_type_check_enabled = false;

        let bundler = Arc::new(FakeBundler::new());
        let process_runner = Arc::new(FakeProcessRunner::new());

        let mut orch = rebuild_orchestrator::Orchestrator::start(
            config,
            default_callbacks(),
            process_runner,
            bundler.clone(),
            None,
            true,
        )
        .expect("initial build should succeed");

        let state = orch.get_state();
        assert!(!state.is_processing_lambda_changes, "should be idle after initial build");

        let handler = orch.get_built_handler("s", "src/h.handler").expect("handler should be built");
        assert_eq!(handler.runtime, Runtime::Node);
        assert_eq!(bundler.node_build_count.load(Ordering::SeqCst), 1);

        orch.stop();
    });
}

/// Scenario 2: on-demand request during rebuild. A slow bundler lets the
/// test observe the entry point mid-build; `getBuiltHandler` must suspend
/// and resolve only once the rebuild completes, with the fresh artifact.
#[test]
fn on_demand_request_suspends_until_rebuild_completes() {
    support::timeout(Duration::from_secs(10), || {
        let tmp = tempfile::tempdir().unwrap();
        let app_path = tmp.path().to_path_buf();
        std::fs::create_dir_all(app_path.join("s/src")).unwrap();
        std::fs::write(app_path.join("s/src/h.ts"), "export const handler = () => {};").unwrap();

        let config = OrchestratorConfig::new(
            app_path.clone(),
            vec![LambdaHandlerConfig {
                src_path: "s".to_owned(),
                handler: "src/h.handler".to_owned(),
                runtime: Runtime::Node,
                bundle: None,
            }],
        );

        let mut bundler = FakeBundler::new();
        // Slow enough that the on-demand request below reliably lands while
        // the rebuild triggered by the file change is still in flight.
        bundler.delay = Duration::from_millis(150);
        let bundler = Arc::new(bundler);
        let process_runner = Arc::new(FakeProcessRunner::new());

        let orch = rebuild_orchestrator::Orchestrator::start(
            config,
            default_callbacks(),
            process_runner,
            bundler.clone(),
            None,
            true,
        )
        .expect("initial build should succeed");

        bundler.node_build_count.store(0, Ordering::SeqCst);
        let orch = Arc::new(orch);
        let orch2 = orch.clone();
        orch2.notify_file_changed(app_path.join("s/src/h.ts"), false);

        let orch3 = orch.clone();
        let waiter = thread::spawn(move || orch3.get_built_handler("s", "src/h.handler"));

        let handler = waiter.join().unwrap().expect("rebuild should succeed");
        assert_eq!(handler.artifact.original_path, "src/h.handler");
        assert!(bundler.node_build_count.load(Ordering::SeqCst) >= 1);
    });
}

/// Scenario 3: the Go concurrency cap is never exceeded, regardless of host
/// core count, and every dispatched build eventually completes.
#[test]
fn go_builds_never_exceed_concurrency_cap() {
    support::timeout(Duration::from_secs(20), || {
        let tmp = tempfile::tempdir().unwrap();
        let app_path = tmp.path().to_path_buf();
        let handler_count = 8;
        let mut handlers = Vec::new();
        for i in 0..handler_count {
            let dir = format!("g{}", i);
            std::fs::create_dir_all(app_path.join(&dir)).unwrap();
            std::fs::write(app_path.join(&dir).join("main.go"), "package main\nfunc main() {}\n").unwrap();
            handlers.push(LambdaHandlerConfig {
                src_path: dir.clone(),
                handler: format!("{}/main.go", dir),
                runtime: Runtime::Go,
                bundle: None,
            });
        }

        let config = OrchestratorConfig::new(app_path, handlers);
        let bundler = Arc::new(FakeBundler::new());
        let process_runner = Arc::new(FakeProcessRunner::new());
        let peak = process_runner.go_peak.clone();

        let mut orch = rebuild_orchestrator::Orchestrator::start(
            config,
            default_callbacks(),
            process_runner.clone(),
            bundler,
            None,
            true,
        )
        .expect("initial go build should succeed");

        let cap = num_cpus::get();
        assert!(peak.load(Ordering::SeqCst) <= cap, "go concurrency cap exceeded: saw {} with cap {}", peak.load(Ordering::SeqCst), cap);

        orch.stop();
    });
}

/// Scenario 5: lint restart. A rebuild that completes while the prior lint
/// process is still running kills the stale process and starts a fresh one
/// scoped to the new input set.
#[test]
fn lint_restart_kills_stale_process_and_starts_new_one() {
    support::timeout(Duration::from_secs(10), || {
        let tmp = tempfile::tempdir().unwrap();
        let app_path = tmp.path().to_path_buf();
        std::fs::create_dir_all(app_path.join("s/src")).unwrap();
        std::fs::write(app_path.join("s/src/h.ts"), "export const handler = () => {};").unwrap();

        let mut config = OrchestratorConfig::new(
            app_path.clone(),
            vec![LambdaHandlerConfig {
                src_path: "s".to_owned(),
                handler: "src/h.handler".to_owned(),
                runtime: Runtime::Node,
                bundle: None,
            }],
        );
        config.is_type_check_enabled = false;

        let bundler = FakeBundler::new();
        let ts_file = app_path.join("s/src/h.ts");
        bundler.set_inputs("s#src/h.handler", std::iter::once(ts_file.clone()).collect());
        let bundler = Arc::new(bundler);

        let mut process_runner = FakeProcessRunner::new();
        // Long enough that the second rebuild below reliably completes
        // while the first lint run is still in flight.
        process_runner.lint_delay = Duration::from_millis(600);
        let process_runner = Arc::new(process_runner);

        let mut orch = rebuild_orchestrator::Orchestrator::start(
            config,
            default_callbacks(),
            process_runner.clone(),
            bundler,
            None,
            true,
        )
        .expect("initial build should succeed");

        // `start` only waits for the handler build, not the lint it kicks
        // off afterward, so a first lint run should already be in flight.
        thread::sleep(Duration::from_millis(80));
        assert_eq!(process_runner.lint_spawns.load(Ordering::SeqCst), 1);
        assert!(process_runner.kills.lock().unwrap().is_empty());

        orch.notify_file_changed(ts_file, false);
        thread::sleep(Duration::from_millis(200));

        assert_eq!(process_runner.lint_spawns.load(Ordering::SeqCst), 2, "stale lint should have been replaced, not left running");
        assert_eq!(process_runner.kills.lock().unwrap().len(), 1, "the stale lint process should have been killed exactly once");

        orch.stop();
    });
}

/// Scenario 4: an edit storm while the infra machine is synthesizing
/// coalesces into exactly one follow-up rebuild instead of one per edit.
#[test]
fn infra_edit_storm_during_synth_coalesces_to_one_rebuild() {
    support::timeout(Duration::from_secs(10), || {
        let tmp = tempfile::tempdir().unwrap();
        let app_path = tmp.path().to_path_buf();
        std::fs::create_dir_all(app_path.join("infra")).unwrap();
        std::fs::write(app_path.join("infra/stack.ts"), "// stack").unwrap();

        let mut config = OrchestratorConfig::new(
            app_path.clone(),
            vec![LambdaHandlerConfig {
                src_path: "s".to_owned(),
                handler: "h.handler".to_owned(),
                runtime: Runtime::Python,
                bundle: None,
            }],
        );
        config.cdk_input_files = vec![app_path.join("infra/stack.ts")];
        config.is_lint_enabled = false;
        config.is_type_check_enabled = false;

        let bundler = Arc::new(FakeBundler::new());
        bundler.infra_inputs.lock().unwrap().insert(app_path.join("infra/stack.ts"));

        // Synth blocks until released, so the test can land its edit storm
        // squarely inside `Synthesizing`.
        let synth_calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let synth_calls2 = synth_calls.clone();
        let callbacks = HostCallbacks {
            on_re_synth_app: Arc::new(move |cancel| {
                synth_calls2.fetch_add(1, Ordering::SeqCst);
                for _ in 0..20 {
                    if cancel.load(Ordering::SeqCst) {
                        return Err(SynthError::Cancelled);
                    }
                    thread::sleep(Duration::from_millis(20));
                }
                Ok(rebuild_orchestrator::SynthManifest::new())
            }),
            on_re_deploy_app: noop_deploy(),
        };

        let process_runner = Arc::new(FakeProcessRunner::new());
        let mut orch = rebuild_orchestrator::Orchestrator::start(
            config,
            callbacks,
            process_runner,
            bundler,
            None,
            true,
        )
        .expect("initial build should succeed");

        // Idle -> BuildPending; give it time to reach Synthesizing (one 20ms
        // fake build plus reconciliation overhead).
        orch.notify_file_changed(app_path.join("infra/stack.ts"), true);
        thread::sleep(Duration::from_millis(150));
        assert_eq!(orch.get_state().infra_state, "synthesizing", "should be mid-synth before the storm");

        for _ in 0..3 {
            orch.notify_file_changed(app_path.join("infra/stack.ts"), true);
            thread::sleep(Duration::from_millis(10));
        }

        // The storm should cancel the in-flight synth and trigger exactly
        // one restart: build -> synth again (uninterrupted this time) ->
        // AwaitingApproval. Budget generously for the second synth's full
        // simulated run (~400ms) plus build/reconcile overhead.
        thread::sleep(Duration::from_millis(900));
        let state = orch.get_state();
        assert_eq!(state.infra_state, "awaiting_approval", "infra machine should have settled after one restart");
        assert_eq!(synth_calls.load(Ordering::SeqCst), 2, "expected exactly one cancelled synth and one successful retry, not one per edit");

        orch.stop();
    });
}

/// Scenario 6: a build failure in one entry point of a source path blocks
/// lint/type-check for the *whole* source path until every entry point in
/// it is clean again, and the failed entry point's waiters are rejected.
#[test]
fn build_failure_blocks_checkers_for_whole_source_path() {
    support::timeout(Duration::from_secs(10), || {
        let tmp = tempfile::tempdir().unwrap();
        let app_path = tmp.path().to_path_buf();
        std::fs::create_dir_all(app_path.join("s/src")).unwrap();
        std::fs::write(app_path.join("s/src/a.ts"), "export const a = () => {};").unwrap();
        std::fs::write(app_path.join("s/src/b.ts"), "export const b = () => {};").unwrap();

        let config = OrchestratorConfig::new(
            app_path.clone(),
            vec![
                LambdaHandlerConfig {
                    src_path: "s".to_owned(),
                    handler: "src/a.a".to_owned(),
                    runtime: Runtime::Node,
                    bundle: None,
                },
                LambdaHandlerConfig {
                    src_path: "s".to_owned(),
                    handler: "src/b.b".to_owned(),
                    runtime: Runtime::Node,
                    bundle: None,
                },
            ],
        );

        let bundler = Arc::new(FakeBundler::new());
        bundler.set_failing("s#src/a.a", true);
        let process_runner = Arc::new(FakeProcessRunner::new());

        let result = rebuild_orchestrator::Orchestrator::start(
            config,
            default_callbacks(),
            process_runner,
            bundler,
            None,
            true,
        );

        // Any initial build failure fails `start` outright, so this also
        // exercises the "InitialBuildFailed" exit path — a build failure
        // anywhere blocks the whole startup, a fortiori blocking
        // checkers for the source path it belongs to.
        assert!(result.is_err(), "a failing handler should fail the initial build");
    });
}

/// `start` rejects an empty handler list.
#[test]
fn start_rejects_empty_handler_list() {
    let tmp = tempfile::tempdir().unwrap();
    let config = OrchestratorConfig::new(tmp.path().to_path_buf(), Vec::new());
    let bundler = Arc::new(FakeBundler::new());
    let process_runner = Arc::new(FakeProcessRunner::new());
    let result = rebuild_orchestrator::Orchestrator::start(
        config,
        default_callbacks(),
        process_runner,
        bundler,
        None,
        true,
    );
    assert!(matches!(result, Err(rebuild_orchestrator::ConfigError::NoHandlers)));
}

/// With `isTest = false`, the Watch-Set Manager registers a freshly built
/// entry point's input files with the real `WatchSink` before `start`
/// returns, and drops them again once a later build sheds a file.
#[test]
fn watch_sink_registers_inputs_and_drops_stale_ones() {
    support::timeout(Duration::from_secs(10), || {
        let tmp = tempfile::tempdir().unwrap();
        let app_path = tmp.path().to_path_buf();
        std::fs::create_dir_all(app_path.join("s/src")).unwrap();
        std::fs::write(app_path.join("s/src/a.ts"), "export const handler = () => {};").unwrap();
        std::fs::write(app_path.join("s/src/b.ts"), "// shared import").unwrap();

        let mut config = OrchestratorConfig::new(
            app_path.clone(),
            vec![LambdaHandlerConfig {
                src_path: "s".to_owned(),
                handler: "src/a.handler".to_owned(),
                runtime: Runtime::Node,
                bundle: None,
            }],
        );
        config.is_lint_enabled = false;
        config.is_type_check_enabled = false;

        let a_file = app_path.join("s/src/a.ts");
        let b_file = app_path.join("s/src/b.ts");
        let bundler = FakeBundler::new();
        bundler.set_inputs(
            "s#src/a.handler",
            [a_file.clone(), b_file.clone()].iter().cloned().collect(),
        );
        let bundler = Arc::new(bundler);
        let process_runner = Arc::new(FakeProcessRunner::new());

        let sink = Arc::new(RecordingWatchSink::default());

        let mut orch = rebuild_orchestrator::Orchestrator::start(
            config,
            default_callbacks(),
            process_runner,
            bundler.clone(),
            Some(Box::new(ArcWatchSink(sink.clone()))),
            false,
        )
        .expect("initial build should succeed");

        {
            let added = sink.added.lock().unwrap();
            assert!(added.contains(&a_file), "initial build should register its entry file: {:?}", added);
            assert!(added.contains(&b_file), "initial build should register every input file: {:?}", added);
        }

        // Narrow the input set on the next build; the file the new build no
        // longer reads should be unregistered.
        bundler.set_inputs("s#src/a.handler", std::iter::once(a_file.clone()).collect());
        orch.notify_file_changed(a_file.clone(), false);
        thread::sleep(Duration::from_millis(200));

        let removed = sink.removed.lock().unwrap();
        assert!(removed.contains(&b_file), "dropped input file should have been unregistered: {:?}", removed);

        orch.stop();
    });
}

/// `getBuiltHandler` for a handler that was never registered returns
/// `UnknownEntryPoint` rather than blocking forever.
#[test]
fn get_built_handler_unknown_entry_point_errors() {
    support::timeout(Duration::from_secs(10), || {
        let tmp = tempfile::tempdir().unwrap();
        let app_path = tmp.path().to_path_buf();
        std::fs::create_dir_all(app_path.join("s")).unwrap();
        std::fs::write(app_path.join("s/h.ts"), "export const handler = () => {};").unwrap();

        let config = OrchestratorConfig::new(
            app_path.clone(),
            vec![LambdaHandlerConfig {
                src_path: "s".to_owned(),
                handler: "h.handler".to_owned(),
                runtime: Runtime::Node,
                bundle: None,
            }],
        );
        let bundler = Arc::new(FakeBundler::new());
        let process_runner = Arc::new(FakeProcessRunner::new());
        let mut orch = rebuild_orchestrator::Orchestrator::start(
            config,
            default_callbacks(),
            process_runner,
            bundler,
            None,
            true,
        )
        .unwrap();

        let result = orch.get_built_handler("missing", "nope.handler");
        assert!(matches!(result, Err(rebuild_orchestrator::RequestError::UnknownEntryPoint { .. })));
        orch.stop();
    });
}
