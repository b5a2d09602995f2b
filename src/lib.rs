//! A reactive rebuild/synth/deploy engine for a live serverless application
//! development loop.
//!
//! The engine watches two disjoint bodies of source code — infrastructure
//! code that declares cloud resources, and handler code for individually
//! deployed function units — and reacts to edits by incrementally
//! rebuilding, linting, type-checking, re-synthesizing the infrastructure
//! model, and conditionally re-deploying. Everything outside that reactive
//! core (the filesystem watcher, the node-like bundler, the infra
//! synth/deploy callbacks) is a host-injected collaborator; see
//! [`watch::WatchSink`], [`bundler::Bundler`], [`process::ProcessRunner`],
//! and [`orchestrator::HostCallbacks`].

mod bundler;
mod busy;
mod checker;
mod concurrency;
mod config;
mod engine;
mod entry_point;
mod error;
mod file_index;
mod infra;
mod orchestrator;
mod outcome;
mod process;
mod registry;
mod request;
mod scheduler;
mod source_path;
mod watch;

pub use bundler::{Bundler, MetafileResult, NodeBuildRequest};
pub use config::{BundleConfig, ChecksumData, LambdaHandlerConfig, OrchestratorConfig};
pub use entry_point::{BuildArtifact, BuiltHandler, EntryPointKey, Runtime};
pub use error::{ConfigError, RequestError};
pub use infra::{InfraBuildOutcome, ReDeployFn, ReSynthFn, SynthError, SynthManifest, SynthOutcome};
pub use orchestrator::{HostCallbacks, Orchestrator, OrchestratorState};
pub use outcome::BuildOutcome;
pub use process::{ChildHandle, ChildOutcome, ProcessRunner, SystemProcessRunner};
pub use watch::{NullWatchSink, WatchSink};
