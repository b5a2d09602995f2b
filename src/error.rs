//! Error kinds raised at the edges of the engine.
//!
//! Most error kinds (`BuildError`, `StaleCheckerTermination`,
//! `SynthCancelled`, `WatcherError`, `MetafileReadError`) are not exceptions
//! at all — they are recorded as state (`hasError`, a state-machine variant,
//! [`crate::outcome::BuildOutcome::Failure`]) and never propagated past the
//! reconciliation boundary. Only startup failures and on-demand request
//! rejections are real `Result::Err`s.

use thiserror::Error;

/// Fatal at startup; returned from [`crate::Orchestrator::start`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No Lambda handlers are found in the app")]
    NoHandlers,
    #[error("Failed to build the Lambda handlers")]
    InitialBuildFailed,
}

/// Returned to a waiter on [`crate::Orchestrator::get_built_handler`] when the
/// entry point it asked for does not exist, or its build fails.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("no entry point registered for {src_path}#{handler}")]
    UnknownEntryPoint { src_path: String, handler: String },
    #[error("build failed for {src_path}#{handler}: {cause}")]
    BuildFailed { src_path: String, handler: String, cause: String },
    #[error("orchestrator is shutting down")]
    ShuttingDown,
}
