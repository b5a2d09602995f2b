//! The node-like incremental bundler collaborator. The actual transpiler
//! is explicitly out of scope; the core only invokes this trait and
//! interprets its outcome.

use std::any::Any;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::config::BundleConfig;
use crate::entry_point::EntryPointKey;
use crate::infra::InfraBuildOutcome;
use crate::outcome::BuildOutcome;

/// One rebuild request for a node-like entry point.
pub struct NodeBuildRequest<'a> {
    pub key: &'a EntryPointKey,
    pub app_path: &'a Path,
    pub handler: &'a str,
    pub bundle: Option<&'a BundleConfig>,
    pub tsconfig: Option<&'a Path>,
    /// The opaque incremental-builder handle from a previous build of this
    /// entry point, if any. The core never inspects it.
    pub incremental_builder: Option<&'a (dyn Any + Send)>,
}

/// Result of reading back a bundler metafile: paths resolved to absolute.
/// A read failure is a `MetafileReadError`: logged, treated as an empty
/// input set, not a build failure.
pub struct MetafileResult {
    pub input_files: HashSet<PathBuf>,
}

pub trait Bundler: Send + Sync {
    /// Runs (or incrementally re-runs) the bundler for one node-like entry
    /// point. Returns the new incremental-builder handle to retain (opaque)
    /// alongside the build outcome.
    fn build_node(&self, req: NodeBuildRequest<'_>) -> Result<(BuildOutcome, Option<Box<dyn Any + Send>>)>;

    /// Builds the infrastructure app itself (the `Building` state).
    /// Scoped to the whole infra input-file set rather than a single entry
    /// point, so it takes just the app root.
    fn build_infra(&self, app_path: &Path) -> Result<InfraBuildOutcome>;
}
