//! Shared result shape for node/go/python build outcome handling.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::entry_point::BuildArtifact;

pub enum BuildOutcome {
    Success { input_files: HashSet<PathBuf>, artifact: BuildArtifact },
    Failure { message: String },
}
