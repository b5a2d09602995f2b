//! The per-source-directory record.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::process::ChildHandle;

pub struct SourcePath {
    pub tsconfig: Option<PathBuf>,
    pub input_files: HashSet<PathBuf>,
    pub lint_proc: Option<ChildHandle>,
    pub type_check_proc: Option<ChildHandle>,
    pub needs_recheck: bool,
}

impl SourcePath {
    pub fn new() -> Self {
        SourcePath {
            tsconfig: None,
            input_files: HashSet::new(),
            lint_proc: None,
            type_check_proc: None,
            needs_recheck: false,
        }
    }

    pub fn has_live_checker(&self) -> bool {
        self.lint_proc.is_some() || self.type_check_proc.is_some()
    }
}

impl Default for SourcePath {
    fn default() -> Self {
        Self::new()
    }
}
