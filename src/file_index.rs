//! Inverted index from an input file path to the node-like entry points
//! that include it. Go-like entry points are not indexed here; they are
//! rebuilt via a coarse glob rule instead.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::entry_point::EntryPointKey;

#[derive(Default)]
pub struct FileIndex {
    // Ordered: insertion order is preserved per-file so that fan-out visits
    // entry points in a stable order (useful for the "node-like builds
    // dispatched... in insertion order" ordering guarantee).
    index: HashMap<PathBuf, Vec<EntryPointKey>>,
}

impl FileIndex {
    pub fn new() -> Self {
        FileIndex { index: HashMap::new() }
    }

    /// Adds `key` as a dependent of `file`, unless it is already present.
    pub fn add(&mut self, file: &Path, key: &EntryPointKey) {
        let entries = self.index.entry(file.to_path_buf()).or_default();
        if !entries.contains(key) {
            entries.push(key.clone());
        }
    }

    /// Removes `key` as a dependent of `file`. Drops the key entirely once
    /// its entry-point list becomes empty (a historical bug of setting the
    /// list to a sentinel `0` instead of deleting it is not reproduced here).
    pub fn remove(&mut self, file: &Path, key: &EntryPointKey) {
        if let Some(entries) = self.index.get_mut(file) {
            entries.retain(|k| k != key);
            if entries.is_empty() {
                self.index.remove(file);
            }
        }
    }

    pub fn entry_points_for(&self, file: &Path) -> &[EntryPointKey] {
        self.index.get(file).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains_file(&self, file: &Path) -> bool {
        self.index.contains_key(file)
    }

    /// Reconciles the file index for one entry point against a newly built
    /// input-file set: adds newly referenced files, removes unreferenced
    /// ones. Returns the set of files that
    /// were newly added (for the Watch-Set Manager) and the set removed.
    pub fn diff_update(
        &mut self,
        key: &EntryPointKey,
        old_inputs: &std::collections::HashSet<PathBuf>,
        new_inputs: &std::collections::HashSet<PathBuf>,
    ) -> (Vec<PathBuf>, Vec<PathBuf>) {
        let added: Vec<PathBuf> = new_inputs.difference(old_inputs).cloned().collect();
        let removed: Vec<PathBuf> = old_inputs.difference(new_inputs).cloned().collect();
        for file in &added {
            self.add(file, key);
        }
        for file in &removed {
            self.remove(file, key);
        }
        (added, removed)
    }
}
