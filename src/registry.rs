//! Owns the entry-point registry, the source-path registry, and the file
//! index — "the registries reference each other by string keys only; there
//! are no object cycles" (Design Notes). This is the single owner the
//! control thread mutates; nothing outside `Engine::run` touches it.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::entry_point::{EntryPoint, EntryPointKey, RebuildPriority, Runtime};
use crate::file_index::FileIndex;
use crate::source_path::SourcePath;

#[derive(Default)]
pub struct Registries {
    pub entry_points: HashMap<EntryPointKey, EntryPoint>,
    pub source_paths: HashMap<String, SourcePath>,
    pub file_index: FileIndex,
    /// Registration order, used to break priority ties: among equal
    /// priority, order is insertion order. `HashMap` does not preserve
    /// that, so it is tracked separately.
    order_index: HashMap<EntryPointKey, usize>,
    next_order: usize,
}

impl Registries {
    pub fn new() -> Self {
        Registries {
            entry_points: HashMap::new(),
            source_paths: HashMap::new(),
            file_index: FileIndex::new(),
            order_index: HashMap::new(),
            next_order: 0,
        }
    }

    pub fn register(&mut self, key: EntryPointKey, runtime: Runtime, tsconfig: Option<PathBuf>) {
        if !self.entry_points.contains_key(&key) {
            self.order_index.insert(key.clone(), self.next_order);
            self.next_order += 1;
            self.entry_points.insert(key.clone(), EntryPoint::new(key, runtime, tsconfig));
        }
    }

    pub fn order_of(&self, key: &EntryPointKey) -> usize {
        self.order_index.get(key).copied().unwrap_or(usize::MAX)
    }

    /// A SourcePath exists iff at least one of its entry points has
    /// completed a first successful build.
    pub fn ensure_source_path(&mut self, src_path: &str) -> &mut SourcePath {
        self.source_paths.entry(src_path.to_owned()).or_insert_with(SourcePath::new)
    }

    pub fn keys_in_source_path<'a>(&'a self, src_path: &'a str) -> impl Iterator<Item = &'a EntryPointKey> + 'a {
        self.entry_points.keys().filter(move |k| k.src_path == src_path)
    }

    /// Gated on every entry point in the source path being build-clean
    /// (not building, not queued) and none having `hasError`.
    pub fn source_path_is_checkable(&self, src_path: &str) -> bool {
        self.keys_in_source_path(src_path).all(|k| {
            let ep = &self.entry_points[k];
            !ep.is_building() && ep.rebuild_priority == RebuildPriority::Off && !ep.has_error
        })
    }

    pub fn all_go_keys(&self) -> Vec<EntryPointKey> {
        self.entry_points
            .iter()
            .filter(|(_, ep)| ep.runtime == Runtime::Go)
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entry_points.is_empty()
    }
}
