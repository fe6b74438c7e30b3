//! Workspace enumeration and the background indexing queue.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

/// Directory names never descended into.
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "__pycache__",
    "node_modules",
    ".venv",
    "venv",
    ".tox",
    ".mypy_cache",
    ".pytest_cache",
    "target",
];

/// Whether `path` is a routing script the analyzer cares about.
pub fn is_script(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "py")
}

/// Finds scripts under workspace roots.
#[derive(Clone, Debug)]
pub struct WorkspaceEnumerator {
    excluded: HashSet<String>,
}

impl WorkspaceEnumerator {
    pub fn new(extra_excluded: &[String]) -> Self {
        Self {
            excluded: DEFAULT_EXCLUDED_DIRS
                .iter()
                .map(|name| name.to_string())
                .chain(extra_excluded.iter().cloned())
                .collect(),
        }
    }

    fn is_excluded(&self, entry: &DirEntry) -> bool {
        entry.depth() > 0
            && entry.file_type().is_dir()
            && entry
                .file_name()
                .to_str()
                .is_some_and(|name| self.excluded.contains(name))
    }

    /// Every script under `root` (or `root` itself when it is a script), sorted.
    pub fn scripts(&self, root: &Path) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|entry| !self.is_excluded(entry))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(error) => {
                    tracing::warn!(%error, "Skipping unreadable workspace entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && is_script(entry.path()))
            .map(|entry| entry.into_path())
            .collect();
        found.sort();
        found
    }
}

/// Files waiting to be read, handed out in bounded batches.
#[derive(Debug)]
pub struct IndexQueue {
    pending: VecDeque<PathBuf>,
    queued: HashSet<PathBuf>,
    batch_size: usize,
}

impl IndexQueue {
    pub fn new(batch_size: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            queued: HashSet::new(),
            batch_size: batch_size.max(1),
        }
    }

    /// Queue `paths`, skipping ones already waiting. Returns how many were added.
    pub fn extend(&mut self, paths: impl IntoIterator<Item = PathBuf>) -> usize {
        let mut added = 0;
        for path in paths {
            if self.queued.insert(path.clone()) {
                self.pending.push_back(path);
                added += 1;
            }
        }
        added
    }

    pub fn next_batch(&mut self) -> Vec<PathBuf> {
        let take = self.batch_size.min(self.pending.len());
        let batch: Vec<PathBuf> = self.pending.drain(..take).collect();
        for path in &batch {
            self.queued.remove(path);
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
