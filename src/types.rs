use std::path::{Path, PathBuf};

/// One image discovered under the dataset root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkItem {
    /// Path relative to the dataset root, `/`-separated on every platform.
    pub identifier: String,
    /// Location used to open the file.
    pub path: PathBuf,
}

impl WorkItem {
    /// Build an item from a file path found under `root`.
    ///
    /// Returns `None` when `path` does not live under `root` or when a
    /// component is not valid UTF-8, since such names cannot round-trip
    /// through the ledger.
    pub fn from_root(root: &Path, path: &Path) -> Option<Self> {
        let relative = path.strip_prefix(root).ok()?;
        let mut parts = Vec::new();
        for component in relative.components() {
            parts.push(component.as_os_str().to_str()?);
        }
        if parts.is_empty() {
            return None;
        }
        Some(Self {
            identifier: parts.join("/"),
            path: path.to_path_buf(),
        })
    }
}

/// Values carried by the work queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueMessage {
    Item(WorkItem),
    /// Tells exactly one worker to stop.
    Sentinel,
}
