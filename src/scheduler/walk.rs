use std::{
    fs::{self, ReadDir},
    path::{Path, PathBuf},
};

use tracing::warn;

use crate::types::WorkItem;

use super::ScanError;

/// Lazy, single-pass walk over every regular file below a dataset root.
///
/// Directories are visited with an explicit stack. Symlinks are not followed.
/// Subdirectories or entries that cannot be read are logged and skipped; only
/// an unreadable root is an error, reported when the walk is created.
pub struct DatasetWalk {
    root: PathBuf,
    stack: Vec<PathBuf>,
    current: Option<ReadDir>,
}

impl DatasetWalk {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, ScanError> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(ScanError::InvalidRoot(root));
        }
        let entries = fs::read_dir(&root).map_err(|source| ScanError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            root,
            stack: Vec::new(),
            current: Some(entries),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Iterator for DatasetWalk {
    type Item = WorkItem;

    fn next(&mut self) -> Option<WorkItem> {
        loop {
            let Some(entries) = self.current.as_mut() else {
                let dir = self.stack.pop()?;
                match fs::read_dir(&dir) {
                    Ok(entries) => self.current = Some(entries),
                    Err(err) => warn!(
                        dir = %dir.display(),
                        error = %err,
                        "Failed to read directory during scan"
                    ),
                }
                continue;
            };
            let Some(entry_result) = entries.next() else {
                self.current = None;
                continue;
            };
            let entry = match entry_result {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "Failed to read directory entry during scan");
                    continue;
                }
            };
            let path = entry.path();
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "Failed to read file type during scan"
                    );
                    continue;
                }
            };
            if file_type.is_symlink() {
                continue;
            }
            if file_type.is_dir() {
                self.stack.push(path);
                continue;
            }
            if !file_type.is_file() {
                continue;
            }
            match WorkItem::from_root(&self.root, &path) {
                Some(item) => return Some(item),
                None => warn!(
                    path = %path.display(),
                    "Skipping file whose name is not valid UTF-8"
                ),
            }
        }
    }
}
