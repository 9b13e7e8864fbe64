use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, error, warn};

/// File name of the normalized image inside a worker's scratch directory.
pub const NORMALIZED_IMAGE_NAME: &str = "normalized.jpg";

/// Create `dir` if needed and remove everything a previous run left in it.
///
/// Best effort: failures are logged and the worker carries on.
pub fn prepare(dir: &Path) {
    if let Err(err) = fs::create_dir_all(dir) {
        error!(dir = %dir.display(), error = %err, "Failed to create scratch directory");
        return;
    }
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "Failed to list scratch directory");
            return;
        }
    };
    let mut removed = 0usize;
    for entry in entries.filter_map(|entry| entry.ok()) {
        let path = entry.path();
        let is_dir = entry
            .file_type()
            .map(|file_type| file_type.is_dir())
            .unwrap_or(false);
        let result = if is_dir {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Ok(()) => removed += 1,
            Err(err) => warn!(
                path = %path.display(),
                error = %err,
                "Failed to remove stale scratch entry"
            ),
        }
    }
    if removed > 0 {
        debug!(dir = %dir.display(), removed, "Cleared stale scratch entries");
    }
}

/// Normalized image that is deleted when dropped, whatever the item outcome.
#[derive(Debug)]
pub struct TempImage {
    path: PathBuf,
}

impl TempImage {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(NORMALIZED_IMAGE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempImage {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                path = %self.path.display(),
                error = %err,
                "Failed to delete normalized image"
            ),
        }
    }
}
