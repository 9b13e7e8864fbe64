use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use puzzlebench::config::{RunConfig, Settings};
use tempfile::TempDir;

/// A temporary dataset root, ledger location and scratch root.
pub struct DatasetFixture {
    _temp: TempDir,
    pub root: PathBuf,
    pub ledger: PathBuf,
    pub scratch: PathBuf,
}

impl DatasetFixture {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("create tempdir");
        let root = temp.path().join("dataset");
        std::fs::create_dir_all(&root).expect("create dataset dir");
        Self {
            root,
            ledger: temp.path().join("out").join("results.csv"),
            scratch: temp.path().join("scratch"),
            _temp: temp,
        }
    }

    /// Write a small PNG at `relative`, creating parent folders.
    pub fn image(&self, relative: &str) -> PathBuf {
        let path = self.root.join(relative);
        write_png(&path, relative.len() as u8);
        path
    }

    pub fn text(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dir");
        }
        std::fs::write(&path, contents).expect("write text file");
        path
    }

    /// Configuration for a run over this fixture; tools are never spawned.
    pub fn config(&self, workers: usize, seed: u64) -> RunConfig {
        RunConfig::resolve(Settings {
            directory: Some(self.root.clone()),
            csv: Some(self.ledger.clone()),
            seed: Some(seed),
            workers: Some(workers),
            scratch: Some(self.scratch.clone()),
            canonical_side: Some(32),
            piece_size: Some(8),
            ..Settings::default()
        })
        .expect("valid fixture config")
    }

    pub fn ledger_text(&self) -> String {
        std::fs::read_to_string(&self.ledger).unwrap_or_default()
    }
}

pub fn write_png(path: &Path, shade: u8) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent dir");
    }
    RgbImage::from_fn(24, 18, |x, y| Rgb([shade, (x * 10) as u8, (y * 10) as u8]))
        .save(path)
        .expect("write png");
}
