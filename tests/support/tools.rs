use std::{
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use puzzlebench::worker::{NORMALIZED_IMAGE_NAME, PartitionRequest, PuzzleTools, ToolError};

/// One observed partition call.
#[derive(Debug, Clone)]
pub struct PartitionCall {
    pub thread: String,
    pub image_path: PathBuf,
    pub output_dir: PathBuf,
    pub seed: u32,
}

/// In-process stand-in for the partition and solver executables.
///
/// The solver reports a score derived from the partition seed, so every
/// recorded score is reproducible from the item alone.
#[derive(Default)]
pub struct FakeTools {
    pub calls: Mutex<Vec<PartitionCall>>,
    /// Block inside `solve` until the force flag is raised.
    pub hang: bool,
    pub solve_delay: Duration,
}

impl FakeTools {
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<PartitionCall> {
        self.calls.lock().unwrap().clone()
    }

    fn score_for(seed: u32) -> f64 {
        f64::from(seed % 1000) / 1000.0
    }
}

impl PuzzleTools for FakeTools {
    fn partition(
        &self,
        request: &PartitionRequest<'_>,
        _force: &AtomicBool,
    ) -> Result<(), ToolError> {
        assert_eq!(
            request.image_path.file_name().and_then(|n| n.to_str()),
            Some(NORMALIZED_IMAGE_NAME)
        );
        assert!(request.image_path.is_file());
        std::fs::write(
            request.output_dir.join("pieces.txt"),
            request.seed.to_string(),
        )
        .map_err(|source| ToolError::Io {
            program: PathBuf::from("fake-partition"),
            source,
        })?;
        self.calls.lock().unwrap().push(PartitionCall {
            thread: thread::current().name().unwrap_or_default().to_string(),
            image_path: request.image_path.to_path_buf(),
            output_dir: request.output_dir.to_path_buf(),
            seed: request.seed,
        });
        Ok(())
    }

    fn solve(
        &self,
        piece_count: u32,
        artifacts_dir: &Path,
        force: &AtomicBool,
    ) -> Result<String, ToolError> {
        if self.hang {
            while !force.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(5));
            }
            return Err(ToolError::Killed {
                program: PathBuf::from("fake-solver"),
            });
        }
        thread::sleep(self.solve_delay);
        let seed: u32 = std::fs::read_to_string(artifacts_dir.join("pieces.txt"))
            .ok()
            .and_then(|text| text.trim().parse().ok())
            .unwrap_or_default();
        Ok(format!(
            "pieces per side: {piece_count}\nNCS: {}\n",
            Self::score_for(seed)
        ))
    }
}
