//! Invocation of the external partition and solver executables.

use std::{
    io::Read,
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    sync::atomic::{AtomicBool, Ordering},
    thread::{self, JoinHandle, sleep},
    time::Duration,
};

use super::errors::{ItemError, ToolError};

/// Marker the solver prints in front of its accuracy score.
pub const SCORE_MARKER: &str = "NCS: ";

const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Arguments for one partition call.
#[derive(Debug, Clone, Copy)]
pub struct PartitionRequest<'a> {
    pub image_path: &'a Path,
    pub piece_size: u32,
    pub output_dir: &'a Path,
    pub seed: u32,
}

/// The two external collaborators a worker drives for every item.
///
/// Both calls block until the tool finishes. Implementations must give up
/// promptly once `force` is set.
pub trait PuzzleTools: Send + Sync {
    /// Cut the image into pieces inside `request.output_dir`.
    fn partition(&self, request: &PartitionRequest<'_>, force: &AtomicBool)
    -> Result<(), ToolError>;

    /// Solve the puzzle found in `artifacts_dir`, returning the tool's stdout.
    fn solve(
        &self,
        piece_count: u32,
        artifacts_dir: &Path,
        force: &AtomicBool,
    ) -> Result<String, ToolError>;
}

/// Runs the real executables as child processes.
///
/// On Unix each tool runs in its own process group. A forced stop kills the
/// whole group, and once a tool exits anything it left running in that group
/// is killed too, so a wrapper script's background children can neither
/// outlive the run nor hold the stdout pipe open.
#[derive(Debug, Clone)]
pub struct ExternalTools {
    partition_program: PathBuf,
    solver_program: PathBuf,
}

impl ExternalTools {
    pub fn new(partition_program: impl Into<PathBuf>, solver_program: impl Into<PathBuf>) -> Self {
        Self {
            partition_program: partition_program.into(),
            solver_program: solver_program.into(),
        }
    }
}

impl PuzzleTools for ExternalTools {
    fn partition(
        &self,
        request: &PartitionRequest<'_>,
        force: &AtomicBool,
    ) -> Result<(), ToolError> {
        let mut command = Command::new(&self.partition_program);
        command
            .arg(request.image_path)
            .arg(request.piece_size.to_string())
            .arg(request.output_dir)
            .arg(request.seed.to_string());
        run_child(&self.partition_program, command, false, force).map(|_| ())
    }

    fn solve(
        &self,
        piece_count: u32,
        artifacts_dir: &Path,
        force: &AtomicBool,
    ) -> Result<String, ToolError> {
        let mut command = Command::new(&self.solver_program);
        command.arg(piece_count.to_string()).arg(artifacts_dir);
        run_child(&self.solver_program, command, true, force)
    }
}

/// Run `command` to completion, polling so a forced shutdown can kill it.
fn run_child(
    program: &Path,
    mut command: Command,
    capture_stdout: bool,
    force: &AtomicBool,
) -> Result<String, ToolError> {
    command.stdin(Stdio::null()).stderr(Stdio::null());
    isolate_process_group(&mut command);
    command.stdout(if capture_stdout {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    let mut child = command.spawn().map_err(|source| ToolError::Spawn {
        program: program.to_path_buf(),
        source,
    })?;
    let reader = child.stdout.take().map(|mut stdout| {
        thread::spawn(move || {
            let mut bytes = Vec::new();
            stdout.read_to_end(&mut bytes).map(|_| bytes)
        })
    });

    let status = wait_or_kill(program, &mut child, force)?;
    kill_process_group(&mut child);
    let stdout = collect_stdout(program, reader)?;
    if !status.success() {
        return Err(ToolError::Failed {
            program: program.to_path_buf(),
            status: status.to_string(),
        });
    }
    Ok(stdout)
}

fn wait_or_kill(
    program: &Path,
    child: &mut Child,
    force: &AtomicBool,
) -> Result<ExitStatus, ToolError> {
    loop {
        if force.load(Ordering::Relaxed) {
            kill_process_group(child);
            let _ = child.wait();
            return Err(ToolError::Killed {
                program: program.to_path_buf(),
            });
        }
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => sleep(CHILD_POLL_INTERVAL),
            Err(source) => {
                kill_process_group(child);
                return Err(ToolError::Io {
                    program: program.to_path_buf(),
                    source,
                });
            }
        }
    }
}

#[cfg(unix)]
fn isolate_process_group(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn isolate_process_group(_command: &mut Command) {}

/// SIGKILL every process in the child's group, then the child itself.
#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
        // SAFETY: kill(2) takes plain integers; a group that is already gone
        // only yields ESRCH.
        unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.kill();
}

fn collect_stdout(
    program: &Path,
    reader: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
) -> Result<String, ToolError> {
    let Some(reader) = reader else {
        return Ok(String::new());
    };
    let bytes = reader
        .join()
        .map_err(|_| ToolError::Io {
            program: program.to_path_buf(),
            source: std::io::Error::other("stdout reader panicked"),
        })?
        .map_err(|source| ToolError::Io {
            program: program.to_path_buf(),
            source,
        })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Extract the score following the last `NCS: ` marker in solver output.
///
/// The value runs to the end of its line and must be a finite number in
/// `[0, 1]`.
pub fn parse_score(stdout: &str) -> Result<f64, ItemError> {
    let Some(start) = stdout.rfind(SCORE_MARKER) else {
        return Err(ItemError::ScoreParse("no NCS marker in solver output".into()));
    };
    let rest = &stdout[start + SCORE_MARKER.len()..];
    let raw = rest.lines().next().unwrap_or("").trim();
    let score = raw
        .parse::<f64>()
        .map_err(|_| ItemError::ScoreParse(format!("unparsable NCS value {raw:?}")))?;
    if !score.is_finite() || !(0.0..=1.0).contains(&score) {
        return Err(ItemError::ScoreParse(format!("NCS value {score} outside [0, 1]")));
    }
    Ok(score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn takes_the_last_marker() {
        let out = "Loading\nNCS: 0.25\nretrying\nNCS: 0.875\n";
        assert_eq!(parse_score(out).unwrap(), 0.875);
    }

    #[test]
    fn tolerates_surrounding_whitespace() {
        assert_eq!(parse_score("NCS:  1 \r\n").unwrap(), 1.0);
        assert_eq!(parse_score("summary NCS: 0").unwrap(), 0.0);
    }

    #[test]
    fn rejects_missing_or_bad_values() {
        for out in ["", "done\n", "NCS: \n", "NCS: nan\n", "NCS: 1.5\n", "NCS: -0.1", "NCS: abc"] {
            assert!(
                matches!(parse_score(out), Err(ItemError::ScoreParse(_))),
                "accepted {out:?}"
            );
        }
    }

    #[cfg(unix)]
    mod process {
        use super::super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::time::Instant;
        use tempfile::tempdir;

        fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
            path
        }

        #[test]
        fn solver_stdout_is_captured() {
            let dir = tempdir().unwrap();
            let solver = script(dir.path(), "solver", "echo \"pieces=$1 dir=$2\"; echo 'NCS: 0.5'");
            let tools = ExternalTools::new("unused", solver);
            let force = AtomicBool::new(false);

            let out = tools.solve(14, dir.path(), &force).unwrap();
            assert!(out.contains("pieces=14"));
            assert_eq!(parse_score(&out).unwrap(), 0.5);
        }

        #[test]
        fn partition_receives_all_arguments() {
            let dir = tempdir().unwrap();
            let partition = script(dir.path(), "partition", "echo \"$1 $2 $4\" > \"$3/args.txt\"");
            let tools = ExternalTools::new(partition, "unused");
            let force = AtomicBool::new(false);
            let image = dir.path().join("img.jpg");

            tools
                .partition(
                    &PartitionRequest {
                        image_path: &image,
                        piece_size: 16,
                        output_dir: dir.path(),
                        seed: 1234,
                    },
                    &force,
                )
                .unwrap();
            let args = std::fs::read_to_string(dir.path().join("args.txt")).unwrap();
            assert_eq!(args.trim(), format!("{} 16 1234", image.display()));
        }

        #[test]
        fn non_zero_exit_is_a_failure() {
            let dir = tempdir().unwrap();
            let partition = script(dir.path(), "partition", "exit 3");
            let tools = ExternalTools::new(partition, "unused");
            let force = AtomicBool::new(false);
            let result = tools.partition(
                &PartitionRequest {
                    image_path: dir.path(),
                    piece_size: 16,
                    output_dir: dir.path(),
                    seed: 1,
                },
                &force,
            );
            assert!(matches!(result, Err(ToolError::Failed { .. })));
        }

        #[test]
        fn missing_program_fails_to_spawn() {
            let dir = tempdir().unwrap();
            let tools = ExternalTools::new("unused", dir.path().join("no-such-solver"));
            let force = AtomicBool::new(false);
            assert!(matches!(
                tools.solve(1, dir.path(), &force),
                Err(ToolError::Spawn { .. })
            ));
        }

        #[test]
        fn force_flag_kills_a_hung_tool() {
            let dir = tempdir().unwrap();
            let solver = script(dir.path(), "solver", "exec sleep 30");
            let tools = ExternalTools::new("unused", solver);
            let force = std::sync::Arc::new(AtomicBool::new(false));

            let trigger = std::sync::Arc::clone(&force);
            let killer = thread::spawn(move || {
                sleep(Duration::from_millis(100));
                trigger.store(true, Ordering::Relaxed);
            });
            let started = Instant::now();
            let result = tools.solve(1, dir.path(), &force);
            killer.join().unwrap();

            assert!(matches!(result, Err(ToolError::Killed { .. })));
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[test]
        fn background_children_do_not_hold_stdout_open() {
            let dir = tempdir().unwrap();
            let solver = script(dir.path(), "solver", "sleep 30 &\necho 'NCS: 0.5'");
            let tools = ExternalTools::new("unused", solver);
            let force = AtomicBool::new(false);

            let started = Instant::now();
            let out = tools.solve(1, dir.path(), &force).unwrap();

            assert_eq!(parse_score(&out).unwrap(), 0.5);
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[cfg(target_os = "linux")]
        #[test]
        fn force_flag_kills_the_whole_process_group() {
            let dir = tempdir().unwrap();
            let pid_file = dir.path().join("grandchild.pid");
            let solver = script(
                dir.path(),
                "solver",
                &format!("sleep 30 &\necho $! > '{}'\nwait", pid_file.display()),
            );
            let tools = ExternalTools::new("unused", solver);
            let force = std::sync::Arc::new(AtomicBool::new(false));

            let trigger = std::sync::Arc::clone(&force);
            let pid_path = pid_file.clone();
            let killer = thread::spawn(move || {
                while !pid_path.exists() {
                    sleep(Duration::from_millis(10));
                }
                sleep(Duration::from_millis(50));
                trigger.store(true, Ordering::Relaxed);
            });
            let result = tools.solve(1, dir.path(), &force);
            killer.join().unwrap();
            assert!(matches!(result, Err(ToolError::Killed { .. })));

            let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
            let proc_status = PathBuf::from(format!("/proc/{pid}/status"));
            let deadline = Instant::now() + Duration::from_secs(5);
            let alive = || {
                std::fs::read_to_string(&proc_status)
                    .map(|status| !status.contains("State:\tZ"))
                    .unwrap_or(false)
            };
            while alive() && Instant::now() < deadline {
                sleep(Duration::from_millis(20));
            }
            assert!(!alive(), "background sleep {pid} survived a forced stop");
        }
    }
}
