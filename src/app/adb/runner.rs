use std::io::Read;
use std::path::Path;
use std::process::{ChildStderr, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::app::error::AppError;

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// stdout followed by stderr, the way a terminal would have shown them.
    pub fn combined_text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).to_string();
        let stderr = String::from_utf8_lossy(&self.stderr);
        if !stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }
        text
    }
}

pub fn run_command_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
    trace_id: &str,
) -> Result<CommandOutput, AppError> {
    run_command_in_dir(program, args, None, timeout, trace_id)
}

pub fn run_command_in_dir(
    program: &str,
    args: &[String],
    dir: Option<&Path>,
    timeout: Duration,
    trace_id: &str,
) -> Result<CommandOutput, AppError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = dir {
        command.current_dir(dir);
    }
    let mut child = command.spawn().map_err(|err| {
        AppError::dependency(format!("Failed to spawn {program}: {err}"), trace_id)
    })?;

    // Both pipes are drained on their own threads; a chatty child would otherwise block on a
    // full pipe buffer and look like a timeout.
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stdout", trace_id))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stderr", trace_id))?;
    let stdout_handle = drain_stdout(stdout);
    let stderr_handle = drain_stderr(stderr);

    let start = Instant::now();
    let exit_code = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.code(),
            Ok(None) => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = stdout_handle.join();
                    let _ = stderr_handle.join();
                    return Err(AppError::dependency(
                        format!("{program} timed out after {}s", timeout.as_secs()),
                        trace_id,
                    ));
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(err) => {
                let _ = stdout_handle.join();
                let _ = stderr_handle.join();
                return Err(AppError::system(
                    format!("Failed to poll {program}: {err}"),
                    trace_id,
                ));
            }
        }
    };

    Ok(CommandOutput {
        stdout: stdout_handle.join().unwrap_or_default(),
        stderr: stderr_handle.join().unwrap_or_default(),
        exit_code,
    })
}

fn drain_stdout(reader: ChildStdout) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || read_all(reader))
}

fn drain_stderr(reader: ChildStderr) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || read_all(reader))
}

fn read_all(mut reader: impl Read) -> Vec<u8> {
    let mut buffer = Vec::<u8>::new();
    let mut temp = [0u8; 8192];
    loop {
        match reader.read(&mut temp) {
            Ok(0) => break,
            Ok(count) => buffer.extend_from_slice(&temp[..count]),
            Err(_) => break,
        }
    }
    buffer
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[test]
    fn does_not_deadlock_on_large_stdout() {
        let output = run_command_with_timeout(
            "sh",
            &sh("i=0; while [ $i -lt 100000 ]; do echo 1234567890; i=$((i+1)); done"),
            Duration::from_secs(10),
            "test-trace-large-output",
        )
        .expect("expected large-output command to complete without timing out");

        assert!(output.success());
        assert!(output.stdout.len() >= 1_000_000);
    }

    #[test]
    fn keeps_binary_stdout_intact() {
        let output = run_command_with_timeout(
            "sh",
            &sh("printf '\\211PNG\\r\\n\\032\\n'"),
            Duration::from_secs(5),
            "t",
        )
        .expect("run");
        assert_eq!(output.stdout, b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn reports_exit_code_and_combined_text() {
        let output = run_command_with_timeout(
            "sh",
            &sh("echo out; echo err 1>&2; exit 3"),
            Duration::from_secs(5),
            "t",
        )
        .expect("run");
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
        assert_eq!(output.combined_text(), "out\nerr\n");
    }

    #[test]
    fn kills_on_timeout() {
        let err = run_command_with_timeout(
            "sh",
            &sh("sleep 5"),
            Duration::from_millis(200),
            "trace-timeout",
        )
        .expect_err("should time out");
        assert_eq!(err.code, "ERR_DEPENDENCY");
        assert!(err.error.contains("timed out"));
    }

    #[test]
    fn spawn_failure_is_a_dependency_error() {
        let err = run_command_with_timeout(
            "/definitely/not/a/program",
            &[],
            Duration::from_secs(1),
            "trace-spawn",
        )
        .expect_err("spawn should fail");
        assert_eq!(err.code, "ERR_DEPENDENCY");
        assert_eq!(err.trace_id, "trace-spawn");
    }

    #[test]
    fn runs_in_given_directory() {
        let tmp = tempfile::TempDir::new().expect("tmp");
        std::fs::write(tmp.path().join("marker.txt"), "here").expect("write");
        let output = run_command_in_dir(
            "sh",
            &sh("cat marker.txt"),
            Some(tmp.path()),
            Duration::from_secs(5),
            "t",
        )
        .expect("run");
        assert_eq!(output.stdout_text(), "here");
    }
}
