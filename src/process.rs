//! External process execution shared by Require commands and action commands

use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("empty command")]
    Empty,

    #[error("failed to spawn: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("exited with {code:?}: {stderr}")]
    ExitStatus { code: Option<i32>, stderr: String },
}

/// Run `args[0]` with the remaining arguments and wait for it to finish.
///
/// A non-zero exit status is an error. The child is killed when the timeout
/// elapses.
pub async fn run(args: &[String], timeout: Duration) -> Result<String, ProcessError> {
    let (program, rest) = args.split_first().ok_or(ProcessError::Empty)?;
    debug!("Running {:?}", args);

    let child = Command::new(program)
        .args(rest)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(ProcessError::Spawn)?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| ProcessError::Timeout(timeout))?
        .map_err(ProcessError::Spawn)?;

    if !output.status.success() {
        return Err(ProcessError::ExitStatus {
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn run_returns_stdout_on_success() {
        let output = run(&args(&["echo", "hello"]), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(output.contains("hello"));
    }

    #[tokio::test]
    async fn run_reports_non_zero_exit() {
        let result = run(&args(&["sh", "-c", "echo oops >&2; exit 3"]), Duration::from_secs(5)).await;
        match result {
            Err(ProcessError::ExitStatus { code, stderr }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "oops");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn run_reports_missing_program() {
        let result = run(&args(&["nonexistent_command_12345"]), Duration::from_secs(5)).await;
        assert!(matches!(result, Err(ProcessError::Spawn(_))));
    }

    #[tokio::test]
    async fn run_rejects_empty_command() {
        assert!(matches!(run(&[], Duration::from_secs(1)).await, Err(ProcessError::Empty)));
    }

    #[tokio::test]
    async fn run_kills_on_timeout() {
        let result = run(&args(&["sleep", "5"]), Duration::from_millis(50)).await;
        assert!(matches!(result, Err(ProcessError::Timeout(_))));
    }
}
