use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt as _;
use tokio::process::Command;

use super::ExtractError;

/// Runs `program args...`, feeding `input` on stdin and returning stdout as text.
///
/// The child is killed if it outlives `timeout`.
pub(super) async fn run_with_stdin(
    program: &str,
    args: &[&str],
    input: &[u8],
    timeout: Duration,
) -> Result<String, ExtractError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ExtractError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let mut stdin = child.stdin.take().ok_or_else(|| ExtractError::Spawn {
        program: program.to_string(),
        source: std::io::Error::other("stdin not captured"),
    })?;

    let feed = async move {
        // A tool that exits early closes stdin; its exit status tells the real story.
        let _ = stdin.write_all(input).await;
        drop(stdin);
    };
    let run = async move {
        let ((), output) = tokio::join!(feed, child.wait_with_output());
        output
    };

    let output = match tokio::time::timeout(timeout, run).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            return Err(ExtractError::Spawn {
                program: program.to_string(),
                source,
            });
        }
        Err(_) => {
            return Err(ExtractError::Timeout {
                program: program.to_string(),
                timeout,
            });
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ExtractError::ToolFailed {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: stderr.trim().chars().take(500).collect(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
