//! Bounded subprocess execution.
//!
//! Children are spawned with `kill_on_drop`, so a timed-out or cancelled call
//! never leaves a git process behind.

use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} failed: {source}")]
    Io {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} did not finish within {timeout:?}")]
    TimedOut { program: String, timeout: Duration },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// Run `cmd` to completion, feeding `stdin` if given, within `timeout`.
///
/// A non-zero exit status is not an error here; see [`run_checked`].
pub async fn run_command(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
) -> Result<Output, CommandError> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();

    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| CommandError::Spawn {
        program: program.clone(),
        source,
    })?;

    let mut pipe = child.stdin.take();
    let input = stdin.unwrap_or_default();
    let write = async move {
        if let Some(pipe) = pipe.as_mut() {
            pipe.write_all(input).await?;
            pipe.shutdown().await?;
        }
        drop(pipe);
        Ok::<_, std::io::Error>(())
    };

    let run = async move { tokio::join!(write, child.wait_with_output()) };
    let (written, output) = match tokio::time::timeout(timeout, run).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(program = %program, ?timeout, "subprocess timed out");
            return Err(CommandError::TimedOut { program, timeout });
        }
    };

    if let Err(e) = written {
        // The child may exit before reading all input; its status tells the story.
        if e.kind() != std::io::ErrorKind::BrokenPipe {
            return Err(CommandError::Io { program, source: e });
        }
    }

    output.map_err(|source| CommandError::Io { program, source })
}

/// Like [`run_command`], but a non-zero exit status is an error.
pub async fn run_checked(
    cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
) -> Result<Output, CommandError> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    let output = run_command(cmd, stdin, timeout).await?;
    if !output.status.success() {
        return Err(CommandError::Failed {
            program,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}
