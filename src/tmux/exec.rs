// ABOUTME: Container-exec tmux invocation through the engine's exec API

use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::container::LogOutput;
use bollard::Docker;
use futures_util::StreamExt;
use tokio::time::timeout;

use crate::config::TMUX_TIMEOUT;

use super::command::classify_stderr;
use super::TmuxError;

/// Run one tmux command inside a running container and return stdout.
pub async fn run_tmux_exec(
    docker: &Docker,
    container_id: &str,
    args: &[String],
) -> Result<String, TmuxError> {
    let mut cmd = vec!["tmux".to_string()];
    cmd.extend(args.iter().cloned());

    let exec = docker
        .create_exec(
            container_id,
            CreateExecOptions {
                attach_stdout: Some(true),
                attach_stderr: Some(true),
                cmd: Some(cmd),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| TmuxError::SourceUnavailable(format!("exec create failed: {e}")))?;

    let started = docker
        .start_exec(&exec.id, None::<StartExecOptions>)
        .await
        .map_err(|e| TmuxError::SourceUnavailable(format!("exec start failed: {e}")))?;

    let StartExecResults::Attached { output, .. } = started else {
        return Err(TmuxError::Internal("exec started detached".to_string()));
    };

    let collected = timeout(TMUX_TIMEOUT, collect_output(output))
        .await
        .map_err(|_| TmuxError::Internal(format!("tmux {} timed out", args.join(" "))))?;
    let (stdout, stderr) = collected;

    let inspect = docker
        .inspect_exec(&exec.id)
        .await
        .map_err(|e| TmuxError::SourceUnavailable(format!("exec inspect failed: {e}")))?;

    match inspect.exit_code {
        Some(0) | None => Ok(stdout),
        Some(_) => Err(classify_stderr(&stderr)),
    }
}

async fn collect_output(
    mut output: impl futures_util::Stream<Item = Result<LogOutput, bollard::errors::Error>> + Unpin,
) -> (String, String) {
    let mut stdout = String::new();
    let mut stderr = String::new();
    while let Some(frame) = output.next().await {
        match frame {
            Ok(LogOutput::StdOut { message }) => {
                stdout.push_str(&String::from_utf8_lossy(&message));
            }
            Ok(LogOutput::StdErr { message }) => {
                stderr.push_str(&String::from_utf8_lossy(&message));
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
    (stdout, stderr)
}
