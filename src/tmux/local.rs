// ABOUTME: Local-process tmux invocation against a chosen socket path

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tokio::time::timeout;

use crate::config::TMUX_TIMEOUT;

use super::command::classify_stderr;
use super::TmuxError;

/// Run one tmux command and return stdout. Stderr is classified into the
/// adapter error kinds; a missing binary surfaces as SourceUnavailable.
pub async fn run_tmux(socket_path: Option<&Path>, args: &[String]) -> Result<String, TmuxError> {
    let mut cmd = Command::new("tmux");
    if let Some(socket) = socket_path {
        cmd.arg("-S").arg(socket);
    }
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = timeout(TMUX_TIMEOUT, cmd.output())
        .await
        .map_err(|_| TmuxError::Internal(format!("tmux {} timed out", args.join(" "))))?
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TmuxError::SourceUnavailable("tmux is not installed".to_string())
            } else {
                TmuxError::Internal(format!("failed to spawn tmux: {e}"))
            }
        })?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(classify_stderr(&String::from_utf8_lossy(&output.stderr)))
    }
}
