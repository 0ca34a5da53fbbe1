// ABOUTME: Full-duplex pane byte streams: PTY-backed tmux attach, docker exec, or bridge channel

use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use bollard::exec::{CreateExecOptions, ResizeExecOptions, StartExecOptions, StartExecResults};
use bollard::Docker;
use bytes::Bytes;
use futures_util::StreamExt;
use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::TmuxError;

/// Output channel slots; with 4 KiB reads this bounds each direction near 256 KiB.
pub const STREAM_CHANNEL_CAP: usize = 64;
const READ_BUF: usize = 4096;

/// Handle to one full-duplex pane stream. Two clients opening the same pane
/// get two independent handles; tmux itself is the shared multiplexer.
#[derive(Debug)]
pub struct PaneStream {
    /// Pane bytes toward the client, in source order.
    pub output: mpsc::Receiver<Bytes>,
    /// Client bytes toward the pane, in send order.
    pub input: mpsc::Sender<Bytes>,
    /// Requested (cols, rows) for the underlying PTY or exec TTY.
    pub resize: mpsc::Sender<(u16, u16)>,
    /// Cancelling tears down the backing process/exec/channel.
    pub cancel: CancellationToken,
}

impl PaneStream {
    /// Assemble a stream from raw channel halves (used by the bridge hub).
    pub fn from_channels(
        output: mpsc::Receiver<Bytes>,
        input: mpsc::Sender<Bytes>,
        resize: mpsc::Sender<(u16, u16)>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            output,
            input,
            resize,
            cancel,
        }
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Attach to a session through a local PTY running `tmux attach`.
/// The window is selected before the caller opens the stream.
pub fn spawn_local_attach(
    socket_path: Option<&Path>,
    session_name: &str,
) -> Result<PaneStream, TmuxError> {
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows: 24,
            cols: 80,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| TmuxError::Internal(format!("openpty failed: {e}")))?;

    let mut cmd = CommandBuilder::new("tmux");
    if let Some(socket) = socket_path {
        cmd.arg("-S");
        cmd.arg(socket);
    }
    cmd.args(["attach-session", "-t", &format!("={session_name}")]);
    cmd.env("TERM", "xterm-256color");
    // Avoid "sessions should be nested with care" when the server itself runs under tmux.
    cmd.env_remove("TMUX");

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| TmuxError::SourceUnavailable(format!("tmux attach spawn failed: {e}")))?;

    let mut reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| TmuxError::Internal(format!("pty reader: {e}")))?;
    let writer = Arc::new(Mutex::new(
        pair.master
            .take_writer()
            .map_err(|e| TmuxError::Internal(format!("pty writer: {e}")))?,
    ));
    let master = Arc::new(Mutex::new(pair.master));
    let child = Arc::new(Mutex::new(child));

    let (out_tx, out_rx) = mpsc::channel::<Bytes>(STREAM_CHANNEL_CAP);
    let (in_tx, mut in_rx) = mpsc::channel::<Bytes>(STREAM_CHANNEL_CAP);
    let (resize_tx, mut resize_rx) = mpsc::channel::<(u16, u16)>(16);
    let cancel = CancellationToken::new();

    // Blocking reader thread: PTY bytes into the bounded async channel. When the
    // client is slow the blocking_send stalls here and tmux absorbs the window.
    let reader_cancel = cancel.clone();
    std::thread::spawn(move || {
        let mut buf = [0u8; READ_BUF];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if out_tx.blocking_send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                        break;
                    }
                }
            }
        }
        reader_cancel.cancel();
    });

    // Writer/resize/teardown task.
    let task_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = task_cancel.cancelled() => break,
                maybe = in_rx.recv() => {
                    let Some(bytes) = maybe else { break };
                    let w = writer.clone();
                    let res = tokio::task::spawn_blocking(move || {
                        let mut guard = w.lock().unwrap_or_else(|p| p.into_inner());
                        guard.write_all(&bytes).and_then(|()| guard.flush())
                    })
                    .await;
                    if !matches!(res, Ok(Ok(()))) {
                        break;
                    }
                }
                maybe = resize_rx.recv() => {
                    let Some((cols, rows)) = maybe else { break };
                    let m = master.clone();
                    let _ = tokio::task::spawn_blocking(move || {
                        let guard = m.lock().unwrap_or_else(|p| p.into_inner());
                        guard.resize(PtySize { rows, cols, pixel_width: 0, pixel_height: 0 })
                    })
                    .await;
                }
            }
        }
        let mut guard = child.lock().unwrap_or_else(|p| p.into_inner());
        if let Err(e) = guard.kill() {
            debug!("pty child kill: {e}");
        }
        task_cancel.cancel();
    });

    Ok(PaneStream {
        output: out_rx,
        input: in_tx,
        resize: resize_tx,
        cancel,
    })
}

/// Attach to a session inside a running container via the engine's exec API.
pub async fn spawn_exec_attach(
    docker: &Docker,
    container_id: &str,
    session_name: &str,
) -> Result<PaneStream, TmuxError> {
    let exec = docker
        .create_exec(
            container_id,
            CreateExecOptions {
                attach_stdin: Some(true),
                attach_stdout: Some(true),
                attach_stderr: Some(true),
                tty: Some(true),
                env: Some(vec!["TERM=xterm-256color".to_string()]),
                cmd: Some(vec![
                    "tmux".to_string(),
                    "attach-session".to_string(),
                    "-t".to_string(),
                    format!("={session_name}"),
                ]),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| TmuxError::SourceUnavailable(format!("exec create failed: {e}")))?;

    let started = docker
        .start_exec(
            &exec.id,
            Some(StartExecOptions {
                detach: false,
                tty: true,
                ..Default::default()
            }),
        )
        .await
        .map_err(|e| TmuxError::SourceUnavailable(format!("exec start failed: {e}")))?;

    let StartExecResults::Attached { mut output, mut input } = started else {
        return Err(TmuxError::Internal("exec started detached".to_string()));
    };

    let (out_tx, out_rx) = mpsc::channel::<Bytes>(STREAM_CHANNEL_CAP);
    let (in_tx, mut in_rx) = mpsc::channel::<Bytes>(STREAM_CHANNEL_CAP);
    let (resize_tx, mut resize_rx) = mpsc::channel::<(u16, u16)>(16);
    let cancel = CancellationToken::new();

    let read_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = read_cancel.cancelled() => break,
                frame = output.next() => {
                    match frame {
                        Some(Ok(log)) => {
                            let bytes = Bytes::from(log.into_bytes());
                            if out_tx.send(bytes).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(_)) | None => break,
                    }
                }
            }
        }
        read_cancel.cancel();
    });

    let write_cancel = cancel.clone();
    let docker = docker.clone();
    let exec_id = exec.id.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = write_cancel.cancelled() => break,
                maybe = in_rx.recv() => {
                    let Some(bytes) = maybe else { break };
                    if input.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
                maybe = resize_rx.recv() => {
                    let Some((cols, rows)) = maybe else { break };
                    let _ = docker
                        .resize_exec(&exec_id, ResizeExecOptions { height: rows, width: cols })
                        .await;
                }
            }
        }
        write_cancel.cancel();
    });

    Ok(PaneStream {
        output: out_rx,
        input: in_tx,
        resize: resize_tx,
        cancel,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn from_channels_wires_both_directions() {
        let (out_tx, out_rx) = mpsc::channel(4);
        let (in_tx, mut in_rx) = mpsc::channel(4);
        let (resize_tx, mut resize_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let mut stream =
            PaneStream::from_channels(out_rx, in_tx, resize_tx, cancel.clone());

        out_tx.send(Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(stream.output.recv().await.unwrap(), Bytes::from_static(b"hello"));

        stream.input.send(Bytes::from_static(b"typed")).await.unwrap();
        assert_eq!(in_rx.recv().await.unwrap(), Bytes::from_static(b"typed"));

        stream.resize.send((120, 40)).await.unwrap();
        assert_eq!(resize_rx.recv().await.unwrap(), (120, 40));

        stream.close();
        assert!(cancel.is_cancelled());
    }
}
