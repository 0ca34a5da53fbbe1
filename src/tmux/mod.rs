// ABOUTME: Uniform tmux operations over local-process, container-exec and bridge-proxied sources

pub mod command;
mod exec;
pub mod local;
mod stream;

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::bridge::protocol::AdapterOp;
use crate::bridge::BridgeHub;
use crate::docker::DockerEngine;
use crate::models::{PaneTarget, TmuxSession};

pub use stream::{spawn_exec_attach, spawn_local_attach, PaneStream, STREAM_CHANNEL_CAP};

#[derive(Debug, Error)]
pub enum TmuxError {
    /// The underlying source (container, docker, bridge) is offline.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),
    /// Session or window does not exist.
    #[error("target missing: {0}")]
    TargetMissing(String),
    /// Duplicate session name on create/rename.
    #[error("name conflict: {0}")]
    NameConflict(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("tmux failure: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
}

/// Where tmux actually runs for one container entry. A tagged variant, not
/// trait dispatch: every caller can see the full set of shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TmuxSource {
    /// Host or local tmux reached via a socket path (None = default socket).
    LocalProcess { socket_path: Option<PathBuf> },
    /// Tmux inside a running docker container, reached via the exec API.
    ContainerExec { container_id: String },
    /// Tmux on a remote machine behind a connected bridge agent.
    Bridge { bridge_id: String },
}

/// Single operation surface for all source variants. Holds no per-call state;
/// cloneable across handlers.
#[derive(Clone)]
pub struct TmuxAdapter {
    docker: Arc<DockerEngine>,
    hub: Arc<BridgeHub>,
}

impl TmuxAdapter {
    pub fn new(docker: Arc<DockerEngine>, hub: Arc<BridgeHub>) -> Self {
        Self { docker, hub }
    }

    /// Snapshot of all sessions in one source. Always queries the source;
    /// an empty list is a valid result.
    pub async fn list_sessions(
        &self,
        source: &TmuxSource,
        container_id: &str,
    ) -> Result<Vec<TmuxSession>, TmuxError> {
        if let TmuxSource::Bridge { bridge_id } = source {
            let value = self.hub.call_op(bridge_id, AdapterOp::ListSessions).await?;
            let reported: Vec<crate::bridge::protocol::ReportedSession> =
                serde_json::from_value(value)
                    .map_err(|e| TmuxError::Internal(format!("bad bridge session list: {e}")))?;
            return Ok(reported
                .into_iter()
                .map(|r| r.into_session(container_id))
                .collect());
        }

        let list = match self
            .run(source, vec![
                "list-sessions".to_string(),
                "-F".to_string(),
                command::session_format(),
            ])
            .await
        {
            Ok(out) => out,
            // A source with no tmux server simply has no sessions yet.
            Err(TmuxError::SourceUnavailable(msg)) if command::is_empty_server(&msg) => {
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let mut sessions = Vec::new();
        for line in list.lines().filter(|l| !l.is_empty()) {
            let Some(parsed) = command::parse_session_line(line) else {
                debug!("skipping unparseable session line: {line:?}");
                continue;
            };
            let windows_out = self
                .run(source, vec![
                    "list-windows".to_string(),
                    "-t".to_string(),
                    format!("={}", parsed.name),
                    "-F".to_string(),
                    command::window_format(),
                ])
                .await?;
            let mut windows: Vec<_> = windows_out
                .lines()
                .filter(|l| !l.is_empty())
                .filter_map(command::parse_window_line)
                .collect();
            windows.sort_by_key(|w| w.index);
            sessions.push(TmuxSession {
                id: parsed.id,
                name: parsed.name,
                attached: parsed.attached,
                windows,
                container_id: container_id.to_string(),
            });
        }
        sessions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sessions)
    }

    /// Create a detached session and enable activity monitoring without the
    /// audible bell.
    pub async fn create_session(&self, source: &TmuxSource, name: &str) -> Result<(), TmuxError> {
        command::validate_session_name(name)?;
        if let TmuxSource::Bridge { bridge_id } = source {
            self.hub
                .call_op(bridge_id, AdapterOp::CreateSession { name: name.to_string() })
                .await?;
            return Ok(());
        }

        if self.session_exists(source, name).await? {
            return Err(TmuxError::NameConflict(format!("duplicate session: {name}")));
        }
        self.run(source, vec![
            "new-session".to_string(),
            "-d".to_string(),
            "-s".to_string(),
            name.to_string(),
        ])
        .await?;
        for (option, value) in [
            ("monitor-activity", "on"),
            ("activity-action", "none"),
            ("remain-on-exit", "off"),
        ] {
            self.run(source, vec![
                "set-option".to_string(),
                "-t".to_string(),
                format!("={name}"),
                option.to_string(),
                value.to_string(),
            ])
            .await?;
        }
        Ok(())
    }

    pub async fn kill_session(&self, source: &TmuxSource, name: &str) -> Result<(), TmuxError> {
        if let TmuxSource::Bridge { bridge_id } = source {
            self.hub
                .call_op(bridge_id, AdapterOp::KillSession { name: name.to_string() })
                .await?;
            return Ok(());
        }
        self.run(source, vec![
            "kill-session".to_string(),
            "-t".to_string(),
            format!("={name}"),
        ])
        .await
        .map(|_| ())
    }

    pub async fn rename_session(
        &self,
        source: &TmuxSource,
        name: &str,
        new_name: &str,
    ) -> Result<(), TmuxError> {
        command::validate_session_name(new_name)?;
        if let TmuxSource::Bridge { bridge_id } = source {
            self.hub
                .call_op(bridge_id, AdapterOp::RenameSession {
                    name: name.to_string(),
                    new_name: new_name.to_string(),
                })
                .await?;
            return Ok(());
        }
        if self.session_exists(source, new_name).await? {
            return Err(TmuxError::NameConflict(format!(
                "duplicate session: {new_name}"
            )));
        }
        self.run(source, vec![
            "rename-session".to_string(),
            "-t".to_string(),
            format!("={name}"),
            new_name.to_string(),
        ])
        .await
        .map(|_| ())
    }

    pub async fn create_window(&self, source: &TmuxSource, session: &str) -> Result<(), TmuxError> {
        if let TmuxSource::Bridge { bridge_id } = source {
            self.hub
                .call_op(bridge_id, AdapterOp::CreateWindow { session: session.to_string() })
                .await?;
            return Ok(());
        }
        self.run(source, vec![
            "new-window".to_string(),
            "-t".to_string(),
            format!("={session}:"),
        ])
        .await
        .map(|_| ())
    }

    /// Swap two windows, keeping focus where it was. An involution: applying
    /// twice restores the original order.
    pub async fn swap_windows(
        &self,
        source: &TmuxSource,
        session: &str,
        a: u32,
        b: u32,
    ) -> Result<(), TmuxError> {
        if let TmuxSource::Bridge { bridge_id } = source {
            self.hub
                .call_op(bridge_id, AdapterOp::SwapWindows {
                    session: session.to_string(),
                    a,
                    b,
                })
                .await?;
            return Ok(());
        }
        self.run(source, vec![
            "swap-window".to_string(),
            "-d".to_string(),
            "-s".to_string(),
            format!("={session}:{a}"),
            "-t".to_string(),
            format!("={session}:{b}"),
        ])
        .await
        .map(|_| ())
    }

    pub async fn move_window(
        &self,
        source: &TmuxSource,
        src_session: &str,
        index: u32,
        dst_session: &str,
    ) -> Result<(), TmuxError> {
        if let TmuxSource::Bridge { bridge_id } = source {
            self.hub
                .call_op(bridge_id, AdapterOp::MoveWindow {
                    src_session: src_session.to_string(),
                    index,
                    dst_session: dst_session.to_string(),
                })
                .await?;
            return Ok(());
        }
        self.run(source, vec![
            "move-window".to_string(),
            "-d".to_string(),
            "-s".to_string(),
            format!("={src_session}:{index}"),
            "-t".to_string(),
            format!("={dst_session}:"),
        ])
        .await
        .map(|_| ())
    }

    pub async fn kill_window(
        &self,
        source: &TmuxSource,
        session: &str,
        index: u32,
    ) -> Result<(), TmuxError> {
        if let TmuxSource::Bridge { bridge_id } = source {
            self.hub
                .call_op(bridge_id, AdapterOp::KillWindow {
                    session: session.to_string(),
                    index,
                })
                .await?;
            return Ok(());
        }
        self.run(source, vec![
            "kill-window".to_string(),
            "-t".to_string(),
            format!("={session}:{index}"),
        ])
        .await
        .map(|_| ())
    }

    /// Send literal bytes to the pane, no key-name translation.
    pub async fn send_keys(
        &self,
        source: &TmuxSource,
        target: &PaneTarget,
        data: &str,
    ) -> Result<(), TmuxError> {
        if let TmuxSource::Bridge { bridge_id } = source {
            self.hub
                .call_op(bridge_id, AdapterOp::SendKeys {
                    session: target.session_name.clone(),
                    window: target.window_index,
                    data: data.to_string(),
                })
                .await?;
            return Ok(());
        }
        self.run(source, vec![
            "send-keys".to_string(),
            "-t".to_string(),
            format!("={}", target.tmux_target()),
            "-l".to_string(),
            "--".to_string(),
            data.to_string(),
        ])
        .await
        .map(|_| ())
    }

    /// Visible pane with escape sequences, or full plain-text scrollback.
    pub async fn capture_pane(
        &self,
        source: &TmuxSource,
        target: &PaneTarget,
        with_ansi: bool,
    ) -> Result<Vec<u8>, TmuxError> {
        if let TmuxSource::Bridge { bridge_id } = source {
            let value = self
                .hub
                .call_op(bridge_id, AdapterOp::CapturePane {
                    session: target.session_name.clone(),
                    window: target.window_index,
                    with_ansi,
                })
                .await?;
            let text: String = serde_json::from_value(value)
                .map_err(|e| TmuxError::Internal(format!("bad bridge capture: {e}")))?;
            return Ok(text.into_bytes());
        }
        let mut args = vec![
            "capture-pane".to_string(),
            "-p".to_string(),
            "-J".to_string(),
            "-t".to_string(),
            format!("={}", target.tmux_target()),
        ];
        if with_ansi {
            args.push("-e".to_string());
        } else {
            args.push("-S".to_string());
            args.push("-".to_string());
        }
        self.run(source, args).await.map(String::into_bytes)
    }

    /// Full-duplex byte stream bound to the target's active pane. Each call
    /// returns an independent stream; tmux multiplexes between them.
    pub async fn open_stream(
        &self,
        source: &TmuxSource,
        target: &PaneTarget,
    ) -> Result<PaneStream, TmuxError> {
        match source {
            TmuxSource::LocalProcess { socket_path } => {
                self.select_window(source, target).await?;
                stream::spawn_local_attach(socket_path.as_deref(), &target.session_name)
            }
            TmuxSource::ContainerExec { container_id } => {
                self.select_window(source, target).await?;
                let docker = self.docker.client().map_err(unavailable)?;
                stream::spawn_exec_attach(docker, container_id, &target.session_name).await
            }
            TmuxSource::Bridge { bridge_id } => self.hub.open_stream(bridge_id, target).await,
        }
    }

    /// Copy-mode scroll that never pollutes the byte stream.
    pub async fn ack_scroll(
        &self,
        source: &TmuxSource,
        target: &PaneTarget,
        direction: ScrollDirection,
        lines: u32,
    ) -> Result<(), TmuxError> {
        if let TmuxSource::Bridge { bridge_id } = source {
            self.hub
                .call_op(bridge_id, AdapterOp::AckScroll {
                    session: target.session_name.clone(),
                    window: target.window_index,
                    direction,
                    lines,
                })
                .await?;
            return Ok(());
        }
        let tmux_target = format!("={}", target.tmux_target());
        if direction == ScrollDirection::Up {
            // Entering copy-mode is a no-op when the pane is already in it.
            self.run(source, vec![
                "copy-mode".to_string(),
                "-t".to_string(),
                tmux_target.clone(),
            ])
            .await?;
        }
        let motion = match direction {
            ScrollDirection::Up => "cursor-up",
            ScrollDirection::Down => "cursor-down",
        };
        self.run(source, vec![
            "send-keys".to_string(),
            "-t".to_string(),
            tmux_target,
            "-X".to_string(),
            "-N".to_string(),
            lines.max(1).to_string(),
            motion.to_string(),
        ])
        .await
        .map(|_| ())
    }

    /// Leave copy-mode on the target pane.
    pub async fn exit_scroll(
        &self,
        source: &TmuxSource,
        target: &PaneTarget,
    ) -> Result<(), TmuxError> {
        if let TmuxSource::Bridge { bridge_id } = source {
            self.hub
                .call_op(bridge_id, AdapterOp::ScrollExit {
                    session: target.session_name.clone(),
                    window: target.window_index,
                })
                .await?;
            return Ok(());
        }
        self.run(source, vec![
            "send-keys".to_string(),
            "-t".to_string(),
            format!("={}", target.tmux_target()),
            "-X".to_string(),
            "cancel".to_string(),
        ])
        .await
        .map(|_| ())
    }

    /// Whether tmux mouse mode is currently on for this source.
    pub async fn mouse_enabled(&self, source: &TmuxSource) -> Result<bool, TmuxError> {
        if let TmuxSource::Bridge { bridge_id } = source {
            let value = self.hub.call_op(bridge_id, AdapterOp::MouseQuery).await?;
            return Ok(value.as_bool().unwrap_or(false));
        }
        let out = self
            .run(source, vec![
                "show-options".to_string(),
                "-g".to_string(),
                "-v".to_string(),
                "mouse".to_string(),
            ])
            .await?;
        Ok(out.trim() == "on")
    }

    pub async fn set_mouse_off(&self, source: &TmuxSource) -> Result<(), TmuxError> {
        if let TmuxSource::Bridge { bridge_id } = source {
            self.hub.call_op(bridge_id, AdapterOp::SetMouseOff).await?;
            return Ok(());
        }
        self.run(source, vec![
            "set-option".to_string(),
            "-g".to_string(),
            "mouse".to_string(),
            "off".to_string(),
        ])
        .await
        .map(|_| ())
    }

    /// Explicit client ack for bell/activity flags: visiting the window is
    /// what resets tmux's alert state, so select it and re-arm monitoring.
    pub async fn clear_status(
        &self,
        source: &TmuxSource,
        target: &PaneTarget,
    ) -> Result<(), TmuxError> {
        if let TmuxSource::Bridge { bridge_id } = source {
            self.hub
                .call_op(bridge_id, AdapterOp::ClearStatus {
                    session: target.session_name.clone(),
                    window: target.window_index,
                })
                .await?;
            return Ok(());
        }
        self.select_window(source, target).await?;
        self.run(source, vec![
            "set-window-option".to_string(),
            "-t".to_string(),
            format!("={}", target.tmux_target()),
            "monitor-activity".to_string(),
            "on".to_string(),
        ])
        .await
        .map(|_| ())
    }

    async fn select_window(
        &self,
        source: &TmuxSource,
        target: &PaneTarget,
    ) -> Result<(), TmuxError> {
        self.run(source, vec![
            "select-window".to_string(),
            "-t".to_string(),
            format!("={}", target.tmux_target()),
        ])
        .await
        .map(|_| ())
    }

    async fn session_exists(&self, source: &TmuxSource, name: &str) -> Result<bool, TmuxError> {
        match self
            .run(source, vec![
                "has-session".to_string(),
                "-t".to_string(),
                format!("={name}"),
            ])
            .await
        {
            Ok(_) => Ok(true),
            Err(TmuxError::TargetMissing(_)) => Ok(false),
            Err(TmuxError::SourceUnavailable(msg)) if command::is_empty_server(&msg) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn run(&self, source: &TmuxSource, args: Vec<String>) -> Result<String, TmuxError> {
        match source {
            TmuxSource::LocalProcess { socket_path } => {
                local::run_tmux(socket_path.as_deref(), &args).await
            }
            TmuxSource::ContainerExec { container_id } => {
                let docker = self.docker.client().map_err(unavailable)?;
                exec::run_tmux_exec(docker, container_id, &args).await
            }
            TmuxSource::Bridge { .. } => Err(TmuxError::Internal(
                "bridge sources are proxied per-operation".to_string(),
            )),
        }
    }
}

fn unavailable(err: crate::docker::ContainerError) -> TmuxError {
    TmuxError::SourceUnavailable(err.to_string())
}
