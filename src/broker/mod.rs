// ABOUTME: Terminal session broker: WebSocket channels bridged onto pane streams

pub mod control;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ApiError, WS_CLOSE_TARGET_GONE};
use crate::models::PaneTarget;
use crate::registry::ContainerRegistry;
use crate::tmux::{PaneStream, ScrollDirection, TmuxAdapter, TmuxSource};

use control::{ControlMsg, ParsedFrame};

/// Mouse-option introspection cadence per active channel.
const MOUSE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Per-channel lifecycle. Switching re-enters Attached under the same socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelState {
    Opening,
    Attached,
    Switching,
    Faulted,
    Closing,
}

/// Arena entry: the broker holds ids and cancellation handles, never
/// back-pointers into connection state.
pub struct ChannelHandle {
    pub target: PaneTarget,
    pub cancel: CancellationToken,
}

pub struct TerminalBroker {
    adapter: TmuxAdapter,
    registry: Arc<ContainerRegistry>,
    channels: DashMap<u64, ChannelHandle>,
    next_id: AtomicU64,
}

impl TerminalBroker {
    pub fn new(adapter: TmuxAdapter, registry: Arc<ContainerRegistry>) -> Self {
        Self {
            adapter,
            registry,
            channels: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn active_channels(&self) -> usize {
        self.channels.len()
    }

    /// Drive one client terminal channel to completion.
    pub async fn handle_socket(
        self: Arc<Self>,
        socket: WebSocket,
        container_id: String,
        session_name: String,
        window_index: u32,
    ) {
        let mut target = PaneTarget::new(container_id, session_name, window_index);
        let (mut sink, mut ws_rx) = socket.split();

        let source = match self.resolve_and_verify(&target).await {
            Ok(source) => source,
            Err(e) => {
                warn!("terminal open rejected for {:?}: {e}", target.tmux_target());
                close_with(&mut sink, e.ws_close_code(), &e.to_string()).await;
                return;
            }
        };

        let mut state = ChannelState::Opening;
        let mut stream = match self.adapter.open_stream(&source, &target).await {
            Ok(stream) => stream,
            Err(e) => {
                let api: ApiError = e.into();
                close_with(&mut sink, api.ws_close_code(), &api.to_string()).await;
                return;
            }
        };

        let channel_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        self.channels.insert(
            channel_id,
            ChannelHandle {
                target: target.clone(),
                cancel: cancel.clone(),
            },
        );
        info!(
            "terminal channel {channel_id} attached to {}/{}",
            target.container_id,
            target.tmux_target()
        );

        // Ticker task: mouse-mode introspection at most once a second. It
        // shares the channel cancellation signal and reports over a queue so
        // the socket writer stays single-owner.
        let (mouse_tx, mut mouse_rx) = mpsc::channel::<bool>(4);
        let ticker = tokio::spawn(mouse_poller(
            self.adapter.clone(),
            source.clone(),
            mouse_tx,
            cancel.clone(),
        ));

        let mut last_resize: Option<(u16, u16)> = None;

        'channel: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    state = ChannelState::Closing;
                    break 'channel;
                }
                // Source → client. First successful read moves Opening → Attached.
                maybe = stream.output.recv() => {
                    match maybe {
                        Some(bytes) => {
                            if state == ChannelState::Opening {
                                state = ChannelState::Attached;
                            }
                            if sink.send(Message::Binary(bytes)).await.is_err() {
                                state = ChannelState::Closing;
                                break 'channel;
                            }
                        }
                        None => {
                            // Source vanished mid-stream.
                            state = ChannelState::Faulted;
                            let _ = sink
                                .send(Message::Text("\r\n[terminal stream ended]\r\n".into()))
                                .await;
                            close_with(&mut sink, WS_CLOSE_TARGET_GONE, "target gone").await;
                            break 'channel;
                        }
                    }
                }
                // Client → source, control messages interleaved.
                maybe = ws_rx.next() => {
                    let Some(Ok(msg)) = maybe else {
                        state = ChannelState::Closing;
                        break 'channel;
                    };
                    match msg {
                        Message::Binary(data) => {
                            if stream.input.send(data).await.is_err() {
                                state = ChannelState::Faulted;
                                close_with(&mut sink, WS_CLOSE_TARGET_GONE, "target gone").await;
                                break 'channel;
                            }
                        }
                        Message::Text(text) => {
                            match control::parse_frame(text.as_str()) {
                                ParsedFrame::Input => {
                                    let bytes = Bytes::copy_from_slice(text.as_str().as_bytes());
                                    if stream.input.send(bytes).await.is_err() {
                                        state = ChannelState::Faulted;
                                        close_with(&mut sink, WS_CLOSE_TARGET_GONE, "target gone").await;
                                        break 'channel;
                                    }
                                }
                                ParsedFrame::UnknownControl => {
                                    debug!("dropping unknown control frame: {text:?}");
                                }
                                ParsedFrame::Control(ctrl) => {
                                    match self
                                        .apply_control(
                                            ctrl,
                                            &source,
                                            &mut target,
                                            &mut stream,
                                            &mut last_resize,
                                            &mut state,
                                            channel_id,
                                        )
                                        .await
                                    {
                                        Ok(()) => {}
                                        Err(e) => {
                                            close_with(&mut sink, e.ws_close_code(), &e.to_string())
                                                .await;
                                            break 'channel;
                                        }
                                    }
                                }
                            }
                        }
                        Message::Close(_) => {
                            state = ChannelState::Closing;
                            break 'channel;
                        }
                        Message::Ping(_) | Message::Pong(_) => {}
                    }
                }
                maybe = mouse_rx.recv() => {
                    if let Some(enabled) = maybe {
                        let _ = sink
                            .send(Message::Text(control::mouse_warning(enabled).into()))
                            .await;
                    }
                }
            }
        }

        debug!("terminal channel {channel_id} closing in state {state:?}");
        stream.close();
        cancel.cancel();
        ticker.abort();
        self.channels.remove(&channel_id);
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_control(
        &self,
        ctrl: ControlMsg,
        source: &TmuxSource,
        target: &mut PaneTarget,
        stream: &mut PaneStream,
        last_resize: &mut Option<(u16, u16)>,
        state: &mut ChannelState,
        channel_id: u64,
    ) -> Result<(), ApiError> {
        match ctrl {
            ControlMsg::Resize { cols, rows } => {
                if control::coalesce_resize(last_resize, (cols, rows)) {
                    let _ = stream.resize.send((cols, rows)).await;
                }
                Ok(())
            }
            ControlMsg::ScrollUp { lines } => {
                self.adapter
                    .ack_scroll(source, target, ScrollDirection::Up, lines)
                    .await?;
                Ok(())
            }
            ControlMsg::ScrollDown { lines } => {
                self.adapter
                    .ack_scroll(source, target, ScrollDirection::Down, lines)
                    .await?;
                Ok(())
            }
            ControlMsg::ScrollExit => {
                self.adapter.exit_scroll(source, target).await?;
                Ok(())
            }
            ControlMsg::DisableMouse => {
                self.adapter.set_mouse_off(source).await?;
                Ok(())
            }
            ControlMsg::SelectWindow { index } => {
                // Tear down the old pane stream before any new bytes flow; the
                // next byte the client reads belongs to the new target.
                *state = ChannelState::Switching;
                stream.close();
                target.window_index = index;
                let new_stream = self.adapter.open_stream(source, target).await?;
                *stream = new_stream;
                if let Some(mut entry) = self.channels.get_mut(&channel_id) {
                    entry.target = target.clone();
                }
                if let Some(size) = *last_resize {
                    let _ = stream.resize.send(size).await;
                }
                *state = ChannelState::Attached;
                Ok(())
            }
        }
    }

    /// Resolve the source and confirm the session/window exist right now.
    async fn resolve_and_verify(&self, target: &PaneTarget) -> Result<TmuxSource, ApiError> {
        let source = self.registry.resolve_source(&target.container_id)?;
        let sessions = self
            .adapter
            .list_sessions(&source, &target.container_id)
            .await?;
        let session = sessions
            .iter()
            .find(|s| s.name == target.session_name)
            .ok_or_else(|| {
                ApiError::TargetMissing(format!("session not found: {}", target.session_name))
            })?;
        if session.window(target.window_index).is_none() {
            return Err(ApiError::TargetMissing(format!(
                "window not found: {}",
                target.tmux_target()
            )));
        }
        Ok(source)
    }
}

/// Poll the tmux mouse option and report transitions.
async fn mouse_poller(
    adapter: TmuxAdapter,
    source: TmuxSource,
    report: mpsc::Sender<bool>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(MOUSE_POLL_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last: Option<bool> = None;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        match adapter.mouse_enabled(&source).await {
            Ok(enabled) => {
                if last != Some(enabled) {
                    let changed = last.is_some();
                    last = Some(enabled);
                    // Only report transitions, not the initial reading, unless on.
                    if changed || enabled {
                        if report.send(enabled).await.is_err() {
                            return;
                        }
                    }
                }
            }
            Err(e) => debug!("mouse poll failed: {e}"),
        }
    }
}

async fn close_with(sink: &mut SplitSink<WebSocket, Message>, code: u16, reason: &str) {
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await;
}
