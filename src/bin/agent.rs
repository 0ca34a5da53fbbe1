// ABOUTME: Bridge agent: reverse-connects local tmux into a TmuxDeck hub over one WebSocket

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tmuxdeck::bridge::protocol::{
    decode_binary_frame, encode_binary_frame, AdapterOp, AuthFrame, ControlFrame, OpError,
    ReportedSession, StreamTarget,
};
use tmuxdeck::tmux::command;
use tmuxdeck::tmux::local::run_tmux;
use tmuxdeck::tmux::{spawn_local_attach, ScrollDirection, TmuxError};

/// Reconnect backoff window.
const BACKOFF_INITIAL: Duration = Duration::from_secs(5);
const BACKOFF_MAX: Duration = Duration::from_secs(60);
const OUTGOING_QUEUE: usize = 256;

#[derive(Parser)]
#[command(
    name = "tmuxdeck-agent",
    version,
    about = "Expose this machine's tmux sessions to a TmuxDeck hub"
)]
struct Args {
    /// Hub bridge endpoint, e.g. wss://deck.example.com/ws/bridge
    #[arg(long, env = "TMUXDECK_BRIDGE_URL")]
    url: String,
    /// Bridge token issued by the hub on bridge creation
    #[arg(long, env = "TMUXDECK_BRIDGE_TOKEN")]
    token: String,
    /// Agent name shown in the hub
    #[arg(long, default_value = "agent")]
    name: String,
    /// Tmux socket path (defaults to the user's default socket)
    #[arg(long)]
    socket: Option<PathBuf>,
    /// Seconds between session reports
    #[arg(long, default_value_t = 5)]
    report_interval: u64,
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Agent-side record of one open pane stream.
struct OpenStream {
    input: mpsc::Sender<bytes::Bytes>,
    resize: mpsc::Sender<(u16, u16)>,
    cancel: CancellationToken,
}

type StreamMap = Arc<Mutex<HashMap<u16, OpenStream>>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logging();
    let args = Args::parse();

    let mut backoff = BACKOFF_INITIAL;
    loop {
        match run_connection(&args).await {
            Ok(()) => {
                info!("hub closed the connection; reconnecting");
                backoff = BACKOFF_INITIAL;
            }
            Err(e) => {
                warn!("bridge connection failed: {e:#}");
            }
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(BACKOFF_MAX);
    }
}

async fn run_connection(args: &Args) -> anyhow::Result<()> {
    let (ws, _) = tokio_tungstenite::connect_async(&args.url)
        .await
        .context("websocket connect")?;
    let (mut sink, mut incoming) = ws.split();

    let auth = AuthFrame {
        auth: args.token.clone(),
        name: args.name.clone(),
    };
    sink.send(Message::Text(serde_json::to_string(&auth)?))
        .await
        .context("send auth frame")?;
    info!("connected to hub as '{}'", args.name);

    let (out_tx, out_rx) = mpsc::channel::<Message>(OUTGOING_QUEUE);
    let writer = tokio::spawn(write_loop(sink, out_rx));

    let streams: StreamMap = Arc::new(Mutex::new(HashMap::new()));
    let socket = args.socket.clone();

    // Periodic session report; the hub treats this as the liveness signal too.
    let report_tx = out_tx.clone();
    let report_socket = socket.clone();
    let report_cancel = CancellationToken::new();
    let reporter_cancel = report_cancel.clone();
    let interval = Duration::from_secs(args.report_interval.max(1));
    let reporter = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = reporter_cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let sessions = match list_report(report_socket.as_deref()).await {
                Ok(sessions) => sessions,
                Err(e) => {
                    debug!("session report skipped: {e}");
                    Vec::new()
                }
            };
            let frame = ControlFrame::SessionReport { sessions };
            let Ok(json) = serde_json::to_string(&frame) else { continue };
            if report_tx.send(Message::Text(json)).await.is_err() {
                return;
            }
        }
    });

    while let Some(msg) = incoming.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                warn!("websocket read error: {e}");
                break;
            }
        };
        match msg {
            Message::Text(text) => {
                let Ok(frame) = serde_json::from_str::<ControlFrame>(&text) else {
                    debug!("undecodable hub frame");
                    continue;
                };
                handle_frame(frame, socket.as_deref(), &out_tx, &streams).await;
            }
            Message::Binary(data) => {
                let Some((channel_id, payload)) = decode_binary_frame(&data) else {
                    continue;
                };
                let input = {
                    let map = streams.lock().unwrap_or_else(|p| p.into_inner());
                    map.get(&channel_id).map(|s| s.input.clone())
                };
                if let Some(input) = input {
                    let _ = input.send(payload).await;
                }
            }
            Message::Close(frame) => {
                info!("hub closed connection: {frame:?}");
                break;
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }

    report_cancel.cancel();
    reporter.abort();
    writer.abort();
    let map = {
        let mut map = streams.lock().unwrap_or_else(|p| p.into_inner());
        std::mem::take(&mut *map)
    };
    for (_, stream) in map {
        stream.cancel.cancel();
    }
    Ok(())
}

async fn write_loop(mut sink: WsSink, mut out_rx: mpsc::Receiver<Message>) {
    while let Some(msg) = out_rx.recv().await {
        if sink.send(msg).await.is_err() {
            break;
        }
    }
}

async fn handle_frame(
    frame: ControlFrame,
    socket: Option<&Path>,
    out_tx: &mpsc::Sender<Message>,
    streams: &StreamMap,
) {
    match frame {
        ControlFrame::Op { request_id, op } => {
            // Ops run concurrently so a slow capture never stalls pane bytes.
            let out_tx = out_tx.clone();
            let socket = socket.map(Path::to_path_buf);
            tokio::spawn(async move {
                let result = handle_op(socket.as_deref(), op).await;
                let frame = match result {
                    Ok(value) => ControlFrame::OpResult {
                        request_id,
                        ok: true,
                        value: Some(value),
                        error: None,
                    },
                    Err(e) => ControlFrame::OpResult {
                        request_id,
                        ok: false,
                        value: None,
                        error: Some(OpError::from_tmux_error(&e)),
                    },
                };
                if let Ok(json) = serde_json::to_string(&frame) {
                    let _ = out_tx.send(Message::Text(json)).await;
                }
            });
        }
        ControlFrame::OpenStream { channel_id, target } => {
            open_stream(channel_id, target, socket, out_tx, streams).await;
        }
        ControlFrame::CloseStream { channel_id } => {
            let removed = {
                let mut map = streams.lock().unwrap_or_else(|p| p.into_inner());
                map.remove(&channel_id)
            };
            if let Some(stream) = removed {
                stream.cancel.cancel();
            }
        }
        ControlFrame::ResizeStream {
            channel_id,
            cols,
            rows,
        } => {
            let resize = {
                let map = streams.lock().unwrap_or_else(|p| p.into_inner());
                map.get(&channel_id).map(|s| s.resize.clone())
            };
            if let Some(resize) = resize {
                let _ = resize.send((cols, rows)).await;
            }
        }
        // Hub-originated frames we never expect on the agent side.
        ControlFrame::SessionReport { .. }
        | ControlFrame::OpResult { .. }
        | ControlFrame::StreamOpened { .. }
        | ControlFrame::Log { .. } => {}
    }
}

async fn open_stream(
    channel_id: u16,
    target: StreamTarget,
    socket: Option<&Path>,
    out_tx: &mpsc::Sender<Message>,
    streams: &StreamMap,
) {
    let tmux_target = format!("={}:{}", target.session, target.window);
    let select = run_tmux(socket, &[
        "select-window".to_string(),
        "-t".to_string(),
        tmux_target,
    ])
    .await;
    let stream = match select {
        Ok(_) => spawn_local_attach(socket, &target.session),
        Err(e) => Err(e),
    };
    let mut stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            warn!("open_stream {channel_id} failed: {e}");
            let frame = ControlFrame::CloseStream { channel_id };
            if let Ok(json) = serde_json::to_string(&frame) {
                let _ = out_tx.send(Message::Text(json)).await;
            }
            return;
        }
    };

    {
        let mut map = streams.lock().unwrap_or_else(|p| p.into_inner());
        map.insert(
            channel_id,
            OpenStream {
                input: stream.input.clone(),
                resize: stream.resize.clone(),
                cancel: stream.cancel.clone(),
            },
        );
    }
    let opened = ControlFrame::StreamOpened { channel_id };
    if let Ok(json) = serde_json::to_string(&opened) {
        let _ = out_tx.send(Message::Text(json)).await;
    }

    // Pump pane output to the hub until the stream or the connection ends.
    let out_tx = out_tx.clone();
    let streams = streams.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stream.cancel.cancelled() => break,
                maybe = stream.output.recv() => {
                    let Some(bytes) = maybe else { break };
                    let frame = encode_binary_frame(channel_id, &bytes);
                    if out_tx.send(Message::Binary(frame.to_vec())).await.is_err() {
                        break;
                    }
                }
            }
        }
        stream.cancel.cancel();
        let removed = {
            let mut map = streams.lock().unwrap_or_else(|p| p.into_inner());
            map.remove(&channel_id)
        };
        if removed.is_some() {
            let frame = ControlFrame::CloseStream { channel_id };
            if let Ok(json) = serde_json::to_string(&frame) {
                let _ = out_tx.send(Message::Text(json)).await;
            }
        }
    });
}

/// Execute one proxied adapter operation against local tmux.
async fn handle_op(socket: Option<&Path>, op: AdapterOp) -> Result<serde_json::Value, TmuxError> {
    let ok = serde_json::Value::Null;
    match op {
        AdapterOp::ListSessions => {
            let sessions = list_report(socket).await?;
            serde_json::to_value(sessions).map_err(|e| TmuxError::Internal(e.to_string()))
        }
        AdapterOp::CreateSession { name } => {
            command::validate_session_name(&name)?;
            if session_exists(socket, &name).await? {
                return Err(TmuxError::NameConflict(format!("duplicate session: {name}")));
            }
            run_tmux(socket, &args(&["new-session", "-d", "-s", &name])).await?;
            for (option, value) in [
                ("monitor-activity", "on"),
                ("activity-action", "none"),
                ("remain-on-exit", "off"),
            ] {
                run_tmux(
                    socket,
                    &args(&["set-option", "-t", &format!("={name}"), option, value]),
                )
                .await?;
            }
            Ok(ok)
        }
        AdapterOp::KillSession { name } => {
            run_tmux(socket, &args(&["kill-session", "-t", &format!("={name}")])).await?;
            Ok(ok)
        }
        AdapterOp::RenameSession { name, new_name } => {
            command::validate_session_name(&new_name)?;
            if session_exists(socket, &new_name).await? {
                return Err(TmuxError::NameConflict(format!(
                    "duplicate session: {new_name}"
                )));
            }
            run_tmux(
                socket,
                &args(&["rename-session", "-t", &format!("={name}"), &new_name]),
            )
            .await?;
            Ok(ok)
        }
        AdapterOp::CreateWindow { session } => {
            run_tmux(socket, &args(&["new-window", "-t", &format!("={session}:")])).await?;
            Ok(ok)
        }
        AdapterOp::SwapWindows { session, a, b } => {
            run_tmux(
                socket,
                &args(&[
                    "swap-window",
                    "-d",
                    "-s",
                    &format!("={session}:{a}"),
                    "-t",
                    &format!("={session}:{b}"),
                ]),
            )
            .await?;
            Ok(ok)
        }
        AdapterOp::MoveWindow {
            src_session,
            index,
            dst_session,
        } => {
            run_tmux(
                socket,
                &args(&[
                    "move-window",
                    "-d",
                    "-s",
                    &format!("={src_session}:{index}"),
                    "-t",
                    &format!("={dst_session}:"),
                ]),
            )
            .await?;
            Ok(ok)
        }
        AdapterOp::KillWindow { session, index } => {
            run_tmux(
                socket,
                &args(&["kill-window", "-t", &format!("={session}:{index}")]),
            )
            .await?;
            Ok(ok)
        }
        AdapterOp::SendKeys {
            session,
            window,
            data,
        } => {
            run_tmux(
                socket,
                &args(&[
                    "send-keys",
                    "-t",
                    &format!("={session}:{window}"),
                    "-l",
                    "--",
                    &data,
                ]),
            )
            .await?;
            Ok(ok)
        }
        AdapterOp::CapturePane {
            session,
            window,
            with_ansi,
        } => {
            let mut argv = args(&["capture-pane", "-p", "-J", "-t", &format!("={session}:{window}")]);
            if with_ansi {
                argv.push("-e".to_string());
            } else {
                argv.push("-S".to_string());
                argv.push("-".to_string());
            }
            let out = run_tmux(socket, &argv).await?;
            Ok(serde_json::Value::String(out))
        }
        AdapterOp::AckScroll {
            session,
            window,
            direction,
            lines,
        } => {
            let target = format!("={session}:{window}");
            if direction == ScrollDirection::Up {
                run_tmux(socket, &args(&["copy-mode", "-t", &target])).await?;
            }
            let motion = match direction {
                ScrollDirection::Up => "cursor-up",
                ScrollDirection::Down => "cursor-down",
            };
            run_tmux(
                socket,
                &args(&[
                    "send-keys",
                    "-t",
                    &target,
                    "-X",
                    "-N",
                    &lines.max(1).to_string(),
                    motion,
                ]),
            )
            .await?;
            Ok(ok)
        }
        AdapterOp::ScrollExit { session, window } => {
            run_tmux(
                socket,
                &args(&[
                    "send-keys",
                    "-t",
                    &format!("={session}:{window}"),
                    "-X",
                    "cancel",
                ]),
            )
            .await?;
            Ok(ok)
        }
        AdapterOp::MouseQuery => {
            let out = run_tmux(socket, &args(&["show-options", "-g", "-v", "mouse"])).await?;
            Ok(serde_json::Value::Bool(out.trim() == "on"))
        }
        AdapterOp::SetMouseOff => {
            run_tmux(socket, &args(&["set-option", "-g", "mouse", "off"])).await?;
            Ok(ok)
        }
        AdapterOp::ClearStatus { session, window } => {
            let target = format!("={session}:{window}");
            run_tmux(socket, &args(&["select-window", "-t", &target])).await?;
            run_tmux(
                socket,
                &args(&["set-window-option", "-t", &target, "monitor-activity", "on"]),
            )
            .await?;
            Ok(ok)
        }
    }
}

/// Full session snapshot in the wire shape.
async fn list_report(socket: Option<&Path>) -> Result<Vec<ReportedSession>, TmuxError> {
    let list = match run_tmux(
        socket,
        &args(&["list-sessions", "-F", &command::session_format()]),
    )
    .await
    {
        Ok(out) => out,
        Err(TmuxError::SourceUnavailable(msg)) if command::is_empty_server(&msg) => {
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };

    let mut sessions = Vec::new();
    for line in list.lines().filter(|l| !l.is_empty()) {
        let Some(parsed) = command::parse_session_line(line) else {
            continue;
        };
        let windows_out = run_tmux(
            socket,
            &args(&[
                "list-windows",
                "-t",
                &format!("={}", parsed.name),
                "-F",
                &command::window_format(),
            ]),
        )
        .await?;
        let mut windows: Vec<_> = windows_out
            .lines()
            .filter(|l| !l.is_empty())
            .filter_map(command::parse_window_line)
            .collect();
        windows.sort_by_key(|w| w.index);
        sessions.push(ReportedSession {
            id: Some(parsed.id),
            name: parsed.name,
            attached: parsed.attached,
            windows,
        });
    }
    Ok(sessions)
}

async fn session_exists(socket: Option<&Path>, name: &str) -> Result<bool, TmuxError> {
    match run_tmux(socket, &args(&["has-session", "-t", &format!("={name}")])).await {
        Ok(_) => Ok(true),
        Err(TmuxError::TargetMissing(_)) => Ok(false),
        Err(TmuxError::SourceUnavailable(msg)) if command::is_empty_server(&msg) => Ok(false),
        Err(e) => Err(e),
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

fn setup_logging() {
    use tracing_subscriber::prelude::*;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tmuxdeck=info,tmuxdeck_agent=info".into()),
        )
        .init();
}
