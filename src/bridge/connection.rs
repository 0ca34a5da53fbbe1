// ABOUTME: Per-agent reverse WebSocket loop: auth handshake, liveness, frame dispatch

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{WS_CLOSE_POLICY, WS_CLOSE_SUPERSEDED};

use super::protocol::{decode_binary_frame, AuthFrame, ControlFrame};
use super::{BridgeHub, Connection, Outgoing, StreamSlot};

const AUTH_TIMEOUT: Duration = Duration::from_secs(10);
const OUTGOING_QUEUE: usize = 256;

/// Drive one agent connection to completion. `cookie_authed` is true when the
/// upgrade carried a valid session cookie; the auth frame may then name its
/// record instead of presenting a bridge token.
pub async fn handle_bridge_socket(hub: Arc<BridgeHub>, socket: WebSocket, cookie_authed: bool) {
    let (mut sink, mut stream) = socket.split();

    let auth = match read_auth_frame(&mut stream).await {
        Some(frame) => frame,
        None => {
            close(&mut sink, WS_CLOSE_POLICY, "authentication required").await;
            return;
        }
    };

    let record = hub
        .authenticate_token(&auth.auth)
        .or_else(|| {
            if cookie_authed {
                hub.record_by_name(&auth.name)
            } else {
                None
            }
        });
    let Some(record) = record else {
        hub.ring
            .warn("bridge", format!("rejected bridge auth for '{}'", auth.name));
        close(&mut sink, WS_CLOSE_POLICY, "invalid bridge credentials").await;
        return;
    };

    // Last writer wins: an existing authenticated connection is superseded.
    if let Some((_, prior)) = hub.connections.remove(&record.id) {
        info!("bridge '{}' reconnected, superseding prior connection", record.name);
        let _ = prior.outgoing.try_send(Outgoing::Close(WS_CLOSE_SUPERSEDED));
        prior.shutdown("superseded by newer connection");
    }

    let report_interval =
        Duration::from_secs(hub.store.load_settings().report_interval_secs.max(1));
    let epoch = hub.epoch_counter.fetch_add(1, Ordering::Relaxed);
    let (out_tx, out_rx) = mpsc::channel::<Outgoing>(OUTGOING_QUEUE);
    let conn = Arc::new(Connection::new(
        record.id.clone(),
        auth.name.clone(),
        epoch,
        out_tx,
        report_interval,
    ));
    hub.connections.insert(record.id.clone(), conn.clone());
    hub.ring
        .info("bridge", format!("bridge '{}' connected", auth.name));

    let writer = tokio::spawn(write_loop(sink, out_rx));

    read_loop(&hub, &conn, &mut stream).await;

    conn.shutdown("bridge disconnected");
    hub.connections
        .remove_if(&conn.bridge_id, |_, current| current.epoch == conn.epoch);
    hub.update_last_seen(&conn.bridge_id);
    hub.ring
        .info("bridge", format!("bridge '{}' disconnected", conn.agent_name));
    writer.abort();
}

async fn close(sink: &mut SplitSink<WebSocket, Message>, code: u16, reason: &str) {
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await;
}

async fn read_auth_frame(stream: &mut SplitStream<WebSocket>) -> Option<AuthFrame> {
    let msg = timeout(AUTH_TIMEOUT, stream.next()).await.ok()??.ok()?;
    let Message::Text(text) = msg else {
        return None;
    };
    serde_json::from_str(text.as_str()).ok()
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<Outgoing>,
) {
    while let Some(item) = out_rx.recv().await {
        let result = match item {
            Outgoing::Frame(frame) => match serde_json::to_string(&frame) {
                Ok(json) => sink.send(Message::Text(json.into())).await,
                Err(e) => {
                    warn!("unencodable bridge frame: {e}");
                    continue;
                }
            },
            Outgoing::Binary(bytes) => sink.send(Message::Binary(bytes)).await,
            Outgoing::Close(code) => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: "".into(),
                    })))
                    .await;
                break;
            }
        };
        if result.is_err() {
            break;
        }
    }
}

async fn read_loop(hub: &Arc<BridgeHub>, conn: &Arc<Connection>, stream: &mut SplitStream<WebSocket>) {
    // Any frame within 2x the report interval keeps the agent alive.
    let liveness = conn.report_interval * 2;
    loop {
        let next = tokio::select! {
            _ = conn.cancel.cancelled() => return,
            res = timeout(liveness, stream.next()) => res,
        };
        match next {
            Err(_) => {
                hub.ring.warn(
                    "bridge",
                    format!("bridge '{}' missed its report window", conn.agent_name),
                );
                return;
            }
            Ok(None) | Ok(Some(Err(_))) => return,
            Ok(Some(Ok(msg))) => {
                conn.touch();
                dispatch(hub, conn, msg).await;
            }
        }
    }
}

async fn dispatch(hub: &Arc<BridgeHub>, conn: &Arc<Connection>, msg: Message) {
    match msg {
        Message::Text(text) => {
            let frame: ControlFrame = match serde_json::from_str(text.as_str()) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!("undecodable bridge control frame: {e}");
                    return;
                }
            };
            handle_control(hub, conn, frame).await;
        }
        Message::Binary(data) => {
            let Some((channel_id, payload)) = decode_binary_frame(&data) else {
                debug!("malformed bridge binary frame ({} bytes)", data.len());
                return;
            };
            deliver_binary(conn, channel_id, payload).await;
        }
        Message::Ping(_) | Message::Pong(_) => {}
        Message::Close(_) => conn.cancel.cancel(),
    }
}

async fn handle_control(hub: &Arc<BridgeHub>, conn: &Arc<Connection>, frame: ControlFrame) {
    match frame {
        ControlFrame::SessionReport { sessions } => {
            *conn.sessions.lock().unwrap_or_else(|p| p.into_inner()) = sessions;
        }
        ControlFrame::OpResult {
            request_id,
            ok,
            value,
            error,
        } => {
            let slot = conn
                .pending_ops
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .remove(&request_id);
            let Some(reply) = slot else {
                debug!("op_result for unknown request {request_id}");
                return;
            };
            let result = if ok {
                Ok(value.unwrap_or(serde_json::Value::Null))
            } else {
                Err(error
                    .map(|e| e.into_tmux_error())
                    .unwrap_or_else(|| crate::tmux::TmuxError::Internal("bridge op failed".into())))
            };
            let _ = reply.send(result);
        }
        ControlFrame::StreamOpened { channel_id } => {
            let acked = {
                let mut streams = conn.streams.lock().unwrap_or_else(|p| p.into_inner());
                match streams.remove(&channel_id) {
                    Some(StreamSlot::Opening {
                        opened,
                        out_tx,
                        cancel,
                    }) if !cancel.is_cancelled() => {
                        streams.insert(channel_id, StreamSlot::Open { out_tx, cancel });
                        Some(opened)
                    }
                    Some(other) => {
                        // Already cancelled (or duplicate ack): drop the slot.
                        other.cancel_token().cancel();
                        None
                    }
                    None => None,
                }
            };
            match acked {
                Some(opened) => {
                    let _ = opened.send(());
                }
                None => {
                    // Ack for a channel we no longer want: answer with an immediate close.
                    let _ = conn
                        .outgoing
                        .send(Outgoing::Frame(ControlFrame::CloseStream { channel_id }))
                        .await;
                }
            }
        }
        ControlFrame::CloseStream { channel_id } => {
            let slot = {
                let mut streams = conn.streams.lock().unwrap_or_else(|p| p.into_inner());
                streams.remove(&channel_id)
            };
            if let Some(slot) = slot {
                slot.cancel_token().cancel();
            }
        }
        ControlFrame::Log { level, message } => {
            hub.ring
                .push(level, format!("bridge:{}", conn.agent_name), message, None);
        }
        ControlFrame::Op { .. }
        | ControlFrame::OpenStream { .. }
        | ControlFrame::ResizeStream { .. } => {
            debug!("agent sent a hub-only frame; ignoring");
        }
    }
}

async fn deliver_binary(conn: &Arc<Connection>, channel_id: u16, payload: bytes::Bytes) {
    // Binary frames are only delivered on channels the agent has acknowledged.
    let out_tx = {
        let streams = conn.streams.lock().unwrap_or_else(|p| p.into_inner());
        match streams.get(&channel_id) {
            Some(StreamSlot::Open { out_tx, .. }) => Some(out_tx.clone()),
            _ => None,
        }
    };
    match out_tx {
        Some(tx) => {
            // Awaiting applies the bounded-buffer back-pressure to the agent.
            let _ = tx.send(payload).await;
        }
        None => debug!("binary frame for unacknowledged channel {channel_id}"),
    }
}
