// ABOUTME: Bridge hub: records, reverse-connection registry, op RPC and stream multiplexing

mod connection;
pub mod protocol;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::auth::{generate_token, hash_secret};
use crate::config::BRIDGE_RPC_TIMEOUT;
use crate::debug_ring::DebugRing;
use crate::models::{BridgeRecord, PaneTarget, TmuxSession};
use crate::store::{StateStore, StoreError};
use crate::tmux::{PaneStream, TmuxError, STREAM_CHANNEL_CAP};

use protocol::{encode_binary_frame, AdapterOp, ControlFrame, ReportedSession, StreamTarget};

pub use connection::handle_bridge_socket;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("bridge failure: {0}")]
    Internal(String),
}

/// Frames queued toward one agent. A single writer task per connection drains
/// these, so control frames are never interleaved mid-JSON.
pub(crate) enum Outgoing {
    Frame(ControlFrame),
    Binary(Bytes),
    Close(u16),
}

pub(crate) enum StreamSlot {
    /// `open_stream` sent, `stream_opened` not yet received.
    Opening {
        opened: oneshot::Sender<()>,
        out_tx: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    },
    /// Acknowledged; binary frames flow.
    Open {
        out_tx: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    },
}

impl StreamSlot {
    fn cancel_token(&self) -> &CancellationToken {
        match self {
            StreamSlot::Opening { cancel, .. } | StreamSlot::Open { cancel, .. } => cancel,
        }
    }
}

/// One live agent connection. Dropped (and cancelled) when the socket closes
/// or a newer connection supersedes it.
pub(crate) struct Connection {
    pub(crate) bridge_id: String,
    pub(crate) agent_name: String,
    /// Distinguishes this connection from a successor for cleanup.
    pub(crate) epoch: u64,
    pub(crate) outgoing: mpsc::Sender<Outgoing>,
    pub(crate) cancel: CancellationToken,
    pub(crate) report_interval: Duration,
    pub(crate) last_seen: Mutex<Instant>,
    pub(crate) sessions: Mutex<Vec<ReportedSession>>,
    pub(crate) pending_ops: Mutex<HashMap<u64, oneshot::Sender<Result<serde_json::Value, TmuxError>>>>,
    next_request: AtomicU64,
    pub(crate) streams: Mutex<HashMap<u16, StreamSlot>>,
    next_channel_hint: Mutex<u16>,
}

impl Connection {
    pub(crate) fn new(
        bridge_id: String,
        agent_name: String,
        epoch: u64,
        outgoing: mpsc::Sender<Outgoing>,
        report_interval: Duration,
    ) -> Self {
        Self {
            bridge_id,
            agent_name,
            epoch,
            outgoing,
            cancel: CancellationToken::new(),
            report_interval,
            last_seen: Mutex::new(Instant::now()),
            sessions: Mutex::new(Vec::new()),
            pending_ops: Mutex::new(HashMap::new()),
            next_request: AtomicU64::new(1),
            streams: Mutex::new(HashMap::new()),
            next_channel_hint: Mutex::new(1),
        }
    }

    pub(crate) fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
    }

    /// Fresh means a frame arrived within twice the report interval.
    pub(crate) fn is_fresh(&self) -> bool {
        let last = *self.last_seen.lock().unwrap_or_else(|p| p.into_inner());
        last.elapsed() <= self.report_interval * 2
    }

    fn next_request_id(&self) -> u64 {
        self.next_request.fetch_add(1, Ordering::Relaxed)
    }

    /// Allocate a free channel id in 1..=65535, starting after the last one.
    fn allocate_channel(
        &self,
        streams: &mut HashMap<u16, StreamSlot>,
    ) -> Result<u16, TmuxError> {
        let mut hint = self
            .next_channel_hint
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        for _ in 0..u16::MAX {
            let candidate = if *hint == 0 { 1 } else { *hint };
            *hint = candidate.wrapping_add(1);
            if !streams.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        Err(TmuxError::Internal("no free bridge channels".to_string()))
    }

    /// Tear down every stream and fail every in-flight op.
    pub(crate) fn shutdown(&self, reason: &str) {
        self.cancel.cancel();
        let streams: Vec<_> = {
            let mut guard = self.streams.lock().unwrap_or_else(|p| p.into_inner());
            guard.drain().collect()
        };
        for (_, slot) in streams {
            slot.cancel_token().cancel();
        }
        let pending: Vec<_> = {
            let mut guard = self.pending_ops.lock().unwrap_or_else(|p| p.into_inner());
            guard.drain().collect()
        };
        for (_, tx) in pending {
            let _ = tx.send(Err(TmuxError::SourceUnavailable(reason.to_string())));
        }
    }
}

pub struct BridgeHub {
    store: Arc<StateStore>,
    pub(crate) ring: Arc<DebugRing>,
    records: RwLock<Vec<BridgeRecord>>,
    pub(crate) connections: DashMap<String, Arc<Connection>>,
    pub(crate) epoch_counter: AtomicU64,
}

impl BridgeHub {
    pub fn new(store: Arc<StateStore>, ring: Arc<DebugRing>) -> Self {
        let records = store.load_bridges();
        Self {
            store,
            ring,
            records: RwLock::new(records),
            connections: DashMap::new(),
            epoch_counter: AtomicU64::new(1),
        }
    }

    /// Create a record and return it with the cleartext token. The token is
    /// not recoverable afterwards; only its hash is stored.
    pub fn create(&self, name: &str) -> Result<(BridgeRecord, String), BridgeError> {
        let token = generate_token();
        let hash = hash_secret(&token).map_err(|e| BridgeError::Internal(e.to_string()))?;
        let record = BridgeRecord::new(name, hash);
        let mut records = self.records_mut();
        records.push(record.clone());
        self.store.save_bridges(&records)?;
        info!("created bridge record {} ({name})", record.id);
        Ok((record, token))
    }

    /// Delete cascades: the live connection (if any) is closed and its
    /// synthesized container disappears from the registry on the next merge.
    pub fn delete(&self, bridge_id: &str) -> Result<(), BridgeError> {
        {
            let mut records = self.records_mut();
            let before = records.len();
            records.retain(|r| r.id != bridge_id);
            if records.len() == before {
                return Err(BridgeError::NotFound(bridge_id.to_string()));
            }
            self.store.save_bridges(&records)?;
        }
        if let Some((_, conn)) = self.connections.remove(bridge_id) {
            let _ = conn.outgoing.try_send(Outgoing::Close(crate::error::WS_CLOSE_POLICY));
            conn.shutdown("bridge deleted");
        }
        Ok(())
    }

    pub fn set_enabled(&self, bridge_id: &str, enabled: bool) -> Result<(), BridgeError> {
        {
            let mut records = self.records_mut();
            let record = records
                .iter_mut()
                .find(|r| r.id == bridge_id)
                .ok_or_else(|| BridgeError::NotFound(bridge_id.to_string()))?;
            record.enabled = enabled;
            self.store.save_bridges(&records)?;
        }
        if !enabled {
            if let Some((_, conn)) = self.connections.remove(bridge_id) {
                let _ = conn.outgoing.try_send(Outgoing::Close(crate::error::WS_CLOSE_POLICY));
                conn.shutdown("bridge disabled");
            }
        }
        Ok(())
    }

    /// Records with derived `connected` state.
    pub fn list(&self) -> Vec<(BridgeRecord, bool)> {
        let records = self.records();
        records
            .iter()
            .map(|r| (r.clone(), self.connected(&r.id)))
            .collect()
    }

    pub fn get_record(&self, bridge_id: &str) -> Option<BridgeRecord> {
        self.records().iter().find(|r| r.id == bridge_id).cloned()
    }

    pub fn connected(&self, bridge_id: &str) -> bool {
        self.connections
            .get(bridge_id)
            .is_some_and(|conn| conn.is_fresh())
    }

    /// Latest reported sessions for a bridge, stamped with its container id.
    pub fn session_snapshot(&self, bridge_id: &str) -> Option<Vec<TmuxSession>> {
        let conn = self.connections.get(bridge_id)?;
        let container_id = format!("bridge:{bridge_id}");
        let sessions = conn
            .sessions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        Some(
            sessions
                .into_iter()
                .map(|r| r.into_session(&container_id))
                .collect(),
        )
    }

    pub(crate) fn update_last_seen(&self, bridge_id: &str) {
        let mut records = self.records_mut();
        if let Some(record) = records.iter_mut().find(|r| r.id == bridge_id) {
            record.last_seen = Some(chrono::Utc::now());
            if let Err(e) = self.store.save_bridges(&records) {
                warn!("failed to persist bridge last_seen: {e}");
            }
        }
    }

    /// Find the enabled record whose token hash matches the presented token.
    pub(crate) fn authenticate_token(&self, token: &str) -> Option<BridgeRecord> {
        self.records()
            .iter()
            .find(|r| r.enabled && crate::auth::verify_secret(token, &r.token_hash))
            .cloned()
    }

    /// Session-cookie fallback: the agent names which record it speaks for.
    pub(crate) fn record_by_name(&self, name: &str) -> Option<BridgeRecord> {
        self.records()
            .iter()
            .find(|r| r.enabled && r.name == name)
            .cloned()
    }

    /// Forward an adapter operation to the agent and await its reply.
    pub async fn call_op(
        &self,
        bridge_id: &str,
        op: AdapterOp,
    ) -> Result<serde_json::Value, TmuxError> {
        let conn = self.fresh_connection(bridge_id)?;
        let request_id = conn.next_request_id();
        let (tx, rx) = oneshot::channel();
        conn.pending_ops
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(request_id, tx);

        let sent = conn
            .outgoing
            .send(Outgoing::Frame(ControlFrame::Op { request_id, op }))
            .await;
        if sent.is_err() {
            conn.pending_ops
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .remove(&request_id);
            return Err(TmuxError::SourceUnavailable("bridge disconnected".to_string()));
        }

        match timeout(BRIDGE_RPC_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TmuxError::SourceUnavailable("bridge disconnected".to_string())),
            Err(_) => {
                conn.pending_ops
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .remove(&request_id);
                Err(TmuxError::Internal("bridge op timed out".to_string()))
            }
        }
    }

    /// Open a proxied pane stream. Binary frames for the channel flow only
    /// after the agent acknowledges with `stream_opened`.
    pub async fn open_stream(
        &self,
        bridge_id: &str,
        target: &PaneTarget,
    ) -> Result<PaneStream, TmuxError> {
        let conn = self.fresh_connection(bridge_id)?;

        let (out_tx, out_rx) = mpsc::channel::<Bytes>(STREAM_CHANNEL_CAP);
        let (in_tx, mut in_rx) = mpsc::channel::<Bytes>(STREAM_CHANNEL_CAP);
        let (resize_tx, mut resize_rx) = mpsc::channel::<(u16, u16)>(16);
        let cancel = CancellationToken::new();
        let (opened_tx, opened_rx) = oneshot::channel();

        let channel_id = {
            let mut streams = conn.streams.lock().unwrap_or_else(|p| p.into_inner());
            let id = conn.allocate_channel(&mut streams)?;
            streams.insert(
                id,
                StreamSlot::Opening {
                    opened: opened_tx,
                    out_tx,
                    cancel: cancel.clone(),
                },
            );
            id
        };

        let open_frame = ControlFrame::OpenStream {
            channel_id,
            target: StreamTarget {
                session: target.session_name.clone(),
                window: target.window_index,
            },
        };
        if conn.outgoing.send(Outgoing::Frame(open_frame)).await.is_err() {
            self.drop_stream(&conn, channel_id).await;
            return Err(TmuxError::SourceUnavailable("bridge disconnected".to_string()));
        }

        let ack = tokio::select! {
            res = timeout(BRIDGE_RPC_TIMEOUT, opened_rx) => res,
            _ = cancel.cancelled() => {
                self.drop_stream(&conn, channel_id).await;
                return Err(TmuxError::Internal("stream cancelled before open".to_string()));
            }
        };
        match ack {
            Ok(Ok(())) => {}
            Ok(Err(_)) | Err(_) => {
                self.drop_stream(&conn, channel_id).await;
                return Err(TmuxError::SourceUnavailable(
                    "bridge did not acknowledge stream".to_string(),
                ));
            }
        }

        // Pump client input and resizes toward the agent until either side cancels.
        let pump_conn = conn.clone();
        let pump_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = pump_cancel.cancelled() => break,
                    _ = pump_conn.cancel.cancelled() => break,
                    maybe = in_rx.recv() => {
                        let Some(bytes) = maybe else { break };
                        let frame = encode_binary_frame(channel_id, &bytes);
                        if pump_conn.outgoing.send(Outgoing::Binary(frame)).await.is_err() {
                            break;
                        }
                    }
                    maybe = resize_rx.recv() => {
                        let Some((cols, rows)) = maybe else { break };
                        let frame = ControlFrame::ResizeStream { channel_id, cols, rows };
                        if pump_conn.outgoing.send(Outgoing::Frame(frame)).await.is_err() {
                            break;
                        }
                    }
                }
            }
            pump_cancel.cancel();
            let removed = {
                let mut streams = pump_conn
                    .streams
                    .lock()
                    .unwrap_or_else(|p| p.into_inner());
                streams.remove(&channel_id)
            };
            if removed.is_some() {
                let _ = pump_conn
                    .outgoing
                    .send(Outgoing::Frame(ControlFrame::CloseStream { channel_id }))
                    .await;
            }
        });

        Ok(PaneStream::from_channels(out_rx, in_tx, resize_tx, cancel))
    }

    async fn drop_stream(&self, conn: &Arc<Connection>, channel_id: u16) {
        let removed = {
            let mut streams = conn.streams.lock().unwrap_or_else(|p| p.into_inner());
            streams.remove(&channel_id)
        };
        if let Some(slot) = removed {
            slot.cancel_token().cancel();
            let _ = conn
                .outgoing
                .send(Outgoing::Frame(ControlFrame::CloseStream { channel_id }))
                .await;
        }
    }

    fn fresh_connection(&self, bridge_id: &str) -> Result<Arc<Connection>, TmuxError> {
        let conn = self
            .connections
            .get(bridge_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TmuxError::SourceUnavailable("bridge offline".to_string()))?;
        if !conn.is_fresh() {
            return Err(TmuxError::SourceUnavailable("bridge stale".to_string()));
        }
        Ok(conn)
    }

    fn records(&self) -> std::sync::RwLockReadGuard<'_, Vec<BridgeRecord>> {
        self.records.read().unwrap_or_else(|p| p.into_inner())
    }

    fn records_mut(&self) -> std::sync::RwLockWriteGuard<'_, Vec<BridgeRecord>> {
        self.records.write().unwrap_or_else(|p| p.into_inner())
    }
}
