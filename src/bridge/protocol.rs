// ABOUTME: Bridge wire protocol: JSON control frames and channel-id-prefixed binary frames

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::debug_ring::DebugLevel;
use crate::models::{TmuxSession, Window};
use crate::tmux::{ScrollDirection, TmuxError};

/// Channel id 0 is reserved and never assigned to a stream.
pub const RESERVED_CHANNEL: u16 = 0;

/// First frame an agent sends after the upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthFrame {
    pub auth: String,
    pub name: String,
}

/// Adapter operation forwarded to the agent as an RPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AdapterOp {
    ListSessions,
    CreateSession { name: String },
    KillSession { name: String },
    RenameSession { name: String, new_name: String },
    CreateWindow { session: String },
    SwapWindows { session: String, a: u32, b: u32 },
    MoveWindow { src_session: String, index: u32, dst_session: String },
    KillWindow { session: String, index: u32 },
    SendKeys { session: String, window: u32, data: String },
    CapturePane { session: String, window: u32, with_ansi: bool },
    AckScroll { session: String, window: u32, direction: ScrollDirection, lines: u32 },
    ScrollExit { session: String, window: u32 },
    MouseQuery,
    SetMouseOff,
    ClearStatus { session: String, window: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpError {
    pub kind: String,
    pub message: String,
}

impl OpError {
    pub fn into_tmux_error(self) -> TmuxError {
        match self.kind.as_str() {
            "source_unavailable" => TmuxError::SourceUnavailable(self.message),
            "target_missing" => TmuxError::TargetMissing(self.message),
            "name_conflict" => TmuxError::NameConflict(self.message),
            "invalid_argument" => TmuxError::InvalidArgument(self.message),
            _ => TmuxError::Internal(self.message),
        }
    }

    /// Agent-side encoding of an operation failure.
    pub fn from_tmux_error(err: &TmuxError) -> Self {
        let kind = match err {
            TmuxError::SourceUnavailable(_) => "source_unavailable",
            TmuxError::TargetMissing(_) => "target_missing",
            TmuxError::NameConflict(_) => "name_conflict",
            TmuxError::InvalidArgument(_) => "invalid_argument",
            TmuxError::Internal(_) => "internal",
        };
        Self {
            kind: kind.to_string(),
            message: err.to_string(),
        }
    }
}

/// A session as reported by an agent; the hub stamps the container id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedSession {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub attached: bool,
    #[serde(default)]
    pub windows: Vec<Window>,
}

impl ReportedSession {
    pub fn into_session(self, container_id: &str) -> TmuxSession {
        let mut windows = self.windows;
        windows.sort_by_key(|w| w.index);
        TmuxSession {
            // Agents without real tmux ids get a synthesized stable one.
            id: self.id.unwrap_or_else(|| format!("@{}", self.name)),
            name: self.name,
            attached: self.attached,
            windows,
            container_id: container_id.to_string(),
        }
    }
}

/// Pane target inside an `open_stream` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamTarget {
    pub session: String,
    pub window: u32,
}

/// Control frames after authentication, either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    /// Agent → hub: full session snapshot, on change and at least every report interval.
    SessionReport { sessions: Vec<ReportedSession> },
    /// Hub → agent: adapter operation RPC.
    Op {
        request_id: u64,
        #[serde(flatten)]
        op: AdapterOp,
    },
    /// Agent → hub: RPC reply.
    OpResult {
        request_id: u64,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<OpError>,
    },
    /// Hub → agent: open a pane stream on the given channel id.
    OpenStream { channel_id: u16, target: StreamTarget },
    /// Agent → hub: the stream is live; binary frames may now flow.
    StreamOpened { channel_id: u16 },
    /// Either direction: tear down a stream.
    CloseStream { channel_id: u16 },
    /// Hub → agent: client viewport changed.
    ResizeStream { channel_id: u16, cols: u16, rows: u16 },
    /// Either direction: entry for the debug ring.
    Log { level: DebugLevel, message: String },
}

/// Prefix pane bytes with the 2-byte big-endian channel id.
pub fn encode_binary_frame(channel_id: u16, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 + payload.len());
    buf.put_u16(channel_id);
    buf.put_slice(payload);
    buf.freeze()
}

/// Split an incoming binary frame into channel id and payload.
/// Frames shorter than the prefix or on the reserved channel are rejected.
pub fn decode_binary_frame(frame: &[u8]) -> Option<(u16, Bytes)> {
    if frame.len() < 2 {
        return None;
    }
    let channel_id = u16::from_be_bytes([frame[0], frame[1]]);
    if channel_id == RESERVED_CHANNEL {
        return None;
    }
    Some((channel_id, Bytes::copy_from_slice(&frame[2..])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn binary_frame_roundtrip() {
        let frame = encode_binary_frame(0x0102, b"hello");
        assert_eq!(&frame[..], &[0x01, 0x02, b'h', b'e', b'l', b'l', b'o']);
        let (id, payload) = decode_binary_frame(&frame).unwrap();
        assert_eq!(id, 0x0102);
        assert_eq!(&payload[..], b"hello");
    }

    #[test]
    fn empty_payload_is_valid() {
        let frame = encode_binary_frame(7, b"");
        let (id, payload) = decode_binary_frame(&frame).unwrap();
        assert_eq!(id, 7);
        assert!(payload.is_empty());
    }

    #[test]
    fn reserved_and_short_frames_rejected() {
        assert!(decode_binary_frame(&[0x00, 0x00, 1, 2]).is_none());
        assert!(decode_binary_frame(&[0x01]).is_none());
        assert!(decode_binary_frame(&[]).is_none());
    }

    #[test]
    fn op_frame_json_shape() {
        let frame = ControlFrame::Op {
            request_id: 9,
            op: AdapterOp::CreateSession { name: "main".into() },
        };
        let v = serde_json::to_value(&frame).unwrap();
        assert_eq!(v["type"], "op");
        assert_eq!(v["request_id"], 9);
        assert_eq!(v["op"], "create_session");
        assert_eq!(v["name"], "main");
    }

    #[test]
    fn op_result_roundtrip() {
        let raw = r#"{"type":"op_result","request_id":9,"ok":false,"error":{"kind":"target_missing","message":"gone"}}"#;
        let frame: ControlFrame = serde_json::from_str(raw).unwrap();
        let ControlFrame::OpResult { request_id, ok, error, .. } = frame else {
            panic!("wrong variant");
        };
        assert_eq!(request_id, 9);
        assert!(!ok);
        let err = error.unwrap().into_tmux_error();
        assert!(matches!(err, TmuxError::TargetMissing(_)));
    }

    #[test]
    fn session_report_parses_with_defaults() {
        let raw = r#"{"type":"session_report","sessions":[{"name":"work"}]}"#;
        let frame: ControlFrame = serde_json::from_str(raw).unwrap();
        let ControlFrame::SessionReport { sessions } = frame else {
            panic!("wrong variant");
        };
        let session = sessions[0].clone().into_session("bridge:b1");
        assert_eq!(session.id, "@work");
        assert_eq!(session.container_id, "bridge:b1");
        assert!(!session.attached);
        assert!(session.windows.is_empty());
    }

    #[test]
    fn auth_frame_shape() {
        let frame: AuthFrame = serde_json::from_str(r#"{"auth":"tok","name":"pi"}"#).unwrap();
        assert_eq!(frame.auth, "tok");
        assert_eq!(frame.name, "pi");
    }
}
