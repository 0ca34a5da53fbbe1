// ABOUTME: Tests for the terminal control-message codec and the bridge wire framing

use tmuxdeck::bridge::protocol::{
    decode_binary_frame, encode_binary_frame, AdapterOp, ControlFrame,
};
use tmuxdeck::broker::control::{parse_frame, ControlMsg, ParsedFrame};
use tmuxdeck::error::ApiError;

#[test]
fn control_verbs_roundtrip_through_parser() {
    let cases = [
        ("RESIZE:80:24", ControlMsg::Resize { cols: 80, rows: 24 }),
        ("SCROLL:up:10", ControlMsg::ScrollUp { lines: 10 }),
        ("SCROLL:down:2", ControlMsg::ScrollDown { lines: 2 }),
        ("SCROLL:exit", ControlMsg::ScrollExit),
        ("SELECT_WINDOW:7", ControlMsg::SelectWindow { index: 7 }),
        ("DISABLE_MOUSE:", ControlMsg::DisableMouse),
    ];
    for (raw, expected) in cases {
        assert_eq!(parse_frame(raw), ParsedFrame::Control(expected), "{raw}");
    }
}

#[test]
fn shell_input_never_parses_as_control() {
    for raw in ["ls -la", "git status:porcelain is not a verb?", "", "π:value", "1:2"] {
        assert!(
            matches!(parse_frame(raw), ParsedFrame::Input),
            "{raw:?} should be input"
        );
    }
}

#[test]
fn select_window_index_zero_is_valid() {
    assert_eq!(
        parse_frame("SELECT_WINDOW:0"),
        ParsedFrame::Control(ControlMsg::SelectWindow { index: 0 })
    );
}

#[test]
fn binary_frames_carry_big_endian_channel_ids() {
    let payload: Vec<u8> = (0..255).collect();
    let frame = encode_binary_frame(513, &payload);
    assert_eq!(frame[0], 2);
    assert_eq!(frame[1], 1);
    let (id, body) = decode_binary_frame(&frame).unwrap();
    assert_eq!(id, 513);
    assert_eq!(&body[..], &payload[..]);
}

#[test]
fn channel_zero_is_reserved() {
    let frame = encode_binary_frame(0, b"data");
    assert!(decode_binary_frame(&frame).is_none());
}

#[test]
fn max_channel_id_roundtrips() {
    let frame = encode_binary_frame(u16::MAX, b"x");
    let (id, _) = decode_binary_frame(&frame).unwrap();
    assert_eq!(id, u16::MAX);
}

#[test]
fn op_frames_flatten_operation_fields() {
    let frame = ControlFrame::Op {
        request_id: 42,
        op: AdapterOp::SwapWindows {
            session: "main".into(),
            a: 0,
            b: 1,
        },
    };
    let v = serde_json::to_value(&frame).unwrap();
    assert_eq!(v["type"], "op");
    assert_eq!(v["op"], "swap_windows");
    assert_eq!(v["session"], "main");
    assert_eq!(v["a"], 0);
    assert_eq!(v["b"], 1);

    let back: ControlFrame = serde_json::from_value(v).unwrap();
    let ControlFrame::Op { request_id, op } = back else {
        panic!("wrong variant");
    };
    assert_eq!(request_id, 42);
    assert_eq!(
        op,
        AdapterOp::SwapWindows {
            session: "main".into(),
            a: 0,
            b: 1
        }
    );
}

#[test]
fn repeated_identical_resize_reaches_tmux_once() {
    use tmuxdeck::broker::control::coalesce_resize;
    let mut last = None;
    let applied = (0..5)
        .filter(|_| coalesce_resize(&mut last, (100, 30)))
        .count();
    assert_eq!(applied, 1);
}

#[test]
fn websocket_close_codes_match_error_kinds() {
    assert_eq!(ApiError::Unauthorized.ws_close_code(), 4401);
    assert_eq!(ApiError::TargetMissing("s".into()).ws_close_code(), 4404);
    assert_eq!(ApiError::TargetGone("s".into()).ws_close_code(), 4410);
    assert_eq!(ApiError::SourceUnavailable("s".into()).ws_close_code(), 4410);
    assert_eq!(ApiError::Internal("s".into()).ws_close_code(), 1011);
}
