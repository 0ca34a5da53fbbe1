// ABOUTME: Terminal channel control-message codec shared by broker and clients

/// Client → broker control messages interleaved with pane input on the text
/// channel. A text frame is a control message when it starts with ASCII
/// letters followed by `:`; anything else is pane input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMsg {
    Resize { cols: u16, rows: u16 },
    ScrollUp { lines: u32 },
    ScrollDown { lines: u32 },
    ScrollExit,
    SelectWindow { index: u32 },
    DisableMouse,
}

/// Classification of one incoming text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedFrame {
    Control(ControlMsg),
    /// Letter-colon prefixed but not a verb we know; dropped.
    UnknownControl,
    /// Plain pane input.
    Input,
}

pub fn parse_frame(text: &str) -> ParsedFrame {
    let Some(colon) = text.find(':') else {
        return ParsedFrame::Input;
    };
    let verb = &text[..colon];
    if !verb.bytes().next().is_some_and(|b| b.is_ascii_alphabetic())
        || !verb.bytes().all(|b| b.is_ascii_alphabetic() || b == b'_')
    {
        return ParsedFrame::Input;
    }
    let rest = &text[colon + 1..];
    match verb {
        "RESIZE" => {
            let mut parts = rest.split(':');
            let cols = parts.next().and_then(|p| p.parse().ok());
            let rows = parts.next().and_then(|p| p.parse().ok());
            match (cols, rows) {
                (Some(cols), Some(rows)) => ParsedFrame::Control(ControlMsg::Resize { cols, rows }),
                _ => ParsedFrame::UnknownControl,
            }
        }
        "SCROLL" => {
            let mut parts = rest.split(':');
            match parts.next() {
                Some("exit") => ParsedFrame::Control(ControlMsg::ScrollExit),
                Some(direction @ ("up" | "down")) => {
                    let lines = parts.next().and_then(|p| p.parse().ok()).unwrap_or(1);
                    if direction == "up" {
                        ParsedFrame::Control(ControlMsg::ScrollUp { lines })
                    } else {
                        ParsedFrame::Control(ControlMsg::ScrollDown { lines })
                    }
                }
                _ => ParsedFrame::UnknownControl,
            }
        }
        "SELECT_WINDOW" => match rest.parse() {
            Ok(index) => ParsedFrame::Control(ControlMsg::SelectWindow { index }),
            Err(_) => ParsedFrame::UnknownControl,
        },
        "DISABLE_MOUSE" => ParsedFrame::Control(ControlMsg::DisableMouse),
        _ => ParsedFrame::UnknownControl,
    }
}

/// Resize coalescing: returns true when `next` differs from the last applied
/// value and must reach tmux; identical consecutive values are dropped.
pub fn coalesce_resize(last: &mut Option<(u16, u16)>, next: (u16, u16)) -> bool {
    if *last == Some(next) {
        return false;
    }
    *last = Some(next);
    true
}

/// Broker → client notice that tmux mouse mode changed.
pub fn mouse_warning(enabled: bool) -> String {
    if enabled {
        "MOUSE_WARNING:on".to_string()
    } else {
        "MOUSE_WARNING:off".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn resize_parses() {
        assert_eq!(
            parse_frame("RESIZE:120:40"),
            ParsedFrame::Control(ControlMsg::Resize { cols: 120, rows: 40 })
        );
        assert_eq!(parse_frame("RESIZE:abc:40"), ParsedFrame::UnknownControl);
        assert_eq!(parse_frame("RESIZE:120"), ParsedFrame::UnknownControl);
    }

    #[test]
    fn scroll_parses() {
        assert_eq!(
            parse_frame("SCROLL:up:5"),
            ParsedFrame::Control(ControlMsg::ScrollUp { lines: 5 })
        );
        assert_eq!(
            parse_frame("SCROLL:down:3"),
            ParsedFrame::Control(ControlMsg::ScrollDown { lines: 3 })
        );
        assert_eq!(parse_frame("SCROLL:exit"), ParsedFrame::Control(ControlMsg::ScrollExit));
        assert_eq!(
            parse_frame("SCROLL:up"),
            ParsedFrame::Control(ControlMsg::ScrollUp { lines: 1 })
        );
        assert_eq!(parse_frame("SCROLL:sideways"), ParsedFrame::UnknownControl);
    }

    #[test]
    fn select_window_parses() {
        assert_eq!(
            parse_frame("SELECT_WINDOW:0"),
            ParsedFrame::Control(ControlMsg::SelectWindow { index: 0 })
        );
        assert_eq!(parse_frame("SELECT_WINDOW:x"), ParsedFrame::UnknownControl);
    }

    #[test]
    fn disable_mouse_parses() {
        assert_eq!(
            parse_frame("DISABLE_MOUSE:"),
            ParsedFrame::Control(ControlMsg::DisableMouse)
        );
    }

    #[test]
    fn plain_text_is_input() {
        assert_eq!(parse_frame("echo hi"), ParsedFrame::Input);
        assert_eq!(parse_frame("ls -la\r"), ParsedFrame::Input);
        assert_eq!(parse_frame(""), ParsedFrame::Input);
        // No colon at all.
        assert_eq!(parse_frame("RESIZE"), ParsedFrame::Input);
        // Prefix contains a non-letter.
        assert_eq!(parse_frame("127.0.0.1:8080"), ParsedFrame::Input);
    }

    #[test]
    fn unknown_verbs_are_swallowed_not_typed() {
        assert_eq!(parse_frame("FROB:1"), ParsedFrame::UnknownControl);
    }

    #[test]
    fn mouse_warning_encoding() {
        assert_eq!(mouse_warning(true), "MOUSE_WARNING:on");
        assert_eq!(mouse_warning(false), "MOUSE_WARNING:off");
    }

    #[test]
    fn identical_consecutive_resizes_coalesce() {
        let mut last = None;
        assert!(coalesce_resize(&mut last, (120, 40)));
        assert!(!coalesce_resize(&mut last, (120, 40)));
        assert!(!coalesce_resize(&mut last, (120, 40)));
        assert!(coalesce_resize(&mut last, (80, 24)));
        assert!(coalesce_resize(&mut last, (120, 40)));
    }
}
