// ABOUTME: Tmux argv builders and -F format parsing shared by every source variant

use crate::models::Window;

use super::TmuxError;

/// Field delimiter for `-F` formats. The ASCII unit separator cannot appear in
/// tmux-legal session or window names.
pub const FIELD_SEP: char = '\u{1f}';

/// `list-sessions` format: id, name, attached flag.
pub fn session_format() -> String {
    ["#{session_id}", "#{session_name}", "#{session_attached}"].join(&FIELD_SEP.to_string())
}

/// `list-windows` format. Trailing fields are optional across tmux versions;
/// the parser fills defaults for anything missing.
pub fn window_format() -> String {
    [
        "#{window_index}",
        "#{window_name}",
        "#{window_active}",
        "#{window_panes}",
        "#{window_bell_flag}",
        "#{window_activity_flag}",
        "#{pane_current_command}",
        "#{@pane_status}",
    ]
    .join(&FIELD_SEP.to_string())
}

/// Parsed `list-sessions` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLine {
    pub id: String,
    pub name: String,
    pub attached: bool,
}

pub fn parse_session_line(line: &str) -> Option<SessionLine> {
    let mut fields = line.split(FIELD_SEP);
    let id = fields.next()?.to_string();
    let name = fields.next()?.to_string();
    if id.is_empty() || name.is_empty() {
        return None;
    }
    let attached = fields.next().map(flag).unwrap_or(false);
    Some(SessionLine { id, name, attached })
}

pub fn parse_window_line(line: &str) -> Option<Window> {
    let mut fields = line.split(FIELD_SEP);
    let index: u32 = fields.next()?.trim().parse().ok()?;
    let name = fields.next().unwrap_or("").to_string();
    let active = fields.next().map(flag).unwrap_or(false);
    let pane_count = fields
        .next()
        .and_then(|f| f.trim().parse().ok())
        .unwrap_or(1);
    let bell = fields.next().map(flag).unwrap_or(false);
    let activity = fields.next().map(flag).unwrap_or(false);
    let command = fields.next().map(str::to_string).filter(|s| !s.is_empty());
    let pane_status = fields.next().map(str::to_string).filter(|s| !s.is_empty());
    Some(Window {
        index,
        name,
        active,
        pane_count,
        bell,
        activity,
        command,
        pane_status,
    })
}

fn flag(field: &str) -> bool {
    field.trim() == "1"
}

/// Maximum length tmux accepts for a session name.
pub const MAX_SESSION_NAME: usize = 255;

/// Reject names tmux itself would refuse; `:` and `.` are target separators.
pub fn validate_session_name(name: &str) -> Result<(), TmuxError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed != name {
        return Err(TmuxError::InvalidArgument(
            "session name must not be empty or padded with whitespace".to_string(),
        ));
    }
    if name.len() > MAX_SESSION_NAME {
        return Err(TmuxError::InvalidArgument(format!(
            "session name exceeds {MAX_SESSION_NAME} bytes"
        )));
    }
    if name.contains(':') || name.contains('.') || name.contains(FIELD_SEP) {
        return Err(TmuxError::InvalidArgument(
            "session name must not contain ':' or '.'".to_string(),
        ));
    }
    Ok(())
}

/// Classify tmux stderr into the adapter error kinds.
pub fn classify_stderr(stderr: &str) -> TmuxError {
    let lower = stderr.to_lowercase();
    if lower.contains("no server running") || lower.contains("error connecting to") {
        TmuxError::SourceUnavailable(stderr.trim().to_string())
    } else if lower.contains("not found")
        || lower.contains("can't find session")
        || lower.contains("can't find window")
        || lower.contains("no such")
    {
        TmuxError::TargetMissing(stderr.trim().to_string())
    } else if lower.contains("duplicate session") {
        TmuxError::NameConflict(stderr.trim().to_string())
    } else {
        TmuxError::Internal(stderr.trim().to_string())
    }
}

/// True when stderr only means "no sessions exist yet".
pub fn is_empty_server(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("no server running") || lower.contains("no sessions")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sep(parts: &[&str]) -> String {
        parts.join(&FIELD_SEP.to_string())
    }

    #[test]
    fn parses_full_session_line() {
        let line = sep(&["$3", "main", "1"]);
        let parsed = parse_session_line(&line).unwrap();
        assert_eq!(
            parsed,
            SessionLine {
                id: "$3".into(),
                name: "main".into(),
                attached: true
            }
        );
    }

    #[test]
    fn session_name_may_contain_spaces() {
        let line = sep(&["$1", "my project", "0"]);
        let parsed = parse_session_line(&line).unwrap();
        assert_eq!(parsed.name, "my project");
        assert!(!parsed.attached);
    }

    #[test]
    fn parses_full_window_line() {
        let line = sep(&["2", "editor", "1", "3", "0", "1", "vim", "building"]);
        let w = parse_window_line(&line).unwrap();
        assert_eq!(w.index, 2);
        assert_eq!(w.name, "editor");
        assert!(w.active);
        assert_eq!(w.pane_count, 3);
        assert!(!w.bell);
        assert!(w.activity);
        assert_eq!(w.command.as_deref(), Some("vim"));
        assert_eq!(w.pane_status.as_deref(), Some("building"));
    }

    #[test]
    fn tolerates_missing_trailing_fields() {
        // Older tmux without @pane_status or pane_current_command.
        let line = sep(&["0", "bash", "1", "1"]);
        let w = parse_window_line(&line).unwrap();
        assert_eq!(w.index, 0);
        assert!(w.active);
        assert!(!w.bell);
        assert!(w.command.is_none());
        assert!(w.pane_status.is_none());
    }

    #[test]
    fn window_index_zero_is_valid() {
        let line = sep(&["0", "w", "0", "1", "0", "0", "", ""]);
        assert_eq!(parse_window_line(&line).unwrap().index, 0);
    }

    #[test]
    fn rejects_garbage_window_line() {
        assert!(parse_window_line("not-a-window").is_none());
        assert!(parse_window_line("").is_none());
    }

    #[test]
    fn name_validation() {
        assert!(validate_session_name("main").is_ok());
        assert!(validate_session_name("a").is_ok());
        assert!(validate_session_name(&"x".repeat(MAX_SESSION_NAME)).is_ok());
        assert!(validate_session_name("").is_err());
        assert!(validate_session_name("  ").is_err());
        assert!(validate_session_name(" padded").is_err());
        assert!(validate_session_name("a:b").is_err());
        assert!(validate_session_name("a.b").is_err());
        assert!(validate_session_name(&"x".repeat(MAX_SESSION_NAME + 1)).is_err());
    }

    #[test]
    fn stderr_classification() {
        assert!(matches!(
            classify_stderr("no server running on /tmp/tmux-0/default"),
            TmuxError::SourceUnavailable(_)
        ));
        assert!(matches!(
            classify_stderr("can't find session: nope"),
            TmuxError::TargetMissing(_)
        ));
        assert!(matches!(
            classify_stderr("duplicate session: main"),
            TmuxError::NameConflict(_)
        ));
        assert!(matches!(
            classify_stderr("something exploded"),
            TmuxError::Internal(_)
        ));
    }
}
