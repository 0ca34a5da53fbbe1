// ABOUTME: Tmux session and window models as surfaced by the source adapters

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Window {
    pub index: u32,
    pub name: String,
    pub active: bool,
    pub pane_count: u32,
    pub bell: bool,
    pub activity: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pane_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TmuxSession {
    /// `$N` for real tmux sessions, synthesized otherwise. Stable within a container.
    pub id: String,
    pub name: String,
    pub attached: bool,
    /// Ordered by window index ascending. Indexes need not be dense.
    pub windows: Vec<Window>,
    pub container_id: String,
}

impl TmuxSession {
    pub fn active_window(&self) -> Option<&Window> {
        self.windows.iter().find(|w| w.active)
    }

    pub fn window(&self, index: u32) -> Option<&Window> {
        self.windows.iter().find(|w| w.index == index)
    }
}

/// Addresses one pane: the active pane of `(container, session, window)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PaneTarget {
    pub container_id: String,
    pub session_name: String,
    pub window_index: u32,
}

impl PaneTarget {
    pub fn new(container_id: impl Into<String>, session_name: impl Into<String>, window_index: u32) -> Self {
        Self {
            container_id: container_id.into(),
            session_name: session_name.into(),
            window_index,
        }
    }

    /// The `session:window` form tmux commands take after `-t`.
    pub fn tmux_target(&self) -> String {
        format!("{}:{}", self.session_name, self.window_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(index: u32, active: bool) -> Window {
        Window {
            index,
            name: format!("w{index}"),
            active,
            pane_count: 1,
            bell: false,
            activity: false,
            command: None,
            pane_status: None,
        }
    }

    #[test]
    fn active_window_lookup() {
        let session = TmuxSession {
            id: "$1".into(),
            name: "main".into(),
            attached: false,
            windows: vec![window(0, false), window(3, true)],
            container_id: "local".into(),
        };
        assert_eq!(session.active_window().map(|w| w.index), Some(3));
        assert_eq!(session.window(0).map(|w| w.index), Some(0));
        assert!(session.window(1).is_none());
    }

    #[test]
    fn tmux_target_form() {
        let t = PaneTarget::new("c1", "main", 2);
        assert_eq!(t.tmux_target(), "main:2");
    }
}
