// ABOUTME: Container model covering docker, host, local and bridge-backed sources

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reserved container id for the host tmux socket.
pub const HOST_CONTAINER_ID: &str = "host";
/// Reserved container id for the server's own tmux socket.
pub const LOCAL_CONTAINER_ID: &str = "local";
/// Prefix for containers synthesized from connected bridge agents.
pub const BRIDGE_CONTAINER_PREFIX: &str = "bridge:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Docker,
    Host,
    Local,
    Bridge,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Running,
    Stopped,
    Creating,
    Error,
}

impl ContainerStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ContainerStatus::Running)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub id: String,
    pub kind: ContainerKind,
    pub display_name: String,
    pub status: ContainerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Container {
    /// Synthesized entry for the host tmux socket, always present.
    pub fn host() -> Self {
        Self {
            id: HOST_CONTAINER_ID.to_string(),
            kind: ContainerKind::Host,
            display_name: "Host".to_string(),
            status: ContainerStatus::Running,
            image: None,
            created_at: Utc::now(),
        }
    }

    /// Synthesized entry for the server's own default tmux socket.
    pub fn local() -> Self {
        Self {
            id: LOCAL_CONTAINER_ID.to_string(),
            kind: ContainerKind::Local,
            display_name: "Local".to_string(),
            status: ContainerStatus::Running,
            image: None,
            created_at: Utc::now(),
        }
    }

    /// Synthesized entry for a connected bridge agent.
    pub fn bridge(bridge_id: &str, name: &str, connected: bool) -> Self {
        Self {
            id: format!("{BRIDGE_CONTAINER_PREFIX}{bridge_id}"),
            kind: ContainerKind::Bridge,
            display_name: name.to_string(),
            status: if connected {
                ContainerStatus::Running
            } else {
                ContainerStatus::Stopped
            },
            image: None,
            created_at: Utc::now(),
        }
    }

    /// Bridge id when this container was synthesized from a bridge, else None.
    pub fn bridge_id(&self) -> Option<&str> {
        self.id.strip_prefix(BRIDGE_CONTAINER_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_id_roundtrip() {
        let c = Container::bridge("b1", "pi", true);
        assert_eq!(c.id, "bridge:b1");
        assert_eq!(c.bridge_id(), Some("b1"));
        assert!(Container::host().bridge_id().is_none());
    }

    #[test]
    fn serializes_camel_case() {
        let c = Container::host();
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["displayName"], "Host");
        assert_eq!(v["kind"], "host");
        assert_eq!(v["status"], "running");
    }
}
