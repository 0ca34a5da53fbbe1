// ABOUTME: Bollard connection management and container lifecycle calls

use std::collections::HashMap;

use bollard::container::{
    ListContainersOptions, RemoveContainerOptions, RenameContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::Docker;
use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::DOCKER_TIMEOUT;
use crate::models::ContainerStatus;

/// Label marking containers managed by this server.
pub const MANAGED_LABEL: &str = "tmuxdeck.managed";

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("docker connection error: {0}")]
    Connection(#[from] bollard::errors::Error),
    #[error("container engine unreachable: {0}")]
    EngineUnavailable(String),
    #[error("container not found: {0}")]
    NotFound(String),
    #[error("container already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("container operation failed: {0}")]
    OperationFailed(String),
    #[error("container operation timed out: {0}")]
    Timeout(String),
}

/// A docker container the engine recognizes as ours.
#[derive(Debug, Clone)]
pub struct ManagedContainer {
    pub id: String,
    pub name: String,
    pub status: ContainerStatus,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub struct DockerEngine {
    docker: Option<Docker>,
    connect_error: Option<String>,
    name_prefix: String,
}

impl DockerEngine {
    /// Connect using the configured socket, falling back to bollard's default
    /// discovery. A failed connection is not fatal: the registry keeps serving
    /// host/local/bridge sources and surfaces the error to clients.
    pub fn connect(socket: Option<&str>, name_prefix: &str) -> Self {
        let result = match socket {
            Some(path) => {
                info!("connecting to docker via configured socket {path}");
                Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION)
            }
            None => Docker::connect_with_local_defaults(),
        };
        match result {
            Ok(docker) => Self {
                docker: Some(docker),
                connect_error: None,
                name_prefix: name_prefix.to_string(),
            },
            Err(e) => {
                warn!("docker connection unavailable: {e}");
                Self {
                    docker: None,
                    connect_error: Some(e.to_string()),
                    name_prefix: name_prefix.to_string(),
                }
            }
        }
    }

    pub fn client(&self) -> Result<&Docker, ContainerError> {
        self.docker.as_ref().ok_or_else(|| {
            ContainerError::EngineUnavailable(
                self.connect_error
                    .clone()
                    .unwrap_or_else(|| "docker not connected".to_string()),
            )
        })
    }

    pub fn name_prefix(&self) -> &str {
        &self.name_prefix
    }

    /// All containers carrying our name prefix or managed label, any state.
    pub async fn list_managed(&self) -> Result<Vec<ManagedContainer>, ContainerError> {
        let docker = self.client()?;
        let summaries = timeout(
            DOCKER_TIMEOUT,
            docker.list_containers(Some(ListContainersOptions::<String> {
                all: true,
                ..Default::default()
            })),
        )
        .await
        .map_err(|_| ContainerError::Timeout("list containers".to_string()))??;

        let mut out = Vec::new();
        for summary in summaries {
            let name = summary
                .names
                .as_ref()
                .and_then(|names| names.first())
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default();
            let labeled = summary
                .labels
                .as_ref()
                .is_some_and(|labels| labels.get(MANAGED_LABEL).map(String::as_str) == Some("true"));
            if !labeled && !name.starts_with(&self.name_prefix) {
                continue;
            }
            let Some(id) = summary.id else { continue };
            out.push(ManagedContainer {
                id,
                name,
                status: map_state(summary.state.as_deref()),
                image: summary.image,
                created_at: summary
                    .created
                    .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                    .unwrap_or_else(Utc::now),
            });
        }
        Ok(out)
    }

    pub async fn start(&self, container_id: &str) -> Result<(), ContainerError> {
        let docker = self.client()?;
        let result = timeout(
            DOCKER_TIMEOUT,
            docker.start_container(container_id, None::<StartContainerOptions<String>>),
        )
        .await
        .map_err(|_| ContainerError::Timeout("start container".to_string()))?;
        match result {
            Ok(()) => Ok(()),
            // Already running: starting is idempotent on current status.
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                debug!("container {container_id} already started");
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Err(ContainerError::NotFound(container_id.to_string())),
            Err(e) => Err(ContainerError::Connection(e)),
        }
    }

    pub async fn stop(&self, container_id: &str) -> Result<(), ContainerError> {
        let docker = self.client()?;
        let result = timeout(
            DOCKER_TIMEOUT,
            docker.stop_container(container_id, Some(StopContainerOptions { t: 10 })),
        )
        .await
        .map_err(|_| ContainerError::Timeout("stop container".to_string()))?;
        match result {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                debug!("container {container_id} already stopped");
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Err(ContainerError::NotFound(container_id.to_string())),
            Err(e) => Err(ContainerError::Connection(e)),
        }
    }

    pub async fn rename(&self, container_id: &str, new_name: &str) -> Result<(), ContainerError> {
        let docker = self.client()?;
        let name = format!("{}{}", self.name_prefix, sanitize_name(new_name));
        let result = timeout(
            DOCKER_TIMEOUT,
            docker.rename_container(container_id, RenameContainerOptions { name: name.as_str() }),
        )
        .await
        .map_err(|_| ContainerError::Timeout("rename container".to_string()))?;
        match result {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 409, ..
            }) => Err(ContainerError::AlreadyExists(name)),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Err(ContainerError::NotFound(container_id.to_string())),
            Err(e) => Err(ContainerError::Connection(e)),
        }
    }

    pub async fn remove(&self, container_id: &str) -> Result<(), ContainerError> {
        let docker = self.client()?;
        let result = timeout(
            DOCKER_TIMEOUT,
            docker.remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            ),
        )
        .await
        .map_err(|_| ContainerError::Timeout("remove container".to_string()))?;
        match result {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!("container {container_id} already removed");
                Ok(())
            }
            Err(e) => Err(ContainerError::Connection(e)),
        }
    }

    pub async fn exists_by_name(&self, name: &str) -> Result<bool, ContainerError> {
        let docker = self.client()?;
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![format!("^/{name}$")]);
        let containers = timeout(
            DOCKER_TIMEOUT,
            docker.list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            })),
        )
        .await
        .map_err(|_| ContainerError::Timeout("list containers".to_string()))??;
        Ok(!containers.is_empty())
    }
}

pub(crate) fn map_state(state: Option<&str>) -> ContainerStatus {
    match state {
        Some("running") | Some("restarting") => ContainerStatus::Running,
        Some("created") => ContainerStatus::Creating,
        Some("exited") | Some("dead") | Some("paused") => ContainerStatus::Stopped,
        Some(_) | None => ContainerStatus::Error,
    }
}

pub(crate) fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_mapping() {
        assert_eq!(map_state(Some("running")), ContainerStatus::Running);
        assert_eq!(map_state(Some("created")), ContainerStatus::Creating);
        assert_eq!(map_state(Some("exited")), ContainerStatus::Stopped);
        assert_eq!(map_state(Some("weird")), ContainerStatus::Error);
        assert_eq!(map_state(None), ContainerStatus::Error);
    }

    #[test]
    fn name_sanitization() {
        assert_eq!(sanitize_name("my project!"), "my-project-");
        assert_eq!(sanitize_name("ok-name_1.2"), "ok-name_1.2");
    }

    #[test]
    fn disconnected_engine_reports_unavailable() {
        let engine = DockerEngine {
            docker: None,
            connect_error: Some("no socket".to_string()),
            name_prefix: "tmuxdeck-".to_string(),
        };
        let err = engine.client().unwrap_err();
        assert!(matches!(err, ContainerError::EngineUnavailable(_)));
        assert!(err.to_string().contains("no socket"));
    }
}
