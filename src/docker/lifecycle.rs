// ABOUTME: Container creation plumbing: image pull, container assembly, create event types

use std::collections::{BTreeMap, HashMap};

use bollard::container::{Config, CreateContainerOptions};
use bollard::image::{CreateImageOptions, ListImagesOptions};
use bollard::models::{HostConfig, Mount, MountTypeEnum};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::store::ContainerTemplate;

use super::engine::{sanitize_name, ContainerError, DockerEngine, MANAGED_LABEL};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateStep {
    BuildingImage,
    CreatingContainer,
    StartingContainer,
    Initializing,
}

/// One event in the creation stream. The stream is the source of truth for
/// state mutation ordering.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CreateEvent {
    Step { step: CreateStep, message: String },
    Log { message: String },
    Complete { container_id: String },
    Error { step: CreateStep, message: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub template_id: String,
    pub name: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// host path -> container path
    #[serde(default)]
    pub volumes: BTreeMap<String, String>,
    #[serde(default)]
    pub mount_ssh: bool,
    #[serde(default)]
    pub mount_claude: bool,
}

impl DockerEngine {
    /// Pull the template image unless present, reporting progress lines.
    pub async fn ensure_image(
        &self,
        image: &str,
        mut progress: impl FnMut(String),
    ) -> Result<(), ContainerError> {
        let docker = self.client()?;
        let mut filters = HashMap::new();
        filters.insert("reference".to_string(), vec![image.to_string()]);
        let existing = docker
            .list_images(Some(ListImagesOptions {
                filters,
                ..Default::default()
            }))
            .await?;
        if !existing.is_empty() {
            debug!("image {image} already present");
            return Ok(());
        }

        info!("pulling image {image}");
        let mut stream = docker.create_image(
            Some(CreateImageOptions {
                from_image: image,
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(result) = stream.next().await {
            match result {
                Ok(update) => {
                    if let Some(status) = update.status {
                        progress(status);
                    }
                }
                Err(e) => {
                    return Err(ContainerError::OperationFailed(format!(
                        "failed to pull image {image}: {e}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Create (but do not start) a container from a template plus request
    /// overrides. Returns the engine-assigned container id.
    pub async fn create_from_template(
        &self,
        template: &ContainerTemplate,
        request: &CreateRequest,
    ) -> Result<String, ContainerError> {
        let docker = self.client()?;
        let container_name = format!("{}{}", self.name_prefix(), sanitize_name(&request.name));

        if self.exists_by_name(&container_name).await? {
            return Err(ContainerError::AlreadyExists(container_name));
        }

        let mut mounts = Vec::new();
        let mut add_bind = |host: &str, target: &str, read_only: bool| {
            mounts.push(Mount {
                target: Some(target.to_string()),
                source: Some(host.to_string()),
                typ: Some(MountTypeEnum::BIND),
                read_only: Some(read_only),
                ..Default::default()
            });
        };
        for (host, target) in template.volumes.iter().chain(request.volumes.iter()) {
            add_bind(host, target, false);
        }
        if let Some(home) = dirs::home_dir() {
            if request.mount_ssh {
                let ssh = home.join(".ssh");
                if ssh.exists() {
                    add_bind(&ssh.to_string_lossy(), "/root/.ssh", true);
                }
            }
            if request.mount_claude {
                let claude = home.join(".claude");
                if claude.exists() {
                    add_bind(&claude.to_string_lossy(), "/root/.claude", false);
                }
            }
        }

        let env: Vec<String> = template
            .env
            .iter()
            .chain(request.env.iter())
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        let mut labels = HashMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
        labels.insert("tmuxdeck.template".to_string(), template.id.clone());

        let config = Config {
            image: Some(template.image.clone()),
            env: Some(env),
            // The container idles; tmux sessions are started through exec.
            cmd: Some(vec![
                "tail".to_string(),
                "-f".to_string(),
                "/dev/null".to_string(),
            ]),
            tty: Some(true),
            labels: Some(labels),
            host_config: Some(HostConfig {
                mounts: Some(mounts),
                auto_remove: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = docker
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name.clone(),
                    platform: None,
                }),
                config,
            )
            .await?;
        info!("created container {container_name} ({})", created.id);
        Ok(created.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_step_serializes_snake_case() {
        let v = serde_json::to_value(CreateStep::BuildingImage).unwrap();
        assert_eq!(v, "building_image");
        let v = serde_json::to_value(CreateStep::StartingContainer).unwrap();
        assert_eq!(v, "starting_container");
    }

    #[test]
    fn create_event_tagging() {
        let e = CreateEvent::Error {
            step: CreateStep::CreatingContainer,
            message: "boom".into(),
        };
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["event"], "error");
        assert_eq!(v["step"], "creating_container");
        assert_eq!(v["message"], "boom");
    }

    #[test]
    fn request_defaults() {
        let req: CreateRequest =
            serde_json::from_str(r#"{"templateId":"basic-dev","name":"c1"}"#).unwrap();
        assert!(req.env.is_empty());
        assert!(!req.mount_ssh);
        assert!(!req.mount_claude);
    }
}
