// ABOUTME: Authoritative container map: docker + host + local + bridge merge, poll loop, create flow

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::BridgeHub;
use crate::config::REGISTRY_POLL_INTERVAL;
use crate::docker::{CreateEvent, CreateRequest, CreateStep, DockerEngine};
use crate::error::ApiError;
use crate::models::{Container, ContainerKind, Notification, NotificationKind, TmuxSession};
use crate::notify::NotificationRouter;
use crate::store::StateStore;
use crate::tmux::{TmuxAdapter, TmuxSource};

/// Name of the session created inside a fresh container.
const INITIAL_SESSION: &str = "main";
const INIT_RETRIES: u32 = 10;
const INIT_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Default)]
struct RegistrySnapshot {
    containers: Vec<Container>,
    sessions: HashMap<String, Vec<TmuxSession>>,
    docker_error: Option<String>,
}

/// Merged container list plus the engine error, if any, so clients can render
/// a partial view when docker is down.
#[derive(Debug, Clone)]
pub struct ContainerList {
    pub containers: Vec<Container>,
    pub docker_error: Option<String>,
}

enum PollRole {
    Leader(watch::Sender<bool>),
    Follower(watch::Receiver<bool>),
}

pub struct ContainerRegistry {
    docker: Arc<DockerEngine>,
    adapter: TmuxAdapter,
    hub: Arc<BridgeHub>,
    store: Arc<StateStore>,
    router: Arc<NotificationRouter>,
    host_tmux_socket: Option<PathBuf>,
    state: RwLock<RegistrySnapshot>,
    inflight: Mutex<Option<watch::Receiver<bool>>>,
}

impl ContainerRegistry {
    pub fn new(
        docker: Arc<DockerEngine>,
        adapter: TmuxAdapter,
        hub: Arc<BridgeHub>,
        store: Arc<StateStore>,
        router: Arc<NotificationRouter>,
        host_tmux_socket: Option<PathBuf>,
    ) -> Self {
        Self {
            docker,
            adapter,
            hub,
            store,
            router,
            host_tmux_socket,
            state: RwLock::new(RegistrySnapshot::default()),
            inflight: Mutex::new(None),
        }
    }

    /// Current merged view. Never blocks on the engine; readers get the last
    /// completed snapshot.
    pub fn list(&self) -> ContainerList {
        let snapshot = self.snapshot();
        ContainerList {
            containers: snapshot.containers,
            docker_error: snapshot.docker_error,
        }
    }

    pub fn get(&self, container_id: &str) -> Option<Container> {
        self.snapshot()
            .containers
            .into_iter()
            .find(|c| c.id == container_id)
    }

    /// Last known session list for a container.
    pub fn sessions(&self, container_id: &str) -> Vec<TmuxSession> {
        self.snapshot()
            .sessions
            .get(container_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Map a container id to the tmux source serving it.
    pub fn resolve_source(&self, container_id: &str) -> Result<TmuxSource, ApiError> {
        if container_id == crate::models::LOCAL_CONTAINER_ID {
            return Ok(TmuxSource::LocalProcess { socket_path: None });
        }
        if container_id == crate::models::HOST_CONTAINER_ID {
            return match &self.host_tmux_socket {
                Some(socket) => Ok(TmuxSource::LocalProcess {
                    socket_path: Some(socket.clone()),
                }),
                None => Err(ApiError::TargetMissing(
                    "host tmux socket is not configured".to_string(),
                )),
            };
        }
        if let Some(bridge_id) = container_id.strip_prefix(crate::models::BRIDGE_CONTAINER_PREFIX) {
            return match self.hub.get_record(bridge_id) {
                Some(_) => Ok(TmuxSource::Bridge {
                    bridge_id: bridge_id.to_string(),
                }),
                None => Err(ApiError::TargetMissing(format!(
                    "unknown bridge: {bridge_id}"
                ))),
            };
        }

        let container = self
            .get(container_id)
            .ok_or_else(|| ApiError::TargetMissing(format!("unknown container: {container_id}")))?;
        if !container.status.is_running() {
            return Err(ApiError::SourceUnavailable(format!(
                "container {container_id} is not running"
            )));
        }
        Ok(TmuxSource::ContainerExec {
            container_id: container_id.to_string(),
        })
    }

    /// Refresh once. Concurrent callers share a single in-flight pass.
    pub async fn poll(&self) {
        let role = {
            let mut inflight = self.inflight.lock().unwrap_or_else(|p| p.into_inner());
            match &*inflight {
                Some(rx) => PollRole::Follower(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(false);
                    *inflight = Some(rx);
                    PollRole::Leader(tx)
                }
            }
        };
        match role {
            PollRole::Follower(mut rx) => {
                let _ = rx.changed().await;
            }
            PollRole::Leader(tx) => {
                self.refresh().await;
                let mut inflight = self.inflight.lock().unwrap_or_else(|p| p.into_inner());
                *inflight = None;
                let _ = tx.send(true);
            }
        }
    }

    /// Background reconciliation with jitter so many servers sharing one
    /// engine do not align their queries.
    pub async fn run_poller(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let jitter_ms: i64 = rand::thread_rng().gen_range(-500..=500);
            let base_ms = REGISTRY_POLL_INTERVAL.as_millis() as i64;
            let interval = Duration::from_millis((base_ms + jitter_ms) as u64);
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("registry poller stopping");
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
            }
            self.poll().await;
        }
    }

    async fn refresh(&self) {
        let mut containers = Vec::new();
        let mut docker_error = None;

        match self.docker.list_managed().await {
            Ok(managed) => {
                let prefix = self.docker.name_prefix().to_string();
                for entry in managed {
                    let display = entry
                        .name
                        .strip_prefix(&prefix)
                        .unwrap_or(&entry.name)
                        .to_string();
                    containers.push(Container {
                        id: entry.id,
                        kind: ContainerKind::Docker,
                        display_name: display,
                        status: entry.status,
                        image: entry.image,
                        created_at: entry.created_at,
                    });
                }
            }
            Err(e) => {
                debug!("docker refresh failed: {e}");
                docker_error = Some(e.to_string());
            }
        }

        if self.host_tmux_socket.is_some() {
            containers.push(Container::host());
        }
        containers.push(Container::local());
        for (record, connected) in self.hub.list() {
            containers.push(Container::bridge(&record.id, &record.name, connected));
        }

        let mut sessions: HashMap<String, Vec<TmuxSession>> = HashMap::new();
        for container in &containers {
            // Stopped containers skip the tmux query entirely.
            if !container.status.is_running() {
                continue;
            }
            match container.kind {
                ContainerKind::Docker => {
                    let source = TmuxSource::ContainerExec {
                        container_id: container.id.clone(),
                    };
                    match self.adapter.list_sessions(&source, &container.id).await {
                        Ok(list) => {
                            sessions.insert(container.id.clone(), list);
                        }
                        Err(e) => debug!("session refresh for {} failed: {e}", container.id),
                    }
                }
                ContainerKind::Host | ContainerKind::Local => {
                    let socket = if container.kind == ContainerKind::Host {
                        self.host_tmux_socket.clone()
                    } else {
                        None
                    };
                    let source = TmuxSource::LocalProcess { socket_path: socket };
                    match self.adapter.list_sessions(&source, &container.id).await {
                        Ok(list) => {
                            sessions.insert(container.id.clone(), list);
                        }
                        Err(e) => debug!("session refresh for {} failed: {e}", container.id),
                    }
                }
                ContainerKind::Bridge => {
                    // Bridge session state arrives out-of-band via session reports.
                    if let Some(bridge_id) = container.bridge_id() {
                        if let Some(list) = self.hub.session_snapshot(bridge_id) {
                            sessions.insert(container.id.clone(), list);
                        }
                    }
                }
            }
        }

        let previous = {
            let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
            let previous = std::mem::take(&mut state.sessions);
            state.containers = containers;
            state.sessions = sessions.clone();
            state.docker_error = docker_error;
            previous
        };
        self.detect_alerts(&previous, &sessions);
    }

    /// Publish a notification for every bell/activity flag that newly turned
    /// on since the previous snapshot.
    fn detect_alerts(
        &self,
        previous: &HashMap<String, Vec<TmuxSession>>,
        current: &HashMap<String, Vec<TmuxSession>>,
    ) {
        let channels = self
            .store
            .load_settings()
            .notification_channels
            .unwrap_or_default();
        for (container_id, list) in current {
            let old_list = previous.get(container_id);
            for session in list {
                let old_session =
                    old_list.and_then(|l| l.iter().find(|s| s.name == session.name));
                for window in &session.windows {
                    let old_window = old_session.and_then(|s| s.window(window.index));
                    if window.bell && !old_window.is_some_and(|w| w.bell) {
                        self.router.publish(Notification::new(
                            container_id.clone(),
                            session.name.clone(),
                            window.index,
                            format!("Bell in {}", session.name),
                            format!("window {} ({}) rang the bell", window.index, window.name),
                            NotificationKind::Bell,
                            channels.clone(),
                        ));
                    }
                    if window.activity && !old_window.is_some_and(|w| w.activity) {
                        self.router.publish(Notification::new(
                            container_id.clone(),
                            session.name.clone(),
                            window.index,
                            format!("Activity in {}", session.name),
                            format!("window {} ({}) has new output", window.index, window.name),
                            NotificationKind::Activity,
                            channels.clone(),
                        ));
                    }
                }
            }
        }
    }

    /// Create a container from a template. The returned stream of events is
    /// the source of truth for creation progress and outcome.
    pub fn create_container(self: &Arc<Self>, request: CreateRequest) -> mpsc::Receiver<CreateEvent> {
        let (tx, rx) = mpsc::channel::<CreateEvent>(32);
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            match registry.run_create(&request, &tx).await {
                Ok(container_id) => {
                    info!("container {} created for '{}'", container_id, request.name);
                    let _ = tx.send(CreateEvent::Complete { container_id }).await;
                    registry.poll().await;
                }
                Err((step, message)) => {
                    warn!("container creation failed at {step:?}: {message}");
                    let _ = tx.send(CreateEvent::Error { step, message }).await;
                }
            }
        });
        rx
    }

    async fn run_create(
        &self,
        request: &CreateRequest,
        tx: &mpsc::Sender<CreateEvent>,
    ) -> Result<String, (CreateStep, String)> {
        let step = |s: CreateStep, m: &str| CreateEvent::Step {
            step: s,
            message: m.to_string(),
        };

        let _ = tx
            .send(step(CreateStep::BuildingImage, "resolving template image"))
            .await;
        let template = self
            .store
            .load_templates()
            .into_iter()
            .find(|t| t.id == request.template_id)
            .ok_or_else(|| {
                (
                    CreateStep::BuildingImage,
                    format!("template not found: {}", request.template_id),
                )
            })?;
        let log_tx = tx.clone();
        self.docker
            .ensure_image(&template.image, move |line| {
                let _ = log_tx.try_send(CreateEvent::Log { message: line });
            })
            .await
            .map_err(|e| (CreateStep::BuildingImage, e.to_string()))?;

        let _ = tx
            .send(step(CreateStep::CreatingContainer, "creating container"))
            .await;
        let container_id = self
            .docker
            .create_from_template(&template, request)
            .await
            .map_err(|e| (CreateStep::CreatingContainer, e.to_string()))?;

        let _ = tx
            .send(step(CreateStep::StartingContainer, "starting container"))
            .await;
        self.docker
            .start(&container_id)
            .await
            .map_err(|e| (CreateStep::StartingContainer, e.to_string()))?;

        let _ = tx
            .send(step(CreateStep::Initializing, "starting tmux session"))
            .await;
        let source = TmuxSource::ContainerExec {
            container_id: container_id.clone(),
        };
        let mut last_err = String::new();
        for attempt in 0..INIT_RETRIES {
            match self.adapter.create_session(&source, INITIAL_SESSION).await {
                Ok(()) => return Ok(container_id),
                Err(crate::tmux::TmuxError::NameConflict(_)) => return Ok(container_id),
                Err(e) => {
                    last_err = e.to_string();
                    debug!("init attempt {attempt} failed: {last_err}");
                    tokio::time::sleep(INIT_RETRY_DELAY).await;
                }
            }
        }
        Err((CreateStep::Initializing, last_err))
    }

    pub async fn start_container(&self, container_id: &str) -> Result<(), ApiError> {
        self.docker.start(container_id).await?;
        self.poll().await;
        Ok(())
    }

    pub async fn stop_container(&self, container_id: &str) -> Result<(), ApiError> {
        self.docker.stop(container_id).await?;
        self.poll().await;
        Ok(())
    }

    pub async fn rename_container(
        &self,
        container_id: &str,
        new_name: &str,
    ) -> Result<(), ApiError> {
        if new_name.trim().is_empty() {
            return Err(ApiError::InvalidArgument("name must not be empty".into()));
        }
        self.docker.rename(container_id, new_name).await?;
        self.poll().await;
        Ok(())
    }

    pub async fn remove_container(&self, container_id: &str) -> Result<(), ApiError> {
        self.docker.remove(container_id).await?;
        self.poll().await;
        Ok(())
    }

    fn snapshot(&self) -> RegistrySnapshot {
        self.state.read().unwrap_or_else(|p| p.into_inner()).clone()
    }
}
