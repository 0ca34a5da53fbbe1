// ABOUTME: Axum application assembly: state, routes, auth middleware, startup

mod auth_routes;
mod bridge_ws;
mod bridges;
mod containers;
mod debug;
mod notifications;
mod settings;
mod telegram_routes;
mod templates;
mod terminal_ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::COOKIE;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing::info;

use crate::auth::{AuthService, SESSION_COOKIE};
use crate::bridge::BridgeHub;
use crate::broker::TerminalBroker;
use crate::config::ServerConfig;
use crate::debug_ring::DebugRing;
use crate::docker::DockerEngine;
use crate::error::ApiError;
use crate::notify::{NotificationRouter, TelegramSender};
use crate::registry::ContainerRegistry;
use crate::store::StateStore;
use crate::tmux::TmuxAdapter;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Arc<StateStore>,
    pub ring: Arc<DebugRing>,
    pub auth: Arc<AuthService>,
    pub hub: Arc<BridgeHub>,
    pub adapter: TmuxAdapter,
    pub registry: Arc<ContainerRegistry>,
    pub broker: Arc<TerminalBroker>,
    pub notifications: Arc<NotificationRouter>,
    pub telegram: Option<Arc<TelegramSender>>,
}

impl AppState {
    /// Wire every service once at startup; handlers receive them by value.
    pub fn build(config: ServerConfig) -> Result<Self, anyhow::Error> {
        let config = Arc::new(config);
        let store = Arc::new(StateStore::open(&config.data_dir)?);
        let ring = Arc::new(DebugRing::new());
        let auth = Arc::new(AuthService::new(store.clone()));
        let docker = Arc::new(DockerEngine::connect(
            config.docker_socket.as_deref(),
            &config.container_name_prefix,
        ));
        let hub = Arc::new(BridgeHub::new(store.clone(), ring.clone()));
        let adapter = TmuxAdapter::new(docker.clone(), hub.clone());
        let telegram = match &config.telegram_bot_token {
            Some(token) => Some(Arc::new(TelegramSender::new(
                token.clone(),
                config.telegram_allowed_users.clone(),
            )?)),
            None => None,
        };
        let notifications = Arc::new(NotificationRouter::new(
            store.clone(),
            ring.clone(),
            telegram.clone(),
        ));
        let registry = Arc::new(ContainerRegistry::new(
            docker,
            adapter.clone(),
            hub.clone(),
            store.clone(),
            notifications.clone(),
            config.host_tmux_socket.clone(),
        ));
        let broker = Arc::new(TerminalBroker::new(adapter.clone(), registry.clone()));

        Ok(Self {
            config,
            store,
            ring,
            auth,
            hub,
            adapter,
            registry,
            broker,
            notifications,
            telegram,
        })
    }
}

/// Extract the session token from the Cookie header, if present.
pub(crate) fn session_token(request_headers: &axum::http::HeaderMap) -> Option<String> {
    let cookies = request_headers.get(COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}

async fn require_session(
    State(auth): State<Arc<AuthService>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = session_token(request.headers());
    if auth.authorize(token.as_deref()) {
        Ok(next.run(request).await)
    } else {
        Err(ApiError::Unauthorized)
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub fn build_router(state: AppState) -> Router {
    let gated = Router::new()
        .route(
            "/containers",
            get(containers::list).post(containers::create),
        )
        .route("/containers/{id}", delete(containers::remove))
        .route("/containers/{id}/start", post(containers::start))
        .route("/containers/{id}/stop", post(containers::stop))
        .route("/containers/{id}/rename", post(containers::rename))
        .route(
            "/containers/{id}/sessions",
            get(containers::list_sessions).post(containers::create_session),
        )
        .route(
            "/containers/{id}/sessions/{name}",
            delete(containers::kill_session),
        )
        .route(
            "/containers/{id}/sessions/{name}/rename",
            post(containers::rename_session),
        )
        .route(
            "/containers/{id}/sessions/{name}/windows",
            post(containers::create_window),
        )
        .route(
            "/containers/{id}/sessions/{name}/windows/swap",
            post(containers::swap_windows),
        )
        .route(
            "/containers/{id}/sessions/{name}/windows/{index}",
            delete(containers::kill_window),
        )
        .route(
            "/containers/{id}/sessions/{name}/windows/{index}/move",
            post(containers::move_window),
        )
        .route(
            "/containers/{id}/sessions/{name}/windows/{index}/capture",
            get(containers::capture),
        )
        .route(
            "/containers/{id}/sessions/{name}/windows/{index}/send-keys",
            post(containers::send_keys),
        )
        .route(
            "/containers/{id}/sessions/{name}/windows/{index}/clear-status",
            post(containers::clear_status),
        )
        .route(
            "/templates",
            get(templates::list).post(templates::create),
        )
        .route(
            "/templates/{id}",
            put(templates::update).delete(templates::remove),
        )
        .route("/settings", get(settings::get).put(settings::update))
        .route("/bridges", get(bridges::list).post(bridges::create))
        .route("/bridges/{id}", delete(bridges::remove))
        .route("/bridges/{id}/enabled", put(bridges::set_enabled))
        .route(
            "/notifications",
            get(notifications::pending).post(notifications::publish),
        )
        .route("/notifications/dismiss", post(notifications::dismiss))
        .route("/notifications/stream", get(notifications::stream))
        .route(
            "/debug-log",
            get(debug::snapshot).delete(debug::clear).post(debug::push),
        )
        .route("/telegram/chats", get(telegram_routes::chats))
        .route(
            "/ws/terminal/{container_id}/{session_name}/{window_index}",
            get(terminal_ws::upgrade),
        )
        .layer(middleware::from_fn_with_state(
            state.auth.clone(),
            require_session,
        ));

    let mut router = Router::new()
        .route("/health", get(health))
        .route("/auth/status", get(auth_routes::status))
        .route("/auth/setup", post(auth_routes::setup))
        .route("/auth/change", post(auth_routes::change))
        .route("/auth/login", post(auth_routes::login))
        .route("/auth/logout", post(auth_routes::logout))
        // Bridge upgrades authenticate in-band (first frame) or via cookie.
        .route("/ws/bridge", get(bridge_ws::upgrade))
        .merge(gated);

    if let Some(static_dir) = &state.config.static_dir {
        router = router.fallback_service(ServeDir::new(static_dir));
    }

    router.with_state(state)
}

/// Run the server until shutdown. Spawns the registry poller alongside.
pub async fn serve(state: AppState, cancel: CancellationToken) -> Result<(), anyhow::Error> {
    let addr = SocketAddr::new(state.config.host, state.config.port);
    let poller = tokio::spawn(
        state
            .registry
            .clone()
            .run_poller(cancel.clone()),
    );
    // Seed the first snapshot so early requests see containers.
    state.registry.poll().await;

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on http://{addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    poller.abort();
    Ok(())
}
