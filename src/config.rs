// ABOUTME: Server configuration resolved from environment variables at startup

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// Default poll interval for the container registry. Actual polls add ±0.5 s jitter.
pub const REGISTRY_POLL_INTERVAL: Duration = Duration::from_secs(3);
/// Timeout for container-engine calls.
pub const DOCKER_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for a single tmux command invocation.
pub const TMUX_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for a bridge op round-trip.
pub const BRIDGE_RPC_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for one Telegram Bot API call.
pub const TELEGRAM_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Durable state directory (settings, templates, bridges, pin).
    pub data_dir: PathBuf,
    /// Docker socket override; bollard's default discovery applies when unset.
    pub docker_socket: Option<String>,
    /// Name prefix marking docker containers as ours.
    pub container_name_prefix: String,
    /// Directory of Dockerfile templates referenced by container creation.
    pub templates_dir: Option<PathBuf>,
    /// Host tmux socket path; the `host` source is offered only when set.
    pub host_tmux_socket: Option<PathBuf>,
    /// Static assets for the browser UI, served at `/`.
    pub static_dir: Option<PathBuf>,
    pub telegram_bot_token: Option<String>,
    /// Telegram user ids permitted to interact with the bot; empty allows all.
    pub telegram_allowed_users: Vec<i64>,
    pub host: IpAddr,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("tmuxdeck")
            });

        let telegram_allowed_users = std::env::var("TELEGRAM_ALLOWED_USERS")
            .map(|raw| {
                raw.split(',')
                    .filter_map(|part| part.trim().parse::<i64>().ok())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            data_dir,
            docker_socket: std::env::var("DOCKER_SOCKET").ok(),
            container_name_prefix: std::env::var("CONTAINER_NAME_PREFIX")
                .unwrap_or_else(|_| "tmuxdeck-".to_string()),
            templates_dir: std::env::var("TEMPLATES_DIR").ok().map(PathBuf::from),
            host_tmux_socket: std::env::var("HOST_TMUX_SOCKET").ok().map(PathBuf::from),
            static_dir: std::env::var("STATIC_DIR").ok().map(PathBuf::from),
            telegram_bot_token: std::env::var("TELEGRAM_BOT_TOKEN").ok(),
            telegram_allowed_users,
            host: std::env::var("HOST")
                .ok()
                .and_then(|h| h.parse().ok())
                .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
        }
    }
}
