// ABOUTME: Data model types shared across the server core

mod auth;
mod bridge;
mod container;
mod notification;
mod tmux;

pub use auth::{AuthSession, SESSION_TTL_DAYS};
pub use bridge::BridgeRecord;
pub use container::{
    Container, ContainerKind, ContainerStatus, BRIDGE_CONTAINER_PREFIX, HOST_CONTAINER_ID,
    LOCAL_CONTAINER_ID,
};
pub use notification::{Notification, NotificationChannel, NotificationKind, NotificationStatus};
pub use tmux::{PaneTarget, TmuxSession, Window};
