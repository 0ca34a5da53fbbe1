// ABOUTME: Container engine access: connection discovery, lifecycle calls, create event stream

mod engine;
mod lifecycle;

pub use engine::{ContainerError, DockerEngine, ManagedContainer};
pub use lifecycle::{CreateEvent, CreateRequest, CreateStep};
