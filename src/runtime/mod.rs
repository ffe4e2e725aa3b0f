//! Container-runtime abstraction: narrow interface, Docker adapter, event
//! multiplexing, and the process-wide client pool.

mod client;
mod events;
mod pool;

pub use client::{ContainerEvent, ContainerInfo, ContainerRuntime, ContainerState, DockerRuntime};
pub use events::EventMonitor;
pub use pool::{RuntimeClient, RuntimeClientPool};
