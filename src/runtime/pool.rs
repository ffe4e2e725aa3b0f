//! Process-wide pool of container-runtime clients, deduplicated by socket URI.
//!
//! Grounded on the teacher's `DockerService` wrapper, generalized from a
//! single per-process client to a map so that multiple applications naming
//! the same socket share one connection and one event subscription.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::client::{ContainerEvent, ContainerRuntime, DockerRuntime};
use super::events::EventMonitor;
use crate::error::RuntimeResult;

pub struct RuntimeClient {
    pub runtime: Arc<dyn ContainerRuntime>,
    events: EventMonitor,
}

impl RuntimeClient {
    pub fn subscribe(&self) -> broadcast::Receiver<ContainerEvent> {
        self.events.subscribe()
    }
}

/// Guards client construction so at most one `DockerRuntime`/`EventMonitor`
/// pair is ever built per socket URI, even under concurrent first-use.
#[derive(Default)]
pub struct RuntimeClientPool {
    clients: DashMap<String, Arc<RuntimeClient>>,
    construct_lock: Mutex<()>,
}

impl RuntimeClientPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shared client for `socket_uri`, connecting and starting its
    /// event dispatcher on first use.
    pub fn get_client(
        &self,
        socket_uri: &str,
        cancel: CancellationToken,
    ) -> RuntimeResult<Arc<RuntimeClient>> {
        if let Some(existing) = self.clients.get(socket_uri) {
            return Ok(existing.clone());
        }

        let _guard = self.construct_lock.lock();

        // Re-check now that we hold the construction lock: another caller may
        // have built and inserted the client while we were waiting for it.
        if let Some(existing) = self.clients.get(socket_uri) {
            return Ok(existing.clone());
        }

        let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::connect(socket_uri)?);
        let events = EventMonitor::spawn(runtime.clone(), cancel);
        let client = Arc::new(RuntimeClient { runtime, events });

        self.clients.insert(socket_uri.to_string(), client.clone());
        Ok(client)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let pool = RuntimeClientPool::new();
        assert_eq!(pool.client_count(), 0);
    }
}
