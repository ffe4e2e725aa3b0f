//! Narrow container-runtime interface and the Docker adapter implementing it.
//!
//! Everything above this module only ever talks through [`ContainerRuntime`];
//! porting to a different runtime means writing one more impl of this trait.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{ListContainersOptions, StartContainerOptions, StopContainerOptions};
use bollard::system::EventsOptions;
use bollard::Docker;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;

use crate::error::{RuntimeError, RuntimeResult};

#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub names: Vec<String>,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct ContainerState {
    pub running: bool,
    pub paused: bool,
    pub health: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ContainerEvent {
    pub kind: String,
    pub id: String,
    pub status: String,
}

/// The entire porting surface for a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn list_containers(&self, all: bool) -> RuntimeResult<Vec<ContainerInfo>>;
    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerState>;
    async fn pause_container(&self, id: &str) -> RuntimeResult<()>;
    async fn unpause_container(&self, id: &str) -> RuntimeResult<()>;
    /// Returns `true` if a start was actually issued (the container was not already running).
    async fn start_container(&self, id: &str) -> RuntimeResult<bool>;
    async fn stop_container(&self, id: &str) -> RuntimeResult<()>;
    fn monitor_events(&self) -> BoxStream<'static, ContainerEvent>;
}

/// Docker adapter, one per unique socket URI (see [`super::pool::RuntimeClientPool`]).
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect(socket_uri: &str) -> RuntimeResult<Self> {
        let docker = if let Some(path) = socket_uri.strip_prefix("unix://") {
            Docker::connect_with_unix(path, 120, bollard::API_DEFAULT_VERSION)?
        } else {
            Docker::connect_with_http(socket_uri, 120, bollard::API_DEFAULT_VERSION)?
        };
        Ok(Self { docker })
    }

    fn not_found(err: bollard::errors::Error, id: &str) -> RuntimeError {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            } => RuntimeError::ContainerNotFound(id.to_string()),
            other => RuntimeError::Docker(other),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self, all: bool) -> RuntimeResult<Vec<ContainerInfo>> {
        let options = ListContainersOptions::<String> {
            all,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(options)).await?;
        Ok(containers
            .into_iter()
            .map(|c| ContainerInfo {
                id: c.id.unwrap_or_default(),
                names: c.names.unwrap_or_default(),
                labels: c.labels.unwrap_or_default(),
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerState> {
        let details = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(|e| Self::not_found(e, id))?;
        let state = details.state.unwrap_or_default();
        let health = state
            .health
            .and_then(|h| h.status)
            .map(|s| s.to_string());
        Ok(ContainerState {
            running: state.running.unwrap_or(false),
            paused: state.paused.unwrap_or(false),
            health,
        })
    }

    async fn pause_container(&self, id: &str) -> RuntimeResult<()> {
        self.docker
            .pause_container(id)
            .await
            .map_err(|e| Self::not_found(e, id))
    }

    async fn unpause_container(&self, id: &str) -> RuntimeResult<()> {
        self.docker
            .unpause_container(id)
            .await
            .map_err(|e| Self::not_found(e, id))
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<bool> {
        let state = self.inspect_container(id).await?;
        if state.running {
            return Ok(false);
        }
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Self::not_found(e, id))?;
        Ok(true)
    }

    async fn stop_container(&self, id: &str) -> RuntimeResult<()> {
        let options = StopContainerOptions { t: 30 };
        match self.docker.stop_container(id, Some(options)).await {
            Ok(_) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()), // already stopped
            Err(e) => Err(Self::not_found(e, id)),
        }
    }

    fn monitor_events(&self) -> BoxStream<'static, ContainerEvent> {
        let options = EventsOptions::<String> {
            filters: HashMap::from([("type".to_string(), vec!["container".to_string()])]),
            ..Default::default()
        };
        self.docker
            .events(Some(options))
            .filter_map(|item| async move {
                let message = item.ok()?;
                Some(ContainerEvent {
                    kind: message.typ.map(|t| format!("{t:?}")).unwrap_or_default(),
                    id: message
                        .actor
                        .and_then(|a| a.id)
                        .unwrap_or_default(),
                    status: message.action.unwrap_or_default(),
                })
            })
            .boxed()
    }
}
