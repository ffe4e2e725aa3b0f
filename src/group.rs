//! Container Group Resolver: expands a configured container name into the
//! set of container IDs a lifecycle action applies to.

use tracing::debug;

use crate::error::RuntimeResult;
use crate::runtime::ContainerRuntime;

const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";

/// Resolves `container_name` to the ordered list of container IDs to act on:
/// the base container first, then (if `apply_to_compose_group`) every other
/// container sharing its compose-project label.
pub async fn resolve(
    runtime: &dyn ContainerRuntime,
    container_name: &str,
    apply_to_compose_group: bool,
) -> RuntimeResult<Vec<String>> {
    let containers = runtime.list_containers(true).await?;
    let needle = format!("/{container_name}");

    let base = containers
        .iter()
        .find(|c| c.names.iter().any(|n| n == &needle || n.ends_with(&needle)));

    let Some(base) = base else {
        debug!(container_name, "container group resolver found no match");
        return Ok(Vec::new());
    };

    let mut ids = vec![base.id.clone()];

    if apply_to_compose_group {
        if let Some(project) = base.labels.get(COMPOSE_PROJECT_LABEL) {
            for other in &containers {
                if other.id == base.id {
                    continue;
                }
                if other.labels.get(COMPOSE_PROJECT_LABEL) == Some(project) {
                    ids.push(other.id.clone());
                }
            }
        }
    }

    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures_util::stream::{self, BoxStream};
    use futures_util::StreamExt;
    use std::collections::HashMap;

    use crate::error::RuntimeResult as Result_;
    use crate::runtime::{ContainerEvent, ContainerInfo, ContainerState};

    struct FakeRuntime {
        containers: Vec<ContainerInfo>,
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn list_containers(&self, _all: bool) -> Result_<Vec<ContainerInfo>> {
            Ok(self.containers.clone())
        }
        async fn inspect_container(&self, _id: &str) -> Result_<ContainerState> {
            Ok(ContainerState::default())
        }
        async fn pause_container(&self, _id: &str) -> Result_<()> {
            Ok(())
        }
        async fn unpause_container(&self, _id: &str) -> Result_<()> {
            Ok(())
        }
        async fn start_container(&self, _id: &str) -> Result_<bool> {
            Ok(true)
        }
        async fn stop_container(&self, _id: &str) -> Result_<()> {
            Ok(())
        }
        fn monitor_events(&self) -> BoxStream<'static, ContainerEvent> {
            stream::empty().boxed()
        }
    }

    fn container(id: &str, name: &str, project: Option<&str>) -> ContainerInfo {
        let mut labels = HashMap::new();
        if let Some(project) = project {
            labels.insert("com.docker.compose.project".to_string(), project.to_string());
        }
        ContainerInfo {
            id: id.to_string(),
            names: vec![format!("/{name}")],
            labels,
        }
    }

    #[tokio::test]
    async fn resolves_base_only_without_group() {
        let runtime = FakeRuntime {
            containers: vec![container("abc", "web", Some("proj"))],
        };
        let ids = resolve(&runtime, "web", false).await.unwrap();
        assert_eq!(ids, vec!["abc".to_string()]);
    }

    #[tokio::test]
    async fn resolves_compose_group() {
        let runtime = FakeRuntime {
            containers: vec![
                container("abc", "web", Some("proj")),
                container("def", "db", Some("proj")),
                container("xyz", "unrelated", Some("other")),
            ],
        };
        let ids = resolve(&runtime, "web", true).await.unwrap();
        assert_eq!(ids, vec!["abc".to_string(), "def".to_string()]);
    }

    #[tokio::test]
    async fn missing_container_yields_empty() {
        let runtime = FakeRuntime { containers: vec![] };
        let ids = resolve(&runtime, "ghost", true).await.unwrap();
        assert!(ids.is_empty());
    }
}
