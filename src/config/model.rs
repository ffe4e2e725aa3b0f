//! Application configuration: JSON document describing one or more proxied services.

use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;

use super::duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Tcp
    }
}

impl<'de> Deserialize<'de> for Protocol {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        match raw.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(D::Error::custom(format!("unknown protocol {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InactiveAction {
    Pause,
    Stop,
}

impl Default for InactiveAction {
    fn default() -> Self {
        InactiveAction::Pause
    }
}

impl<'de> Deserialize<'de> for InactiveAction {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        match raw.to_ascii_lowercase().as_str() {
            "pause" => Ok(InactiveAction::Pause),
            "stop" => Ok(InactiveAction::Stop),
            other => Err(D::Error::custom(format!("unknown inactive action {other:?}"))),
        }
    }
}

fn default_socket_uri() -> String {
    "unix:///var/run/docker.sock".to_string()
}

fn default_apply_to_compose_group() -> bool {
    true
}

fn default_target_address() -> String {
    "127.0.0.1".to_string()
}

fn default_inactive_after() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_check_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_startup_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_healthcheck_interval() -> Duration {
    Duration::from_secs(1)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApplicationConfig {
    #[serde(default = "default_socket_uri")]
    pub socket_uri: String,

    #[serde(rename = "DockerContainerName")]
    pub container_name: String,

    #[serde(default = "default_apply_to_compose_group")]
    pub apply_to_compose_group: bool,

    #[serde(default)]
    pub protocol: Protocol,

    pub listen_port: u16,

    #[serde(default = "default_target_address")]
    pub target_address: String,

    pub target_port: u16,

    #[serde(default = "default_inactive_after", with = "duration")]
    pub inactive_after: Duration,

    #[serde(default = "default_check_interval", with = "duration")]
    pub check_interval: Duration,

    #[serde(default)]
    pub inactive_action: InactiveAction,

    #[serde(default = "default_startup_delay", with = "duration")]
    pub startup_delay: Duration,

    #[serde(default)]
    pub healthcheck_enabled: bool,

    #[serde(default = "default_healthcheck_interval", with = "duration")]
    pub healthcheck_interval: Duration,
}

impl ApplicationConfig {
    fn validate(&self, index: usize) -> Result<(), ConfigError> {
        if self.container_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                index,
                container_name: self.container_name.clone(),
                message: "DockerContainerName must not be empty".to_string(),
            });
        }
        if self.listen_port == 0 {
            return Err(ConfigError::Invalid {
                index,
                container_name: self.container_name.clone(),
                message: "ListenPort must be non-zero".to_string(),
            });
        }
        if self.target_port == 0 {
            return Err(ConfigError::Invalid {
                index,
                container_name: self.container_name.clone(),
                message: "TargetPort must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Configuration {
    pub applications: Vec<ApplicationConfig>,
}

impl Configuration {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let config: Configuration =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.applications.is_empty() {
            return Err(ConfigError::Empty);
        }
        for (index, app) in self.applications.iter().enumerate() {
            app.validate(index)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_minimal_application() {
        let file = write_config(
            r#"{
                "Applications": [
                    { "DockerContainerName": "web", "ListenPort": 8080, "TargetPort": 80 }
                ]
            }"#,
        );
        let config = Configuration::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.applications.len(), 1);
        let app = &config.applications[0];
        assert_eq!(app.container_name, "web");
        assert_eq!(app.protocol, Protocol::Tcp);
        assert_eq!(app.inactive_after, Duration::from_secs(600));
        assert!(app.apply_to_compose_group);
    }

    #[test]
    fn rejects_missing_container_name() {
        let file = write_config(
            r#"{
                "Applications": [
                    { "DockerContainerName": "", "ListenPort": 8080, "TargetPort": 80 }
                ]
            }"#,
        );
        assert!(Configuration::load(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn rejects_empty_application_list() {
        let file = write_config(r#"{ "Applications": [] }"#);
        assert!(matches!(
            Configuration::load(file.path().to_str().unwrap()),
            Err(ConfigError::Empty)
        ));
    }

    #[test]
    fn parses_custom_durations() {
        let file = write_config(
            r#"{
                "Applications": [
                    {
                        "DockerContainerName": "web",
                        "ListenPort": 8080,
                        "TargetPort": 80,
                        "InactiveAfter": "00:00:30",
                        "InactiveAction": "Stop"
                    }
                ]
            }"#,
        );
        let config = Configuration::load(file.path().to_str().unwrap()).unwrap();
        let app = &config.applications[0];
        assert_eq!(app.inactive_after, Duration::from_secs(30));
        assert_eq!(app.inactive_action, InactiveAction::Stop);
    }

    #[test]
    fn enum_values_are_case_insensitive() {
        let file = write_config(
            r#"{
                "Applications": [
                    {
                        "DockerContainerName": "web",
                        "ListenPort": 8080,
                        "TargetPort": 80,
                        "Protocol": "udp",
                        "InactiveAction": "pause"
                    }
                ]
            }"#,
        );
        let config = Configuration::load(file.path().to_str().unwrap()).unwrap();
        let app = &config.applications[0];
        assert_eq!(app.protocol, Protocol::Udp);
        assert_eq!(app.inactive_action, InactiveAction::Pause);
    }
}
