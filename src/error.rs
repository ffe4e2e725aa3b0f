use thiserror::Error;

/// Errors surfaced while loading and validating the configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("application #{index} ({container_name:?}): {message}")]
    Invalid {
        index: usize,
        container_name: String,
        message: String,
    },

    #[error("no applications configured")]
    Empty,
}

/// Errors from the container-runtime adapter.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("container not found: {0}")]
    ContainerNotFound(String),
}

pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Errors from a single engine's background machinery.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to bind listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
