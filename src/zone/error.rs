//! Errors surfaced by zone creation and destruction.

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::config::ConfigError;
use crate::keys::KeyError;
use crate::remote::RemoteError;
use crate::render::RenderError;
use crate::state::StateStoreError;

/// Fatal failures of a create or destroy invocation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ZoneError {
    /// A template, key or parameter is malformed or unusable.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A required command on the zone host failed.
    #[error("remote execution failed: {0}")]
    RemoteExecution(#[source] RemoteError),
    /// The zone did not become reachable within its boot budget.
    #[error("zone not ready after {attempts} attempts of `{command}`")]
    ReadinessTimeout {
        /// Command that was polled.
        command: String,
        /// Number of attempts made.
        attempts: u32,
    },
    /// A referenced template or artifact does not exist.
    #[error("resource not found: {path}")]
    ResourceNotFound {
        /// Missing file.
        path: Utf8PathBuf,
    },
    /// Progress could not be recorded.
    #[error("failed to persist state: {0}")]
    StatePersistence(#[from] StateStoreError),
}

impl From<RemoteError> for ZoneError {
    fn from(value: RemoteError) -> Self {
        match value {
            RemoteError::Timeout {
                command, attempts, ..
            } => Self::ReadinessTimeout { command, attempts },
            other => Self::RemoteExecution(other),
        }
    }
}

impl From<RenderError> for ZoneError {
    fn from(value: RenderError) -> Self {
        match value {
            RenderError::TemplateNotFound { path } => Self::ResourceNotFound { path },
            other => Self::Configuration(other.to_string()),
        }
    }
}

impl From<KeyError> for ZoneError {
    fn from(value: KeyError) -> Self {
        match value {
            KeyError::Missing(path) => Self::ResourceNotFound { path },
            other => Self::Configuration(other.to_string()),
        }
    }
}

impl From<ConfigError> for ZoneError {
    fn from(value: ConfigError) -> Self {
        Self::Configuration(value.to_string())
    }
}
