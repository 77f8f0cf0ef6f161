//! Error types for chartyard-release

use chartyard_repo::RepoError;
use thiserror::Error;

/// Result type for chartyard-release operations
pub type Result<T> = std::result::Result<T, ReleaseError>;

/// Errors that can occur while resolving, deploying or removing a release
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReleaseError {
    /// Release not found
    #[error("release '{name}' not found in namespace '{namespace}'")]
    ReleaseNotFound { name: String, namespace: String },

    /// Status write raced with another writer
    #[error("release '{name}' was modified concurrently (expected version {expected}, found {actual})")]
    UpdateConflict {
        name: String,
        expected: u64,
        actual: u64,
    },

    /// Chart lookup or download through the repository side failed
    #[error(transparent)]
    Repo(#[from] RepoError),

    /// Inline chart payload could not be decoded
    #[error("invalid chart data: {0}")]
    InvalidChart(String),

    /// A curated chart was requested but no object store is wired in
    #[error("object store is not configured, cannot read curated chart '{path}'")]
    ObjectStoreNotConfigured { path: String },

    /// Object store read failed
    #[error("storage error: {0}")]
    Storage(String),

    /// Target cluster is not registered
    #[error("cluster '{name}' not found")]
    ClusterNotFound { name: String },

    /// Cluster resolver failed
    #[error("cluster error: {0}")]
    Cluster(String),

    /// Package manager exited non-zero
    #[error("{command} failed (exit code {}): {stderr}", exit_code(.code))]
    Exec {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Package manager did not finish in time
    #[error("{command} timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },

    /// Post-render manifest transform failed
    #[error("manifest render error: {0}")]
    Render(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_code(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "none".to_string())
}

impl From<serde_json::Error> for ReleaseError {
    fn from(e: serde_json::Error) -> Self {
        ReleaseError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for ReleaseError {
    fn from(e: serde_yaml::Error) -> Self {
        ReleaseError::Render(e.to_string())
    }
}

impl From<base64::DecodeError> for ReleaseError {
    fn from(e: base64::DecodeError) -> Self {
        ReleaseError::InvalidChart(e.to_string())
    }
}

impl ReleaseError {
    /// Referenced release, cluster, repository, application or version is missing
    pub fn is_not_found(&self) -> bool {
        match self {
            ReleaseError::ReleaseNotFound { .. } | ReleaseError::ClusterNotFound { .. } => true,
            ReleaseError::Repo(e) => e.is_not_found(),
            _ => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ReleaseError::UpdateConflict { .. })
    }

    /// Worth retrying without any change to the release object
    pub fn is_transient(&self) -> bool {
        match self {
            ReleaseError::Timeout { .. }
            | ReleaseError::Storage(_)
            | ReleaseError::Cluster(_)
            | ReleaseError::UpdateConflict { .. } => true,
            ReleaseError::Repo(e) => matches!(
                e,
                RepoError::NetworkError { .. }
                    | RepoError::Timeout { .. }
                    | RepoError::HttpError { .. }
                    | RepoError::ObjectStorage { .. }
            ),
            _ => false,
        }
    }
}
