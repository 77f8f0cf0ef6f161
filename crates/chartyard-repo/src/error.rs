//! Error types for repository operations

use thiserror::Error;

/// Repository operation errors
#[derive(Debug, Error)]
pub enum RepoError {
    // ============ Lookup Errors ============
    #[error("Repository not found: {name}")]
    RepositoryNotFound { name: String },

    #[error("Application not found: {id}")]
    ApplicationNotFound { id: String },

    #[error("Application version not found: {id}")]
    VersionNotFound { id: String },

    #[error("Invalid repository URL: {url} - {reason}")]
    InvalidRepositoryUrl { url: String, reason: String },

    // ============ Network Errors ============
    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Request timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Object storage error: {message}")]
    ObjectStorage { message: String },

    // ============ Authentication Errors ============
    #[error("Authentication required for {url}")]
    AuthRequired { url: String },

    #[error("Authentication failed: {message}")]
    AuthFailed { message: String },

    #[error("TLS configuration error: {message}")]
    Tls { message: String },

    // ============ Index Errors ============
    #[error("Index not found at {url}")]
    IndexNotFound { url: String },

    #[error("Invalid index format: {message}")]
    InvalidIndex { message: String },

    #[error("Index parse error: {message}")]
    IndexParseError { message: String },

    // ============ Snapshot Errors ============
    #[error("Snapshot decode error: {message}")]
    SnapshotDecode { message: String },

    #[error("Snapshot encode error: {message}")]
    SnapshotEncode { message: String },

    // ============ Chart Errors ============
    #[error("Chart {name}@{version} has no download URL")]
    NoDownloadUrl { name: String, version: String },

    #[error("Integrity check failed for {name}: expected {expected}, got {actual}")]
    IntegrityCheckFailed {
        name: String,
        expected: String,
        actual: String,
    },

    // ============ Store Errors ============
    #[error("Conflicting update on {name}: expected revision {expected}, found {actual}")]
    UpdateConflict {
        name: String,
        expected: u64,
        actual: u64,
    },

    #[error("Store error: {message}")]
    Store { message: String },

    // ============ IO Errors ============
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for repository operations
pub type Result<T> = std::result::Result<T, RepoError>;

impl RepoError {
    /// Whether a referenced repository, application or version is missing
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RepoError::RepositoryNotFound { .. }
                | RepoError::ApplicationNotFound { .. }
                | RepoError::VersionNotFound { .. }
                | RepoError::IndexNotFound { .. }
        )
    }

    /// Whether a status write lost a race and should be retried
    pub fn is_conflict(&self) -> bool {
        matches!(self, RepoError::UpdateConflict { .. })
    }
}

impl From<reqwest::Error> for RepoError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RepoError::Timeout { seconds: 30 }
        } else if e.is_connect() {
            RepoError::NetworkError {
                message: format!("Connection failed: {}", e),
            }
        } else if let Some(status) = e.status() {
            RepoError::HttpError {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            RepoError::NetworkError {
                message: e.to_string(),
            }
        }
    }
}

impl From<serde_yaml::Error> for RepoError {
    fn from(e: serde_yaml::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(e: serde_json::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

impl From<url::ParseError> for RepoError {
    fn from(e: url::ParseError) -> Self {
        RepoError::InvalidRepositoryUrl {
            url: String::new(),
            reason: e.to_string(),
        }
    }
}
