//! CLI error types with exit code handling
//!
//! Library errors are folded into a small set of user-facing categories,
//! each mapped to an exit code.

use chartyard_core::CoreError;
use chartyard_release::ReleaseError;
use chartyard_repo::RepoError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// Repository fetch, parse or merge failed
    #[error("Sync failed: {message}")]
    #[diagnostic(code(chartyard::cli::sync))]
    Sync {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Release rendering or package-manager invocation failed
    #[error("Release error: {message}")]
    #[diagnostic(code(chartyard::cli::release))]
    Release {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(chartyard::cli::config))]
    Config { message: String },

    /// Invalid arguments
    #[error("{message}")]
    #[diagnostic(code(chartyard::cli::usage))]
    Input { message: String },

    #[error("IO error: {message}")]
    #[diagnostic(code(chartyard::cli::io))]
    Io { message: String },

    #[error("Internal error: {message}")]
    #[diagnostic(code(chartyard::cli::internal))]
    Internal { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Sync { .. } => exit_codes::SYNC_ERROR,
            CliError::Release { .. } => exit_codes::RELEASE_ERROR,
            CliError::Config { .. } => exit_codes::CONFIG_ERROR,
            CliError::Input { .. } => exit_codes::USAGE_ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Internal { .. } => exit_codes::ERROR,
        }
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        CliError::Config {
            message: err.to_string(),
        }
    }
}

impl From<RepoError> for CliError {
    fn from(err: RepoError) -> Self {
        let help = match &err {
            RepoError::AuthRequired { .. } | RepoError::AuthFailed { .. } => {
                Some("Pass --username and --password for protected repositories".to_string())
            }
            RepoError::Tls { .. } => {
                Some("Check --ca-file, or pass --insecure-skip-tls-verify for testing".to_string())
            }
            _ => None,
        };
        CliError::Sync {
            message: err.to_string(),
            help,
        }
    }
}

impl From<ReleaseError> for CliError {
    fn from(err: ReleaseError) -> Self {
        let help = match &err {
            ReleaseError::Exec { .. } => {
                Some("Run with --debug to pass --debug to the package manager".to_string())
            }
            ReleaseError::InvalidConfig(_) => {
                Some("Set helm.binary in the config file, or pass --mock".to_string())
            }
            _ => None,
        };
        CliError::Release {
            message: err.to_string(),
            help,
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
