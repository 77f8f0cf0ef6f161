//! Chartyard Core - shared primitives for the chart delivery engine
//!
//! This crate provides the building blocks used by both the repository and
//! the release side of Chartyard:
//! - `HistoryLog`: bounded, newest-first attempt history stored on objects
//! - `backoff`: retry scheduling for repository syncs and release deploys
//! - `ids`: platform-assigned identifiers for applications and versions
//! - `ChartyardConfig`: daemon configuration loaded from YAML

pub mod action;
pub mod backoff;
pub mod config;
pub mod error;
pub mod history;
pub mod ids;
pub mod text;

pub use action::Action;
pub use backoff::{release_retry_after, remaining, sync_retry_after, sync_period};
pub use config::{ChartyardConfig, HelmConfig, ObjectStoreConfig, ReleaseConfig, SyncConfig};
pub use error::{CoreError, Result};
pub use history::{Attempt, HistoryLog, DEFAULT_HISTORY_CAP};
pub use ids::{new_id, APP_ID_PREFIX, VERSION_ID_PREFIX};
pub use text::truncate;
