//! Chartyard Repository Side
//!
//! This crate keeps remote chart repositories in sync with the platform's
//! catalog:
//!
//! - **ChartLoader**: fetches index files and chart archives over HTTP(S) or S3
//! - **IndexMerger**: merges a fetched index into an identity-stable snapshot
//! - **RepoIndexSyncer**: schedules and runs fetch, merge and persist passes
//! - **RepoCache**: serves catalog queries from memory
//!
//! ## Key Features
//!
//! - **Stable identifiers**: application and version ids survive re-syncs
//! - **Last good snapshot wins**: a failed sync never overwrites persisted data
//! - **Secure credentials**: auth is never forwarded across origins on redirect
//! - **Integrity**: chart archives are checked against the index digest
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chartyard_core::SyncConfig;
//! use chartyard_repo::{
//!     DefaultChartLoader, MemoryRepositoryStore, RepoCache, RepoIndexSyncer, Repository,
//!     RepositoryStore,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryRepositoryStore::new();
//! store.apply(Repository::new("bitnami", "https://charts.bitnami.com/bitnami"));
//!
//! let loader = Arc::new(DefaultChartLoader::new());
//! let syncer = RepoIndexSyncer::new(Arc::new(store.clone()), loader.clone(), SyncConfig::default());
//! syncer.reconcile("bitnami").await?;
//!
//! let cache = RepoCache::new(loader);
//! cache.add_repo(&store.get("bitnami").await?)?;
//! println!("{:?}", cache.stats());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod credentials;
pub mod error;
pub mod index;
pub mod loader;
pub mod merge;
pub mod repository;
pub mod s3;
pub mod snapshot;
pub mod sync;

// Re-exports for convenience
pub use cache::{
    AppSelector, CacheStats, CachedApplication, CachedVersion, CategoryResolver, RepoCache,
    UNCATEGORIZED,
};
pub use credentials::{RepoCredential, SecureHttpClient};
pub use error::{RepoError, Result};
pub use index::{ChartEntry, Maintainer, RepositoryIndex, index_url, resolve_chart_url};
pub use loader::{ChartLoader, DefaultChartLoader, load_chart, load_index};
pub use merge::{MergeSummary, merge, merge_with_summary};
pub use repository::{
    MemoryRepositoryStore, Repository, RepositoryEvent, RepositorySpec, RepositoryStatus,
    RepositoryStore, SyncRecord, SyncState,
};
pub use snapshot::{Application, ChartVersion, Snapshot};
pub use sync::{RepoIndexSyncer, SyncDecision, SyncOutcome, SyncReason, next_sync};
