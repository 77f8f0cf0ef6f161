//! Chartyard Release Side
//!
//! This crate drives chart releases from their declared spec to a deployed
//! state:
//!
//! - **ChartResolver**: fetches the archive a release points at, from a synced
//!   repository, the curated app store, or inline data
//! - **HelmExecutor**: stages inputs in a private workspace and runs the
//!   package manager as a subprocess
//! - **PostRenderer**: stamps release labels into rendered manifests
//! - **ReleaseReconciler**: one idempotent pass of the release state machine
//!
//! ## Release lifecycle
//!
//! ```text
//! (new) -> Creating -> Active <-> Upgrading
//!              \          |          /
//!               `----> Failed <-----'      (retried with backoff)
//!
//! any state --deletion requested--> Deleting -> (removed)
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chartyard_core::{HelmConfig, ReleaseConfig};
//! use chartyard_release::{
//!     ChartRef, ChartResolver, HelmExecutor, MemoryReleaseStore, PostRenderer, Release,
//!     ReleaseReconciler, TokioProcessExecutor,
//! };
//! use chartyard_repo::{DefaultChartLoader, MemoryRepositoryStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryReleaseStore::new();
//! let key = store
//!     .apply(Release::new(
//!         "prod",
//!         "web",
//!         ChartRef::Inline { name: "web-1.0.0.tgz".into(), data: "H4sI...".into() },
//!     ))
//!     .key();
//!
//! let charts = ChartResolver::new(
//!     Arc::new(MemoryRepositoryStore::new()),
//!     Arc::new(DefaultChartLoader::new()),
//! );
//! let executor = HelmExecutor::from_config(&HelmConfig::default(), Arc::new(TokioProcessExecutor::new()))?;
//! let reconciler = ReleaseReconciler::new(
//!     Arc::new(store),
//!     charts,
//!     executor,
//!     Arc::new(PostRenderer::new()),
//!     ReleaseConfig::default(),
//! );
//!
//! let action = reconciler.reconcile(&key).await?;
//! println!("requeue after {:?}", action.requeue_after());
//! # Ok(())
//! # }
//! ```

pub mod chart_source;
pub mod error;
pub mod executor;
pub mod mock;
pub mod ports;
pub mod postrender;
pub mod process;
pub mod reconciler;
pub mod release;
pub mod store;

// Re-exports for convenience
pub use chart_source::{ChartResolver, app_store_path};
pub use error::{ReleaseError, Result};
pub use executor::{
    ChartData, HelmExecutor, HelmRequest, HelmResult, HelmVerb, MOCK_HELM_SENTINEL,
    RELEASE_NOT_FOUND,
};
pub use mock::mock_helm;
pub use ports::{
    ClusterClient, ClusterInfo, MemoryObjectStore, ObjectStore, S3ObjectStore,
    StaticClusterClient,
};
pub use postrender::{NAMESPACE_LABEL, PostRenderer, RELEASE_LABEL};
pub use process::{
    FakeProcess, Invocation, ProcessCommand, ProcessExecutor, ProcessOutput,
    TokioProcessExecutor,
};
pub use reconciler::{Clock, ReleaseReconciler};
pub use release::{
    ChartRef, DeployRecord, DeployState, Lifecycle, Operation, Release, ReleaseKey,
    ReleaseSpec, ReleaseState, ReleaseStatus,
};
pub use store::{MemoryReleaseStore, OperationCounts, ReleaseStore};
