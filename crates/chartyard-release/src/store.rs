//! Storage port for release objects
//!
//! The reconciler never owns persistence. It reads a release, writes its
//! status with optimistic concurrency, and finalizes it once cleanup is done.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{ReleaseError, Result};
use crate::release::{Lifecycle, Release, ReleaseKey};

#[async_trait]
pub trait ReleaseStore: Send + Sync {
    async fn get(&self, key: &ReleaseKey) -> Result<Release>;

    async fn list(&self) -> Result<Vec<Release>>;

    /// Write `release.status`, failing with `UpdateConflict` if the stored
    /// object moved past `release.resource_version`
    async fn update_status(&self, release: &Release) -> Result<Release>;

    /// Mark the release for deletion; cleanup happens on the next reconcile
    async fn request_deletion(&self, key: &ReleaseKey) -> Result<()>;

    /// Cleanup finished; remove the object
    async fn finalize(&self, key: &ReleaseKey) -> Result<()>;
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone)]
pub struct OperationCounts {
    pub gets: usize,
    pub lists: usize,
    pub status_updates: usize,
    pub deletion_requests: usize,
    pub finalizations: usize,
}

/// In-memory release store for tests and single-process use
#[derive(Clone)]
pub struct MemoryReleaseStore {
    releases: Arc<RwLock<BTreeMap<ReleaseKey, Release>>>,
    operations: Arc<RwLock<OperationCounts>>,
}

impl MemoryReleaseStore {
    pub fn new() -> Self {
        Self {
            releases: Arc::new(RwLock::new(BTreeMap::new())),
            operations: Arc::new(RwLock::new(OperationCounts::default())),
        }
    }

    pub fn with_releases(releases: Vec<Release>) -> Self {
        let store = Self::new();
        for release in releases {
            store.apply(release);
        }
        store
    }

    /// Create a release or replace its spec, as a user would
    pub fn apply(&self, mut release: Release) -> Release {
        let mut releases = self.releases.write().unwrap_or_else(PoisonError::into_inner);
        let key = release.key();
        if let Some(existing) = releases.get(&key) {
            release.status = existing.status.clone();
            release.lifecycle = existing.lifecycle;
            release.resource_version = existing.resource_version + 1;
        } else {
            release.resource_version = 1;
        }
        releases.insert(key, release.clone());
        release
    }

    /// Peek at a release without counting the read
    pub fn peek(&self, key: &ReleaseKey) -> Option<Release> {
        self.releases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn release_count(&self) -> usize {
        self.releases.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn operation_counts(&self) -> OperationCounts {
        self.operations.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn reset_counts(&self) {
        *self.operations.write().unwrap_or_else(PoisonError::into_inner) = OperationCounts::default();
    }

    fn count(&self, f: impl FnOnce(&mut OperationCounts)) {
        f(&mut self.operations.write().unwrap_or_else(PoisonError::into_inner));
    }
}

impl Default for MemoryReleaseStore {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(key: &ReleaseKey) -> ReleaseError {
    ReleaseError::ReleaseNotFound {
        name: key.name.clone(),
        namespace: key.namespace.clone(),
    }
}

#[async_trait]
impl ReleaseStore for MemoryReleaseStore {
    async fn get(&self, key: &ReleaseKey) -> Result<Release> {
        self.count(|ops| ops.gets += 1);
        self.peek(key).ok_or_else(|| not_found(key))
    }

    async fn list(&self) -> Result<Vec<Release>> {
        self.count(|ops| ops.lists += 1);
        Ok(self
            .releases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }

    async fn update_status(&self, release: &Release) -> Result<Release> {
        self.count(|ops| ops.status_updates += 1);

        let key = release.key();
        let mut releases = self.releases.write().unwrap_or_else(PoisonError::into_inner);
        let current = releases.get_mut(&key).ok_or_else(|| not_found(&key))?;
        if current.resource_version != release.resource_version {
            return Err(ReleaseError::UpdateConflict {
                name: key.to_string(),
                expected: release.resource_version,
                actual: current.resource_version,
            });
        }

        current.status = release.status.clone();
        current.resource_version += 1;
        Ok(current.clone())
    }

    async fn request_deletion(&self, key: &ReleaseKey) -> Result<()> {
        self.count(|ops| ops.deletion_requests += 1);

        let mut releases = self.releases.write().unwrap_or_else(PoisonError::into_inner);
        let current = releases.get_mut(key).ok_or_else(|| not_found(key))?;
        if current.lifecycle == Lifecycle::Active {
            current.lifecycle = Lifecycle::Terminating;
            current.resource_version += 1;
        }
        Ok(())
    }

    async fn finalize(&self, key: &ReleaseKey) -> Result<()> {
        self.count(|ops| ops.finalizations += 1);

        let mut releases = self.releases.write().unwrap_or_else(PoisonError::into_inner);
        match releases.get_mut(key) {
            Some(release) if release.lifecycle == Lifecycle::Terminating => {
                release.lifecycle = Lifecycle::Terminated;
                releases.remove(key);
                Ok(())
            }
            Some(_) => Err(ReleaseError::Storage(format!(
                "release '{}' cannot be finalized before deletion is requested",
                key
            ))),
            None => Err(not_found(key)),
        }
    }
}
