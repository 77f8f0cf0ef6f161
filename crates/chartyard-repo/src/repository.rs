//! Repository objects and the storage port they are persisted through
//!
//! A `Repository` is created by an operator and owned by the external
//! resource layer. This crate only reads its spec and writes its status,
//! always through a [`RepositoryStore`]. The in-memory store doubles as the
//! test backend and as the change-notification source for the cache.

use async_trait::async_trait;
use chartyard_core::{Attempt, HistoryLog};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::credentials::RepoCredential;
use crate::error::{RepoError, Result};
use crate::snapshot::Snapshot;

/// A remote chart catalog tracked by the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub name: String,

    /// Owning workspace; `None` for platform-wide repositories
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,

    /// Curated repository whose applications appear in the global store
    #[serde(default)]
    pub builtin: bool,

    /// Optimistic concurrency token, bumped by the store on every write
    #[serde(default)]
    pub resource_version: u64,

    pub spec: RepositorySpec,

    #[serde(default)]
    pub status: RepositoryStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySpec {
    pub url: String,

    #[serde(default)]
    pub credential: RepoCredential,

    /// Zero disables periodic syncing
    #[serde(default, with = "humantime_serde")]
    pub sync_period: Duration,

    /// Bumped by the operator to request an immediate sync
    #[serde(default)]
    pub sync_request: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryStatus {
    /// Encoded [`Snapshot`]
    #[serde(default)]
    pub data: String,

    #[serde(default)]
    pub sync_history: HistoryLog<SyncRecord>,

    /// Last `spec.syncRequest` value a sync pass acted on
    #[serde(default)]
    pub observed_sync_request: u64,

    #[serde(default)]
    pub total_applications: usize,

    #[serde(default)]
    pub total_versions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Successful,
    Failed,
}

/// One sync attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    pub state: SyncState,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    pub time: DateTime<Utc>,
}

impl SyncRecord {
    pub fn success(message: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            state: SyncState::Successful,
            message: message.into(),
            time,
        }
    }

    pub fn failure(message: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            state: SyncState::Failed,
            message: message.into(),
            time,
        }
    }
}

impl Attempt for SyncRecord {
    fn is_failure(&self) -> bool {
        self.state == SyncState::Failed
    }

    fn time(&self) -> DateTime<Utc> {
        self.time
    }
}

impl Repository {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workspace: None,
            builtin: false,
            resource_version: 0,
            spec: RepositorySpec {
                url: url.into(),
                ..Default::default()
            },
            status: RepositoryStatus::default(),
        }
    }

    pub fn with_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn with_credential(mut self, credential: RepoCredential) -> Self {
        self.spec.credential = credential;
        self
    }

    pub fn with_sync_period(mut self, period: Duration) -> Self {
        self.spec.sync_period = period;
        self
    }

    pub fn builtin(mut self) -> Self {
        self.builtin = true;
        self
    }

    /// Decode the persisted snapshot
    pub fn snapshot(&self) -> Result<Snapshot> {
        Snapshot::decode(&self.status.data)
    }

    /// An on-demand sync has been requested and not yet acted on
    pub fn sync_requested(&self) -> bool {
        self.spec.sync_request > self.status.observed_sync_request
    }

    /// Ask for a sync pass on the next reconcile
    pub fn request_sync(&mut self) {
        self.spec.sync_request = self.status.observed_sync_request.max(self.spec.sync_request) + 1;
    }

    /// Outcome of the most recent sync attempt
    pub fn last_sync(&self) -> Option<&SyncRecord> {
        self.status.sync_history.latest()
    }
}

/// Change notification delivered to cache consumers
#[derive(Debug, Clone)]
pub enum RepositoryEvent {
    Added(Repository),
    Updated { old: Repository, new: Repository },
    Deleted(Repository),
}

/// Storage port for repository objects
#[async_trait]
pub trait RepositoryStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Repository>;

    async fn list(&self) -> Result<Vec<Repository>>;

    /// Write `repository.status`, failing with `UpdateConflict` if the
    /// stored object moved past `repository.resource_version`
    async fn update_status(&self, repository: &Repository) -> Result<Repository>;
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone)]
pub struct OperationCounts {
    pub gets: usize,
    pub lists: usize,
    pub status_updates: usize,
    pub conflicts: usize,
}

/// In-memory repository store
#[derive(Clone)]
pub struct MemoryRepositoryStore {
    repositories: Arc<RwLock<BTreeMap<String, Repository>>>,
    operations: Arc<RwLock<OperationCounts>>,
    events: broadcast::Sender<RepositoryEvent>,
}

impl MemoryRepositoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            repositories: Arc::new(RwLock::new(BTreeMap::new())),
            operations: Arc::new(RwLock::new(OperationCounts::default())),
            events,
        }
    }

    pub fn with_repositories(repositories: Vec<Repository>) -> Self {
        let store = Self::new();
        for repository in repositories {
            store.apply(repository);
        }
        store
    }

    /// Receive add/update/delete notifications from this point on
    pub fn subscribe(&self) -> broadcast::Receiver<RepositoryEvent> {
        self.events.subscribe()
    }

    /// Create or replace a repository as an operator would
    pub fn apply(&self, mut repository: Repository) -> Repository {
        let mut repos = self.repositories.write().unwrap_or_else(PoisonError::into_inner);
        let previous = repos.get(&repository.name).cloned();
        repository.resource_version = previous.as_ref().map(|p| p.resource_version).unwrap_or(0) + 1;
        repos.insert(repository.name.clone(), repository.clone());
        drop(repos);

        let event = match previous {
            Some(old) => RepositoryEvent::Updated {
                old,
                new: repository.clone(),
            },
            None => RepositoryEvent::Added(repository.clone()),
        };
        let _ = self.events.send(event);
        repository
    }

    pub fn delete(&self, name: &str) -> Option<Repository> {
        let removed = self
            .repositories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        if let Some(repository) = &removed {
            let _ = self.events.send(RepositoryEvent::Deleted(repository.clone()));
        }
        removed
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

impl Default for MemoryRepositoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RepositoryStore for MemoryRepositoryStore {
    async fn get(&self, name: &str) -> Result<Repository> {
        self.count(|ops| ops.gets += 1);

        self.repositories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| RepoError::RepositoryNotFound {
                name: name.to_string(),
            })
    }

    async fn list(&self) -> Result<Vec<Repository>> {
        self.count(|ops| ops.lists += 1);

        Ok(self
            .repositories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }

    async fn update_status(&self, repository: &Repository) -> Result<Repository> {
        self.count(|ops| ops.status_updates += 1);

        let mut repos = self.repositories.write().unwrap_or_else(PoisonError::into_inner);
        let current = repos
            .get_mut(&repository.name)
            .ok_or_else(|| RepoError::RepositoryNotFound {
                name: repository.name.clone(),
            })?;

        if current.resource_version != repository.resource_version {
            let err = RepoError::UpdateConflict {
                name: repository.name.clone(),
                expected: repository.resource_version,
                actual: current.resource_version,
            };
            drop(repos);
            self.count(|ops| ops.conflicts += 1);
            return Err(err);
        }

        let old = current.clone();
        current.status = repository.status.clone();
        current.resource_version += 1;
        let updated = current.clone();
        drop(repos);

        let _ = self.events.send(RepositoryEvent::Updated {
            old,
            new: updated.clone(),
        });
        Ok(updated)
    }
}
