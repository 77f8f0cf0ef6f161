//! RepoCache - in-memory catalog projection of every synced repository
//!
//! The cache is never authoritative: each repository's entries are rebuilt
//! wholesale from its persisted snapshot on add or update, and evicted
//! wholesale on delete. One `RwLock` guards all maps. Writers hold it for a
//! whole ingest/evict pass; readers only long enough to clone `Arc`s out.
//! Chart downloads in [`RepoCache::get_app_version_with_data`] run with the
//! lock released.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::credentials::RepoCredential;
use crate::error::{RepoError, Result};
use crate::loader::{load_chart, ChartLoader};
use crate::repository::{Repository, RepositoryEvent};
use crate::snapshot::{Application, ChartVersion, Snapshot};

/// Annotation carrying a curated chart's category name
pub const CATEGORY_ANNOTATION: &str = "category";

/// Category id used when a curated chart's category cannot be resolved
pub const UNCATEGORIZED: &str = "ctg-uncategorized";

/// Resolves a category name to its platform id
pub trait CategoryResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<String>;
}

impl CategoryResolver for HashMap<String, String> {
    fn resolve(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// An application as served from the cache
#[derive(Debug, Clone, PartialEq)]
pub struct CachedApplication {
    pub application: Application,
    pub repository: String,
    pub workspace: Option<String>,
    pub builtin: bool,
    /// Category id; curated repositories only
    pub category_id: Option<String>,
    /// Newest parsable version string
    pub latest_version: Option<String>,
}

impl CachedApplication {
    pub fn id(&self) -> &str {
        &self.application.application_id
    }

    pub fn name(&self) -> &str {
        &self.application.name
    }
}

/// A chart version as served from the cache
#[derive(Debug, Clone, PartialEq)]
pub struct CachedVersion {
    pub version: ChartVersion,
    pub application_id: String,
    pub repository: String,
    /// Chart archive bytes, populated on demand
    pub data: Option<Arc<Vec<u8>>>,
}

impl CachedVersion {
    pub fn id(&self) -> &str {
        &self.version.application_version_id
    }
}

/// Filter for the curated store listing
#[derive(Debug, Clone, Default)]
pub struct AppSelector {
    pub category_id: Option<String>,
    /// Case-insensitive substring match on the application name
    pub name_contains: Option<String>,
}

impl AppSelector {
    fn matches(&self, app: &CachedApplication) -> bool {
        if let Some(category) = &self.category_id {
            if app.category_id.as_deref() != Some(category.as_str()) {
                return false;
            }
        }
        if let Some(fragment) = &self.name_contains {
            if !app.name().to_lowercase().contains(&fragment.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub repositories: usize,
    pub applications: usize,
    pub versions: usize,
}

/// What the cache remembers about a repository itself
#[derive(Debug, Clone)]
struct RepoEntry {
    url: String,
    credential: RepoCredential,
    workspace: Option<String>,
    builtin: bool,
    data: String,
    application_ids: Vec<String>,
}

impl RepoEntry {
    fn same_source(&self, repo: &Repository) -> bool {
        self.data == repo.status.data
            && self.url == repo.spec.url
            && self.credential == repo.spec.credential
            && self.workspace == repo.workspace
            && self.builtin == repo.builtin
    }
}

#[derive(Default)]
struct Inner {
    repositories: HashMap<String, RepoEntry>,
    applications: HashMap<String, Arc<CachedApplication>>,
    versions: HashMap<String, Arc<CachedVersion>>,
    /// Application id to version ids, in snapshot order
    application_versions: HashMap<String, Vec<String>>,
    workspace_counts: HashMap<String, usize>,
    category_counts: HashMap<String, usize>,
}

/// In-memory catalog cache
pub struct RepoCache {
    inner: RwLock<Inner>,
    loader: Arc<dyn ChartLoader>,
    categories: Option<Arc<dyn CategoryResolver>>,
}

impl RepoCache {
    pub fn new(loader: Arc<dyn ChartLoader>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            loader,
            categories: None,
        }
    }

    pub fn with_category_resolver(mut self, resolver: Arc<dyn CategoryResolver>) -> Self {
        self.categories = Some(resolver);
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ingest a repository, replacing any entries it already had
    pub fn add_repo(&self, repo: &Repository) -> Result<()> {
        let snapshot = repo.snapshot()?;
        let mut inner = self.write();
        inner.evict(&repo.name);
        self.ingest(&mut inner, repo, snapshot);
        tracing::debug!(repo = %repo.name, "repository cached");
        Ok(())
    }

    pub fn delete_repo(&self, name: &str) {
        let mut inner = self.write();
        if inner.evict(name) {
            tracing::debug!(repo = %name, "repository evicted from cache");
        }
    }

    /// Rebuild a repository's entries unless nothing it was built from changed
    pub fn update_repo(&self, old: &Repository, new: &Repository) -> Result<()> {
        if old.name == new.name {
            let unchanged = self
                .read()
                .repositories
                .get(&new.name)
                .map(|entry| entry.same_source(new))
                .unwrap_or(false);
            if unchanged {
                return Ok(());
            }
        }

        let snapshot = new.snapshot()?;
        let mut inner = self.write();
        inner.evict(&old.name);
        inner.evict(&new.name);
        self.ingest(&mut inner, new, snapshot);
        tracing::debug!(repo = %new.name, "repository cache refreshed");
        Ok(())
    }

    /// Apply a change notification from the repository store
    pub fn apply(&self, event: &RepositoryEvent) -> Result<()> {
        match event {
            RepositoryEvent::Added(repo) => self.add_repo(repo),
            RepositoryEvent::Updated { old, new } => self.update_repo(old, new),
            RepositoryEvent::Deleted(repo) => {
                self.delete_repo(&repo.name);
                Ok(())
            }
        }
    }

    pub fn get_application(&self, id: &str) -> Result<Arc<CachedApplication>> {
        self.read()
            .applications
            .get(id)
            .cloned()
            .ok_or_else(|| RepoError::ApplicationNotFound { id: id.to_string() })
    }

    pub fn get_app_version(&self, id: &str) -> Result<Arc<CachedVersion>> {
        self.read()
            .versions
            .get(id)
            .cloned()
            .ok_or_else(|| RepoError::VersionNotFound { id: id.to_string() })
    }

    /// Like [`get_app_version`](Self::get_app_version), with chart bytes populated
    ///
    /// Missing bytes are downloaded with the lock released and stored back
    /// if the version is still cached afterwards.
    pub async fn get_app_version_with_data(&self, id: &str) -> Result<Arc<CachedVersion>> {
        let (cached, url, credential) = {
            let inner = self.read();
            let cached = inner
                .versions
                .get(id)
                .cloned()
                .ok_or_else(|| RepoError::VersionNotFound { id: id.to_string() })?;
            if cached.data.is_some() {
                return Ok(cached);
            }
            let repo = inner.repositories.get(&cached.repository).ok_or_else(|| {
                RepoError::RepositoryNotFound {
                    name: cached.repository.clone(),
                }
            })?;
            (cached, repo.url.clone(), repo.credential.clone())
        };

        tracing::debug!(version = %id, chart = %cached.version.chart.name, "fetching chart data");
        let bytes = load_chart(self.loader.as_ref(), &url, &cached.version.chart, &credential).await?;

        let mut filled = (*cached).clone();
        filled.data = Some(Arc::new(bytes));
        let filled = Arc::new(filled);

        let mut inner = self.write();
        if let Some(slot) = inner.versions.get_mut(id) {
            if slot.data.is_none() && slot.version == cached.version {
                *slot = filled.clone();
            }
        }
        Ok(filled)
    }

    /// Versions of an application in snapshot order
    pub fn list_app_versions_by_app_id(&self, app_id: &str) -> Result<Vec<Arc<CachedVersion>>> {
        let inner = self.read();
        let ids = inner
            .application_versions
            .get(app_id)
            .ok_or_else(|| RepoError::ApplicationNotFound {
                id: app_id.to_string(),
            })?;
        Ok(ids
            .iter()
            .filter_map(|id| inner.versions.get(id).cloned())
            .collect())
    }

    /// Applications of one repository, sorted by name
    pub fn list_applications_in_repo(&self, repo: &str) -> Result<Vec<Arc<CachedApplication>>> {
        let inner = self.read();
        let entry = inner
            .repositories
            .get(repo)
            .ok_or_else(|| RepoError::RepositoryNotFound {
                name: repo.to_string(),
            })?;
        let mut apps: Vec<_> = entry
            .application_ids
            .iter()
            .filter_map(|id| inner.applications.get(id).cloned())
            .collect();
        apps.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(apps)
    }

    /// Applications of all curated repositories matching `selector`, sorted by name
    pub fn list_applications_in_builtin_repo(
        &self,
        selector: &AppSelector,
    ) -> Vec<Arc<CachedApplication>> {
        let inner = self.read();
        let mut apps: Vec<_> = inner
            .applications
            .values()
            .filter(|app| app.builtin && selector.matches(app))
            .cloned()
            .collect();
        apps.sort_by(|a, b| a.name().cmp(b.name()).then_with(|| a.id().cmp(b.id())));
        apps
    }

    /// Number of charts cached for a workspace
    pub fn chart_count_in_workspace(&self, workspace: &str) -> usize {
        self.read().workspace_counts.get(workspace).copied().unwrap_or(0)
    }

    /// Number of curated applications in a category
    pub fn category_count(&self, category_id: &str) -> usize {
        self.read().category_counts.get(category_id).copied().unwrap_or(0)
    }

    pub fn category_counts(&self) -> BTreeMap<String, usize> {
        self.read()
            .category_counts
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.read();
        CacheStats {
            repositories: inner.repositories.len(),
            applications: inner.applications.len(),
            versions: inner.versions.len(),
        }
    }

    fn category_of(&self, app: &Application) -> String {
        let name = app
            .latest_version()
            .and_then(|v| v.chart.annotations.get(CATEGORY_ANNOTATION));
        match (name, &self.categories) {
            (Some(name), Some(resolver)) => resolver
                .resolve(name)
                .unwrap_or_else(|| UNCATEGORIZED.to_string()),
            _ => UNCATEGORIZED.to_string(),
        }
    }

    fn ingest(&self, inner: &mut Inner, repo: &Repository, snapshot: Snapshot) {
        let mut application_ids = Vec::with_capacity(snapshot.applications.len());

        for (_, app) in snapshot.applications {
            let app_id = app.application_id.clone();
            let category_id = repo.builtin.then(|| self.category_of(&app));
            if let Some(category) = &category_id {
                *inner.category_counts.entry(category.clone()).or_default() += 1;
            }

            let version_ids: Vec<String> = app
                .versions
                .iter()
                .map(|v| v.application_version_id.clone())
                .collect();
            for version in &app.versions {
                inner.versions.insert(
                    version.application_version_id.clone(),
                    Arc::new(CachedVersion {
                        version: version.clone(),
                        application_id: app_id.clone(),
                        repository: repo.name.clone(),
                        data: None,
                    }),
                );
            }

            let latest_version = app.latest_version().map(|v| v.chart.version.clone());
            inner.application_versions.insert(app_id.clone(), version_ids);
            inner.applications.insert(
                app_id.clone(),
                Arc::new(CachedApplication {
                    application: app,
                    repository: repo.name.clone(),
                    workspace: repo.workspace.clone(),
                    builtin: repo.builtin,
                    category_id,
                    latest_version,
                }),
            );
            application_ids.push(app_id);
        }

        if let Some(workspace) = &repo.workspace {
            *inner.workspace_counts.entry(workspace.clone()).or_default() += application_ids.len();
        }

        inner.repositories.insert(
            repo.name.clone(),
            RepoEntry {
                url: repo.spec.url.clone(),
                credential: repo.spec.credential.clone(),
                workspace: repo.workspace.clone(),
                builtin: repo.builtin,
                data: repo.status.data.clone(),
                application_ids,
            },
        );
    }
}

impl Inner {
    /// Remove every entry derived from `name`; returns whether it was cached
    fn evict(&mut self, name: &str) -> bool {
        let Some(entry) = self.repositories.remove(name) else {
            return false;
        };

        for app_id in &entry.application_ids {
            if let Some(app) = self.applications.remove(app_id) {
                if let Some(category) = &app.category_id {
                    decrement(&mut self.category_counts, category, 1);
                }
            }
            for version_id in self.application_versions.remove(app_id).unwrap_or_default() {
                self.versions.remove(&version_id);
            }
        }

        if let Some(workspace) = &entry.workspace {
            decrement(&mut self.workspace_counts, workspace, entry.application_ids.len());
        }
        true
    }
}

fn decrement(counts: &mut HashMap<String, usize>, key: &str, by: usize) {
    if let Some(count) = counts.get_mut(key) {
        *count = count.saturating_sub(by);
        if *count == 0 {
            counts.remove(key);
        }
    }
}
