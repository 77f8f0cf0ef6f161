//! Chart resolution for releases
//!
//! A release names its chart in one of three ways; [`ChartResolver`] turns
//! any of them into archive bytes ready to stage for the package manager.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chartyard_repo::{ChartLoader, RepoError, RepositoryStore, load_chart};
use std::sync::Arc;

use crate::error::{ReleaseError, Result};
use crate::executor::ChartData;
use crate::ports::ObjectStore;
use crate::release::ChartRef;

/// Object path of a curated chart archive
pub fn app_store_path(workspace: &str, version_name: &str) -> String {
    format!("{}/{}", workspace.trim_matches('/'), version_name.trim_start_matches('/'))
}

pub struct ChartResolver {
    repositories: Arc<dyn RepositoryStore>,
    loader: Arc<dyn ChartLoader>,
    object_store: Option<Arc<dyn ObjectStore>>,
}

impl ChartResolver {
    pub fn new(repositories: Arc<dyn RepositoryStore>, loader: Arc<dyn ChartLoader>) -> Self {
        Self {
            repositories,
            loader,
            object_store: None,
        }
    }

    pub fn with_object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }

    /// Fetch the archive a release points at
    pub async fn get_chart_data(&self, chart: &ChartRef) -> Result<ChartData> {
        match chart {
            ChartRef::Repository {
                repository,
                application_id,
                version_id,
            } => {
                let repo = self.repositories.get(repository).await?;
                let snapshot = repo.snapshot()?;
                let version = snapshot.version(application_id, version_id).ok_or_else(|| {
                    RepoError::VersionNotFound {
                        id: version_id.clone(),
                    }
                })?;

                tracing::debug!(
                    repo = %repository,
                    chart = %version.chart.name,
                    version = %version.chart.version,
                    "resolving chart from repository"
                );
                let data =
                    load_chart(self.loader.as_ref(), &repo.spec.url, &version.chart, &repo.spec.credential)
                        .await?;
                Ok(ChartData {
                    name: format!("{}-{}.tgz", version.chart.name, version.chart.version),
                    data,
                })
            }
            ChartRef::AppStore {
                workspace,
                version_name,
            } => {
                let path = app_store_path(workspace, version_name);
                let store = self
                    .object_store
                    .as_ref()
                    .ok_or_else(|| ReleaseError::ObjectStoreNotConfigured { path: path.clone() })?;
                let data = store.read(&path).await?;
                Ok(ChartData {
                    name: archive_name(version_name),
                    data,
                })
            }
            ChartRef::Inline { name, data } => Ok(ChartData {
                name: archive_name(name),
                data: STANDARD.decode(data.trim())?,
            }),
        }
    }
}

fn archive_name(name: &str) -> String {
    let base = name.rsplit('/').next().unwrap_or(name);
    if base.ends_with(".tgz") {
        base.to_string()
    } else {
        format!("{}.tgz", base)
    }
}
