//! Collaborator ports: curated chart storage and cluster resolution

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use chartyard_core::ObjectStoreConfig;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::error::{ReleaseError, Result};

/// Read-only access to the curated app store's chart archives
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn read(&self, path: &str) -> Result<Vec<u8>>;
}

/// S3-compatible object store
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl S3ObjectStore {
    /// Build a client from configuration, falling back to ambient AWS
    /// credentials when no explicit key pair is given
    pub async fn from_config(config: &ObjectStoreConfig) -> Result<Self> {
        if config.access_key_id.is_some() != config.secret_access_key.is_some() {
            return Err(ReleaseError::InvalidConfig(
                "object store requires both accessKeyId and secretAccessKey when either is set"
                    .to_string(),
            ));
        }

        let region = config
            .region
            .clone()
            .unwrap_or_else(|| chartyard_repo::s3::DEFAULT_S3_REGION.to_string());
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(region))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            builder = builder.credentials_provider(aws_sdk_s3::config::Credentials::new(
                key_id.clone(),
                secret.clone(),
                None,
                None,
                "chartyard-config",
            ));
        }
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        tracing::debug!(bucket = %self.bucket, key = %path, "reading curated chart");
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| {
                ReleaseError::Storage(format!(
                    "read {}/{}: {}",
                    self.bucket,
                    path,
                    aws_sdk_s3::error::DisplayErrorContext(&e)
                ))
            })?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| ReleaseError::Storage(e.to_string()))?
            .into_bytes();
        Ok(bytes.to_vec())
    }
}

/// Object store backed by a map, for tests and local runs
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<String>, data: Vec<u8>) {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), data);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| ReleaseError::Storage(format!("object '{}' not found", path)))
    }
}

/// Connection info for a member cluster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterInfo {
    pub name: String,
    /// Kubeconfig contents; empty means the local context
    pub kubeconfig: String,
}

/// Resolves cluster names to connection info
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// `Ok(None)` when the cluster is not (or no longer) registered
    async fn get(&self, name: &str) -> Result<Option<ClusterInfo>>;
}

/// Fixed set of clusters, for tests and single-cluster setups
#[derive(Debug, Default)]
pub struct StaticClusterClient {
    clusters: RwLock<HashMap<String, ClusterInfo>>,
}

impl StaticClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, kubeconfig: impl Into<String>) {
        let name = name.into();
        let info = ClusterInfo {
            name: name.clone(),
            kubeconfig: kubeconfig.into(),
        };
        self.clusters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, info);
    }

    pub fn remove(&self, name: &str) -> Option<ClusterInfo> {
        self.clusters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }
}

#[async_trait]
impl ClusterClient for StaticClusterClient {
    async fn get(&self, name: &str) -> Result<Option<ClusterInfo>> {
        Ok(self
            .clusters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_object_store() {
        let store = MemoryObjectStore::new();
        store.insert("team-a/web-1.0.0", b"archive".to_vec());

        assert_eq!(store.read("team-a/web-1.0.0").await.unwrap(), b"archive");
        assert!(matches!(
            store.read("team-a/missing").await.unwrap_err(),
            ReleaseError::Storage(_)
        ));
    }

    #[tokio::test]
    async fn test_static_clusters() {
        let clusters = StaticClusterClient::new();
        clusters.insert("edge-1", "apiVersion: v1\nkind: Config\n");

        let info = clusters.get("edge-1").await.unwrap().unwrap();
        assert!(info.kubeconfig.contains("kind: Config"));

        clusters.remove("edge-1");
        assert!(clusters.get("edge-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_partial_object_store_credentials_rejected() {
        let config = ObjectStoreConfig {
            endpoint: Some("http://127.0.0.1:9000".to_string()),
            bucket: "charts".to_string(),
            region: None,
            access_key_id: Some("key".to_string()),
            secret_access_key: None,
            force_path_style: true,
        };
        assert!(matches!(
            S3ObjectStore::from_config(&config).await.unwrap_err(),
            ReleaseError::InvalidConfig(_)
        ));
    }
}
