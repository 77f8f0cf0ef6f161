//! ChartLoader - raw byte retrieval for index files and chart archives
//!
//! Dispatches on the URL scheme: `http`/`https` go through the
//! [`SecureHttpClient`], `s3` goes through the S3 client. Everything above
//! this layer deals in parsed indexes and verified archives.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::credentials::{RepoCredential, SecureHttpClient};
use crate::error::{RepoError, Result};
use crate::index::{index_url, resolve_chart_url, ChartEntry, RepositoryIndex};
use crate::s3::{self, S3Location};

/// Fetches raw bytes for a URL using a repository's credential bundle
#[async_trait]
pub trait ChartLoader: Send + Sync {
    async fn fetch(&self, url: &str, credential: &RepoCredential) -> Result<Vec<u8>>;
}

/// Loader for HTTP(S) and S3 URLs
#[derive(Debug, Clone, Default)]
pub struct DefaultChartLoader;

impl DefaultChartLoader {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ChartLoader for DefaultChartLoader {
    async fn fetch(&self, url: &str, credential: &RepoCredential) -> Result<Vec<u8>> {
        let lower = url.to_ascii_lowercase();
        if lower.starts_with("s3://") {
            let location = S3Location::parse(url)?;
            s3::fetch(&location, credential).await
        } else if lower.starts_with("http://") || lower.starts_with("https://") {
            let client = SecureHttpClient::new(credential)?;
            client.get_bytes(url).await
        } else {
            Err(RepoError::InvalidRepositoryUrl {
                url: url.to_string(),
                reason: "unsupported scheme, expected http, https or s3".to_string(),
            })
        }
    }
}

/// Fetch and parse `<repo_url>/index.yaml`
pub async fn load_index(
    loader: &dyn ChartLoader,
    repo_url: &str,
    credential: &RepoCredential,
) -> Result<RepositoryIndex> {
    let url = index_url(repo_url);
    tracing::debug!(url = %url, "Fetching repository index");
    let data = loader.fetch(&url, credential).await?;
    RepositoryIndex::from_bytes(&data)
}

/// Download the archive for one chart version and verify its digest
pub async fn load_chart(
    loader: &dyn ChartLoader,
    repo_url: &str,
    entry: &ChartEntry,
    credential: &RepoCredential,
) -> Result<Vec<u8>> {
    let url = entry
        .download_url()
        .ok_or_else(|| RepoError::NoDownloadUrl {
            name: entry.name.clone(),
            version: entry.version.clone(),
        })?;
    let full_url = resolve_chart_url(repo_url, url);

    tracing::debug!(chart = %entry.name, version = %entry.version, url = %full_url, "Downloading chart");
    let data = loader.fetch(&full_url, credential).await?;

    if let Some(expected) = entry.digest.as_deref().filter(|d| !d.is_empty()) {
        let actual = compute_digest(&data);
        if !digest_matches(expected, &actual) {
            return Err(RepoError::IntegrityCheckFailed {
                name: format!("{}-{}", entry.name, entry.version),
                expected: expected.to_string(),
                actual,
            });
        }
    }

    Ok(data)
}

/// Compute SHA256 digest of data
pub fn compute_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Check if two digests match (supports various formats)
pub fn digest_matches(expected: &str, actual: &str) -> bool {
    let normalize = |d: &str| {
        d.trim()
            .to_lowercase()
            .replace("sha256:", "")
            .replace("sha256-", "")
    };
    normalize(expected) == normalize(actual)
}
