//! S3-style chart retrieval
//!
//! Repositories may point at `s3://<host>/<bucket>/<path>` URLs. The region is
//! taken from an `s3.<region>.<domain>` host when present; the repository's
//! basic-auth pair doubles as the access key.

use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use url::Url;

use crate::credentials::RepoCredential;
use crate::error::{RepoError, Result};

/// Region used when the host does not name one
pub const DEFAULT_S3_REGION: &str = "us-east-1";

/// Parsed `s3://` URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    /// Endpoint host, including a port if one was given
    pub host: String,
    pub bucket: String,
    pub key: String,
    pub region: String,
}

impl S3Location {
    /// Parse `s3://host/bucket/path/to/object`
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| RepoError::InvalidRepositoryUrl {
            url: raw.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
        if url.scheme() != "s3" {
            return Err(invalid("scheme must be s3"));
        }

        let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
        let host = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        let path = url.path().trim_start_matches('/');
        let (bucket, key) = path
            .split_once('/')
            .ok_or_else(|| invalid("expected s3://host/bucket/key"))?;
        if bucket.is_empty() || key.is_empty() {
            return Err(invalid("expected s3://host/bucket/key"));
        }

        Ok(Self {
            region: infer_region(&host),
            host,
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("https://{}", self.host)
    }
}

/// Pick the region out of an `s3.<region>.*` host
pub fn infer_region(host: &str) -> String {
    let host = host.split(':').next().unwrap_or(host);
    let mut labels = host.split('.');
    match (labels.next(), labels.next(), labels.next()) {
        (Some("s3"), Some(region), Some(_)) if region != "amazonaws" && !region.is_empty() => {
            region.to_string()
        }
        _ => DEFAULT_S3_REGION.to_string(),
    }
}

/// Download one object
pub async fn fetch(location: &S3Location, credential: &RepoCredential) -> Result<Vec<u8>> {
    let mut config = aws_sdk_s3::config::Builder::new()
        .behavior_version(BehaviorVersion::latest())
        .region(aws_config::Region::new(location.region.clone()))
        .endpoint_url(location.endpoint())
        .force_path_style(true);

    if let (Some(key_id), Some(secret)) = (&credential.username, &credential.password) {
        let credentials = aws_sdk_s3::config::Credentials::new(
            key_id.clone(),
            secret.clone(),
            None,
            None,
            "chartyard-repository",
        );
        config = config.credentials_provider(credentials);
    }

    let client = Client::from_conf(config.build());
    tracing::debug!(bucket = %location.bucket, key = %location.key, "Fetching object from S3");

    let output = client
        .get_object()
        .bucket(&location.bucket)
        .key(&location.key)
        .send()
        .await
        .map_err(|e| RepoError::ObjectStorage {
            message: format!(
                "get s3://{}/{}/{}: {}",
                location.host,
                location.bucket,
                location.key,
                aws_sdk_s3::error::DisplayErrorContext(&e)
            ),
        })?;

    let bytes = output
        .body
        .collect()
        .await
        .map_err(|e| RepoError::ObjectStorage {
            message: e.to_string(),
        })?
        .into_bytes();

    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_location() {
        let loc = S3Location::parse("s3://s3.eu-central-1.amazonaws.com/charts/stable/nginx-1.0.0.tgz")
            .unwrap();
        assert_eq!(loc.host, "s3.eu-central-1.amazonaws.com");
        assert_eq!(loc.bucket, "charts");
        assert_eq!(loc.key, "stable/nginx-1.0.0.tgz");
        assert_eq!(loc.region, "eu-central-1");
    }

    #[test]
    fn test_parse_with_port() {
        let loc = S3Location::parse("s3://minio.local:9000/bucket/index.yaml").unwrap();
        assert_eq!(loc.host, "minio.local:9000");
        assert_eq!(loc.region, DEFAULT_S3_REGION);
    }

    #[test]
    fn test_region_inference() {
        assert_eq!(infer_region("s3.ap-south-1.amazonaws.com"), "ap-south-1");
        assert_eq!(infer_region("s3.amazonaws.com"), DEFAULT_S3_REGION);
        assert_eq!(infer_region("storage.example.com"), DEFAULT_S3_REGION);
        assert_eq!(infer_region("s3.cn-north-1.example.cn:443"), "cn-north-1");
    }

    #[test]
    fn test_reject_missing_key() {
        assert!(S3Location::parse("s3://s3.amazonaws.com/bucket").is_err());
        assert!(S3Location::parse("s3://s3.amazonaws.com/").is_err());
        assert!(S3Location::parse("https://s3.amazonaws.com/bucket/key").is_err());
    }
}
