//! Identity-stable catalog snapshot
//!
//! The snapshot is what a repository object persists after every successful
//! sync: chart name -> application, each carrying platform-assigned ids that
//! survive re-syncs. It is stored on the object as text, so the codec frames
//! the JSON with its length, gzips it, and base64url-encodes the result.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};

use crate::error::{RepoError, Result};
use crate::index::{compare_versions, ChartEntry};

/// Persisted catalog of one repository
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Applications keyed by upstream chart name
    #[serde(default)]
    pub applications: BTreeMap<String, Application>,
}

/// One chart name tracked by the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub application_id: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    /// Versions in the order they were first seen
    #[serde(default)]
    pub versions: Vec<ChartVersion>,
}

/// One chart version tracked by the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartVersion {
    pub application_version_id: String,

    /// Upstream metadata, refreshed on every sync
    pub chart: ChartEntry,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of applications
    pub fn application_count(&self) -> usize {
        self.applications.len()
    }

    /// Number of versions across all applications
    pub fn version_count(&self) -> usize {
        self.applications.values().map(|a| a.versions.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
    }

    /// Find an application by its platform id
    pub fn application_by_id(&self, application_id: &str) -> Option<&Application> {
        self.applications
            .values()
            .find(|a| a.application_id == application_id)
    }

    /// Find a version by application id and version id
    pub fn version(&self, application_id: &str, version_id: &str) -> Option<&ChartVersion> {
        self.application_by_id(application_id)?
            .versions
            .iter()
            .find(|v| v.application_version_id == version_id)
    }

    /// Encode for persistence on the repository object
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self).map_err(|e| RepoError::SnapshotEncode {
            message: e.to_string(),
        })?;
        let len = u32::try_from(json.len()).map_err(|_| RepoError::SnapshotEncode {
            message: format!("snapshot too large ({} bytes)", json.len()),
        })?;

        let encode_err = |e: std::io::Error| RepoError::SnapshotEncode {
            message: e.to_string(),
        };
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json).map_err(encode_err)?;
        let compressed = encoder.finish().map_err(encode_err)?;

        let mut framed = Vec::with_capacity(4 + compressed.len());
        framed.extend_from_slice(&len.to_be_bytes());
        framed.extend_from_slice(&compressed);
        Ok(URL_SAFE.encode(framed))
    }

    /// Decode a persisted snapshot; empty input is an empty snapshot
    pub fn decode(data: &str) -> Result<Self> {
        let data = data.trim();
        if data.is_empty() {
            return Ok(Self::default());
        }

        let decode_err = |message: String| RepoError::SnapshotDecode { message };

        let framed = URL_SAFE
            .decode(data)
            .map_err(|e| decode_err(format!("base64: {}", e)))?;
        if framed.len() < 4 {
            return Err(decode_err("truncated length prefix".to_string()));
        }
        let (prefix, compressed) = framed.split_at(4);
        let expected = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;

        // never inflate past what the prefix announces
        let mut json = Vec::new();
        GzDecoder::new(compressed)
            .take(expected as u64 + 1)
            .read_to_end(&mut json)
            .map_err(|e| decode_err(format!("gzip: {}", e)))?;
        if json.len() != expected {
            return Err(decode_err(format!(
                "length mismatch: prefix says {} bytes, got {}",
                expected,
                json.len()
            )));
        }

        serde_json::from_slice(&json).map_err(|e| decode_err(format!("json: {}", e)))
    }
}

impl Application {
    /// Latest version by semver, ignoring unparsable version strings
    pub fn latest_version(&self) -> Option<&ChartVersion> {
        self.versions
            .iter()
            .filter(|v| {
                let ok = v.chart.parsed_version().is_some();
                if !ok {
                    tracing::warn!(
                        chart = %self.name,
                        version = %v.chart.version,
                        "Skipping unparsable chart version"
                    );
                }
                ok
            })
            .max_by(|a, b| compare_versions(&a.chart, &b.chart))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> Snapshot {
        let mut snapshot = Snapshot::new();
        snapshot.applications.insert(
            "nginx".to_string(),
            Application {
                application_id: "app-1".to_string(),
                name: "nginx".to_string(),
                description: Some("NGINX".to_string()),
                icon: None,
                versions: vec![
                    ChartVersion {
                        application_version_id: "appv-1".to_string(),
                        chart: ChartEntry {
                            name: "nginx".to_string(),
                            version: "1.0.0".to_string(),
                            urls: vec!["nginx-1.0.0.tgz".to_string()],
                            ..Default::default()
                        },
                    },
                    ChartVersion {
                        application_version_id: "appv-2".to_string(),
                        chart: ChartEntry {
                            name: "nginx".to_string(),
                            version: "latest".to_string(),
                            ..Default::default()
                        },
                    },
                    ChartVersion {
                        application_version_id: "appv-3".to_string(),
                        chart: ChartEntry {
                            name: "nginx".to_string(),
                            version: "1.2.0".to_string(),
                            ..Default::default()
                        },
                    },
                ],
            },
        );
        snapshot
    }

    #[test]
    fn test_decode_empty() {
        assert_eq!(Snapshot::decode("").unwrap(), Snapshot::default());
        assert_eq!(Snapshot::decode("  \n").unwrap(), Snapshot::default());
    }

    #[test]
    fn test_round_trip() {
        let snapshot = sample_snapshot();
        let encoded = snapshot.encode().unwrap();
        let decoded = Snapshot::decode(&encoded).unwrap();
        assert_eq!(decoded, snapshot);
        assert_eq!(decoded.encode().unwrap(), encoded);
    }

    #[test]
    fn test_encoded_text_is_url_safe() {
        let encoded = sample_snapshot().encode().unwrap();
        assert!(encoded
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '='));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(Snapshot::decode("!!not-base64!!").is_err());
        assert!(Snapshot::decode(&URL_SAFE.encode([0u8, 1])).is_err());
        assert!(Snapshot::decode(&URL_SAFE.encode(b"\x00\x00\x00\x05garbage")).is_err());
    }

    #[test]
    fn test_decode_length_mismatch() {
        let encoded = sample_snapshot().encode().unwrap();
        let mut framed = URL_SAFE.decode(&encoded).unwrap();
        framed[3] = framed[3].wrapping_add(1);
        let err = Snapshot::decode(&URL_SAFE.encode(framed)).unwrap_err();
        assert!(matches!(err, RepoError::SnapshotDecode { .. }));
    }

    #[test]
    fn test_decode_oversized_payload_is_bounded() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&vec![b' '; 1 << 20]).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut framed = 16u32.to_be_bytes().to_vec();
        framed.extend_from_slice(&compressed);
        let err = Snapshot::decode(&URL_SAFE.encode(&framed)).unwrap_err();
        assert!(err.to_string().contains("got 17"), "{}", err);

        // a huge announced size is rejected once the real payload ends
        framed[..4].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(
            Snapshot::decode(&URL_SAFE.encode(&framed)),
            Err(RepoError::SnapshotDecode { .. })
        ));
    }

    #[test]
    fn test_counts_and_lookup() {
        let snapshot = sample_snapshot();
        assert_eq!(snapshot.application_count(), 1);
        assert_eq!(snapshot.version_count(), 3);
        assert!(snapshot.version("app-1", "appv-2").is_some());
        assert!(snapshot.version("app-1", "appv-9").is_none());
        assert!(snapshot.version("app-9", "appv-1").is_none());
    }

    #[test]
    fn test_latest_version_skips_unparsable() {
        let snapshot = sample_snapshot();
        let latest = snapshot.applications["nginx"].latest_version().unwrap();
        assert_eq!(latest.chart.version, "1.2.0");
    }
}
