//! Release objects and their state machine vocabulary

use chartyard_core::{Attempt, HistoryLog};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespaced release name, the unit of reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReleaseKey {
    pub namespace: String,
    pub name: String,
}

impl ReleaseKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ReleaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Where a release's chart archive comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ChartRef {
    /// A version tracked in a synced repository's snapshot
    #[serde(rename_all = "camelCase")]
    Repository {
        repository: String,
        application_id: String,
        version_id: String,
    },

    /// A curated app-store version kept in object storage
    #[serde(rename_all = "camelCase")]
    AppStore {
        workspace: String,
        version_name: String,
    },

    /// Chart archive embedded in the object, base64 encoded
    #[serde(rename_all = "camelCase")]
    Inline { name: String, data: String },
}

/// Lifecycle states driven by the reconciler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseState {
    Creating,
    Active,
    Upgrading,
    Failed,
    Deleting,
}

impl fmt::Display for ReleaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReleaseState::Creating => "creating",
            ReleaseState::Active => "active",
            ReleaseState::Upgrading => "upgrading",
            ReleaseState::Failed => "failed",
            ReleaseState::Deleting => "deleting",
        };
        f.write_str(s)
    }
}

/// Object lifecycle as seen by the storage layer
///
/// `Terminating` means deletion was requested and cleanup has not finished;
/// the store removes the object once it is finalized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    #[default]
    Active,
    Terminating,
    Terminated,
}

/// Package-manager operation recorded in history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Install,
    Upgrade,
    Uninstall,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Install => "install",
            Operation::Upgrade => "upgrade",
            Operation::Uninstall => "uninstall",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployState {
    Successful,
    Failed,
}

/// One deploy attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRecord {
    pub state: DeployState,
    pub operation: Operation,
    /// Target version the attempt was made for
    pub version: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub time: DateTime<Utc>,
}

impl Attempt for DeployRecord {
    fn is_failure(&self) -> bool {
        self.state == DeployState::Failed
    }

    fn time(&self) -> DateTime<Utc> {
        self.time
    }
}

/// Desired deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseSpec {
    pub chart: ChartRef,

    /// Bumped by the user to request an upgrade
    pub version: u32,

    /// Serialized values passed to the package manager
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub values: String,

    /// Target cluster; `None` deploys to the local context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseStatus {
    /// `None` until the first reconcile pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ReleaseState>,

    /// Last successfully applied spec version
    #[serde(default)]
    pub version: u32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    #[serde(default)]
    pub deploy_history: HistoryLog<DeployRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_deployed: Option<DateTime<Utc>>,
}

/// A deployed instance of one chart version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub name: String,
    pub namespace: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,

    /// Optimistic concurrency token, bumped by the store on every write
    #[serde(default)]
    pub resource_version: u64,

    #[serde(default)]
    pub lifecycle: Lifecycle,

    pub spec: ReleaseSpec,

    #[serde(default)]
    pub status: ReleaseStatus,
}

impl Release {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, chart: ChartRef) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            workspace: None,
            resource_version: 0,
            lifecycle: Lifecycle::Active,
            spec: ReleaseSpec {
                chart,
                version: 1,
                values: String::new(),
                cluster: None,
            },
            status: ReleaseStatus::default(),
        }
    }

    pub fn with_values(mut self, values: impl Into<String>) -> Self {
        self.spec.values = values.into();
        self
    }

    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.spec.cluster = Some(cluster.into());
        self
    }

    pub fn key(&self) -> ReleaseKey {
        ReleaseKey::new(&self.namespace, &self.name)
    }

    pub fn state(&self) -> Option<ReleaseState> {
        self.status.state
    }

    /// Active and at the requested version; nothing left to do
    pub fn is_settled(&self) -> bool {
        self.status.state == Some(ReleaseState::Active) && self.status.version == self.spec.version
    }

    pub fn is_terminating(&self) -> bool {
        self.lifecycle == Lifecycle::Terminating
    }

    pub fn last_deploy(&self) -> Option<&DeployRecord> {
        self.status.deploy_history.latest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_yaml_shape() {
        let yaml = r#"
name: web
namespace: default
spec:
  chart:
    type: repository
    repository: stable
    applicationId: app-abc
    versionId: appv-def
  version: 2
  values: "replicaCount: 2"
  cluster: edge-1
"#;
        let release: Release = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(release.key(), ReleaseKey::new("default", "web"));
        assert_eq!(release.lifecycle, Lifecycle::Active);
        assert_eq!(release.spec.version, 2);
        assert_eq!(release.spec.cluster.as_deref(), Some("edge-1"));
        assert!(matches!(release.spec.chart, ChartRef::Repository { .. }));
        assert_eq!(release.state(), None);
    }

    #[test]
    fn test_settled_requires_matching_version() {
        let mut release = Release::new(
            "default",
            "web",
            ChartRef::AppStore {
                workspace: "team-a".to_string(),
                version_name: "web-1.0.0".to_string(),
            },
        );
        assert!(!release.is_settled());

        release.status.state = Some(ReleaseState::Active);
        release.status.version = 1;
        assert!(release.is_settled());

        release.spec.version = 2;
        assert!(!release.is_settled());
    }

    #[test]
    fn test_key_display() {
        assert_eq!(ReleaseKey::new("prod", "api").to_string(), "prod/api");
    }
}
