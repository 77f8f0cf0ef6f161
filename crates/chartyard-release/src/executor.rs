//! HelmExecutor - one package-manager operation per ephemeral workspace
//!
//! Every call stages its inputs in a fresh directory named after the
//! namespace and release plus a random suffix, runs the binary there, and
//! removes the directory when the call returns.

use chartyard_core::HelmConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ReleaseError, Result};
use crate::process::{ProcessCommand, ProcessExecutor};

/// Sentinel first argument that turns the chartyard binary into a fake helm
pub const MOCK_HELM_SENTINEL: &str = "__mock-helm";

/// Exact stderr the package manager prints when uninstalling an unknown release
pub const RELEASE_NOT_FOUND: &str = "release: not found";

const VALUES_FILE: &str = "values.yaml";
const KUBECONFIG_FILE: &str = "kubeconfig";

/// Package-manager verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelmVerb {
    Install,
    Upgrade,
    Uninstall,
    Status,
    GetManifest,
}

impl HelmVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            HelmVerb::Install => "install",
            HelmVerb::Upgrade => "upgrade",
            HelmVerb::Uninstall => "uninstall",
            HelmVerb::Status => "status",
            HelmVerb::GetManifest => "get-manifest",
        }
    }
}

/// A chart archive to stage into the workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartData {
    /// Archive file name, e.g. `nginx-15.0.0.tgz`
    pub name: String,
    pub data: Vec<u8>,
}

/// Inputs for one operation
#[derive(Debug, Clone, Default)]
pub struct HelmRequest<'a> {
    pub release: &'a str,
    pub namespace: &'a str,
    pub chart: Option<&'a ChartData>,
    pub values: &'a str,
    /// Empty means the local context
    pub kubeconfig: &'a str,
    pub dry_run: bool,
}

/// Display-only outcome; the `Result` around it is authoritative
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelmResult {
    pub message: String,
}

pub struct HelmExecutor {
    process: Arc<dyn ProcessExecutor>,
    program: PathBuf,
    leading_args: Vec<String>,
    workspace_dir: PathBuf,
    timeout: Option<Duration>,
    debug: bool,
}

impl HelmExecutor {
    pub fn new(process: Arc<dyn ProcessExecutor>, program: impl Into<PathBuf>) -> Self {
        Self {
            process,
            program: program.into(),
            leading_args: Vec::new(),
            workspace_dir: std::env::temp_dir(),
            timeout: None,
            debug: false,
        }
    }

    /// Build from configuration; mock mode re-executes the current binary
    /// with the sentinel argument
    pub fn from_config(config: &HelmConfig, process: Arc<dyn ProcessExecutor>) -> Result<Self> {
        let mut executor = if config.mock {
            let mut executor = Self::new(process, std::env::current_exe()?);
            executor.leading_args.push(MOCK_HELM_SENTINEL.to_string());
            executor
        } else {
            if config.binary.is_empty() {
                return Err(ReleaseError::InvalidConfig(
                    "helm binary path is empty".to_string(),
                ));
            }
            Self::new(process, &config.binary)
        };

        if let Some(dir) = &config.workspace_dir {
            executor.workspace_dir = dir.clone();
        }
        executor.timeout = config.timeout;
        executor.debug = config.debug;
        Ok(executor)
    }

    pub fn with_workspace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace_dir = dir.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub async fn install(&self, request: &HelmRequest<'_>) -> Result<HelmResult> {
        self.run(HelmVerb::Install, request).await
    }

    pub async fn upgrade(&self, request: &HelmRequest<'_>) -> Result<HelmResult> {
        self.run(HelmVerb::Upgrade, request).await
    }

    /// Uninstall; an unknown release counts as already uninstalled
    pub async fn uninstall(&self, request: &HelmRequest<'_>) -> Result<HelmResult> {
        match self.run(HelmVerb::Uninstall, request).await {
            Err(ReleaseError::Exec { stderr, .. }) if stderr.trim() == RELEASE_NOT_FOUND => {
                tracing::debug!(
                    release = %request.release,
                    namespace = %request.namespace,
                    "release already absent"
                );
                Ok(HelmResult {
                    message: format!("release {} not found, nothing to uninstall", request.release),
                })
            }
            other => other,
        }
    }

    pub async fn status(&self, request: &HelmRequest<'_>) -> Result<HelmResult> {
        self.run(HelmVerb::Status, request).await
    }

    /// Raw manifest as reported by the package manager
    pub async fn manifest(&self, request: &HelmRequest<'_>) -> Result<HelmResult> {
        self.run(HelmVerb::GetManifest, request).await
    }

    async fn run(&self, verb: HelmVerb, request: &HelmRequest<'_>) -> Result<HelmResult> {
        let workspace = tempfile::Builder::new()
            .prefix(&format!("{}-{}-", request.namespace, request.release))
            .tempdir_in(&self.workspace_dir)?;

        let args = self.stage(verb, request, workspace.path()).await?;
        let command = ProcessCommand::new(&self.program)
            .args(self.leading_args.iter().cloned())
            .args(args)
            .current_dir(workspace.path())
            .timeout(self.timeout);

        tracing::debug!(
            verb = verb.as_str(),
            release = %request.release,
            namespace = %request.namespace,
            workspace = %workspace.path().display(),
            "invoking package manager"
        );
        let output = self.process.execute(&command).await?;

        if let Err(e) = workspace.close() {
            tracing::warn!(error = %e, "failed to remove executor workspace");
        }

        if output.is_success() {
            Ok(HelmResult {
                message: output.stdout.trim().to_string(),
            })
        } else {
            Err(ReleaseError::Exec {
                command: command.display_name(),
                code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    /// Write inputs into the workspace and build the argument list
    async fn stage(
        &self,
        verb: HelmVerb,
        request: &HelmRequest<'_>,
        dir: &Path,
    ) -> Result<Vec<String>> {
        let mut args = vec![verb.as_str().to_string(), request.release.to_string()];

        if matches!(verb, HelmVerb::Install | HelmVerb::Upgrade) {
            let chart = request.chart.ok_or_else(|| {
                ReleaseError::InvalidChart(format!("{} requires a chart archive", verb.as_str()))
            })?;
            let path = dir.join(archive_file_name(&chart.name));
            tokio::fs::write(&path, &chart.data).await?;
            args.push(path.display().to_string());
        }

        args.push("--namespace".to_string());
        args.push(request.namespace.to_string());

        if matches!(verb, HelmVerb::Install | HelmVerb::Upgrade) && !request.values.is_empty() {
            let path = dir.join(VALUES_FILE);
            tokio::fs::write(&path, request.values).await?;
            args.push("--values".to_string());
            args.push(path.display().to_string());
        }

        if !request.kubeconfig.is_empty() {
            let path = dir.join(KUBECONFIG_FILE);
            tokio::fs::write(&path, request.kubeconfig).await?;
            args.push("--kubeconfig".to_string());
            args.push(path.display().to_string());
        }

        if request.dry_run {
            args.push("--dry-run".to_string());
        }
        if self.debug {
            args.push("--debug".to_string());
        }
        Ok(args)
    }
}

/// Final path component of a chart name, never empty
fn archive_file_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if base.is_empty() {
        "chart.tgz".to_string()
    } else {
        base
    }
}
