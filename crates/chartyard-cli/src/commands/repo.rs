//! Repository commands - one-shot sync into a snapshot file, and listing

use console::style;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chartyard_core::SyncConfig;
use chartyard_repo::{
    DefaultChartLoader, MemoryRepositoryStore, RepoCredential, RepoIndexSyncer, Repository,
    Snapshot,
};

use crate::error::{CliError, Result};

/// Credential flags as given on the command line
#[derive(Debug, Default)]
pub struct CredentialArgs {
    pub username: Option<String>,
    pub password: Option<String>,
    pub ca_file: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub insecure_skip_tls_verify: bool,
}

impl CredentialArgs {
    fn into_credential(self) -> Result<RepoCredential> {
        if self.password.is_some() && self.username.is_none() {
            return Err(CliError::input("--password requires --username"));
        }
        if self.cert_file.is_some() != self.key_file.is_some() {
            return Err(CliError::input("--cert-file and --key-file must be given together"));
        }

        Ok(RepoCredential {
            username: self.username,
            password: self.password,
            cert_data: read_optional(self.cert_file.as_deref())?,
            key_data: read_optional(self.key_file.as_deref())?,
            ca_data: read_optional(self.ca_file.as_deref())?,
            insecure_skip_tls_verify: self.insecure_skip_tls_verify,
        })
    }
}

fn read_optional(path: Option<&Path>) -> Result<Option<String>> {
    path.map(std::fs::read_to_string).transpose().map_err(CliError::from)
}

fn read_snapshot_data(path: &Path) -> Result<String> {
    Ok(std::fs::read_to_string(path)?.trim().to_string())
}

/// Fetch the index at `url`, merge it into the snapshot file (if any) and
/// write the result back
pub async fn sync(
    name: &str,
    url: &str,
    snapshot: Option<&Path>,
    credentials: CredentialArgs,
    config: &SyncConfig,
) -> Result<()> {
    let mut repo = Repository::new(name, url).with_credential(credentials.into_credential()?);
    if let Some(path) = snapshot.filter(|p| p.exists()) {
        repo.status.data = read_snapshot_data(path)?;
        // fail early on a corrupt file rather than silently starting over
        repo.snapshot()?;
    }

    let store = MemoryRepositoryStore::with_repositories(vec![repo.clone()]);
    let syncer = RepoIndexSyncer::new(
        Arc::new(store),
        Arc::new(DefaultChartLoader::new()),
        config.clone(),
    );

    println!("Syncing {} from {}...", style(name).cyan(), url);
    let outcome = syncer.fetch_and_merge(&repo).await?;
    let summary = &outcome.summary;

    println!(
        "  Applications: {} ({} added, {} removed)",
        style(outcome.snapshot.application_count()).yellow(),
        summary.added_applications,
        summary.removed_applications
    );
    println!(
        "  Versions:     {} ({} added, {} removed)",
        style(outcome.snapshot.version_count()).yellow(),
        summary.added_versions,
        summary.removed_versions
    );

    match snapshot {
        Some(path) => {
            if summary.is_unchanged() && path.exists() {
                println!("{} Snapshot unchanged", style("✓").green());
            } else {
                std::fs::write(path, &outcome.data)?;
                println!(
                    "{} Snapshot written to {}",
                    style("✓").green(),
                    path.display()
                );
            }
        }
        None => println!("{} Index is valid (no --snapshot given, nothing written)", style("✓").green()),
    }

    Ok(())
}

/// Print the applications recorded in a snapshot file
pub fn show(snapshot: &Path, json: bool) -> Result<()> {
    let data = read_snapshot_data(snapshot)?;
    let snapshot = Snapshot::decode(&data)?;

    if json {
        let out = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| CliError::internal(e.to_string()))?;
        println!("{}", out);
        return Ok(());
    }

    if snapshot.is_empty() {
        println!("Snapshot is empty.");
        return Ok(());
    }

    println!("{:<30} {:<15} {:<9} {}", "NAME", "LATEST", "VERSIONS", "ID");
    println!("{}", "-".repeat(80));
    for app in snapshot.applications.values() {
        let latest = app
            .latest_version()
            .map(|v| v.chart.version.as_str())
            .unwrap_or("-");
        println!(
            "{:<30} {:<15} {:<9} {}",
            app.name,
            latest,
            app.versions.len(),
            style(&app.application_id).dim()
        );
    }
    println!();
    println!(
        "{} applications, {} versions",
        snapshot.application_count(),
        snapshot.version_count()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_requires_username() {
        let args = CredentialArgs {
            password: Some("secret".to_string()),
            ..Default::default()
        };
        assert!(matches!(args.into_credential(), Err(CliError::Input { .. })));
    }

    #[test]
    fn test_cert_and_key_go_together() {
        let args = CredentialArgs {
            cert_file: Some(PathBuf::from("/tmp/cert.pem")),
            ..Default::default()
        };
        assert!(matches!(args.into_credential(), Err(CliError::Input { .. })));
    }

    #[test]
    fn test_credential_files_are_read() {
        let dir = tempfile::tempdir().unwrap();
        let ca = dir.path().join("ca.pem");
        std::fs::write(&ca, "-----BEGIN CERTIFICATE-----\n").unwrap();

        let credential = CredentialArgs {
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
            ca_file: Some(ca),
            insecure_skip_tls_verify: true,
            ..Default::default()
        }
        .into_credential()
        .unwrap();

        assert_eq!(credential.username.as_deref(), Some("user"));
        assert!(credential.ca_data.unwrap().starts_with("-----BEGIN"));
        assert!(credential.insecure_skip_tls_verify);
    }
}
