//! RepoIndexSyncer - fetch, merge and persist one repository per pass
//!
//! Scheduling is a pure function of the repository object (`next_sync`), so
//! the reconcile pass only has to act on the decision and record the outcome.

use chartyard_core::{
    remaining, sync_period, sync_retry_after, truncate, Action, SyncConfig,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::loader::{load_index, ChartLoader};
use crate::merge::{merge_with_summary, MergeSummary};
use crate::repository::{Repository, RepositoryStore, SyncRecord};
use crate::snapshot::Snapshot;

/// Attempts at writing status before giving up on repeated conflicts
const STATUS_WRITE_ATTEMPTS: usize = 5;

/// Why a sync pass runs now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncReason {
    /// No attempt has been recorded yet
    NeverSynced,
    /// The operator bumped the sync request counter
    Requested,
    /// The failure backoff window elapsed
    Retry,
    /// The periodic interval elapsed
    Periodic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    SyncNow(SyncReason),
    WaitFor(Duration),
    /// Periodic syncing disabled; only an on-demand request wakes it
    Idle,
}

impl SyncDecision {
    fn into_action(self) -> Action {
        match self {
            SyncDecision::SyncNow(_) => Action::requeue(Duration::ZERO),
            SyncDecision::WaitFor(wait) => Action::requeue(wait),
            SyncDecision::Idle => Action::await_change(),
        }
    }
}

/// Decide whether `repo` needs a sync pass at `now`
pub fn next_sync(repo: &Repository, now: DateTime<Utc>, config: &SyncConfig) -> SyncDecision {
    if repo.sync_requested() {
        return SyncDecision::SyncNow(SyncReason::Requested);
    }

    let history = &repo.status.sync_history;
    let Some(last) = history.latest() else {
        return SyncDecision::SyncNow(SyncReason::NeverSynced);
    };

    if history.last_failed() {
        let wait = sync_retry_after(
            history.consecutive_failures(),
            config.failure_step,
            config.failure_cap,
        );
        return match remaining(last.time, wait, now) {
            Some(left) => SyncDecision::WaitFor(left),
            None => SyncDecision::SyncNow(SyncReason::Retry),
        };
    }

    match sync_period(repo.spec.sync_period, config.min_period) {
        None => SyncDecision::Idle,
        Some(period) => match remaining(last.time, period, now) {
            Some(left) => SyncDecision::WaitFor(left),
            None => SyncDecision::SyncNow(SyncReason::Periodic),
        },
    }
}

/// Result of a successful fetch+merge, ready to be persisted
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub snapshot: Snapshot,
    pub data: String,
    pub summary: MergeSummary,
}

/// Drives repository syncs against a store and a chart loader
pub struct RepoIndexSyncer {
    store: Arc<dyn RepositoryStore>,
    loader: Arc<dyn ChartLoader>,
    config: SyncConfig,
}

impl RepoIndexSyncer {
    pub fn new(
        store: Arc<dyn RepositoryStore>,
        loader: Arc<dyn ChartLoader>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            loader,
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Fetch the upstream index and merge it into the persisted snapshot
    ///
    /// Nothing is written; the caller decides whether to persist.
    pub async fn fetch_and_merge(&self, repo: &Repository) -> Result<SyncOutcome> {
        let index = load_index(self.loader.as_ref(), &repo.spec.url, &repo.spec.credential).await?;
        let previous = repo.snapshot()?;
        let (snapshot, summary) = merge_with_summary(&index, previous);
        let data = snapshot.encode()?;
        Ok(SyncOutcome {
            snapshot,
            data,
            summary,
        })
    }

    /// One reconcile pass for the named repository
    pub async fn reconcile(&self, name: &str) -> Result<Action> {
        let repo = match self.store.get(name).await {
            Ok(repo) => repo,
            Err(e) if e.is_not_found() => {
                tracing::debug!(repo = %name, "repository gone, nothing to sync");
                return Ok(Action::await_change());
            }
            Err(e) => return Err(e),
        };

        let reason = match next_sync(&repo, Utc::now(), &self.config) {
            SyncDecision::SyncNow(reason) => reason,
            decision => {
                tracing::debug!(repo = %name, ?decision, "sync not due");
                return Ok(decision.into_action());
            }
        };

        tracing::debug!(repo = %name, ?reason, url = %repo.spec.url, "syncing repository");
        let requested = repo.spec.sync_request;
        let outcome = self.fetch_and_merge(&repo).await;

        let record = match &outcome {
            Ok(outcome) => {
                tracing::info!(
                    repo = %name,
                    applications = outcome.snapshot.application_count(),
                    versions = outcome.snapshot.version_count(),
                    added = outcome.summary.added_versions,
                    removed = outcome.summary.removed_versions,
                    "repository synced"
                );
                SyncRecord::success(
                    format!(
                        "synced {} applications, {} versions",
                        outcome.snapshot.application_count(),
                        outcome.snapshot.version_count()
                    ),
                    Utc::now(),
                )
            }
            Err(e) => {
                tracing::warn!(repo = %name, error = %e, "repository sync failed");
                SyncRecord::failure(truncate(&e.to_string(), self.config.message_limit), Utc::now())
            }
        };

        let persisted = self
            .persist(repo, record, outcome.ok(), requested)
            .await?;

        Ok(next_sync(&persisted, Utc::now(), &self.config).into_action())
    }

    /// Write the attempt into status, re-reading and reapplying on conflict
    async fn persist(
        &self,
        mut repo: Repository,
        record: SyncRecord,
        outcome: Option<SyncOutcome>,
        requested: u64,
    ) -> Result<Repository> {
        let mut attempt = 1;
        loop {
            let status = &mut repo.status;
            status.sync_history.record_capped(record.clone(), self.config.history_cap);
            status.observed_sync_request = status.observed_sync_request.max(requested);
            if let Some(outcome) = &outcome {
                status.data = outcome.data.clone();
                status.total_applications = outcome.snapshot.application_count();
                status.total_versions = outcome.snapshot.version_count();
            }

            match self.store.update_status(&repo).await {
                Ok(updated) => return Ok(updated),
                Err(e) if e.is_conflict() && attempt < STATUS_WRITE_ATTEMPTS => {
                    tracing::debug!(repo = %repo.name, attempt, "status write conflicted, retrying");
                    attempt += 1;
                    repo = self.store.get(&repo.name).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
