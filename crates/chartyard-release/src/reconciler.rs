//! ReleaseReconciler - the per-release control loop
//!
//! `reconcile(key)` is a pure pass over one release: read it, decide the
//! next step from its state, perform at most one package-manager operation,
//! record the outcome, and tell the caller when to come back. Watching and
//! queueing are the caller's business.
//!
//! States: `Creating -> Active`, `Active -> Upgrading -> Active`, any
//! failure `-> Failed` (retried under backoff), and `Deleting` once deletion
//! is requested. Transitions into `Upgrading` are persisted before the
//! upgrade runs so an interrupted pass resumes the upgrade.

use chartyard_core::{Action, ReleaseConfig, release_retry_after, remaining, truncate};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::chart_source::ChartResolver;
use crate::error::{ReleaseError, Result};
use crate::executor::{HelmExecutor, HelmRequest, HelmResult};
use crate::ports::ClusterClient;
use crate::postrender::PostRenderer;
use crate::release::{
    DeployRecord, DeployState, Operation, Release, ReleaseKey, ReleaseState, ReleaseStatus,
};
use crate::store::ReleaseStore;

const STATUS_WRITE_ATTEMPTS: usize = 5;

/// Source of the current time; replaceable in tests
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Where a release's operations run
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Local,
    Remote { kubeconfig: String },
    Gone { cluster: String },
}

impl Target {
    fn kubeconfig(&self) -> &str {
        match self {
            Target::Remote { kubeconfig } => kubeconfig,
            _ => "",
        }
    }
}

pub struct ReleaseReconciler {
    store: Arc<dyn ReleaseStore>,
    charts: ChartResolver,
    executor: HelmExecutor,
    clusters: Option<Arc<dyn ClusterClient>>,
    renderer: Arc<PostRenderer>,
    config: ReleaseConfig,
    clock: Clock,
}

impl ReleaseReconciler {
    pub fn new(
        store: Arc<dyn ReleaseStore>,
        charts: ChartResolver,
        executor: HelmExecutor,
        renderer: Arc<PostRenderer>,
        config: ReleaseConfig,
    ) -> Self {
        Self {
            store,
            charts,
            executor,
            clusters: None,
            renderer,
            config,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_cluster_client(mut self, clusters: Arc<dyn ClusterClient>) -> Self {
        self.clusters = Some(clusters);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// One reconcile pass for the release at `key`
    pub async fn reconcile(&self, key: &ReleaseKey) -> Result<Action> {
        let release = match self.store.get(key).await {
            Ok(release) => release,
            Err(e) if e.is_not_found() => {
                tracing::debug!(release = %key, "release gone, nothing to do");
                return Ok(Action::await_change());
            }
            Err(e) => return Err(e),
        };

        if release.is_terminating() || release.state() == Some(ReleaseState::Deleting) {
            return self.finalize(release).await;
        }

        // resolution errors are recorded as a failed deploy below
        let target = match self.target(&release).await {
            Ok(Target::Gone { cluster }) => {
                tracing::warn!(release = %key, cluster = %cluster, "target cluster no longer exists, deleting release");
                self.store.request_deletion(key).await?;
                let release = self.store.get(key).await?;
                return self.finalize(release).await;
            }
            resolved => resolved,
        };

        match release.state() {
            None => {
                let release = self
                    .transition(release, ReleaseState::Creating)
                    .await?;
                self.deploy(release, Operation::Install, target).await
            }
            Some(ReleaseState::Creating) => self.deploy(release, Operation::Install, target).await,
            Some(ReleaseState::Active) if release.is_settled() => {
                tracing::debug!(release = %key, version = release.spec.version, "release up to date");
                Ok(Action::await_change())
            }
            Some(ReleaseState::Active) => {
                let release = self
                    .transition(release, ReleaseState::Upgrading)
                    .await?;
                self.deploy(release, Operation::Upgrade, target).await
            }
            Some(ReleaseState::Upgrading) => self.deploy(release, Operation::Upgrade, target).await,
            Some(ReleaseState::Failed) => {
                if let Some(wait) = self.backoff_remaining(&release.status) {
                    tracing::debug!(release = %key, wait = ?wait, "waiting out backoff");
                    return Ok(Action::requeue(wait));
                }
                let operation = if release.status.version == 0 {
                    Operation::Install
                } else {
                    Operation::Upgrade
                };
                self.deploy(release, operation, target).await
            }
            Some(ReleaseState::Deleting) => self.finalize(release).await,
        }
    }

    /// Package-manager status of a release
    pub async fn status_of(&self, key: &ReleaseKey) -> Result<HelmResult> {
        let release = self.store.get(key).await?;
        let target = self.live_target(&release).await?;
        self.executor
            .status(&HelmRequest {
                release: &release.name,
                namespace: &release.namespace,
                kubeconfig: target.kubeconfig(),
                ..Default::default()
            })
            .await
    }

    /// Deployed manifest of a release, with release labels stamped in
    pub async fn manifest_of(&self, key: &ReleaseKey) -> Result<String> {
        let release = self.store.get(key).await?;
        let target = self.live_target(&release).await?;
        let result = self
            .executor
            .manifest(&HelmRequest {
                release: &release.name,
                namespace: &release.namespace,
                kubeconfig: target.kubeconfig(),
                ..Default::default()
            })
            .await?;
        self.renderer
            .render(&result.message, &release.name, &release.namespace)
    }

    /// Dry-run install of a release, returning the labelled manifest
    pub async fn render(&self, release: &Release) -> Result<String> {
        let target = self.live_target(release).await?;
        let chart = self.charts.get_chart_data(&release.spec.chart).await?;
        let result = self
            .executor
            .install(&HelmRequest {
                release: &release.name,
                namespace: &release.namespace,
                chart: Some(&chart),
                values: &release.spec.values,
                kubeconfig: target.kubeconfig(),
                dry_run: true,
            })
            .await?;
        self.renderer
            .render(&result.message, &release.name, &release.namespace)
    }

    async fn target(&self, release: &Release) -> Result<Target> {
        let cluster = match &release.spec.cluster {
            None => return Ok(Target::Local),
            Some(cluster) if *cluster == self.config.host_cluster => return Ok(Target::Local),
            Some(cluster) => cluster,
        };

        let clusters = self.clusters.as_ref().ok_or_else(|| {
            ReleaseError::InvalidConfig(format!(
                "release targets cluster '{}' but no cluster client is configured",
                cluster
            ))
        })?;

        Ok(match clusters.get(cluster).await? {
            Some(info) if info.kubeconfig.is_empty() => Target::Local,
            Some(info) => Target::Remote {
                kubeconfig: info.kubeconfig,
            },
            None => Target::Gone {
                cluster: cluster.clone(),
            },
        })
    }

    async fn live_target(&self, release: &Release) -> Result<Target> {
        match self.target(release).await? {
            Target::Gone { cluster } => Err(ReleaseError::ClusterNotFound { name: cluster }),
            target => Ok(target),
        }
    }

    /// Time left before a failed operation may be retried
    fn backoff_remaining(&self, status: &ReleaseStatus) -> Option<Duration> {
        let history = &status.deploy_history;
        if !history.last_failed() {
            return None;
        }
        let since = history.last_attempt_at()?;
        let wait = release_retry_after(history.consecutive_failures(), self.config.backoff_cap);
        remaining(since, wait, self.now())
    }

    /// Persist a state change before acting on it
    async fn transition(&self, release: Release, to: ReleaseState) -> Result<Release> {
        let key = release.key();
        let from = release.state();
        let now = self.now();
        let updated = self
            .update_status(release, |r| {
                r.status.state = Some(to);
                r.status.last_update = Some(now);
            })
            .await?;
        tracing::info!(release = %key, from = ?from, to = %to, "release state changed");
        Ok(updated)
    }

    /// Run install or upgrade and record the outcome
    async fn deploy(&self, release: Release, operation: Operation, target: Result<Target>) -> Result<Action> {
        let key = release.key();
        let version = release.spec.version;

        tracing::info!(release = %key, operation = %operation, version, "deploying release");
        let outcome = match target {
            Ok(target) => self.run(&release, operation, &target).await,
            Err(e) => Err(e),
        };
        let now = self.now();

        let (record, message) = match &outcome {
            Ok(result) => {
                tracing::info!(release = %key, operation = %operation, version, "release deployed");
                (
                    DeployRecord {
                        state: DeployState::Successful,
                        operation,
                        version,
                        message: String::new(),
                        time: now,
                    },
                    truncate(&result.message, self.config.message_limit),
                )
            }
            Err(e) => {
                tracing::warn!(release = %key, operation = %operation, error = %e, "release deploy failed");
                let message = truncate(&e.to_string(), self.config.message_limit);
                (
                    DeployRecord {
                        state: DeployState::Failed,
                        operation,
                        version,
                        message: message.clone(),
                        time: now,
                    },
                    message,
                )
            }
        };
        let succeeded = outcome.is_ok();
        let cap = self.config.history_cap;

        let written = self
            .update_status(release, |r| {
                let status = &mut r.status;
                status.deploy_history.record_capped(record.clone(), cap);
                status.message = message.clone();
                status.last_update = Some(now);
                if succeeded {
                    status.version = version;
                    status.last_deployed = Some(now);
                    // the requested version may have moved on while the operation ran
                    status.state = Some(if r.spec.version == version {
                        ReleaseState::Active
                    } else {
                        ReleaseState::Upgrading
                    });
                } else {
                    status.state = Some(ReleaseState::Failed);
                }
            })
            .await?;

        if succeeded {
            if written.is_settled() {
                Ok(Action::await_change())
            } else {
                Ok(Action::requeue(Duration::ZERO))
            }
        } else {
            let failures = written.status.deploy_history.consecutive_failures();
            Ok(Action::requeue(release_retry_after(failures, self.config.backoff_cap)))
        }
    }

    async fn run(&self, release: &Release, operation: Operation, target: &Target) -> Result<HelmResult> {
        let chart = match operation {
            Operation::Uninstall => None,
            _ => Some(self.charts.get_chart_data(&release.spec.chart).await?),
        };
        let request = HelmRequest {
            release: &release.name,
            namespace: &release.namespace,
            chart: chart.as_ref(),
            values: &release.spec.values,
            kubeconfig: target.kubeconfig(),
            dry_run: false,
        };

        match operation {
            Operation::Install => self.executor.install(&request).await,
            Operation::Upgrade => self.executor.upgrade(&request).await,
            Operation::Uninstall => self.executor.uninstall(&request).await,
        }
    }

    /// Deletion: mark `Deleting`, uninstall, then let the store drop the object
    async fn finalize(&self, release: Release) -> Result<Action> {
        let key = release.key();

        let release = if release.state() == Some(ReleaseState::Deleting) {
            release
        } else {
            self.transition(release, ReleaseState::Deleting).await?
        };

        let retrying_uninstall = release
            .last_deploy()
            .map(|r| r.operation == Operation::Uninstall)
            .unwrap_or(false);
        if retrying_uninstall {
            if let Some(wait) = self.backoff_remaining(&release.status) {
                return Ok(Action::requeue(wait));
            }
        }

        let outcome = match self.target(&release).await? {
            Target::Gone { cluster } => {
                tracing::info!(release = %key, cluster = %cluster, "cluster gone, skipping uninstall");
                Ok(HelmResult::default())
            }
            target => self.run(&release, Operation::Uninstall, &target).await,
        };

        match outcome {
            Ok(_) => {
                if !release.is_terminating() {
                    self.store.request_deletion(&key).await?;
                }
                self.store.finalize(&key).await?;
                tracing::info!(release = %key, "release uninstalled and removed");
                Ok(Action::await_change())
            }
            Err(e) => {
                tracing::warn!(release = %key, error = %e, "release uninstall failed");
                let now = self.now();
                let message = truncate(&e.to_string(), self.config.message_limit);
                let record = DeployRecord {
                    state: DeployState::Failed,
                    operation: Operation::Uninstall,
                    version: release.status.version,
                    message: message.clone(),
                    time: now,
                };
                let cap = self.config.history_cap;
                let written = self
                    .update_status(release, |r| {
                        r.status.deploy_history.record_capped(record.clone(), cap);
                        r.status.message = message.clone();
                        r.status.last_update = Some(now);
                    })
                    .await?;
                let failures = written.status.deploy_history.consecutive_failures();
                Ok(Action::requeue(release_retry_after(failures, self.config.backoff_cap)))
            }
        }
    }

    /// Apply `mutate` and write status, re-reading and reapplying on conflict
    async fn update_status<F>(&self, mut release: Release, mutate: F) -> Result<Release>
    where
        F: Fn(&mut Release) + Send + Sync,
    {
        let key = release.key();
        let mut attempt = 1;
        loop {
            mutate(&mut release);
            match self.store.update_status(&release).await {
                Ok(updated) => return Ok(updated),
                Err(e) if e.is_conflict() && attempt < STATUS_WRITE_ATTEMPTS => {
                    tracing::debug!(release = %key, attempt, "status write conflicted, retrying");
                    attempt += 1;
                    release = self.store.get(&key).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postrender::RELEASE_LABEL;
    use crate::process::{FakeProcess, ProcessCommand, ProcessExecutor, ProcessOutput};
    use crate::ports::StaticClusterClient;
    use crate::release::ChartRef;
    use crate::store::MemoryReleaseStore;
    use async_trait::async_trait;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use chartyard_repo::{DefaultChartLoader, MemoryRepositoryStore};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct Harness {
        store: MemoryReleaseStore,
        process: Arc<FakeProcess>,
        clusters: Arc<StaticClusterClient>,
        clock: Arc<Mutex<DateTime<Utc>>>,
        reconciler: ReleaseReconciler,
        _workspace: TempDir,
    }

    impl Harness {
        fn advance(&self, by: Duration) {
            let mut now = self.clock.lock().unwrap();
            *now += chrono::Duration::from_std(by).unwrap();
        }

        fn release(&self, key: &ReleaseKey) -> Release {
            self.store.peek(key).unwrap()
        }
    }

    fn inline_chart(name: &str) -> ChartRef {
        ChartRef::Inline {
            name: name.to_string(),
            data: STANDARD.encode(b"chart-archive"),
        }
    }

    fn harness_with(process: Arc<dyn ProcessExecutor>, fake: Arc<FakeProcess>, store: MemoryReleaseStore) -> Harness {
        let workspace = TempDir::new().unwrap();
        let clusters = Arc::new(StaticClusterClient::new());
        let clock = Arc::new(Mutex::new(Utc::now()));

        let charts = ChartResolver::new(
            Arc::new(MemoryRepositoryStore::new()),
            Arc::new(DefaultChartLoader::new()),
        );
        let executor = HelmExecutor::new(process, "helm").with_workspace_dir(workspace.path());
        let now = clock.clone();
        let reconciler = ReleaseReconciler::new(
            Arc::new(store.clone()),
            charts,
            executor,
            Arc::new(PostRenderer::new()),
            ReleaseConfig::default(),
        )
        .with_cluster_client(clusters.clone())
        .with_clock(Arc::new(move || *now.lock().unwrap()));

        Harness {
            store,
            process: fake,
            clusters,
            clock,
            reconciler,
            _workspace: workspace,
        }
    }

    fn harness() -> Harness {
        let fake = Arc::new(FakeProcess::new());
        harness_with(fake.clone(), fake, MemoryReleaseStore::new())
    }

    fn create(h: &Harness, release: Release) -> ReleaseKey {
        h.store.apply(release).key()
    }

    fn bump(h: &Harness, key: &ReleaseKey) {
        let mut release = h.release(key);
        release.spec.version += 1;
        h.store.apply(release);
    }

    #[tokio::test]
    async fn test_missing_release_awaits_change() {
        let h = harness();
        let action = h
            .reconciler
            .reconcile(&ReleaseKey::new("default", "ghost"))
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
        assert!(h.process.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_new_release_installs_and_settles() {
        let h = harness();
        let key = create(&h, Release::new("prod", "web", inline_chart("web-1.0.0.tgz")));

        let action = h.reconciler.reconcile(&key).await.unwrap();
        assert_eq!(action, Action::await_change());

        let release = h.release(&key);
        assert_eq!(release.state(), Some(ReleaseState::Active));
        assert_eq!(release.status.version, 1);
        assert!(release.status.last_deployed.is_some());
        assert_eq!(release.status.deploy_history.len(), 1);
        assert_eq!(h.process.count("install"), 1);
        assert!(h.process.invocations()[0].files.contains(&"web-1.0.0.tgz".to_string()));

        // settled: a second pass does not touch the package manager
        let action = h.reconciler.reconcile(&key).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(h.process.invocations().len(), 1);
    }

    #[tokio::test]
    async fn test_values_staged_for_install() {
        let h = harness();
        let key = create(
            &h,
            Release::new("prod", "web", inline_chart("web-1.0.0.tgz")).with_values("replicas: 3\n"),
        );

        h.reconciler.reconcile(&key).await.unwrap();
        let files = &h.process.invocations()[0].files;
        assert!(files.contains(&"values.yaml".to_string()));
    }

    #[tokio::test]
    async fn test_version_bump_upgrades() {
        let h = harness();
        let key = create(&h, Release::new("prod", "web", inline_chart("web-1.0.0.tgz")));
        h.reconciler.reconcile(&key).await.unwrap();

        bump(&h, &key);
        let action = h.reconciler.reconcile(&key).await.unwrap();
        assert_eq!(action, Action::await_change());

        let release = h.release(&key);
        assert_eq!(release.state(), Some(ReleaseState::Active));
        assert_eq!(release.status.version, 2);
        assert_eq!(h.process.count("install"), 1);
        assert_eq!(h.process.count("upgrade"), 1);
        assert_eq!(release.last_deploy().unwrap().operation, Operation::Upgrade);
    }

    /// Records the stored state each time the package manager runs and can
    /// bump the requested version mid-operation
    struct Observing {
        inner: Arc<FakeProcess>,
        store: MemoryReleaseStore,
        key: ReleaseKey,
        seen: Mutex<Vec<Option<ReleaseState>>>,
        bump_during: Mutex<Option<String>>,
    }

    #[async_trait]
    impl ProcessExecutor for Observing {
        async fn execute(&self, command: &ProcessCommand) -> Result<ProcessOutput> {
            let current = self.store.peek(&self.key).unwrap();
            self.seen.lock().unwrap().push(current.state());

            let verb = command.args.first().cloned().unwrap_or_default();
            if self.bump_during.lock().unwrap().as_deref() == Some(verb.as_str()) {
                let mut release = current;
                release.spec.version += 1;
                self.store.apply(release);
            }
            self.inner.execute(command).await
        }
    }

    fn observing(key: &ReleaseKey, bump_during: Option<&str>) -> (Harness, Arc<Observing>) {
        let fake = Arc::new(FakeProcess::new());
        let store = MemoryReleaseStore::new();
        let observer = Arc::new(Observing {
            inner: fake.clone(),
            store: store.clone(),
            key: key.clone(),
            seen: Mutex::new(Vec::new()),
            bump_during: Mutex::new(bump_during.map(str::to_string)),
        });
        (harness_with(observer.clone(), fake, store), observer)
    }

    #[tokio::test]
    async fn test_transitional_state_persisted_before_operation() {
        let key = ReleaseKey::new("prod", "web");
        let (h, observer) = observing(&key, None);
        create(&h, Release::new("prod", "web", inline_chart("web-1.0.0.tgz")));

        h.reconciler.reconcile(&key).await.unwrap();
        bump(&h, &key);
        h.reconciler.reconcile(&key).await.unwrap();

        assert_eq!(
            *observer.seen.lock().unwrap(),
            vec![Some(ReleaseState::Creating), Some(ReleaseState::Upgrading)]
        );
        assert_eq!(h.release(&key).state(), Some(ReleaseState::Active));
    }

    #[tokio::test]
    async fn test_spec_change_during_install_leaves_upgrade_pending() {
        let key = ReleaseKey::new("prod", "web");
        let (h, _observer) = observing(&key, Some("install"));
        create(&h, Release::new("prod", "web", inline_chart("web-1.0.0.tgz")));

        let action = h.reconciler.reconcile(&key).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::ZERO));

        let release = h.release(&key);
        assert_eq!(release.status.version, 1);
        assert_eq!(release.spec.version, 2);
        assert_eq!(release.state(), Some(ReleaseState::Upgrading));

        h.reconciler.reconcile(&key).await.unwrap();
        let release = h.release(&key);
        assert!(release.is_settled());
        assert_eq!(release.status.version, 2);
    }

    #[tokio::test]
    async fn test_failure_backs_off_exponentially() {
        let h = harness();
        h.process
            .respond("install", ProcessOutput::failure(1, "Error: INSTALLATION FAILED"));
        let key = create(&h, Release::new("prod", "web", inline_chart("fail-1.0.0.tgz")));

        let mut delays = Vec::new();
        for _ in 0..4 {
            let action = h.reconciler.reconcile(&key).await.unwrap();
            let delay = action.requeue_after().unwrap();
            delays.push(delay);

            // an early wake-up must not retry
            let early = h.reconciler.reconcile(&key).await.unwrap();
            assert_eq!(early, Action::requeue(delay));
            h.advance(delay);
        }

        assert_eq!(
            delays,
            [2, 4, 8, 16].map(Duration::from_secs).to_vec()
        );
        assert_eq!(h.process.count("install"), 4);

        let release = h.release(&key);
        assert_eq!(release.state(), Some(ReleaseState::Failed));
        assert_eq!(release.status.version, 0);
        assert!(release.status.message.contains("INSTALLATION FAILED"));
        assert_eq!(release.status.deploy_history.consecutive_failures(), 4);
    }

    #[tokio::test]
    async fn test_backoff_capped() {
        let h = harness();
        h.process.respond("install", ProcessOutput::failure(1, "boom"));
        let key = create(&h, Release::new("prod", "web", inline_chart("fail-1.0.0.tgz")));

        let mut last = Duration::ZERO;
        for _ in 0..12 {
            let delay = h
                .reconciler
                .reconcile(&key)
                .await
                .unwrap()
                .requeue_after()
                .unwrap();
            assert!(delay >= last);
            assert!(delay <= ReleaseConfig::default().backoff_cap);
            last = delay;
            h.advance(delay);
        }
        assert_eq!(last, ReleaseConfig::default().backoff_cap);

        // history keeps the newest attempts only
        let last_pass_at = *h.clock.lock().unwrap() - chrono::Duration::from_std(last).unwrap();
        let release = h.release(&key);
        let history = &release.status.deploy_history;
        assert_eq!(history.len(), ReleaseConfig::default().history_cap);
        assert_eq!(history.latest().unwrap().time, last_pass_at);
        assert_eq!(history.consecutive_failures(), 10);
    }

    #[tokio::test]
    async fn test_failed_release_recovers() {
        let h = harness();
        h.process.respond("install", ProcessOutput::failure(1, "boom"));
        let key = create(&h, Release::new("prod", "web", inline_chart("web-1.0.0.tgz")));
        h.reconciler.reconcile(&key).await.unwrap();

        h.process.respond("install", ProcessOutput::success("installed"));
        h.advance(Duration::from_secs(2));
        let action = h.reconciler.reconcile(&key).await.unwrap();
        assert_eq!(action, Action::await_change());

        let release = h.release(&key);
        assert!(release.is_settled());
        assert_eq!(release.status.deploy_history.consecutive_failures(), 0);
        assert_eq!(release.status.message, "installed");
    }

    #[tokio::test]
    async fn test_failed_upgrade_retries_as_upgrade() {
        let h = harness();
        let key = create(&h, Release::new("prod", "web", inline_chart("web-1.0.0.tgz")));
        h.reconciler.reconcile(&key).await.unwrap();

        h.process.respond("upgrade", ProcessOutput::failure(1, "Error: UPGRADE FAILED"));
        bump(&h, &key);
        h.reconciler.reconcile(&key).await.unwrap();
        assert_eq!(h.release(&key).state(), Some(ReleaseState::Failed));
        assert_eq!(h.release(&key).status.version, 1);

        h.advance(Duration::from_secs(2));
        h.reconciler.reconcile(&key).await.unwrap();
        assert_eq!(h.process.count("install"), 1);
        assert_eq!(h.process.count("upgrade"), 2);
    }

    #[tokio::test]
    async fn test_long_error_message_truncated() {
        let h = harness();
        h.process
            .respond("install", ProcessOutput::failure(1, "x".repeat(10_000)));
        let key = create(&h, Release::new("prod", "web", inline_chart("web-1.0.0.tgz")));
        h.reconciler.reconcile(&key).await.unwrap();

        let limit = ReleaseConfig::default().message_limit;
        let release = h.release(&key);
        assert!(release.status.message.chars().count() <= limit);
        assert!(release.last_deploy().unwrap().message.chars().count() <= limit);
    }

    #[tokio::test]
    async fn test_chart_resolution_failure_is_recorded() {
        let h = harness();
        let key = create(
            &h,
            Release::new(
                "prod",
                "web",
                ChartRef::AppStore {
                    workspace: "team-a".to_string(),
                    version_name: "web-1.0.0".to_string(),
                },
            ),
        );

        let action = h.reconciler.reconcile(&key).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(2)));

        let release = h.release(&key);
        assert_eq!(release.state(), Some(ReleaseState::Failed));
        assert!(release.status.message.contains("team-a/web-1.0.0"));
        assert!(h.process.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_cluster_is_recorded() {
        let fake = Arc::new(FakeProcess::new());
        let store = MemoryReleaseStore::new();
        let workspace = TempDir::new().unwrap();
        let charts = ChartResolver::new(
            Arc::new(MemoryRepositoryStore::new()),
            Arc::new(DefaultChartLoader::new()),
        );
        let now = Utc::now();
        let reconciler = ReleaseReconciler::new(
            Arc::new(store.clone()),
            charts,
            HelmExecutor::new(fake.clone(), "helm").with_workspace_dir(workspace.path()),
            Arc::new(PostRenderer::new()),
            ReleaseConfig::default(),
        )
        .with_clock(Arc::new(move || now));

        let key = store
            .apply(Release::new("prod", "web", inline_chart("web-1.0.0.tgz")).with_cluster("edge"))
            .key();

        let action = reconciler.reconcile(&key).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(2)));

        let release = store.peek(&key).unwrap();
        assert_eq!(release.state(), Some(ReleaseState::Failed));
        assert!(release.status.message.contains("edge"));
        let record = release.last_deploy().unwrap();
        assert_eq!(record.state, DeployState::Failed);
        assert_eq!(record.operation, Operation::Install);
        assert!(fake.invocations().is_empty());

        // still inside the backoff window
        let action = reconciler.reconcile(&key).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(2)));
        assert_eq!(store.peek(&key).unwrap().status.deploy_history.len(), 1);
    }

    #[tokio::test]
    async fn test_deletion_uninstalls_exactly_once() {
        let h = harness();
        let key = create(&h, Release::new("prod", "web", inline_chart("web-1.0.0.tgz")));
        h.reconciler.reconcile(&key).await.unwrap();

        h.store.request_deletion(&key).await.unwrap();
        let action = h.reconciler.reconcile(&key).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(h.store.peek(&key).is_none());
        assert_eq!(h.process.count("uninstall"), 1);

        h.reconciler.reconcile(&key).await.unwrap();
        assert_eq!(h.process.count("uninstall"), 1);
    }

    #[tokio::test]
    async fn test_deletion_of_absent_release_completes() {
        let h = harness();
        h.process
            .respond("uninstall", ProcessOutput::failure(1, crate::executor::RELEASE_NOT_FOUND));
        let key = create(&h, Release::new("prod", "web", inline_chart("web-1.0.0.tgz")));

        h.store.request_deletion(&key).await.unwrap();
        h.reconciler.reconcile(&key).await.unwrap();
        assert!(h.store.peek(&key).is_none());
        assert_eq!(h.process.count("install"), 0);
    }

    #[tokio::test]
    async fn test_uninstall_failure_retried_with_backoff() {
        let h = harness();
        let key = create(&h, Release::new("prod", "web", inline_chart("web-1.0.0.tgz")));
        h.reconciler.reconcile(&key).await.unwrap();

        h.process
            .respond("uninstall", ProcessOutput::failure(1, "Error: cluster unreachable"));
        h.store.request_deletion(&key).await.unwrap();

        let action = h.reconciler.reconcile(&key).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(2)));
        let release = h.release(&key);
        assert_eq!(release.state(), Some(ReleaseState::Deleting));
        assert!(release.status.message.contains("cluster unreachable"));

        let early = h.reconciler.reconcile(&key).await.unwrap();
        assert_eq!(early, Action::requeue(Duration::from_secs(2)));
        assert_eq!(h.process.count("uninstall"), 1);

        h.process.respond("uninstall", ProcessOutput::success("uninstalled"));
        h.advance(Duration::from_secs(2));
        h.reconciler.reconcile(&key).await.unwrap();
        assert!(h.store.peek(&key).is_none());
        assert_eq!(h.process.count("uninstall"), 2);
    }

    #[tokio::test]
    async fn test_remote_cluster_gets_kubeconfig() {
        let h = harness();
        h.clusters.insert("edge", "apiVersion: v1\nkind: Config\n");
        let key = create(
            &h,
            Release::new("prod", "web", inline_chart("web-1.0.0.tgz")).with_cluster("edge"),
        );

        h.reconciler.reconcile(&key).await.unwrap();
        let invocation = &h.process.invocations()[0];
        assert!(invocation.files.contains(&"kubeconfig".to_string()));
        assert!(invocation.command.args.contains(&"--kubeconfig".to_string()));
    }

    #[tokio::test]
    async fn test_gone_cluster_deletes_without_uninstall() {
        let h = harness();
        h.clusters.insert("edge", "apiVersion: v1\nkind: Config\n");
        let key = create(
            &h,
            Release::new("prod", "web", inline_chart("web-1.0.0.tgz")).with_cluster("edge"),
        );
        h.reconciler.reconcile(&key).await.unwrap();

        h.clusters.remove("edge");
        let action = h.reconciler.reconcile(&key).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(h.store.peek(&key).is_none());
        assert_eq!(h.process.count("uninstall"), 0);
    }

    #[tokio::test]
    async fn test_host_cluster_never_self_deletes() {
        let h = harness();
        let key = create(
            &h,
            Release::new("prod", "web", inline_chart("web-1.0.0.tgz")).with_cluster("host"),
        );

        h.reconciler.reconcile(&key).await.unwrap();
        let release = h.release(&key);
        assert!(release.is_settled());
        assert!(!release.is_terminating());
        assert!(!h.process.invocations()[0]
            .command
            .args
            .contains(&"--kubeconfig".to_string()));
    }

    #[tokio::test]
    async fn test_manifest_is_post_rendered() {
        let h = harness();
        h.process.respond(
            "get-manifest",
            ProcessOutput::success("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: web\n"),
        );
        let key = create(&h, Release::new("prod", "web", inline_chart("web-1.0.0.tgz")));

        let manifest = h.reconciler.manifest_of(&key).await.unwrap();
        assert!(manifest.contains(RELEASE_LABEL));
        assert!(manifest.contains("name: web"));

        let status = h.reconciler.status_of(&key).await.unwrap();
        assert_eq!(status.message, "status ok");
    }

    #[tokio::test]
    async fn test_render_is_dry_run() {
        let h = harness();
        h.process.respond(
            "install",
            ProcessOutput::success("kind: Service\nmetadata:\n  name: web\n"),
        );
        let release = Release::new("prod", "web", inline_chart("web-1.0.0.tgz"));

        let manifest = h.reconciler.render(&release).await.unwrap();
        assert!(manifest.contains(RELEASE_LABEL));
        assert!(h.process.invocations()[0]
            .command
            .args
            .contains(&"--dry-run".to_string()));
        assert_eq!(h.store.release_count(), 0);
    }
}
