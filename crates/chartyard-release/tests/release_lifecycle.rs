//! Release lifecycle against a synced repository and the built-in mock package manager

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chartyard_core::{Action, ReleaseConfig, SyncConfig};
use chartyard_release::{
    ChartRef, ChartResolver, FakeProcess, HelmExecutor, MOCK_HELM_SENTINEL, MemoryReleaseStore,
    Operation, PostRenderer, ProcessCommand, ProcessExecutor, ProcessOutput, Release, ReleaseKey,
    ReleaseReconciler, ReleaseState, ReleaseStore, mock_helm,
};
use chartyard_repo::{
    DefaultChartLoader, MemoryRepositoryStore, RepoIndexSyncer, Repository, RepositoryStore,
};
use chrono::{DateTime, Utc};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const INDEX: &str = r#"
apiVersion: v1
entries:
  nginx:
    - name: nginx
      version: "15.0.0"
      urls:
        - charts/nginx-15.0.0.tgz
    - name: nginx
      version: "14.0.0"
      urls:
        - charts/nginx-14.0.0.tgz
"#;

/// Runs the mock package manager in-process, the way the binary would after
/// re-executing itself with the sentinel
struct InProcessMock {
    calls: Mutex<Vec<Vec<String>>>,
}

impl InProcessMock {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }

    fn count(&self, verb: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|args| args.first().map(String::as_str) == Some(verb))
            .count()
    }
}

#[async_trait]
impl ProcessExecutor for InProcessMock {
    async fn execute(&self, command: &ProcessCommand) -> chartyard_release::Result<ProcessOutput> {
        assert_eq!(command.args.first().map(String::as_str), Some(MOCK_HELM_SENTINEL));
        let args = command.args[1..].to_vec();
        self.calls.lock().unwrap().push(args.clone());
        Ok(mock_helm(&args))
    }
}

struct World {
    releases: MemoryReleaseStore,
    reconciler: ReleaseReconciler,
    clock: Arc<Mutex<DateTime<Utc>>>,
    _workspace: TempDir,
}

impl World {
    fn advance(&self, by: Duration) {
        *self.clock.lock().unwrap() += chrono::Duration::from_std(by).unwrap();
    }

    fn get(&self, key: &ReleaseKey) -> Release {
        self.releases.peek(key).unwrap()
    }
}

fn world(repositories: MemoryRepositoryStore, process: Arc<dyn ProcessExecutor>, sentinel: bool) -> World {
    let workspace = TempDir::new().unwrap();
    let releases = MemoryReleaseStore::new();
    let clock = Arc::new(Mutex::new(Utc::now()));

    let mut executor = HelmExecutor::new(process, "chartyard").with_workspace_dir(workspace.path());
    if sentinel {
        executor = executor.with_leading_args([MOCK_HELM_SENTINEL]);
    }
    let charts = ChartResolver::new(Arc::new(repositories), Arc::new(DefaultChartLoader::new()));
    let now = clock.clone();
    let reconciler = ReleaseReconciler::new(
        Arc::new(releases.clone()),
        charts,
        executor,
        Arc::new(PostRenderer::new()),
        ReleaseConfig::default(),
    )
    .with_clock(Arc::new(move || *now.lock().unwrap()));

    World {
        releases,
        reconciler,
        clock,
        _workspace: workspace,
    }
}

fn inline(name: &str) -> ChartRef {
    ChartRef::Inline {
        name: name.to_string(),
        data: STANDARD.encode(b"chart-archive"),
    }
}

/// Sync a repository from a wiremock server and return a chart reference to nginx 15.0.0
async fn synced_repository(server: &MockServer) -> (MemoryRepositoryStore, ChartRef) {
    Mock::given(method("GET"))
        .and(path("/index.yaml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(INDEX))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/charts/nginx-15.0.0.tgz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"nginx-archive".to_vec()))
        .mount(server)
        .await;

    let store = MemoryRepositoryStore::new();
    store.apply(Repository::new("stable", server.uri()));
    RepoIndexSyncer::new(
        Arc::new(store.clone()),
        Arc::new(DefaultChartLoader::new()),
        SyncConfig::default(),
    )
    .reconcile("stable")
    .await
    .unwrap();

    let snapshot = store.get("stable").await.unwrap().snapshot().unwrap();
    let app = &snapshot.applications["nginx"];
    let version = app
        .versions
        .iter()
        .find(|v| v.chart.version == "15.0.0")
        .unwrap();

    let chart = ChartRef::Repository {
        repository: "stable".to_string(),
        application_id: app.application_id.clone(),
        version_id: version.application_version_id.clone(),
    };
    (store, chart)
}

#[tokio::test]
async fn test_install_from_synced_repository() {
    let server = MockServer::start().await;
    let (repositories, chart) = synced_repository(&server).await;
    let process = Arc::new(FakeProcess::new());
    let w = world(repositories, process.clone(), false);

    let key = w.releases.apply(Release::new("prod", "web", chart)).key();
    let action = w.reconciler.reconcile(&key).await.unwrap();
    assert_eq!(action, Action::await_change());

    let release = w.get(&key);
    assert_eq!(release.state(), Some(ReleaseState::Active));
    assert_eq!(release.status.version, 1);
    let latest = release.last_deploy().unwrap();
    assert_eq!(latest.operation, Operation::Install);
    assert!(!latest.message.contains("failed"));

    let invocation = &process.invocations()[0];
    assert_eq!(invocation.verb(), Some("install"));
    assert!(invocation.files.contains(&"nginx-15.0.0.tgz".to_string()));
}

#[tokio::test]
async fn test_upgrade_after_version_bump() {
    let mock = Arc::new(InProcessMock::new());
    let w = world(MemoryRepositoryStore::new(), mock.clone(), true);

    let key = w.releases.apply(Release::new("prod", "web", inline("web-1.0.0.tgz"))).key();
    w.reconciler.reconcile(&key).await.unwrap();
    assert!(w.get(&key).is_settled());

    let mut release = w.get(&key);
    release.spec.version = 2;
    release.spec.values = "replicas: 2\n".to_string();
    w.releases.apply(release);

    w.reconciler.reconcile(&key).await.unwrap();
    let release = w.get(&key);
    assert_eq!(release.state(), Some(ReleaseState::Active));
    assert_eq!(release.status.version, 2);
    assert!(release.status.message.contains("has been upgraded"));
    assert_eq!(mock.count("install"), 1);
    assert_eq!(mock.count("upgrade"), 1);

    let history: Vec<_> = release.status.deploy_history.iter().map(|r| r.operation).collect();
    assert_eq!(history, vec![Operation::Upgrade, Operation::Install]);
}

#[tokio::test]
async fn test_failing_chart_backs_off() {
    let mock = Arc::new(InProcessMock::new());
    let w = world(MemoryRepositoryStore::new(), mock.clone(), true);

    let key = w.releases.apply(Release::new("prod", "web", inline("fail-0.1.0.tgz"))).key();

    let mut delays = Vec::new();
    for _ in 0..5 {
        let delay = w
            .reconciler
            .reconcile(&key)
            .await
            .unwrap()
            .requeue_after()
            .unwrap();
        delays.push(delay);
        w.advance(delay);
    }

    assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(mock.count("install"), 5);

    let release = w.get(&key);
    assert_eq!(release.state(), Some(ReleaseState::Failed));
    assert!(release.status.message.contains("INSTALLATION FAILED"));
}

#[tokio::test]
async fn test_delete_uninstalls_once_and_removes() {
    let mock = Arc::new(InProcessMock::new());
    let w = world(MemoryRepositoryStore::new(), mock.clone(), true);

    let key = w.releases.apply(Release::new("prod", "web", inline("web-1.0.0.tgz"))).key();
    w.reconciler.reconcile(&key).await.unwrap();

    w.releases.request_deletion(&key).await.unwrap();
    w.reconciler.reconcile(&key).await.unwrap();
    w.reconciler.reconcile(&key).await.unwrap();

    assert_eq!(mock.count("uninstall"), 1);
    assert!(w.releases.peek(&key).is_none());
    assert!(w.releases.get(&key).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_delete_of_unknown_release_is_idempotent() {
    let mock = Arc::new(InProcessMock::new());
    let w = world(MemoryRepositoryStore::new(), mock.clone(), true);

    let key = w
        .releases
        .apply(Release::new("prod", "missing-web", inline("web-1.0.0.tgz")))
        .key();
    w.releases.request_deletion(&key).await.unwrap();

    let action = w.reconciler.reconcile(&key).await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(mock.count("uninstall"), 1);
    assert!(w.releases.peek(&key).is_none());
}

#[tokio::test]
async fn test_deployed_manifest_is_labelled() {
    let mock = Arc::new(InProcessMock::new());
    let w = world(MemoryRepositoryStore::new(), mock, true);

    let key = w.releases.apply(Release::new("prod", "web", inline("web-1.0.0.tgz"))).key();
    w.reconciler.reconcile(&key).await.unwrap();

    let manifest = w.reconciler.manifest_of(&key).await.unwrap();
    assert_eq!(manifest.matches("chartyard.io/release: web").count(), 2);
    assert_eq!(manifest.matches("chartyard.io/namespace: prod").count(), 2);
}
