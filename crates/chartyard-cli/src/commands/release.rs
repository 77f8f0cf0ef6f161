//! Release commands - dry-run rendering through the package manager

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::path::Path;
use std::sync::Arc;

use chartyard_core::ChartyardConfig;
use chartyard_release::{
    ChartRef, ChartResolver, HelmExecutor, MemoryReleaseStore, PostRenderer, Release,
    ReleaseReconciler, TokioProcessExecutor,
};
use chartyard_repo::{DefaultChartLoader, MemoryRepositoryStore};

use crate::error::{CliError, Result};

/// Options for `release render`
#[derive(Debug)]
pub struct RenderArgs<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
    pub chart: &'a Path,
    pub values: Option<&'a Path>,
    pub mock: bool,
    pub debug: bool,
}

/// Render a local chart archive as the reconciler would install it, without
/// touching a cluster
pub async fn render(args: RenderArgs<'_>, config: &ChartyardConfig) -> Result<()> {
    let archive = std::fs::read(args.chart)?;
    let file_name = args
        .chart
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| CliError::input(format!("{} is not a file", args.chart.display())))?;
    let values = match args.values {
        Some(path) => std::fs::read_to_string(path)?,
        None => String::new(),
    };

    let mut helm = config.helm.clone();
    helm.mock |= args.mock;
    helm.debug |= args.debug;
    let executor = HelmExecutor::from_config(&helm, Arc::new(TokioProcessExecutor::new()))?;

    let charts = ChartResolver::new(
        Arc::new(MemoryRepositoryStore::new()),
        Arc::new(DefaultChartLoader::new()),
    );
    let reconciler = ReleaseReconciler::new(
        Arc::new(MemoryReleaseStore::new()),
        charts,
        executor,
        Arc::new(PostRenderer::new()),
        config.release.clone(),
    );

    let release = Release::new(
        args.namespace,
        args.name,
        ChartRef::Inline {
            name: file_name,
            data: STANDARD.encode(&archive),
        },
    )
    .with_values(values);

    tracing::debug!(release = %release.key(), chart = %args.chart.display(), "rendering release");
    let manifest = reconciler.render(&release).await?;
    print!("{}", manifest);
    Ok(())
}
