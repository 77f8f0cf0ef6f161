//! IndexMerger - reconcile a fetched index against the persisted snapshot
//!
//! The merge is a set reconciliation keyed first by chart name, then by
//! version string. Identifiers are minted only for names and versions the
//! snapshot has never seen; everything already tracked keeps its id, and
//! anything upstream no longer lists is dropped.

use chartyard_core::{new_id, APP_ID_PREFIX, VERSION_ID_PREFIX};
use std::collections::{HashMap, HashSet};

use crate::index::{compare_versions, ChartEntry, RepositoryIndex};
use crate::snapshot::{Application, ChartVersion, Snapshot};

/// What a merge changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub added_applications: usize,
    pub removed_applications: usize,
    pub added_versions: usize,
    pub removed_versions: usize,
}

impl MergeSummary {
    pub fn is_unchanged(&self) -> bool {
        self == &Self::default()
    }
}

/// Merge `index` into `previous`, returning the new snapshot
pub fn merge(index: &RepositoryIndex, previous: Snapshot) -> Snapshot {
    merge_with_summary(index, previous).0
}

/// Merge `index` into `previous`, also reporting what changed
pub fn merge_with_summary(index: &RepositoryIndex, previous: Snapshot) -> (Snapshot, MergeSummary) {
    let mut snapshot = previous;
    let mut summary = MergeSummary::default();

    for (name, entries) in &index.entries {
        let upstream = dedup_versions(entries);
        if upstream.is_empty() {
            continue;
        }

        match snapshot.applications.get_mut(name) {
            None => {
                let versions: Vec<_> = upstream
                    .iter()
                    .map(|entry| ChartVersion {
                        application_version_id: new_id(VERSION_ID_PREFIX),
                        chart: (*entry).clone(),
                    })
                    .collect();
                summary.added_applications += 1;
                summary.added_versions += versions.len();

                let mut app = Application {
                    application_id: new_id(APP_ID_PREFIX),
                    name: name.clone(),
                    description: None,
                    icon: None,
                    versions,
                };
                refresh_presentation(&mut app, &upstream);
                snapshot.applications.insert(name.clone(), app);
            }
            Some(app) => {
                let tracked: HashMap<String, usize> = app
                    .versions
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (v.chart.version.clone(), i))
                    .collect();

                for entry in &upstream {
                    match tracked.get(&entry.version) {
                        Some(&i) => app.versions[i].chart = (*entry).clone(),
                        None => {
                            app.versions.push(ChartVersion {
                                application_version_id: new_id(VERSION_ID_PREFIX),
                                chart: (*entry).clone(),
                            });
                            summary.added_versions += 1;
                        }
                    }
                }

                let live: HashSet<&str> = upstream.iter().map(|e| e.version.as_str()).collect();
                let before = app.versions.len();
                app.versions.retain(|v| live.contains(v.chart.version.as_str()));
                summary.removed_versions += before - app.versions.len();

                refresh_presentation(app, &upstream);
            }
        }
    }

    snapshot.applications.retain(|name, app| {
        let keep = index
            .entries
            .get(name)
            .map(|entries| !entries.is_empty())
            .unwrap_or(false);
        if !keep {
            summary.removed_applications += 1;
            summary.removed_versions += app.versions.len();
        }
        keep
    });

    (snapshot, summary)
}

/// Upstream versions in listed order, first occurrence of a version string wins
fn dedup_versions(entries: &[ChartEntry]) -> Vec<&ChartEntry> {
    let mut seen = HashSet::new();
    entries
        .iter()
        .filter(|e| seen.insert(e.version.as_str()))
        .collect()
}

/// Application-level description and icon follow the newest upstream version
fn refresh_presentation(app: &mut Application, upstream: &[&ChartEntry]) {
    if let Some(latest) = upstream.iter().copied().max_by(|a, b| compare_versions(a, b)) {
        app.description = latest.description.clone();
        app.icon = latest.icon.clone();
    }
}
