//! Polling file watcher that keeps the test tree in sync with edits on disk.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::discovery::Discovery;
use crate::error::Result;
use crate::tree::TestTree;
use crate::workspace::Workspace;

/// Default interval between two scans.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A change to a matching feature file between two scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    Created(PathBuf),
    Changed(PathBuf),
    Deleted(PathBuf),
}

impl FileChange {
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Created(p) | Self::Changed(p) | Self::Deleted(p) => p,
        }
    }
}

/// Content fingerprints of every matching file, keyed by absolute path.
pub type Snapshot = BTreeMap<PathBuf, u64>;

fn fingerprint(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

/// Scan the workspace. Files that vanish between listing and reading are skipped.
pub async fn snapshot(workspace: &dyn Workspace, feature_glob: &str) -> Result<Snapshot> {
    let mut snapshot = Snapshot::new();
    for path in workspace.find_files(feature_glob).await? {
        match workspace.read_text(&path).await {
            Ok(text) => {
                snapshot.insert(path, fingerprint(&text));
            }
            Err(e) => tracing::debug!(path = %path.display(), error = %e, "skipping unreadable file"),
        }
    }
    Ok(snapshot)
}

/// Changes needed to go from `before` to `after`, ordered by path.
pub fn diff(before: &Snapshot, after: &Snapshot) -> Vec<FileChange> {
    let mut changes = Vec::new();
    for (path, hash) in after {
        match before.get(path) {
            None => changes.push(FileChange::Created(path.clone())),
            Some(old) if old != hash => changes.push(FileChange::Changed(path.clone())),
            Some(_) => {}
        }
    }
    for path in before.keys() {
        if !after.contains_key(path) {
            changes.push(FileChange::Deleted(path.clone()));
        }
    }
    changes.sort_by(|a, b| a.path().cmp(b.path()));
    changes
}

/// Apply file events to the tree the same way an editor's watcher would.
///
/// Created files get a node and are parsed straight away, changed files are
/// re-parsed, deleted files lose their node.
pub async fn apply_changes(discovery: &Discovery, tree: &mut TestTree, changes: &[FileChange]) {
    for change in changes {
        match change {
            FileChange::Created(path) => {
                discovery.add_test_for_file(tree, path);
                discovery.update_test_for_file(tree, path).await;
            }
            FileChange::Changed(path) => discovery.update_test_for_file(tree, path).await,
            FileChange::Deleted(path) => discovery.remove_test_for_file(tree, path),
        }
    }
}

/// Polls the workspace and reports changes until cancelled.
pub struct FeatureWatcher<'a> {
    discovery: &'a Discovery,
    workspace: &'a dyn Workspace,
    interval: Duration,
    snapshot: Snapshot,
}

impl<'a> FeatureWatcher<'a> {
    pub fn new(discovery: &'a Discovery, workspace: &'a dyn Workspace) -> Self {
        Self {
            discovery,
            workspace,
            interval: DEFAULT_POLL_INTERVAL,
            snapshot: Snapshot::new(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Take the baseline that later polls are compared against.
    pub async fn prime(&mut self) -> Result<()> {
        self.snapshot = snapshot(self.workspace, self.discovery.feature_glob()).await?;
        Ok(())
    }

    /// Scan once, apply what changed to `tree` and return the changes.
    pub async fn poll(&mut self, tree: &mut TestTree) -> Result<Vec<FileChange>> {
        let current = snapshot(self.workspace, self.discovery.feature_glob()).await?;
        let changes = diff(&self.snapshot, &current);
        self.snapshot = current;
        apply_changes(self.discovery, tree, &changes).await;
        Ok(changes)
    }

    /// Wait for the next non-empty batch of changes, already applied to `tree`.
    ///
    /// Returns `None` once `token` is cancelled. A failing scan is logged and
    /// retried on the next tick.
    pub async fn next_changes(
        &mut self,
        tree: &mut TestTree,
        token: &CancellationToken,
    ) -> Option<Vec<FileChange>> {
        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    tracing::info!("watcher stopped");
                    return None;
                }
                _ = tokio::time::sleep(self.interval) => {
                    match self.poll(tree).await {
                        Ok(changes) if !changes.is_empty() => {
                            tracing::info!(changes = changes.len(), "feature files changed");
                            return Some(changes);
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!(error = %e, "feature scan failed"),
                    }
                }
            }
        }
    }
}
