//! Keeps the root of the test tree in sync with the feature files on disk.
//!
//! Feature nodes are a shallow index created eagerly; their scenario children
//! are only computed when a node is resolved or its file changes.

use std::path::Path;
use std::sync::Arc;

use crate::config::DEFAULT_FEATURE_GLOB;
use crate::error::Result;
use crate::host::OutputChannel;
use crate::parser::FeatureParser;
use crate::tree::{TestNode, TestTree};
use crate::workspace::Workspace;

/// Discovery engine for feature files.
pub struct Discovery {
    workspace: Arc<dyn Workspace>,
    output: Arc<dyn OutputChannel>,
    parser: FeatureParser,
    feature_glob: String,
}

impl Discovery {
    pub fn new(workspace: Arc<dyn Workspace>, output: Arc<dyn OutputChannel>) -> Self {
        let parser = FeatureParser::new(workspace.clone(), output.clone());
        Self {
            workspace,
            output,
            parser,
            feature_glob: DEFAULT_FEATURE_GLOB.to_string(),
        }
    }

    pub fn with_feature_glob(mut self, feature_glob: impl Into<String>) -> Self {
        self.feature_glob = feature_glob.into();
        self
    }

    pub fn feature_glob(&self) -> &str {
        &self.feature_glob
    }

    pub fn parser(&self) -> &FeatureParser {
        &self.parser
    }

    /// Replace the whole tree with one unparsed Feature node per matching file.
    ///
    /// Returns the number of features found. A failing file query aborts the scan
    /// before the tree is touched.
    pub async fn discover_all_tests(&self, tree: &mut TestTree) -> Result<usize> {
        self.output.append_line(&format!(
            "Discovering feature files matching {}",
            self.feature_glob
        ));
        let files = self.workspace.find_files(&self.feature_glob).await?;

        tree.replace(Vec::new());
        for path in &files {
            tree.add(TestNode::feature(path));
        }

        self.output
            .append_line(&format!("Found {} feature files", files.len()));
        tracing::info!(
            root = %self.workspace.root().display(),
            features = files.len(),
            "discovered feature files"
        );
        Ok(files.len())
    }

    /// Insert an unparsed Feature node for a newly created file.
    pub fn add_test_for_file(&self, tree: &mut TestTree, path: &Path) {
        let node = TestNode::feature(path);
        self.output
            .append_line(&format!("Adding feature file: {}", path.display()));
        tree.add(node);
    }

    /// Re-parse the Feature node for `path`. Unknown paths are ignored.
    pub async fn update_test_for_file(&self, tree: &mut TestTree, path: &Path) {
        let id = path.to_string_lossy();
        match tree.get_mut(&id) {
            Some(node) => self.parser.parse_test_file(node).await,
            None => tracing::debug!(path = %path.display(), "update for unknown feature ignored"),
        }
    }

    /// Drop the Feature node for `path`. Unknown paths are ignored.
    pub fn remove_test_for_file(&self, tree: &mut TestTree, path: &Path) {
        if tree.delete(&path.to_string_lossy()).is_some() {
            self.output
                .append_line(&format!("Removed feature file: {}", path.display()));
        }
    }

    /// Resolve handler: `None` rescans everything, `Some(id)` parses that feature.
    pub async fn resolve(&self, tree: &mut TestTree, id: Option<&str>) -> Result<()> {
        match id {
            None => {
                self.discover_all_tests(tree).await?;
            }
            Some(id) => {
                if let Some(node) = tree.get_mut(id) {
                    self.parser.parse_test_file(node).await;
                }
            }
        }
        Ok(())
    }

    /// Parse every Feature node currently in the tree.
    pub async fn resolve_all(&self, tree: &mut TestTree) {
        for node in tree.iter_mut() {
            self.parser.parse_test_file(node).await;
        }
    }
}
