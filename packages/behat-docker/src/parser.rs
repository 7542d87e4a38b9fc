//! Structural parser for feature files.
//!
//! Only `Feature:`, `Scenario:` and `Scenario Outline:` header lines are
//! recognised. Steps, tables, tags, backgrounds and doc-strings are ignored.

use std::path::Path;
use std::sync::Arc;

use crate::host::OutputChannel;
use crate::tree::{Range, TestNode, SCENARIO_SEPARATOR};
use crate::workspace::Workspace;

/// The kind of header line a token was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    Feature,
    Scenario,
    ScenarioOutline,
}

impl HeaderKind {
    // Longer keywords first: "Scenario Outline:" must never be read as "Scenario".
    const MATCH_ORDER: [HeaderKind; 3] = [
        HeaderKind::Feature,
        HeaderKind::ScenarioOutline,
        HeaderKind::Scenario,
    ];

    /// Keyword as written in the file.
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Feature => "Feature:",
            Self::Scenario => "Scenario:",
            Self::ScenarioOutline => "Scenario Outline:",
        }
    }

    /// Prefix of the node label.
    pub fn label_prefix(self) -> &'static str {
        match self {
            Self::Feature => "Feature: ",
            Self::Scenario => "Scenario: ",
            Self::ScenarioOutline => "Scenario Outline: ",
        }
    }

    pub fn is_scenario(self) -> bool {
        !matches!(self, Self::Feature)
    }
}

/// A header line found by [`tokenize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderToken<'a> {
    pub kind: HeaderKind,
    /// Zero-based line index.
    pub line: usize,
    /// Text after the keyword, trimmed.
    pub title: &'a str,
    /// Length in characters of the whole line.
    pub line_len: usize,
    /// Length in characters of the trimmed line.
    pub trimmed_len: usize,
}

/// Split `text` into lines and return every header line, in file order.
pub fn tokenize(text: &str) -> Vec<HeaderToken<'_>> {
    text.split('\n')
        .enumerate()
        .filter_map(|(line, raw)| {
            let raw = raw.strip_suffix('\r').unwrap_or(raw);
            let trimmed = raw.trim();
            HeaderKind::MATCH_ORDER.iter().find_map(|&kind| {
                trimmed.strip_prefix(kind.keyword()).map(|rest| HeaderToken {
                    kind,
                    line,
                    title: rest.trim(),
                    line_len: raw.chars().count(),
                    trimmed_len: trimmed.chars().count(),
                })
            })
        })
        .collect()
}

/// Structure of one feature file, independent of any tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureOutline<'a> {
    /// The first `Feature:` header, if any.
    pub feature: Option<HeaderToken<'a>>,
    /// Every scenario header, in file order.
    pub scenarios: Vec<HeaderToken<'a>>,
}

impl<'a> FeatureOutline<'a> {
    pub fn from_text(text: &'a str) -> Self {
        let tokens = tokenize(text);
        let feature = tokens.iter().copied().find(|t| t.kind == HeaderKind::Feature);
        let scenarios = tokens.into_iter().filter(|t| t.kind.is_scenario()).collect();
        Self { feature, scenarios }
    }

    /// Feature title, falling back to the file's base name.
    pub fn title(&self, path: &Path) -> String {
        match &self.feature {
            Some(token) => token.title.to_string(),
            None => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    /// Full extent of the feature header line, or a zero-width range at the origin.
    pub fn feature_range(&self) -> Range {
        self.feature
            .map(|t| Range::line(t.line, t.line_len))
            .unwrap_or_default()
    }
}

/// Build the Scenario node for a header token under `feature`.
pub fn scenario_node(feature: &TestNode, token: &HeaderToken<'_>) -> TestNode {
    let mut node = TestNode::new(
        format!("{}{SCENARIO_SEPARATOR}{}", feature.id, token.title),
        format!("{}{}", token.kind.label_prefix(), token.title),
        feature.uri.clone(),
    );
    node.resolvable = false;
    node.range = Some(Range::line(token.line, token.trimmed_len));
    node
}

/// Populates Feature nodes from their files.
pub struct FeatureParser {
    workspace: Arc<dyn Workspace>,
    output: Arc<dyn OutputChannel>,
}

impl FeatureParser {
    pub fn new(workspace: Arc<dyn Workspace>, output: Arc<dyn OutputChannel>) -> Self {
        Self { workspace, output }
    }

    /// Re-read `node`'s file and replace its label, range and scenario children.
    ///
    /// Children are cleared before the file is read, so a read failure leaves the
    /// node childless with its previous label. Read failures are reported on the
    /// output channel and never returned.
    pub async fn parse_test_file(&self, node: &mut TestNode) {
        let Some(path) = node.uri.clone() else {
            return;
        };

        node.clear_children();
        self.output
            .append_line(&format!("Parsing feature file: {}", path.display()));

        let text = match self.workspace.read_text(&path).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read feature file");
                self.output
                    .append_line(&format!("Error parsing feature file: {e}"));
                return;
            }
        };

        let outline = FeatureOutline::from_text(&text);
        let title = outline.title(&path);

        node.label = format!("{}{title}", HeaderKind::Feature.label_prefix());
        node.resolvable = true;
        node.range = Some(outline.feature_range());
        self.output.append_line(&format!("Found feature: {title}"));

        for token in &outline.scenarios {
            let scenario = scenario_node(node, token);
            node.add_child(scenario);
            self.output.append_line(&format!(
                "Found scenario: {} at line {}",
                token.title,
                token.line + 1
            ));
        }

        tracing::debug!(
            path = %path.display(),
            scenarios = node.children().len(),
            "parsed feature file"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::test_support::MemoryChannel;
    use crate::tree::Position;
    use crate::workspace::test_support::MemoryWorkspace;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = "Feature: Sample Feature
  Scenario: User logs in
    Given I am on the login page
    When I submit valid credentials
    Then I should see the dashboard

  Scenario Outline: Failed login
    Given I am on the login page
    When I submit invalid credentials
    Then I should see an error message
";

    fn parser_for(workspace: MemoryWorkspace) -> (FeatureParser, Arc<MemoryChannel>) {
        let output = Arc::new(MemoryChannel::new());
        let parser = FeatureParser::new(Arc::new(workspace), output.clone());
        (parser, output)
    }

    #[test]
    fn test_tokenize_distinguishes_outline() {
        let tokens = tokenize(SAMPLE);
        let kinds: Vec<_> = tokens.iter().map(|t| (t.kind, t.line, t.title)).collect();
        assert_eq!(
            kinds,
            vec![
                (HeaderKind::Feature, 0, "Sample Feature"),
                (HeaderKind::Scenario, 1, "User logs in"),
                (HeaderKind::ScenarioOutline, 6, "Failed login"),
            ]
        );
        assert_eq!(tokens[1].trimmed_len, "Scenario: User logs in".len());
        assert_eq!(tokens[1].line_len, "  Scenario: User logs in".len());
    }

    #[test]
    fn test_tokenize_ignores_non_headers() {
        let text = "# Scenario: commented?\n  Scenarios: not a header\nGiven Feature: nope\n";
        let tokens = tokenize(text);
        assert!(tokens.is_empty());
    }

    #[test]
    fn test_tokenize_strips_carriage_returns() {
        let tokens = tokenize("Feature: Windows\r\n  Scenario: CRLF\r\n");
        assert_eq!(tokens[0].title, "Windows");
        assert_eq!(tokens[0].line_len, "Feature: Windows".len());
        assert_eq!(tokens[1].title, "CRLF");
    }

    #[test]
    fn test_outline_uses_first_feature_header() {
        let outline = FeatureOutline::from_text("\n\nFeature: First\nFeature: Second\n");
        assert_eq!(outline.title(Path::new("/x/a.feature")), "First");
        assert_eq!(outline.feature_range(), Range::line(2, "Feature: First".len()));
    }

    #[tokio::test]
    async fn test_parse_feature_title_and_scenarios() {
        let ws = MemoryWorkspace::new("/tmp").with_file("sample.feature", SAMPLE);
        let (parser, _) = parser_for(ws);
        let mut node = TestNode::feature(Path::new("/tmp/sample.feature"));

        parser.parse_test_file(&mut node).await;

        assert_eq!(node.label, "Feature: Sample Feature");
        assert!(node.resolvable);
        assert_eq!(
            node.range,
            Some(Range::new(
                Position::new(0, 0),
                Position::new(0, "Feature: Sample Feature".len())
            ))
        );

        let children = node.children();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].id, "/tmp/sample.feature::User logs in");
        assert_eq!(children[0].label, "Scenario: User logs in");
        assert!(!children[0].resolvable);
        assert_eq!(
            children[0].range,
            Some(Range::line(1, "Scenario: User logs in".len()))
        );
        assert_eq!(children[0].uri, node.uri);
        assert_eq!(children[1].id, "/tmp/sample.feature::Failed login");
        assert_eq!(children[1].label, "Scenario Outline: Failed login");
        assert_eq!(children[1].range.map(|r| r.start.line), Some(6));
    }

    #[tokio::test]
    async fn test_parse_without_feature_line_defaults() {
        let ws = MemoryWorkspace::new("/tmp").with_file(
            "sample.feature",
            "Random text line\nAnother line without the feature keyword",
        );
        let (parser, _) = parser_for(ws);
        let mut node = TestNode::feature(Path::new("/tmp/sample.feature"));

        parser.parse_test_file(&mut node).await;

        assert_eq!(node.label, "Feature: sample.feature");
        assert_eq!(node.range, Some(Range::default()));
        assert!(node.children().is_empty());
    }

    #[tokio::test]
    async fn test_parse_read_error_is_reported_not_returned() {
        let ws = MemoryWorkspace::new("/tmp");
        let (parser, output) = parser_for(ws);
        let mut node = TestNode::feature(Path::new("/tmp/missing.feature"));

        parser.parse_test_file(&mut node).await;

        assert!(output
            .lines()
            .iter()
            .any(|l| l.starts_with("Error parsing feature file:")));
        assert_eq!(node.label, "missing.feature");
        assert!(node.children().is_empty());
    }

    #[tokio::test]
    async fn test_reparse_replaces_children() {
        let ws = MemoryWorkspace::new("/tmp").with_file("sample.feature", SAMPLE);
        let ws = Arc::new(ws);
        let parser = FeatureParser::new(ws.clone(), Arc::new(MemoryChannel::new()));
        let mut node = TestNode::feature(Path::new("/tmp/sample.feature"));
        parser.parse_test_file(&mut node).await;
        assert_eq!(node.children().len(), 2);

        ws.write("sample.feature", "Feature: Smaller\n  Scenario: Only one\n");
        parser.parse_test_file(&mut node).await;
        assert_eq!(node.label, "Feature: Smaller");
        let labels: Vec<_> = node.children().iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["Scenario: Only one"]);

        ws.remove("sample.feature");
        parser.parse_test_file(&mut node).await;
        assert!(node.children().is_empty());
        assert_eq!(node.label, "Feature: Smaller");
    }

    #[tokio::test]
    async fn test_duplicate_scenario_titles_collapse() {
        let ws = MemoryWorkspace::new("/tmp").with_file(
            "dup.feature",
            "Feature: Dup\n  Scenario: Same\n  Scenario: Same\n",
        );
        let (parser, _) = parser_for(ws);
        let mut node = TestNode::feature(Path::new("/tmp/dup.feature"));
        parser.parse_test_file(&mut node).await;

        assert_eq!(node.children().len(), 1);
        assert_eq!(node.children()[0].range.map(|r| r.start.line), Some(2));
    }

    #[tokio::test]
    async fn test_node_without_uri_is_untouched() {
        let (parser, output) = parser_for(MemoryWorkspace::new("/tmp"));
        let mut node = TestNode::new("virtual", "Virtual", None);
        parser.parse_test_file(&mut node).await;
        assert_eq!(node.label, "Virtual");
        assert!(output.lines().is_empty());
    }
}
