//! Turns a failed execution into output text and a located diagnostic.

use std::path::PathBuf;

use crate::exec::ExecFailure;
use crate::tree::{Position, Range, TestNode};

/// Fallback text when a failure carries no output and no message.
pub const DEFAULT_FAILURE_MESSAGE: &str = "Test execution failed";

/// A source location a diagnostic points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub uri: PathBuf,
    pub range: Range,
}

/// A failure diagnostic attached to a test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestMessage {
    pub message: String,
    pub location: Option<Location>,
}

/// Build the diagnostics for a failed test. Always exactly one message.
///
/// The message is anchored at the node's header range, at the start of the
/// file if the node has no range, and nowhere if it has no file.
pub fn parse_error_messages(output: &str, node: &TestNode) -> Vec<TestMessage> {
    let location = node.uri.as_ref().map(|uri| Location {
        uri: uri.clone(),
        range: node.range.unwrap_or_else(|| {
            let origin = Position::new(0, 0);
            Range::new(origin, origin)
        }),
    });

    vec![TestMessage {
        message: output.to_string(),
        location,
    }]
}

/// Pick the text to report for a failure.
///
/// stdout followed by stderr when either is non-empty, otherwise the failure
/// message, otherwise [`DEFAULT_FAILURE_MESSAGE`].
pub fn error_output(failure: &ExecFailure) -> String {
    match failure {
        ExecFailure::Exited {
            stdout,
            stderr,
            message,
        } => {
            let output = format!("{stdout}{stderr}");
            if !output.is_empty() {
                return output;
            }
            message
                .as_deref()
                .filter(|m| !m.is_empty())
                .unwrap_or(DEFAULT_FAILURE_MESSAGE)
                .to_string()
        }
        ExecFailure::Message(message) if !message.is_empty() => message.clone(),
        ExecFailure::Message(_) | ExecFailure::Unknown => DEFAULT_FAILURE_MESSAGE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn node_with_range() -> TestNode {
        let mut node = TestNode::new(
            "test1",
            "TestClass",
            Some(PathBuf::from("/path/to/test.feature")),
        );
        node.range = Some(Range::new(Position::new(10, 0), Position::new(10, 5)));
        node
    }

    #[test]
    fn test_message_located_at_node_range() {
        let node = node_with_range();
        let messages = parse_error_messages("Some error message", &node);

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message, "Some error message");
        assert_eq!(
            messages[0].location,
            Some(Location {
                uri: PathBuf::from("/path/to/test.feature"),
                range: Range::new(Position::new(10, 0), Position::new(10, 5)),
            })
        );
    }

    #[test]
    fn test_empty_output_still_produces_message() {
        let messages = parse_error_messages("", &node_with_range());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message, "");
        assert!(messages[0].location.is_some());
    }

    #[test]
    fn test_node_without_range_anchors_at_origin() {
        let node = TestNode::new(
            "test2",
            "AnotherTest",
            Some(PathBuf::from("/path/to/another_test.feature")),
        );
        let messages = parse_error_messages("Another error", &node);
        let location = messages[0].location.as_ref().unwrap();
        assert_eq!(location.range, Range::default());
        assert_eq!(location.uri, PathBuf::from("/path/to/another_test.feature"));
    }

    #[test]
    fn test_node_without_uri_has_no_location() {
        let node = TestNode::new("orphan", "Orphan", None);
        let messages = parse_error_messages("boom", &node);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].location.is_none());
    }

    #[test]
    fn test_error_output_combines_stdout_and_stderr() {
        let failure = ExecFailure::output("Standard output\n", "Error output");
        assert_eq!(error_output(&failure), "Standard output\nError output");
    }

    #[test]
    fn test_error_output_stdout_only() {
        assert_eq!(
            error_output(&ExecFailure::output("Standard output", "")),
            "Standard output"
        );
    }

    #[test]
    fn test_error_output_stderr_only() {
        assert_eq!(
            error_output(&ExecFailure::output("", "Error output")),
            "Error output"
        );
    }

    #[test]
    fn test_error_output_prefers_output_over_message() {
        let failure = ExecFailure::Exited {
            stdout: "A".into(),
            stderr: String::new(),
            message: Some("Command failed".into()),
        };
        assert_eq!(error_output(&failure), "A");
    }

    #[test]
    fn test_error_output_falls_back_to_message() {
        assert_eq!(
            error_output(&ExecFailure::Message("Error message".into())),
            "Error message"
        );
        let failure = ExecFailure::Exited {
            stdout: String::new(),
            stderr: String::new(),
            message: Some("Command failed: x".into()),
        };
        assert_eq!(error_output(&failure), "Command failed: x");
    }

    #[test]
    fn test_error_output_default() {
        assert_eq!(error_output(&ExecFailure::Unknown), "Test execution failed");
        assert_eq!(error_output(&ExecFailure::output("", "")), "Test execution failed");
    }
}
