//! Host-side capabilities: the log sink, user notifications and test-run reporting.
//!
//! The orchestrator and parser only ever talk to these traits, so the CLI and
//! the tests can plug in their own implementations.

use indexmap::IndexMap;

use crate::error_parser::TestMessage;
use crate::tree::TestNode;

/// Append-only, human-readable line sink.
pub trait OutputChannel: Send + Sync {
    fn append_line(&self, line: &str);
}

/// Forwards every line to `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingChannel;

impl OutputChannel for TracingChannel {
    fn append_line(&self, line: &str) {
        tracing::info!(target: "behat_docker::output", "{line}");
    }
}

/// User-facing error notifications.
pub trait Notifier: Send + Sync {
    /// Show an error, optionally offering a single follow-up action.
    fn error(&self, message: &str, action: Option<&str>);
}

/// Outcome of a test within one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestStatus {
    Pending,
    Running,
    Passed,
    Failed(Vec<TestMessage>),
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Passed => "passed",
            Self::Failed(_) => "failed",
        }
    }
}

/// One execution session over a selection of test nodes.
pub trait TestRun: Send {
    fn enqueued(&mut self, node: &TestNode);
    fn started(&mut self, node: &TestNode);
    fn passed(&mut self, node: &TestNode);
    fn failed(&mut self, node: &TestNode, messages: Vec<TestMessage>);
    fn append_output(&mut self, output: &str);
    fn end(&mut self);
}

/// A [`TestRun`] that records every status change and the combined output.
#[derive(Debug, Default)]
pub struct RecordedRun {
    statuses: IndexMap<String, TestStatus>,
    output: String,
    ended: bool,
}

impl RecordedRun {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, id: &str) -> Option<&TestStatus> {
        self.statuses.get(id)
    }

    pub fn statuses(&self) -> impl Iterator<Item = (&str, &TestStatus)> {
        self.statuses.iter().map(|(id, status)| (id.as_str(), status))
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn count(&self, f: impl Fn(&TestStatus) -> bool) -> usize {
        self.statuses.values().filter(|s| f(s)).count()
    }

    pub fn has_failures(&self) -> bool {
        self.count(|s| matches!(s, TestStatus::Failed(_))) > 0
    }

    fn set(&mut self, node: &TestNode, status: TestStatus) {
        if self.ended {
            tracing::warn!(test = %node.id, "status update after run ended ignored");
            return;
        }
        self.statuses.insert(node.id.clone(), status);
    }
}

impl TestRun for RecordedRun {
    fn enqueued(&mut self, node: &TestNode) {
        self.set(node, TestStatus::Pending);
    }

    fn started(&mut self, node: &TestNode) {
        self.set(node, TestStatus::Running);
    }

    fn passed(&mut self, node: &TestNode) {
        self.set(node, TestStatus::Passed);
    }

    fn failed(&mut self, node: &TestNode, messages: Vec<TestMessage>) {
        self.set(node, TestStatus::Failed(messages));
    }

    fn append_output(&mut self, output: &str) {
        self.output.push_str(output);
    }

    fn end(&mut self) {
        self.ended = true;
    }
}

/// In-memory sinks for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support {
    use std::sync::Mutex;

    use super::*;

    /// Collects every line appended to it.
    #[derive(Debug, Default)]
    pub struct MemoryChannel {
        lines: Mutex<Vec<String>>,
    }

    impl MemoryChannel {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn lines(&self) -> Vec<String> {
            self.lines.lock().map(|l| l.clone()).unwrap_or_default()
        }
    }

    impl OutputChannel for MemoryChannel {
        fn append_line(&self, line: &str) {
            if let Ok(mut lines) = self.lines.lock() {
                lines.push(line.to_string());
            }
        }
    }

    /// Records every notification as `(message, action)`.
    #[derive(Debug, Default)]
    pub struct MemoryNotifier {
        errors: Mutex<Vec<(String, Option<String>)>>,
    }

    impl MemoryNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn errors(&self) -> Vec<(String, Option<String>)> {
            self.errors.lock().map(|e| e.clone()).unwrap_or_default()
        }
    }

    impl Notifier for MemoryNotifier {
        fn error(&self, message: &str, action: Option<&str>) {
            if let Ok(mut errors) = self.errors.lock() {
                errors.push((message.to_string(), action.map(String::from)));
            }
        }
    }
}
