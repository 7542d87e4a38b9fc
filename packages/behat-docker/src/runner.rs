//! Execution orchestrator: runs selected tests inside the container, one at a time.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{ExecutionConfig, Settings};
use crate::debug::{DebugAdapter, DebugSession, XdebugListener};
use crate::error_parser::{error_output, parse_error_messages};
use crate::exec::{CommandExecutor, ExecFailure, ShellExecutor};
use crate::host::{Notifier, OutputChannel, TestRun};
use crate::normalize::PathNormalizer;
use crate::tree::{TestNode, TestTree};
use crate::workspace::Workspace;

/// Action offered alongside the missing-configuration error.
pub const OPEN_SETTINGS_ACTION: &str = "Open Settings";

/// What to run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Explicit selection; `None` runs every root node of the tree.
    pub include: Option<Vec<TestNode>>,
    pub debug: bool,
}

impl RunRequest {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn include(nodes: Vec<TestNode>) -> Self {
        Self {
            include: Some(nodes),
            debug: false,
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every target was executed.
    Completed,
    /// Cancellation stopped the run before every target was started.
    Cancelled,
    /// No container name is configured; nothing was executed.
    NotConfigured,
    /// The debug session could not be started; nothing was executed.
    DebugStartFailed,
}

/// Join a workspace-relative path onto the container root, POSIX style.
///
/// # Examples
/// ```
/// use std::path::Path;
/// use behat_docker::runner::container_file_path;
///
/// assert_eq!(
///     container_file_path("/var/www", Path::new("features/a.feature")),
///     "/var/www/features/a.feature"
/// );
/// ```
pub fn container_file_path(container_path: &str, relative: &Path) -> String {
    let relative = relative.to_string_lossy().replace('\\', "/");
    let joined = format!("{container_path}/{relative}");

    let absolute = joined.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|s| *s != "..") {
                    segments.pop();
                } else if !absolute {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }

    let body = segments.join("/");
    if absolute {
        format!("/{body}")
    } else if body.is_empty() {
        ".".to_string()
    } else {
        body
    }
}

/// The Behat invocation for `node`, without the `docker exec` prefix.
///
/// Scenarios are addressed as `file:line` (1-based header line); features by file.
pub fn behat_command(config: &ExecutionConfig, node: &TestNode, container_file: &str) -> String {
    let php = if config.debug {
        "php -dxdebug.mode=debug"
    } else {
        "php"
    };
    let mut command = format!("{php} {} --no-interaction --strict", config.behat_path);

    if node.is_scenario() {
        let line = node.range.map(|r| r.start.line + 1).unwrap_or(1);
        command.push_str(&format!(" {container_file}:{line}"));
    } else {
        command.push_str(&format!(" {container_file}"));
    }
    command
}

/// Wrap a command so it runs inside the configured container.
pub fn docker_command(config: &ExecutionConfig, command: &str) -> String {
    format!("docker exec -t {} {command}", config.container_name)
}

/// Runs test nodes through Behat in a Docker container.
pub struct TestRunner {
    workspace: Arc<dyn Workspace>,
    executor: Arc<dyn CommandExecutor>,
    debugger: Arc<dyn DebugAdapter>,
    output: Arc<dyn OutputChannel>,
    notifier: Arc<dyn Notifier>,
}

impl TestRunner {
    pub fn new(
        workspace: Arc<dyn Workspace>,
        output: Arc<dyn OutputChannel>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            workspace,
            executor: Arc::new(ShellExecutor::new()),
            debugger: Arc::new(XdebugListener::new()),
            output,
            notifier,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_debugger(mut self, debugger: Arc<dyn DebugAdapter>) -> Self {
        self.debugger = debugger;
        self
    }

    /// The full command line that would run `node`, or `None` if it has no file.
    pub fn command_for(&self, node: &TestNode, config: &ExecutionConfig) -> Option<String> {
        let uri = node.uri.as_ref()?;
        let relative = self.workspace.relative_path(uri);
        let container_file = container_file_path(&config.container_path, &relative);
        Some(docker_command(
            config,
            &behat_command(config, node, &container_file),
        ))
    }

    /// Run the request against `tree`, reporting through `run`.
    ///
    /// `run` is always ended before this returns. A debug session is only
    /// started when none is active, and only a session started here is stopped.
    pub async fn run_tests(
        &self,
        settings: &Settings,
        tree: &TestTree,
        request: &RunRequest,
        run: &mut dyn TestRun,
        token: &CancellationToken,
    ) -> RunOutcome {
        let config = match settings.execution_config(request.debug) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "cannot run tests");
                self.notifier.error(&e.to_string(), Some(OPEN_SETTINGS_ACTION));
                run.end();
                return RunOutcome::NotConfigured;
            }
        };

        let mut session_to_stop: Option<DebugSession> = None;
        if config.debug && self.debugger.active_session().is_none() {
            self.output.append_line("Starting debug session...");
            let debug_config = settings
                .debug_configuration()
                .resolve_workspace_folder(self.workspace.root());
            match self.debugger.start(&debug_config).await {
                Ok(session) => session_to_stop = Some(session),
                Err(e) => {
                    tracing::error!(error = %e, "failed to start debug session");
                    self.output
                        .append_line(&format!("Failed to start debug session: {e}"));
                    run.end();
                    return RunOutcome::DebugStartFailed;
                }
            }
        }

        let targets: Vec<TestNode> = match &request.include {
            Some(nodes) => nodes.clone(),
            None => tree.iter().cloned().collect(),
        };
        for node in &targets {
            run.enqueued(node);
        }

        tracing::info!(
            container = %config.container_name,
            tests = targets.len(),
            debug = config.debug,
            "starting test run"
        );
        let outcome = self.execute_tests(&targets, run, token, &config).await;
        run.end();

        if let Some(session) = session_to_stop {
            self.output.append_line("Stopping debug session...");
            match self.debugger.stop(&session).await {
                Ok(()) => self.output.append_line("Debug session stopped"),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to stop debug session");
                    self.output
                        .append_line(&format!("Error stopping debug session: {e}"));
                }
            }
        }

        outcome
    }

    async fn execute_tests(
        &self,
        targets: &[TestNode],
        run: &mut dyn TestRun,
        token: &CancellationToken,
        config: &ExecutionConfig,
    ) -> RunOutcome {
        let normalizer = PathNormalizer::new(&config.container_path);
        for node in targets {
            if token.is_cancelled() {
                tracing::info!(next = %node.id, "test run cancelled");
                return RunOutcome::Cancelled;
            }

            run.started(node);
            let result = match self.command_for(node, config) {
                Some(command) => {
                    self.output
                        .append_line(&format!("Executing command: {command}"));
                    self.executor.execute(&command).await
                }
                None => Err(ExecFailure::Message(format!(
                    "Test '{}' has no source file",
                    node.label
                ))),
            };

            match result {
                Ok(out) => {
                    let normalized = normalizer.normalize(&out.stdout);
                    run.append_output(&normalized);
                    run.passed(node);
                    tracing::info!(test = %node.id, "test passed");
                    self.output
                        .append_line(&format!("Test execution:\n{}", out.stdout));
                }
                Err(failure) => {
                    let raw = error_output(&failure);
                    let normalized = normalizer.normalize(&raw);
                    run.append_output(&normalized);
                    run.failed(node, parse_error_messages(&normalized, node));
                    tracing::info!(test = %node.id, "test failed");
                    self.output
                        .append_line(&format!("Test execution error:\n{raw}"));
                }
            }
        }
        RunOutcome::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::test_support::RecordingDebugger;
    use crate::exec::test_support::ScriptedExecutor;
    use crate::exec::ExecOutput;
    use crate::host::test_support::{MemoryChannel, MemoryNotifier};
    use crate::host::{RecordedRun, TestStatus};
    use crate::tree::Range;
    use crate::workspace::test_support::MemoryWorkspace;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    struct Harness {
        runner: TestRunner,
        executor: Arc<ScriptedExecutor>,
        debugger: Arc<RecordingDebugger>,
        output: Arc<MemoryChannel>,
        notifier: Arc<MemoryNotifier>,
    }

    fn harness(executor: ScriptedExecutor, debugger: RecordingDebugger) -> Harness {
        let workspace = Arc::new(MemoryWorkspace::new("/project"));
        let executor = Arc::new(executor);
        let debugger = Arc::new(debugger);
        let output = Arc::new(MemoryChannel::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let runner = TestRunner::new(workspace, output.clone(), notifier.clone())
            .with_executor(executor.clone())
            .with_debugger(debugger.clone());
        Harness {
            runner,
            executor,
            debugger,
            output,
            notifier,
        }
    }

    fn settings(container: &str) -> Settings {
        Settings {
            container_name: Some(container.into()),
            ..Settings::default()
        }
    }

    fn two_features() -> TestTree {
        let mut tree = TestTree::new();
        tree.add(TestNode::feature(Path::new("/project/features/a.feature")));
        tree.add(TestNode::feature(Path::new("/project/features/b.feature")));
        tree
    }

    fn scenario_at(line: usize) -> TestNode {
        let mut node = TestNode::new(
            "/project/features/TestFeature.feature::Does a thing",
            "Scenario: Does a thing",
            Some(PathBuf::from("/project/features/TestFeature.feature")),
        );
        node.range = Some(Range::line(line, 22));
        node
    }

    #[test]
    fn test_scenario_command_uses_one_based_line() {
        let config = ExecutionConfig::new("test-container");
        let node = scenario_at(10);
        let command = docker_command(
            &config,
            &behat_command(&config, &node, "/var/www/features/TestFeature.feature"),
        );
        assert_eq!(
            command,
            "docker exec -t test-container php vendor/bin/behat --no-interaction --strict /var/www/features/TestFeature.feature:11"
        );
    }

    #[test]
    fn test_feature_command_has_no_line() {
        let config = ExecutionConfig::new("c");
        let node = TestNode::feature(Path::new("/project/features/a.feature"));
        assert_eq!(
            behat_command(&config, &node, "/var/www/features/a.feature"),
            "php vendor/bin/behat --no-interaction --strict /var/www/features/a.feature"
        );
    }

    #[test]
    fn test_debug_command_inserts_xdebug_flag() {
        let config = ExecutionConfig::new("c")
            .with_behat_path("bin/behat")
            .with_debug(true);
        let node = scenario_at(0);
        assert_eq!(
            behat_command(&config, &node, "/app/f.feature"),
            "php -dxdebug.mode=debug bin/behat --no-interaction --strict /app/f.feature:1"
        );
    }

    #[test]
    fn test_scenario_without_range_defaults_to_line_one() {
        let config = ExecutionConfig::new("c");
        let mut node = scenario_at(4);
        node.range = None;
        assert!(behat_command(&config, &node, "/x.feature").ends_with(" /x.feature:1"));
    }

    #[test]
    fn test_container_file_path_joins_posix() {
        assert_eq!(
            container_file_path("/var/www", Path::new("features/a.feature")),
            "/var/www/features/a.feature"
        );
        assert_eq!(
            container_file_path("/var/www/", Path::new("./features/a.feature")),
            "/var/www/features/a.feature"
        );
        assert_eq!(
            container_file_path("/var/www", Path::new("../shared/a.feature")),
            "/var/shared/a.feature"
        );
        assert_eq!(
            container_file_path("/var/www", Path::new("features\\win.feature")),
            "/var/www/features/win.feature"
        );
    }

    #[tokio::test]
    async fn test_blank_container_name_notifies_once() {
        let h = harness(ScriptedExecutor::succeeding(), RecordingDebugger::new());
        let mut run = RecordedRun::new();

        let outcome = h
            .runner
            .run_tests(
                &settings("   "),
                &two_features(),
                &RunRequest::all(),
                &mut run,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome, RunOutcome::NotConfigured);
        assert!(h.executor.commands().is_empty());
        assert_eq!(h.notifier.errors().len(), 1);
        assert_eq!(h.notifier.errors()[0].1.as_deref(), Some(OPEN_SETTINGS_ACTION));
        assert!(run.is_ended());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let h = harness(ScriptedExecutor::succeeding(), RecordingDebugger::new());
        let token = CancellationToken::new();
        token.cancel();
        let mut run = RecordedRun::new();

        let outcome = h
            .runner
            .run_tests(&settings("c"), &two_features(), &RunRequest::all(), &mut run, &token)
            .await;

        assert_eq!(outcome, RunOutcome::Cancelled);
        assert!(h.executor.commands().is_empty());
        assert_eq!(run.count(|s| *s == TestStatus::Pending), 2);
        assert!(run.is_ended());
    }

    #[tokio::test]
    async fn test_node_without_file_fails_without_executing() {
        let h = harness(ScriptedExecutor::succeeding(), RecordingDebugger::new());
        let orphan = TestNode::new("orphan", "Orphan", None);
        let mut run = RecordedRun::new();

        h.runner
            .run_tests(
                &settings("c"),
                &TestTree::new(),
                &RunRequest::include(vec![orphan.clone()]),
                &mut run,
                &CancellationToken::new(),
            )
            .await;

        assert!(h.executor.commands().is_empty());
        let Some(TestStatus::Failed(messages)) = run.status(&orphan.id) else {
            panic!("expected failure, got {:?}", run.status(&orphan.id));
        };
        assert_eq!(messages[0].message, "Test 'Orphan' has no source file");
        assert!(messages[0].location.is_none());
    }

    #[tokio::test]
    async fn test_failure_without_output_uses_default_message() {
        let executor = ScriptedExecutor::new(vec![Err(ExecFailure::Unknown)]);
        let h = harness(executor, RecordingDebugger::new());
        let mut tree = TestTree::new();
        tree.add(TestNode::feature(Path::new("/project/a.feature")));
        let mut run = RecordedRun::new();

        h.runner
            .run_tests(
                &settings("c"),
                &tree,
                &RunRequest::all(),
                &mut run,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(run.output(), "Test execution failed");
        assert!(run.has_failures());
        assert!(h
            .output
            .lines()
            .contains(&"Test execution error:\nTest execution failed".to_string()));
    }

    #[tokio::test]
    async fn test_custom_container_path_normalized_for_every_test() {
        let executor = ScriptedExecutor::new(vec![
            Ok(ExecOutput {
                stdout: "ok /app/features/a.feature\n".into(),
                stderr: String::new(),
            }),
            Err(ExecFailure::Exited {
                stdout: "--- Failed scenarios:\n    /app/features/b.feature:4\n".into(),
                stderr: String::new(),
                message: None,
            }),
        ]);
        let h = harness(executor, RecordingDebugger::new());
        let settings = Settings {
            container_path: Some("/app/".into()),
            ..settings("c")
        };
        let mut run = RecordedRun::new();

        h.runner
            .run_tests(
                &settings,
                &two_features(),
                &RunRequest::all(),
                &mut run,
                &CancellationToken::new(),
            )
            .await;

        assert!(h.executor.commands()[0].ends_with(" /app/features/a.feature"));
        assert_eq!(
            run.output(),
            "ok features/a.feature\n--- Failed scenarios:\n    features/b.feature:4\n"
        );
        let Some(TestStatus::Failed(messages)) = run.status("/project/features/b.feature") else {
            panic!("expected b.feature to fail");
        };
        assert!(!messages[0].message.contains("/app/"));
    }

    #[tokio::test]
    async fn test_debug_stop_failure_is_only_logged() {
        let h = harness(
            ScriptedExecutor::succeeding(),
            RecordingDebugger::new().failing_stop(),
        );
        let mut run = RecordedRun::new();

        let outcome = h
            .runner
            .run_tests(
                &settings("c"),
                &two_features(),
                &RunRequest::all().with_debug(true),
                &mut run,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(h.debugger.started().len(), 1);
        assert_eq!(h.debugger.stopped().len(), 1);
        assert_eq!(
            h.debugger.started()[0].path_mappings.get("/var/www").map(String::as_str),
            Some("/project")
        );
        assert!(h
            .output
            .lines()
            .iter()
            .any(|l| l.starts_with("Error stopping debug session:")));
        assert_eq!(run.count(|s| *s == TestStatus::Passed), 2);
    }

    #[tokio::test]
    async fn test_existing_debug_session_is_left_alone() {
        let existing = DebugSession {
            id: 7,
            name: "IDE".into(),
            port: 9003,
        };
        let h = harness(
            ScriptedExecutor::succeeding(),
            RecordingDebugger::new().with_active(existing.clone()),
        );
        let mut run = RecordedRun::new();

        h.runner
            .run_tests(
                &settings("c"),
                &two_features(),
                &RunRequest::all().with_debug(true),
                &mut run,
                &CancellationToken::new(),
            )
            .await;

        assert!(h.debugger.started().is_empty());
        assert!(h.debugger.stopped().is_empty());
        assert_eq!(h.debugger.active_session(), Some(existing));
        assert!(h.executor.commands()[0].contains("php -dxdebug.mode=debug"));
    }

    #[tokio::test]
    async fn test_debug_start_failure_runs_nothing() {
        let h = harness(
            ScriptedExecutor::succeeding(),
            RecordingDebugger::new().failing_start(),
        );
        let mut run = RecordedRun::new();

        let outcome = h
            .runner
            .run_tests(
                &settings("c"),
                &two_features(),
                &RunRequest::all().with_debug(true),
                &mut run,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome, RunOutcome::DebugStartFailed);
        assert!(h.executor.commands().is_empty());
        assert!(run.is_ended());
        assert_eq!(run.statuses().count(), 0);
    }
}
