//! Command-line interface for behat-docker.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::config::{env, Settings, SETTINGS_FILE};
use crate::discovery::Discovery;
use crate::error::{BehatDockerError, Result};
use crate::error_parser::TestMessage;
use crate::host::{Notifier, RecordedRun, TestRun, TestStatus, TracingChannel};
use crate::runner::{RunOutcome, RunRequest, TestRunner};
use crate::tree::{TestNode, TestTree};
use crate::watch::{FeatureWatcher, FileChange};
use crate::workspace::{FsWorkspace, Workspace};

/// Behat Docker - Discover Behat features and run them inside a Docker container.
#[derive(Parser)]
#[command(name = "behat-docker")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Workspace root (default: current directory)
    #[arg(short, long, global = true)]
    pub workspace: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List discovered features.
    List {
        /// Also list the scenarios of every feature
        #[arg(short, long)]
        scenarios: bool,

        /// Print the tree as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run features or scenarios inside the container.
    Run {
        /// Start an Xdebug listener and enable Xdebug for the run
        #[arg(long)]
        debug: bool,

        #[command(flatten)]
        overrides: Overrides,

        /// Feature path, `path:line`, or test id (default: every feature)
        selectors: Vec<String>,
    },

    /// Watch feature files and keep the tree up to date.
    Watch {
        /// Run changed features after every change
        #[arg(long)]
        run: bool,

        #[command(flatten)]
        overrides: Overrides,
    },
}

/// Settings given on the command line; they win over file and environment.
#[derive(Args, Debug, Default, Clone)]
pub struct Overrides {
    /// Docker container to execute in
    #[arg(short, long)]
    pub container: Option<String>,

    /// Project root inside the container
    #[arg(long)]
    pub container_path: Option<String>,

    /// Behat executable, relative to the container path
    #[arg(long)]
    pub behat_path: Option<String>,

    /// Glob used to discover feature files
    #[arg(long)]
    pub feature_glob: Option<String>,
}

impl Overrides {
    pub fn apply(&self, mut settings: Settings) -> Settings {
        if let Some(v) = &self.container {
            settings.container_name = Some(v.clone());
        }
        if let Some(v) = &self.container_path {
            settings.container_path = Some(v.clone());
        }
        if let Some(v) = &self.behat_path {
            settings.behat_path = Some(v.clone());
        }
        if let Some(v) = &self.feature_glob {
            settings.feature_glob = Some(v.clone());
        }
        settings
    }
}

/// Run the CLI. Returns `false` when tests failed or could not run.
pub async fn run() -> Result<bool> {
    let cli = Cli::parse();

    match cli.command {
        Commands::List { scenarios, json } => {
            let ctx = Context::new(cli.workspace, &Overrides::default())?;
            list_command(&ctx, scenarios, json).await?;
            Ok(true)
        }
        Commands::Run {
            debug,
            overrides,
            selectors,
        } => {
            let ctx = Context::new(cli.workspace, &overrides)?;
            run_command(&ctx, &selectors, debug).await
        }
        Commands::Watch { run, overrides } => {
            let ctx = Context::new(cli.workspace, &overrides)?;
            watch_command(&ctx, run).await?;
            Ok(true)
        }
    }
}

struct Context {
    root: PathBuf,
    settings: Settings,
    workspace: Arc<FsWorkspace>,
    discovery: Discovery,
}

impl Context {
    fn new(workspace: Option<PathBuf>, overrides: &Overrides) -> Result<Self> {
        let root = match workspace {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };
        if !root.is_dir() {
            return Err(BehatDockerError::Config(format!(
                "Workspace is not a directory: {}",
                root.display()
            )));
        }
        let root = std::fs::canonicalize(&root)?;

        let settings = overrides.apply(Settings::load(&root)?);
        let workspace = Arc::new(FsWorkspace::new(&root));
        let discovery = Discovery::new(workspace.clone(), Arc::new(TracingChannel))
            .with_feature_glob(settings.feature_glob());

        Ok(Self {
            root,
            settings,
            workspace,
            discovery,
        })
    }

    /// Discover every feature and parse its scenarios.
    async fn load_tree(&self) -> Result<TestTree> {
        let mut tree = TestTree::new();
        self.discovery.discover_all_tests(&mut tree).await?;
        self.discovery.resolve_all(&mut tree).await;
        Ok(tree)
    }

    fn runner(&self) -> TestRunner {
        TestRunner::new(
            self.workspace.clone(),
            Arc::new(TracingChannel),
            Arc::new(ConsoleNotifier),
        )
    }

    fn display_path(&self, node: &TestNode) -> String {
        node.uri
            .as_deref()
            .map(|uri| self.workspace.relative_path(uri).display().to_string())
            .unwrap_or_default()
    }
}

async fn list_command(ctx: &Context, scenarios: bool, as_json: bool) -> Result<()> {
    let tree = ctx.load_tree().await?;

    if as_json {
        let features: Vec<_> = tree
            .iter()
            .map(|feature| {
                let children: Vec<_> = feature
                    .children()
                    .iter()
                    .map(|s| {
                        json!({
                            "id": s.id,
                            "label": s.label,
                            "line": s.range.map(|r| r.start.line + 1),
                        })
                    })
                    .collect();
                json!({
                    "id": feature.id,
                    "label": feature.label,
                    "path": ctx.display_path(feature),
                    "scenarios": children,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&features)?);
        return Ok(());
    }

    if tree.is_empty() {
        println!(
            "{} matching {} in {}",
            style("No feature files").yellow(),
            style(ctx.discovery.feature_glob()).cyan(),
            ctx.root.display()
        );
        return Ok(());
    }

    for feature in tree.iter() {
        println!(
            "{}  {}",
            style(&feature.label).bold(),
            style(ctx.display_path(feature)).dim()
        );
        if scenarios {
            for scenario in feature.children() {
                let line = scenario.range.map(|r| r.start.line + 1).unwrap_or(1);
                println!("  {}  {}", scenario.label, style(format!(":{line}")).dim());
            }
        }
    }
    Ok(())
}

async fn run_command(ctx: &Context, selectors: &[String], debug: bool) -> Result<bool> {
    let tree = ctx.load_tree().await?;
    let request = if selectors.is_empty() {
        RunRequest::all()
    } else {
        RunRequest::include(resolve_selectors(&tree, &ctx.root, selectors)?)
    }
    .with_debug(debug);

    let token = cancel_on_ctrl_c();
    let outcome = execute(ctx, &tree, &request, &token).await;
    Ok(outcome)
}

/// Run `request` with a console reporter. Returns whether every test passed.
async fn execute(
    ctx: &Context,
    tree: &TestTree,
    request: &RunRequest,
    token: &CancellationToken,
) -> bool {
    let mut run = ConsoleRun::new(ctx);
    let outcome = ctx
        .runner()
        .run_tests(&ctx.settings, tree, request, &mut run, token)
        .await;

    let passed = run.recorded.count(|s| *s == TestStatus::Passed);
    let failed = run.recorded.count(|s| matches!(s, TestStatus::Failed(_)));
    let skipped = run.recorded.count(|s| *s == TestStatus::Pending);

    match outcome {
        RunOutcome::NotConfigured | RunOutcome::DebugStartFailed => return false,
        RunOutcome::Cancelled => println!("{}", style("Run cancelled").yellow().bold()),
        RunOutcome::Completed => {}
    }

    println!();
    println!(
        "{} passed, {} failed, {} not run",
        style(passed).green().bold(),
        style(failed).red().bold(),
        style(skipped).dim()
    );
    outcome == RunOutcome::Completed && failed == 0
}

async fn watch_command(ctx: &Context, run_on_change: bool) -> Result<()> {
    let mut tree = ctx.load_tree().await?;
    println!(
        "{} {} feature files in {} (Ctrl+C to stop)",
        style("Watching").bold(),
        tree.len(),
        ctx.root.display()
    );

    let token = cancel_on_ctrl_c();
    let mut watcher = FeatureWatcher::new(&ctx.discovery, ctx.workspace.as_ref())
        .with_interval(Duration::from_millis(500));
    watcher.prime().await?;

    while let Some(changes) = watcher.next_changes(&mut tree, &token).await {
        let mut rerun = Vec::new();
        for change in &changes {
            let (marker, path) = match change {
                FileChange::Created(p) => (style("+").green(), p),
                FileChange::Changed(p) => (style("~").yellow(), p),
                FileChange::Deleted(p) => (style("-").red(), p),
            };
            println!("{marker} {}", ctx.workspace.relative_path(path).display());
            if !matches!(change, FileChange::Deleted(_)) {
                if let Some(node) = tree.get(&path.to_string_lossy()) {
                    rerun.push(node.clone());
                }
            }
        }

        if run_on_change && !rerun.is_empty() {
            execute(ctx, &tree, &RunRequest::include(rerun), &token).await;
        }
    }
    Ok(())
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received Ctrl+C, cancelling");
            cancel.cancel();
        }
    });
    token
}

/// Map command-line selectors onto tree nodes.
///
/// A selector is a test id, a feature path (absolute or relative to `root`), or
/// `path:line` naming the scenario whose header is at or above that 1-based line.
pub fn resolve_selectors(tree: &TestTree, root: &Path, selectors: &[String]) -> Result<Vec<TestNode>> {
    selectors
        .iter()
        .map(|selector| resolve_selector(tree, root, selector))
        .collect()
}

fn resolve_selector(tree: &TestTree, root: &Path, selector: &str) -> Result<TestNode> {
    if let Some(node) = tree.find(selector) {
        return Ok(node.clone());
    }

    let (path, line) = match selector.rsplit_once(':') {
        Some((path, line)) => match line.parse::<usize>() {
            Ok(line) => (path, Some(line)),
            Err(_) => (selector, None),
        },
        None => (selector, None),
    };

    let unknown = || BehatDockerError::UnknownTest(selector.to_string());
    let absolute = root.join(path);
    let feature = tree
        .get(&absolute.to_string_lossy())
        .or_else(|| {
            std::fs::canonicalize(&absolute)
                .ok()
                .and_then(|p| tree.get(&p.to_string_lossy()))
        })
        .ok_or_else(unknown)?;

    let Some(line) = line else {
        return Ok(feature.clone());
    };
    feature
        .children()
        .iter()
        .filter(|s| s.range.map(|r| r.start.line + 1 <= line).unwrap_or(false))
        .max_by_key(|s| s.range.map(|r| r.start.line))
        .cloned()
        .ok_or_else(unknown)
}

/// Prints errors to stderr, turning the action into a configuration hint.
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn error(&self, message: &str, action: Option<&str>) {
        eprintln!("{} {message}", style("Error:").red().bold());
        if action.is_some() {
            eprintln!(
                "  Set {} in {}, export {}, or pass {}",
                style("containerName").cyan(),
                SETTINGS_FILE,
                env::CONTAINER_NAME,
                style("--container").cyan()
            );
        }
    }
}

/// Reports progress on the terminal while recording every status.
///
/// Results go to stdout through [`ProgressBar::suspend`], so they are printed
/// whether or not stderr (where the spinner draws) is a terminal.
struct ConsoleRun {
    recorded: RecordedRun,
    spinner: ProgressBar,
    root: PathBuf,
    /// Output of the running test, printed once its result is known.
    pending: String,
}

impl ConsoleRun {
    fn new(ctx: &Context) -> Self {
        let spinner = ProgressBar::new_spinner();
        #[allow(clippy::expect_used)] // Static template string that is guaranteed to be valid
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .expect("valid template"),
        );
        Self {
            recorded: RecordedRun::new(),
            spinner,
            root: ctx.root.clone(),
            pending: String::new(),
        }
    }

    fn print(&self, lines: &[String]) {
        self.spinner.suspend(|| {
            for line in lines {
                println!("{line}");
            }
        });
    }
}

fn indented(text: &str) -> impl Iterator<Item = String> + '_ {
    text.lines().map(|line| format!("    {line}"))
}

/// Lines printed under a failed test: each message's `path:line`, then its text.
fn failure_lines(root: &Path, messages: &[TestMessage]) -> Vec<String> {
    let mut lines = Vec::new();
    for message in messages {
        if let Some(location) = &message.location {
            let path = location
                .uri
                .strip_prefix(root)
                .unwrap_or(location.uri.as_path());
            lines.push(format!(
                "    {}",
                style(format!("{}:{}", path.display(), location.range.start.line + 1)).dim()
            ));
        }
        lines.extend(indented(&message.message));
    }
    lines
}

impl TestRun for ConsoleRun {
    fn enqueued(&mut self, node: &TestNode) {
        self.recorded.enqueued(node);
    }

    fn started(&mut self, node: &TestNode) {
        self.pending.clear();
        self.spinner.set_message(node.label.clone());
        self.spinner.enable_steady_tick(Duration::from_millis(100));
        self.recorded.started(node);
    }

    fn passed(&mut self, node: &TestNode) {
        let mut lines = vec![format!("{} {}", style("PASS").green().bold(), node.label)];
        lines.extend(indented(&self.pending));
        self.pending.clear();
        self.print(&lines);
        self.recorded.passed(node);
    }

    fn failed(&mut self, node: &TestNode, messages: Vec<TestMessage>) {
        // The messages already carry the test's output.
        self.pending.clear();
        let mut lines = vec![format!("{} {}", style("FAIL").red().bold(), node.label)];
        lines.extend(failure_lines(&self.root, &messages));
        self.print(&lines);
        self.recorded.failed(node, messages);
    }

    fn append_output(&mut self, output: &str) {
        self.pending.push_str(output);
        self.recorded.append_output(output);
    }

    fn end(&mut self) {
        self.spinner.finish_and_clear();
        self.recorded.end();
    }
}
