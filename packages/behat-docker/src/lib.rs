//! Behat Docker - discover Behat feature files and run them inside a Docker container.
//!
//! Feature files found in a workspace become a two-level test tree (features
//! and their scenarios). Selected nodes are executed one at a time through
//! `docker exec`, and Behat's output is turned into pass/fail results with
//! diagnostics pointing back at the scenario.
//!
//! # Example
//!
//! ```
//! use behat_docker::parser::FeatureOutline;
//!
//! let outline = FeatureOutline::from_text("Feature: Login\n  Scenario: Valid user\n");
//! assert_eq!(outline.scenarios.len(), 1);
//! ```
//!
//! # Architecture
//!
//! - [`tree`]: Test nodes and the root collection
//! - [`workspace`]: File search and loading, glob matching
//! - [`parser`]: Feature/Scenario header extraction
//! - [`discovery`]: Keeps the tree in sync with the files on disk
//! - [`watch`]: Polling file watcher feeding discovery
//! - [`config`]: Layered settings (file, environment, command line)
//! - [`exec`]: Shell command execution
//! - [`normalize`]: Container-to-workspace path rewriting
//! - [`error_parser`]: Failure diagnostics
//! - [`debug`]: Xdebug listener lifecycle
//! - [`runner`]: Execution orchestrator
//! - [`host`]: Output, notification and run-reporting capabilities
//! - [`error`]: Error types and Result alias
//! - [`cli`]: Command-line interface

pub mod cli;
pub mod config;
pub mod debug;
pub mod discovery;
pub mod error;
pub mod error_parser;
pub mod exec;
pub mod host;
pub mod normalize;
pub mod parser;
pub mod runner;
pub mod tree;
pub mod watch;
pub mod workspace;

pub use config::{ExecutionConfig, Settings};
pub use discovery::Discovery;
pub use error::{BehatDockerError, Result};
pub use runner::{RunOutcome, RunRequest, TestRunner};
pub use tree::{TestNode, TestTree};
