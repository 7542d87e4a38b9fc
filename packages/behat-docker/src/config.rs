//! Settings, defaults and the per-run execution configuration.
//!
//! Settings are layered: the optional `.behat-docker.yaml` in the workspace
//! root, then `BEHAT_DOCKER_*` environment variables, then CLI flags.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BehatDockerError, Result};

/// Settings file looked up in the workspace root.
pub const SETTINGS_FILE: &str = ".behat-docker.yaml";

/// Default project root inside the container.
pub const DEFAULT_CONTAINER_PATH: &str = "/var/www";

/// Default Behat binary, relative to the container project root.
pub const DEFAULT_BEHAT_PATH: &str = "vendor/bin/behat";

/// Default glob for feature discovery.
pub const DEFAULT_FEATURE_GLOB: &str = "**/*.feature";

/// Default Xdebug client port.
pub const DEFAULT_DEBUG_PORT: u16 = 9003;

/// Placeholder in path mappings replaced by the workspace root.
pub const WORKSPACE_FOLDER_VAR: &str = "${workspaceFolder}";

/// Environment variable names.
pub mod env {
    pub const CONTAINER_NAME: &str = "BEHAT_DOCKER_CONTAINER_NAME";
    pub const CONTAINER_PATH: &str = "BEHAT_DOCKER_CONTAINER_PATH";
    pub const BEHAT_PATH: &str = "BEHAT_DOCKER_BEHAT_PATH";
    pub const FEATURE_GLOB: &str = "BEHAT_DOCKER_FEATURE_GLOB";
    pub const DEBUG_PORT: &str = "BEHAT_DOCKER_DEBUG_PORT";
}

/// Descriptor of the debug listener started for debug runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugConfiguration {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub request: String,
    pub port: u16,
    #[serde(default)]
    pub path_mappings: BTreeMap<String, String>,
}

impl DebugConfiguration {
    /// Listen for Xdebug on the default port, mapping the container root to the workspace.
    pub fn listen_for_xdebug(container_path: &str) -> Self {
        let mut path_mappings = BTreeMap::new();
        path_mappings.insert(container_path.to_string(), WORKSPACE_FOLDER_VAR.to_string());
        Self {
            kind: "php".into(),
            name: "Listen for Xdebug".into(),
            request: "launch".into(),
            port: DEFAULT_DEBUG_PORT,
            path_mappings,
        }
    }

    /// Substitute `${workspaceFolder}` in the path mappings.
    pub fn resolve_workspace_folder(&self, root: &Path) -> Self {
        let root = root.to_string_lossy();
        let mut resolved = self.clone();
        for local in resolved.path_mappings.values_mut() {
            *local = local.replace(WORKSPACE_FOLDER_VAR, &root);
        }
        resolved
    }
}

/// Raw, layered settings. Every value is optional; accessors apply defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub container_name: Option<String>,
    pub container_path: Option<String>,
    pub behat_path: Option<String>,
    pub feature_glob: Option<String>,
    pub debug_port: Option<u16>,
    pub debug_configuration: Option<DebugConfiguration>,
}

impl Settings {
    /// Load the settings file from `workspace_root` (if any), then apply the environment.
    pub fn load(workspace_root: &Path) -> Result<Self> {
        let settings = Self::from_file(&workspace_root.join(SETTINGS_FILE))?;
        Ok(settings.with_env(|key| std::env::var(key).ok()))
    }

    /// Settings from the environment only.
    pub fn from_env() -> Self {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    /// Read a settings file. A missing or empty file yields default settings.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        tracing::debug!(path = %path.display(), "loading settings file");
        serde_yaml_ng::from_str(&content).map_err(|source| BehatDockerError::SettingsParse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Override values with whatever `lookup` returns for the `BEHAT_DOCKER_*` variables.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(env::CONTAINER_NAME) {
            self.container_name = Some(v);
        }
        if let Some(v) = get(env::CONTAINER_PATH) {
            self.container_path = Some(v);
        }
        if let Some(v) = get(env::BEHAT_PATH) {
            self.behat_path = Some(v);
        }
        if let Some(v) = get(env::FEATURE_GLOB) {
            self.feature_glob = Some(v);
        }
        match get(env::DEBUG_PORT).map(|v| v.parse::<u16>()) {
            Some(Ok(port)) => self.debug_port = Some(port),
            Some(Err(e)) => tracing::warn!(error = %e, "ignoring invalid {}", env::DEBUG_PORT),
            None => {}
        }
        self
    }

    pub fn container_name(&self) -> Option<&str> {
        self.container_name.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn container_path(&self) -> &str {
        non_blank(&self.container_path).unwrap_or(DEFAULT_CONTAINER_PATH)
    }

    pub fn behat_path(&self) -> &str {
        non_blank(&self.behat_path).unwrap_or(DEFAULT_BEHAT_PATH)
    }

    pub fn feature_glob(&self) -> &str {
        non_blank(&self.feature_glob).unwrap_or(DEFAULT_FEATURE_GLOB)
    }

    /// The configured debug descriptor, or the Xdebug default for the container path.
    pub fn debug_configuration(&self) -> DebugConfiguration {
        let mut config = self
            .debug_configuration
            .clone()
            .unwrap_or_else(|| DebugConfiguration::listen_for_xdebug(self.container_path()));
        if let Some(port) = self.debug_port {
            config.port = port;
        }
        config
    }

    /// Freeze the settings into the configuration of one run.
    pub fn execution_config(&self, debug: bool) -> Result<ExecutionConfig> {
        let container_name = self
            .container_name()
            .ok_or(BehatDockerError::MissingContainerName)?;
        Ok(ExecutionConfig {
            container_name: container_name.to_string(),
            container_path: self.container_path().to_string(),
            behat_path: self.behat_path().to_string(),
            debug,
        })
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// Immutable configuration for the duration of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionConfig {
    pub container_name: String,
    pub container_path: String,
    pub behat_path: String,
    pub debug: bool,
}

impl ExecutionConfig {
    pub fn new(container_name: impl Into<String>) -> Self {
        Self {
            container_name: container_name.into(),
            container_path: DEFAULT_CONTAINER_PATH.into(),
            behat_path: DEFAULT_BEHAT_PATH.into(),
            debug: false,
        }
    }

    pub fn with_container_path(mut self, container_path: impl Into<String>) -> Self {
        self.container_path = container_path.into();
        self
    }

    pub fn with_behat_path(mut self, behat_path: impl Into<String>) -> Self {
        self.behat_path = behat_path.into();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}
