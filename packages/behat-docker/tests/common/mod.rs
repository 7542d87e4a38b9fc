#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use behat_docker::workspace::FsWorkspace;

/// A project directory on disk, removed when dropped.
pub struct TestProject {
    pub dir: TempDir,
    pub workspace: Arc<FsWorkspace>,
}

impl TestProject {
    pub fn new(files: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        for (relative, text) in files {
            let path = dir.path().join(relative);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(path, text).unwrap();
        }
        let workspace = Arc::new(FsWorkspace::new(dir.path()));
        Self { dir, workspace }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    /// Put an executable `docker` script in `bin/` and return a `PATH` that finds it first.
    #[cfg(unix)]
    pub fn fake_docker(&self, script: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let bin = self.dir.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let docker = bin.join("docker");
        std::fs::write(&docker, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&docker, std::fs::Permissions::from_mode(0o755)).unwrap();

        match std::env::var("PATH") {
            Ok(path) => format!("{}:{path}", bin.display()),
            Err(_) => bin.display().to_string(),
        }
    }
}
