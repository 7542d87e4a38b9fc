//! Workspace capability: file search, text loading and path relativisation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use walkdir::WalkDir;

use crate::error::{BehatDockerError, Result};

/// The project the feature files live in.
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Absolute workspace root.
    fn root(&self) -> &Path;

    /// All files whose root-relative path matches `pattern`, sorted.
    async fn find_files(&self, pattern: &str) -> Result<Vec<PathBuf>>;

    /// Full text of a file.
    async fn read_text(&self, path: &Path) -> std::io::Result<String>;

    /// `path` relative to the root, or `path` itself when it lies outside the root.
    fn relative_path(&self, path: &Path) -> PathBuf {
        path.strip_prefix(self.root())
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// A workspace on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsWorkspace {
    root: PathBuf,
}

impl FsWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Workspace for FsWorkspace {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn find_files(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let matcher = GlobMatcher::new(pattern)?;
        let root = self.root.clone();

        tokio::task::spawn_blocking(move || walk_matching(&root, &matcher))
            .await
            .map_err(|e| BehatDockerError::Io(std::io::Error::other(e)))?
    }

    async fn read_text(&self, path: &Path) -> std::io::Result<String> {
        tokio::fs::read_to_string(path).await
    }
}

fn walk_matching(root: &Path, matcher: &GlobMatcher) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || e.file_name() != ".git");

    for entry in walker {
        // A dangling symlink or unreadable directory below the root only loses that entry.
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(e.into()),
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable workspace entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        if matcher.is_match(relative) {
            files.push(path.to_path_buf());
        }
    }

    files.sort();
    tracing::debug!(root = %root.display(), matched = files.len(), "workspace scan complete");
    Ok(files)
}

/// A compiled glob pattern, matched against `/`-separated relative paths.
///
/// Supports `**`, `*`, `?`, `[...]` / `[!...]` and `{a,b}` alternatives.
#[derive(Debug, Clone)]
pub struct GlobMatcher {
    pattern: String,
    regex: Regex,
}

impl GlobMatcher {
    pub fn new(pattern: &str) -> Result<Self> {
        let source = glob_to_regex(pattern)?;
        let regex = Regex::new(&source).map_err(|e| BehatDockerError::InvalidGlob {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn is_match(&self, relative: &Path) -> bool {
        let text = relative.to_string_lossy().replace('\\', "/");
        self.regex.is_match(&text)
    }
}

fn glob_to_regex(pattern: &str) -> Result<String> {
    let invalid = |reason: &str| BehatDockerError::InvalidGlob {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    };

    let body = pattern.strip_prefix("./").unwrap_or(pattern);
    let chars: Vec<char> = body.chars().collect();
    let mut out = String::from("^");
    let mut in_braces = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '{' if in_braces => return Err(invalid("nested braces are not supported")),
            '{' => {
                in_braces = true;
                out.push_str("(?:");
            }
            '}' if in_braces => {
                in_braces = false;
                out.push(')');
            }
            ',' if in_braces => out.push('|'),
            '[' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == ']')
                    .map(|p| p + i + 1)
                    .ok_or_else(|| invalid("unclosed character class"))?;
                out.push('[');
                let mut class = &chars[i + 1..close];
                if let Some(('!', rest)) = class.split_first().map(|(f, r)| (*f, r)) {
                    out.push('^');
                    class = rest;
                }
                for &ch in class {
                    if ch == '\\' || ch == '[' {
                        out.push('\\');
                    }
                    out.push(ch);
                }
                out.push(']');
                i = close + 1;
                continue;
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
        i += 1;
    }

    if in_braces {
        return Err(invalid("unclosed brace"));
    }
    out.push('$');
    Ok(out)
}

/// In-memory workspace for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::*;

    /// A workspace whose files live in a map; paths are absolute under `root`.
    #[derive(Debug)]
    pub struct MemoryWorkspace {
        root: PathBuf,
        files: Mutex<BTreeMap<PathBuf, String>>,
        queries: Mutex<usize>,
    }

    impl MemoryWorkspace {
        pub fn new(root: impl Into<PathBuf>) -> Self {
            Self {
                root: root.into(),
                files: Mutex::new(BTreeMap::new()),
                queries: Mutex::new(0),
            }
        }

        /// Add or overwrite a file; `relative` is joined onto the root.
        pub fn with_file(self, relative: &str, text: &str) -> Self {
            self.write(relative, text);
            self
        }

        pub fn write(&self, relative: &str, text: &str) -> PathBuf {
            let path = self.root.join(relative);
            if let Ok(mut files) = self.files.lock() {
                files.insert(path.clone(), text.to_string());
            }
            path
        }

        pub fn remove(&self, relative: &str) {
            if let Ok(mut files) = self.files.lock() {
                files.remove(&self.root.join(relative));
            }
        }

        /// Number of `find_files` calls so far.
        pub fn query_count(&self) -> usize {
            self.queries.lock().map(|q| *q).unwrap_or_default()
        }
    }

    #[async_trait]
    impl Workspace for MemoryWorkspace {
        fn root(&self) -> &Path {
            &self.root
        }

        async fn find_files(&self, pattern: &str) -> Result<Vec<PathBuf>> {
            if let Ok(mut queries) = self.queries.lock() {
                *queries += 1;
            }
            let matcher = GlobMatcher::new(pattern)?;
            let files = self.files.lock().map(|f| f.clone()).unwrap_or_default();
            Ok(files
                .keys()
                .filter(|p| {
                    p.strip_prefix(&self.root)
                        .map(|rel| matcher.is_match(rel))
                        .unwrap_or(false)
                })
                .cloned()
                .collect())
        }

        async fn read_text(&self, path: &Path) -> std::io::Result<String> {
            self.files
                .lock()
                .ok()
                .and_then(|f| f.get(path).cloned())
                .ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("File not found: {}", path.display()),
                    )
                })
        }
    }
}
