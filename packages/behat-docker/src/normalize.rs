//! Rewrites container-absolute paths in runner output to project-relative ones.

use regex::Regex;

/// Strips one container path from runner output. Build it once per run.
///
/// Occurrences of the container path that are not followed by a separator are
/// left alone, so `/var/www` inside `/var/wwwdata` survives. A container path of
/// `/` (or an empty one) leaves the text unchanged, since stripping it would turn
/// every absolute path into a relative one.
#[derive(Debug, Clone)]
pub struct PathNormalizer {
    pattern: Option<Regex>,
}

impl PathNormalizer {
    pub fn new(container_path: &str) -> Self {
        let root = container_path.trim_end_matches(['/', '\\']);
        if root.is_empty() {
            return Self { pattern: None };
        }

        // The root is escaped, so only the regex size limit can reject it.
        let pattern = Regex::new(&format!(r"{}[/\\]", regex::escape(root)))
            .inspect_err(|e| {
                tracing::warn!(container_path, error = %e, "container path too long to normalize")
            })
            .ok();
        Self { pattern }
    }

    pub fn normalize(&self, text: &str) -> String {
        match &self.pattern {
            Some(re) => re.replace_all(text, "").into_owned(),
            None => text.to_string(),
        }
    }
}

/// One-off form of [`PathNormalizer::normalize`].
///
/// # Examples
/// ```
/// use behat_docker::normalize::normalize_container_paths;
///
/// let out = normalize_container_paths("at /var/www/features/a.feature:15", "/var/www");
/// assert_eq!(out, "at features/a.feature:15");
/// ```
pub fn normalize_container_paths(text: &str, container_path: &str) -> String {
    PathNormalizer::new(container_path).normalize(text)
}
