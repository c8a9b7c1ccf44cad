use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Contents of `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkliConfig {
    /// Where skills are installed, relative to the project root unless
    /// absolute. Unset means `skills`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    /// Repository URLs the user has installed from, most recent last.
    pub remotes: Vec<String>,
}

impl SkliConfig {
    /// Remember `url`; returns `false` when it was already known.
    pub fn add_remote(&mut self, url: &str) -> bool {
        let url = url.trim();
        if url.is_empty() || self.remotes.iter().any(|r| r == url) {
            return false;
        }
        self.remotes.push(url.to_string());
        true
    }

    /// Skills directory for a project rooted at `project_root`.
    pub fn skills_dir(&self, project_root: &Path, default: &str) -> PathBuf {
        match self.local_path.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => project_root.join(path),
            _ => project_root.join(default),
        }
    }
}
