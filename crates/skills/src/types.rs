use std::path::Path;

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

// ── Remote side ──────────────────────────────────────────────────────────────

/// A skill found while scanning a checkout. Never persisted directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillDescriptor {
    pub name: String,
    pub description: String,
    /// Directory of the skill relative to the scanned sub-path. Empty when the
    /// descriptor sits directly in the sub-path.
    pub relative_path: String,
}

/// A clonable repository plus the branch and folder a URL points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoReference {
    pub base_url: String,
    /// `HEAD` means "whatever the remote's default branch is".
    pub branch: String,
    /// Folder inside the repo; empty when the URL did not embed one.
    pub sub_path: String,
}

impl RepoReference {
    pub const DEFAULT_BRANCH: &'static str = "HEAD";

    /// A reference to the remote's default branch with no embedded folder.
    pub fn whole(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            branch: Self::DEFAULT_BRANCH.to_string(),
            sub_path: String::new(),
        }
    }

    /// Sub-path to actually check out: the caller's request, else the one from
    /// the URL, else the conventional `skills` folder.
    pub fn effective_sub_path(&self, requested: Option<&str>) -> String {
        [requested.unwrap_or_default(), self.sub_path.as_str()]
            .into_iter()
            .map(|p| p.trim().trim_matches('/'))
            .find(|p| !p.is_empty())
            .unwrap_or(crate::DEFAULT_SKILLS_DIR)
            .to_string()
    }
}

// ── Lock file ────────────────────────────────────────────────────────────────

/// One installed skill and where it came from. Keyed by `local_path`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledSkill {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// The only filesystem location skli may delete for this skill.
    pub local_path: String,
    /// Repository URL as the user supplied it (may embed a branch).
    #[serde(default)]
    pub origin_repo: String,
    /// Sub-path that was scanned when the skill was fetched.
    #[serde(default)]
    pub origin_root: String,
    /// Path of the skill under `origin_root`.
    #[serde(default)]
    pub origin_relative_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl InstalledSkill {
    /// Base name of the local directory.
    pub fn folder_name(&self) -> &str {
        Path::new(&self.local_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.local_path)
    }

    pub fn is_managed(&self) -> bool {
        !self.origin_repo.is_empty()
    }
}

/// Contents of `skli.lock`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub skills: Vec<InstalledSkill>,
}

impl LockFile {
    pub fn find(&self, local_path: &str) -> Option<&InstalledSkill> {
        self.skills.iter().find(|s| s.local_path == local_path)
    }

    /// Insert or replace by `local_path`, keeping the original `installed_at`
    /// and moving `updated_at` strictly forward.
    pub fn upsert(&mut self, mut skill: InstalledSkill, now: DateTime<Utc>) {
        if let Some(existing) = self
            .skills
            .iter_mut()
            .find(|s| s.local_path == skill.local_path)
        {
            skill.installed_at = existing.installed_at.or(Some(now));
            skill.updated_at = Some(match existing.updated_at {
                Some(prev) if prev >= now => prev + chrono::Duration::microseconds(1),
                _ => now,
            });
            *existing = skill;
        } else {
            skill.installed_at = Some(now);
            skill.updated_at = Some(now);
            self.skills.push(skill);
        }
    }

    /// Returns whether an entry was removed.
    pub fn remove(&mut self, local_path: &str) -> bool {
        let before = self.skills.len();
        self.skills.retain(|s| s.local_path != local_path);
        self.skills.len() != before
    }

    /// Group entries by `origin_repo`, preserving first-seen order of repos
    /// and of skills within each repo.
    pub fn group_by_origin_repo(&self) -> Vec<(String, Vec<InstalledSkill>)> {
        let mut groups: Vec<(String, Vec<InstalledSkill>)> = Vec::new();
        for skill in &self.skills {
            match groups.iter_mut().find(|(repo, _)| *repo == skill.origin_repo) {
                Some((_, members)) => members.push(skill.clone()),
                None => groups.push((skill.origin_repo.clone(), vec![skill.clone()])),
            }
        }
        groups
    }
}

// ── Sync results ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Updated,
    /// Content already current.
    Skipped,
    Error(String),
}

/// Result of synchronizing one installed skill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub skill_name: String,
    pub local_path: String,
    pub origin_repo: String,
    pub status: SyncStatus,
}

impl SyncOutcome {
    pub fn new(skill: &InstalledSkill, status: SyncStatus) -> Self {
        Self {
            skill_name: skill.name.clone(),
            local_path: skill.local_path.clone(),
            origin_repo: skill.origin_repo.clone(),
            status,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.status, SyncStatus::Error(_))
    }
}

/// Counts over a whole sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl SyncSummary {
    pub fn from_outcomes(outcomes: &[SyncOutcome]) -> Self {
        outcomes
            .iter()
            .fold(Self::default(), |mut acc, o| {
                match o.status {
                    SyncStatus::Updated => acc.updated += 1,
                    SyncStatus::Skipped => acc.skipped += 1,
                    SyncStatus::Error(_) => acc.errors += 1,
                }
                acc
            })
    }
}

// ── Listing ──────────────────────────────────────────────────────────────────

/// A skill known locally, either recorded in the lock file or found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedSkill {
    pub skill: InstalledSkill,
    pub managed: bool,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn skill(name: &str, path: &str, repo: &str) -> InstalledSkill {
        InstalledSkill {
            name: name.into(),
            local_path: path.into(),
            origin_repo: repo.into(),
            ..Default::default()
        }
    }

    #[test]
    fn effective_sub_path_precedence() {
        let mut repo = RepoReference::whole("https://example.com/r");
        assert_eq!(repo.effective_sub_path(None), "skills");
        repo.sub_path = "skills/experimental".into();
        assert_eq!(repo.effective_sub_path(None), "skills/experimental");
        assert_eq!(repo.effective_sub_path(Some("  ")), "skills/experimental");
        assert_eq!(repo.effective_sub_path(Some("/custom/")), "custom");
    }

    #[test]
    fn upsert_keeps_installed_at_and_advances_updated_at() {
        let mut lock = LockFile::default();
        let t0 = Utc::now();
        lock.upsert(skill("a", "skills/a", "r"), t0);

        let mut changed = skill("a", "skills/a", "r");
        changed.description = "new".into();
        // Same instant: updated_at must still move forward.
        lock.upsert(changed, t0);

        assert_eq!(lock.skills.len(), 1);
        let got = &lock.skills[0];
        assert_eq!(got.description, "new");
        assert_eq!(got.installed_at, Some(t0));
        assert!(got.updated_at.unwrap() > t0);
    }

    #[test]
    fn upsert_never_duplicates_local_path() {
        let mut lock = LockFile::default();
        let now = Utc::now();
        for i in 0..5 {
            let mut s = skill("x", if i % 2 == 0 { "skills/x" } else { "skills/y" }, "r");
            s.commit_hash = Some(format!("c{i}"));
            lock.upsert(s, now + chrono::Duration::seconds(i));
        }
        assert_eq!(lock.skills.len(), 2);
        assert_eq!(lock.find("skills/x").unwrap().commit_hash.as_deref(), Some("c4"));
        assert_eq!(lock.find("skills/y").unwrap().commit_hash.as_deref(), Some("c3"));
        assert_eq!(lock.find("skills/x").unwrap().installed_at, Some(now));
    }

    #[test]
    fn group_by_origin_repo_sizes() {
        let lock = LockFile {
            last_updated: None,
            skills: vec![
                skill("a", "skills/a", "repo-1"),
                skill("b", "skills/b", "repo-1"),
                skill("c", "skills/c", "repo-2"),
            ],
        };
        let groups = lock.group_by_origin_repo();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "repo-1");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, "repo-2");
        assert_eq!(groups[1].1.len(), 1);
    }

    #[test]
    fn remove_missing_is_noop() {
        let mut lock = LockFile::default();
        lock.upsert(skill("a", "skills/a", "r"), Utc::now());
        assert!(!lock.remove("skills/zzz"));
        assert!(lock.remove("skills/a"));
        assert!(lock.skills.is_empty());
    }

    #[test]
    fn folder_name_is_base_name() {
        assert_eq!(skill("a", "skills/nested/demo", "").folder_name(), "demo");
        assert!(!skill("a", "skills/demo", "").is_managed());
    }
}
