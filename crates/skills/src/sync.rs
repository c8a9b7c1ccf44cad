//! Bringing installed skills up to date with their origin repositories.
//!
//! Skills are grouped by origin repository and each repository is handled by
//! its own task. A task first asks the remote for its head commit; only when
//! some skill is behind (or missing on disk) does it pay for a sparse clone.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    tokio::sync::Semaphore,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    fs::{copy_dir_all, remove_dir_if_exists},
    lock::LockStore,
    registry::{SkillRegistry, safe_delete_path},
    repo_url::parse_repo_url,
    source::{ScanResult, SkillSource},
    types::{InstalledSkill, RepoReference, SyncOutcome, SyncStatus, SyncSummary},
};

/// Synchronizes every lock-file entry against its origin.
#[derive(Clone)]
pub struct SyncEngine {
    source: Arc<dyn SkillSource>,
    lock: Arc<LockStore>,
    project_root: PathBuf,
    skills_root: PathBuf,
    limiter: Option<Arc<Semaphore>>,
}

impl SyncEngine {
    pub fn new(source: Arc<dyn SkillSource>, registry: &SkillRegistry) -> Self {
        Self {
            source,
            lock: Arc::clone(registry.lock()),
            project_root: registry.project_root().to_path_buf(),
            skills_root: registry.skills_root().to_path_buf(),
            limiter: None,
        }
    }

    /// Cap how many repositories are synchronized at once. `None` (the
    /// default) runs one task per repository with no cap.
    #[must_use]
    pub fn with_max_concurrency(mut self, max: Option<usize>) -> Self {
        self.limiter = max.filter(|n| *n > 0).map(|n| Arc::new(Semaphore::new(n)));
        self
    }

    /// Synchronize all installed skills, one outcome per lock-file entry in
    /// lock-file group order. Failures are isolated per repository.
    pub async fn sync_all(&self) -> Result<Vec<SyncOutcome>> {
        let groups = self.lock.group_by_origin_repo()?;
        info!(repos = groups.len(), "sync started");

        let tasks = groups.into_iter().map(|(origin_repo, skills)| {
            let engine = self.clone();
            let fallback = skills.clone();
            let handle = tokio::spawn(async move {
                let _permit = match &engine.limiter {
                    Some(limiter) => Arc::clone(limiter).acquire_owned().await.ok(),
                    None => None,
                };
                engine.sync_group(&origin_repo, skills).await
            });
            async move {
                match handle.await {
                    Ok(outcomes) => outcomes,
                    Err(e) => {
                        warn!(error = %e, "sync task aborted");
                        errors_for(&fallback, &format!("sync task aborted: {e}"))
                    },
                }
            }
        });

        let outcomes: Vec<SyncOutcome> =
            futures::future::join_all(tasks).await.into_iter().flatten().collect();
        let summary = SyncSummary::from_outcomes(&outcomes);
        info!(
            updated = summary.updated,
            skipped = summary.skipped,
            errors = summary.errors,
            "sync finished"
        );
        Ok(outcomes)
    }

    async fn sync_group(&self, origin_repo: &str, skills: Vec<InstalledSkill>) -> Vec<SyncOutcome> {
        if origin_repo.is_empty() {
            return errors_for(&skills, "no origin repository recorded");
        }
        let repo = parse_repo_url(origin_repo);

        let head = match self.source.remote_head(&repo).await {
            Ok(head) => head,
            Err(e) => {
                warn!(repo = %origin_repo, error = %e, "remote head query failed");
                return errors_for(&skills, &e.to_string());
            },
        };

        if skills.iter().all(|s| self.is_current(s, &head)) {
            debug!(repo = %origin_repo, %head, count = skills.len(), "all skills current, skipping clone");
            return skills
                .iter()
                .map(|s| SyncOutcome::new(s, SyncStatus::Skipped))
                .collect();
        }

        // Skills from one repo may have been fetched from different folders;
        // each folder is its own sparse checkout.
        let mut roots: Vec<(&str, Vec<usize>)> = Vec::new();
        for (i, skill) in skills.iter().enumerate() {
            match roots.iter_mut().find(|(root, _)| *root == skill.origin_root) {
                Some((_, members)) => members.push(i),
                None => roots.push((skill.origin_root.as_str(), vec![i])),
            }
        }

        let mut outcomes: Vec<Option<SyncOutcome>> = vec![None; skills.len()];
        for (root, members) in roots {
            if members.iter().all(|&i| self.is_current(&skills[i], &head)) {
                for &i in &members {
                    outcomes[i] = Some(SyncOutcome::new(&skills[i], SyncStatus::Skipped));
                }
                continue;
            }

            match self.source.scan(&repo, Some(root)).await {
                Ok(scan) => {
                    for &i in &members {
                        outcomes[i] = Some(self.sync_skill(&repo, &scan, &skills[i]).await);
                    }
                },
                Err(e) => {
                    warn!(repo = %origin_repo, %root, error = %e, "scan failed");
                    for &i in &members {
                        outcomes[i] =
                            Some(SyncOutcome::new(&skills[i], SyncStatus::Error(e.to_string())));
                    }
                },
            }
        }

        outcomes
            .into_iter()
            .zip(&skills)
            .map(|(outcome, skill)| {
                outcome.unwrap_or_else(|| {
                    SyncOutcome::new(skill, SyncStatus::Error("not synchronized".into()))
                })
            })
            .collect()
    }

    async fn sync_skill(
        &self,
        repo: &RepoReference,
        scan: &ScanResult,
        skill: &InstalledSkill,
    ) -> SyncOutcome {
        let Some(upstream) = scan.find(&skill.origin_relative_path) else {
            warn!(skill = %skill.name, path = %skill.origin_relative_path, repo = %repo.base_url, "skill no longer exists upstream");
            return SyncOutcome::new(skill, SyncStatus::Error("no longer exists upstream".into()));
        };

        let dest = self.local_dir(skill);
        if skill.commit_hash.as_deref() == Some(scan.commit_hash.as_str()) && dest.exists() {
            return SyncOutcome::new(skill, SyncStatus::Skipped);
        }

        let src = scan.skill_dir(&upstream.relative_path);
        let updated = InstalledSkill {
            name: upstream.name.clone(),
            description: upstream.description.clone(),
            commit_hash: Some(scan.commit_hash.clone()),
            ..skill.clone()
        };
        let lock = Arc::clone(&self.lock);
        let skills_root = self.skills_root.clone();
        let status = tokio::task::spawn_blocking(move || {
            apply_update(&lock, &skills_root, &src, &dest, updated)
        })
        .await
        .unwrap_or_else(|e| SyncStatus::Error(format!("sync task aborted: {e}")));
        SyncOutcome::new(skill, status)
    }

    fn is_current(&self, skill: &InstalledSkill, head: &str) -> bool {
        skill.commit_hash.as_deref() == Some(head) && self.local_dir(skill).exists()
    }

    fn local_dir(&self, skill: &InstalledSkill) -> PathBuf {
        self.project_root.join(&skill.local_path)
    }
}

/// Replace the local copy of a skill with `src` and record the new commit.
/// The lock entry is only touched once the copy has succeeded.
fn apply_update(
    lock: &LockStore,
    skills_root: &Path,
    src: &Path,
    dest: &Path,
    updated: InstalledSkill,
) -> SyncStatus {
    let copied = safe_delete_path(dest, skills_root).and_then(|()| {
        remove_dir_if_exists(dest)
            .and_then(|()| copy_dir_all(src, dest))
            .map_err(|e| Error::copy(&updated.name, e))
    });
    if let Err(e) = copied {
        warn!(skill = %updated.name, error = %e, "sync copy failed");
        return SyncStatus::Error(e.to_string());
    }

    let (name, commit, path) = (
        updated.name.clone(),
        updated.commit_hash.clone().unwrap_or_default(),
        updated.local_path.clone(),
    );
    if let Err(e) = lock.upsert(updated) {
        return SyncStatus::Error(format!("lock file update failed: {e}"));
    }
    info!(skill = %name, %commit, %path, "skill updated");
    SyncStatus::Updated
}

fn errors_for(skills: &[InstalledSkill], reason: &str) -> Vec<SyncOutcome> {
    skills
        .iter()
        .map(|s| SyncOutcome::new(s, SyncStatus::Error(reason.to_string())))
        .collect()
}
