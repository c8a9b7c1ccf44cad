use tracing::{info, warn};

use crate::{
    error::{Error, Result},
    registry::{SkillRegistry, local_path_for},
    repo_url::parse_repo_url,
    source::{ScanResult, SkillSource, skill_folder_name},
    types::{InstalledSkill, SkillDescriptor},
};

/// Which discovered skills to install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    /// Declared names or folder names, matched case-insensitively.
    Named(Vec<String>),
}

impl Selection {
    /// Pick the descriptors to install out of a scan. Every requested name must
    /// match at least one skill.
    pub fn resolve(&self, available: &[SkillDescriptor]) -> Result<Vec<SkillDescriptor>> {
        let Self::Named(names) = self else {
            return Ok(available.to_vec());
        };

        let mut picked: Vec<SkillDescriptor> = Vec::new();
        for name in names {
            let wanted = name.trim().to_lowercase();
            let matching: Vec<&SkillDescriptor> = available
                .iter()
                .filter(|d| {
                    d.name.to_lowercase() == wanted
                        || skill_folder_name(d).to_lowercase() == wanted
                })
                .collect();
            if matching.is_empty() {
                return Err(Error::NotFound { name: name.clone() });
            }
            for d in matching {
                if !picked.iter().any(|p| p.relative_path == d.relative_path) {
                    picked.push(d.clone());
                }
            }
        }
        Ok(picked)
    }
}

/// What an add did.
#[derive(Debug)]
pub struct InstallReport {
    pub commit_hash: String,
    pub sub_path: String,
    /// Lock-file entries written, in install order.
    pub installed: Vec<InstalledSkill>,
    pub failed: Vec<(SkillDescriptor, Error)>,
}

/// Scan `url`, install the selected skills into the registry's skills root
/// and record each one in the lock file.
///
/// The URL is recorded verbatim as the origin so a branch embedded in a browse
/// URL is honored again on sync.
pub async fn add_from_url(
    source: &dyn SkillSource,
    registry: &SkillRegistry,
    url: &str,
    requested_sub_path: Option<&str>,
    selection: &Selection,
) -> Result<InstallReport> {
    let url = url.trim();
    let repo = parse_repo_url(url);
    let scan = source.scan(&repo, requested_sub_path).await?;
    install_from_scan(registry, url, &scan, selection)
}

/// Install from a checkout the caller already holds (e.g. after showing the
/// user what a repository offers).
pub fn install_from_scan(
    registry: &SkillRegistry,
    origin_repo: &str,
    scan: &ScanResult,
    selection: &Selection,
) -> Result<InstallReport> {
    let selected = selection.resolve(&scan.skills)?;

    let mut report = InstallReport {
        commit_hash: scan.commit_hash.clone(),
        sub_path: scan.sub_path.clone(),
        installed: Vec::new(),
        failed: Vec::new(),
    };
    for outcome in scan.install(registry.skills_root(), &selected) {
        let dest = match outcome.result {
            Ok(dest) => dest,
            Err(e) => {
                warn!(skill = %outcome.skill.name, error = %e, "install failed");
                report.failed.push((outcome.skill, e));
                continue;
            },
        };
        let entry = InstalledSkill {
            name: outcome.skill.name.clone(),
            description: outcome.skill.description.clone(),
            local_path: local_path_for(registry.project_root(), &dest),
            origin_repo: origin_repo.to_string(),
            origin_root: scan.sub_path.clone(),
            origin_relative_path: outcome.skill.relative_path.clone(),
            commit_hash: Some(scan.commit_hash.clone()),
            ..Default::default()
        };
        registry.lock().upsert(entry.clone())?;
        report.installed.push(entry);
    }

    info!(
        repo = %origin_repo,
        commit = %scan.commit_hash,
        installed = report.installed.len(),
        failed = report.failed.len(),
        "skills added"
    );
    Ok(report)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            LockStore, SKILL_FILE,
            source::{
                GitSource,
                tests::{file_url, git, init_upstream},
            },
            sync::SyncEngine,
            types::SyncStatus,
        },
        std::sync::Arc,
        tempfile::TempDir,
    };

    fn descriptor(name: &str, relative_path: &str) -> SkillDescriptor {
        SkillDescriptor {
            name: name.into(),
            description: String::new(),
            relative_path: relative_path.into(),
        }
    }

    fn registry() -> (TempDir, SkillRegistry) {
        let tmp = tempfile::tempdir().unwrap();
        let lock = Arc::new(LockStore::new(LockStore::default_path(tmp.path())));
        let registry = SkillRegistry::new(tmp.path(), tmp.path().join("skills"), lock);
        (tmp, registry)
    }

    #[test]
    fn selection_matches_name_or_folder() {
        let available = vec![
            descriptor("Alpha", "alpha"),
            descriptor("Beta Skill", "nested/beta"),
        ];
        assert_eq!(Selection::All.resolve(&available).unwrap().len(), 2);

        let picked = Selection::Named(vec!["BETA".into(), "alpha".into(), "Beta Skill".into()])
            .resolve(&available)
            .unwrap();
        let paths: Vec<_> = picked.iter().map(|d| d.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["nested/beta", "alpha"]);

        let err = Selection::Named(vec!["gamma".into()]).resolve(&available).unwrap_err();
        assert!(matches!(err, Error::NotFound { name } if name == "gamma"));
    }

    #[tokio::test]
    async fn add_records_provenance() {
        let upstream = init_upstream().await;
        let (tmp, registry) = registry();
        let url = file_url(upstream.path());

        let report = add_from_url(&GitSource::default(), &registry, &url, None, &Selection::All)
            .await
            .unwrap();
        assert!(report.failed.is_empty());
        assert_eq!(report.installed.len(), 2);

        let lock = registry.lock().load().unwrap();
        let beta = lock.find("skills/beta").unwrap();
        assert_eq!(beta.name, "Beta");
        assert_eq!(beta.origin_repo, url);
        assert_eq!(beta.origin_root, "skills");
        assert_eq!(beta.origin_relative_path, "nested/beta");
        assert_eq!(beta.commit_hash.as_deref(), Some(report.commit_hash.as_str()));
        assert!(tmp.path().join("skills/beta").join(SKILL_FILE).is_file());
        assert!(tmp.path().join("skills/alpha/scripts/run.sh").is_file());
    }

    #[tokio::test]
    async fn unknown_selection_installs_nothing() {
        let upstream = init_upstream().await;
        let (tmp, registry) = registry();
        let selection = Selection::Named(vec!["alpha".into(), "nope".into()]);

        let err = add_from_url(
            &GitSource::default(),
            &registry,
            &file_url(upstream.path()),
            None,
            &selection,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(!tmp.path().join("skills").exists());
        assert!(registry.lock().list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_then_sync_follows_upstream_commits() {
        let upstream = init_upstream().await;
        let (tmp, registry) = registry();
        let source = Arc::new(GitSource::default());
        let url = file_url(upstream.path());

        add_from_url(
            source.as_ref(),
            &registry,
            &url,
            None,
            &Selection::Named(vec!["Alpha".into()]),
        )
        .await
        .unwrap();

        let engine = SyncEngine::new(source.clone(), &registry);
        let outcomes = engine.sync_all().await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].status, SyncStatus::Skipped);

        std::fs::write(
            upstream.path().join("skills/alpha/SKILL.md"),
            "---\nname: Alpha\ndescription: Alpha, revised\n---\n",
        )
        .unwrap();
        git(upstream.path(), &["commit", "--quiet", "-am", "revise alpha"]).await;

        let outcomes = engine.sync_all().await.unwrap();
        assert_eq!(outcomes[0].status, SyncStatus::Updated);
        let entry = registry.lock().list().unwrap().remove(0);
        assert_eq!(entry.description, "Alpha, revised");
        let on_disk = std::fs::read_to_string(tmp.path().join("skills/alpha/SKILL.md")).unwrap();
        assert!(on_disk.contains("Alpha, revised"));

        let outcomes = engine.sync_all().await.unwrap();
        assert_eq!(outcomes[0].status, SyncStatus::Skipped);
    }
}
