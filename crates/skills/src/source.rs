//! Fetching skills out of remote git repositories.
//!
//! [`GitSource`] performs a shallow, sparse checkout of a single folder of a
//! repository so discovery only downloads what it needs, and asks the remote
//! for its head commit without cloning when a cheap staleness probe is enough.

use std::path::{Path, PathBuf};

use {
    async_trait::async_trait,
    tempfile::TempDir,
    tracing::{debug, info},
    walkdir::WalkDir,
};

use crate::{
    SKILL_FILE,
    error::{Error, Result},
    fs::{copy_dir_all, remove_dir_if_exists},
    git::GitCli,
    parse::{self, DISCOVERY_MAX_LINES},
    registry::safe_delete_path,
    types::{RepoReference, SkillDescriptor},
};

/// A finished sparse checkout and the skills found in it.
///
/// The checkout lives in a temporary directory that is removed when this value
/// is dropped, so holding on to it is how a caller keeps the files around.
#[derive(Debug)]
pub struct ScanResult {
    pub skills: Vec<SkillDescriptor>,
    pub commit_hash: String,
    /// Sub-path that was actually checked out.
    pub sub_path: String,
    checkout: TempDir,
}

impl ScanResult {
    pub fn new(
        checkout: TempDir,
        sub_path: impl Into<String>,
        commit_hash: impl Into<String>,
        skills: Vec<SkillDescriptor>,
    ) -> Self {
        Self {
            skills,
            commit_hash: commit_hash.into(),
            sub_path: sub_path.into(),
            checkout,
        }
    }

    /// Root of the temporary checkout.
    pub fn working_dir(&self) -> &Path {
        self.checkout.path()
    }

    /// Directory a skill with `relative_path` lives in inside the checkout.
    pub fn skill_dir(&self, relative_path: &str) -> PathBuf {
        skill_source_dir(self.working_dir(), &self.sub_path, relative_path)
    }

    pub fn find(&self, relative_path: &str) -> Option<&SkillDescriptor> {
        self.skills.iter().find(|s| s.relative_path == relative_path)
    }

    /// Copy `selected` skills from this checkout into `destination_root`.
    pub fn install(
        &self,
        destination_root: &Path,
        selected: &[SkillDescriptor],
    ) -> Vec<InstallOutcome> {
        install_skills(self.working_dir(), &self.sub_path, destination_root, selected)
    }
}

/// Where skills come from. Retry policy belongs to callers; implementations
/// never retry.
#[async_trait]
pub trait SkillSource: Send + Sync {
    /// Check out `repo` (restricted to one sub-path) and discover its skills.
    async fn scan(&self, repo: &RepoReference, requested_sub_path: Option<&str>)
    -> Result<ScanResult>;

    /// Commit the remote currently has for the repo's branch, without cloning.
    async fn remote_head(&self, repo: &RepoReference) -> Result<String>;
}

/// Steps of a sparse scan, used to label failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanStep {
    Init,
    AddRemote,
    ConfigureSparse,
    Fetch,
    Checkout,
    ResolveHash,
    Discover,
}

impl ScanStep {
    fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::AddRemote => "remote add",
            Self::ConfigureSparse => "sparse-checkout",
            Self::Fetch => "fetch",
            Self::Checkout => "checkout",
            Self::ResolveHash => "rev-parse",
            Self::Discover => "discover",
        }
    }
}

/// [`SkillSource`] backed by the `git` binary.
#[derive(Debug, Clone, Default)]
pub struct GitSource {
    git: GitCli,
}

impl GitSource {
    pub fn new(git: GitCli) -> Self {
        Self { git }
    }

    pub fn git(&self) -> &GitCli {
        &self.git
    }

    async fn checkout_sparse(
        &self,
        dir: &Path,
        repo: &RepoReference,
        sub_path: &str,
    ) -> std::result::Result<String, (ScanStep, Error)> {
        self.step(dir, ScanStep::Init, &["init", "--quiet"]).await?;
        self.step(dir, ScanStep::AddRemote, &["remote", "add", "origin", &repo.base_url])
            .await?;

        self.step(dir, ScanStep::ConfigureSparse, &["config", "core.sparseCheckout", "true"])
            .await?;
        let info_dir = dir.join(".git").join("info");
        std::fs::create_dir_all(&info_dir)
            .and_then(|()| std::fs::write(info_dir.join("sparse-checkout"), format!("{sub_path}/\n")))
            .map_err(|e| (ScanStep::ConfigureSparse, Error::from(e)))?;

        self.step(dir, ScanStep::Fetch, &["fetch", "--depth", "1", "origin", &repo.branch])
            .await?;
        self.step(dir, ScanStep::Checkout, &["checkout", "--quiet", "FETCH_HEAD"])
            .await?;

        let head = self.step(dir, ScanStep::ResolveHash, &["rev-parse", "HEAD"]).await?;
        Ok(head.trim().to_string())
    }

    async fn step(
        &self,
        dir: &Path,
        step: ScanStep,
        args: &[&str],
    ) -> std::result::Result<String, (ScanStep, Error)> {
        self.git.run(dir, args).await.map_err(|e| (step, e))
    }
}

#[async_trait]
impl SkillSource for GitSource {
    async fn scan(
        &self,
        repo: &RepoReference,
        requested_sub_path: Option<&str>,
    ) -> Result<ScanResult> {
        let sub_path = repo.effective_sub_path(requested_sub_path);
        let checkout = tempfile::Builder::new()
            .prefix("skli-repo-")
            .tempdir()
            .map_err(|e| Error::clone_failed(&repo.base_url, ScanStep::Init.as_str(), e.into()))?;

        debug!(repo = %repo.base_url, branch = %repo.branch, %sub_path, dir = %checkout.path().display(), "sparse checkout");
        let commit_hash = self
            .checkout_sparse(checkout.path(), repo, &sub_path)
            .await
            .map_err(|(step, e)| Error::clone_failed(&repo.base_url, step.as_str(), e))?;

        let base = checkout.path().join(&sub_path);
        let skills = tokio::task::spawn_blocking(move || discover_skills(&base))
            .await
            .map_err(Error::from)
            .and_then(|found| found)
            .map_err(|e| Error::clone_failed(&repo.base_url, ScanStep::Discover.as_str(), e))?;
        if skills.is_empty() {
            return Err(Error::NoSkillsFound {
                url: repo.base_url.clone(),
                sub_path,
            });
        }

        info!(repo = %repo.base_url, %sub_path, commit = %commit_hash, count = skills.len(), "scanned skills");
        Ok(ScanResult::new(checkout, sub_path, commit_hash, skills))
    }

    async fn remote_head(&self, repo: &RepoReference) -> Result<String> {
        let cwd = std::env::temp_dir();
        let listing = self
            .git
            .run(&cwd, &["ls-remote", &repo.base_url, &repo.branch])
            .await
            .map_err(|e| Error::remote_query(&repo.base_url, e.to_string()))?;

        let hash = pick_remote_ref(&listing, &repo.branch).ok_or_else(|| {
            Error::remote_query(&repo.base_url, format!("ref '{}' not found", repo.branch))
        })?;
        debug!(repo = %repo.base_url, branch = %repo.branch, %hash, "remote head");
        Ok(hash)
    }
}

/// Pick the hash for `branch` out of `git ls-remote` output, preferring an
/// exact ref, then the branch head, then a tag.
///
/// `ls-remote` matches patterns by suffix, so refs such as
/// `refs/heads/feature/<branch>` are listed too and must not be taken.
fn pick_remote_ref(listing: &str, branch: &str) -> Option<String> {
    let refs: Vec<(&str, &str)> = listing
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .map(|(hash, name)| (hash.trim(), name.trim()))
        .filter(|(hash, _)| !hash.is_empty())
        .collect();

    let candidates = [
        branch.to_string(),
        format!("refs/heads/{branch}"),
        format!("refs/tags/{branch}"),
    ];
    candidates
        .iter()
        .find_map(|want| refs.iter().find(|(_, name)| name == want))
        .map(|(hash, _)| (*hash).to_string())
}

/// Recursively find `SKILL.md` files under `base_dir` and read their
/// front-matter. Descriptors without a `name:` are ignored.
pub fn discover_skills(base_dir: &Path) -> Result<Vec<SkillDescriptor>> {
    let mut skills = Vec::new();
    if !base_dir.is_dir() {
        return Ok(skills);
    }

    let walker = WalkDir::new(base_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");
    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() || entry.file_name() != SKILL_FILE {
            continue;
        }
        let Some(skill_dir) = entry.path().parent() else {
            continue;
        };
        let meta = match parse::parse_file(entry.path(), DISCOVERY_MAX_LINES) {
            Ok(meta) => meta,
            Err(e) => {
                debug!(path = %entry.path().display(), %e, "skipping unreadable SKILL.md");
                continue;
            },
        };
        if meta.name.is_empty() {
            debug!(path = %entry.path().display(), "skipping SKILL.md without a name");
            continue;
        }
        skills.push(SkillDescriptor {
            name: meta.name,
            description: meta.description,
            relative_path: relative_slash_path(base_dir, skill_dir),
        });
    }
    Ok(skills)
}

/// `path` relative to `base`, `/`-separated; empty when they are equal.
pub(crate) fn relative_slash_path(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .map(|rel| {
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default()
}

fn skill_source_dir(working_dir: &Path, sub_path: &str, relative_path: &str) -> PathBuf {
    let mut dir = working_dir.join(sub_path);
    if !relative_path.is_empty() {
        dir.push(relative_path);
    }
    dir
}

/// Name of the flat folder a skill is installed into: the last segment of its
/// relative path, or its sanitized name when it sits directly in the sub-path.
pub fn skill_folder_name(skill: &SkillDescriptor) -> String {
    let base = Path::new(&skill.relative_path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if !base.is_empty() && base != "." && base != ".." {
        return base;
    }
    sanitize_name(&skill.name)
}

/// Lower-case, spaces to hyphens, and drop anything outside `[a-z0-9-]`.
pub fn sanitize_name(name: &str) -> String {
    name.to_lowercase()
        .replace(' ', "-")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect()
}

/// Result of installing one selected skill.
#[derive(Debug)]
pub struct InstallOutcome {
    pub skill: SkillDescriptor,
    /// Destination directory on success.
    pub result: Result<PathBuf>,
}

/// Copy each selected skill from a checkout into its own flat folder under
/// `destination_root`, replacing any folder of the same name.
///
/// Every skill is attempted; a failure does not undo or stop the others.
pub fn install_skills(
    working_dir: &Path,
    sub_path: &str,
    destination_root: &Path,
    selected: &[SkillDescriptor],
) -> Vec<InstallOutcome> {
    selected
        .iter()
        .map(|skill| InstallOutcome {
            skill: skill.clone(),
            result: install_one(working_dir, sub_path, destination_root, skill),
        })
        .collect()
}

fn install_one(
    working_dir: &Path,
    sub_path: &str,
    destination_root: &Path,
    skill: &SkillDescriptor,
) -> Result<PathBuf> {
    let folder = skill_folder_name(skill);
    if folder.is_empty() {
        return Err(Error::InvalidSkillPath {
            path: PathBuf::from(&skill.relative_path),
            reason: format!("cannot derive a folder name for '{}'", skill.name),
        });
    }
    let src = skill_source_dir(working_dir, sub_path, &skill.relative_path);
    let dest = destination_root.join(&folder);

    std::fs::create_dir_all(destination_root).map_err(|e| Error::copy(&skill.name, e))?;
    safe_delete_path(&dest, destination_root)?;
    remove_dir_if_exists(&dest).map_err(|e| Error::copy(&skill.name, e))?;
    copy_dir_all(&src, &dest).map_err(|e| Error::copy(&skill.name, e))?;

    debug!(skill = %skill.name, dest = %dest.display(), "installed skill");
    Ok(dest)
}
