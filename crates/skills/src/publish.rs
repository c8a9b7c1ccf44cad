//! Contributing a local skill back to a repository as a pull/merge request.

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicI64, Ordering},
    time::Duration,
};

use {
    chrono::{DateTime, Local},
    tokio::process::Command,
    tracing::{debug, info, warn},
    url::form_urlencoded,
    walkdir::WalkDir,
};

use crate::{
    DEFAULT_SKILLS_DIR, SKILL_FILE,
    error::{Error, Result},
    fs::{copy_dir_all, remove_dir_if_exists},
    git::{GitCli, combined_output, run_process},
    parse::{self, DISCOVERY_MAX_LINES},
    registry::safe_delete_path,
    repo_url::{normalize_repo_web_url, parse_repo_url},
    source::{relative_slash_path, sanitize_name},
    types::{InstalledSkill, RepoReference},
};

/// Branch used when the remote does not advertise its default.
const FALLBACK_BASE_BRANCH: &str = "main";

/// Where a repository is hosted, judged from its URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostingProvider {
    GitHub,
    GitLab,
    Bitbucket,
    Unknown,
}

impl HostingProvider {
    pub fn detect(repo_url: &str) -> Self {
        let url = repo_url.to_lowercase();
        if url.contains("github.com") {
            Self::GitHub
        } else if url.contains("gitlab.com") {
            Self::GitLab
        } else if url.contains("bitbucket.org") {
            Self::Bitbucket
        } else {
            Self::Unknown
        }
    }

    /// CLI able to open a PR/MR for this provider, if there is one.
    pub fn cli(self) -> Option<&'static str> {
        match self {
            Self::GitHub => Some("gh"),
            Self::GitLab => Some("glab"),
            Self::Bitbucket | Self::Unknown => None,
        }
    }

    fn cli_args(self, request: &PrRequest<'_>) -> Vec<String> {
        let args = match self {
            Self::GitHub => vec![
                "pr",
                "create",
                "--title",
                request.title,
                "--body",
                request.body,
                "--head",
                request.branch,
                "--base",
                request.target_branch,
            ],
            Self::GitLab => vec![
                "mr",
                "create",
                "--title",
                request.title,
                "--description",
                request.body,
                "--source-branch",
                request.branch,
                "--target-branch",
                request.target_branch,
                "--yes",
            ],
            Self::Bitbucket | Self::Unknown => Vec::new(),
        };
        args.into_iter().map(String::from).collect()
    }
}

struct PrRequest<'a> {
    title: &'a str,
    body: &'a str,
    branch: &'a str,
    target_branch: &'a str,
}

/// Web link for opening a PR/MR by hand. Unknown providers get the
/// repository's web page.
pub fn build_pr_url(
    provider: HostingProvider,
    repo_url: &str,
    branch: &str,
    target_branch: &str,
    title: &str,
) -> String {
    let web = normalize_repo_web_url(repo_url);
    match provider {
        HostingProvider::GitHub => {
            format!("{web}/compare/{target_branch}...{branch}?expand=1")
        },
        HostingProvider::GitLab => {
            let query = form_urlencoded::Serializer::new(String::new())
                .append_pair("merge_request[source_branch]", branch)
                .append_pair("merge_request[target_branch]", target_branch)
                .append_pair("merge_request[title]", title)
                .finish();
            format!("{web}/-/merge_requests/new?{query}")
        },
        HostingProvider::Bitbucket => {
            let query = form_urlencoded::Serializer::new(String::new())
                .append_pair("dest", target_branch)
                .append_pair("source", branch)
                .finish();
            format!("{web}/pull-requests/new?{query}")
        },
        HostingProvider::Unknown => web,
    }
}

/// Last millisecond stamp handed out by [`branch_name`].
static LAST_BRANCH_STAMP: AtomicI64 = AtomicI64::new(0);

/// `feat/update-<sanitized-name>-<YYYYmmdd-HHMMSS>-<millis>`.
///
/// Stamps are strictly increasing within the process, so two uploads in the
/// same millisecond still get distinct branches.
pub fn branch_name(skill_name: &str) -> String {
    let now = Local::now();
    let now_ms = now.timestamp_millis();
    let prev = LAST_BRANCH_STAMP
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now_ms.max(last + 1))
        })
        .unwrap_or_else(|last| last);
    let stamp = DateTime::from_timestamp_millis(now_ms.max(prev + 1))
        .map(|t| t.with_timezone(&Local))
        .unwrap_or(now);
    format!(
        "feat/update-{}-{}",
        sanitize_name(skill_name),
        stamp.format("%Y%m%d-%H%M%S-%3f")
    )
}

pub fn commit_message(skill_name: &str) -> String {
    format!("feat({skill_name}): update skill content")
}

pub fn pr_title(skill_name: &str) -> String {
    format!("Update skill: {skill_name}")
}

pub fn pr_body(skill_name: &str, description: &str) -> String {
    format!(
        "This PR updates the skill '{skill_name}'.\n\nAutomatically generated by skli.\n\n{description}"
    )
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    /// PR/MR address printed by the provider CLI, or a link to open one.
    pub url: String,
    /// Whether the provider CLI actually opened the PR/MR.
    pub opened: bool,
    pub branch: String,
    pub target_branch: String,
    /// Folder in the target repository the skill was written to.
    pub remote_path: String,
}

/// Clone, branch, copy, commit, push, open PR.
#[derive(Debug, Clone)]
pub struct PublishFlow {
    git: GitCli,
    project_root: PathBuf,
    cli_timeout: Option<Duration>,
}

impl PublishFlow {
    pub fn new(git: GitCli, project_root: impl Into<PathBuf>) -> Self {
        Self {
            cli_timeout: git.timeout(),
            git,
            project_root: project_root.into(),
        }
    }

    /// Upload `skill`'s local directory to `target_url` on a fresh branch and
    /// open a PR/MR for it.
    ///
    /// Every step up to the push is a hard failure. Opening the PR/MR is best
    /// effort: without a usable provider CLI a link to open it is returned.
    pub async fn upload(&self, skill: &InstalledSkill, target_url: &str) -> Result<PullRequest> {
        let local_dir = self.project_root.join(&skill.local_path);
        if !local_dir.join(SKILL_FILE).is_file() {
            return Err(Error::InvalidSkillPath {
                path: local_dir,
                reason: format!("no {SKILL_FILE} found"),
            });
        }

        let target_url = target_url.trim();
        let repo = parse_repo_url(target_url);
        let checkout = tempfile::Builder::new().prefix("skli-pr-").tempdir()?;
        let dir = checkout.path();

        self.clone_full(&repo, dir).await?;

        let branch = branch_name(&skill.name);
        self.git.run(dir, &["checkout", "-b", &branch]).await?;

        let fallback_path = {
            let skills_dir = match repo.sub_path.as_str() {
                "" => DEFAULT_SKILLS_DIR,
                sub => sub,
            };
            format!("{skills_dir}/{}", skill.folder_name())
        };
        let (repo_dir, name) = (dir.to_path_buf(), skill.name.clone());
        let remote_path = tokio::task::spawn_blocking(move || {
            stage_skill(&repo_dir, &local_dir, &name, fallback_path)
        })
        .await??;
        debug!(skill = %skill.name, %remote_path, %branch, "publishing skill");

        self.git.run(dir, &["add", "."]).await?;
        self.ensure_staged_changes(dir).await?;
        self.git
            .run(dir, &["commit", "-m", &commit_message(&skill.name)])
            .await?;
        self.git.run(dir, &["push", "origin", &branch]).await?;
        info!(skill = %skill.name, repo = %repo.base_url, %branch, "pushed skill branch");

        let target_branch = if repo.branch == RepoReference::DEFAULT_BRANCH {
            self.default_branch(dir).await
        } else {
            repo.branch.clone()
        };

        let title = pr_title(&skill.name);
        let body = pr_body(&skill.name, &skill.description);
        let request = PrRequest {
            title: &title,
            body: &body,
            branch: &branch,
            target_branch: &target_branch,
        };
        let provider = HostingProvider::detect(target_url);
        let (url, opened) = match self.open_with_cli(provider, dir, &request).await {
            Some(url) => (url, true),
            None => (
                build_pr_url(provider, target_url, &branch, &target_branch, &title),
                false,
            ),
        };
        info!(skill = %skill.name, %url, opened, "upload finished");

        Ok(PullRequest {
            url,
            opened,
            branch,
            target_branch,
            remote_path,
        })
    }

    async fn clone_full(&self, repo: &RepoReference, dir: &Path) -> Result<()> {
        let mut args = vec!["clone"];
        if repo.branch != RepoReference::DEFAULT_BRANCH {
            args.extend(["--branch", repo.branch.as_str()]);
        }
        args.extend([repo.base_url.as_str(), "."]);
        self.git
            .run(dir, &args)
            .await
            .map(drop)
            .map_err(|e| Error::clone_failed(&repo.base_url, "clone", e))
    }

    async fn ensure_staged_changes(&self, dir: &Path) -> Result<()> {
        let output = self.git.output(dir, &["diff", "--staged", "--quiet"]).await?;
        match output.status.code() {
            Some(0) => Err(Error::NoChanges),
            Some(1) => Ok(()),
            _ => Err(Error::command_failed("git diff", combined_output(&output))),
        }
    }

    /// `origin/HEAD` of the clone, falling back to `main`.
    async fn default_branch(&self, dir: &Path) -> String {
        match self
            .git
            .run(dir, &["symbolic-ref", "--short", "refs/remotes/origin/HEAD"])
            .await
        {
            Ok(out) => {
                let name = out.trim();
                let name = name.strip_prefix("origin/").unwrap_or(name);
                if name.is_empty() {
                    FALLBACK_BASE_BRANCH.to_string()
                } else {
                    name.to_string()
                }
            },
            Err(e) => {
                debug!(error = %e, "could not resolve default branch");
                FALLBACK_BASE_BRANCH.to_string()
            },
        }
    }

    async fn open_with_cli(
        &self,
        provider: HostingProvider,
        dir: &Path,
        request: &PrRequest<'_>,
    ) -> Option<String> {
        let program = provider.cli()?;
        if which::which(program).is_err() {
            debug!(program, "provider CLI not installed");
            return None;
        }

        let mut cmd = Command::new(program);
        cmd.args(provider.cli_args(request)).current_dir(dir);
        let operation = format!("{program} create");
        match run_process(cmd, &operation, self.cli_timeout).await {
            Ok(output) if output.status.success() => {
                let text = combined_output(&output);
                let url = text
                    .lines()
                    .map(str::trim)
                    .rfind(|l| l.starts_with("https://") || l.starts_with("http://"))
                    .map(str::to_string)
                    .unwrap_or(text);
                Some(url)
            },
            Ok(output) => {
                warn!(program, output = %combined_output(&output), "PR creation failed, using fallback link");
                None
            },
            Err(e) => {
                warn!(program, error = %e, "PR creation failed, using fallback link");
                None
            },
        }
    }
}

/// Copy `local_dir` into the clone, over the folder already holding a skill
/// named `skill_name` or else at `fallback_path`. Returns the folder used.
fn stage_skill(
    repo_dir: &Path,
    local_dir: &Path,
    skill_name: &str,
    fallback_path: String,
) -> Result<String> {
    let remote_path = find_skill_in_repo(repo_dir, skill_name).unwrap_or(fallback_path);
    let dest = repo_dir.join(&remote_path);
    safe_delete_path(&dest, repo_dir)?;
    remove_dir_if_exists(&dest).map_err(|e| Error::copy(skill_name, e))?;
    copy_dir_all(local_dir, &dest).map_err(|e| Error::copy(skill_name, e))?;
    Ok(remote_path)
}

/// Folder (relative to `repo_dir`) of a `SKILL.md` declaring `skill_name`.
fn find_skill_in_repo(repo_dir: &Path, skill_name: &str) -> Option<String> {
    WalkDir::new(repo_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name() == SKILL_FILE)
        .find_map(|e| {
            let meta = parse::parse_file(e.path(), DISCOVERY_MAX_LINES).ok()?;
            if meta.name != skill_name {
                return None;
            }
            let rel = relative_slash_path(repo_dir, e.path().parent()?);
            (!rel.is_empty()).then_some(rel)
        })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::source::tests::{file_url, init_upstream},
    };

    fn test_git() -> GitCli {
        GitCli::new()
            .with_env("GIT_AUTHOR_NAME", "Test")
            .with_env("GIT_AUTHOR_EMAIL", "test@test.com")
            .with_env("GIT_COMMITTER_NAME", "Test")
            .with_env("GIT_COMMITTER_EMAIL", "test@test.com")
    }

    fn local_skill(project: &Path, folder: &str, name: &str, body: &str) -> InstalledSkill {
        let dir = project.join("skills").join(folder);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(SKILL_FILE),
            format!("---\nname: {name}\ndescription: {body}\n---\n"),
        )
        .unwrap();
        InstalledSkill {
            name: name.into(),
            description: body.into(),
            local_path: format!("skills/{folder}"),
            ..Default::default()
        }
    }

    async fn git_out(repo: &Path, args: &[&str]) -> String {
        let out = Command::new("git")
            .args(args)
            .current_dir(repo)
            .output()
            .await
            .unwrap();
        assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
        String::from_utf8_lossy(&out.stdout).into_owned()
    }

    #[test]
    fn provider_detection() {
        assert_eq!(HostingProvider::detect("git@github.com:o/r.git"), HostingProvider::GitHub);
        assert_eq!(HostingProvider::detect("https://GitLab.com/g/r"), HostingProvider::GitLab);
        assert_eq!(HostingProvider::detect("https://bitbucket.org/o/r"), HostingProvider::Bitbucket);
        assert_eq!(HostingProvider::detect("https://git.example.com/r"), HostingProvider::Unknown);
        assert_eq!(HostingProvider::Bitbucket.cli(), None);
    }

    #[test]
    fn fallback_urls_per_provider() {
        let branch = "feat/update-x-20260101-000000";
        assert_eq!(
            build_pr_url(HostingProvider::GitHub, "git@github.com:org/repo.git", branch, "main", "t"),
            "https://github.com/org/repo/compare/main...feat/update-x-20260101-000000?expand=1"
        );
        assert_eq!(
            build_pr_url(
                HostingProvider::GitLab,
                "https://gitlab.com/group/repo.git",
                branch,
                "main",
                "Update skill: X"
            ),
            "https://gitlab.com/group/repo/-/merge_requests/new?\
             merge_request%5Bsource_branch%5D=feat%2Fupdate-x-20260101-000000&\
             merge_request%5Btarget_branch%5D=main&\
             merge_request%5Btitle%5D=Update+skill%3A+X"
        );
        assert_eq!(
            build_pr_url(HostingProvider::Bitbucket, "https://bitbucket.org/o/r", "b", "dev", "t"),
            "https://bitbucket.org/o/r/pull-requests/new?dest=dev&source=b"
        );
        assert_eq!(
            build_pr_url(HostingProvider::Unknown, "ssh://git@git.example.com/o/r.git", "b", "m", "t"),
            "https://git.example.com/o/r"
        );
    }

    #[test]
    fn branch_names_are_unique_within_one_second() {
        let names: Vec<String> = (0..50).map(|_| branch_name("alpha")).collect();
        let mut deduped = names.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), names.len());
    }

    #[test]
    fn generated_texts() {
        let branch = branch_name("My Skill! 2");
        let stamp = branch.strip_prefix("feat/update-my-skill-2-").unwrap();
        assert_eq!(stamp.len(), "20260101-000000-000".len());
        assert_eq!(commit_message("alpha"), "feat(alpha): update skill content");
        assert_eq!(pr_title("alpha"), "Update skill: alpha");
        assert!(pr_body("alpha", "does things").ends_with("\n\ndoes things"));
    }

    #[tokio::test]
    async fn upload_updates_existing_skill_in_place() {
        let upstream = init_upstream().await;
        let project = tempfile::tempdir().unwrap();
        // Local folder name differs from the remote one; the declared name wins.
        let skill = local_skill(project.path(), "my-alpha", "Alpha", "Alpha, improved");
        let url = file_url(upstream.path());

        let pr = PublishFlow::new(test_git(), project.path())
            .upload(&skill, &url)
            .await
            .unwrap();
        assert_eq!(pr.remote_path, "skills/alpha");
        assert_eq!(pr.target_branch, "main");
        assert!(!pr.opened);
        assert_eq!(pr.url, normalize_repo_web_url(&url));
        assert!(pr.branch.starts_with("feat/update-alpha-"));

        let spec = format!("{}:skills/alpha/SKILL.md", pr.branch);
        let content = git_out(upstream.path(), &["show", &spec]).await;
        assert!(content.contains("Alpha, improved"));
        let subject = git_out(upstream.path(), &["log", "-1", "--format=%s", &pr.branch]).await;
        assert_eq!(subject.trim(), "feat(Alpha): update skill content");
    }

    #[tokio::test]
    async fn upload_new_skill_goes_to_skills_folder() {
        let upstream = init_upstream().await;
        let project = tempfile::tempdir().unwrap();
        let skill = local_skill(project.path(), "fresh", "Fresh Skill", "brand new");

        let pr = PublishFlow::new(test_git(), project.path())
            .upload(&skill, &file_url(upstream.path()))
            .await
            .unwrap();
        assert_eq!(pr.remote_path, "skills/fresh");
        let spec = format!("{}:skills/fresh/SKILL.md", pr.branch);
        let content = git_out(upstream.path(), &["show", &spec]).await;
        assert!(content.contains("name: Fresh Skill"));
    }

    #[tokio::test]
    async fn identical_content_is_no_changes() {
        let upstream = init_upstream().await;
        let project = tempfile::tempdir().unwrap();
        let dest = project.path().join("skills/alpha");
        copy_dir_all(&upstream.path().join("skills/alpha"), &dest).unwrap();
        let skill = InstalledSkill {
            name: "Alpha".into(),
            local_path: "skills/alpha".into(),
            ..Default::default()
        };

        let err = PublishFlow::new(test_git(), project.path())
            .upload(&skill, &file_url(upstream.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoChanges));
    }

    #[tokio::test]
    async fn unreachable_target_is_clone_error() {
        let project = tempfile::tempdir().unwrap();
        let skill = local_skill(project.path(), "a", "A", "x");
        let missing = project.path().join("no-such-repo");

        let err = PublishFlow::new(test_git(), project.path())
            .upload(&skill, &file_url(&missing))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Clone { step: "clone", .. }));
    }

    #[tokio::test]
    async fn missing_local_skill_is_rejected() {
        let project = tempfile::tempdir().unwrap();
        let skill = InstalledSkill {
            name: "ghost".into(),
            local_path: "skills/ghost".into(),
            ..Default::default()
        };
        let err = PublishFlow::new(test_git(), project.path())
            .upload(&skill, "https://github.com/org/repo")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSkillPath { .. }));
    }
}
