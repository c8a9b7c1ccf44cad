//! Skill sources and synchronization: URL resolution, sparse git discovery,
//! the `skli.lock` registry, hash-guarded sync and publishing back upstream.
//!
//! Skills are directories containing a `SKILL.md` file whose front-matter
//! carries at least a `name:` and a `description:`.

pub mod error;
pub mod fs;
pub mod git;
pub mod install;
pub mod lock;
pub mod parse;
pub mod publish;
pub mod registry;
pub mod repo_url;
pub mod source;
pub mod sync;
pub mod types;

pub use {
    error::{Error, Result},
    git::GitCli,
    install::{InstallReport, Selection, add_from_url},
    lock::LockStore,
    publish::{HostingProvider, PublishFlow, PullRequest},
    registry::SkillRegistry,
    repo_url::parse_repo_url,
    source::{GitSource, ScanResult, SkillSource},
    sync::SyncEngine,
    types::{
        InstalledSkill, ListedSkill, LockFile, RepoReference, SkillDescriptor, SyncOutcome,
        SyncStatus, SyncSummary,
    },
};

/// Name of the descriptor file that marks a skill directory.
pub const SKILL_FILE: &str = "SKILL.md";

/// Name of the project-local lock file.
pub const LOCK_FILE: &str = "skli.lock";

/// Conventional folder holding skills, both upstream and locally.
pub const DEFAULT_SKILLS_DIR: &str = "skills";
