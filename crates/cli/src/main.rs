mod config_commands;
mod skill_commands;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use {
    clap::{Parser, Subcommand},
    skli_config::{ConfigStore, SkliConfig},
    skli_skills::{DEFAULT_SKILLS_DIR, GitCli, GitSource, LockStore, SkillRegistry},
    tracing::debug,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(
    name = "skli",
    version,
    about = "Install agent skills from git repositories, keep them in sync, send changes back"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Project directory holding skli.lock (defaults to the current directory).
    #[arg(long, global = true, env = "SKLI_PROJECT_DIR")]
    project_dir: Option<PathBuf>,

    /// Skills directory (overrides config `local_path`).
    #[arg(long, global = true, env = "SKLI_SKILLS_DIR")]
    skills_dir: Option<PathBuf>,

    /// Custom config directory (overrides default ~/.config/skli/).
    #[arg(long, global = true, env = "SKLI_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Kill any git/gh/glab process running longer than this many seconds.
    #[arg(long, global = true, env = "SKLI_GIT_TIMEOUT")]
    git_timeout: Option<u64>,

    /// Maximum number of repositories synchronized at once.
    #[arg(long, global = true, env = "SKLI_MAX_CONCURRENCY")]
    max_concurrency: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Install skills from a repository URL (clone or browse URL).
    Add {
        url: String,
        /// Folder inside the repository to scan (default: from the URL, else `skills`).
        #[arg(long)]
        path: Option<String>,
        /// Skill to install, by name or folder name. Repeatable.
        #[arg(short, long = "skill")]
        skills: Vec<String>,
        /// Install every skill found.
        #[arg(long, conflicts_with = "skills")]
        all: bool,
    },
    /// List installed and local-only skills.
    List,
    /// Remove a skill by name or folder name.
    Rm { name: String },
    /// Update every installed skill from its origin.
    Sync,
    /// Push a local skill to a repository and open a pull/merge request.
    Upload {
        /// Skill name, folder name or directory.
        skill: String,
        /// Target repository (defaults to the skill's origin).
        repo: Option<String>,
    },
    /// Preferences management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

/// Resolved locations and knobs shared by every command.
pub struct Context {
    pub project_root: PathBuf,
    pub skills_root: PathBuf,
    pub config: ConfigStore,
    pub git: GitCli,
    pub max_concurrency: Option<usize>,
}

impl Context {
    fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let project_root = match &cli.project_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };
        let config = ConfigStore::new(skli_config::config_dir(cli.config_dir.as_deref())?);
        let prefs = config.load()?;
        let skills_root = resolve_skills_root(&project_root, cli.skills_dir.as_deref(), &prefs);
        let git = GitCli::new().with_timeout(cli.git_timeout.map(Duration::from_secs));

        debug!(
            project = %project_root.display(),
            skills = %skills_root.display(),
            config = %config.path().display(),
            "resolved context"
        );
        Ok(Self {
            project_root,
            skills_root,
            config,
            git,
            max_concurrency: cli.max_concurrency,
        })
    }

    pub fn registry(&self) -> SkillRegistry {
        let lock = Arc::new(LockStore::new(LockStore::default_path(&self.project_root)));
        SkillRegistry::new(&self.project_root, &self.skills_root, lock)
    }

    pub fn source(&self) -> Arc<GitSource> {
        Arc::new(GitSource::new(self.git.clone()))
    }
}

fn resolve_skills_root(project_root: &Path, flag: Option<&Path>, prefs: &SkliConfig) -> PathBuf {
    match flag {
        Some(dir) => project_root.join(dir),
        None => prefs.skills_dir(project_root, DEFAULT_SKILLS_DIR),
    }
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    // stdout is for command output.
    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let ctx = Context::from_cli(&cli)?;
    match cli.command {
        Commands::Add {
            url,
            path,
            skills,
            all,
        } => skill_commands::add(&ctx, &url, path.as_deref(), skills, all).await,
        Commands::List => skill_commands::list(&ctx),
        Commands::Rm { name } => skill_commands::remove(&ctx, &name),
        Commands::Sync => skill_commands::sync(&ctx).await,
        Commands::Upload { skill, repo } => {
            skill_commands::upload(&ctx, &skill, repo.as_deref()).await
        },
        Commands::Config { action } => config_commands::handle_config(&ctx, action),
    }
}
