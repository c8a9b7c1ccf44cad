use {anyhow::Result, clap::Subcommand};

use crate::Context;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the config file location and its values.
    Get,
    /// Set the default skills directory.
    SetPath { path: String },
    /// Remember a remote repository URL.
    AddRemote { url: String },
}

pub fn handle_config(ctx: &Context, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Get => {
            let config = ctx.config.load()?;
            println!("Config file: {}", ctx.config.path().display());
            println!(
                "local_path:  {}",
                config.local_path.as_deref().unwrap_or("(default)")
            );
            println!("skills dir:  {}", ctx.skills_root.display());
            if config.remotes.is_empty() {
                println!("remotes:     (none)");
            } else {
                println!("remotes:");
                for remote in &config.remotes {
                    println!("  {remote}");
                }
            }
        },
        ConfigAction::SetPath { path } => {
            let path = path.trim().to_string();
            ctx.config.update(|c| c.local_path = Some(path.clone()))?;
            println!("Skills will be installed in {path}");
        },
        ConfigAction::AddRemote { url } => {
            if ctx.config.update(|c| c.add_remote(&url))? {
                println!("Added {url}");
            } else {
                println!("{url} is already known");
            }
        },
    }
    Ok(())
}
