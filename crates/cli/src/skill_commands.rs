use std::path::Path;

use {
    anyhow::{Result, bail},
    skli_skills::{
        InstalledSkill, PublishFlow, Selection, SkillSource, SyncEngine, SyncStatus, SyncSummary,
        add_from_url, parse_repo_url, source::skill_folder_name,
    },
};

use crate::Context;

pub async fn add(
    ctx: &Context,
    url: &str,
    sub_path: Option<&str>,
    names: Vec<String>,
    all: bool,
) -> Result<()> {
    let source = ctx.source();

    if names.is_empty() && !all {
        let scan = source.scan(&parse_repo_url(url), sub_path).await?;
        println!(
            "Skills in {} ({}, commit {}):",
            url.trim(),
            scan.sub_path,
            short_hash(&scan.commit_hash)
        );
        for skill in &scan.skills {
            println!("  {:<24} {}", skill_folder_name(skill), skill.description);
        }
        println!("\nInstall with --all or --skill <name>.");
        return Ok(());
    }

    let selection = if all {
        Selection::All
    } else {
        Selection::Named(names)
    };
    let registry = ctx.registry();
    let report = add_from_url(source.as_ref(), &registry, url, sub_path, &selection).await?;

    for skill in &report.installed {
        println!("Installed '{}' -> {}", skill.name, skill.local_path);
    }
    for (skill, err) in &report.failed {
        eprintln!("Failed '{}': {err}", skill.name);
    }

    if !report.installed.is_empty() {
        ctx.config.update(|c| c.add_remote(url))?;
    }
    if !report.failed.is_empty() {
        bail!("{} skill(s) could not be installed", report.failed.len());
    }
    Ok(())
}

pub fn list(ctx: &Context) -> Result<()> {
    let skills = ctx.registry().collect_all()?;
    if skills.is_empty() {
        println!("No skills installed in {}.", ctx.skills_root.display());
        return Ok(());
    }
    for listed in &skills {
        let skill = &listed.skill;
        let origin = if listed.managed {
            skill.origin_repo.as_str()
        } else {
            "local-only"
        };
        println!("  {:<24} {:<32} {origin}", skill.name, skill.local_path);
        if !skill.description.is_empty() {
            println!("  {:<24} {}", "", skill.description);
        }
    }
    Ok(())
}

pub fn remove(ctx: &Context, name: &str) -> Result<()> {
    let skill = ctx.registry().delete_by_name(name)?;
    println!("Removed '{}' ({})", skill.name, skill.local_path);
    Ok(())
}

pub async fn sync(ctx: &Context) -> Result<()> {
    let registry = ctx.registry();
    let engine =
        SyncEngine::new(ctx.source(), &registry).with_max_concurrency(ctx.max_concurrency);
    let outcomes = engine.sync_all().await?;
    if outcomes.is_empty() {
        println!("Nothing to sync.");
        return Ok(());
    }

    for outcome in &outcomes {
        match &outcome.status {
            SyncStatus::Updated => println!("  updated  {}", outcome.skill_name),
            SyncStatus::Skipped => println!("  current  {}", outcome.skill_name),
            SyncStatus::Error(reason) => {
                println!("  error    {}: {reason}", outcome.skill_name)
            },
        }
    }

    let summary = SyncSummary::from_outcomes(&outcomes);
    println!(
        "\n{} updated, {} already current, {} failed",
        summary.updated, summary.skipped, summary.errors
    );
    if summary.errors > 0 {
        bail!("{} skill(s) failed to sync", summary.errors);
    }
    Ok(())
}

pub async fn upload(ctx: &Context, skill_ref: &str, repo: Option<&str>) -> Result<()> {
    let registry = ctx.registry();
    let skill = local_skill(ctx, skill_ref)?;

    let target = match repo {
        Some(url) => url.to_string(),
        None if skill.is_managed() => skill.origin_repo.clone(),
        None => bail!("'{}' has no origin repository; pass one explicitly", skill.name),
    };

    let dir = registry.resolve_local(&skill.local_path);
    let skill = registry.prepare_local_for_upload(&dir)?;
    let pr = PublishFlow::new(ctx.git.clone(), &ctx.project_root)
        .upload(&skill, &target)
        .await?;

    println!("Pushed branch {} (base {})", pr.branch, pr.target_branch);
    if pr.opened {
        println!("Pull request: {}", pr.url);
    } else {
        println!("Open a pull request: {}", pr.url);
    }
    ctx.config.update(|c| c.add_remote(&target))?;
    Ok(())
}

/// A skill directory given on the command line, or a skill found by name.
fn local_skill(ctx: &Context, skill_ref: &str) -> Result<InstalledSkill> {
    let registry = ctx.registry();
    let as_path = Path::new(skill_ref);
    if as_path.is_dir() {
        return Ok(registry.prepare_local_for_upload(as_path)?);
    }
    Ok(registry.resolve_by_name(skill_ref)?)
}

fn short_hash(hash: &str) -> &str {
    hash.get(..7).unwrap_or(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_hash_truncates() {
        assert_eq!(short_hash("0123456789abcdef"), "0123456");
        assert_eq!(short_hash("abc"), "abc");
    }
}
