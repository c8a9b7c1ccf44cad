use std::{
    collections::HashSet,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use {
    tracing::{debug, info},
    walkdir::WalkDir,
};

use crate::{
    SKILL_FILE,
    error::{Error, Result},
    fs::remove_dir_if_exists,
    lock::LockStore,
    parse::{self, DEFAULT_MAX_LINES},
    types::{InstalledSkill, ListedSkill},
};

/// Description given to skills found on disk but not recorded in the lock file.
pub const UNMANAGED_DESCRIPTION: &str = "Local skill (unmanaged)";

/// Check that `target` may be deleted: it must resolve to a path strictly
/// inside `skills_root`.
///
/// `.` and `..` are folded lexically, then symlinks along the existing part of
/// the path are resolved. The final component is kept as is, so a symlink
/// inside the skills root may itself be deleted.
pub fn safe_delete_path(target: &Path, skills_root: &Path) -> Result<()> {
    if target.as_os_str().is_empty() {
        return Err(Error::unsafe_path(target, "empty path"));
    }
    if skills_root.as_os_str().is_empty() {
        return Err(Error::unsafe_path(target, "empty skills root"));
    }
    let abs_target = normalize(target)?;
    let abs_root = normalize(skills_root)?;

    if abs_target.parent().is_none() {
        return Err(Error::unsafe_path(target, "refusing to delete the filesystem root"));
    }
    if abs_target == abs_root {
        return Err(Error::unsafe_path(target, "refusing to delete the skills root itself"));
    }
    if !abs_target.starts_with(&abs_root) {
        return Err(Error::unsafe_path(target, "path escapes the skills root"));
    }

    let resolved_root = resolve_existing(&abs_root);
    let resolved_target = match (abs_target.parent(), abs_target.file_name()) {
        (Some(parent), Some(name)) => resolve_existing(parent).join(name),
        _ => abs_target.clone(),
    };
    if resolved_target == resolved_root || !resolved_target.starts_with(&resolved_root) {
        return Err(Error::unsafe_path(target, "path escapes the skills root through a symlink"));
    }
    Ok(())
}

/// Canonicalize the longest existing prefix of `path` and re-attach the rest.
fn resolve_existing(path: &Path) -> PathBuf {
    for ancestor in path.ancestors() {
        let Ok(canonical) = std::fs::canonicalize(ancestor) else {
            continue;
        };
        return match path.strip_prefix(ancestor) {
            Ok(rest) if !rest.as_os_str().is_empty() => canonical.join(rest),
            _ => canonical,
        };
    }
    path.to_path_buf()
}

fn normalize(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {},
            Component::ParentDir => {
                out.pop();
            },
            other => out.push(other),
        }
    }
    Ok(out)
}

/// How `dir` is recorded as a lock-file `localPath`: relative to the project
/// root when inside it, `/`-separated; otherwise the absolute path.
pub fn local_path_for(project_root: &Path, dir: &Path) -> String {
    let (Ok(root), Ok(dir)) = (normalize(project_root), normalize(dir)) else {
        return dir.to_string_lossy().into_owned();
    };
    match dir.strip_prefix(&root) {
        Ok(rel) if !rel.as_os_str().is_empty() => rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        _ => dir.to_string_lossy().into_owned(),
    }
}

/// Installed skills as the union of the lock file and what is on disk.
#[derive(Debug, Clone)]
pub struct SkillRegistry {
    project_root: PathBuf,
    skills_root: PathBuf,
    lock: Arc<LockStore>,
}

impl SkillRegistry {
    pub fn new(
        project_root: impl Into<PathBuf>,
        skills_root: impl Into<PathBuf>,
        lock: Arc<LockStore>,
    ) -> Self {
        Self {
            project_root: project_root.into(),
            skills_root: skills_root.into(),
            lock,
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn skills_root(&self) -> &Path {
        &self.skills_root
    }

    pub fn lock(&self) -> &Arc<LockStore> {
        &self.lock
    }

    /// Filesystem location of a lock-file `localPath`.
    pub fn resolve_local(&self, local_path: &str) -> PathBuf {
        self.project_root.join(local_path)
    }

    /// Skills under the skills root that have no lock-file entry.
    pub fn scan_unmanaged(&self) -> Result<Vec<InstalledSkill>> {
        let managed = self.managed_dirs()?;
        let mut found = Vec::new();
        if !self.skills_root.is_dir() {
            return Ok(found);
        }
        let root = normalize(&self.skills_root)?;

        let walker = WalkDir::new(&self.skills_root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git");
        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() || entry.file_name() != SKILL_FILE {
                continue;
            }
            let Some(dir) = entry.path().parent() else {
                continue;
            };
            let abs = normalize(dir)?;
            if abs == root || managed.contains(&abs) {
                continue;
            }
            let name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            found.push(InstalledSkill {
                name,
                description: UNMANAGED_DESCRIPTION.to_string(),
                local_path: local_path_for(&self.project_root, dir),
                ..Default::default()
            });
        }
        debug!(count = found.len(), root = %self.skills_root.display(), "scanned unmanaged skills");
        Ok(found)
    }

    /// Lock-file entries followed by unmanaged local skills.
    pub fn collect_all(&self) -> Result<Vec<ListedSkill>> {
        let mut all: Vec<ListedSkill> = self
            .lock
            .list()?
            .into_iter()
            .map(|skill| ListedSkill {
                skill,
                managed: true,
            })
            .collect();
        all.extend(self.scan_unmanaged()?.into_iter().map(|skill| ListedSkill {
            skill,
            managed: false,
        }));
        Ok(all)
    }

    /// Find a skill by declared name or folder name, ignoring case.
    pub fn resolve_by_name(&self, name: &str) -> Result<InstalledSkill> {
        let wanted = name.trim().to_lowercase();
        if wanted.is_empty() {
            return Err(Error::EmptyName);
        }

        let mut seen = HashSet::new();
        let matches: Vec<InstalledSkill> = self
            .collect_all()?
            .into_iter()
            .map(|listed| listed.skill)
            .filter(|s| {
                s.name.to_lowercase() == wanted || s.folder_name().to_lowercase() == wanted
            })
            .filter(|s| seen.insert(s.local_path.clone()))
            .collect();

        match matches.len() {
            0 => Err(Error::NotFound {
                name: name.to_string(),
            }),
            1 => Ok(matches.into_iter().next().unwrap_or_default()),
            _ => Err(Error::AmbiguousName {
                name: name.to_string(),
                matches: matches.into_iter().map(|s| s.local_path).collect(),
            }),
        }
    }

    /// Remove a skill's directory, then its lock-file entry.
    ///
    /// The two steps are not atomic: if the second fails, the lock file keeps
    /// an entry whose directory is gone, which the next sync re-fetches.
    pub fn delete(&self, skill: &InstalledSkill) -> Result<()> {
        let dir = self.resolve_local(&skill.local_path);
        safe_delete_path(&dir, &self.skills_root)?;
        remove_dir_if_exists(&dir)?;
        self.lock.delete(&skill.local_path)?;
        info!(skill = %skill.name, path = %skill.local_path, "deleted skill");
        Ok(())
    }

    pub fn delete_by_name(&self, name: &str) -> Result<InstalledSkill> {
        let skill = self.resolve_by_name(name)?;
        self.delete(&skill)?;
        Ok(skill)
    }

    /// Build the record [`crate::publish::PublishFlow::upload`] needs from a
    /// local skill directory. Provenance is kept when the directory is already
    /// in the lock file.
    pub fn prepare_local_for_upload(&self, dir: &Path) -> Result<InstalledSkill> {
        if !dir.is_dir() {
            return Err(Error::InvalidSkillPath {
                path: dir.to_path_buf(),
                reason: "not a directory".into(),
            });
        }
        if !dir.join(SKILL_FILE).is_file() {
            return Err(Error::InvalidSkillPath {
                path: dir.to_path_buf(),
                reason: format!("no {SKILL_FILE} found"),
            });
        }

        let meta = parse::parse_dir(dir, DEFAULT_MAX_LINES)?;
        if meta.name.is_empty() {
            return Err(Error::EmptyName);
        }

        let local_path = local_path_for(&self.project_root, dir);
        let mut skill = self
            .lock
            .load()?
            .find(&local_path)
            .cloned()
            .unwrap_or_else(|| InstalledSkill {
                local_path: local_path.clone(),
                ..Default::default()
            });
        skill.name = meta.name;
        skill.description = meta.description;
        Ok(skill)
    }

    fn managed_dirs(&self) -> Result<HashSet<PathBuf>> {
        self.lock
            .list()?
            .iter()
            .map(|s| normalize(&self.resolve_local(&s.local_path)))
            .collect()
    }
}
