use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use crate::{
    SKILL_FILE,
    error::{Error, Result},
};

/// Line limit used when the caller does not pass one.
pub const DEFAULT_MAX_LINES: usize = 40;

/// Tighter limit used while scanning whole checkouts.
pub const DISCOVERY_MAX_LINES: usize = 20;

const DELIMITER: &str = "---";

/// Fields read from a `SKILL.md` front-matter block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkillMeta {
    pub name: String,
    pub description: String,
}

/// Read `name:` and `description:` from the front-matter of `skill_file`.
///
/// Only the first `max_lines` lines are looked at (`0` means
/// [`DEFAULT_MAX_LINES`]). A file without front-matter yields empty metadata.
pub fn parse_file(skill_file: &Path, max_lines: usize) -> Result<SkillMeta> {
    let max_lines = if max_lines == 0 {
        DEFAULT_MAX_LINES
    } else {
        max_lines
    };
    let file = File::open(skill_file).map_err(|e| Error::read(skill_file, e))?;

    let mut meta = SkillMeta::default();
    let mut in_frontmatter = false;

    for line in BufReader::new(file).lines().take(max_lines) {
        let line = line.map_err(|e| Error::read(skill_file, e))?;

        if line.trim() == DELIMITER {
            if in_frontmatter {
                break;
            }
            in_frontmatter = true;
            continue;
        }
        if !in_frontmatter {
            continue;
        }

        if let Some(value) = line.strip_prefix("name:") {
            meta.name = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("description:") {
            meta.description = value.trim().to_string();
        }
    }

    Ok(meta)
}

/// Like [`parse_file`] on `<skill_dir>/SKILL.md`, falling back to the
/// directory name when the descriptor has no `name:`.
pub fn parse_dir(skill_dir: &Path, max_lines: usize) -> Result<SkillMeta> {
    let mut meta = parse_file(&skill_dir.join(SKILL_FILE), max_lines)?;
    if meta.name.is_empty()
        && let Some(dir_name) = skill_dir.file_name()
    {
        meta.name = dir_name.to_string_lossy().into_owned();
    }
    Ok(meta)
}
