//! Directory-tree copying for installs, syncs and uploads.

use std::{io, path::Path};

use {tracing::warn, walkdir::WalkDir};

/// Recursively copy `src` into `dst`, creating `dst` as needed.
///
/// File and directory permission bits are carried over. Symlinks are skipped.
pub fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<()> {
    if !src.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} is not a directory", src.display()),
        ));
    }

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry.path().strip_prefix(src).map_err(io::Error::other)?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_symlink() {
            warn!(path = %entry.path().display(), "skipping symlink while copying skill");
            continue;
        }
        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
            let permissions = entry.metadata().map_err(io::Error::other)?.permissions();
            std::fs::set_permissions(&target, permissions)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Remove `path` and everything below it; a missing path is fine.
pub fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_nested_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir_all(src.join("scripts/deep")).unwrap();
        std::fs::write(src.join("SKILL.md"), "---\nname: a\n---\n").unwrap();
        std::fs::write(src.join("scripts/deep/run.sh"), "echo hi").unwrap();

        let dst = tmp.path().join("out/a");
        copy_dir_all(&src, &dst).unwrap();

        assert!(dst.join("SKILL.md").is_file());
        assert_eq!(
            std::fs::read_to_string(dst.join("scripts/deep/run.sh")).unwrap(),
            "echo hi"
        );
    }

    #[cfg(unix)]
    #[test]
    fn preserves_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        let script = src.join("run.sh");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let dst = tmp.path().join("dst");
        copy_dir_all(&src, &dst).unwrap();
        let mode = std::fs::metadata(dst.join("run.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn missing_source_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(copy_dir_all(&tmp.path().join("nope"), &tmp.path().join("dst")).is_err());
    }

    #[test]
    fn remove_missing_dir_is_ok() {
        let tmp = tempfile::tempdir().unwrap();
        remove_dir_if_exists(&tmp.path().join("nope")).unwrap();
    }
}
