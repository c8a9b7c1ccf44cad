use std::{
    fs::OpenOptions,
    path::{Path, PathBuf},
    sync::Mutex,
};

use {chrono::Utc, fd_lock::RwLock, tracing::debug};

use crate::{
    LOCK_FILE,
    error::Result,
    types::{InstalledSkill, LockFile},
};

/// `skli.lock` on disk.
///
/// Every mutation is a read-modify-write persisted through a temp file +
/// rename. Writers are serialized by a mutex within the process and by an
/// exclusive lock on `skli.lock.guard` across processes.
#[derive(Debug)]
pub struct LockStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl LockStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// `<project_root>/skli.lock`.
    pub fn default_path(project_root: &Path) -> PathBuf {
        project_root.join(LOCK_FILE)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the lock file, returning an empty one if it does not exist yet.
    pub fn load(&self) -> Result<LockFile> {
        if !self.path.exists() {
            return Ok(LockFile::default());
        }
        let data = std::fs::read_to_string(&self.path)?;
        Ok(toml::from_str(&data)?)
    }

    /// Persist `lock`, stamping `last_updated`.
    pub fn save(&self, lock: &mut LockFile) -> Result<()> {
        self.exclusive(|| self.write(lock))
    }

    /// Insert or replace the entry with the same `local_path`.
    pub fn upsert(&self, skill: InstalledSkill) -> Result<()> {
        self.modify(|lock| {
            debug!(name = %skill.name, path = %skill.local_path, "lock upsert");
            lock.upsert(skill, Utc::now());
        })
    }

    /// Drop the entry for `local_path`; absent entries are not an error.
    pub fn delete(&self, local_path: &str) -> Result<()> {
        self.modify(|lock| {
            if lock.remove(local_path) {
                debug!(path = %local_path, "lock delete");
            }
        })
    }

    pub fn list(&self) -> Result<Vec<InstalledSkill>> {
        Ok(self.load()?.skills)
    }

    pub fn group_by_origin_repo(&self) -> Result<Vec<(String, Vec<InstalledSkill>)>> {
        Ok(self.load()?.group_by_origin_repo())
    }

    fn modify(&self, f: impl FnOnce(&mut LockFile)) -> Result<()> {
        self.exclusive(|| {
            let mut lock = self.load()?;
            f(&mut lock);
            self.write(&mut lock)
        })
    }

    /// Sidecar file holding the cross-process lock. The lock file itself is
    /// replaced on every write, so it cannot carry the lock.
    fn guard_path(&self) -> PathBuf {
        self.path.with_extension("lock.guard")
    }

    fn exclusive<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.guard_path())?;
        let mut file_lock = RwLock::new(file);
        let _held = file_lock.write()?;
        f()
    }

    fn write(&self, lock: &mut LockFile) -> Result<()> {
        lock.last_updated = Some(Utc::now());
        let tmp = self.path.with_extension("lock.tmp");
        let data = toml::to_string_pretty(lock)?;
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::error::Error, std::sync::Arc};

    fn skill(name: &str, path: &str) -> InstalledSkill {
        InstalledSkill {
            name: name.into(),
            description: format!("{name} description"),
            local_path: path.into(),
            origin_repo: "https://github.com/org/repo/tree/main/skills".into(),
            origin_root: "skills".into(),
            origin_relative_path: name.into(),
            commit_hash: Some("abc123".into()),
            ..Default::default()
        }
    }

    #[test]
    fn load_missing_returns_default() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LockStore::new(LockStore::default_path(tmp.path()));
        let lock = store.load().unwrap();
        assert!(lock.skills.is_empty());
        assert!(lock.last_updated.is_none());
    }

    #[test]
    fn upsert_roundtrip_and_timestamps() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LockStore::new(tmp.path().join("skli.lock"));
        store.upsert(skill("alpha", "skills/alpha")).unwrap();

        let lock = store.load().unwrap();
        assert!(lock.last_updated.is_some());
        let got = lock.find("skills/alpha").unwrap();
        assert_eq!(got.origin_relative_path, "alpha");
        assert_eq!(got.commit_hash.as_deref(), Some("abc123"));
        let installed_at = got.installed_at.unwrap();

        let mut changed = skill("alpha", "skills/alpha");
        changed.commit_hash = Some("def456".into());
        store.upsert(changed).unwrap();

        let got = store.load().unwrap().skills;
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].installed_at, Some(installed_at));
        assert!(got[0].updated_at.unwrap() > installed_at);
        assert!(!tmp.path().join("skli.lock.tmp").exists());
    }

    #[test]
    fn file_uses_camel_case_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LockStore::new(tmp.path().join("skli.lock"));
        store.upsert(skill("alpha", "skills/alpha")).unwrap();
        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(text.contains("localPath = \"skills/alpha\""));
        assert!(text.contains("originRepo"));
        assert!(text.contains("lastUpdated"));
    }

    #[test]
    fn delete_absent_entry_is_ok() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LockStore::new(tmp.path().join("skli.lock"));
        store.delete("skills/none").unwrap();
        store.upsert(skill("a", "skills/a")).unwrap();
        store.delete("skills/a").unwrap();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("skli.lock");
        std::fs::write(&path, "skills = 12 [[[").unwrap();
        let err = LockStore::new(path).load().unwrap_err();
        assert!(matches!(err, Error::TomlDeserialize(_)));
    }

    #[test]
    fn concurrent_upserts_are_all_kept() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(LockStore::new(tmp.path().join("skli.lock")));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store.upsert(skill(&format!("s{i}"), &format!("skills/s{i}"))).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.list().unwrap().len(), 8);
    }

    #[test]
    fn separate_stores_on_one_file_do_not_lose_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("skli.lock");
        let handles: Vec<_> = (0..8)
            .map(|i| {
                // Each thread has its own store, like separate processes would.
                let store = LockStore::new(&path);
                std::thread::spawn(move || {
                    store.upsert(skill(&format!("s{i}"), &format!("skills/s{i}"))).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(LockStore::new(&path).list().unwrap().len(), 8);
        assert!(tmp.path().join("skli.lock.guard").is_file());
    }

    #[test]
    fn group_by_origin_repo_reads_from_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LockStore::new(tmp.path().join("skli.lock"));
        store.upsert(skill("a", "skills/a")).unwrap();
        let mut other = skill("b", "skills/b");
        other.origin_repo = "git@github.com:org/other.git".into();
        store.upsert(other).unwrap();
        store.upsert(skill("c", "skills/c")).unwrap();

        let groups = store.group_by_origin_repo().unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, "git@github.com:org/other.git");
    }
}
