use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{
    error::{Error, Result},
    schema::SkliConfig,
};

pub const CONFIG_FILE: &str = "config.toml";

/// Platform config directory for skli, e.g. `~/.config/skli`.
pub fn default_config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "skli").map(|d| d.config_dir().to_path_buf())
}

/// `override_dir` when given, else [`default_config_dir`].
pub fn config_dir(override_dir: Option<&Path>) -> Result<PathBuf> {
    match override_dir {
        Some(dir) => Ok(dir.to_path_buf()),
        None => default_config_dir().ok_or(Error::NoConfigDir),
    }
}

/// Reads and writes `config.toml` in one directory.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(CONFIG_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the config, returning defaults if the file does not exist.
    pub fn load(&self) -> Result<SkliConfig> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no config file, using defaults");
            return Ok(SkliConfig::default());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        toml::from_str(&raw).map_err(|source| Error::Parse {
            path: self.path.clone(),
            source,
        })
    }

    pub fn save(&self, config: &SkliConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, toml::to_string_pretty(config)?)?;
        debug!(path = %self.path.display(), "saved config");
        Ok(())
    }

    /// Load, apply `f`, save. Returns whatever `f` returns.
    pub fn update<R>(&self, f: impl FnOnce(&mut SkliConfig) -> R) -> Result<R> {
        let mut config = self.load()?;
        let result = f(&mut config);
        self.save(&config)?;
        Ok(result)
    }
}
