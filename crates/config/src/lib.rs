//! User preferences for skli.
//!
//! A single `config.toml` in the user config directory
//! (`~/.config/skli/` on Linux) remembers where skills are installed and which
//! remote repositories the user has added from before.

pub mod error;
pub mod loader;
pub mod schema;

pub use {
    error::{Error, Result},
    loader::{CONFIG_FILE, ConfigStore, config_dir, default_config_dir},
    schema::SkliConfig,
};
