use std::{path::PathBuf, time::Duration};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    TomlDeserialize(#[from] toml::de::Error),
    #[error(transparent)]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("failed to execute `{operation}`: {source}")]
    CommandExecution {
        operation: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{operation}` failed: {output}")]
    CommandFailed { operation: String, output: String },
    #[error("`{operation}` timed out after {}s", .after.as_secs())]
    CommandTimeout { operation: String, after: Duration },
    #[error("could not clone {url} ({step}): {source}")]
    Clone {
        url: String,
        step: &'static str,
        #[source]
        source: Box<Error>,
    },
    #[error("could not query remote {url}: {reason}")]
    RemoteQuery { url: String, reason: String },
    #[error("no skills (SKILL.md files) found in {url} under '{sub_path}'")]
    NoSkillsFound { url: String, sub_path: String },
    #[error("could not copy skill '{skill}': {source}")]
    Copy {
        skill: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unsafe path to delete {}: {reason}", .path.display())]
    UnsafePath { path: PathBuf, reason: &'static str },
    #[error("skill not found: {name}")]
    NotFound { name: String },
    #[error("ambiguous name '{name}'. Matches: {}", .matches.join(", "))]
    AmbiguousName { name: String, matches: Vec<String> },
    #[error("no changes to upload (local content is identical to the remote)")]
    NoChanges,
    #[error("could not read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("empty skill name")]
    EmptyName,
    #[error("invalid skill path {}: {reason}", .path.display())]
    InvalidSkillPath { path: PathBuf, reason: String },
}

impl Error {
    #[must_use]
    pub fn command_execution(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandExecution {
            operation: operation.into(),
            source,
        }
    }

    #[must_use]
    pub fn command_failed(operation: impl Into<String>, output: impl Into<String>) -> Self {
        Self::CommandFailed {
            operation: operation.into(),
            output: output.into(),
        }
    }

    #[must_use]
    pub fn clone_failed(url: impl Into<String>, step: &'static str, source: Error) -> Self {
        Self::Clone {
            url: url.into(),
            step,
            source: Box::new(source),
        }
    }

    #[must_use]
    pub fn remote_query(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RemoteQuery {
            url: url.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn copy(skill: impl Into<String>, source: std::io::Error) -> Self {
        Self::Copy {
            skill: skill.into(),
            source,
        }
    }

    #[must_use]
    pub fn unsafe_path(path: impl Into<PathBuf>, reason: &'static str) -> Self {
        Self::UnsafePath {
            path: path.into(),
            reason,
        }
    }

    #[must_use]
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
