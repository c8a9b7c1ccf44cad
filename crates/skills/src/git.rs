use std::{
    path::Path,
    process::{Output, Stdio},
    time::Duration,
};

use {
    tokio::process::Command,
    tracing::{debug, warn},
};

use crate::error::{Error, Result};

/// Runs the `git` binary with an optional per-invocation timeout.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
    timeout: Option<Duration>,
    envs: Vec<(String, String)>,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            program: "git".to_string(),
            timeout: None,
            envs: Vec::new(),
        }
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill and fail any git process that runs longer than `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Extra environment for every invocation (e.g. commit identity).
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run `git <args>` in `dir`; non-zero exit becomes
    /// [`Error::CommandFailed`] carrying the combined output. Returns stdout.
    pub async fn run(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let operation = operation_name(&self.program, args);
        let output = self.output(dir, args).await?;
        if !output.status.success() {
            let combined = combined_output(&output);
            warn!(%operation, dir = %dir.display(), output = %combined, "git command failed");
            return Err(Error::command_failed(operation, combined));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run `git <args>` in `dir` and hand back the raw output, whatever the
    /// exit status. Used for probes where a non-zero exit is an answer.
    pub async fn output(&self, dir: &Path, args: &[&str]) -> Result<Output> {
        let operation = operation_name(&self.program, args);
        debug!(%operation, dir = %dir.display(), "running git");

        let mut cmd = Command::new(&self.program);
        cmd.args(args).current_dir(dir);
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        run_process(cmd, &operation, self.timeout).await
    }
}

/// Spawn `cmd` capturing stdout and stderr, honoring `timeout` when set.
pub async fn run_process(
    mut cmd: Command,
    operation: &str,
    timeout: Option<Duration>,
) -> Result<Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match timeout {
        Some(limit) => match tokio::time::timeout(limit, cmd.output()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%operation, secs = limit.as_secs(), "process timed out");
                return Err(Error::CommandTimeout {
                    operation: operation.to_string(),
                    after: limit,
                });
            },
        },
        None => cmd.output().await,
    };
    output.map_err(|e| Error::command_execution(operation, e))
}

/// stdout followed by stderr, trimmed.
pub fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text.trim().to_string()
}

fn operation_name(program: &str, args: &[&str]) -> String {
    match args.first() {
        Some(sub) => format!("{program} {sub}"),
        None => program.to_string(),
    }
}
