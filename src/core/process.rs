use anyhow::{Context, Result};
use std::process::Stdio;
use tokio::process::Command;

/// Result of a finished child process. A non-zero exit is not an error here;
/// callers decide whether it is fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub command: String,
    /// `None` when the child was terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs composed command strings through a shell (`<shell> -c <command>`).
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
    envs: Vec<(String, String)>,
}

impl ShellRunner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            envs: vec![],
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    fn command(&self, command: &str) -> Command {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(command);
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        cmd
    }

    /// Blocks until the command finishes and captures its output.
    pub async fn run(&self, command: &str) -> Result<ProcessOutcome> {
        tracing::debug!("Running: {command}");
        let output = self
            .command(command)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to start '{}' for command: {command}", self.shell))?;

        let outcome = ProcessOutcome {
            command: command.to_string(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if !outcome.success() {
            tracing::warn!("Command exited with {:?}: {command}", outcome.code);
        }
        Ok(outcome)
    }

    /// Starts the command without waiting for it. Output goes to the
    /// inherited streams; the child is not killed when the handle drops.
    pub fn spawn(&self, command: &str) -> Result<Option<u32>> {
        tracing::debug!("Spawning: {command}");
        let child = self
            .command(command)
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to spawn '{}' for command: {command}", self.shell))?;
        Ok(child.id())
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new("bash")
    }
}
