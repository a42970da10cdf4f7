use crate::core::directive::{DirectiveSet, RenderStyle};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const SHEBANG: &str = "#!/bin/bash";

/// Conda activation block prepended to the command body.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct EnvActivation {
    /// Shell file that defines `conda_init`
    pub setup_script: PathBuf,
    /// Virtual environment to activate
    #[serde(default = "default_env_name")]
    pub name: String,
}

fn default_env_name() -> String {
    "base".to_string()
}

impl EnvActivation {
    pub fn new(setup_script: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            setup_script: setup_script.into(),
            name: name.into(),
        }
    }

    pub fn render(&self) -> String {
        format!(
            "## activate the virtual environment\n\
             source {setup}\n\
             conda_init > /dev/null 2>&1\n\
             conda deactivate > /dev/null 2>&1\n\
             conda activate {name} > /dev/null 2>&1\n\n",
            setup = self.setup_script.display(),
            name = self.name,
        )
    }
}

/// A job script: shebang, directives, optional env block, then the body.
///
/// Rendering is pure; [`JobScript::write_to`] is the only I/O.
#[derive(Debug, Default, Clone)]
pub struct JobScript {
    directives: DirectiveSet,
    env: Option<EnvActivation>,
    body: Vec<String>,
}

impl JobScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn directives(mut self, directives: DirectiveSet) -> Self {
        self.directives = directives;
        self
    }

    pub fn env(mut self, env: Option<EnvActivation>) -> Self {
        self.env = env;
        self
    }

    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.body.push(line.into());
        self
    }

    pub fn lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.body.extend(lines.into_iter().map(Into::into));
        self
    }

    pub fn get_directives(&self) -> &DirectiveSet {
        &self.directives
    }

    pub fn render_header(&self) -> String {
        let mut out = format!("{SHEBANG}\n");
        if !self.directives.is_empty() {
            out.push_str(&self.directives.render(RenderStyle::MultiLine));
        }
        if let Some(env) = &self.env {
            out.push_str(&env.render());
        }
        out
    }

    pub fn render(&self) -> String {
        let mut out = self.render_header();
        for line in &self.body {
            out.push_str(line);
            if !line.ends_with('\n') {
                out.push('\n');
            }
        }
        out
    }

    /// One-line `sbatch --k=v ... <script>` submission for a written script.
    pub fn submission_command(&self, script_path: &Path) -> String {
        format!(
            "{} {}",
            self.directives.render(RenderStyle::SingleLine),
            shell_escape::escape(script_path.to_string_lossy())
        )
    }

    /// Writes the script, truncating any previous file, and marks it executable.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        fs::write(path, self.render())
            .with_context(|| format!("Failed to write job script '{}'", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_mode(0o755);
            fs::set_permissions(path, perms)?;
        }

        tracing::debug!("Wrote job script {}", path.display());
        Ok(())
    }
}
