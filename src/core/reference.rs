use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use strum::{Display, EnumString};

/// Scheduler variable holding the index of the current array task.
pub const ARRAY_TASK_VAR: &str = "SLURM_ARRAY_TASK_ID";

/// How the upper bound of an array range is derived from the list size.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ArrayBound {
    /// `0-(N-1)`: one task per reference
    #[default]
    Exact,
    /// `0-N`: one extra task whose lookup resolves to an empty id
    Legacy,
}

/// Ordered reference identifiers (template file names without extensions).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceList {
    ids: Vec<String>,
}

impl ReferenceList {
    pub fn new(ids: Vec<String>) -> Self {
        Self { ids }
    }

    /// Lists `dir` and strips everything from the first `.` of each file name.
    /// Entries are sorted so array indices do not depend on directory order.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let entries = fs::read_dir(dir)
            .with_context(|| format!("Failed to list template directory '{}'", dir.display()))?;

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry
                .with_context(|| format!("Failed to read entry in '{}'", dir.display()))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let id = strip_extensions(&name);
            if id.is_empty() {
                tracing::debug!("Skipping hidden or nameless entry '{name}'");
                continue;
            }
            ids.push(id.to_string());
        }
        ids.sort();
        ids.dedup();

        tracing::debug!("Found {} reference(s) in {}", ids.len(), dir.display());
        Ok(Self { ids })
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.ids.get(index).map(String::as_str)
    }

    /// Value of the `--array` directive.
    pub fn array_range(&self, bound: ArrayBound) -> Result<String> {
        if self.ids.is_empty() {
            return Err(anyhow!("Cannot build an array job over an empty reference list"));
        }
        let upper = match bound {
            ArrayBound::Exact => self.ids.len() - 1,
            ArrayBound::Legacy => self.ids.len(),
        };
        Ok(format!("0-{upper}"))
    }

    /// Bash lines that resolve `$<var>` from the array task index at runtime.
    pub fn lookup_lines(&self, var: &str) -> Vec<String> {
        let ids = self
            .ids
            .iter()
            .map(|id| shell_escape::escape(id.as_str().into()).into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        vec![
            format!("templatelist=({ids})"),
            format!("{var}=${{templatelist[${ARRAY_TASK_VAR}]}}"),
        ]
    }
}

fn strip_extensions(name: &str) -> &str {
    name.split('.').next().unwrap_or_default()
}
