use crate::core::process::ShellRunner;
use crate::core::stage::quote_path;
use anyhow::{anyhow, bail, Context, Result};
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const LABEL_PLACEHOLDER: &str = "{label}";
pub const OUTPUT_PLACEHOLDER: &str = "{output}";
const ID_COLUMN: &str = "target_id";

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeRow {
    pub id: String,
    pub values: Vec<String>,
}

/// Aggregated volumes, one row per target in extraction order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VolumeTable {
    pub columns: Option<Vec<String>>,
    pub rows: Vec<VolumeRow>,
}

impl VolumeTable {
    /// Loads a header-less `id,v1,...,vn` aggregate file.
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .with_context(|| format!("Failed to open volume table '{}'", path.display()))?;

        let mut rows = Vec::new();
        for record in reader.records() {
            let record =
                record.with_context(|| format!("Malformed row in '{}'", path.display()))?;
            let mut fields = record.iter().map(str::to_string);
            let id = fields
                .next()
                .ok_or_else(|| anyhow!("Empty row in '{}'", path.display()))?;
            rows.push(VolumeRow {
                id,
                values: fields.collect(),
            });
        }
        Ok(Self {
            columns: None,
            rows,
        })
    }

    /// Attaches structure names as column headers.
    pub fn with_columns(mut self, names: Vec<String>) -> Result<Self> {
        if let Some(row) = self.rows.iter().find(|r| r.values.len() != names.len()) {
            bail!(
                "Target {} has {} volume(s) but {} structure name(s) were given",
                row.id,
                row.values.len(),
                names.len()
            );
        }
        self.columns = Some(names);
        Ok(self)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("Failed to write volume table '{}'", path.display()))?;
        if let Some(columns) = &self.columns {
            writer.write_record(std::iter::once(ID_COLUMN).chain(columns.iter().map(String::as_str)))?;
        }
        for row in &self.rows {
            writer.write_record(
                std::iter::once(row.id.as_str()).chain(row.values.iter().map(String::as_str)),
            )?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Reads structure names, one per line. Blank lines and `#` comments are ignored.
pub fn load_structure_names(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read structure names '{}'", path.display()))?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Runs a statistics tool per target label file and aggregates the volumes.
#[derive(Debug, Clone)]
pub struct VolumeExtractor {
    pub runner: ShellRunner,
    /// Command with `{label}` and optional `{output}` placeholders. Without
    /// `{output}` the tool's stdout is saved as the per-target result.
    pub stats_command: String,
    pub label_dir: PathBuf,
    pub label_suffix: String,
    pub temp_dir: PathBuf,
    /// Reuse per-target results that already exist
    pub skip_existing: bool,
}

impl VolumeExtractor {
    pub fn label_path(&self, id: &str) -> PathBuf {
        self.label_dir.join(format!("{id}{}", self.label_suffix))
    }

    pub fn temp_path(&self, id: &str) -> PathBuf {
        self.temp_dir.join(format!("{id}_volume.csv"))
    }

    pub async fn extract(
        &self,
        targets: &[String],
        aggregate: &Path,
        structure_names: Option<Vec<String>>,
    ) -> Result<VolumeTable> {
        match fs::remove_file(aggregate) {
            Ok(()) => tracing::debug!("Removed stale {}", aggregate.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to remove stale volume table '{}'", aggregate.display())
                })
            }
        }
        fs::create_dir_all(&self.temp_dir).with_context(|| {
            format!("Failed to create temp directory '{}'", self.temp_dir.display())
        })?;

        for id in targets {
            let temp = self.temp_path(id);
            if self.skip_existing && temp.is_file() {
                tracing::info!("{} exists, skipping ...", temp.display());
            } else {
                self.run_stats(id, &temp).await?;
            }

            let values = read_values(&temp)?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(aggregate)
                .with_context(|| format!("Failed to open '{}'", aggregate.display()))?;
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_writer(file);
            writer
                .write_record(std::iter::once(id.as_str()).chain(values.iter().map(String::as_str)))
                .with_context(|| format!("Failed to append {id} to '{}'", aggregate.display()))?;
            writer.flush()?;
        }

        let table = VolumeTable::load(aggregate)?;
        match structure_names {
            Some(names) => {
                let table = table.with_columns(names)?;
                table.write(aggregate)?;
                Ok(table)
            }
            None => Ok(table),
        }
    }

    async fn run_stats(&self, id: &str, temp: &Path) -> Result<()> {
        let writes_output = self.stats_command.contains(OUTPUT_PLACEHOLDER);
        let command = self
            .stats_command
            .replace(LABEL_PLACEHOLDER, &quote_path(&self.label_path(id)))
            .replace(OUTPUT_PLACEHOLDER, &quote_path(temp));

        let outcome = self.runner.run(&command).await?;
        if !outcome.success() {
            bail!(
                "Statistics command for {id} exited with {:?}: {}",
                outcome.code,
                outcome.stderr.trim()
            );
        }
        if !writes_output {
            fs::write(temp, &outcome.stdout)
                .with_context(|| format!("Failed to write '{}'", temp.display()))?;
        }
        Ok(())
    }
}

fn read_values(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read volume result '{}'", path.display()))?;
    let values: Vec<String> = contents
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect();

    if values.is_empty() {
        bail!("No volumes found in '{}'", path.display());
    }
    if let Some(bad) = values.iter().find(|v| v.parse::<f64>().is_err()) {
        bail!("Invalid volume '{bad}' in '{}'", path.display());
    }
    Ok(values)
}
