use crate::cli::VolumesArgs;
use anyhow::{bail, Context, Result};
use maspipe::config::Config;
use maspipe::core::process::ShellRunner;
use maspipe::core::volume::{load_structure_names, VolumeExtractor};
use owo_colors::OwoColorize;
use std::fs;

pub(crate) async fn handle_volumes(config: &Config, args: VolumesArgs) -> Result<()> {
    let targets: Vec<String> = match &args.targets_file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read targets file '{}'", path.display()))?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
        None => args.targets.clone(),
    };
    if targets.is_empty() {
        bail!("No targets given");
    }

    let structure_names = match &args.structures {
        Some(path) => Some(load_structure_names(path)?),
        None if !args.structure_names.is_empty() => Some(args.structure_names.clone()),
        None => None,
    };

    let extractor = VolumeExtractor {
        runner: ShellRunner::new(&config.pipeline.shell),
        stats_command: args
            .stats_command
            .clone()
            .unwrap_or_else(|| config.volume.stats_command.clone()),
        temp_dir: args
            .temp_dir
            .clone()
            .unwrap_or_else(|| args.label_dir.join("volume_tmp")),
        label_dir: args.label_dir.clone(),
        label_suffix: args
            .label_suffix
            .clone()
            .unwrap_or_else(|| config.volume.label_suffix.clone()),
        skip_existing: args.skip_existing,
    };

    let table = extractor
        .extract(&targets, &args.output, structure_names)
        .await?;
    println!(
        "Wrote {} row(s) to {}",
        table.rows.len().green(),
        args.output.display().cyan()
    );
    Ok(())
}
