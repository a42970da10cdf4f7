pub mod directive;
pub mod executor;
pub mod process;
pub mod reference;
pub mod script;
pub mod stage;
pub mod volume;

use std::path::PathBuf;

const VERSION_MESSAGE: &str = env!("CARGO_PKG_VERSION");

pub fn version() -> &'static str {
    let author = clap::crate_authors!();

    Box::leak(Box::new(format!(
        "\
{VERSION_MESSAGE}
Authors: {author}"
    )))
}

pub fn get_config_dir() -> anyhow::Result<PathBuf> {
    dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Failed to get config directory"))
        .map(|p| p.join("maspipe"))
}

/// Name of the user invoking the tool, used when no SLURM account is given.
pub fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|user| !user.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
