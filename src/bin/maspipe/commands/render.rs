use crate::cli::RenderArgs;
use anyhow::{Context, Result};
use maspipe::config::Config;
use maspipe::core::directive::RenderStyle;
use maspipe::core::script::JobScript;
use std::fs;

pub(crate) fn handle_render(config: &Config, args: RenderArgs) -> Result<()> {
    let request = args.resources.apply(&config.cluster);
    let directives = request.directives();

    if args.single_line {
        println!("{}", directives.render(RenderStyle::SingleLine));
        return Ok(());
    }

    let body: Vec<String> = match &args.body {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read script body '{}'", path.display()))?
            .lines()
            .map(str::to_string)
            .collect(),
        None => vec![],
    };

    let script = JobScript::new()
        .directives(directives)
        .env(args.resources.env_activation(config)?)
        .lines(body);

    match &args.output {
        Some(path) => {
            script.write_to(path)?;
            tracing::info!("Successfully wrote job script to {}", path.display());
        }
        None => print!("{}", script.render()),
    }
    Ok(())
}
