use crate::cli::Commands;
use maspipe::config::Config;
use maspipe::core::stage::Stage;

mod completions;
mod render;
mod stage;
mod volumes;

pub async fn handle_commands(config: &Config, commands: Commands) -> anyhow::Result<()> {
    match commands {
        Commands::MaskPropagate(args) => {
            stage::handle_stage(config, Stage::MaskPropagation, args).await
        }
        Commands::MaskFuse(args) => stage::handle_stage(config, Stage::MaskFusion, args).await,
        Commands::LabelPropagate(args) => {
            stage::handle_stage(config, Stage::NonrigidPropagation, args).await
        }
        Commands::LabelFuse(args) => {
            stage::handle_stage(config, Stage::NonrigidFusion, args).await
        }
        Commands::Volumes(args) => volumes::handle_volumes(config, args).await,
        Commands::Render(args) => render::handle_render(config, args),
        Commands::Completions { shell } => completions::handle_completions(shell),
    }
}
