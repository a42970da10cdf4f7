use anyhow::{bail, Result};
use clap::Parser;
use clap_complete::Shell;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use maspipe::config::Config;
use maspipe::core::directive::{Directive, ResourceRequest};
use maspipe::core::executor::ExecutionMode;
use maspipe::core::reference::ArrayBound;
use maspipe::core::script::EnvActivation;
use maspipe::core::stage::StageParams;
use maspipe::core::version;
use maspipe::utils::{parse_memory_limit, parse_time_directive};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "maspipe", author, version = version(), about = "Generates SLURM jobs for multi-atlas segmentation stages and runs them locally or on the cluster.")]
#[command(styles = maspipe::utils::STYLES)]
pub struct MasPipe {
    #[command(subcommand)]
    pub commands: Commands,

    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    #[arg(long, global = true, help = "Path to the config file")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Parser)]
pub enum Commands {
    /// Affine mask propagation, an array job over the atlas templates
    MaskPropagate(StageArgs),
    /// Fuse the propagated affine masks
    MaskFuse(StageArgs),
    /// Non-rigid label propagation, an array job over the atlas templates
    LabelPropagate(StageArgs),
    /// Fuse the propagated non-rigid labels
    LabelFuse(StageArgs),
    /// Extract label volumes of targets into a CSV table
    Volumes(VolumesArgs),
    /// Print or write SLURM job boilerplate
    Render(RenderArgs),
    /// Generate shell completion scripts
    Completions {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, clap::Args, Clone)]
pub struct ResourceArgs {
    /// Time limit (e.g. 3:00:00, 1-00:00:00)
    #[arg(long, value_parser = parse_time_directive)]
    pub time: Option<String>,

    /// Number of tasks
    #[arg(long)]
    pub ntasks: Option<u32>,

    /// SLURM account (defaults to $USER)
    #[arg(long)]
    pub account: Option<String>,

    /// Memory per node (e.g. 8000, 8G, 1024M)
    #[arg(long, value_parser = parse_memory_limit)]
    pub mem: Option<u64>,

    /// Extra sbatch directive, repeatable (e.g. -d mem_per_cpu=4000)
    #[arg(short = 'd', long = "directive", value_name = "KEY=VALUE")]
    pub directives: Vec<Directive>,

    /// Activate the configured conda environment in the job script
    #[arg(long)]
    pub conda: bool,

    /// Conda environment to activate (implies --conda)
    #[arg(long, value_name = "NAME")]
    pub conda_env: Option<String>,
}

impl ResourceArgs {
    /// CLI values take precedence over the configured request.
    pub fn apply(&self, base: &ResourceRequest) -> ResourceRequest {
        let mut request = base.clone();
        if let Some(time) = &self.time {
            request.time = time.clone();
        }
        if let Some(ntasks) = self.ntasks {
            request.ntasks = ntasks;
        }
        if self.account.is_some() {
            request.account = self.account.clone();
        }
        if let Some(mem) = self.mem {
            request.mem = mem;
        }
        request.directives.extend(self.directives.iter().cloned());
        request
    }

    pub fn env_activation(&self, config: &Config) -> Result<Option<EnvActivation>> {
        if !self.conda && self.conda_env.is_none() {
            return Ok(None);
        }
        let Some(env) = &config.environment else {
            bail!("Conda activation requested but no [environment] section is configured");
        };
        let mut env = env.clone();
        if let Some(name) = &self.conda_env {
            env.name = name.clone();
        }
        Ok(Some(env))
    }
}

#[derive(Debug, clap::Args)]
pub struct StageArgs {
    /// Directory holding the target images
    #[arg(long, short = 'T', value_hint = clap::ValueHint::DirPath)]
    pub target_dir: PathBuf,

    /// Target identifier
    #[arg(long, short = 't')]
    pub target_id: String,

    /// Atlas directory (with a template/ subdirectory)
    #[arg(long, short = 'A', value_hint = clap::ValueHint::DirPath)]
    pub atlas_dir: PathBuf,

    /// Result directory
    #[arg(long, short = 'r', value_hint = clap::ValueHint::DirPath)]
    pub result_dir: PathBuf,

    /// Target mask (non-rigid stages)
    #[arg(long, short = 'm', value_hint = clap::ValueHint::FilePath)]
    pub target_mask: Option<PathBuf>,

    /// File listing the atlases to fuse (label-fuse)
    #[arg(long, short = 'a', value_hint = clap::ValueHint::FilePath)]
    pub atlas_list: Option<PathBuf>,

    /// Execution mode: local or cluster (propagation stages default to cluster)
    #[arg(long)]
    pub mode: Option<ExecutionMode>,

    /// Local mode: spawn without waiting for completion
    #[arg(long)]
    pub parallel: bool,

    /// Print the composed command or job script
    #[arg(long)]
    pub print: bool,

    /// Cluster mode: submit the written script with sbatch
    #[arg(long)]
    pub submit: bool,

    /// Exit with an error when a process returns a non-zero status
    #[arg(long)]
    pub strict: bool,

    /// Where job scripts are written (overrides config)
    #[arg(long, value_hint = clap::ValueHint::DirPath)]
    pub job_dir: Option<PathBuf>,

    /// Location of MASHelperFunctions.sh (overrides config)
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    pub helper_script: Option<PathBuf>,

    /// Array range policy: exact (0..N-1) or legacy (0..N)
    #[arg(long)]
    pub array_bound: Option<ArrayBound>,

    #[command(flatten)]
    pub resources: ResourceArgs,
}

impl StageArgs {
    pub fn params(&self) -> StageParams {
        StageParams {
            target_dir: self.target_dir.clone(),
            target_id: self.target_id.clone(),
            atlas_dir: self.atlas_dir.clone(),
            result_dir: self.result_dir.clone(),
            target_mask: self.target_mask.clone(),
            atlas_list: self.atlas_list.clone(),
        }
    }
}

#[derive(Debug, clap::Args)]
pub struct VolumesArgs {
    /// Target identifiers, in output order
    #[arg(required_unless_present = "targets_file")]
    pub targets: Vec<String>,

    /// File with one target identifier per line
    #[arg(long, conflicts_with = "targets", value_hint = clap::ValueHint::FilePath)]
    pub targets_file: Option<PathBuf>,

    /// Directory holding <id><label-suffix> label files
    #[arg(long, value_hint = clap::ValueHint::DirPath)]
    pub label_dir: PathBuf,

    /// Aggregate CSV to write
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub output: PathBuf,

    /// Directory for per-target results (defaults to <label-dir>/volume_tmp)
    #[arg(long, value_hint = clap::ValueHint::DirPath)]
    pub temp_dir: Option<PathBuf>,

    /// File with one structure name per line, used as column headers
    #[arg(long, conflicts_with = "structure_names", value_hint = clap::ValueHint::FilePath)]
    pub structures: Option<PathBuf>,

    /// Comma-separated structure names, used as column headers
    #[arg(long, value_delimiter = ',')]
    pub structure_names: Vec<String>,

    /// Statistics command with {label} and optional {output} placeholders
    #[arg(long)]
    pub stats_command: Option<String>,

    /// Label file suffix (overrides config)
    #[arg(long)]
    pub label_suffix: Option<String>,

    /// Reuse per-target results that already exist
    #[arg(long)]
    pub skip_existing: bool,
}

#[derive(Debug, clap::Args)]
pub struct RenderArgs {
    /// Render a single-line sbatch command instead of a script header
    #[arg(long, conflicts_with_all = ["body", "output"])]
    pub single_line: bool,

    /// File whose lines are appended as the script body
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    pub body: Option<PathBuf>,

    /// Write the script here instead of printing it
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub resources: ResourceArgs,
}
