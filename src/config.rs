use crate::core::directive::ResourceRequest;
use crate::core::get_config_dir;
use crate::core::reference::ArrayBound;
use crate::core::script::EnvActivation;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Deserialize, Debug, Default, Clone)]
pub struct Config {
    /// Default SLURM resource request
    #[serde(default)]
    pub cluster: ResourceRequest,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Conda activation written into job scripts when requested
    #[serde(default)]
    pub environment: Option<EnvActivation>,
    #[serde(default)]
    pub volume: VolumeConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct PipelineConfig {
    /// Location of MASHelperFunctions.sh
    #[serde(default = "default_helper_script")]
    pub helper_script: PathBuf,
    /// Where cluster job scripts are written
    #[serde(default = "default_job_dir")]
    pub job_dir: PathBuf,
    /// Shell used for local runs and submission
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default)]
    pub array_bound: ArrayBound,
}

fn default_helper_script() -> PathBuf {
    PathBuf::from("../../MASHelperFunctions.sh")
}

fn default_job_dir() -> PathBuf {
    PathBuf::from("job")
}

fn default_shell() -> String {
    "bash".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            helper_script: default_helper_script(),
            job_dir: default_job_dir(),
            shell: default_shell(),
            array_bound: ArrayBound::default(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct VolumeConfig {
    /// Statistics command with `{label}` and optional `{output}` placeholders
    #[serde(default = "default_stats_command")]
    pub stats_command: String,
    #[serde(default = "default_label_suffix")]
    pub label_suffix: String,
}

fn default_stats_command() -> String {
    "seg_stats {label} -Vl {output}".to_string()
}

fn default_label_suffix() -> String {
    ".nii.gz".to_string()
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            stats_command: default_stats_command(),
            label_suffix: default_label_suffix(),
        }
    }
}

pub fn load_config(config_path: Option<&PathBuf>) -> Result<Config, config::ConfigError> {
    let mut config_vec = vec![];

    // Default config file
    if let Ok(default_config_path) = get_config_dir().map(|d| d.join("maspipe.toml")) {
        if default_config_path.exists() {
            config_vec.push(default_config_path);
        }
    }

    // User-provided config file
    if let Some(config_path) = config_path {
        if config_path.exists() {
            config_vec.push(config_path.clone());
        } else {
            return Err(config::ConfigError::NotFound(format!(
                "Config file {config_path:?} does not exist",
            )));
        }
    }

    let settings = config::Config::builder();
    let settings = config_vec.iter().fold(settings, |s, path| {
        s.add_source(config::File::from(path.as_path()))
    });

    settings
        .add_source(
            config::Environment::with_prefix("MASPIPE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}
