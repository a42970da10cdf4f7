use crate::core::directive::ResourceRequest;
use crate::core::process::{ProcessOutcome, ShellRunner};
use crate::core::reference::{ArrayBound, ARRAY_TASK_VAR};
use crate::core::script::{EnvActivation, JobScript};
use crate::core::stage::StageJob;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use strum::{Display, EnumString};

const LOG_DIR: &str = "log";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExecutionMode {
    /// Run the command now as a child process
    #[default]
    Local,
    /// Write a job script for the cluster scheduler
    Cluster,
}

/// A job script written to disk.
#[derive(Debug, Clone)]
pub struct WrittenScript {
    pub path: PathBuf,
    pub contents: String,
    /// Single-line `sbatch` command that submits the script
    pub submission: String,
}

#[derive(Debug, Clone)]
pub enum Dispatch {
    /// Local blocking run, one outcome per process
    Completed(Vec<ProcessOutcome>),
    /// Local fire-and-forget run, pids of the spawned children
    Spawned(Vec<u32>),
    Written(WrittenScript),
    Submitted(WrittenScript, ProcessOutcome),
}

impl Dispatch {
    /// Process outcomes with a non-zero or missing exit code.
    pub fn failures(&self) -> Vec<&ProcessOutcome> {
        match self {
            Dispatch::Completed(outcomes) => outcomes.iter().filter(|o| !o.success()).collect(),
            Dispatch::Submitted(_, outcome) if !outcome.success() => vec![outcome],
            _ => vec![],
        }
    }
}

#[allow(async_fn_in_trait)]
pub trait Executor {
    async fn execute(&self, job: &StageJob) -> Result<Dispatch>;
}

/// Runs stage commands on this machine. Array stages run once per reference
/// with the array task variable set, so the script's lookup works unchanged.
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor {
    pub runner: ShellRunner,
    pub parallel: bool,
}

impl Executor for LocalExecutor {
    async fn execute(&self, job: &StageJob) -> Result<Dispatch> {
        let command = job.command_line();
        let runners: Vec<ShellRunner> = match &job.references {
            Some(refs) => (0..refs.len())
                .map(|i| self.runner.clone().env(ARRAY_TASK_VAR, i.to_string()))
                .collect(),
            None => vec![self.runner.clone()],
        };

        if self.parallel {
            let mut pids = Vec::with_capacity(runners.len());
            for runner in &runners {
                if let Some(pid) = runner.spawn(&command)? {
                    pids.push(pid);
                }
            }
            tracing::info!(
                "Spawned {} process(es) for {} of {}",
                pids.len(),
                job.stage,
                job.target_id
            );
            return Ok(Dispatch::Spawned(pids));
        }

        let mut outcomes = Vec::with_capacity(runners.len());
        for runner in &runners {
            let outcome = runner.run(&command).await?;
            tracing::info!("returned value: {:?}", outcome.code);
            outcomes.push(outcome);
        }
        Ok(Dispatch::Completed(outcomes))
    }
}

/// Writes stage jobs as SLURM scripts under `job_dir`, optionally submitting them.
#[derive(Debug, Clone)]
pub struct ClusterExecutor {
    pub job_dir: PathBuf,
    pub resources: ResourceRequest,
    pub env: Option<EnvActivation>,
    pub array_bound: ArrayBound,
    pub submit: bool,
    pub runner: ShellRunner,
}

impl ClusterExecutor {
    pub fn new(job_dir: impl Into<PathBuf>, resources: ResourceRequest) -> Self {
        Self {
            job_dir: job_dir.into(),
            resources,
            env: None,
            array_bound: ArrayBound::default(),
            submit: false,
            runner: ShellRunner::default(),
        }
    }

    /// Directives are the resource defaults, then `array`, then the caller's
    /// extras, then the log paths. Extras override the generated `array`, and
    /// a caller-supplied `output` or `error` is kept; both cases are logged.
    pub fn script_for(&self, job: &StageJob) -> Result<JobScript> {
        let mut directives = self.resources.default_directives();
        let log_stem = self
            .job_dir
            .join(LOG_DIR)
            .join(format!("{}_{}", job.target_id, job.stage.tag()));
        let log_stem = log_stem.display();

        let log_suffix = match &job.references {
            Some(refs) => {
                directives.set("array", refs.array_range(self.array_bound)?);
                "%A_%a"
            }
            None => "%j",
        };

        for extra in &self.resources.directives {
            if extra.option() == "array" {
                if let Some(generated) = directives.get("array") {
                    tracing::warn!(
                        "Directive --array={} replaces the generated range {generated}",
                        extra.value
                    );
                }
            }
            directives.insert(extra.clone());
        }

        for (name, ext) in [("output", "out"), ("error", "err")] {
            let generated = format!("{log_stem}_{log_suffix}.{ext}");
            match directives.get(name).map(str::to_string) {
                Some(given) => tracing::warn!(
                    "Keeping --{name}={given} for {} of {}; default log path {generated} not used",
                    job.stage,
                    job.target_id
                ),
                None => directives.set(name, generated),
            }
        }

        Ok(JobScript::new()
            .directives(directives)
            .env(self.env.clone())
            .lines(job.script_lines()))
    }
}

impl Executor for ClusterExecutor {
    async fn execute(&self, job: &StageJob) -> Result<Dispatch> {
        let log_dir = self.job_dir.join(LOG_DIR);
        fs::create_dir_all(&log_dir)
            .with_context(|| format!("Failed to create job directory '{}'", log_dir.display()))?;

        let script = self.script_for(job)?;
        let path = self.job_dir.join(job.stage.job_file_name(&job.target_id));
        script.write_to(&path)?;
        tracing::info!("Wrote {} job for {} to {}", job.stage, job.target_id, path.display());

        let written = WrittenScript {
            submission: script.submission_command(&path),
            contents: script.render(),
            path,
        };

        if self.submit {
            let outcome = self.runner.run(&written.submission).await?;
            if outcome.success() {
                tracing::info!("{}", outcome.stdout.trim());
            }
            return Ok(Dispatch::Submitted(written, outcome));
        }
        Ok(Dispatch::Written(written))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::directive::Directive;
    use crate::core::reference::ReferenceList;
    use crate::core::stage::{Stage, StageParams};
    use std::path::Path;
    use tempfile::tempdir;

    fn resources() -> ResourceRequest {
        ResourceRequest {
            account: Some("acct".to_string()),
            ..Default::default()
        }
    }

    fn params() -> StageParams {
        StageParams {
            target_dir: PathBuf::from("/data/target"),
            target_id: "T01".to_string(),
            atlas_dir: PathBuf::from("/data/atlas"),
            result_dir: PathBuf::from("/data/result"),
            ..Default::default()
        }
    }

    fn array_job(helper: &Path) -> StageJob {
        StageJob::with_references(
            Stage::MaskPropagation,
            &params(),
            helper,
            Some(ReferenceList::new(vec!["A01".into(), "A02".into(), "A03".into()])),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn cluster_writes_array_script() {
        let dir = tempdir().unwrap();
        let job_dir = dir.path().join("job");
        let executor = ClusterExecutor::new(&job_dir, resources());

        let dispatch = executor.execute(&array_job(Path::new("h.sh"))).await.unwrap();
        let Dispatch::Written(written) = dispatch else {
            panic!("expected a written script");
        };

        assert_eq!(written.path, job_dir.join("T01_affine_mask.sh"));
        assert!(job_dir.join("log").is_dir());
        let contents = fs::read_to_string(&written.path).unwrap();
        assert_eq!(contents, written.contents);
        assert!(contents.starts_with(
            "#!/bin/bash\n#SBATCH --time=3:00:00\n#SBATCH --ntasks=1\n#SBATCH --account=acct\n#SBATCH --mem=8000\n#SBATCH --array=0-2\n"
        ));
        assert!(contents.contains("_affine_mask_%A_%a.out\n"));
        assert!(contents.contains("templatelist=(A01 A02 A03)\n"));
        assert!(contents.ends_with("-a $atlas_id -r /data/result\n"));
        assert!(written.submission.starts_with("sbatch --time=3:00:00"));
        assert!(written.submission.ends_with("T01_affine_mask.sh"));
    }

    #[tokio::test]
    async fn cluster_places_array_before_extras_and_keeps_user_logs() {
        let dir = tempdir().unwrap();
        let resources = resources()
            .directive(Directive::new("partition", "gpu"))
            .directive(Directive::new("output", "/logs/custom.out"));
        let executor = ClusterExecutor::new(dir.path(), resources);
        let script = executor.script_for(&array_job(Path::new("h.sh"))).unwrap();
        let options: Vec<String> = script.get_directives().iter().map(Directive::option).collect();

        assert_eq!(
            options,
            vec!["time", "ntasks", "account", "mem", "array", "partition", "output", "error"]
        );
        assert_eq!(script.get_directives().get("output"), Some("/logs/custom.out"));
        assert!(script
            .get_directives()
            .get("error")
            .unwrap()
            .ends_with("T01_affine_mask_%A_%a.err"));
    }

    #[tokio::test]
    async fn cluster_user_array_overrides_generated_range() {
        let dir = tempdir().unwrap();
        let resources = resources().directive(Directive::new("array", "0-2%1"));
        let executor = ClusterExecutor::new(dir.path(), resources);
        let script = executor.script_for(&array_job(Path::new("h.sh"))).unwrap();
        let rendered = script.render();
        assert_eq!(rendered.matches("--array=").count(), 1);
        assert!(rendered.contains("#SBATCH --mem=8000\n#SBATCH --array=0-2%1\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cluster_submits_from_job_dir_with_spaces() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let bin = dir.path().join("bin");
        fs::create_dir(&bin).unwrap();
        let sbatch = bin.join("sbatch");
        fs::write(&sbatch, "#!/bin/sh\nfor arg in \"$@\"; do echo \"[$arg]\"; done\n").unwrap();
        fs::set_permissions(&sbatch, fs::Permissions::from_mode(0o755)).unwrap();
        let path = format!(
            "{}:{}",
            bin.display(),
            std::env::var("PATH").unwrap_or_default()
        );

        let job_dir = dir.path().join("my jobs");
        let mut executor = ClusterExecutor::new(
            &job_dir,
            resources().directive(Directive::new("comment", "two words")),
        );
        executor.submit = true;
        executor.runner = ShellRunner::new("sh").env("PATH", path);

        let dispatch = executor.execute(&array_job(Path::new("h.sh"))).await.unwrap();
        let Dispatch::Submitted(written, outcome) = dispatch else {
            panic!("expected a submitted script");
        };
        assert!(outcome.success(), "{}", outcome.stderr);

        let args: Vec<&str> = outcome.stdout.lines().collect();
        let log_stem = job_dir.join("log").join("T01_affine_mask");
        assert_eq!(args.len(), 9);
        assert_eq!(args[4], "[--array=0-2]");
        assert_eq!(args[5], "[--comment=two words]");
        assert_eq!(
            args[6],
            format!("[--output={}_%A_%a.out]", log_stem.display())
        );
        assert_eq!(args[8], format!("[{}]", written.path.display()));

        let contents = fs::read_to_string(&written.path).unwrap();
        assert!(contents.contains(&format!(
            "#SBATCH '--error={}_%A_%a.err'\n",
            log_stem.display()
        )));
    }

    #[tokio::test]
    async fn cluster_legacy_bound_keeps_extra_task() {
        let dir = tempdir().unwrap();
        let mut executor = ClusterExecutor::new(dir.path(), resources());
        executor.array_bound = ArrayBound::Legacy;
        let script = executor.script_for(&array_job(Path::new("h.sh"))).unwrap();
        assert_eq!(script.get_directives().get("array"), Some("0-3"));
    }

    #[tokio::test]
    async fn cluster_rerun_overwrites_and_tolerates_existing_dir() {
        let dir = tempdir().unwrap();
        let job = StageJob::with_references(Stage::MaskFusion, &params(), Path::new("h.sh"), None)
            .unwrap();

        let executor = ClusterExecutor::new(dir.path(), resources());
        executor.execute(&job).await.unwrap();
        let dispatch = executor.execute(&job).await.unwrap();
        let Dispatch::Written(written) = dispatch else {
            panic!("expected a written script");
        };
        let contents = fs::read_to_string(&written.path).unwrap();
        assert_eq!(contents.matches("#!/bin/bash").count(), 1);
        assert!(contents.contains("_mask_labelfusion_%j.err\n"));
        assert!(!contents.contains("--array"));
    }

    #[tokio::test]
    async fn cluster_includes_env_activation() {
        let dir = tempdir().unwrap();
        let mut executor = ClusterExecutor::new(dir.path(), resources());
        executor.env = Some(EnvActivation::new("/opt/conda.sh", "fastai"));
        let job = StageJob::with_references(Stage::MaskFusion, &params(), Path::new("h.sh"), None)
            .unwrap();
        let script = executor.script_for(&job).unwrap().render();
        let env_at = script.find("conda activate fastai").unwrap();
        let cmd_at = script.find("mas_masking_fusion").unwrap();
        assert!(env_at < cmd_at);
    }

    #[tokio::test]
    async fn local_reports_exit_status_without_error() {
        let dir = tempdir().unwrap();
        let helper = dir.path().join("helper.sh");
        fs::write(&helper, "mas_masking_fusion() { exit 7; }\n").unwrap();

        let job = StageJob::with_references(Stage::MaskFusion, &params(), &helper, None).unwrap();
        let executor = LocalExecutor {
            runner: ShellRunner::new("bash"),
            parallel: false,
        };
        let dispatch = executor.execute(&job).await.unwrap();
        let Dispatch::Completed(outcomes) = &dispatch else {
            panic!("expected completed outcomes");
        };
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].code, Some(7));
        assert_eq!(dispatch.failures().len(), 1);
    }

    #[tokio::test]
    async fn local_array_runs_each_reference() {
        let dir = tempdir().unwrap();
        let helper = dir.path().join("helper.sh");
        fs::write(&helper, "mas_masking() { echo \"$8\"; }\n").unwrap();

        let executor = LocalExecutor {
            runner: ShellRunner::new("bash"),
            parallel: false,
        };
        let dispatch = executor.execute(&array_job(&helper)).await.unwrap();
        let Dispatch::Completed(outcomes) = dispatch else {
            panic!("expected completed outcomes");
        };
        let atlases: Vec<_> = outcomes.iter().map(|o| o.stdout.trim().to_string()).collect();
        assert_eq!(atlases, vec!["A01", "A02", "A03"]);
    }

    #[tokio::test]
    async fn local_parallel_spawns_without_waiting() {
        let dir = tempdir().unwrap();
        let helper = dir.path().join("helper.sh");
        fs::write(&helper, "mas_masking() { :; }\n").unwrap();

        let executor = LocalExecutor {
            runner: ShellRunner::new("bash"),
            parallel: true,
        };
        let dispatch = executor.execute(&array_job(&helper)).await.unwrap();
        let Dispatch::Spawned(pids) = dispatch else {
            panic!("expected spawned pids");
        };
        assert_eq!(pids.len(), 3);
    }
}
