use crate::cli::StageArgs;
use anyhow::{bail, Result};
use maspipe::config::Config;
use maspipe::core::executor::{ClusterExecutor, Dispatch, ExecutionMode, Executor, LocalExecutor};
use maspipe::core::process::{ProcessOutcome, ShellRunner};
use maspipe::core::stage::{Stage, StageJob};
use owo_colors::OwoColorize;

pub(crate) async fn handle_stage(config: &Config, stage: Stage, args: StageArgs) -> Result<()> {
    let helper_script = args
        .helper_script
        .clone()
        .unwrap_or_else(|| config.pipeline.helper_script.clone());
    let job = StageJob::build(stage, &args.params(), &helper_script)?;

    let mode = resolve_mode(stage, args.mode);
    let runner = ShellRunner::new(&config.pipeline.shell);
    tracing::debug!("Dispatching {stage} for {} in {mode} mode", job.target_id);

    let dispatch = match mode {
        ExecutionMode::Local => {
            if args.submit {
                tracing::warn!("--submit has no effect in local mode");
            }
            if args.print {
                println!("{}", job.command_line());
            }
            LocalExecutor {
                runner,
                parallel: args.parallel,
            }
            .execute(&job)
            .await?
        }
        ExecutionMode::Cluster => {
            if args.parallel {
                tracing::warn!("--parallel has no effect in cluster mode");
            }
            let executor = ClusterExecutor {
                job_dir: args
                    .job_dir
                    .clone()
                    .unwrap_or_else(|| config.pipeline.job_dir.clone()),
                resources: args.resources.apply(&config.cluster),
                env: args.resources.env_activation(config)?,
                array_bound: args.array_bound.unwrap_or(config.pipeline.array_bound),
                submit: args.submit,
                runner,
            };
            executor.execute(&job).await?
        }
    };

    report(&dispatch, args.print);

    let failures = dispatch.failures();
    if args.strict && !failures.is_empty() {
        bail!(
            "{} process(es) of {stage} for {} exited with a non-zero status",
            failures.len(),
            job.target_id
        );
    }
    Ok(())
}

/// Propagation stages go to the cluster unless told otherwise, fusion stages run here.
fn resolve_mode(stage: Stage, requested: Option<ExecutionMode>) -> ExecutionMode {
    requested.unwrap_or(if stage.is_array() {
        ExecutionMode::Cluster
    } else {
        ExecutionMode::Local
    })
}

fn report(dispatch: &Dispatch, print: bool) {
    match dispatch {
        Dispatch::Completed(outcomes) => outcomes.iter().for_each(report_outcome),
        Dispatch::Spawned(pids) => {
            let pids = pids.iter().map(u32::to_string).collect::<Vec<_>>();
            println!(
                "Spawned {} process(es): {}",
                pids.len().green(),
                pids.join(" ")
            );
        }
        Dispatch::Written(written) => {
            if print {
                print!("{}", written.contents);
                println!("{}", written.submission.dimmed());
            }
            println!("Wrote {}", written.path.display().cyan());
        }
        Dispatch::Submitted(written, outcome) => {
            println!("Wrote {}", written.path.display().cyan());
            report_outcome(outcome);
        }
    }
}

fn report_outcome(outcome: &ProcessOutcome) {
    print!("{}", outcome.stdout);
    eprint!("{}", outcome.stderr);
    let code = outcome
        .code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string());
    if outcome.success() {
        println!("returned value: {}", code.green());
    } else {
        println!("returned value: {}", code.red());
    }
}
