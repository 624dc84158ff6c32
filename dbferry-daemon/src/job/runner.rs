use crate::job::{Job, JobError};
use dbferry_core::{
    migrate::{self, FailurePolicy, Invocation, Plan, Stage},
    tool::{ExitStatus, ToolProcess, Tools},
};
use std::{path::Path, sync::Arc, time::Duration};

const TERMINATE_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[tracing::instrument(name = "job", skip_all, fields(id = %job.id))]
pub(super) async fn run(job: Arc<Job>, tools: &Tools, failure_policy: FailurePolicy) {
    job.set_running();
    match execute(&job, tools, failure_policy).await {
        Ok(()) => {
            job.append_log("Sync completed successfully.");
            job.finish_success();
            tracing::info!("finished successfully");
        }
        Err(error) => {
            job.append_log(format!("ERROR: {}", error));
            tracing::error!(%error, "failed");
            job.finish_error(JobError::from(&error));
        }
    }
}

async fn execute(
    job: &Job,
    tools: &Tools,
    failure_policy: FailurePolicy,
) -> Result<(), migrate::Error> {
    let plan = Plan {
        source: job.source.clone(),
        destination: job.destination.clone(),
    };
    preflight(job, tools, &plan).await?;

    // removed on drop, on every exit path
    let workdir = tempfile::Builder::new()
        .prefix(&format!("dbferry-{}-", job.id))
        .tempdir()
        .map_err(migrate::Error::Workdir)?;

    for stage in Stage::ALL {
        check_cancelled(job)?;
        job.append_log(stage.marker());
        job.set_progress(stage.milestone());
        run_stage(job, tools, &plan, stage, workdir.path(), failure_policy).await?;
    }
    Ok(())
}

async fn preflight(job: &Job, tools: &Tools, plan: &Plan) -> Result<(), migrate::Error> {
    for (role, endpoint) in [("source", &plan.source), ("destination", &plan.destination)] {
        let Some(invocation) = migrate::ping_invocation(tools, endpoint) else {
            break;
        };
        check_cancelled(job)?;
        job.append_log(format!("Checking connectivity to the {} endpoint...", role));
        let status = run_invocation(job, &invocation).await?;
        if !status.success() {
            return Err(migrate::Error::Connect {
                role,
                database: endpoint.database.0.clone(),
            });
        }
    }
    Ok(())
}

async fn run_stage(
    job: &Job,
    tools: &Tools,
    plan: &Plan,
    stage: Stage,
    workdir: &Path,
    failure_policy: FailurePolicy,
) -> Result<(), migrate::Error> {
    let invocations = stage.invocations(tools, plan, workdir)?;
    let total = invocations.len();
    let mut failed = 0;
    for invocation in &invocations {
        check_cancelled(job)?;
        let status = run_invocation(job, invocation).await?;
        if status.success() {
            continue;
        }
        match failure_policy {
            FailurePolicy::AbortOnFirstFailure => {
                return Err(migrate::Error::Stage { stage, status })
            }
            FailurePolicy::ContinueAndAggregate => failed += 1,
        }
    }
    if failed > 0 {
        return Err(migrate::Error::StageAggregate {
            stage,
            failed,
            total,
        });
    }
    Ok(())
}

/// Runs one tool to completion, appending every output line to the job log
/// as it arrives. The cancellation flag is checked after every line, and the
/// cancel signal terminates the in-flight process, so cancellation latency is
/// bounded by the process's reaction to the termination signal plus at most
/// one more buffered line.
async fn run_invocation(job: &Job, invocation: &Invocation) -> Result<ExitStatus, migrate::Error> {
    let mut process = invocation.spawn()?;
    let cancelled = loop {
        tokio::select! {
            maybe_line = process.next_line() => match maybe_line {
                Some(line) => {
                    job.append_log(line?);
                    if job.cancel_requested() {
                        break true;
                    }
                }
                None => break false,
            },
            _ = job.cancelled() => break true,
        }
    };
    if cancelled || job.cancel_requested() {
        return Err(cancel_process(process).await);
    }
    Ok(process.wait().await?)
}

async fn cancel_process(mut process: ToolProcess) -> migrate::Error {
    if let Err(error) = process.terminate(TERMINATE_GRACE_PERIOD).await {
        tracing::warn!(%error, "failed to terminate subprocess");
    }
    migrate::Error::Cancelled
}

fn check_cancelled(job: &Job) -> Result<(), migrate::Error> {
    if job.cancel_requested() {
        Err(migrate::Error::Cancelled)
    } else {
        Ok(())
    }
}
