//! `run` and `schedule` command handlers.

use clank_pipeline::{
    AggregateOutcome, EnqueueOptions, Enqueuer, Job, JobOutcome, PgEnqueuer, Pipeline,
    ProcessOutcome,
};

/// Runs a single job in this process and prints what it did.
///
/// # Errors
///
/// Returns an error if the job fails; the job queue is not touched, so
/// nothing is retried.
pub(crate) async fn run_job(pipeline: &Pipeline, job: &Job) -> anyhow::Result<()> {
    let outcome = pipeline.run(job).await?;
    println!("{job}: {}", describe(&outcome));
    Ok(())
}

/// Enqueues a recovery walk with the same options the cron trigger uses.
///
/// # Errors
///
/// Returns an error if the job cannot be inserted.
pub(crate) async fn enqueue_walk(pool: &sqlx::PgPool, job: &Job) -> anyhow::Result<()> {
    let enqueuer = PgEnqueuer::new(pool.clone());
    if enqueuer.enqueue(job, EnqueueOptions::RECOVERY).await? {
        println!("{job}: enqueued");
    } else {
        println!("{job}: already pending, nothing enqueued");
    }
    Ok(())
}

fn describe(outcome: &JobOutcome) -> String {
    match outcome {
        JobOutcome::Process(ProcessOutcome::Skipped(reason))
        | JobOutcome::Aggregate(AggregateOutcome::Skipped(reason)) => format!("skipped ({reason})"),
        JobOutcome::Process(ProcessOutcome::Processed {
            issues,
            suggestions,
            tokens,
        }) => format!("processed {issues} issues and {suggestions} suggestions ({tokens} tokens)"),
        JobOutcome::Aggregate(AggregateOutcome::Created { cluster_id, tokens }) => {
            format!("created cluster {cluster_id} ({tokens} tokens)")
        }
        JobOutcome::Aggregate(AggregateOutcome::Merged { cluster_id, tokens }) => {
            format!("merged into cluster {cluster_id} ({tokens} tokens)")
        }
        JobOutcome::Aggregate(AggregateOutcome::Discarded) => {
            "discarded (feedback already counted in the cluster)".to_string()
        }
        JobOutcome::Walk(summary) => {
            format!("visited {}, enqueued {}", summary.visited, summary.enqueued)
        }
    }
}
