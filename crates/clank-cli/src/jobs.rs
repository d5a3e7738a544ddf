use clap::Subcommand;
use uuid::Uuid;

/// Sub-commands available under `jobs`.
#[derive(Debug, Subcommand)]
pub enum JobsCommands {
    /// List jobs of one kind, oldest first
    List {
        /// Job kind (e.g., aggregator:aggregate-issue)
        kind: String,
        /// Only show jobs in this status (queued, running, succeeded, failed)
        #[arg(long)]
        status: Option<String>,
        /// Maximum number of jobs to show
        #[arg(long, default_value = "50")]
        limit: usize,
    },
    /// Show one job in full
    Show { id: Uuid },
}

/// # Errors
///
/// Returns an error if the job is not found or the database query fails.
pub(crate) async fn run_jobs_command(
    pool: &sqlx::PgPool,
    command: JobsCommands,
) -> anyhow::Result<()> {
    match command {
        JobsCommands::List {
            kind,
            status,
            limit,
        } => {
            let jobs = clank_db::list_jobs_by_kind(pool, &kind).await?;
            let jobs: Vec<_> = jobs
                .into_iter()
                .filter(|j| status.as_deref().is_none_or(|s| j.status == s))
                .take(limit)
                .collect();

            if jobs.is_empty() {
                println!("no {kind} jobs found");
                return Ok(());
            }

            println!("{:<38}{:<11}{:<10}RUN AT", "ID", "STATUS", "ATTEMPTS");
            for job in &jobs {
                println!(
                    "{:<38}{:<11}{:<10}{}",
                    job.id,
                    job.status,
                    format!("{}/{}", job.attempts, job.max_retries + 1),
                    job.run_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        JobsCommands::Show { id } => {
            let job = clank_db::get_job(pool, id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("job '{id}' not found"))?;

            println!("Job: {} ({})", job.id, job.kind);
            println!("Status: {}", job.status);
            println!("Attempts: {}/{}", job.attempts, job.max_retries + 1);
            println!("Payload: {}", job.payload);
            println!("Run at: {}", job.run_at);
            if let Some(finished_at) = job.finished_at {
                println!("Finished at: {finished_at}");
            }
            if let Some(error) = &job.last_error {
                println!("Last error: {error}");
            }
        }
    }

    Ok(())
}
