//! Periodic execution of the scheduled functions.

use chrono::Utc;
use johndao_db::{record_job_run, DbError, DbPool, JobRun};
use std::future::Future;
use tokio::time::{sleep, Duration};

use crate::jobs::JobError;

/// Runs `job` once, logs the outcome and records it in the job log.
///
/// Returns whether the job succeeded. Failing to record the run is logged
/// and does not change the result.
pub async fn run_job<F, Fut>(name: &'static str, pool: Option<&DbPool>, job: F) -> bool
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<String, JobError>>,
{
    let started_at = Utc::now();
    let result = job().await;
    let finished_at = Utc::now();

    let (success, detail) = match result {
        Ok(summary) => {
            tracing::info!(job = name, %summary, "job finished");
            (true, summary)
        }
        Err(e) => {
            tracing::error!(job = name, error = %e, "job failed");
            (false, e.to_string())
        }
    };

    if let Some(pool) = pool {
        let pool = pool.clone();
        let run = JobRun {
            job: name.to_string(),
            started_at,
            finished_at,
            success,
            detail: Some(detail),
        };
        let recorded = tokio::task::spawn_blocking(move || -> Result<(), DbError> {
            let conn = pool.get()?;
            record_job_run(&conn, &run)
        })
        .await;
        match recorded {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(job = name, error = %e, "failed to record job run"),
            Err(e) => tracing::error!(job = name, error = %e, "job log task failed"),
        }
    }

    success
}

/// Runs `job` every `interval_seconds`, forever. Zero disables the job.
///
/// The first run happens one interval after startup.
pub async fn start_periodic_job<F, Fut>(
    name: &'static str,
    interval_seconds: u64,
    pool: Option<DbPool>,
    job: F,
) where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, JobError>> + Send,
{
    if interval_seconds == 0 {
        tracing::warn!(job = name, "job disabled (interval=0)");
        return;
    }

    let interval = Duration::from_secs(interval_seconds);
    tracing::info!(job = name, interval_seconds, "starting periodic job");

    loop {
        sleep(interval).await;
        run_job(name, pool.as_ref(), &job).await;
    }
}
