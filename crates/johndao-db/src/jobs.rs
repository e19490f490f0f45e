//! Bookkeeping for scheduled job runs.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::DbError;

/// One recorded run of a scheduled job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRun {
    pub job: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub detail: Option<String>,
}

/// Appends a run record.
///
/// # Errors
///
/// Returns [`DbError::Sqlite`] if the insert fails.
pub fn record_job_run(conn: &Connection, run: &JobRun) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO job_runs (job, started_at, finished_at, success, detail)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            run.job,
            run.started_at.to_rfc3339(),
            run.finished_at.to_rfc3339(),
            run.success,
            run.detail
        ],
    )?;
    Ok(())
}

/// The most recent run of `job`, if any.
///
/// # Errors
///
/// Returns [`DbError::Sqlite`] if the query fails.
pub fn last_job_run(conn: &Connection, job: &str) -> Result<Option<JobRun>, DbError> {
    let row = conn
        .query_row(
            "SELECT job, started_at, finished_at, success, detail FROM job_runs
             WHERE job = ?1 ORDER BY id DESC LIMIT 1",
            [job],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            },
        )
        .optional()?;

    Ok(row.map(|(job, started, finished, success, detail)| JobRun {
        job,
        started_at: parse_time(&started),
        finished_at: parse_time(&finished),
        success,
        detail,
    }))
}

fn parse_time(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_migrations;
    use chrono::Duration;

    #[test]
    fn latest_run_wins() {
        let conn = Connection::open_in_memory().expect("open");
        run_migrations(&conn).expect("migrations");
        assert_eq!(last_job_run(&conn, "backup_users").expect("query"), None);

        let start = Utc::now();
        for (i, success) in [true, false].into_iter().enumerate() {
            record_job_run(
                &conn,
                &JobRun {
                    job: "backup_users".to_string(),
                    started_at: start + Duration::seconds(i as i64),
                    finished_at: start + Duration::seconds(i as i64 + 1),
                    success,
                    detail: (!success).then(|| "canister unreachable".to_string()),
                },
            )
            .expect("record");
        }

        let last = last_job_run(&conn, "backup_users").expect("query").expect("run");
        assert!(!last.success);
        assert_eq!(last.detail.as_deref(), Some("canister unreachable"));
        assert_eq!(last_job_run(&conn, "schedule_tweet").expect("query"), None);
    }
}
