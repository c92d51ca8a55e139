//! Run lifecycle persistence: QUEUED → RUNNING → {SUCCEEDED, FAILED}.
//!
//! A run that crashes while RUNNING is recoverable: `mark_running` is
//! idempotent and preserves the original start time, and every
//! downstream table is replaced rather than appended, so re-invoking
//! the same run id is safe.

use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use crate::storage;
use crate::types::{PipelineError, SnapshotRun};

/// Upper bound on persisted failure messages.
pub const MAX_ERROR_MESSAGE_LEN: usize = 1000;

/// Truncate a failure message to the storage bound, respecting char
/// boundaries so multi-byte text never splits mid-character.
pub fn truncate_message(message: &str) -> String {
    if message.len() <= MAX_ERROR_MESSAGE_LEN {
        return message.to_string();
    }
    let mut end = MAX_ERROR_MESSAGE_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}

/// Persists and transitions snapshot runs. The only writer of the
/// `snapshot_run` table.
pub struct RunLifecycle<'a> {
    audit: &'a SqlitePool,
}

impl<'a> RunLifecycle<'a> {
    pub fn new(audit: &'a SqlitePool) -> Self {
        Self { audit }
    }

    /// Insert a new run row. Called exactly once per invocation.
    pub async fn create(&self, run: &SnapshotRun) -> Result<(), PipelineError> {
        sqlx::query(
            "INSERT INTO snapshot_run (
                run_id, status, period_start, period_end, window_axis,
                organization_id, branch_id, requested_by_user_id,
                requested_by_email, legacy_branch_filter, created_at,
                started_at, finished_at, error_message
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        )
        .bind(run.run_id.to_string())
        .bind(run.status.as_str())
        .bind(run.period_start)
        .bind(run.period_end)
        .bind(run.window_axis.as_str())
        .bind(run.organization_id)
        .bind(run.branch_id)
        .bind(run.requested_by_user_id)
        .bind(&run.requested_by_email)
        .bind(run.legacy_branch_filter)
        .bind(run.created_at)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(&run.error_message)
        .execute(self.audit)
        .await?;

        info!(run_id = %run.run_id, status = %run.status, "snapshot run created");
        Ok(())
    }

    /// Transition to RUNNING. Idempotent: clears finished_at and
    /// error_message but preserves an existing started_at, so a
    /// crash-and-retry does not reset the original start time.
    pub async fn mark_running(&self, run_id: Uuid) -> Result<(), PipelineError> {
        let result = sqlx::query(
            "UPDATE snapshot_run
             SET status = 'RUNNING',
                 started_at = COALESCE(started_at, ?2),
                 finished_at = NULL,
                 error_message = NULL
             WHERE run_id = ?1",
        )
        .bind(run_id.to_string())
        .bind(Utc::now())
        .execute(self.audit)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::RunNotFound(run_id));
        }
        info!(run_id = %run_id, "snapshot run marked RUNNING");
        Ok(())
    }

    /// Terminal success write.
    pub async fn finish_success(&self, run_id: Uuid) -> Result<(), PipelineError> {
        let result = sqlx::query(
            "UPDATE snapshot_run
             SET status = 'SUCCEEDED', finished_at = ?2, error_message = NULL
             WHERE run_id = ?1",
        )
        .bind(run_id.to_string())
        .bind(Utc::now())
        .execute(self.audit)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::RunNotFound(run_id));
        }
        info!(run_id = %run_id, "snapshot run SUCCEEDED");
        Ok(())
    }

    /// Terminal failure write. The message is truncated before storage.
    pub async fn finish_failure(&self, run_id: Uuid, message: &str) -> Result<(), PipelineError> {
        let result = sqlx::query(
            "UPDATE snapshot_run
             SET status = 'FAILED', finished_at = ?2, error_message = ?3
             WHERE run_id = ?1",
        )
        .bind(run_id.to_string())
        .bind(Utc::now())
        .bind(truncate_message(message))
        .execute(self.audit)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::RunNotFound(run_id));
        }
        info!(run_id = %run_id, "snapshot run FAILED");
        Ok(())
    }

    /// Fetch the persisted run row (the status-polling surface for
    /// background callers).
    pub async fn get(&self, run_id: Uuid) -> Result<SnapshotRun, PipelineError> {
        let row = sqlx::query(
            "SELECT run_id, status, period_start, period_end, window_axis,
                    organization_id, branch_id, requested_by_user_id,
                    requested_by_email, legacy_branch_filter, created_at,
                    started_at, finished_at, error_message
             FROM snapshot_run
             WHERE run_id = ?1",
        )
        .bind(run_id.to_string())
        .fetch_optional(self.audit)
        .await?
        .ok_or(PipelineError::RunNotFound(run_id))?;

        run_from_row(&row)
    }
}

fn run_from_row(row: &SqliteRow) -> Result<SnapshotRun, PipelineError> {
    let status_raw: String = row.try_get("status")?;
    let status = status_raw
        .parse()
        .map_err(|_| PipelineError::Decode {
            column: "status".to_string(),
            value: status_raw.clone(),
        })?;

    let axis_raw: String = row.try_get("window_axis")?;
    let window_axis = axis_raw.parse().map_err(|_| PipelineError::Decode {
        column: "window_axis".to_string(),
        value: axis_raw.clone(),
    })?;

    Ok(SnapshotRun {
        run_id: storage::uuid_column(row, "run_id")?,
        status,
        period_start: row.try_get("period_start")?,
        period_end: row.try_get("period_end")?,
        window_axis,
        organization_id: row.try_get("organization_id")?,
        branch_id: row.try_get("branch_id")?,
        requested_by_user_id: row.try_get("requested_by_user_id")?,
        requested_by_email: row.try_get("requested_by_email")?,
        legacy_branch_filter: row.try_get("legacy_branch_filter")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        error_message: row.try_get("error_message")?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
