//! Job repository — the queue table and its state machine.
//!
//! Status transitions are forward-only: `queued` → `processing` →
//! `done` | `error`. `claim_next` is the single synchronization point of
//! the whole system: the select and the status flip happen inside one
//! `BEGIN IMMEDIATE` transaction, so two concurrent claimants can never
//! receive the same row. Terminal writes are guarded: marking a job that
//! is no longer `processing` is rejected with `InvalidTransition`.
//!
//! There is no lease or heartbeat: a worker that dies mid-job strands the
//! row in `processing`.

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Row, TransactionBehavior};

use super::{Database, DatabaseError};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Processing,
    Done,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DatabaseError> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "done" => Ok(JobStatus::Done),
            "error" => Ok(JobStatus::Error),
            other => Err(DatabaseError::UnknownStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job row from the `jobs` table.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: i64,
    pub conversation_id: String,
    pub input: String,
    pub model: String,
    pub system_prompt: Option<String>,
    pub grammar: Option<String>,
    pub status: JobStatus,
    pub result: Option<String>,
    pub forced_completion: bool,
    pub created_at: String,
    pub processed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let status_str: String = row.get("status")?;
        let status = JobStatus::parse(&status_str).map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("unknown status '{}'", status_str).into(),
            )
        })?;
        Ok(Self {
            id: row.get("id")?,
            conversation_id: row.get("conversation_id")?,
            input: row.get("input")?,
            model: row.get("model")?,
            system_prompt: row.get("system_prompt")?,
            grammar: row.get("grammar")?,
            status,
            result: row.get("result")?,
            forced_completion: row.get::<_, i64>("forced_completion")? != 0,
            created_at: row.get("created_at")?,
            processed_at: row.get("processed_at")?,
        })
    }
}

const SELECT_COLUMNS: &str = "id, conversation_id, input, model, system_prompt, grammar, \
     status, result, forced_completion, created_at, processed_at";

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Inserts a new job in `queued` state and returns its id.
pub fn enqueue(
    db: &Database,
    conversation_id: &str,
    input: &str,
    model: &str,
    system_prompt: Option<&str>,
    grammar: Option<&str>,
) -> Result<i64, DatabaseError> {
    let grammar = grammar.map(str::trim).filter(|g| !g.is_empty());
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (conversation_id, input, model, system_prompt, grammar, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'queued', ?6)",
            params![conversation_id, input, model, system_prompt, grammar, now_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Claims the oldest `queued` job, atomically flipping it to `processing`.
///
/// Select and update run inside one `BEGIN IMMEDIATE` transaction; a
/// second caller cannot observe the row as `queued` once this commits.
/// Returns `None` without side effects when the queue is empty.
pub fn claim_next(db: &Database) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn_mut(|conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let claimed = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {} FROM jobs
                 WHERE status = 'queued'
                 ORDER BY created_at ASC, id ASC
                 LIMIT 1",
                SELECT_COLUMNS
            ))?;
            let mut rows = stmt.query_map([], JobRow::from_row)?;
            match rows.next() {
                Some(Ok(row)) => Some(row),
                Some(Err(e)) => return Err(DatabaseError::Sqlite(e)),
                None => None,
            }
        };

        let Some(mut job) = claimed else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE jobs SET status = 'processing' WHERE id = ?1",
            params![job.id],
        )?;
        tx.commit()?;

        job.status = JobStatus::Processing;
        Ok(Some(job))
    })
}

/// Transitions a `processing` job to `done`, recording the result text.
///
/// `forced_completion` flags a degraded terminator outcome so operators
/// can tell forced completions apart from clean ones.
pub fn mark_done(
    db: &Database,
    id: i64,
    result: &str,
    forced_completion: bool,
) -> Result<(), DatabaseError> {
    terminal_write(db, id, JobStatus::Done, result, forced_completion)
}

/// Transitions a `processing` job to `error`, recording the failure text.
pub fn mark_error(db: &Database, id: i64, message: &str) -> Result<(), DatabaseError> {
    terminal_write(db, id, JobStatus::Error, message, false)
}

fn terminal_write(
    db: &Database,
    id: i64,
    status: JobStatus,
    result: &str,
    forced_completion: bool,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute(
            "UPDATE jobs
             SET status = ?2, result = ?3, forced_completion = ?4, processed_at = ?5
             WHERE id = ?1 AND status = 'processing'",
            params![
                id,
                status.as_str(),
                result,
                forced_completion as i64,
                now_rfc3339()
            ],
        )?;
        if affected == 1 {
            return Ok(());
        }

        // Distinguish a missing job from a refused transition.
        let mut stmt = conn.prepare("SELECT status FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], |r| r.get::<_, String>(0))?;
        match rows.next() {
            Some(Ok(current)) => Err(DatabaseError::InvalidTransition { id, status: current }),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Err(DatabaseError::JobNotFound(id)),
        }
    })
}

/// Finds a job by its id.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE id = ?1",
            SELECT_COLUMNS
        ))?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Lists recent jobs, newest first, optionally scoped to a conversation
/// and/or status.
pub fn list_recent(
    db: &Database,
    conversation_id: Option<&str>,
    status: Option<JobStatus>,
    limit: u32,
) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(cid) = conversation_id {
            conditions.push(format!("conversation_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(cid.to_string()));
        }
        if let Some(status) = status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.as_str().to_string()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        param_values.push(Box::new(limit as i64));
        let sql = format!(
            "SELECT {} FROM jobs {} ORDER BY created_at DESC, id DESC LIMIT ?{}",
            SELECT_COLUMNS,
            where_clause,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Returns the model used by the newest job in a conversation, if any.
/// Blank model values are skipped.
pub fn last_model(db: &Database, conversation_id: &str) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT model FROM jobs
             WHERE conversation_id = ?1 AND model IS NOT NULL AND TRIM(model) != ''
             ORDER BY id DESC
             LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![conversation_id], |r| r.get::<_, String>(0))?;
        match rows.next() {
            Some(Ok(model)) => Ok(Some(model)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Counts jobs with the given status.
pub fn count_by_status(db: &Database, status: JobStatus) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
