//! Public enqueue surface.
//!
//! Submitting a request records the conversation turns and inserts the
//! job in one place, so callers never touch the repositories directly.

use crossbeam_channel::Sender;
use log::debug;

use crate::db::job_repo::{self, JobRow};
use crate::db::{conversation_repo, Database, DatabaseError};
use crate::prompt::Role;

/// A generation request as submitted by a caller.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub conversation_id: String,
    pub input: String,
    pub model: String,
    pub system_prompt: Option<String>,
    /// Named grammar constraint; must be configured for the model.
    pub grammar: Option<String>,
}

/// Handle for submitting jobs and checking on them.
#[derive(Clone)]
pub struct Queue {
    db: Database,
    wake: Option<Sender<()>>,
}

impl Queue {
    pub fn new(db: Database) -> Self {
        Self { db, wake: None }
    }

    /// Queue that nudges the worker pool on every enqueue instead of
    /// leaving new work to the next poll tick.
    pub fn with_waker(db: Database, wake: Sender<()>) -> Self {
        Self {
            db,
            wake: Some(wake),
        }
    }

    /// Records the request's conversation turns and inserts the job.
    /// Returns the new job id.
    pub fn enqueue(&self, request: &JobRequest) -> Result<i64, DatabaseError> {
        conversation_repo::ensure(&self.db, &request.conversation_id, "")?;

        if let Some(prompt) = request.system_prompt.as_deref() {
            if !prompt.trim().is_empty() {
                conversation_repo::append(
                    &self.db,
                    &request.conversation_id,
                    Role::System,
                    prompt,
                )?;
            }
        }
        conversation_repo::append(
            &self.db,
            &request.conversation_id,
            Role::User,
            &request.input,
        )?;

        let id = job_repo::enqueue(
            &self.db,
            &request.conversation_id,
            &request.input,
            &request.model,
            request.system_prompt.as_deref(),
            request.grammar.as_deref(),
        )?;
        debug!("Enqueued job {} for model '{}'", id, request.model);

        // Workers also poll, so a gone receiver is not an error.
        if let Some(wake) = &self.wake {
            let _ = wake.try_send(());
        }

        Ok(id)
    }

    /// Fetches a job's current state.
    pub fn get_job(&self, id: i64) -> Result<Option<JobRow>, DatabaseError> {
        job_repo::find_by_id(&self.db, id)
    }
}
