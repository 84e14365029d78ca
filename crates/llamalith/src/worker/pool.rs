//! Worker pool: N threads competing to claim and process jobs.
//!
//! Workers idle on the wake channel with the poll interval as timeout,
//! so enqueues are picked up immediately while the poll still catches
//! anything the channel missed. One job failing marks that job `error`
//! and the worker keeps going; a worker never dies from a job.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, error, info, warn};

use crate::config::Config;
use crate::db::job_repo::{self, JobRow};
use crate::db::{conversation_repo, Database};
use crate::engine::EnginePool;
use crate::error::WorkerError;
use crate::pipeline::{Pipeline, PipelineOutcome};
use crate::prompt::Role;

pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawns `config.worker_count` worker threads sharing one wake
    /// receiver, so each wake signal rouses exactly one idle worker.
    pub fn start(
        db: Database,
        config: Arc<Config>,
        engines: Arc<EnginePool>,
        wake: Receiver<()>,
    ) -> Result<Self, WorkerError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(config.worker_count);

        info!("Starting {} worker(s)", config.worker_count);
        for i in 0..config.worker_count {
            let db = db.clone();
            let config = Arc::clone(&config);
            let engines = Arc::clone(&engines);
            let wake = wake.clone();
            let shutdown = Arc::clone(&shutdown);

            let handle = thread::Builder::new()
                .name(format!("llamalith-worker-{}", i))
                .spawn(move || run_worker(i, db, config, engines, wake, shutdown))
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;
            workers.push(handle);
        }

        Ok(Self { workers, shutdown })
    }

    /// Signals all workers to stop after their current job.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool");
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Blocks until every worker thread has exited.
    pub fn wait(self) {
        for handle in self.workers {
            let name = handle
                .thread()
                .name()
                .unwrap_or("llamalith-worker")
                .to_string();
            if handle.join().is_err() {
                error!("Worker thread '{}' panicked", name);
            }
        }
        info!("All workers stopped");
    }
}

fn run_worker(
    index: usize,
    db: Database,
    config: Arc<Config>,
    engines: Arc<EnginePool>,
    wake: Receiver<()>,
    shutdown: Arc<AtomicBool>,
) {
    debug!("Worker {} started", index);
    let pipeline = Pipeline::new(Arc::clone(&config), engines);
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let error_backoff = Duration::from_millis(config.error_backoff_ms);

    while !shutdown.load(Ordering::SeqCst) {
        match job_repo::claim_next(&db) {
            Ok(Some(job)) => {
                info!("Worker {} claimed job {} (model '{}')", index, job.id, job.model);
                handle_job(&db, &pipeline, &job, error_backoff);
            }
            Ok(None) => {
                // Idle: wake up early on enqueue, fall back to polling.
                match wake.recv_timeout(poll_interval) {
                    Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            Err(e) => {
                error!("Worker {} failed to claim a job: {}", index, e);
                thread::sleep(error_backoff);
            }
        }
    }
    debug!("Worker {} stopped", index);
}

fn handle_job(db: &Database, pipeline: &Pipeline, job: &JobRow, error_backoff: Duration) {
    match process_job(db, pipeline, job) {
        Ok(outcome) => {
            if outcome.forced_completion {
                warn!("Job {} completed with a forced terminator", job.id);
            }
            if let Err(e) = job_repo::mark_done(db, job.id, &outcome.text, outcome.forced_completion)
            {
                error!("Failed to mark job {} done: {}", job.id, e);
            } else {
                info!(
                    "Job {} done ({} continuation round(s))",
                    job.id, outcome.continuation_rounds
                );
            }
        }
        Err(message) => {
            error!("Job {} failed: {}", job.id, message);
            if let Err(e) = job_repo::mark_error(db, job.id, &message) {
                error!("Failed to mark job {} as error: {}", job.id, e);
            }
            thread::sleep(error_backoff);
        }
    }
}

/// Runs one claimed job through the pipeline and records the assistant
/// turn. The error path returns the message destined for the job row.
fn process_job(db: &Database, pipeline: &Pipeline, job: &JobRow) -> Result<PipelineOutcome, String> {
    let transcript =
        conversation_repo::list(db, &job.conversation_id).map_err(|e| e.to_string())?;
    let messages = super::history::assemble(job, &transcript);

    let outcome = pipeline.run(job, &messages).map_err(|e| e.to_string())?;

    conversation_repo::append(db, &job.conversation_id, Role::Assistant, &outcome.text)
        .map_err(|e| e.to_string())?;
    Ok(outcome)
}
