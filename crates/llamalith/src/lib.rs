//! Local LLM generation job queue.
//!
//! Requests are durable jobs in SQLite; a pool of worker threads claims
//! them exactly once, runs the model with a token-budgeted prompt and
//! bounded continuation, and records results back on the job row and the
//! conversation transcript.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod prompt;
pub mod queue;
pub mod worker;

pub use config::{load_config, Config};
pub use db::Database;
pub use engine::EnginePool;
pub use error::{LlamalithError, Result};
pub use queue::{JobRequest, Queue};
pub use worker::WorkerPool;
