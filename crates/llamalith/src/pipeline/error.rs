use thiserror::Error;

use crate::engine::EngineError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Unknown model '{0}'")]
    UnknownModel(String),

    #[error("Engine failure: {0}")]
    Engine(#[from] EngineError),

    #[error("Model returned empty output")]
    EmptyOutput,

    #[error("Grammar '{name}' unavailable: {reason}")]
    Grammar { name: String, reason: String },
}
