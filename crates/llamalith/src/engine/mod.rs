//! Inference engine boundary.
//!
//! The core treats the engine as an opaque capability: given a rendered
//! prompt and a fully resolved invocation descriptor it returns generated
//! text and a finish indicator. The real llama.cpp backend is compiled
//! with the "ai" feature flag; without it a disabled stub is provided so
//! the queue and store still build on machines without a C++ toolchain.

use thiserror::Error;

pub mod pool;

#[cfg(feature = "ai")]
pub mod llama;

#[cfg(not(feature = "ai"))]
pub mod stub;

#[cfg(feature = "ai")]
pub use llama::LlamaEngine;

pub use pool::EnginePool;

#[cfg(not(feature = "ai"))]
pub use stub::DisabledEngine;

/// Errors that can occur inside an inference engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to initialize LLM backend: {0}")]
    BackendInit(String),

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Failed to create context: {0}")]
    ContextCreation(String),

    #[error("Failed to tokenize input: {0}")]
    Tokenization(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Invalid grammar constraint: {0}")]
    Grammar(String),

    #[error("Mutex poisoned - concurrent access failed")]
    MutexPoisoned,

    #[error("AI feature not enabled")]
    NotEnabled,
}

/// Resolved sampling knobs handed to the engine. All precedence has
/// already been applied; the engine just uses the values.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: i32,
    pub repeat_penalty: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
}

/// How a generation is allowed to terminate. A grammar constraint and
/// stop strings are mutually exclusive by construction: a grammar
/// governs well-formed termination on its own.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationPolicy {
    /// GBNF grammar text constraining the output.
    Grammar(String),
    /// Literal substrings that cut generation short.
    StopStrings(Vec<String>),
}

/// A fully resolved invocation, ready for the engine.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    /// Rendered ChatML prompt; exactly the bytes measured by the budgeter.
    pub prompt: String,
    /// Generation ceiling in tokens, already clamped to the window.
    pub max_tokens: u32,
    pub sampling: SamplingParams,
    pub termination: TerminationPolicy,
}

/// Why a generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// End-of-generation token, stop string, or grammar completion.
    Stop,
    /// The token ceiling was reached.
    Length,
}

/// Output of one engine invocation.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub finish: FinishReason,
    /// Token usage, when the backend reports it.
    pub generated_tokens: Option<u32>,
}

/// A synchronous, non-cancelable inference engine for one model.
///
/// Implementations must be shareable across worker threads; one call
/// occupies its caller for the whole generation.
pub trait InferenceEngine: Send + Sync {
    /// Measures the token length of a rendered prompt.
    fn count_tokens(&self, text: &str) -> Result<usize, EngineError>;

    /// The fixed context-window capacity (prompt + output together).
    fn context_window(&self) -> u32;

    /// Runs one bounded generation.
    fn complete(&self, request: &InvocationRequest) -> Result<Completion, EngineError>;
}
