//! Disabled engine (fallback when the "ai" feature is off).
//!
//! Keeps the queue, store and worker pool usable in builds without the
//! heavy llama-cpp dependency; every generation attempt fails cleanly
//! and ends up as a job error.

use super::{Completion, EngineError, InferenceEngine, InvocationRequest};

pub struct DisabledEngine {
    context_window: u32,
}

impl DisabledEngine {
    pub fn new(context_window: u32) -> Self {
        Self { context_window }
    }
}

impl InferenceEngine for DisabledEngine {
    fn count_tokens(&self, _text: &str) -> Result<usize, EngineError> {
        Err(EngineError::NotEnabled)
    }

    fn context_window(&self) -> u32 {
        self.context_window
    }

    fn complete(&self, _request: &InvocationRequest) -> Result<Completion, EngineError> {
        Err(EngineError::NotEnabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{SamplingParams, TerminationPolicy};

    #[test]
    fn test_disabled_engine_rejects_calls() {
        let engine = DisabledEngine::new(4096);
        assert_eq!(engine.context_window(), 4096);
        assert!(matches!(
            engine.count_tokens("hi"),
            Err(EngineError::NotEnabled)
        ));

        let request = InvocationRequest {
            prompt: "hi".to_string(),
            max_tokens: 16,
            sampling: SamplingParams {
                temperature: 0.7,
                top_p: 0.95,
                top_k: 40,
                repeat_penalty: 1.1,
                presence_penalty: 0.0,
                frequency_penalty: 0.0,
            },
            termination: TerminationPolicy::StopStrings(vec![]),
        };
        assert!(matches!(
            engine.complete(&request),
            Err(EngineError::NotEnabled)
        ));
    }
}
