//! Generation pipeline: budget resolution, engine invocation and
//! bounded continuation for one claimed job.

pub mod budget;
pub mod continuation;
pub mod error;

use std::fs;
use std::sync::Arc;

use tracing::info_span;

use crate::config::Config;
use crate::db::job_repo::JobRow;
use crate::engine::EnginePool;
use crate::prompt::ChatMessage;

pub use budget::{resolve_invocation, resolve_sampling, GenerationOverrides, FLOOR_MIN_TOKENS};
pub use continuation::{ContinuationController, PipelineOutcome};
pub use error::PipelineError;

/// Executes generation for claimed jobs. Shared by all workers; holds no
/// per-job state.
pub struct Pipeline {
    config: Arc<Config>,
    engines: Arc<EnginePool>,
}

impl Pipeline {
    pub fn new(config: Arc<Config>, engines: Arc<EnginePool>) -> Self {
        Self { config, engines }
    }

    /// Runs one job's transcript through the model, including any
    /// continuation rounds its policies require.
    pub fn run(
        &self,
        job: &JobRow,
        transcript: &[ChatMessage],
    ) -> Result<PipelineOutcome, PipelineError> {
        let span = info_span!("pipeline", job_id = %job.id, model = %job.model);
        let _guard = span.enter();

        let model = self
            .config
            .models
            .get(&job.model)
            .ok_or_else(|| PipelineError::UnknownModel(job.model.clone()))?;

        let engine = self.engines.get_or_load(&job.model, model)?;

        let grammar = match &job.grammar {
            Some(name) => Some(self.load_grammar(model, name)?),
            None => None,
        };

        let controller = ContinuationController::new(
            engine.as_ref(),
            model,
            &self.config.sampling,
            self.config.safety_margin,
            GenerationOverrides::default(),
            grammar,
        );
        controller.run(transcript)
    }

    fn load_grammar(
        &self,
        model: &crate::config::ModelConfig,
        name: &str,
    ) -> Result<String, PipelineError> {
        let path = model.grammars.get(name).ok_or_else(|| PipelineError::Grammar {
            name: name.to_string(),
            reason: "not configured for this model".to_string(),
        })?;
        fs::read_to_string(path).map_err(|e| PipelineError::Grammar {
            name: name.to_string(),
            reason: format!("failed to read '{}': {}", path, e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::job_repo::{JobRow, JobStatus};

    fn config_with_model(key: &str) -> Arc<Config> {
        let json = format!(
            r#"{{
                "version": "1.0",
                "models": {{ "{}": {{ "model_path": "m.gguf" }} }}
            }}"#,
            key
        );
        Arc::new(serde_json::from_str(&json).unwrap())
    }

    fn job(model: &str, grammar: Option<&str>) -> JobRow {
        JobRow {
            id: 1,
            conversation_id: "c1".to_string(),
            input: "hello".to_string(),
            model: model.to_string(),
            system_prompt: None,
            grammar: grammar.map(|s| s.to_string()),
            status: JobStatus::Processing,
            result: None,
            forced_completion: false,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            processed_at: None,
        }
    }

    #[test]
    fn test_unknown_model_is_rejected_before_loading() {
        let pool = Arc::new(EnginePool::with_factory(Box::new(|_, _| {
            panic!("factory must not run for an unknown model")
        })));
        let pipeline = Pipeline::new(config_with_model("mistral"), pool);
        let result = pipeline.run(&job("no-such-model", None), &[ChatMessage::user("hi")]);
        assert!(matches!(result, Err(PipelineError::UnknownModel(ref m)) if m == "no-such-model"));
    }

    #[test]
    fn test_unconfigured_grammar_is_rejected() {
        use crate::engine::{Completion, EngineError, FinishReason, InferenceEngine, InvocationRequest};

        struct EchoEngine;
        impl InferenceEngine for EchoEngine {
            fn count_tokens(&self, text: &str) -> Result<usize, EngineError> {
                Ok(text.len() / 4)
            }
            fn context_window(&self) -> u32 {
                4096
            }
            fn complete(&self, _request: &InvocationRequest) -> Result<Completion, EngineError> {
                Ok(Completion {
                    text: "ok".to_string(),
                    finish: FinishReason::Stop,
                    generated_tokens: None,
                })
            }
        }

        let pool = Arc::new(EnginePool::with_factory(Box::new(|_, _| {
            Ok(std::sync::Arc::new(EchoEngine) as Arc<dyn InferenceEngine>)
        })));
        let pipeline = Pipeline::new(config_with_model("mistral"), pool);
        let result = pipeline.run(&job("mistral", Some("json")), &[ChatMessage::user("hi")]);
        assert!(
            matches!(result, Err(PipelineError::Grammar { ref name, .. }) if name == "json")
        );
    }
}
