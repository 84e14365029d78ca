//! llama.cpp backend using llama-cpp-2.

use std::num::NonZeroU32;
use std::path::Path;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use log::{debug, info};

use super::{
    Completion, EngineError, FinishReason, InferenceEngine, InvocationRequest, SamplingParams,
    TerminationPolicy,
};

/// Inference engine backed by a locally loaded GGUF model.
///
/// The model weights are loaded once and shared; every `complete` call
/// creates a fresh llama context, so calls carry no state between jobs.
pub struct LlamaEngine {
    model: LlamaModel,
    backend: LlamaBackend,
    ctx_params: LlamaContextParams,
    context_window: u32,
    /// Static capability descriptor from config; when false the penalty
    /// sampler stage is omitted entirely instead of probed at call time.
    supports_penalties: bool,
}

// SAFETY: LlamaEngine is shared between worker threads behind an Arc. The
// llama-cpp-2 LlamaModel and LlamaBackend types are documented as
// thread-safe for read operations. All mutable operations (context
// creation, inference) are performed through &self methods that create
// new contexts per-call, ensuring no shared mutable state.
unsafe impl Send for LlamaEngine {}
unsafe impl Sync for LlamaEngine {}

impl LlamaEngine {
    /// Loads a model file and prepares a reusable engine for it.
    pub fn load(model_path: &Path, context_window: u32) -> Result<Self, EngineError> {
        Self::load_with_capabilities(model_path, context_window, true)
    }

    pub fn load_with_capabilities(
        model_path: &Path,
        context_window: u32,
        supports_penalties: bool,
    ) -> Result<Self, EngineError> {
        info!("Initializing LLM backend...");
        let backend =
            LlamaBackend::init().map_err(|e| EngineError::BackendInit(e.to_string()))?;

        info!("Loading model from: {}", model_path.display());
        let model_params = LlamaModelParams::default();
        let model = LlamaModel::load_from_file(&backend, model_path, &model_params)
            .map_err(|e| EngineError::ModelLoad(e.to_string()))?;

        let ctx_params =
            LlamaContextParams::default().with_n_ctx(NonZeroU32::new(context_window));

        info!("LLM initialized successfully");
        Ok(Self {
            model,
            backend,
            ctx_params,
            context_window,
            supports_penalties,
        })
    }

    fn build_sampler(
        &self,
        sampling: &SamplingParams,
        termination: &TerminationPolicy,
    ) -> Result<LlamaSampler, EngineError> {
        let mut stages = Vec::new();

        if let TerminationPolicy::Grammar(grammar) = termination {
            stages.push(
                LlamaSampler::grammar(&self.model, grammar, "root")
                    .ok_or_else(|| EngineError::Grammar("failed to compile grammar".to_string()))?,
            );
        }

        if self.supports_penalties {
            stages.push(LlamaSampler::penalties(
                64,
                sampling.repeat_penalty,
                sampling.frequency_penalty,
                sampling.presence_penalty,
            ));
        }

        stages.push(LlamaSampler::top_k(sampling.top_k));
        stages.push(LlamaSampler::top_p(sampling.top_p, 1));
        stages.push(LlamaSampler::temp(sampling.temperature));

        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u32)
            .unwrap_or(42);
        stages.push(LlamaSampler::dist(seed));

        Ok(LlamaSampler::chain_simple(stages))
    }
}

impl InferenceEngine for LlamaEngine {
    fn count_tokens(&self, text: &str) -> Result<usize, EngineError> {
        let tokens = self
            .model
            .str_to_token(text, AddBos::Always)
            .map_err(|e| EngineError::Tokenization(e.to_string()))?;
        Ok(tokens.len())
    }

    fn context_window(&self) -> u32 {
        self.context_window
    }

    fn complete(&self, request: &InvocationRequest) -> Result<Completion, EngineError> {
        // Create a fresh context for this generation.
        let mut ctx = self
            .model
            .new_context(&self.backend, self.ctx_params.clone())
            .map_err(|e| EngineError::ContextCreation(e.to_string()))?;

        let tokens = self
            .model
            .str_to_token(&request.prompt, AddBos::Always)
            .map_err(|e| EngineError::Tokenization(e.to_string()))?;

        let n_tokens = tokens.len();
        debug!("Tokenized prompt into {} tokens", n_tokens);

        let mut batch = LlamaBatch::new(self.context_window as usize, 1);
        for (i, token) in tokens.iter().enumerate() {
            let is_last = i == n_tokens - 1;
            batch
                .add(*token, i as i32, &[0], is_last)
                .map_err(|e| EngineError::Inference(format!("Failed to add token: {}", e)))?;
        }

        ctx.decode(&mut batch)
            .map_err(|e| EngineError::Inference(format!("Failed to decode prompt: {}", e)))?;

        let mut sampler = self.build_sampler(&request.sampling, &request.termination)?;
        let stop_strings: &[String] = match &request.termination {
            TerminationPolicy::StopStrings(stops) => stops,
            TerminationPolicy::Grammar(_) => &[],
        };

        let mut output = String::new();
        let mut n_cur = n_tokens;
        let mut generated: u32 = 0;
        let mut finish = FinishReason::Length;

        for _ in 0..request.max_tokens {
            let new_token = sampler.sample(&ctx, batch.n_tokens() - 1);
            sampler.accept(new_token);

            if self.model.is_eog_token(new_token) {
                finish = FinishReason::Stop;
                break;
            }

            let token_str = self
                .model
                .token_to_str(new_token, Special::Tokenize)
                .map_err(|e| EngineError::Inference(format!("Failed to decode token: {}", e)))?;
            output.push_str(&token_str);
            generated += 1;

            // Cut at the earliest stop-string occurrence.
            if let Some(cut) = stop_strings.iter().filter_map(|s| output.find(s)).min() {
                output.truncate(cut);
                finish = FinishReason::Stop;
                break;
            }

            batch.clear();
            batch
                .add(new_token, n_cur as i32, &[0], true)
                .map_err(|e| EngineError::Inference(format!("Failed to add token: {}", e)))?;

            ctx.decode(&mut batch)
                .map_err(|e| EngineError::Inference(format!("Failed to decode: {}", e)))?;

            n_cur += 1;
        }

        Ok(Completion {
            text: output,
            finish,
            generated_tokens: Some(generated),
        })
    }
}
