//! Context budgeter — turns a transcript plus model limits into a fully
//! resolved invocation.
//!
//! Deterministic for a fixed input; no side effects. The prompt measured
//! here is byte-for-byte the prompt the engine receives, so the budget
//! cannot drift from what the engine actually consumes.

use crate::config::{ModelConfig, SamplingDefaults, SamplingOverrides};
use crate::engine::{
    EngineError, InferenceEngine, InvocationRequest, SamplingParams, TerminationPolicy,
};
use crate::prompt::{render_prompt, ChatMessage};

/// Minimum generation headroom granted even when the transcript already
/// crowds the window. Inherited from the original deployment.
pub const FLOOR_MIN_TOKENS: u32 = 256;

/// Per-call overrides, highest precedence in resolution.
#[derive(Debug, Clone, Default)]
pub struct GenerationOverrides {
    pub max_tokens: Option<u32>,
    pub sampling: SamplingOverrides,
}

/// Resolves the sampling configuration: per-call > per-model > global.
///
/// No clamping; the engine itself bounds these.
pub fn resolve_sampling(
    defaults: &SamplingDefaults,
    model: &SamplingOverrides,
    call: &SamplingOverrides,
) -> SamplingParams {
    SamplingParams {
        temperature: call
            .temperature
            .or(model.temperature)
            .unwrap_or(defaults.temperature),
        top_p: call.top_p.or(model.top_p).unwrap_or(defaults.top_p),
        top_k: call.top_k.or(model.top_k).unwrap_or(defaults.top_k),
        repeat_penalty: call
            .repeat_penalty
            .or(model.repeat_penalty)
            .unwrap_or(defaults.repeat_penalty),
        presence_penalty: call
            .presence_penalty
            .or(model.presence_penalty)
            .unwrap_or(defaults.presence_penalty),
        frequency_penalty: call
            .frequency_penalty
            .or(model.frequency_penalty)
            .unwrap_or(defaults.frequency_penalty),
    }
}

/// Builds the invocation descriptor for one generation call.
///
/// The generation ceiling follows override precedence (per-call >
/// per-model > remaining headroom) but is always clamped to the remaining
/// headroom, so no configuration can overflow the context window.
pub fn resolve_invocation(
    engine: &dyn InferenceEngine,
    model: &ModelConfig,
    defaults: &SamplingDefaults,
    safety_margin: u32,
    overrides: &GenerationOverrides,
    grammar: Option<&str>,
    messages: &[ChatMessage],
) -> Result<InvocationRequest, EngineError> {
    let prompt = render_prompt(messages);
    let measured = engine.count_tokens(&prompt)? as u32;
    let window = engine.context_window();

    let remaining = window
        .saturating_sub(measured)
        .saturating_sub(safety_margin)
        .max(FLOOR_MIN_TOKENS);

    let requested = overrides
        .max_tokens
        .or(model.max_generation_tokens)
        .unwrap_or(remaining);
    let max_tokens = requested.min(remaining);

    let sampling = resolve_sampling(defaults, &model.sampling, &overrides.sampling);

    let termination = match grammar {
        Some(text) => TerminationPolicy::Grammar(text.to_string()),
        None => TerminationPolicy::StopStrings(model.stop_strings()),
    };

    Ok(InvocationRequest {
        prompt,
        max_tokens,
        sampling,
        termination,
    })
}
