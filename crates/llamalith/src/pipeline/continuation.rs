//! Bounded continuation controller.
//!
//! A single generation call can run out of budget mid-answer. The
//! controller re-invokes the engine with the partial output folded back
//! into the transcript until the model's completion policies are
//! satisfied, with a hard cap on rounds per policy so a stubborn model
//! cannot spin forever.

use log::warn;

use crate::config::{MinLengthPolicyConfig, ModelConfig, SamplingDefaults, TerminatorPolicyConfig};
use crate::engine::InferenceEngine;
use crate::prompt::ChatMessage;

use super::budget::{resolve_invocation, GenerationOverrides};
use super::error::PipelineError;

/// Final result of a generation run, after all continuation rounds.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub text: String,
    /// Continuation invocations beyond the initial one.
    pub continuation_rounds: u32,
    /// True when the terminator had to be appended manually because the
    /// model never produced it within its attempt budget.
    pub forced_completion: bool,
}

pub struct ContinuationController<'a> {
    engine: &'a dyn InferenceEngine,
    model: &'a ModelConfig,
    defaults: &'a SamplingDefaults,
    safety_margin: u32,
    overrides: GenerationOverrides,
    grammar: Option<String>,
}

impl<'a> ContinuationController<'a> {
    pub fn new(
        engine: &'a dyn InferenceEngine,
        model: &'a ModelConfig,
        defaults: &'a SamplingDefaults,
        safety_margin: u32,
        overrides: GenerationOverrides,
        grammar: Option<String>,
    ) -> Self {
        Self {
            engine,
            model,
            defaults,
            safety_margin,
            overrides,
            grammar,
        }
    }

    /// Runs the initial invocation plus any continuation rounds the
    /// model's policies demand.
    pub fn run(&self, transcript: &[ChatMessage]) -> Result<PipelineOutcome, PipelineError> {
        let initial = self.invoke(transcript)?;
        let mut text = initial.trim().to_string();
        if text.is_empty() {
            return Err(PipelineError::EmptyOutput);
        }

        let mut rounds = 0;
        let mut forced = false;

        if let Some(policy) = &self.model.terminator {
            let (t, r, f) = self.satisfy_terminator(transcript, text, policy)?;
            text = t;
            rounds += r;
            forced = f;
        }

        if let Some(policy) = &self.model.min_length {
            let (t, r) = self.satisfy_min_length(transcript, text, policy)?;
            text = t;
            rounds += r;
        }

        Ok(PipelineOutcome {
            text,
            continuation_rounds: rounds,
            forced_completion: forced,
        })
    }

    fn invoke(&self, messages: &[ChatMessage]) -> Result<String, PipelineError> {
        let request = resolve_invocation(
            self.engine,
            self.model,
            self.defaults,
            self.safety_margin,
            &self.overrides,
            self.grammar.as_deref(),
            messages,
        )?;
        let completion = self.engine.complete(&request)?;
        Ok(completion.text)
    }

    /// Re-invokes until the output contains the terminator string.
    /// Exhausting the attempt budget appends the terminator manually and
    /// flags the result as a forced completion.
    fn satisfy_terminator(
        &self,
        transcript: &[ChatMessage],
        mut text: String,
        policy: &TerminatorPolicyConfig,
    ) -> Result<(String, u32, bool), PipelineError> {
        let mut rounds = 0;
        while !text.contains(&policy.text) {
            if rounds >= policy.max_attempts {
                warn!(
                    "Terminator '{}' missing after {} continuation(s); forcing completion",
                    policy.text, rounds
                );
                if !text.ends_with('\n') {
                    text.push('\n');
                }
                text.push_str(&policy.text);
                return Ok((text, rounds, true));
            }

            let instruction = format!(
                "Continue your previous response from exactly where it stopped. \
                 Do not repeat earlier text. When fully finished, end with {}",
                policy.text
            );
            let chunk = self.continue_with(transcript, &text, &instruction)?;
            rounds += 1;
            // Raw concatenation: the model resumed mid-sentence, so any
            // trimming here would mangle the seam.
            text.push_str(&chunk);
        }
        Ok((text, rounds, false))
    }

    /// Re-invokes until the wrap-stripped word count reaches the target
    /// or the attempt budget runs out, then normalizes the wrap pair.
    fn satisfy_min_length(
        &self,
        transcript: &[ChatMessage],
        mut text: String,
        policy: &MinLengthPolicyConfig,
    ) -> Result<(String, u32), PipelineError> {
        let mut rounds = 0;
        while count_words(&strip_markers(&text, policy)) < policy.target_words
            && rounds < policy.max_attempts
        {
            let instruction = format!(
                "The response is too short. Continue it with additional substance \
                 until it reaches roughly {} words. Do not repeat earlier text and \
                 do not summarize; pick up where it left off.",
                policy.target_words
            );
            let chunk = self.continue_with(transcript, &text, &instruction)?;
            rounds += 1;
            let chunk = chunk.trim();
            if !chunk.is_empty() {
                text.push_str("\n\n");
                text.push_str(chunk);
            }
        }

        let words = count_words(&strip_markers(&text, policy));
        if words < policy.target_words {
            warn!(
                "Output still at {} words (target {}) after {} extension(s)",
                words, policy.target_words, rounds
            );
        }

        // Stray wrap markers from intermediate rounds are removed and the
        // whole body re-wrapped so exactly one pair survives.
        let body = strip_markers(&text, policy);
        let wrapped = format!(
            "{}\n{}\n{}",
            policy.wrap_open,
            body.trim(),
            policy.wrap_close
        );
        Ok((wrapped, rounds))
    }

    fn continue_with(
        &self,
        transcript: &[ChatMessage],
        so_far: &str,
        instruction: &str,
    ) -> Result<String, PipelineError> {
        let mut messages = transcript.to_vec();
        messages.push(ChatMessage::assistant(so_far));
        messages.push(ChatMessage::user(instruction));
        self.invoke(&messages)
    }
}

fn strip_markers(text: &str, policy: &MinLengthPolicyConfig) -> String {
    text.replace(&policy.wrap_open, "")
        .replace(&policy.wrap_close, "")
}

fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}
