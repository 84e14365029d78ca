use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Stop strings applied when a model configures none of its own.
/// Inherited from the original deployment defaults.
pub const DEFAULT_STOP_STRINGS: &[&str] = &["</s>", "\nUser:", "\nuser:", "\n###", "\nAssistant:"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// Overrides the default `~/.llamalith/data/llamalith.db` location.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
    /// Token buffer reserved to absorb tokenizer estimation error.
    #[serde(default = "default_safety_margin")]
    pub safety_margin: u32,
    #[serde(default)]
    pub sampling: SamplingDefaults,
    pub models: HashMap<String, ModelConfig>,
}

fn default_worker_count() -> usize {
    num_cpus::get().min(2)
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_error_backoff_ms() -> u64 {
    2000
}

fn default_safety_margin() -> u32 {
    128
}

/// Global sampling defaults, overridable per model and per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingDefaults {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: i32,
    #[serde(default = "default_repeat_penalty")]
    pub repeat_penalty: f32,
    #[serde(default)]
    pub presence_penalty: f32,
    #[serde(default)]
    pub frequency_penalty: f32,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    0.95
}

fn default_top_k() -> i32 {
    40
}

fn default_repeat_penalty() -> f32 {
    1.1
}

impl Default for SamplingDefaults {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            repeat_penalty: default_repeat_penalty(),
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
        }
    }
}

/// Partial sampling override; unset fields fall through to the next
/// precedence level.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SamplingOverrides {
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub top_k: Option<i32>,
    #[serde(default)]
    pub repeat_penalty: Option<f32>,
    #[serde(default)]
    pub presence_penalty: Option<f32>,
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Path to the GGUF model file.
    pub model_path: String,
    #[serde(default = "default_context_window")]
    pub context_window: u32,
    /// Hard cap on generated tokens; absent means "whatever fits".
    #[serde(default)]
    pub max_generation_tokens: Option<u32>,
    #[serde(default)]
    pub sampling: SamplingOverrides,
    /// Overrides `DEFAULT_STOP_STRINGS` when present.
    #[serde(default)]
    pub stop_strings: Option<Vec<String>>,
    /// Static capability descriptor: whether the engine build accepts
    /// presence/frequency penalties for this model. Resolved here once,
    /// never probed at call time.
    #[serde(default = "default_true")]
    pub supports_penalties: bool,
    #[serde(default)]
    pub terminator: Option<TerminatorPolicyConfig>,
    #[serde(default)]
    pub min_length: Option<MinLengthPolicyConfig>,
    /// Named grammar constraints: constraint name → .gbnf file path.
    #[serde(default)]
    pub grammars: HashMap<String, String>,
}

fn default_context_window() -> u32 {
    4096
}

fn default_true() -> bool {
    true
}

/// The output must contain a literal terminator string; missing it
/// triggers bounded continuation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminatorPolicyConfig {
    pub text: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// The output (stripped of its structural wrap pair) must reach a word
/// target; falling short triggers bounded extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinLengthPolicyConfig {
    pub target_words: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    pub wrap_open: String,
    pub wrap_close: String,
}

fn default_max_attempts() -> u32 {
    2
}

impl ModelConfig {
    /// Effective stop strings for this model.
    pub fn stop_strings(&self) -> Vec<String> {
        match &self.stop_strings {
            Some(list) => list.clone(),
            None => DEFAULT_STOP_STRINGS.iter().map(|s| s.to_string()).collect(),
        }
    }
}
