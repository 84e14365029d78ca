//! Per-process engine pool.
//!
//! Model handles are expensive (multi-GB mmap), so each model key is
//! loaded at most once per process and shared by all workers. Access is
//! serialized only at load time; established handles are used lock-free
//! through their `Arc`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::info;

use crate::config::ModelConfig;

use super::{EngineError, InferenceEngine};

type EngineFactory =
    Box<dyn Fn(&str, &ModelConfig) -> Result<Arc<dyn InferenceEngine>, EngineError> + Send + Sync>;

pub struct EnginePool {
    engines: Mutex<HashMap<String, Arc<dyn InferenceEngine>>>,
    factory: EngineFactory,
}

impl EnginePool {
    /// Production pool backed by the compiled engine implementation.
    pub fn new() -> Self {
        Self::with_factory(Box::new(default_factory))
    }

    /// Pool with an injected factory, used by tests to supply stubs.
    pub fn with_factory(factory: EngineFactory) -> Self {
        Self {
            engines: Mutex::new(HashMap::new()),
            factory,
        }
    }

    /// Returns the engine for `key`, loading it on first use.
    pub fn get_or_load(
        &self,
        key: &str,
        config: &ModelConfig,
    ) -> Result<Arc<dyn InferenceEngine>, EngineError> {
        let mut guard = self.engines.lock().map_err(|_| EngineError::MutexPoisoned)?;
        if let Some(engine) = guard.get(key) {
            return Ok(Arc::clone(engine));
        }

        info!("Loading engine for model '{}'...", key);
        let engine = (self.factory)(key, config)?;
        guard.insert(key.to_string(), Arc::clone(&engine));
        Ok(engine)
    }

    /// Whether a model has already been loaded.
    pub fn is_loaded(&self, key: &str) -> bool {
        self.engines
            .lock()
            .map(|guard| guard.contains_key(key))
            .unwrap_or(false)
    }
}

impl Default for EnginePool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "ai")]
fn default_factory(
    _key: &str,
    config: &ModelConfig,
) -> Result<Arc<dyn InferenceEngine>, EngineError> {
    let engine = super::LlamaEngine::load_with_capabilities(
        std::path::Path::new(&config.model_path),
        config.context_window,
        config.supports_penalties,
    )?;
    Ok(Arc::new(engine))
}

#[cfg(not(feature = "ai"))]
fn default_factory(
    _key: &str,
    config: &ModelConfig,
) -> Result<Arc<dyn InferenceEngine>, EngineError> {
    Ok(Arc::new(super::DisabledEngine::new(config.context_window)))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::engine::{Completion, FinishReason, InvocationRequest};

    struct CountingEngine;

    impl InferenceEngine for CountingEngine {
        fn count_tokens(&self, text: &str) -> Result<usize, EngineError> {
            Ok(text.len())
        }

        fn context_window(&self) -> u32 {
            4096
        }

        fn complete(&self, _request: &InvocationRequest) -> Result<Completion, EngineError> {
            Ok(Completion {
                text: "ok".to_string(),
                finish: FinishReason::Stop,
                generated_tokens: Some(1),
            })
        }
    }

    fn model_config() -> ModelConfig {
        serde_json::from_str(r#"{"model_path": "m.gguf"}"#).unwrap()
    }

    #[test]
    fn test_engine_loaded_once_per_key() {
        let loads = Arc::new(AtomicU32::new(0));
        let loads_in_factory = Arc::clone(&loads);
        let pool = EnginePool::with_factory(Box::new(move |_, _| {
            loads_in_factory.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(CountingEngine) as Arc<dyn InferenceEngine>)
        }));

        let cfg = model_config();
        assert!(!pool.is_loaded("mistral"));
        pool.get_or_load("mistral", &cfg).unwrap();
        pool.get_or_load("mistral", &cfg).unwrap();
        pool.get_or_load("mythomax", &cfg).unwrap();

        assert_eq!(loads.load(Ordering::SeqCst), 2);
        assert!(pool.is_loaded("mistral"));
        assert!(pool.is_loaded("mythomax"));
    }

    #[test]
    fn test_factory_failure_is_not_cached() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_in_factory = Arc::clone(&attempts);
        let pool = EnginePool::with_factory(Box::new(move |_, _| {
            let n = attempts_in_factory.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(EngineError::ModelLoad("file missing".to_string()))
            } else {
                Ok(Arc::new(CountingEngine) as Arc<dyn InferenceEngine>)
            }
        }));

        let cfg = model_config();
        assert!(pool.get_or_load("mistral", &cfg).is_err());
        assert!(!pool.is_loaded("mistral"));
        // Second attempt retries the load.
        assert!(pool.get_or_load("mistral", &cfg).is_ok());
    }
}
