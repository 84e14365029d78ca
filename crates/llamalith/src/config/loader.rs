use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| format!("{} at {}", e, e.instance_path()))
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Validate version
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be at least 1".to_string(),
        });
    }

    if config.models.is_empty() {
        return Err(ConfigError::Validation {
            message: "at least one model must be configured".to_string(),
        });
    }

    for (key, model) in &config.models {
        if model.model_path.trim().is_empty() {
            return Err(ConfigError::InvalidModel {
                key: key.clone(),
                reason: "model_path must not be empty".to_string(),
            });
        }

        // The window must leave room for generation after the margin;
        // otherwise every budget collapses to the floor.
        if model.context_window <= config.safety_margin {
            return Err(ConfigError::InvalidModel {
                key: key.clone(),
                reason: format!(
                    "context_window ({}) must exceed safety_margin ({})",
                    model.context_window, config.safety_margin
                ),
            });
        }

        if let Some(term) = &model.terminator {
            if term.text.trim().is_empty() {
                return Err(ConfigError::InvalidModel {
                    key: key.clone(),
                    reason: "terminator.text must not be blank".to_string(),
                });
            }
        }

        if let Some(min) = &model.min_length {
            if min.target_words == 0 {
                return Err(ConfigError::InvalidModel {
                    key: key.clone(),
                    reason: "min_length.target_words must be at least 1".to_string(),
                });
            }
            if min.wrap_open.trim().is_empty() || min.wrap_close.trim().is_empty() {
                return Err(ConfigError::InvalidModel {
                    key: key.clone(),
                    reason: "min_length wrap markers must not be blank".to_string(),
                });
            }
            if min.wrap_open == min.wrap_close {
                return Err(ConfigError::InvalidModel {
                    key: key.clone(),
                    reason: "min_length wrap markers must differ".to_string(),
                });
            }
        }

        if let Some(stops) = &model.stop_strings {
            if stops.iter().any(|s| s.is_empty()) {
                return Err(ConfigError::InvalidModel {
                    key: key.clone(),
                    reason: "stop_strings entries must not be empty".to_string(),
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config(extra_model_fields: &str) -> String {
        format!(
            r#"{{
                "version": "1.0",
                "models": {{
                    "mistral": {{
                        "model_path": "models/mistral.gguf"{}
                    }}
                }}
            }}"#,
            extra_model_fields
        )
    }

    #[test]
    fn test_load_minimal_config() {
        let config = load_config_from_str(&minimal_config("")).unwrap();
        assert_eq!(config.version, "1.0");
        assert!(config.worker_count >= 1);
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.safety_margin, 128);
        let model = &config.models["mistral"];
        assert_eq!(model.context_window, 4096);
        assert!(model.max_generation_tokens.is_none());
        assert!(model.supports_penalties);
    }

    #[test]
    fn test_load_full_model_config() {
        let config = load_config_from_str(&minimal_config(
            r#",
            "context_window": 8192,
            "max_generation_tokens": 512,
            "sampling": {"temperature": 0.2},
            "stop_strings": ["[END]"],
            "supports_penalties": false,
            "terminator": {"text": "[DONE]", "max_attempts": 3},
            "min_length": {"target_words": 700, "wrap_open": "<story>", "wrap_close": "</story>"},
            "grammars": {"json": "grammars/json.gbnf"}"#,
        ))
        .unwrap();

        let model = &config.models["mistral"];
        assert_eq!(model.context_window, 8192);
        assert_eq!(model.max_generation_tokens, Some(512));
        assert_eq!(model.sampling.temperature, Some(0.2));
        assert!(model.sampling.top_p.is_none());
        assert!(!model.supports_penalties);
        assert_eq!(model.terminator.as_ref().unwrap().max_attempts, 3);
        assert_eq!(model.min_length.as_ref().unwrap().target_words, 700);
        assert_eq!(model.grammars["json"], "grammars/json.gbnf");
    }

    #[test]
    fn test_rejects_unknown_version() {
        let json = r#"{"version": "2.0", "models": {"m": {"model_path": "m.gguf"}}}"#;
        let err = load_config_from_str(json).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn test_rejects_missing_models() {
        let json = r#"{"version": "1.0", "models": {}}"#;
        let err = load_config_from_str(json).unwrap_err();
        assert!(matches!(err, ConfigError::SchemaValidation { .. }));
    }

    #[test]
    fn test_rejects_unknown_top_level_key() {
        let json = r#"{"version": "1.0", "modles": {}, "models": {"m": {"model_path": "m.gguf"}}}"#;
        let err = load_config_from_str(json).unwrap_err();
        assert!(matches!(err, ConfigError::SchemaValidation { .. }));
    }

    #[test]
    fn test_rejects_window_smaller_than_margin() {
        let config = minimal_config(r#", "context_window": 64"#);
        let err = load_config_from_str(&config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidModel { .. }));
    }

    #[test]
    fn test_rejects_identical_wrap_markers() {
        let config = minimal_config(
            r#", "min_length": {"target_words": 10, "wrap_open": "---", "wrap_close": "---"}"#,
        );
        let err = load_config_from_str(&config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidModel { .. }));
    }

    #[test]
    fn test_rejects_invalid_json() {
        let err = load_config_from_str("not json").unwrap_err();
        assert!(matches!(err, ConfigError::ParseJson(_)));
    }
}
