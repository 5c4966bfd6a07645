use std::collections::HashMap;
use std::str::FromStr;

use thiserror::Error;

use crate::models::ClientConfig;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_MAX_MESSAGES: i64 = -1;
const DEFAULT_MAX_WORDS: usize = 1000;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be set")]
    Missing { name: &'static str },

    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    /// Canned replies, no network. Useful for local UI work.
    Scripted,
}

/// Settings for the upstream chat-completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    pub provider: ProviderKind,
    pub base_url: String,
    pub api_key: String,
    pub default_model: String,
    pub models: Vec<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            base_url: DEFAULT_API_BASE_URL.to_string(),
            api_key: String::new(),
            default_model: DEFAULT_MODEL.to_string(),
            models: vec![DEFAULT_MODEL.to_string()],
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            system_prompt: None,
        }
    }
}

/// Limits enforced by the browser before a request is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// `-1` means unlimited.
    pub max_messages: i64,
    pub max_words: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self { max_messages: DEFAULT_MAX_MESSAGES, max_words: DEFAULT_MAX_WORDS }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub llm: LlmConfig,
    pub limits: Limits,
}

impl AppConfig {
    /// Reads configuration from the process environment (after `.env`).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(&std::env::vars().collect())
    }

    /// Builds the configuration from an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |name: &str| vars.get(name).map(|v| v.trim()).filter(|v| !v.is_empty());

        let database_url = get("DATABASE_URL")
            .ok_or(ConfigError::Missing { name: "DATABASE_URL" })?
            .to_string();

        let provider = match get("LLM_PROVIDER") {
            None | Some("openai") => ProviderKind::OpenAi,
            Some("scripted") => ProviderKind::Scripted,
            Some(other) => {
                return Err(ConfigError::Invalid { name: "LLM_PROVIDER", value: other.into() })
            }
        };

        let default_model = get("LLM_DEFAULT_MODEL").unwrap_or(DEFAULT_MODEL).to_string();
        let mut models: Vec<String> = get("LLM_MODELS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        if !models.contains(&default_model) {
            models.insert(0, default_model.clone());
        }

        let max_messages = parse_or(get("MAX_MESSAGES"), "MAX_MESSAGES", DEFAULT_MAX_MESSAGES)?;
        if max_messages < -1 {
            return Err(ConfigError::Invalid {
                name: "MAX_MESSAGES",
                value: max_messages.to_string(),
            });
        }

        Ok(Self {
            database_url,
            port: parse_or(get("PORT"), "PORT", DEFAULT_PORT)?,
            llm: LlmConfig {
                provider,
                base_url: get("LLM_API_BASE_URL")
                    .unwrap_or(DEFAULT_API_BASE_URL)
                    .trim_end_matches('/')
                    .to_string(),
                api_key: get("LLM_API_KEY").unwrap_or_default().to_string(),
                default_model,
                models,
                temperature: parse_or(get("LLM_TEMPERATURE"), "LLM_TEMPERATURE", DEFAULT_TEMPERATURE)?,
                max_tokens: parse_or(get("LLM_MAX_TOKENS"), "LLM_MAX_TOKENS", DEFAULT_MAX_TOKENS)?,
                system_prompt: get("LLM_SYSTEM_PROMPT").map(String::from),
            },
            limits: Limits {
                max_messages,
                max_words: parse_or(get("MAX_WORDS"), "MAX_WORDS", DEFAULT_MAX_WORDS)?,
            },
        })
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            max_messages: self.limits.max_messages,
            max_words: self.limits.max_words,
            models: self.llm.models.clone(),
            default_model: self.llm.default_model.clone(),
        }
    }
}

fn parse_or<T: FromStr>(raw: Option<&str>, name: &'static str, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: value.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        let config = AppConfig::from_vars(&vars(&[("DATABASE_URL", "postgres://localhost/chat")]))
            .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.llm, LlmConfig::default());
        assert_eq!(config.limits, Limits { max_messages: -1, max_words: 1000 });
    }

    #[test]
    fn database_url_is_required() {
        let err = AppConfig::from_vars(&vars(&[])).unwrap_err();
        assert_eq!(err, ConfigError::Missing { name: "DATABASE_URL" });
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = AppConfig::from_vars(&vars(&[
            ("DATABASE_URL", "postgres://localhost/chat"),
            ("MAX_WORDS", "lots"),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::Invalid { name: "MAX_WORDS", value: "lots".into() });

        let err = AppConfig::from_vars(&vars(&[
            ("DATABASE_URL", "postgres://localhost/chat"),
            ("MAX_MESSAGES", "-5"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "MAX_MESSAGES", .. }));
    }

    #[test]
    fn default_model_is_always_allowed() {
        let config = AppConfig::from_vars(&vars(&[
            ("DATABASE_URL", "postgres://localhost/chat"),
            ("LLM_DEFAULT_MODEL", "gpt-4o"),
            ("LLM_MODELS", "gpt-4o-mini, o3-mini"),
            ("LLM_API_BASE_URL", "http://localhost:9000/v1/"),
        ]))
        .unwrap();
        assert_eq!(config.llm.models, vec!["gpt-4o", "gpt-4o-mini", "o3-mini"]);
        assert_eq!(config.llm.base_url, "http://localhost:9000/v1");

        let client = config.client_config();
        assert_eq!(client.default_model, "gpt-4o");
        assert_eq!(client.max_words, 1000);
    }

    #[test]
    fn scripted_provider_can_be_selected() {
        let config = AppConfig::from_vars(&vars(&[
            ("DATABASE_URL", "postgres://localhost/chat"),
            ("LLM_PROVIDER", "scripted"),
        ]))
        .unwrap();
        assert_eq!(config.llm.provider, ProviderKind::Scripted);
    }
}
