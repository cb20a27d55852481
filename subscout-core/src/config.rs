use crate::{ConfigError, CoreError};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub reddit: RedditConfig,
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://subscout.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedditConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub user_agent: String,
    pub min_interval_ms: u64,
    pub max_concurrent: usize,
    pub reservoir: u32,
    pub reservoir_refresh_secs: u64,
    pub request_timeout_secs: u64,
    pub inbox_limit: u32,
    pub listing_limit: u32,
    pub thread_depth: u32,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            user_agent: "subscout/0.1 (inbox pipeline)".to_string(),
            min_interval_ms: 2000,
            max_concurrent: 1,
            reservoir: 30,
            reservoir_refresh_secs: 60,
            request_timeout_secs: 30,
            inbox_limit: 25,
            listing_limit: 50,
            thread_depth: 8,
        }
    }
}

impl RedditConfig {
    /// App credentials, required by the OAuth flows.
    pub fn credentials(&self) -> Result<(String, String), ConfigError> {
        let client_id = self
            .client_id
            .clone()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvironmentVariable {
                var_name: "REDDIT_CLIENT_ID".to_string(),
            })?;
        let client_secret = self
            .client_secret
            .clone()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvironmentVariable {
                var_name: "REDDIT_CLIENT_SECRET".to_string(),
            })?;
        Ok((client_id, client_secret))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl LlmConfig {
    pub fn api_key(&self) -> Result<String, ConfigError> {
        self.api_key
            .clone()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvironmentVariable {
                var_name: "OPENAI_API_KEY".to_string(),
            })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub spam_concurrency: usize,
    pub classify_concurrency: usize,
    pub reply_concurrency: usize,
    pub max_input_chars: usize,
    pub lead_batch_size: usize,
    pub lead_rescore_limit: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            spam_concurrency: 50,
            classify_concurrency: 10,
            reply_concurrency: 10,
            max_input_chars: 1250,
            lead_batch_size: 10,
            lead_rescore_limit: 100,
        }
    }
}

impl AppConfig {
    /// Load from a TOML file (if it exists), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, CoreError> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)?;
                Self::from_toml(&raw)?
            }
            Some(path) => {
                return Err(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                }
                .into())
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Overlay secrets and deployment settings from the environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(id) = lookup("REDDIT_CLIENT_ID") {
            self.reddit.client_id = Some(id);
        }
        if let Some(secret) = lookup("REDDIT_CLIENT_SECRET") {
            self.reddit.client_secret = Some(secret);
        }
        if let Some(agent) = lookup("REDDIT_USER_AGENT") {
            self.reddit.user_agent = agent;
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = lookup("LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(model) = lookup("LLM_MODEL") {
            self.llm.model = model;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("pipeline.batch_size", self.pipeline.batch_size),
            ("pipeline.spam_concurrency", self.pipeline.spam_concurrency),
            (
                "pipeline.classify_concurrency",
                self.pipeline.classify_concurrency,
            ),
            ("pipeline.reply_concurrency", self.pipeline.reply_concurrency),
            ("pipeline.max_input_chars", self.pipeline.max_input_chars),
            ("pipeline.lead_batch_size", self.pipeline.lead_batch_size),
            ("reddit.max_concurrent", self.reddit.max_concurrent),
            ("reddit.reservoir", self.reddit.reservoir as usize),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                });
            }
        }
        if self.reddit.user_agent.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "reddit.user_agent".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_pipeline_limits() {
        let config = AppConfig::default();
        assert_eq!(config.reddit.min_interval_ms, 2000);
        assert_eq!(config.reddit.reservoir, 30);
        assert_eq!(config.pipeline.batch_size, 10);
        assert_eq!(config.pipeline.spam_concurrency, 50);
        assert_eq!(config.pipeline.classify_concurrency, 10);
        assert_eq!(config.pipeline.max_input_chars, 1250);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [reddit]
            reservoir = 60

            [llm]
            model = "gpt-4.1-mini"
            "#,
        )
        .unwrap();

        assert_eq!(config.reddit.reservoir, 60);
        assert_eq!(config.reddit.min_interval_ms, 2000);
        assert_eq!(config.llm.model, "gpt-4.1-mini");
        assert_eq!(config.database.url, "sqlite://subscout.db");
    }

    #[test]
    fn test_env_overrides_secrets() {
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-test"),
            ("REDDIT_CLIENT_ID", "cid"),
            ("REDDIT_CLIENT_SECRET", "secret"),
            ("DATABASE_URL", "sqlite::memory:"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.llm.api_key().unwrap(), "sk-test");
        assert_eq!(
            config.reddit.credentials().unwrap(),
            ("cid".to_string(), "secret".to_string())
        );
        assert_eq!(config.database.url, "sqlite::memory:");
    }

    #[test]
    fn test_missing_secrets_are_config_errors() {
        let config = AppConfig::default();
        assert!(matches!(
            config.llm.api_key(),
            Err(ConfigError::MissingEnvironmentVariable { .. })
        ));
        assert!(matches!(
            config.reddit.credentials(),
            Err(ConfigError::MissingEnvironmentVariable { .. })
        ));
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let mut config = AppConfig::default();
        config.pipeline.spam_concurrency = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
