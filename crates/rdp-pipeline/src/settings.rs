use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use rdp_llm::{OpenRouterConfig, RetryConfig, DEFAULT_BASE_URL};
use secrecy::SecretString;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
    Testing,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "staging" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            "testing" | "test" => Ok(Self::Testing),
            other => Err(format!("unknown APP_ENV {other:?}")),
        }
    }
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
            Self::Testing => "testing",
        }
    }

    fn defaults(self) -> EnvironmentDefaults {
        match self {
            Self::Development => EnvironmentDefaults {
                model: "google/gemini-2.5-flash",
                batch_size: 3,
                max_retries: 2,
                cache_size: 16,
                timeout_secs: 30,
                batch_delay_ms: 1000,
            },
            Self::Staging => EnvironmentDefaults {
                model: "google/gemini-2.5-flash",
                batch_size: 5,
                max_retries: 3,
                cache_size: 32,
                timeout_secs: 45,
                batch_delay_ms: 500,
            },
            Self::Production => EnvironmentDefaults {
                model: "google/gemini-2.5-flash",
                batch_size: 5,
                max_retries: 3,
                cache_size: 64,
                timeout_secs: 60,
                batch_delay_ms: 500,
            },
            Self::Testing => EnvironmentDefaults {
                model: "test/mock-model",
                batch_size: 2,
                max_retries: 1,
                cache_size: 4,
                timeout_secs: 5,
                batch_delay_ms: 0,
            },
        }
    }
}

struct EnvironmentDefaults {
    model: &'static str,
    batch_size: usize,
    max_retries: u32,
    cache_size: usize,
    timeout_secs: u64,
    batch_delay_ms: u64,
}

pub const DEFAULT_FALLBACK_MODELS: &[&str] = &["openai/gpt-4o-mini", "anthropic/claude-3-haiku"];

/// Process-wide runtime settings, read once at startup.
#[derive(Debug, Clone)]
pub struct ProfilerSettings {
    pub environment: Environment,
    pub default_model: String,
    pub fallback_models: Vec<String>,
    pub batch_size: usize,
    pub max_retries: u32,
    pub cache_size: usize,
    pub timeout: Duration,
    pub max_concurrent: usize,
    pub batch_delay: Duration,
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub database_url: Option<String>,
    pub workspace_root: PathBuf,
}

impl ProfilerSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = match var("APP_ENV").map(|v| v.parse::<Environment>()) {
            Some(Ok(env)) => env,
            Some(Err(err)) => {
                warn!(%err, "falling back to development settings");
                Environment::Development
            }
            None => Environment::Development,
        };
        let defaults = environment.defaults();

        let fallback_models = match var("LLM_FALLBACK_MODELS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect(),
            None => DEFAULT_FALLBACK_MODELS.iter().map(|m| m.to_string()).collect(),
        };

        Self {
            environment,
            default_model: var("LLM_DEFAULT_MODEL").unwrap_or_else(|| defaults.model.to_string()),
            fallback_models,
            batch_size: parsed(&var, "LLM_BATCH_SIZE", defaults.batch_size).max(1),
            max_retries: parsed(&var, "LLM_MAX_RETRIES", defaults.max_retries).max(1),
            cache_size: parsed(&var, "LLM_CACHE_SIZE", defaults.cache_size).max(1),
            timeout: Duration::from_secs(parsed(&var, "LLM_TIMEOUT_SECS", defaults.timeout_secs)),
            max_concurrent: parsed(&var, "LLM_MAX_CONCURRENT", 3usize).max(1),
            batch_delay: Duration::from_millis(parsed(
                &var,
                "LLM_BATCH_DELAY_MS",
                defaults.batch_delay_ms,
            )),
            api_key: var("OPENROUTER_API_KEY").map(SecretString::from),
            base_url: var("OPENROUTER_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            database_url: var("DATABASE_URL"),
            workspace_root: var("RDP_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retries,
            fallback_models: self.fallback_models.clone(),
            ..RetryConfig::default()
        }
    }

    pub fn openrouter_config(&self) -> Result<OpenRouterConfig> {
        let api_key = self
            .api_key
            .clone()
            .ok_or_else(|| anyhow!("OPENROUTER_API_KEY is not set"))?;
        let mut config = OpenRouterConfig::new(api_key);
        config.base_url = self.base_url.clone();
        Ok(config)
    }

    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| anyhow!("DATABASE_URL is not set"))
    }
}

fn parsed<T: FromStr + Copy>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match var(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "ignoring unparsable setting");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> ProfilerSettings {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ProfilerSettings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn environment_selects_defaults() {
        let dev = settings(&[]);
        assert_eq!(dev.environment, Environment::Development);
        assert_eq!(dev.batch_size, 3);
        assert_eq!(dev.fallback_models.len(), 2);
        assert!(dev.api_key.is_none());

        let prod = settings(&[("APP_ENV", "production")]);
        assert_eq!(prod.batch_size, 5);
        assert_eq!(prod.cache_size, 64);
        assert_eq!(prod.timeout, Duration::from_secs(60));
    }

    #[test]
    fn overrides_win_and_bad_values_fall_back() {
        let s = settings(&[
            ("APP_ENV", "testing"),
            ("LLM_DEFAULT_MODEL", "mistral/small"),
            ("LLM_FALLBACK_MODELS", "a/one, ,b/two"),
            ("LLM_BATCH_SIZE", "many"),
            ("LLM_MAX_RETRIES", "4"),
            ("OPENROUTER_API_KEY", "sk-test"),
        ]);
        assert_eq!(s.default_model, "mistral/small");
        assert_eq!(s.fallback_models, vec!["a/one", "b/two"]);
        assert_eq!(s.batch_size, 2);
        assert_eq!(s.retry_config().max_attempts, 4);
        let config = s.openrouter_config().unwrap();
        assert_eq!(config.api_key.expose_secret(), "sk-test");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn unknown_environment_is_development() {
        assert_eq!(settings(&[("APP_ENV", "qa")]).environment, Environment::Development);
        assert!(settings(&[]).require_database_url().is_err());
    }
}
