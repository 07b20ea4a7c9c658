//! Configuration for the resolve pipeline.
//!
//! Everything the core consumes is an enumerated, validated option. Structs
//! carry the documented defaults and can be built from `NTTP_*` environment
//! variables; `.env` file loading is the embedding application's business.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

use crate::db::Dialect;

/// Why a configuration could not be assembled.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {setting}: {reason}")]
    Invalid {
        setting: String,
        value: String,
        reason: String,
    },

    #[error("configuration constraint violated: {0}")]
    Constraint(#[from] validator::ValidationErrors),

    #[error("unsupported configuration: {0}")]
    Unsupported(String),
}

/// LLM vendors the pipeline can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
    Cohere,
    Mistral,
    Google,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::OpenAi => "openai",
            LlmProvider::Cohere => "cohere",
            LlmProvider::Mistral => "mistral",
            LlmProvider::Google => "google",
        }
    }
}

impl FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" => Ok(LlmProvider::Anthropic),
            "openai" => Ok(LlmProvider::OpenAi),
            "cohere" => Ok(LlmProvider::Cohere),
            "mistral" => Ok(LlmProvider::Mistral),
            "google" => Ok(LlmProvider::Google),
            other => Err(ConfigError::Invalid {
                setting: "llm.provider".to_string(),
                value: other.to_string(),
                reason: "expected anthropic, openai, cohere, mistral or google".to_string(),
            }),
        }
    }
}

/// Database driver selection.
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub driver: Dialect,
    /// Connection string for the selected driver.
    #[validate(length(min = 1, message = "database URL cannot be empty"))]
    pub url: String,
}

/// Generation LLM settings.
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    #[validate(length(min = 1, message = "LLM model cannot be empty"))]
    pub model: String,
    pub api_key: String,
    #[validate(range(min = 1, max = 1_000_000, message = "max_tokens out of range"))]
    pub max_tokens: u32,
    /// Override the provider endpoint (self-hosted gateways, tests).
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            provider: LlmProvider::OpenAi,
            model: String::new(),
            api_key: String::new(),
            max_tokens: 2048,
            base_url: None,
        }
    }
}

/// Exact (L1) cache settings.
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(default)]
pub struct L1Config {
    pub enabled: bool,
    #[validate(range(min = 1, message = "L1 max_size must be positive"))]
    pub max_size: usize,
    /// Redis connection string; switches L1 to the external-KV variant.
    pub external_kv_url: Option<String>,
    /// Sliding TTL for KV entries. 24h default, 7d ceiling.
    #[validate(range(min = 60, max = 604_800, message = "L1 TTL must be 60s..7d"))]
    pub ttl_secs: u64,
}

impl Default for L1Config {
    fn default() -> Self {
        L1Config {
            enabled: true,
            max_size: 1000,
            external_kv_url: None,
            ttl_secs: 86_400,
        }
    }
}

/// Semantic (L2) cache settings.
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(default)]
pub struct L2Config {
    pub enabled: bool,
    /// Embedding provider; falls back to the generation provider's API key
    /// when `api_key` is unset.
    pub provider: Option<LlmProvider>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    #[validate(range(min = 1, message = "L2 max_size must be positive"))]
    pub max_size: usize,
    /// Minimum cosine similarity for a semantic hit.
    #[validate(range(min = 0.0, max = 1.0, message = "threshold must be within 0..1"))]
    pub threshold: f32,
}

impl Default for L2Config {
    fn default() -> Self {
        L2Config {
            enabled: false,
            provider: None,
            model: None,
            api_key: None,
            max_size: 500,
            threshold: 0.85,
        }
    }
}

#[derive(Debug, Clone, Default, Validate, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    #[validate(nested)]
    pub l1: L1Config,
    #[validate(nested)]
    pub l2: L2Config,
}

/// Input and result bounds.
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    #[validate(range(min = 1, max = 100_000, message = "max_query_length out of range"))]
    pub max_query_length: usize,
    #[validate(range(min = 1, message = "default_limit must be positive"))]
    pub default_limit: u64,
    #[validate(range(min = 1, message = "max_limit must be positive"))]
    pub max_limit: u64,
    /// Wall-clock cap for one resolve call.
    #[validate(range(min = 1, max = 3600, message = "request timeout must be 1s..1h"))]
    pub request_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            max_query_length: 500,
            default_limit: 100,
            max_limit: 1000,
            request_timeout_secs: 60,
        }
    }
}

impl LimitsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Per-call dollar estimates used for the savings statistic. Configuration,
/// not hard-coded truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    /// Value of an L1 hit.
    pub l1_hit: f64,
    /// Cost of one embedding call.
    pub embed: f64,
    /// Cost of one SQL generation call.
    pub generate: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        CostConfig {
            l1_hit: 0.0,
            embed: 0.0001,
            generate: 0.01,
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub costs: CostConfig,
}

impl Config {
    /// Minimal config: a database plus a generation LLM, defaults elsewhere.
    pub fn new(database: DatabaseConfig, llm: LlmConfig) -> Self {
        Config {
            database,
            llm,
            cache: CacheConfig::default(),
            limits: LimitsConfig::default(),
            costs: CostConfig::default(),
        }
    }

    /// Validate every section plus cross-section requirements.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.llm.validate()?;
        self.cache.validate()?;
        self.limits.validate()?;

        if self.cache.l2.enabled {
            if self.cache.l2.provider.is_none() {
                return Err(ConfigError::Missing("cache.l2.provider"));
            }
            if self.cache.l2.model.as_deref().unwrap_or("").is_empty() {
                return Err(ConfigError::Missing("cache.l2.model"));
            }
        }
        Ok(())
    }

    /// Build the full configuration from `NTTP_*` environment variables.
    /// Unset optional variables fall back to the documented defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw_driver = required_env("NTTP_DATABASE_DRIVER")?;
        let driver: Dialect =
            raw_driver
                .parse()
                .map_err(|e: crate::db::DbError| ConfigError::Invalid {
                    setting: "NTTP_DATABASE_DRIVER".to_string(),
                    value: raw_driver.clone(),
                    reason: e.to_string(),
                })?;

        let llm_d = LlmConfig::default();
        let l1_d = L1Config::default();
        let l2_d = L2Config::default();
        let limits_d = LimitsConfig::default();
        let costs_d = CostConfig::default();

        let config = Config {
            database: DatabaseConfig {
                driver,
                url: required_env("NTTP_DATABASE_URL")?,
            },
            llm: LlmConfig {
                provider: required_env("NTTP_LLM_PROVIDER")?.parse()?,
                model: required_env("NTTP_LLM_MODEL")?,
                api_key: env::var("NTTP_LLM_API_KEY").unwrap_or_default(),
                max_tokens: env_or("NTTP_LLM_MAX_TOKENS", llm_d.max_tokens)?,
                base_url: env::var("NTTP_LLM_BASE_URL").ok(),
            },
            cache: CacheConfig {
                l1: L1Config {
                    enabled: env_or("NTTP_L1_ENABLED", l1_d.enabled)?,
                    max_size: env_or("NTTP_L1_MAX_SIZE", l1_d.max_size)?,
                    external_kv_url: env::var("NTTP_L1_KV_URL").ok(),
                    ttl_secs: env_or("NTTP_L1_TTL_SECS", l1_d.ttl_secs)?,
                },
                l2: L2Config {
                    enabled: env_or("NTTP_L2_ENABLED", l2_d.enabled)?,
                    provider: match env::var("NTTP_L2_PROVIDER") {
                        Ok(v) => Some(v.parse()?),
                        Err(_) => None,
                    },
                    model: env::var("NTTP_L2_MODEL").ok(),
                    api_key: env::var("NTTP_L2_API_KEY").ok(),
                    max_size: env_or("NTTP_L2_MAX_SIZE", l2_d.max_size)?,
                    threshold: env_or("NTTP_L2_THRESHOLD", l2_d.threshold)?,
                },
            },
            limits: LimitsConfig {
                max_query_length: env_or("NTTP_MAX_QUERY_LENGTH", limits_d.max_query_length)?,
                default_limit: env_or("NTTP_DEFAULT_LIMIT", limits_d.default_limit)?,
                max_limit: env_or("NTTP_MAX_LIMIT", limits_d.max_limit)?,
                request_timeout_secs: env_or(
                    "NTTP_REQUEST_TIMEOUT_SECS",
                    limits_d.request_timeout_secs,
                )?,
            },
            costs: CostConfig {
                l1_hit: env_or("NTTP_COST_L1_HIT", costs_d.l1_hit)?,
                embed: env_or("NTTP_COST_EMBED", costs_d.embed)?,
                generate: env_or("NTTP_COST_GENERATE", costs_d.generate)?,
            },
        };

        config.validate()?;
        Ok(config)
    }
}

/// A variable the configuration cannot do without.
fn required_env(key: &'static str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::Missing(key))
}

/// Read `key` and parse it into `T`, keeping the typed `fallback` when the
/// variable is unset. A set-but-unparseable value is an error rather than a
/// silent fallback.
fn env_or<T>(key: &str, fallback: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = match env::var(key) {
        Ok(raw) => raw,
        Err(_) => return Ok(fallback),
    };
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        setting: key.to_string(),
        value: raw.clone(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    fn minimal_config() -> Config {
        Config::new(
            DatabaseConfig {
                driver: Dialect::Sqlite,
                url: "sqlite::memory:".to_string(),
            },
            LlmConfig {
                provider: LlmProvider::OpenAi,
                model: "gpt-4o-mini".to_string(),
                api_key: "key".to_string(),
                ..LlmConfig::default()
            },
        )
    }

    #[test]
    fn test_defaults_match_the_documented_values() {
        let config = minimal_config();
        assert!(config.cache.l1.enabled);
        assert_eq!(config.cache.l1.max_size, 1000);
        assert!(!config.cache.l2.enabled);
        assert_eq!(config.cache.l2.max_size, 500);
        assert_eq!(config.cache.l2.threshold, 0.85);
        assert_eq!(config.limits.max_query_length, 500);
        assert_eq!(config.limits.default_limit, 100);
        assert_eq!(config.limits.max_limit, 1000);
        assert_eq!(config.llm.max_tokens, 2048);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_l2_enabled_requires_provider_and_model() {
        let mut config = minimal_config();
        config.cache.l2.enabled = true;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("cache.l2.provider"))
        ));

        config.cache.l2.provider = Some(LlmProvider::OpenAi);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("cache.l2.model"))
        ));

        config.cache.l2.model = Some("text-embedding-3-small".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_threshold_out_of_range_is_rejected() {
        let mut config = minimal_config();
        config.cache.l2.threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_provider_names_round_trip() {
        for name in ["anthropic", "openai", "cohere", "mistral", "google"] {
            let provider: LlmProvider = name.parse().unwrap();
            assert_eq!(provider.as_str(), name);
        }
        assert!("grok".parse::<LlmProvider>().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_reads_the_nttp_namespace() {
        let vars = [
            ("NTTP_DATABASE_DRIVER", "sqlite"),
            ("NTTP_DATABASE_URL", "sqlite::memory:"),
            ("NTTP_LLM_PROVIDER", "anthropic"),
            ("NTTP_LLM_MODEL", "claude-sonnet-4-5"),
            ("NTTP_LLM_API_KEY", "secret"),
            ("NTTP_L1_MAX_SIZE", "25"),
        ];
        for (k, v) in vars {
            env::set_var(k, v);
        }

        let config = Config::from_env().unwrap();
        assert_eq!(config.database.driver, Dialect::Sqlite);
        assert_eq!(config.llm.provider, LlmProvider::Anthropic);
        assert_eq!(config.cache.l1.max_size, 25);
        assert_eq!(config.limits.request_timeout_secs, 60);

        for (k, _) in vars {
            env::remove_var(k);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_requires_the_database_settings() {
        env::remove_var("NTTP_DATABASE_DRIVER");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("NTTP_DATABASE_DRIVER"))
        ));
    }
}
