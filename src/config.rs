use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

pub const DEFAULT_ARXIV_URL: &str = "http://export.arxiv.org/api/query";
pub const DEFAULT_CATEGORIES: &str = "cs.AI,cs.CV,cs.CL,cs.LG,cs.IR,cs.NE,stat.ML";

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub arxiv_base_url: String,
    pub arxiv_max_results: u32,
    pub arxiv_timeout: Duration,
    pub data_dir: PathBuf,
    /// Age after which a cached paper is refetched.
    pub cache_ttl: Duration,
    /// Period of the background refresh. Zero disables it.
    pub update_interval: Duration,
    pub supported_categories: Vec<String>,
    pub vector_index_enabled: bool,
    pub llm_model: String,
    /// Ollama-compatible server. `None` selects the echo fallback.
    pub llm_base_url: Option<String>,
    pub llm_max_tokens: u32,
    pub llm_temperature: f32,
    pub llm_timeout: Duration,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            arxiv_base_url: DEFAULT_ARXIV_URL.into(),
            arxiv_max_results: 100,
            arxiv_timeout: Duration::from_secs(30),
            data_dir: PathBuf::from("./data/arxiv"),
            cache_ttl: Duration::from_secs(7 * 24 * 3600),
            update_interval: Duration::from_secs(24 * 3600),
            supported_categories: parse_list(DEFAULT_CATEGORIES),
            vector_index_enabled: true,
            llm_model: "qwen2:1.5b-instruct".into(),
            llm_base_url: None,
            llm_max_tokens: 512,
            llm_temperature: 0.3,
            llm_timeout: Duration::from_secs(120),
            log_level: "info".into(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let parsed = |key: &str| -> Result<Option<u64>> { parse_opt(key, get(key)) };
        let secs = |key: &str, default: Duration| -> Result<Duration> {
            Ok(parsed(key)?.map(Duration::from_secs).unwrap_or(default))
        };

        let config = Self {
            host: get("HOST").unwrap_or(defaults.host),
            port: parse_opt("PORT", get("PORT"))?.unwrap_or(defaults.port),
            arxiv_base_url: get("ARXIV_API_BASE_URL").unwrap_or(defaults.arxiv_base_url),
            arxiv_max_results: parse_opt("ARXIV_MAX_RESULTS", get("ARXIV_MAX_RESULTS"))?
                .unwrap_or(defaults.arxiv_max_results),
            arxiv_timeout: secs("ARXIV_REQUEST_TIMEOUT", defaults.arxiv_timeout)?,
            data_dir: get("KNOWLEDGE_BASE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            cache_ttl: secs("KNOWLEDGE_BASE_CACHE_TTL", defaults.cache_ttl)?,
            update_interval: secs("KNOWLEDGE_BASE_UPDATE_INTERVAL", defaults.update_interval)?,
            supported_categories: get("SUPPORTED_CATEGORIES")
                .map(|s| parse_list(&s))
                .unwrap_or(defaults.supported_categories),
            vector_index_enabled: parse_opt("VECTOR_INDEX_ENABLED", get("VECTOR_INDEX_ENABLED"))?
                .unwrap_or(defaults.vector_index_enabled),
            llm_model: get("LLM_MODEL_PATH").unwrap_or(defaults.llm_model),
            llm_base_url: get("LLM_BASE_URL").map(|u| u.trim_end_matches('/').to_string()),
            llm_max_tokens: parse_opt("LLM_MAX_TOKENS", get("LLM_MAX_TOKENS"))?
                .unwrap_or(defaults.llm_max_tokens),
            llm_temperature: parse_opt("LLM_TEMPERATURE", get("LLM_TEMPERATURE"))?
                .unwrap_or(defaults.llm_temperature),
            llm_timeout: secs("LLM_REQUEST_TIMEOUT", defaults.llm_timeout)?,
            log_level: get("LOG_LEVEL")
                .map(|l| l.to_lowercase())
                .unwrap_or(defaults.log_level),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.arxiv_base_url.is_empty() {
            bail!("ARXIV_API_BASE_URL must not be empty");
        }
        if self.arxiv_max_results == 0 {
            bail!("ARXIV_MAX_RESULTS must be greater than 0");
        }
        if self.arxiv_timeout.is_zero() {
            bail!("ARXIV_REQUEST_TIMEOUT must be greater than 0");
        }
        if self.cache_ttl.is_zero() {
            bail!("KNOWLEDGE_BASE_CACHE_TTL must be greater than 0");
        }
        if self.supported_categories.is_empty() {
            bail!("SUPPORTED_CATEGORIES must not be empty");
        }
        if self.llm_max_tokens == 0 {
            bail!("LLM_MAX_TOKENS must be greater than 0");
        }
        if !(0.0..=2.0).contains(&self.llm_temperature) {
            bail!("LLM_TEMPERATURE must be within [0, 2], got {}", self.llm_temperature);
        }
        if self.llm_timeout.is_zero() {
            bail!("LLM_REQUEST_TIMEOUT must be greater than 0");
        }
        Ok(())
    }

    pub fn cache_file(&self) -> PathBuf {
        self.data_dir.join("knowledge_cache.json")
    }
}

fn parse_opt<T>(key: &str, value: Option<String>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .map(|v| v.to_lowercase().parse::<T>().with_context(|| format!("invalid value for {}: {:?}", key, v)))
        .transpose()
}

fn parse_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.arxiv_base_url, DEFAULT_ARXIV_URL);
        assert_eq!(config.cache_ttl, Duration::from_secs(604_800));
        assert_eq!(config.supported_categories.len(), 7);
        assert!(config.llm_base_url.is_none());
        assert_eq!(config.cache_file(), PathBuf::from("./data/arxiv/knowledge_cache.json"));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "9001"),
            ("SUPPORTED_CATEGORIES", " cs.AI , ,hep-th "),
            ("VECTOR_INDEX_ENABLED", "False"),
            ("LLM_BASE_URL", "http://localhost:11434/"),
            ("LLM_TEMPERATURE", "0.7"),
            ("KNOWLEDGE_BASE_UPDATE_INTERVAL", "0"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9001);
        assert_eq!(config.supported_categories, vec!["cs.AI", "hep-th"]);
        assert!(!config.vector_index_enabled);
        assert_eq!(config.llm_base_url.as_deref(), Some("http://localhost:11434"));
        assert!((config.llm_temperature - 0.7).abs() < 1e-6);
        assert!(config.update_interval.is_zero());
    }

    #[test]
    fn test_bad_number_names_the_variable() {
        let err = Config::from_lookup(lookup(&[("ARXIV_MAX_RESULTS", "lots")])).unwrap_err();
        assert!(err.to_string().contains("ARXIV_MAX_RESULTS"));
    }

    #[test]
    fn test_validation_rejects_non_positive_values() {
        assert!(Config::from_lookup(lookup(&[("ARXIV_MAX_RESULTS", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[("ARXIV_REQUEST_TIMEOUT", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[("LLM_TEMPERATURE", "3.5")])).is_err());
        assert!(Config::from_lookup(lookup(&[("SUPPORTED_CATEGORIES", " , ")])).is_err());
    }
}
