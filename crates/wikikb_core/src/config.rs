use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::filter::TermFilter;

pub const DEFAULT_CONFIG_FILENAME: &str = "wikikb.toml";
pub const DEFAULT_API_URL_TEMPLATE: &str = "https://{lang}.wikipedia.org/w/api.php";
pub const DEFAULT_USER_AGENT: &str = "wikikb/0.1 (offline term base builder)";
pub const DEFAULT_HOME_LANGUAGE: &str = "zh";
pub const DEFAULT_FALLBACK_LANGUAGE: &str = "en";

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MIN_REQUEST_INTERVAL_MS: u64 = 100;
const DEFAULT_FETCH_RETRIES: usize = 3;
const DEFAULT_BACKOFF_STEP_MS: u64 = 2_000;
const DEFAULT_FULL_DELAY_MS: u64 = 1_200;
const DEFAULT_PATCH_DELAY_MS: u64 = 1_500;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct KbConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub fetch: FetchSection,
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub filter: FilterSection,
    #[serde(default)]
    pub proxy: ProxySection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url_template: Option<String>,
    pub user_agent: Option<String>,
    pub home_language: Option<String>,
    pub fallback_language: Option<String>,
    pub timeout_ms: Option<u64>,
    pub min_request_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct FetchSection {
    pub retries: Option<usize>,
    pub backoff_step_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct RunSection {
    pub full_delay_ms: Option<u64>,
    pub patch_delay_ms: Option<u64>,
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct FilterSection {
    pub max_chars: Option<usize>,
    pub markers: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ProxySection {
    pub http: Option<String>,
    pub https: Option<String>,
}

impl KbConfig {
    /// Resolve the API endpoint template: env WIKIKB_API_URL_TEMPLATE > config > default.
    /// `{lang}` is replaced by the language code of each request.
    pub fn api_url_template(&self) -> String {
        env_string("WIKIKB_API_URL_TEMPLATE")
            .or_else(|| self.wiki.api_url_template.clone())
            .unwrap_or_else(|| DEFAULT_API_URL_TEMPLATE.to_string())
    }

    pub fn user_agent(&self) -> String {
        env_string("WIKIKB_USER_AGENT")
            .or_else(|| self.wiki.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    /// Resolve the home language: env WIKIKB_HOME_LANG > config > `zh`.
    pub fn home_language(&self) -> String {
        env_string("WIKIKB_HOME_LANG")
            .or_else(|| self.wiki.home_language.clone())
            .unwrap_or_else(|| DEFAULT_HOME_LANGUAGE.to_string())
    }

    /// Resolve the fallback language: env WIKIKB_FALLBACK_LANG > config > `en`.
    pub fn fallback_language(&self) -> String {
        env_string("WIKIKB_FALLBACK_LANG")
            .or_else(|| self.wiki.fallback_language.clone())
            .unwrap_or_else(|| DEFAULT_FALLBACK_LANGUAGE.to_string())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(
            env_u64("WIKIKB_HTTP_TIMEOUT_MS")
                .or(self.wiki.timeout_ms)
                .unwrap_or(DEFAULT_TIMEOUT_MS),
        )
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(
            env_u64("WIKIKB_MIN_REQUEST_INTERVAL_MS")
                .or(self.wiki.min_request_interval_ms)
                .unwrap_or(DEFAULT_MIN_REQUEST_INTERVAL_MS),
        )
    }

    /// Total attempts per term in the home language, never less than one.
    pub fn fetch_retries(&self) -> usize {
        env_usize("WIKIKB_FETCH_RETRIES")
            .or(self.fetch.retries)
            .unwrap_or(DEFAULT_FETCH_RETRIES)
            .max(1)
    }

    pub fn backoff_step(&self) -> Duration {
        Duration::from_millis(
            env_u64("WIKIKB_BACKOFF_STEP_MS")
                .or(self.fetch.backoff_step_ms)
                .unwrap_or(DEFAULT_BACKOFF_STEP_MS),
        )
    }

    pub fn full_delay(&self) -> Duration {
        Duration::from_millis(
            env_u64("WIKIKB_FULL_DELAY_MS")
                .or(self.run.full_delay_ms)
                .unwrap_or(DEFAULT_FULL_DELAY_MS),
        )
    }

    pub fn patch_delay(&self) -> Duration {
        Duration::from_millis(
            env_u64("WIKIKB_PATCH_DELAY_MS")
                .or(self.run.patch_delay_ms)
                .unwrap_or(DEFAULT_PATCH_DELAY_MS),
        )
    }

    pub fn output_dir(&self) -> PathBuf {
        env_string("WIKIKB_OUTPUT_DIR")
            .map(PathBuf::from)
            .or_else(|| self.run.output_dir.clone())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn http_proxy(&self) -> Option<String> {
        env_string("WIKIKB_HTTP_PROXY").or_else(|| non_empty(self.proxy.http.as_deref()))
    }

    pub fn https_proxy(&self) -> Option<String> {
        env_string("WIKIKB_HTTPS_PROXY").or_else(|| non_empty(self.proxy.https.as_deref()))
    }

    /// Build the term filter for the home language, applying `[filter]` overrides.
    pub fn term_filter(&self) -> TermFilter {
        let mut filter = TermFilter::for_language(&self.home_language());
        if let Some(max_chars) = self.filter.max_chars {
            filter.max_chars = max_chars;
        }
        if let Some(markers) = &self.filter.markers {
            filter.markers = markers
                .iter()
                .filter(|marker| !marker.is_empty())
                .cloned()
                .collect();
        }
        filter
    }
}

/// Load and parse a KbConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<KbConfig> {
    if !config_path.exists() {
        return Ok(KbConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: KbConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().as_deref().and_then(|value| non_empty(Some(value)))
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/wikikb.toml")).expect("load config");
        assert_eq!(config, KbConfig::default());
    }

    #[test]
    fn load_config_parses_all_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("wikikb.toml");
        fs::write(
            &config_path,
            r#"
[wiki]
api_url_template = "https://{lang}.example.org/w/api.php"
user_agent = "test-agent/1.0"
home_language = "ja"
fallback_language = "de"

[fetch]
retries = 5
backoff_step_ms = 10

[run]
full_delay_ms = 0
patch_delay_ms = 0
output_dir = "out"

[filter]
max_chars = 12
markers = ["一覧"]

[proxy]
http = "http://proxy:7890"
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(
            config.wiki.api_url_template.as_deref(),
            Some("https://{lang}.example.org/w/api.php")
        );
        assert_eq!(config.wiki.home_language.as_deref(), Some("ja"));
        assert_eq!(config.fetch.retries, Some(5));
        assert_eq!(config.run.output_dir, Some(PathBuf::from("out")));
        assert_eq!(config.proxy.http.as_deref(), Some("http://proxy:7890"));
        assert!(config.proxy.https.is_none());

        let filter = config.term_filter();
        assert_eq!(filter.max_chars, 12);
        assert_eq!(filter.markers, vec!["一覧".to_string()]);
    }

    #[test]
    fn load_config_tolerates_partial_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("wikikb.toml");
        fs::write(&config_path, "[run]\nfull_delay_ms = 50\n").expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.run.full_delay_ms, Some(50));
        assert!(config.wiki.home_language.is_none());
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("wikikb.toml");
        fs::write(&config_path, "[wiki\nhome_language = \"zh\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn default_filter_follows_home_language() {
        let config = KbConfig::default();
        assert_eq!(
            config.term_filter(),
            TermFilter::for_language(&config.home_language())
        );
    }

    #[test]
    fn blank_proxy_entries_are_ignored() {
        let config = KbConfig {
            proxy: ProxySection {
                http: Some("   ".to_string()),
                https: None,
            },
            ..KbConfig::default()
        };
        if env::var("WIKIKB_HTTP_PROXY").is_err() {
            assert!(config.http_proxy().is_none());
        }
    }

    #[test]
    fn zero_retries_still_allows_one_attempt() {
        let config = KbConfig {
            fetch: FetchSection {
                retries: Some(0),
                backoff_step_ms: None,
            },
            ..KbConfig::default()
        };
        if env::var("WIKIKB_FETCH_RETRIES").is_err() {
            assert_eq!(config.fetch_retries(), 1);
        }
    }
}
