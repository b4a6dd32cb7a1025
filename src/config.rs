use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;
use crate::eutils::EntrezConfig;
use crate::resolver::{DEFAULT_FETCH_PAGE_SIZE, MAX_LINK_CHUNK_SIZE, ResolverConfig};
use crate::retry::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY, RetryPolicy};
use crate::taxdb::DEFAULT_POPULATE_CHUNK_SIZE;

pub const DEFAULT_CONFIG_FILE: &str = "kira-tax.json";

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub taxid_db: Option<Utf8PathBuf>,
    #[serde(default)]
    pub cache: Option<Utf8PathBuf>,
    #[serde(default)]
    pub link_chunk_size: Option<usize>,
    #[serde(default)]
    pub fetch_page_size: Option<usize>,
    #[serde(default)]
    pub populate_chunk_size: Option<usize>,
    #[serde(default)]
    pub retry: Option<RetryEntry>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetryEntry {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub delay_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub entrez: EntrezConfig,
    pub resolver: ResolverConfig,
    pub populate_chunk_size: usize,
    pub taxid_db: Option<Utf8PathBuf>,
    pub cache: Option<Utf8PathBuf>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// An explicit path must exist; without one, a missing `kira-tax.json`
    /// falls back to defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if !config_path.exists() {
            if path.is_some() {
                return Err(KiraError::ConfigRead(config_path));
            }
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, KiraError> {
        let link_chunk_size = config.link_chunk_size.unwrap_or(MAX_LINK_CHUNK_SIZE);
        if link_chunk_size == 0 || link_chunk_size > MAX_LINK_CHUNK_SIZE {
            return Err(KiraError::InvalidConfig(format!(
                "link_chunk_size must be between 1 and {MAX_LINK_CHUNK_SIZE}, got {link_chunk_size}"
            )));
        }
        let fetch_page_size = positive(
            "fetch_page_size",
            config.fetch_page_size,
            DEFAULT_FETCH_PAGE_SIZE,
        )?;
        let populate_chunk_size = positive(
            "populate_chunk_size",
            config.populate_chunk_size,
            DEFAULT_POPULATE_CHUNK_SIZE,
        )?;

        let retry_entry = config.retry.unwrap_or_default();
        let max_attempts = retry_entry.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        if max_attempts == 0 {
            return Err(KiraError::InvalidConfig(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        let retry = RetryPolicy {
            max_attempts,
            delay: retry_entry
                .delay_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RETRY_DELAY),
        };

        let api_key = config.api_key.or_else(|| {
            std::env::var("NCBI_API_KEY")
                .ok()
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty())
        });

        let defaults = EntrezConfig::default();
        let entrez = EntrezConfig {
            tool: config.tool.unwrap_or(defaults.tool.clone()),
            email: config.email,
            api_key,
            retry,
            ..defaults
        };

        Ok(ResolvedConfig {
            entrez,
            resolver: ResolverConfig {
                link_chunk_size,
                fetch_page_size,
            },
            populate_chunk_size,
            taxid_db: config.taxid_db,
            cache: config.cache,
        })
    }
}

fn positive(name: &str, value: Option<usize>, default: usize) -> Result<usize, KiraError> {
    match value {
        Some(0) => Err(KiraError::InvalidConfig(format!("{name} must be at least 1"))),
        Some(value) => Ok(value),
        None => Ok(default),
    }
}

/// `~/.cache/kira-taxonomy/taxids.db`, used when no database path is given.
pub fn default_taxid_db_path() -> Result<Utf8PathBuf, KiraError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(
                dirs.home_dir()
                    .join(".cache")
                    .join("kira-taxonomy")
                    .join("taxids.db"),
            )
            .ok()
        })
        .ok_or_else(|| KiraError::Filesystem("unable to resolve cache directory".to_string()))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_when_empty() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.resolver.link_chunk_size, MAX_LINK_CHUNK_SIZE);
        assert_eq!(resolved.resolver.fetch_page_size, DEFAULT_FETCH_PAGE_SIZE);
        assert_eq!(resolved.entrez.retry, RetryPolicy::default());
        assert_eq!(resolved.entrez.tool, "kira-tax");
        assert!(resolved.taxid_db.is_none());
    }

    #[test]
    fn rejects_oversized_link_chunk() {
        let config = Config {
            link_chunk_size: Some(MAX_LINK_CHUNK_SIZE + 1),
            ..Config::default()
        };
        assert_matches!(
            ConfigLoader::resolve_config(config).unwrap_err(),
            KiraError::InvalidConfig(_)
        );
    }
}
