use std::env;
use std::path::{Path, PathBuf};

use crate::store::schema;
use crate::types::models::FilterVariant;

/// Runtime configuration, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the flat-file data layout.
    pub data_path: PathBuf,

    /// Credentials for the historical price fallback. Empty means offline.
    pub coingecko_api_keys: Vec<String>,

    pub coingecko_api_url: String,

    pub requests_per_minute: u32,

    /// Concurrent market chart downloads.
    pub fetch_concurrency: usize,
}

impl Config {
    /// Environment variables:
    /// - `DATA_PATH` (default: data/)
    /// - `COINGECKO_API_KEYS` comma separated, or `COINGECKO_API_KEY`
    /// - `COINGECKO_API_URL` (default: https://pro-api.coingecko.com/api/v3)
    /// - `COINGECKO_REQUESTS_PER_MINUTE` (default: 30)
    /// - `FETCH_CONCURRENCY` (default: 2)
    pub fn from_env() -> Self {
        let keys = env::var("COINGECKO_API_KEYS")
            .or_else(|_| env::var("COINGECKO_API_KEY"))
            .unwrap_or_default();

        Self {
            data_path: env::var("DATA_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/")),

            coingecko_api_keys: parse_key_list(&keys),

            coingecko_api_url: env::var("COINGECKO_API_URL")
                .unwrap_or_else(|_| "https://pro-api.coingecko.com/api/v3".to_string()),

            requests_per_minute: env::var("COINGECKO_REQUESTS_PER_MINUTE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),

            fetch_concurrency: env::var("FETCH_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(2),
        }
    }

    /// Offline configuration rooted at `data_path`.
    pub fn with_data_path(data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            coingecko_api_keys: Vec::new(),
            coingecko_api_url: "https://pro-api.coingecko.com/api/v3".to_string(),
            requests_per_minute: 30,
            fetch_concurrency: 2,
        }
    }

    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.data_path.join(relative)
    }

    pub fn raw_holders_dir(&self) -> PathBuf {
        self.path(schema::RAW_HOLDERS_DIR)
    }

    pub fn processed_holders_dir(&self, variant: FilterVariant) -> PathBuf {
        self.path(schema::PROCESSED_HOLDERS_DIR).join(variant.as_str())
    }

    pub fn metrics_csv(&self, variant: FilterVariant) -> PathBuf {
        self.path(schema::METRICS_DIR)
            .join(format!("token_metrics_{}.csv", variant.as_str()))
    }

    pub fn market_data_file(&self, token_id: &str) -> PathBuf {
        self.path(schema::MARKET_DATA_DIR).join(format!("{}.json", token_id))
    }

    pub fn has_credentials(&self) -> bool {
        !self.coingecko_api_keys.is_empty()
    }
}

fn parse_key_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_list() {
        assert_eq!(parse_key_list(" a, b ,,c "), vec!["a", "b", "c"]);
        assert!(parse_key_list("").is_empty());
    }

    #[test]
    fn test_layout_paths() {
        let config = Config::with_data_path("/tmp/gov");
        assert_eq!(
            config.metrics_csv(FilterVariant::Unfiltered),
            PathBuf::from("/tmp/gov/metrics/token_metrics_unfiltered.csv")
        );
        assert_eq!(
            config.processed_holders_dir(FilterVariant::Filtered),
            PathBuf::from("/tmp/gov/processed/token_holders/filtered")
        );
        assert_eq!(
            config.market_data_file("aave"),
            PathBuf::from("/tmp/gov/raw/market_data/aave.json")
        );
        assert!(!config.has_credentials());
    }
}
