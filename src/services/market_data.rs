use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use futures::stream::StreamExt;
use governor::{clock::DefaultClock, state::{InMemoryState, NotKeyed}, Quota, RateLimiter};
use nonzero_ext::nonzero;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Mutex;
use tokio::time::Duration;

use crate::config::Config;
use crate::store::models::MarketChartRecord;
use crate::store::operations::write_market_chart;
use crate::store::queries::load_market_chart;
use crate::types::models::{unix_millis_to_date, MarketQuote};

fn usable(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

/// Daily price and market cap series of one token.
#[derive(Debug, Clone, Default)]
pub struct MarketSeries {
    prices: Vec<(NaiveDate, Option<f64>)>,
    market_caps: Vec<(NaiveDate, Option<f64>)>,
}

impl MarketSeries {
    pub fn from_chart(chart: &MarketChartRecord) -> Self {
        let by_date = |points: &[(f64, Option<f64>)]| -> Vec<(NaiveDate, Option<f64>)> {
            points
                .iter()
                .filter_map(|(ts, value)| unix_millis_to_date(*ts as i64).map(|d| (d, *value)))
                .collect()
        };
        Self {
            prices: by_date(&chart.prices),
            market_caps: by_date(&chart.market_caps),
        }
    }

    /// First entry dated exactly `date`, if its value is present and positive.
    fn exact(points: &[(NaiveDate, Option<f64>)], date: NaiveDate) -> Option<f64> {
        points
            .iter()
            .find(|(d, _)| *d == date)
            .and_then(|(_, value)| usable(*value))
    }

    pub fn price_on(&self, date: NaiveDate) -> Option<f64> {
        Self::exact(&self.prices, date)
    }

    pub fn market_cap_on(&self, date: NaiveDate) -> Option<f64> {
        Self::exact(&self.market_caps, date)
    }

    /// A quote only when both price and market cap resolve for `date`.
    pub fn quote_on(&self, date: NaiveDate) -> Option<MarketQuote> {
        Some(MarketQuote {
            price: self.price_on(date)?,
            market_cap: self.market_cap_on(date)?,
        })
    }
}

/// Point-in-time price lookups used when the daily series has no usable
/// entry for a date.
#[allow(async_fn_in_trait)]
pub trait PriceOracle {
    async fn historical_quote(&self, token_id: &str, date: NaiveDate) -> Result<Option<MarketQuote>>;
}

/// Oracle used without credentials: never has data.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineOracle;

impl PriceOracle for OfflineOracle {
    async fn historical_quote(&self, _token_id: &str, _date: NaiveDate) -> Result<Option<MarketQuote>> {
        Ok(None)
    }
}

#[derive(Debug, Clone)]
struct Credential {
    key: String,
    exhausted: bool,
}

/// API keys in priority order. A key is marked exhausted when the provider
/// rejects it or reports its quota spent.
#[derive(Debug, Clone, Default)]
pub struct CredentialPool {
    credentials: Vec<Credential>,
}

impl CredentialPool {
    pub fn new(keys: &[String]) -> Self {
        Self {
            credentials: keys
                .iter()
                .map(|key| Credential { key: key.clone(), exhausted: false })
                .collect(),
        }
    }

    /// First key not yet exhausted.
    pub fn next(&self) -> Option<&str> {
        self.credentials
            .iter()
            .find(|c| !c.exhausted)
            .map(|c| c.key.as_str())
    }

    pub fn mark_exhausted(&mut self, key: &str) {
        for credential in self.credentials.iter_mut().filter(|c| c.key == key) {
            credential.exhausted = true;
        }
    }

    pub fn available(&self) -> usize {
        self.credentials.iter().filter(|c| !c.exhausted).count()
    }
}

/// Rate-limited retries of one request before its key is given up on.
const MAX_RATE_LIMITED_RETRIES: u32 = 3;

/// What to do with a CoinGecko response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseAction {
    Accept,
    NotFound,
    /// Key rejected; rotate to the next one.
    Exhaust,
    /// Rate limited; wait and retry with the same key.
    Backoff(Duration),
    Fail,
}

/// `rate_limited` is the number of 429s already seen for this request and
/// key. Backoff doubles from 2s; a key that keeps hitting 429 is rotated.
fn response_action(status: u16, rate_limited: u32) -> ResponseAction {
    match status {
        200..=299 => ResponseAction::Accept,
        404 => ResponseAction::NotFound,
        401 | 403 => ResponseAction::Exhaust,
        429 if rate_limited < MAX_RATE_LIMITED_RETRIES => {
            ResponseAction::Backoff(Duration::from_secs(2u64 << rate_limited))
        }
        429 => ResponseAction::Exhaust,
        _ => ResponseAction::Fail,
    }
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    market_data: Option<HistoryMarketData>,
}

#[derive(Debug, Deserialize)]
struct HistoryMarketData {
    #[serde(default)]
    current_price: HashMap<String, Option<f64>>,
    #[serde(default)]
    market_cap: HashMap<String, Option<f64>>,
}

/// CoinGecko client, rate limited and rotating over a credential pool.
pub struct CoinGeckoClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Mutex<CredentialPool>,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl CoinGeckoClient {
    /// `None` when no credentials are configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        if !config.has_credentials() {
            return None;
        }
        let per_minute = NonZeroU32::new(config.requests_per_minute).unwrap_or(nonzero!(30u32));
        Some(Self {
            http: reqwest::Client::new(),
            base_url: config.coingecko_api_url.trim_end_matches('/').to_string(),
            credentials: Mutex::new(CredentialPool::new(&config.coingecko_api_keys)),
            rate_limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
        })
    }

    fn next_key(&self) -> Option<String> {
        let pool = self.credentials.lock().unwrap_or_else(|e| e.into_inner());
        pool.next().map(str::to_string)
    }

    fn exhaust(&self, key: &str) {
        let mut pool = self.credentials.lock().unwrap_or_else(|e| e.into_inner());
        pool.mark_exhausted(key);
        tracing::warn!("CoinGecko key exhausted, {} remaining", pool.available());
    }

    /// GET `path`; `Ok(None)` when the resource does not exist.
    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<Option<T>> {
        let url = format!("{}/{}", self.base_url, path);
        let mut rate_limited = 0;
        loop {
            let key = self
                .next_key()
                .ok_or_else(|| anyhow!("All CoinGecko credentials are exhausted"))?;

            self.rate_limiter.until_ready().await;
            let response = self
                .http
                .get(&url)
                .query(query)
                .header("accept", "application/json")
                .header("x-cg-pro-api-key", &key)
                .send()
                .await?;

            let status = response.status();
            match response_action(status.as_u16(), rate_limited) {
                ResponseAction::Accept => return Ok(Some(response.json::<T>().await?)),
                ResponseAction::NotFound => return Ok(None),
                ResponseAction::Exhaust => {
                    rate_limited = 0;
                    self.exhaust(&key);
                }
                ResponseAction::Backoff(delay) => {
                    rate_limited += 1;
                    tracing::warn!("CoinGecko rate limited, retrying {} in {:?}", path, delay);
                    tokio::time::sleep(delay).await;
                }
                ResponseAction::Fail => return Err(anyhow!("CoinGecko request {} failed with {}", url, status)),
            }
        }
    }

    /// Full daily history of a token.
    pub async fn market_chart(&self, token_id: &str) -> Result<Option<MarketChartRecord>> {
        let query = [
            ("vs_currency", "usd".to_string()),
            ("days", "max".to_string()),
            ("interval", "daily".to_string()),
        ];
        self.get_json(&format!("coins/{}/market_chart", token_id), &query).await
    }
}

impl PriceOracle for CoinGeckoClient {
    async fn historical_quote(&self, token_id: &str, date: NaiveDate) -> Result<Option<MarketQuote>> {
        let query = [
            ("date", date.format("%d-%m-%Y").to_string()),
            ("localization", "false".to_string()),
        ];
        let response: Option<HistoryResponse> = self
            .get_json(&format!("coins/{}/history", token_id), &query)
            .await?;

        let quote = response
            .and_then(|r| r.market_data)
            .and_then(|data| {
                let price = data.current_price.get("usd").copied().flatten()?;
                let market_cap = data.market_cap.get("usd").copied().flatten()?;
                Some(MarketQuote { price, market_cap })
            });
        Ok(quote)
    }
}

/// Loads the cached series of every token, downloading and caching the ones
/// that are missing when a client is available.
pub async fn load_market_series(
    config: &Config,
    client: Option<&CoinGeckoClient>,
    token_ids: &[String],
) -> Result<HashMap<String, MarketSeries>> {
    let mut series = HashMap::new();
    let mut missing = Vec::new();

    for token_id in token_ids {
        match load_market_chart(config, token_id)? {
            Some(chart) => {
                series.insert(token_id.clone(), MarketSeries::from_chart(&chart));
            }
            None => missing.push(token_id.clone()),
        }
    }

    let Some(client) = client else {
        if !missing.is_empty() {
            tracing::warn!("No market data cached for {:?} and no credentials configured", missing);
        }
        return Ok(series);
    };

    tracing::info!("Fetching market data for {} tokens", missing.len());
    let fetched: Vec<(String, Result<Option<MarketChartRecord>>)> = futures::stream::iter(missing)
        .map(|token_id| async move {
            let chart = client.market_chart(&token_id).await;
            (token_id, chart)
        })
        .buffer_unordered(config.fetch_concurrency)
        .collect()
        .await;

    for (token_id, chart) in fetched {
        match chart {
            Ok(Some(chart)) => {
                if let Err(e) = write_market_chart(config, &token_id, &chart) {
                    tracing::warn!("Failed to cache market data for {}: {:#}", token_id, e);
                }
                series.insert(token_id, MarketSeries::from_chart(&chart));
            }
            Ok(None) => tracing::warn!("CoinGecko has no market data for {}", token_id),
            Err(e) => tracing::error!("Failed to fetch market data for {}: {:#}", token_id, e),
        }
    }

    Ok(series)
}
