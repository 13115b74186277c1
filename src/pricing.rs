//! External pricing service integration.
//!
//! Fetches the market price dictionary (market name → unit price) and the
//! currency exchange-rate table used to normalise wallet balances to USD.
//! Both are fetched once per run, during preparation, and reused for the
//! whole distribution.
//!
//! Auth: optional `Authorization: Bearer {token}`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Price dictionary key: the 7-day safe price is the most manipulation
/// resistant of the service's aggregates.
const DICTIONARY_KEY: &str = "safe_price_7d";

/// Platform currency code for USD.
pub const USD_CURRENCY_CODE: u32 = 1;

/// Games known to the pricing service, identified by app id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Game {
    Tf2,
    Dota2,
    Csgo,
    Pubg,
}

impl Game {
    pub fn app_id(&self) -> u32 {
        match self {
            Game::Tf2 => 440,
            Game::Dota2 => 570,
            Game::Csgo => 730,
            Game::Pubg => 578080,
        }
    }

    pub fn from_app_id(app_id: u32) -> Option<Self> {
        match app_id {
            440 => Some(Game::Tf2),
            570 => Some(Game::Dota2),
            730 => Some(Game::Csgo),
            578080 => Some(Game::Pubg),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Abstraction over the external pricing service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Market name → unit price for every tracked item of a game.
    async fn fetch_price_dictionary(&self, game: Game) -> Result<HashMap<String, f64>>;

    /// Currency code → rate-to-USD. Non-positive entries are dropped.
    async fn fetch_currency_rates(&self) -> Result<HashMap<u32, f64>>;

    /// Release the underlying connection. Called once preparation is done;
    /// the engine makes no pricing calls afterwards.
    async fn close(&self);
}

// ---------------------------------------------------------------------------
// API response types (pricing service JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DictionaryResponse {
    #[serde(default)]
    result: Option<HashMap<String, f64>>,
    #[serde(default)]
    is_error: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrencyRate {
    currency_type: u32,
    #[serde(rename = "rateToUSD")]
    rate_to_usd: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RatesResponse {
    #[serde(default)]
    result: Option<Vec<CurrencyRate>>,
    #[serde(default)]
    is_error: bool,
}

fn rates_to_map(rates: Vec<CurrencyRate>) -> HashMap<u32, f64> {
    rates
        .into_iter()
        .filter(|rate| rate.currency_type > 0 && rate.rate_to_usd > 0.0)
        .map(|rate| (rate.currency_type, rate.rate_to_usd))
        .collect()
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for the pricing service.
pub struct PriceServiceClient {
    http: Client,
    base_url: String,
    bearer_token: Option<SecretString>,
}

impl PriceServiceClient {
    pub fn new(base_url: impl Into<String>, bearer_token: Option<SecretString>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("COURIER/0.1.0 (inventory-distribution)")
            .build()
            .context("Failed to build HTTP client for pricing service")?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer_token,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!(url = %url, "Fetching from pricing service");

        let mut request = self.http.get(url).header("Accept", "application/json");
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let resp = request
            .send()
            .await
            .context("Pricing service request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Pricing service error (status {status}): {body}");
        }

        resp.json::<T>()
            .await
            .context("Pricing service returned invalid JSON")
    }
}

#[async_trait]
impl PriceSource for PriceServiceClient {
    async fn fetch_price_dictionary(&self, game: Game) -> Result<HashMap<String, f64>> {
        let url = format!(
            "{}/api/items/dictionary?Key={}&SteamGame={}",
            self.base_url,
            urlencoding::encode(DICTIONARY_KEY),
            game.app_id(),
        );

        let resp: DictionaryResponse = self.get_json(&url).await?;
        if resp.is_error {
            anyhow::bail!("Pricing service reported an error for the price dictionary");
        }

        let prices = resp.result.unwrap_or_default();
        debug!(count = prices.len(), "Price dictionary received");
        Ok(prices)
    }

    async fn fetch_currency_rates(&self) -> Result<HashMap<u32, f64>> {
        let url = format!("{}/api/currency/rates", self.base_url);

        let resp: RatesResponse = self.get_json(&url).await?;
        if resp.is_error {
            anyhow::bail!("Pricing service reported an error for currency rates");
        }

        let rates = rates_to_map(resp.result.unwrap_or_default());
        debug!(count = rates.len(), "Currency rates received");
        Ok(rates)
    }

    async fn close(&self) {
        // reqwest connections are pooled; dropping the client is enough.
        debug!("Pricing client closed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_app_ids() {
        assert_eq!(Game::Csgo.app_id(), 730);
        assert_eq!(Game::Tf2.app_id(), 440);
        assert_eq!(Game::Pubg.app_id(), 578080);
        assert_eq!(Game::from_app_id(730), Some(Game::Csgo));
        assert_eq!(Game::from_app_id(1), None);
    }

    #[test]
    fn test_dictionary_response_parses() {
        let json = r#"{
            "result": {"AK-47 | Redline": 12.34, "Glock-18 | Fade": 210.0},
            "isError": false,
            "timeGenerated": "2026-01-01T00:00:00Z"
        }"#;
        let resp: DictionaryResponse = serde_json::from_str(json).unwrap();
        assert!(!resp.is_error);
        let prices = resp.result.unwrap();
        assert_eq!(prices.len(), 2);
        assert!((prices["AK-47 | Redline"] - 12.34).abs() < 1e-10);
    }

    #[test]
    fn test_dictionary_response_missing_result() {
        let resp: DictionaryResponse = serde_json::from_str(r#"{"isError": true}"#).unwrap();
        assert!(resp.is_error);
        assert!(resp.result.is_none());
    }

    #[test]
    fn test_rates_response_parses_and_filters() {
        let json = r#"{
            "result": [
                {"currencyType": 1, "rateToUSD": 1.0, "updatedAt": "2026-01-01"},
                {"currencyType": 5, "rateToUSD": 92.5, "updatedAt": "2026-01-01"},
                {"currencyType": 0, "rateToUSD": 2.0, "updatedAt": "2026-01-01"},
                {"currencyType": 7, "rateToUSD": 0.0, "updatedAt": "2026-01-01"}
            ],
            "isError": false
        }"#;
        let resp: RatesResponse = serde_json::from_str(json).unwrap();
        let rates = rates_to_map(resp.result.unwrap());

        // Zero currency code and non-positive rates are dropped.
        assert_eq!(rates.len(), 2);
        assert!((rates[&5] - 92.5).abs() < 1e-10);
        assert!(!rates.contains_key(&0));
        assert!(!rates.contains_key(&7));
    }

    #[test]
    fn test_client_base_url_normalised() {
        let client = PriceServiceClient::new("https://prices.example.com/", None).unwrap();
        assert_eq!(client.base_url, "https://prices.example.com");
    }

    #[test]
    fn test_close_is_noop() {
        let client = PriceServiceClient::new("https://prices.example.com", None).unwrap();
        tokio_test::block_on(client.close());
    }
}
