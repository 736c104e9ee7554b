//! Client for the exchangeratesapi.io HTTP API.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use fxrefresh_common::{from_unix_seconds, now, Currency, CurrencyPair};
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{ProviderRate, RateProvider};

/// Public endpoint of the API.
pub const DEFAULT_BASE_URL: &str = "http://api.exchangeratesapi.io";

const PROVIDER_NAME: &str = "ExchangeRatesAPI";

/// Configuration for [`ExchangeRatesApiClient`].
#[derive(Debug, Clone)]
pub struct ExchangeRatesApiConfig {
    /// Scheme and host, without trailing slash.
    pub base_url: String,
    /// Access key sent as `access_key` query parameter.
    pub api_key: String,
    /// Whole-request timeout.
    pub timeout: Duration,
    /// Log raw response bodies.
    pub debug: bool,
}

impl Default for ExchangeRatesApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(60),
            debug: false,
        }
    }
}

/// Rate provider backed by exchangeratesapi.io.
pub struct ExchangeRatesApiClient {
    http: reqwest::Client,
    config: ExchangeRatesApiConfig,
}

impl ExchangeRatesApiClient {
    /// Create a new client.
    pub fn new(config: ExchangeRatesApiConfig) -> ProviderResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self { http, config })
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> ProviderResult<(StatusCode, String)> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);

        let response = self
            .http
            .get(&url)
            .header(ACCEPT, "application/json")
            .query(&[("access_key", self.config.api_key.as_str())])
            .query(query)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if self.config.debug {
            debug!(path, status = status.as_u16(), body = %body, "Provider response");
        }

        Ok((status, body))
    }
}

#[async_trait]
impl RateProvider for ExchangeRatesApiClient {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    #[instrument(skip(self), fields(pair = %pair))]
    async fn get_latest_rate(&self, pair: &CurrencyPair) -> ProviderResult<ProviderRate> {
        let (status, body) = self
            .get(
                "/latest",
                &[("base", pair.base.code()), ("symbols", pair.secondary.code())],
            )
            .await?;

        parse_latest(pair, status, &body)
    }

    #[instrument(skip(self))]
    async fn supported_currencies(&self) -> ProviderResult<Vec<Currency>> {
        let (status, body) = self.get("/symbols", &[]).await?;
        parse_symbols(status, &body)
    }
}

#[derive(Debug, Deserialize)]
struct LatestResponse {
    base: String,
    timestamp: i64,
    rates: HashMap<String, f64>,
}

#[derive(Debug, Deserialize)]
struct SymbolsResponse {
    symbols: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    #[serde(default)]
    message: String,
}

/// Interpret a `/latest` response for `pair`.
pub(crate) fn parse_latest(
    pair: &CurrencyPair,
    status: StatusCode,
    body: &str,
) -> ProviderResult<ProviderRate> {
    if !status.is_success() {
        return Err(parse_error(status, body));
    }

    let response: LatestResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Decode(e.to_string()))?;

    // An unknown base is answered with the account default instead of an error.
    if response.base != pair.base.code() {
        return Err(ProviderError::UnsupportedBaseCurrency(pair.base.to_string()));
    }

    let raw = response
        .rates
        .get(pair.secondary.code())
        .ok_or_else(|| ProviderError::UnsupportedTargetCurrency(pair.secondary.to_string()))?;

    // Going through the shortest decimal string keeps 1.077064 exactly 1.077064.
    let value = Decimal::from_str(&raw.to_string())
        .map_err(|e| ProviderError::Decode(format!("rate {}: {}", raw, e)))?;

    Ok(ProviderRate {
        pair: pair.clone(),
        value,
        quoted_at: from_unix_seconds(response.timestamp).unwrap_or_else(now),
        source: PROVIDER_NAME.to_string(),
    })
}

/// Interpret a `/symbols` response.
pub(crate) fn parse_symbols(status: StatusCode, body: &str) -> ProviderResult<Vec<Currency>> {
    if !status.is_success() {
        return Err(parse_error(status, body));
    }

    let response: SymbolsResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Decode(e.to_string()))?;

    let mut currencies: Vec<Currency> = response.symbols.keys().map(Currency::new).collect();
    currencies.sort();
    Ok(currencies)
}

fn parse_error(status: StatusCode, body: &str) -> ProviderError {
    if status.is_client_error() {
        match serde_json::from_str::<ErrorResponse>(body) {
            Ok(response) => {
                if let Some(err) =
                    ProviderError::from_api_code(&response.error.code, response.error.message.clone())
                {
                    return err;
                }
                warn!(code = %response.error.code, "Unknown provider error code");
                return ProviderError::UnexpectedResponse {
                    status: status.as_u16(),
                    body: response.error.message,
                };
            }
            Err(_) => {
                return ProviderError::UnexpectedResponse {
                    status: status.as_u16(),
                    body: body.to_string(),
                };
            }
        }
    }

    ProviderError::UnexpectedResponse {
        status: status.as_u16(),
        body: body.to_string(),
    }
}
