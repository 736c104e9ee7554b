//! Rate provider trait and a programmable mock.

use async_trait::async_trait;
use fxrefresh_common::{Currency, CurrencyPair, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;

/// A rate quoted by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRate {
    /// The priced pair.
    pub pair: CurrencyPair,
    /// Units of secondary currency per unit of base.
    pub value: Decimal,
    /// When the provider quoted the rate.
    pub quoted_at: Timestamp,
    /// Provider name.
    pub source: String,
}

/// Source of current exchange rates.
///
/// Implementations make a single call per request and keep no per-request
/// state; any failure is reported as a [`ProviderError`](crate::ProviderError).
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Fetch the latest rate for a pair.
    async fn get_latest_rate(&self, pair: &CurrencyPair) -> ProviderResult<ProviderRate>;

    /// List every currency code the provider knows about.
    async fn supported_currencies(&self) -> ProviderResult<Vec<Currency>>;
}

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockRateProvider;

#[cfg(any(test, feature = "test-utils"))]
mod mock {
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use dashmap::DashMap;
    use fxrefresh_common::{now, Currency, CurrencyPair};
    use rust_decimal::Decimal;

    use super::{ProviderRate, RateProvider};
    use crate::error::{ProviderError, ProviderResult};

    /// Mock rate provider for testing.
    pub struct MockRateProvider {
        name: String,
        rates: DashMap<CurrencyPair, Decimal>,
        failures: DashMap<CurrencyPair, ProviderError>,
        latency_ms: AtomicU64,
        calls: AtomicUsize,
    }

    impl MockRateProvider {
        /// Create a new mock provider.
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                rates: DashMap::new(),
                failures: DashMap::new(),
                latency_ms: AtomicU64::new(0),
                calls: AtomicUsize::new(0),
            }
        }

        /// Set a rate for a currency pair.
        pub fn set_rate(&self, pair: CurrencyPair, value: Decimal) {
            self.failures.remove(&pair);
            self.rates.insert(pair, value);
        }

        /// Make every request for `pair` fail with `error`.
        pub fn fail_pair(&self, pair: CurrencyPair, error: ProviderError) {
            self.failures.insert(pair, error);
        }

        /// Delay every response by `latency`.
        pub fn set_latency(&self, latency: Duration) {
            self.latency_ms
                .store(latency.as_millis() as u64, Ordering::SeqCst);
        }

        /// Number of `get_latest_rate` calls started so far.
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RateProvider for MockRateProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn get_latest_rate(&self, pair: &CurrencyPair) -> ProviderResult<ProviderRate> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let latency = self.latency_ms.load(Ordering::SeqCst);
            if latency > 0 {
                tokio::time::sleep(Duration::from_millis(latency)).await;
            }

            if let Some(error) = self.failures.get(pair) {
                return Err(error.clone());
            }

            self.rates
                .get(pair)
                .map(|value| ProviderRate {
                    pair: pair.clone(),
                    value: *value,
                    quoted_at: now(),
                    source: self.name.clone(),
                })
                .ok_or_else(|| ProviderError::UnsupportedTargetCurrency(pair.secondary.to_string()))
        }

        async fn supported_currencies(&self) -> ProviderResult<Vec<Currency>> {
            let mut currencies: Vec<Currency> = self
                .rates
                .iter()
                .flat_map(|entry| [entry.key().base.clone(), entry.key().secondary.clone()])
                .collect();
            currencies.sort();
            currencies.dedup();
            Ok(currencies)
        }
    }
}
