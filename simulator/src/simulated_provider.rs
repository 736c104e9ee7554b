//! Seeded stand-in for the exchange-rate API.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fxrefresh_common::{now, Currency, CurrencyPair};
use fxrefresh_provider::{ProviderError, ProviderRate, ProviderResult, RateProvider};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::debug;

/// Simulated provider behavior.
#[derive(Debug, Clone)]
pub struct SimulatedProviderConfig {
    /// Lower bound of the per-call latency.
    pub min_latency: Duration,
    /// Upper bound of the per-call latency.
    pub max_latency: Duration,
    /// Probability in `[0, 1]` that a call fails.
    pub failure_rate: f64,
}

impl Default for SimulatedProviderConfig {
    fn default() -> Self {
        Self {
            min_latency: Duration::from_millis(20),
            max_latency: Duration::from_millis(120),
            failure_rate: 0.05,
        }
    }
}

/// Rate provider with random latency, random failures and an outage switch.
pub struct SimulatedProvider {
    config: SimulatedProviderConfig,
    currencies: Vec<Currency>,
    rng: Mutex<StdRng>,
    outage: AtomicBool,
    calls: AtomicU64,
}

impl SimulatedProvider {
    /// Create a provider pricing `currencies`. The same seed replays the
    /// same latencies, rates and failures.
    pub fn new(config: SimulatedProviderConfig, currencies: Vec<Currency>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        Self {
            config,
            currencies,
            rng: Mutex::new(rng),
            outage: AtomicBool::new(false),
            calls: AtomicU64::new(0),
        }
    }

    /// Fail every call while `active`.
    pub fn set_outage(&self, active: bool) {
        self.outage.store(active, Ordering::SeqCst);
    }

    pub fn is_in_outage(&self) -> bool {
        self.outage.load(Ordering::SeqCst)
    }

    /// Calls made so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn knows(&self, currency: &Currency) -> bool {
        self.currencies.contains(currency)
    }
}

#[async_trait]
impl RateProvider for SimulatedProvider {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn get_latest_rate(&self, pair: &CurrencyPair) -> ProviderResult<ProviderRate> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let (latency, roll, micros) = {
            let mut rng = self.rng.lock().await;
            let min = self.config.min_latency.as_millis() as u64;
            let max = (self.config.max_latency.as_millis() as u64).max(min);
            (
                Duration::from_millis(rng.gen_range(min..=max)),
                rng.gen::<f64>(),
                rng.gen_range(500_000i64..2_000_000),
            )
        };

        tokio::time::sleep(latency).await;

        if self.is_in_outage() {
            return Err(ProviderError::Transport("simulated outage".into()));
        }

        if roll < self.config.failure_rate {
            debug!(pair = %pair, "Injecting provider failure");
            return Err(ProviderError::MaxRequestsReached(
                "simulated rate limit".into(),
            ));
        }

        if !self.knows(&pair.base) {
            return Err(ProviderError::UnsupportedBaseCurrency(pair.base.to_string()));
        }
        if !self.knows(&pair.secondary) {
            return Err(ProviderError::UnsupportedTargetCurrency(
                pair.secondary.to_string(),
            ));
        }

        Ok(ProviderRate {
            pair: pair.clone(),
            value: Decimal::new(micros, 6),
            quoted_at: now(),
            source: self.name().to_string(),
        })
    }

    async fn supported_currencies(&self) -> ProviderResult<Vec<Currency>> {
        if self.is_in_outage() {
            return Err(ProviderError::Transport("simulated outage".into()));
        }
        Ok(self.currencies.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_provider(failure_rate: f64, seed: u64) -> SimulatedProvider {
        SimulatedProvider::new(
            SimulatedProviderConfig {
                min_latency: Duration::ZERO,
                max_latency: Duration::from_millis(2),
                failure_rate,
            },
            vec![Currency::eur(), Currency::usd()],
            Some(seed),
        )
    }

    fn eur_usd() -> CurrencyPair {
        CurrencyPair::new(Currency::eur(), Currency::usd())
    }

    #[tokio::test]
    async fn test_rates_in_range() {
        let provider = create_test_provider(0.0, 7);

        for _ in 0..10 {
            let rate = provider.get_latest_rate(&eur_usd()).await.unwrap();
            assert!(rate.value >= Decimal::new(5, 1));
            assert!(rate.value < Decimal::from(2));
            assert_eq!(rate.source, "simulated");
        }
        assert_eq!(provider.calls(), 10);
    }

    #[tokio::test]
    async fn test_same_seed_same_rates() {
        let first = create_test_provider(0.0, 42);
        let second = create_test_provider(0.0, 42);

        for _ in 0..5 {
            let a = first.get_latest_rate(&eur_usd()).await.unwrap();
            let b = second.get_latest_rate(&eur_usd()).await.unwrap();
            assert_eq!(a.value, b.value);
        }
    }

    #[tokio::test]
    async fn test_failure_rate_one_always_fails() {
        let provider = create_test_provider(1.0, 1);
        let err = provider.get_latest_rate(&eur_usd()).await.unwrap_err();
        assert_eq!(err.kind(), "max_requests_reached");
    }

    #[tokio::test]
    async fn test_outage_toggle() {
        let provider = create_test_provider(0.0, 3);

        provider.set_outage(true);
        assert!(matches!(
            provider.get_latest_rate(&eur_usd()).await,
            Err(ProviderError::Transport(_))
        ));
        assert!(provider.supported_currencies().await.is_err());

        provider.set_outage(false);
        assert!(provider.get_latest_rate(&eur_usd()).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_currency() {
        let provider = create_test_provider(0.0, 5);
        let pair = CurrencyPair::new(Currency::eur(), Currency::new("XAU"));

        assert_eq!(
            provider.get_latest_rate(&pair).await.unwrap_err(),
            ProviderError::UnsupportedTargetCurrency("XAU".into())
        );
    }
}
