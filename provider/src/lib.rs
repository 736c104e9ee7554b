//! fxrefresh rate providers
//!
//! The [`RateProvider`] trait the refresh workers call, and the
//! exchangeratesapi.io implementation used in production.

pub mod error;
pub mod exchangerates_api;
pub mod provider;

pub use error::{ProviderError, ProviderResult};
pub use exchangerates_api::{ExchangeRatesApiClient, ExchangeRatesApiConfig, DEFAULT_BASE_URL};
pub use provider::{ProviderRate, RateProvider};

#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockRateProvider;
