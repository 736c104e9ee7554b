//! Currency codes, pairs and the supported-currency allow-lists.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{RefreshError, Result};

/// Base currencies accepted by the reference deployment.
pub const REFERENCE_BASE_CURRENCIES: &[&str] = &["EUR"];

/// Secondary currencies accepted by the reference deployment.
pub const REFERENCE_SECONDARY_CURRENCIES: &[&str] = &[
    "BTC", "MXN", "USD", "BYR", "AED", "KZT", "RUB", "XAU", "XAG", "LYD",
];

/// Currency code, always stored trimmed and uppercased.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    /// Create a new currency from code.
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_uppercase())
    }

    /// Get the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }

    pub fn eur() -> Self {
        Self::new("EUR")
    }

    pub fn usd() -> Self {
        Self::new("USD")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Currency {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A validated (base, secondary) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    /// Currency being priced.
    pub base: Currency,
    /// Currency the price is expressed in.
    pub secondary: Currency,
}

impl CurrencyPair {
    /// Create a new currency pair.
    pub fn new(base: Currency, secondary: Currency) -> Self {
        Self { base, secondary }
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.secondary)
    }
}

/// Immutable allow-lists of supported base and secondary currencies.
///
/// Built once at startup and shared behind an `Arc`; there is no way to
/// mutate a registry after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencyRegistry {
    base: BTreeSet<Currency>,
    secondary: BTreeSet<Currency>,
}

impl CurrencyRegistry {
    /// Create a registry from the given codes. Codes are normalized.
    pub fn new<B, S>(base: B, secondary: S) -> Self
    where
        B: IntoIterator,
        B::Item: AsRef<str>,
        S: IntoIterator,
        S::Item: AsRef<str>,
    {
        Self {
            base: base.into_iter().map(Currency::new).collect(),
            secondary: secondary.into_iter().map(Currency::new).collect(),
        }
    }

    /// Registry with the reference allow-lists.
    pub fn reference() -> Self {
        Self::new(REFERENCE_BASE_CURRENCIES, REFERENCE_SECONDARY_CURRENCIES)
    }

    /// Check whether a currency may be used as base.
    pub fn is_supported_base(&self, currency: &Currency) -> bool {
        self.base.contains(currency)
    }

    /// Check whether a currency may be used as secondary.
    pub fn is_supported_secondary(&self, currency: &Currency) -> bool {
        self.secondary.contains(currency)
    }

    /// Normalize casing and validate both sides of a pair.
    ///
    /// The base currency is checked first, so a pair with two bad codes
    /// reports `UnsupportedBaseCurrency`.
    pub fn validate_pair(&self, base: &str, secondary: &str) -> Result<CurrencyPair> {
        let base = Currency::new(base);
        let secondary = Currency::new(secondary);

        if !self.is_supported_base(&base) {
            return Err(RefreshError::UnsupportedBaseCurrency(base.0));
        }

        if !self.is_supported_secondary(&secondary) {
            return Err(RefreshError::UnsupportedSecondaryCurrency(secondary.0));
        }

        Ok(CurrencyPair::new(base, secondary))
    }

    /// Supported base currencies in code order.
    pub fn base_currencies(&self) -> impl Iterator<Item = &Currency> {
        self.base.iter()
    }

    /// Supported secondary currencies in code order.
    pub fn secondary_currencies(&self) -> impl Iterator<Item = &Currency> {
        self.secondary.iter()
    }

    /// True if either list is empty, which makes every request invalid.
    pub fn is_empty(&self) -> bool {
        self.base.is_empty() || self.secondary.is_empty()
    }
}

impl Default for CurrencyRegistry {
    fn default() -> Self {
        Self::reference()
    }
}
