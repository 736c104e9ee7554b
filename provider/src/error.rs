//! Rate provider error types.

use thiserror::Error;

/// Errors a rate provider can report.
///
/// The refresh pipeline treats every variant the same way (the record goes
/// to `failed`), the detail only ends up in logs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Provider does not price the requested base currency.
    #[error("Provided base currency not supported: {0}")]
    UnsupportedBaseCurrency(String),

    /// Provider does not price the requested target currency.
    #[error("Provided target currency not supported: {0}")]
    UnsupportedTargetCurrency(String),

    /// Monthly request quota exhausted.
    #[error("The maximum allowed amount of API requests has been reached: {0}")]
    MaxRequestsReached(String),

    /// Missing or invalid API key.
    #[error("No API key was specified or an invalid API key was specified: {0}")]
    InvalidApiKey(String),

    /// The account plan does not allow changing the base currency.
    #[error("Base currency restricted: {0}")]
    BaseCurrencyRestricted(String),

    /// Non-success response that could not be classified.
    #[error("Unexpected response: status code: {status}, body: {body}")]
    UnexpectedResponse { status: u16, body: String },

    /// Request never produced a response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Response body could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Map an API error code from a 4xx body to a typed error.
    pub fn from_api_code(code: &str, message: impl Into<String>) -> Option<Self> {
        let message = message.into();
        match code {
            "invalid_access_key" => Some(ProviderError::InvalidApiKey(message)),
            "invalid_base_currency" => Some(ProviderError::UnsupportedBaseCurrency(message)),
            "invalid_currency_codes" => Some(ProviderError::UnsupportedTargetCurrency(message)),
            "max_requests_reached" => Some(ProviderError::MaxRequestsReached(message)),
            "base_currency_access_restricted" => {
                Some(ProviderError::BaseCurrencyRestricted(message))
            }
            _ => None,
        }
    }

    /// Short label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::UnsupportedBaseCurrency(_) => "unsupported_base_currency",
            ProviderError::UnsupportedTargetCurrency(_) => "unsupported_target_currency",
            ProviderError::MaxRequestsReached(_) => "max_requests_reached",
            ProviderError::InvalidApiKey(_) => "invalid_api_key",
            ProviderError::BaseCurrencyRestricted(_) => "base_currency_restricted",
            ProviderError::UnexpectedResponse { .. } => "unexpected_response",
            ProviderError::Transport(_) => "transport",
            ProviderError::Decode(_) => "decode",
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Decode(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;
