//! Service configuration.

use std::time::Duration;

use fxrefresh_common::{CurrencyRegistry, REFERENCE_BASE_CURRENCIES, REFERENCE_SECONDARY_CURRENCIES};
use fxrefresh_provider::{ExchangeRatesApiConfig, DEFAULT_BASE_URL};

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Pool size.
    pub max_connections: u32,
    /// Connection attempts before giving up at startup.
    pub connect_attempts: u32,
    /// Delay between connection attempts.
    pub connect_delay: Duration,
    /// Full connection URL, takes precedence over the individual fields.
    pub url: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "fxrefresh".to_string(),
            max_connections: 1,
            connect_attempts: 5,
            connect_delay: Duration::from_secs(1),
            url: None,
        }
    }
}

impl DatabaseConfig {
    /// Connection URL.
    pub fn url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!(
                "postgres://{}:{}@{}:{}/{}?sslmode=disable",
                self.user, self.password, self.host, self.port, self.database
            ),
        }
    }
}

/// Refresh pipeline sizing.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of consumer workers.
    pub workers: usize,
    /// Refresh queue capacity.
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            queue_capacity: 5,
        }
    }
}

impl PipelineConfig {
    /// Validate pipeline sizing.
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("Worker count cannot be 0".to_string());
        }

        if self.queue_capacity == 0 {
            return Err("Queue capacity cannot be 0".to_string());
        }

        Ok(())
    }
}

/// Rate provider configuration.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    /// Log raw provider responses.
    pub debug: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(60),
            debug: false,
        }
    }
}

impl ProviderConfig {
    /// Configuration for the exchangeratesapi.io client.
    pub fn client_config(&self) -> ExchangeRatesApiConfig {
        ExchangeRatesApiConfig {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            timeout: self.timeout,
            debug: self.debug,
        }
    }
}

/// Supported currency allow-lists.
#[derive(Debug, Clone)]
pub struct CurrencyConfig {
    pub base: Vec<String>,
    pub secondary: Vec<String>,
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        Self {
            base: REFERENCE_BASE_CURRENCIES.iter().map(|c| c.to_string()).collect(),
            secondary: REFERENCE_SECONDARY_CURRENCIES
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

impl CurrencyConfig {
    /// Build the immutable registry.
    pub fn registry(&self) -> CurrencyRegistry {
        CurrencyRegistry::new(&self.base, &self.secondary)
    }
}

/// Main service configuration.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub database: DatabaseConfig,
    pub pipeline: PipelineConfig,
    pub provider: ProviderConfig,
    pub currencies: CurrencyConfig,
    /// Log level used when `RUST_LOG` is unset.
    pub log_level: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup, on top of the defaults.
    pub fn from_source<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = get("PG_DATABASE_HOST") {
            config.database.host = host;
        }

        if let Some(port) = get("PG_DATABASE_PORT").and_then(|p| p.trim().parse().ok()) {
            config.database.port = port;
        }

        if let Some(user) = get("PG_DATABASE_USER") {
            config.database.user = user;
        }

        if let Some(password) = get("PG_DATABASE_PASSWORD") {
            config.database.password = password;
        }

        if let Some(database) = get("PG_DATABASE_DB") {
            config.database.database = database;
        }

        // Anything unparsable means a single connection.
        if let Some(max) = get("PG_POOL_MAX") {
            config.database.max_connections = max.trim().parse().unwrap_or(1);
        }

        if let Some(url) = get("DATABASE_URL") {
            config.database.url = Some(url);
        }

        if let Some(workers) = get("REFRESH_WORKERS").and_then(|w| w.trim().parse().ok()) {
            config.pipeline.workers = workers;
        }

        if let Some(capacity) = get("REFRESH_QUEUE_CAPACITY").and_then(|c| c.trim().parse().ok()) {
            config.pipeline.queue_capacity = capacity;
        }

        if let Some(url) = get("EXCHANGERATES_API_URL") {
            config.provider.base_url = url;
        }

        if let Some(key) = get("EXCHANGERATES_API_KEY") {
            config.provider.api_key = key;
        }

        if let Some(secs) = get("EXCHANGERATES_TIMEOUT_SECS").and_then(|s| s.trim().parse().ok()) {
            config.provider.timeout = Duration::from_secs(secs);
        }

        if let Some(debug) = get("EXCHANGERATES_DEBUG") {
            config.provider.debug = matches!(debug.trim(), "1" | "true" | "TRUE" | "yes");
        }

        if let Some(list) = get("SUPPORTED_BASE_CURRENCIES") {
            config.currencies.base = split_list(&list);
        }

        if let Some(list) = get("SUPPORTED_SECONDARY_CURRENCIES") {
            config.currencies.secondary = split_list(&list);
        }

        if let Some(level) = get("LOG_LEVEL") {
            config.log_level = Some(level);
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.pipeline.validate()?;

        if self.database.max_connections == 0 {
            return Err("Database pool size cannot be 0".to_string());
        }

        if self.database.url().trim().is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }

        if self.currencies.registry().is_empty() {
            return Err("Supported currency lists cannot be empty".to_string());
        }

        Ok(())
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(str::to_string)
        .collect()
}
