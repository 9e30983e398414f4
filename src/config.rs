use crate::solana_client::SolanaConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Parse an environment variable, falling back to `default` when unset or malformed
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
    pub test_before_acquire: bool,
}

impl DatabaseConfig {
    /// Create database config from environment variables
    pub fn from_env() -> Result<Self, String> {
        let url = env::var("DATABASE_URL")
            .map_err(|_| "DATABASE_URL environment variable is required")?;

        let max_connections = env_or("DATABASE_MAX_CONNECTIONS", 10u32);
        let acquire_timeout_secs = env_or("DATABASE_ACQUIRE_TIMEOUT_SECS", 30u64);
        let idle_timeout_secs = env_or("DATABASE_IDLE_TIMEOUT_SECS", 600u64); // 10 minutes
        let max_lifetime_secs = env_or("DATABASE_MAX_LIFETIME_SECS", 1800u64); // 30 minutes
        let test_before_acquire = env_or("DATABASE_TEST_BEFORE_ACQUIRE", true);

        if max_connections == 0 {
            return Err("DATABASE_MAX_CONNECTIONS must be greater than 0".to_string());
        }

        if acquire_timeout_secs == 0 {
            return Err("DATABASE_ACQUIRE_TIMEOUT_SECS must be greater than 0".to_string());
        }

        Ok(Self {
            url,
            max_connections,
            acquire_timeout_secs,
            idle_timeout_secs,
            max_lifetime_secs,
            test_before_acquire,
        })
    }

    /// Get acquire timeout as Duration
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// Get idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Get max lifetime as Duration
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/parimutuel".to_string(),
            max_connections: 10,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
            test_before_acquire: true,
        }
    }
}

/// Which pool store implementation backs the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl StoreBackend {
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Invalid STORE_BACKEND: {}. Must be postgres or memory", s)),
        }
    }
}

/// Recipe for spawning pools of one asset and interval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolTemplate {
    pub asset: String,
    pub interval_key: String,
    /// Monitoring window, startTime to endTime
    pub duration_secs: u64,
    /// How often a new pool is created
    pub cadence_secs: u64,
    /// Deposit window, creation to lockTime
    pub join_window_secs: u64,
    /// Gap between lockTime and startTime
    pub lock_buffer_secs: u64,
}

impl PoolTemplate {
    pub fn new(
        asset: &str,
        interval_key: &str,
        duration_secs: u64,
        join_window_secs: u64,
        lock_buffer_secs: u64,
    ) -> Self {
        Self {
            asset: asset.to_string(),
            interval_key: interval_key.to_string(),
            duration_secs,
            cadence_secs: duration_secs,
            join_window_secs,
            lock_buffer_secs,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.asset.trim().is_empty() {
            return Err("Template asset must not be empty".to_string());
        }
        if self.duration_secs == 0 || self.cadence_secs == 0 {
            return Err(format!(
                "Template {} {} must have non-zero duration and cadence",
                self.asset, self.interval_key
            ));
        }
        if self.join_window_secs == 0 && self.lock_buffer_secs == 0 {
            return Err(format!(
                "Template {} {} needs a join window or lock buffer",
                self.asset, self.interval_key
            ));
        }
        Ok(())
    }

    /// Cadence as Duration
    pub fn cadence(&self) -> Duration {
        Duration::from_secs(self.cadence_secs)
    }
}

/// BTC, ETH and SOL across 1m, 15m, 1h and 24h rounds
pub fn default_templates() -> Vec<PoolTemplate> {
    let intervals: [(&str, u64, u64, u64); 4] = [
        ("1m", 60, 30, 5),
        ("15m", 900, 300, 30),
        ("1h", 3600, 900, 60),
        ("24h", 86_400, 3600, 60),
    ];

    ["BTC", "ETH", "SOL"]
        .iter()
        .flat_map(|asset| {
            intervals
                .iter()
                .map(move |(key, duration, join, buffer)| {
                    PoolTemplate::new(asset, key, *duration, *join, *buffer)
                })
        })
        .collect()
}

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub templates: Vec<PoolTemplate>,
    pub transition_interval_secs: u64,
    pub resolution_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    pub claimable_delay_secs: u64,
    pub cleanup_retention_secs: u64,
}

impl SchedulerConfig {
    pub fn from_env() -> Result<Self, String> {
        let enabled = env::var("SCHEDULER_ENABLED")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        let templates = match env::var("POOL_TEMPLATES") {
            Ok(json) if !json.trim().is_empty() => serde_json::from_str::<Vec<PoolTemplate>>(&json)
                .map_err(|e| format!("Invalid POOL_TEMPLATES: {}", e))?,
            _ => default_templates(),
        };

        let config = Self {
            enabled,
            templates,
            transition_interval_secs: env_or("TRANSITION_INTERVAL_SECS", 5),
            resolution_interval_secs: env_or("RESOLUTION_INTERVAL_SECS", 5),
            cleanup_interval_secs: env_or("CLEANUP_INTERVAL_SECS", 3600),
            claimable_delay_secs: env_or("CLAIMABLE_DELAY_SECS", 5),
            cleanup_retention_secs: env_or("CLEANUP_RETENTION_SECS", 3600),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        for template in &self.templates {
            template.validate()?;
        }
        if self.transition_interval_secs == 0
            || self.resolution_interval_secs == 0
            || self.cleanup_interval_secs == 0
        {
            return Err("Scheduler sweep intervals must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Unique assets across all templates, in template order
    pub fn supported_assets(&self) -> Vec<String> {
        let mut assets: Vec<String> = Vec::new();
        for template in &self.templates {
            if !assets.contains(&template.asset) {
                assets.push(template.asset.clone());
            }
        }
        assets
    }

    pub fn is_asset_supported(&self, asset: &str) -> bool {
        self.templates.iter().any(|t| t.asset == asset)
    }

    pub fn transition_interval(&self) -> Duration {
        Duration::from_secs(self.transition_interval_secs)
    }

    pub fn resolution_interval(&self) -> Duration {
        Duration::from_secs(self.resolution_interval_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn claimable_delay(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.claimable_delay_secs as i64)
    }

    pub fn cleanup_retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cleanup_retention_secs as i64)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            templates: default_templates(),
            transition_interval_secs: 5,
            resolution_interval_secs: 5,
            cleanup_interval_secs: 3600,
            claimable_delay_secs: 5,
            cleanup_retention_secs: 3600,
        }
    }
}

/// Fee and deposit bounds
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Platform fee in basis points
    pub fee_bps: u16,
    pub min_deposit: u64,
    pub max_deposit: u64,
}

impl SettlementConfig {
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();
        let config = Self {
            fee_bps: env_or("FEE_BPS", defaults.fee_bps),
            min_deposit: env_or("MIN_DEPOSIT", defaults.min_deposit),
            max_deposit: env_or("MAX_DEPOSIT", defaults.max_deposit),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.fee_bps > 10_000 {
            return Err(format!("FEE_BPS must be at most 10000, got {}", self.fee_bps));
        }
        if self.min_deposit == 0 || self.min_deposit > self.max_deposit {
            return Err("MIN_DEPOSIT must be positive and not above MAX_DEPOSIT".to_string());
        }
        Ok(())
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            fee_bps: 500,
            min_deposit: 1_000_000,      // 1 USDC
            max_deposit: 10_000_000_000, // 10,000 USDC
        }
    }
}

/// Price provider configuration
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl OracleConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env::var("PRICE_API_URL")
                .unwrap_or_else(|_| "https://api.pacifica.fi".to_string()),
            timeout_ms: env_or("PRICE_TIMEOUT_MS", 5000),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.pacifica.fi".to_string(),
            timeout_ms: 5000,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub store_backend: StoreBackend,
    pub database: DatabaseConfig,
    pub log_level: String,
    pub log_format: String,
    pub ws_port: Option<u16>,
    pub environment: String,
    pub scheduler: SchedulerConfig,
    pub settlement: SettlementConfig,
    pub oracle: OracleConfig,
    pub solana: SolanaConfig,
}

impl AppConfig {
    /// Create application config from environment variables
    pub fn from_env() -> Result<Self, String> {
        let store_backend =
            StoreBackend::from_str(&env::var("STORE_BACKEND").unwrap_or_else(|_| "postgres".to_string()))?;

        let database = match store_backend {
            StoreBackend::Postgres => DatabaseConfig::from_env()?,
            StoreBackend::Memory => DatabaseConfig::default(),
        };

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_format = env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

        let ws_port = env::var("WS_PORT")
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
            .or(Some(8081));

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        // Validate log level
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid LOG_LEVEL: {}. Must be one of: {:?}",
                log_level, valid_log_levels
            ));
        }

        let valid_log_formats = ["pretty", "json"];
        if !valid_log_formats.contains(&log_format.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid LOG_FORMAT: {}. Must be one of: {:?}",
                log_format, valid_log_formats
            ));
        }

        // Validate environment
        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&environment.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid ENVIRONMENT: {}. Must be one of: {:?}",
                environment, valid_environments
            ));
        }

        Ok(Self {
            store_backend,
            database,
            log_level: log_level.to_lowercase(),
            log_format: log_format.to_lowercase(),
            ws_port,
            environment: environment.to_lowercase(),
            scheduler: SchedulerConfig::from_env()?,
            settlement: SettlementConfig::from_env()?,
            oracle: OracleConfig::from_env(),
            solana: SolanaConfig::from_env(),
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Check if running in development
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    pub fn json_logs(&self) -> bool {
        self.log_format == "json"
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store_backend: StoreBackend::Postgres,
            database: DatabaseConfig::default(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            ws_port: Some(8081),
            environment: "development".to_string(),
            scheduler: SchedulerConfig::default(),
            settlement: SettlementConfig::default(),
            oracle: OracleConfig::default(),
            solana: SolanaConfig::default(),
        }
    }
}
