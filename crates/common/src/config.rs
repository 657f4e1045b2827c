use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::AppError;

pub const DEFAULT_MORPHO_BLUE_ADDRESS: &str = "0xBBBBBbbBBb9cC5e90e3b3Af64bdAF62C37EEFFCb";
pub const DEFAULT_VAULT_ADDRESS: &str = "0x346aac1e83239db6a6cb760e95e13258ad3d1a6d";
/// USDC on Base.
pub const DEFAULT_LOAN_ASSET_ADDRESS: &str = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913";
pub const DEFAULT_MORPHO_API_URL: &str = "https://blue-api.morpho.org/graphql";

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// JSON-RPC endpoint of the chain node
    pub rpc_url: String,

    /// PostgreSQL connection string; the durable event store is disabled when unset
    pub database_url: Option<String>,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Morpho Blue singleton (the lending pool)
    pub morpho_blue_address: String,

    /// MetaMorpho vault managed by the agent
    pub vault_address: String,

    /// Loan asset used to select markets from the market-data API
    pub loan_asset_address: String,

    /// Morpho GraphQL endpoint
    pub morpho_api_url: String,

    /// Chain id passed to the market-data API (default: 8453, Base)
    pub chain_id: u64,

    /// Optional ABI JSON overrides; bundled ABIs are used when unset
    pub morpho_blue_abi_path: Option<String>,
    pub vault_abi_path: Option<String>,

    /// Poll interval of the lending-pool processor in seconds (default: 60)
    pub lending_pool_poll_interval_secs: u64,

    /// Poll interval of the vault processor in seconds (default: 15)
    pub vault_poll_interval_secs: u64,

    /// Cold-start rewind depth in blocks (default: 10)
    pub rewind_blocks: u64,

    /// Expected finality latency; overrides `rewind_blocks` when set
    pub finality_window_secs: Option<u64>,

    /// Average block time used to convert the finality window into blocks (default: 2000)
    pub block_time_ms: u64,

    /// Dust threshold in the asset's smallest unit (default: 10 USDC)
    pub min_notional: u128,

    /// Timeout applied to every RPC call in seconds (default: 30)
    pub rpc_timeout_secs: u64,

    /// Cap on the exponential retry backoff in seconds (default: 300)
    pub max_backoff_secs: u64,

    /// Consecutive failed sweeps before a processor is reported as stalled (default: 5)
    pub failure_alert_threshold: u32,

    /// Sweeps a deposit's transaction fetch may fail before the deposit is
    /// published without its message (default: 3)
    pub message_fetch_attempts: u32,

    /// Interval of the periodic risk update trigger in seconds (default: 600)
    pub risk_update_interval_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let config = Self {
            rpc_url: lookup("RPC_URL")
                .filter(|url| !url.trim().is_empty())
                .ok_or_else(|| AppError::Config("RPC_URL environment variable is required".into()))?,
            database_url: lookup("DATABASE_URL"),
            db_max_connections: parse("DB_MAX_CONNECTIONS", &or("DB_MAX_CONNECTIONS", "20"))?,
            morpho_blue_address: or("MORPHO_BLUE_ADDRESS", DEFAULT_MORPHO_BLUE_ADDRESS),
            vault_address: or("VAULT_ADDRESS", DEFAULT_VAULT_ADDRESS),
            loan_asset_address: or("LOAN_ASSET_ADDRESS", DEFAULT_LOAN_ASSET_ADDRESS),
            morpho_api_url: or("MORPHO_API_URL", DEFAULT_MORPHO_API_URL),
            chain_id: parse("CHAIN_ID", &or("CHAIN_ID", "8453"))?,
            morpho_blue_abi_path: lookup("MORPHO_BLUE_ABI_PATH"),
            vault_abi_path: lookup("VAULT_ABI_PATH"),
            lending_pool_poll_interval_secs: parse(
                "LENDING_POOL_POLL_INTERVAL_SECS",
                &or("LENDING_POOL_POLL_INTERVAL_SECS", "60"),
            )?,
            vault_poll_interval_secs: parse(
                "VAULT_POLL_INTERVAL_SECS",
                &or("VAULT_POLL_INTERVAL_SECS", "15"),
            )?,
            rewind_blocks: parse("REWIND_BLOCKS", &or("REWIND_BLOCKS", "10"))?,
            finality_window_secs: lookup("FINALITY_WINDOW_SECS")
                .map(|v| parse("FINALITY_WINDOW_SECS", &v))
                .transpose()?,
            block_time_ms: parse("BLOCK_TIME_MS", &or("BLOCK_TIME_MS", "2000"))?,
            min_notional: parse("MIN_NOTIONAL", &or("MIN_NOTIONAL", "10000000"))?,
            rpc_timeout_secs: parse("RPC_TIMEOUT_SECS", &or("RPC_TIMEOUT_SECS", "30"))?,
            max_backoff_secs: parse("MAX_BACKOFF_SECS", &or("MAX_BACKOFF_SECS", "300"))?,
            failure_alert_threshold: parse(
                "FAILURE_ALERT_THRESHOLD",
                &or("FAILURE_ALERT_THRESHOLD", "5"),
            )?,
            message_fetch_attempts: parse(
                "MESSAGE_FETCH_ATTEMPTS",
                &or("MESSAGE_FETCH_ATTEMPTS", "3"),
            )?,
            risk_update_interval_secs: parse(
                "RISK_UPDATE_INTERVAL_SECS",
                &or("RISK_UPDATE_INTERVAL_SECS", "600"),
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would spin a task without delay or overflow the
    /// rewind computation.
    fn validate(&self) -> Result<(), AppError> {
        for (key, value) in [
            ("LENDING_POOL_POLL_INTERVAL_SECS", self.lending_pool_poll_interval_secs),
            ("VAULT_POLL_INTERVAL_SECS", self.vault_poll_interval_secs),
            ("RISK_UPDATE_INTERVAL_SECS", self.risk_update_interval_secs),
            ("RPC_TIMEOUT_SECS", self.rpc_timeout_secs),
            ("BLOCK_TIME_MS", self.block_time_ms),
        ] {
            if value == 0 {
                return Err(AppError::Config(format!("{key} must be greater than 0")));
            }
        }
        match self.finality_window_secs {
            Some(secs) if secs.checked_mul(1000).is_none() => {
                Err(AppError::Config("FINALITY_WINDOW_SECS is too large".into()))
            }
            _ => Ok(()),
        }
    }

    /// Cold-start rewind depth.
    ///
    /// Derived from the finality window when one is configured, otherwise the fixed
    /// `REWIND_BLOCKS` value.
    pub fn effective_rewind_blocks(&self) -> u64 {
        match self.finality_window_secs {
            Some(secs) if self.block_time_ms > 0 => secs
                .saturating_mul(1000)
                .div_ceil(self.block_time_ms)
                .max(1),
            _ => self.rewind_blocks,
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, AppError> {
    value.trim().parse().map_err(|_| {
        AppError::Config(format!(
            "{key} must be a valid {}",
            std::any::type_name::<T>()
        ))
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, AppError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_missing_rpc_url_is_fatal() {
        let err = config_from(&[]).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("RPC_URL", "http://localhost:8545")]).unwrap();
        assert_eq!(config.rewind_blocks, 10);
        assert_eq!(config.effective_rewind_blocks(), 10);
        assert_eq!(config.min_notional, 10_000_000);
        assert_eq!(config.vault_poll_interval_secs, 15);
        assert_eq!(config.lending_pool_poll_interval_secs, 60);
        assert_eq!(config.rpc_timeout(), Duration::from_secs(30));
        assert!(config.database_url.is_none());
        assert_eq!(config.morpho_blue_address, DEFAULT_MORPHO_BLUE_ADDRESS);
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = config_from(&[("RPC_URL", "http://localhost:8545"), ("REWIND_BLOCKS", "ten")])
            .unwrap_err();
        assert!(err.to_string().contains("REWIND_BLOCKS"));
    }

    #[test]
    fn test_rewind_from_finality_window() {
        let config = config_from(&[
            ("RPC_URL", "http://localhost:8545"),
            ("FINALITY_WINDOW_SECS", "25"),
            ("BLOCK_TIME_MS", "2000"),
        ])
        .unwrap();
        assert_eq!(config.effective_rewind_blocks(), 13);
    }

    #[test]
    fn test_zero_intervals_are_rejected() {
        for key in [
            "LENDING_POOL_POLL_INTERVAL_SECS",
            "VAULT_POLL_INTERVAL_SECS",
            "RISK_UPDATE_INTERVAL_SECS",
            "RPC_TIMEOUT_SECS",
        ] {
            let err = config_from(&[("RPC_URL", "http://localhost:8545"), (key, "0")]).unwrap_err();
            assert!(err.to_string().contains(key), "{key} accepted 0");
        }
    }

    #[test]
    fn test_oversized_finality_window_is_rejected() {
        let err = config_from(&[
            ("RPC_URL", "http://localhost:8545"),
            ("FINALITY_WINDOW_SECS", &u64::MAX.to_string()),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("FINALITY_WINDOW_SECS"));
    }
}
