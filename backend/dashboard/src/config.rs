//! Application configuration loaded from environment variables.

use std::time::Duration;

use crate::errors::{DashboardError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Chain RPC endpoint (e.g. https://rpc.koinos-testnet.com)
    pub rpc_url: String,
    /// Address of the community fund contract
    pub fund_contract_id: String,
    /// Address of the funding token contract (used for `balance_of`)
    pub token_contract_id: String,
    /// JSON-RPC endpoint of the wallet bridge that signs transactions
    pub wallet_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Number of projects fetched per `get_projects` page
    pub page_size: u32,
    /// How often (in seconds) the dashboard snapshot is refreshed
    pub refresh_interval_secs: u64,
    /// Per-request HTTP timeout
    pub rpc_timeout_secs: u64,
    /// Retries for idempotent read calls before surfacing a network error
    pub rpc_max_retries: u32,
    /// Upper bound on waiting for a broadcast transaction to be mined
    pub tx_wait_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let config = Config {
            rpc_url: env_var("RPC_URL")
                .unwrap_or_else(|_| "https://rpc.koinos-testnet.com".to_string()),
            fund_contract_id: env_var("FUND_CONTRACT_ID")
                .unwrap_or_else(|_| "18h1MU6z4LkD7Lk2BohhejA9j61TDUwvRB".to_string()),
            token_contract_id: env_var("TOKEN_CONTRACT_ID").map_err(|_| {
                DashboardError::Config(
                    "TOKEN_CONTRACT_ID environment variable is required".to_string(),
                )
            })?,
            wallet_url: env_var("WALLET_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8545".to_string()),
            api_port: parse_var("API_PORT", "3001")?,
            page_size: parse_var("PAGE_SIZE", "10")?,
            refresh_interval_secs: parse_var("REFRESH_INTERVAL_SECS", "60")?,
            rpc_timeout_secs: parse_var("RPC_TIMEOUT_SECS", "30")?,
            rpc_max_retries: parse_var("RPC_MAX_RETRIES", "3")?,
            tx_wait_timeout_secs: parse_var("TX_WAIT_TIMEOUT_SECS", "120")?,
        };

        if config.page_size == 0 {
            return Err(DashboardError::Config("PAGE_SIZE must be positive".to_string()));
        }
        if config.refresh_interval_secs == 0 {
            return Err(DashboardError::Config(
                "REFRESH_INTERVAL_SECS must be positive".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn tx_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.tx_wait_timeout_secs)
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| DashboardError::Config(format!("Missing env var: {key}")))
}

fn parse_var<T: std::str::FromStr>(key: &str, default: &str) -> Result<T> {
    env_var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| DashboardError::Config(format!("Invalid {key}")))
}

#[cfg(test)]
impl Config {
    /// Configuration pointing every endpoint at `url` (a mock server in tests).
    pub fn for_tests(url: &str) -> Self {
        Config {
            rpc_url: url.to_string(),
            fund_contract_id: "FUND".to_string(),
            token_contract_id: "KOIN".to_string(),
            wallet_url: url.to_string(),
            api_port: 0,
            page_size: 10,
            refresh_interval_secs: 60,
            rpc_timeout_secs: 5,
            rpc_max_retries: 0,
            tx_wait_timeout_secs: 5,
        }
    }
}
