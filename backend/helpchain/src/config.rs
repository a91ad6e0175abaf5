//! Application configuration loaded from environment variables.

use std::time::Duration;

use crate::errors::{AppError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database URL (e.g. `sqlite:./helpchain.db`)
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// JSON-RPC endpoint of the contract relayer; `None` disables ledger mirroring
    pub ledger_rpc_url: Option<String>,
    /// HelpChain contract address, required when the ledger is enabled
    pub contract_address: String,
    /// Hard limit on a single ledger call
    pub ledger_timeout: Duration,
    /// How long an issued verification code stays valid
    pub otp_ttl: Duration,
    /// Wrong verification codes tolerated before the code is locked
    pub otp_max_attempts: u32,
    /// Page size used by list endpoints when the caller gives none
    pub default_page_size: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ledger_rpc_url = lookup("LEDGER_RPC_URL").filter(|v| !v.trim().is_empty());
        let contract_address = lookup("CONTRACT_ADDRESS").unwrap_or_default();
        if ledger_rpc_url.is_some() && contract_address.is_empty() {
            return Err(AppError::Config(
                "CONTRACT_ADDRESS is required when LEDGER_RPC_URL is set".to_string(),
            ));
        }

        let default_page_size: u32 = parse_or(&lookup, "DEFAULT_PAGE_SIZE", 10)?;
        if default_page_size == 0 || default_page_size > 100 {
            return Err(AppError::Config(
                "DEFAULT_PAGE_SIZE must be between 1 and 100".to_string(),
            ));
        }

        Ok(Config {
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| "sqlite:./helpchain.db".to_string()),
            api_port: parse_or(&lookup, "API_PORT", 3001)?,
            ledger_rpc_url,
            contract_address,
            ledger_timeout: Duration::from_secs(parse_or(&lookup, "LEDGER_TIMEOUT_SECS", 30)?),
            otp_ttl: Duration::from_secs(parse_or(&lookup, "OTP_TTL_SECS", 900)?),
            otp_max_attempts: parse_or(&lookup, "OTP_MAX_ATTEMPTS", 5)?,
            default_page_size,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("Invalid {key}"))),
    }
}
