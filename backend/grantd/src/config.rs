//! Application configuration loaded from environment variables.

use crate::errors::{GrantError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// JSON-RPC endpoint of the EVM chain (e.g. http://127.0.0.1:8545)
    pub rpc_url: String,
    /// Chain id used when signing transactions
    pub chain_id: u64,
    /// Hex private key of the admin wallet. It sends the lifecycle
    /// transactions and is the trusted signer registered on `GrantManager`.
    pub admin_private_key: String,
    /// `GrantManager` contract address
    pub grant_manager_address: String,
    /// `ProposalNFT` contract address
    pub proposal_nft_address: String,
    /// Governance ERC-20 token address
    pub governance_token_address: String,
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Base URL of the Pinata pinning API
    pub pinata_url: String,
    pub pinata_api_key: String,
    pub pinata_api_secret_key: String,
    /// Lifetime of a login session, in seconds
    pub session_ttl_secs: i64,
    /// Whole tokens sent per faucet request
    pub faucet_amount: u64,
    /// Whole-token balance at which the faucet refuses to send more
    pub faucet_min_balance: u64,
    /// Interval of the background status sync; 0 disables it
    pub status_sync_interval_secs: u64,
    /// Wallets granted the admin flag at startup
    pub admin_addresses: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            rpc_url: env_var("RPC_URL").unwrap_or_else(|_| "http://127.0.0.1:8545".to_string()),
            chain_id: parsed("CHAIN_ID", "31337")?,
            admin_private_key: required("ADMIN_PRIVATE_KEY")?,
            grant_manager_address: required("GRANT_MANAGER_ADDRESS")?,
            proposal_nft_address: required("PROPOSAL_NFT_ADDRESS")?,
            governance_token_address: required("GOVERNANCE_TOKEN_ADDRESS")?,
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./grantd.db".to_string()),
            api_port: parsed("API_PORT", "3000")?,
            pinata_url: env_var("PINATA_URL")
                .unwrap_or_else(|_| "https://api.pinata.cloud".to_string()),
            pinata_api_key: env_var("PINATA_API_KEY").unwrap_or_default(),
            pinata_api_secret_key: env_var("PINATA_API_SECRET_KEY").unwrap_or_default(),
            session_ttl_secs: parsed("SESSION_TTL_SECS", "86400")?,
            faucet_amount: parsed("FAUCET_AMOUNT", "1000")?,
            faucet_min_balance: parsed("FAUCET_MIN_BALANCE", "100")?,
            status_sync_interval_secs: parsed("STATUS_SYNC_INTERVAL_SECS", "0")?,
            admin_addresses: env_var("ADMIN_ADDRESSES")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|a| !a.is_empty())
                        .map(str::to_lowercase)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| GrantError::Config(format!("Missing env var: {key}")))
}

fn required(key: &str) -> Result<String> {
    env_var(key).map_err(|_| GrantError::Config(format!("{key} environment variable is required")))
}

fn parsed<T: std::str::FromStr>(key: &str, default: &str) -> Result<T> {
    env_var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| GrantError::Config(format!("Invalid {key}")))
}
