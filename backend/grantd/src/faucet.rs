//! Governance token faucet for test networks.

use ethers::types::U256;
use serde::Serialize;
use tracing::info;

use crate::chain::GrantChain;
use crate::config::Config;
use crate::errors::{GrantError, Result};
use crate::signer::parse_address;
use crate::stats::ether_string;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaucetDrip {
    pub message: String,
    pub amount: String,
    pub tx_hash: String,
    pub new_balance: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    pub balance: String,
    pub symbol: String,
    pub address: String,
}

/// Whole tokens to base units (18 decimals).
fn whole_tokens(amount: u64) -> U256 {
    U256::from(amount) * U256::exp10(18)
}

fn valid_address(raw: &str) -> Result<ethers::types::Address> {
    parse_address(raw)
        .map_err(|_| GrantError::Validation("Valid wallet address is required".to_string()))
}

/// Send `faucet_amount` tokens unless the wallet already holds
/// `faucet_min_balance` or more.
pub async fn request_tokens(
    chain: &dyn GrantChain,
    config: &Config,
    wallet_address: &str,
) -> Result<FaucetDrip> {
    let to = valid_address(wallet_address)?;

    let balance = chain.token_balance(to).await?;
    if balance >= whole_tokens(config.faucet_min_balance) {
        return Err(GrantError::Validation(format!(
            "You already have enough tokens ({})",
            ether_string(balance)
        )));
    }

    let tx_hash = chain
        .transfer_tokens(to, whole_tokens(config.faucet_amount))
        .await?;
    let new_balance = chain.token_balance(to).await?;
    info!("Faucet sent {} tokens to {to:?} ({tx_hash})", config.faucet_amount);

    Ok(FaucetDrip {
        message: "Tokens sent successfully!".to_string(),
        amount: config.faucet_amount.to_string(),
        tx_hash,
        new_balance: ether_string(new_balance),
    })
}

pub async fn balance(chain: &dyn GrantChain, wallet_address: &str) -> Result<TokenBalance> {
    let owner = valid_address(wallet_address)?;
    let balance = chain.token_balance(owner).await?;
    let symbol = chain.token_symbol().await?;
    Ok(TokenBalance {
        balance: ether_string(balance),
        symbol,
        address: wallet_address.trim().to_string(),
    })
}
