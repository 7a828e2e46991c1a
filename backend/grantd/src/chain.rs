//! Grant chain client: `GrantManager`, `ProposalNFT` and governance token.
//!
//! Every coordinator operation receives a [`GrantChain`] instead of reaching
//! for a process-wide provider, so tests can swap in a fake. [`EthersChain`]
//! is the production implementation over an HTTP JSON-RPC provider and the
//! admin wallet.

use std::sync::Arc;

use async_trait::async_trait;
use ethers::contract::{abigen, ContractError};
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Log, TransactionReceipt, H256, U256, U64};
use ethers::utils::keccak256;
use tracing::debug;

use crate::config::Config;
use crate::errors::{ChainError, GrantError, Result};
use crate::signer::parse_address;

abigen!(
    GrantManager,
    r#"[
        function mintProposal(address creator, string uri)
        function startVote(uint256 _nftId)
        function castVote(uint256 _nftId, uint256 _baseVoteAmount, uint256 _contributionWeight, bytes _signature)
        function donateToProposal(uint256 _nftId) payable
        function grantProposals(uint256) view returns (uint256 nftId, uint256 endTime, uint256 totalVotes, bool executed, address creator)
        event Donated(uint256 indexed nftId, address indexed donor, uint256 amount)
        event VoteCast(uint256 indexed nftId, address indexed voter, uint256 totalPower)
    ]"#;

    ProposalNft,
    r#"[
        function ownerOf(uint256 tokenId) view returns (address)
    ]"#;

    GovernanceToken,
    r#"[
        function balanceOf(address account) view returns (uint256)
        function transfer(address to, uint256 amount) returns (bool)
        function symbol() view returns (string)
    ]"#;
);

pub type ChainResult<T> = std::result::Result<T, ChainError>;

/// Upper bound for the legacy `ownerOf` scan.
const MAX_SCAN: u64 = 10_000;

/// The `grantProposals(id)` struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainProposal {
    pub nft_id: U256,
    pub end_time: U256,
    pub total_votes: U256,
    pub executed: bool,
    pub creator: Address,
}

/// One `Donated` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Donation {
    pub donor: Address,
    pub amount: U256,
}

#[derive(Debug, Clone)]
pub struct MintReceipt {
    pub tx_hash: String,
    /// Token id taken from the ERC-721 mint `Transfer` log, when present.
    pub token_id: Option<U256>,
}

#[async_trait]
pub trait GrantChain: Send + Sync {
    fn grant_manager_address(&self) -> Address;

    /// `ProposalNFT.ownerOf(id)` succeeded.
    async fn token_exists(&self, token_id: U256) -> ChainResult<bool>;

    /// Submit `mintProposal` and wait for the receipt.
    async fn mint_proposal(&self, creator: Address, uri: &str) -> ChainResult<MintReceipt>;

    /// Submit `startVote` and wait for the receipt. Returns the tx hash.
    async fn start_vote(&self, proposal_id: U256) -> ChainResult<String>;

    async fn grant_proposal(&self, proposal_id: U256) -> ChainResult<OnChainProposal>;

    /// All `Donated` events for `proposal_id`.
    async fn donations(&self, proposal_id: U256) -> ChainResult<Vec<Donation>>;

    async fn token_balance(&self, owner: Address) -> ChainResult<U256>;

    async fn token_symbol(&self) -> ChainResult<String>;

    /// Transfer governance tokens from the admin wallet. Returns the tx hash.
    async fn transfer_tokens(&self, to: Address, amount: U256) -> ChainResult<String>;
}

/// Find the next unused token id by probing `ownerOf(0)`, `ownerOf(1)`, …
///
/// Racy against concurrent mints; only used when a mint receipt carries no
/// `Transfer` log.
pub async fn scan_next_token_id(chain: &dyn GrantChain) -> ChainResult<U256> {
    for id in 0..MAX_SCAN {
        if !chain.token_exists(U256::from(id)).await? {
            return Ok(U256::from(id));
        }
    }
    Err(ChainError::new(
        ChainError::OTHER,
        format!("no free token id below {MAX_SCAN}"),
    ))
}

/// Extract the id minted by `nft` from a receipt's logs.
///
/// Matches `Transfer(address(0), to, tokenId)` where all three arguments are
/// indexed.
pub fn minted_token_id(logs: &[Log], nft: Address) -> Option<U256> {
    let transfer_topic = H256::from(keccak256("Transfer(address,address,uint256)"));
    logs.iter()
        .filter(|log| log.address == nft)
        .find(|log| {
            log.topics.len() == 4 && log.topics[0] == transfer_topic && log.topics[1] == H256::zero()
        })
        .map(|log| U256::from_big_endian(log.topics[3].as_bytes()))
}

/// Arguments `mintProposal` would accept: a non-zero creator and an
/// `ipfs://` token URI.
pub fn check_mint_args(creator: Address, uri: &str) -> ChainResult<()> {
    if creator.is_zero() {
        return Err(ChainError::new(
            ChainError::INVALID_INPUT,
            "cannot mint to the zero address",
        ));
    }
    if uri.strip_prefix("ipfs://").map_or(true, str::is_empty) {
        return Err(ChainError::new(
            ChainError::INVALID_INPUT,
            format!("token URI must be ipfs://<cid>, got {uri:?}"),
        ));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────
// ethers implementation
// ─────────────────────────────────────────────────────────

type Client = SignerMiddleware<Provider<Http>, LocalWallet>;

pub struct EthersChain {
    grant_manager: GrantManager<Client>,
    proposal_nft: ProposalNft<Client>,
    token: GovernanceToken<Client>,
}

impl EthersChain {
    /// `wallet` is the admin wallet; it pays for and signs every transaction.
    pub fn connect(config: &Config, wallet: LocalWallet) -> Result<Self> {
        let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
            .map_err(|e| GrantError::Config(format!("Invalid RPC_URL: {e}")))?;
        let client = Arc::new(SignerMiddleware::new(
            provider,
            wallet.with_chain_id(config.chain_id),
        ));

        Ok(Self {
            grant_manager: GrantManager::new(
                parse_address(&config.grant_manager_address)?,
                client.clone(),
            ),
            proposal_nft: ProposalNft::new(parse_address(&config.proposal_nft_address)?, client.clone()),
            token: GovernanceToken::new(parse_address(&config.governance_token_address)?, client),
        })
    }
}

fn contract_error<M: Middleware>(e: ContractError<M>) -> ChainError {
    let message = e.to_string();
    let code = match e {
        ContractError::Revert(_) => ChainError::REVERTED,
        ContractError::DecodingError(_)
        | ContractError::AbiError(_)
        | ContractError::DetokenizationError(_) => ChainError::DECODE,
        ContractError::MiddlewareError { .. } | ContractError::ProviderError { .. } => {
            if message.contains("revert") {
                ChainError::REVERTED
            } else {
                ChainError::TRANSPORT
            }
        }
        _ => ChainError::OTHER,
    };
    ChainError::new(code, message)
}

/// `ownerOf` result as existence. A revert or undecodable reply means the
/// token was never minted.
fn owner_exists<M: Middleware>(result: std::result::Result<Address, ContractError<M>>) -> ChainResult<bool> {
    match result {
        Ok(_) => Ok(true),
        Err(e) => {
            let err = contract_error(e);
            if err.is_soft_not_found() {
                Ok(false)
            } else {
                Err(err)
            }
        }
    }
}

fn confirmed(receipt: Option<TransactionReceipt>, what: &str) -> ChainResult<TransactionReceipt> {
    let receipt = receipt.ok_or_else(|| {
        ChainError::new(ChainError::OTHER, format!("`{what}` transaction dropped"))
    })?;
    if receipt.status != Some(U64::from(1)) {
        return Err(ChainError::new(
            ChainError::REVERTED,
            format!("`{what}` transaction reverted: {:?}", receipt.transaction_hash),
        ));
    }
    Ok(receipt)
}

fn tx_hash(receipt: &TransactionReceipt) -> String {
    format!("{:?}", receipt.transaction_hash)
}

#[async_trait]
impl GrantChain for EthersChain {
    fn grant_manager_address(&self) -> Address {
        self.grant_manager.address()
    }

    async fn token_exists(&self, token_id: U256) -> ChainResult<bool> {
        owner_exists(self.proposal_nft.owner_of(token_id).call().await)
    }

    async fn mint_proposal(&self, creator: Address, uri: &str) -> ChainResult<MintReceipt> {
        check_mint_args(creator, uri)?;
        let call = self.grant_manager.mint_proposal(creator, uri.to_string());
        let pending = call.send().await.map_err(contract_error)?;
        let receipt = pending
            .await
            .map_err(|e| ChainError::new(ChainError::TRANSPORT, e.to_string()))?;
        let receipt = confirmed(receipt, "mintProposal")?;

        let token_id = minted_token_id(&receipt.logs, self.proposal_nft.address());
        debug!("mintProposal mined in {} (token id {:?})", tx_hash(&receipt), token_id);
        Ok(MintReceipt {
            tx_hash: tx_hash(&receipt),
            token_id,
        })
    }

    async fn start_vote(&self, proposal_id: U256) -> ChainResult<String> {
        let call = self.grant_manager.start_vote(proposal_id);
        let pending = call.send().await.map_err(contract_error)?;
        let receipt = pending
            .await
            .map_err(|e| ChainError::new(ChainError::TRANSPORT, e.to_string()))?;
        let receipt = confirmed(receipt, "startVote")?;
        Ok(tx_hash(&receipt))
    }

    async fn grant_proposal(&self, proposal_id: U256) -> ChainResult<OnChainProposal> {
        let (nft_id, end_time, total_votes, executed, creator) = self
            .grant_manager
            .grant_proposals(proposal_id)
            .call()
            .await
            .map_err(contract_error)?;
        Ok(OnChainProposal {
            nft_id,
            end_time,
            total_votes,
            executed,
            creator,
        })
    }

    async fn donations(&self, proposal_id: U256) -> ChainResult<Vec<Donation>> {
        let events = self
            .grant_manager
            .donated_filter()
            .from_block(0u64)
            .topic1(proposal_id)
            .query()
            .await
            .map_err(contract_error)?;
        Ok(events
            .into_iter()
            .map(|ev| Donation {
                donor: ev.donor,
                amount: ev.amount,
            })
            .collect())
    }

    async fn token_balance(&self, owner: Address) -> ChainResult<U256> {
        self.token.balance_of(owner).call().await.map_err(contract_error)
    }

    async fn token_symbol(&self) -> ChainResult<String> {
        self.token.symbol().call().await.map_err(contract_error)
    }

    async fn transfer_tokens(&self, to: Address, amount: U256) -> ChainResult<String> {
        let call = self.token.transfer(to, amount);
        let pending = call.send().await.map_err(contract_error)?;
        let receipt = pending
            .await
            .map_err(|e| ChainError::new(ChainError::TRANSPORT, e.to_string()))?;
        let receipt = confirmed(receipt, "transfer")?;
        Ok(tx_hash(&receipt))
    }
}
