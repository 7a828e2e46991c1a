//! Test doubles and fixtures shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::{Address, U256};
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::Mutex;

use crate::api::AppState;
use crate::chain::{check_mint_args, ChainResult, Donation, GrantChain, MintReceipt, OnChainProposal};
use crate::config::Config;
use crate::db;
use crate::errors::{ChainError, GrantError, Result};
use crate::ipfs::ContentStore;
use crate::signer::CredentialSigner;

/// First anvil/hardhat dev account.
pub const ANVIL_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const ANVIL_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

/// Second anvil/hardhat dev account.
pub const VOTER_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
pub const VOTER_ADDRESS: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";

pub fn ether(n: u64) -> U256 {
    U256::from(n) * U256::exp10(18)
}

pub async fn test_pool() -> SqlitePool {
    db::init_pool("sqlite::memory:").await.unwrap()
}

pub fn test_config() -> Config {
    Config {
        rpc_url: "http://127.0.0.1:8545".to_string(),
        chain_id: 31337,
        admin_private_key: ANVIL_KEY.to_string(),
        grant_manager_address: format!("{:?}", FakeChain::GRANT_MANAGER),
        proposal_nft_address: "0x0000000000000000000000000000000000000a11".to_string(),
        governance_token_address: "0x0000000000000000000000000000000000000a12".to_string(),
        database_url: "sqlite::memory:".to_string(),
        api_port: 0,
        pinata_url: "http://127.0.0.1:1".to_string(),
        pinata_api_key: String::new(),
        pinata_api_secret_key: String::new(),
        session_ttl_secs: 3600,
        faucet_amount: 1000,
        faucet_min_balance: 100,
        status_sync_interval_secs: 0,
        admin_addresses: Vec::new(),
    }
}

pub async fn test_state(chain: Arc<FakeChain>, store: Arc<FakeContentStore>) -> Arc<AppState> {
    Arc::new(AppState {
        pool: test_pool().await,
        chain,
        store,
        signer: CredentialSigner::from_private_key(ANVIL_KEY).unwrap(),
        config: test_config(),
    })
}

// ─────────────────────────────────────────────────────────
// Chain
// ─────────────────────────────────────────────────────────

#[derive(Default)]
struct ChainState {
    minted: u64,
    proposals: HashMap<u64, OnChainProposal>,
    donations: Vec<(u64, Donation)>,
    balances: HashMap<Address, U256>,
    omit_transfer_log: bool,
    fail_mint: Option<ChainError>,
    fail_start_vote: Option<ChainError>,
    fail_reads: Option<ChainError>,
    fail_donations: Option<ChainError>,
}

/// In-memory `GrantChain`. Unknown proposals fail to decode, like the real
/// contract read does before `startVote`.
#[derive(Default)]
pub struct FakeChain {
    state: Mutex<ChainState>,
    pub mint_calls: AtomicU64,
    pub start_vote_calls: AtomicU64,
    pub transfer_calls: AtomicU64,
}

impl FakeChain {
    pub const GRANT_MANAGER: Address = Address::repeat_byte(0x6a);

    pub fn mints(&self) -> u64 {
        self.mint_calls.load(Ordering::SeqCst)
    }

    pub fn start_votes(&self) -> u64 {
        self.start_vote_calls.load(Ordering::SeqCst)
    }

    pub async fn set_minted_count(&self, count: u64) {
        self.state.lock().await.minted = count;
    }

    pub async fn set_proposal(&self, id: u64, end_time: u64, total_votes: U256) {
        self.state.lock().await.proposals.insert(
            id,
            OnChainProposal {
                nft_id: U256::from(id),
                end_time: U256::from(end_time),
                total_votes,
                executed: false,
                creator: Address::zero(),
            },
        );
    }

    pub async fn add_donation(&self, id: u64, amount: U256) {
        let mut state = self.state.lock().await;
        let donor = Address::from_low_u64_be(state.donations.len() as u64 + 1);
        state.donations.push((id, Donation { donor, amount }));
    }

    pub async fn set_balance(&self, owner: Address, amount: U256) {
        self.state.lock().await.balances.insert(owner, amount);
    }

    pub async fn omit_transfer_log(&self) {
        self.state.lock().await.omit_transfer_log = true;
    }

    pub async fn fail_mint(&self, e: ChainError) {
        self.state.lock().await.fail_mint = Some(e);
    }

    pub async fn fail_start_vote(&self, e: ChainError) {
        self.state.lock().await.fail_start_vote = Some(e);
    }

    pub async fn fail_reads(&self, e: ChainError) {
        self.state.lock().await.fail_reads = Some(e);
    }

    pub async fn fail_donations(&self, e: ChainError) {
        self.state.lock().await.fail_donations = Some(e);
    }
}

fn fake_hash(n: u64) -> String {
    format!("0x{n:064x}")
}

#[async_trait]
impl GrantChain for FakeChain {
    fn grant_manager_address(&self) -> Address {
        Self::GRANT_MANAGER
    }

    async fn token_exists(&self, token_id: U256) -> ChainResult<bool> {
        let state = self.state.lock().await;
        if let Some(e) = &state.fail_reads {
            return Err(e.clone());
        }
        Ok(token_id < U256::from(state.minted))
    }

    async fn mint_proposal(&self, creator: Address, uri: &str) -> ChainResult<MintReceipt> {
        let n = self.mint_calls.fetch_add(1, Ordering::SeqCst) + 1;
        check_mint_args(creator, uri)?;
        let mut state = self.state.lock().await;
        if let Some(e) = &state.fail_mint {
            return Err(e.clone());
        }
        let id = state.minted;
        state.minted += 1;
        Ok(MintReceipt {
            tx_hash: fake_hash(n),
            token_id: (!state.omit_transfer_log).then(|| U256::from(id)),
        })
    }

    async fn start_vote(&self, proposal_id: U256) -> ChainResult<String> {
        let n = self.start_vote_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.lock().await;
        if let Some(e) = &state.fail_start_vote {
            return Err(e.clone());
        }
        let id = proposal_id.as_u64();
        if id >= state.minted {
            return Err(ChainError::new(ChainError::REVERTED, "Proposal NFT does not exist"));
        }
        if state.proposals.get(&id).is_some_and(|p| !p.end_time.is_zero()) {
            return Err(ChainError::new(ChainError::REVERTED, "Voting already started"));
        }
        state.proposals.insert(
            id,
            OnChainProposal {
                nft_id: proposal_id,
                end_time: U256::from(1_900_000_000u64),
                total_votes: U256::zero(),
                executed: false,
                creator: Address::zero(),
            },
        );
        Ok(fake_hash(1000 + n))
    }

    async fn grant_proposal(&self, proposal_id: U256) -> ChainResult<OnChainProposal> {
        let state = self.state.lock().await;
        if let Some(e) = &state.fail_reads {
            return Err(e.clone());
        }
        state
            .proposals
            .get(&proposal_id.as_u64())
            .cloned()
            .ok_or_else(|| ChainError::new(ChainError::DECODE, "could not decode result data"))
    }

    async fn donations(&self, proposal_id: U256) -> ChainResult<Vec<Donation>> {
        let state = self.state.lock().await;
        if let Some(e) = &state.fail_donations {
            return Err(e.clone());
        }
        Ok(state
            .donations
            .iter()
            .filter(|(id, _)| U256::from(*id) == proposal_id)
            .map(|(_, d)| d.clone())
            .collect())
    }

    async fn token_balance(&self, owner: Address) -> ChainResult<U256> {
        let state = self.state.lock().await;
        if let Some(e) = &state.fail_reads {
            return Err(e.clone());
        }
        Ok(state.balances.get(&owner).copied().unwrap_or_default())
    }

    async fn token_symbol(&self) -> ChainResult<String> {
        Ok("DMCG".to_string())
    }

    async fn transfer_tokens(&self, to: Address, amount: U256) -> ChainResult<String> {
        let n = self.transfer_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.lock().await;
        let balance = state.balances.entry(to).or_default();
        *balance = balance.saturating_add(amount);
        Ok(fake_hash(2000 + n))
    }
}

// ─────────────────────────────────────────────────────────
// Content store
// ─────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeContentStore {
    pub pinned: Mutex<Vec<Value>>,
    fail: Mutex<bool>,
}

impl FakeContentStore {
    pub async fn fail_uploads(&self) {
        *self.fail.lock().await = true;
    }

    pub async fn pinned_count(&self) -> usize {
        self.pinned.lock().await.len()
    }
}

#[async_trait]
impl ContentStore for FakeContentStore {
    async fn pin_json(&self, document: &Value) -> Result<String> {
        if *self.fail.lock().await {
            return Err(GrantError::Storage("Failed to upload JSON to IPFS".to_string()));
        }
        let mut pinned = self.pinned.lock().await;
        pinned.push(document.clone());
        Ok(format!("QmFake{}", pinned.len()))
    }
}
