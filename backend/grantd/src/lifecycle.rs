//! Proposal lifecycle coordinator.
//!
//! Drives a project through `pending` → minted (proposal id recorded) →
//! `active_voting`. Guards that can be decided off-chain (ownership, already
//! minted, already active) are returned as errors. Chain and storage failures
//! are returned as a failed [`ChainOutcome`] and leave the project in its last
//! good state; nothing is rolled back and nothing is retried.

use chrono::Utc;
use ethers::types::U256;
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::chain::{scan_next_token_id, GrantChain};
use crate::db;
use crate::errors::{GrantError, Result};
use crate::ipfs::{ipfs_uri, ContentStore};
use crate::models::{Project, ProjectDetail, ProjectStatus, User};
use crate::signer::parse_address;
use crate::stats::{get_stats, ProposalStats};

/// `{ success: true, ...value }` or `{ success: false, error }`.
#[derive(Debug, Clone, Serialize)]
pub struct ChainOutcome<T> {
    pub success: bool,
    #[serde(flatten)]
    pub value: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ChainOutcome<T> {
    pub fn ok(value: T) -> Self {
        Self {
            success: true,
            value: Some(value),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            value: None,
            error: Some(error.into()),
        }
    }

    /// Keep chain/storage failures as a failed outcome; anything else is
    /// still an error.
    fn settle(result: Result<T>) -> Result<Self> {
        match result {
            Ok(value) => Ok(Self::ok(value)),
            Err(GrantError::Chain(e)) => Ok(Self::failed(e.message)),
            Err(GrantError::Storage(msg)) => Ok(Self::failed(msg)),
            Err(GrantError::Http(e)) => Ok(Self::failed(e.to_string())),
            Err(other) => Err(other),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Minted {
    pub token_id: i64,
    pub tx_hash: String,
    pub ipfs_cid: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingStarted {
    pub tx_hash: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedProject {
    pub project: Project,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mint: Option<ChainOutcome<Minted>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voting: Option<ChainOutcome<VotingStarted>>,
}

async fn require_project(pool: &SqlitePool, id: i64) -> Result<Project> {
    db::get_project(pool, id)
        .await?
        .ok_or_else(|| GrantError::NotFound("No project found".to_string()))
}

fn require_owner_or_admin(project: &Project, actor: &User) -> Result<()> {
    if project.creator_id == actor.id || actor.is_admin {
        Ok(())
    } else {
        Err(GrantError::Authorization(
            "Only the project creator can do this".to_string(),
        ))
    }
}

async fn advance(pool: &SqlitePool, project: &Project, next: ProjectStatus) -> Result<()> {
    if !project.status.can_transition_to(next) {
        return Err(GrantError::Conflict(format!(
            "Cannot move project from {} to {}",
            project.status.as_str(),
            next.as_str()
        )));
    }
    if next == ProjectStatus::ActiveVoting && !project.is_minted() {
        return Err(GrantError::Validation("Project NFT not yet minted".to_string()));
    }
    db::update_project_status(pool, project.id, next).await
}

pub async fn list_projects(pool: &SqlitePool) -> Result<Vec<ProjectDetail>> {
    db::list_projects(pool).await
}

pub async fn get_project(pool: &SqlitePool, id: i64) -> Result<ProjectDetail> {
    db::get_project_detail(pool, id)
        .await?
        .ok_or_else(|| GrantError::NotFound("No project found".to_string()))
}

/// Persist a new `pending` project and, with `auto_mint`, mint it and open
/// voting. Outcomes of the chain steps are reported next to the stored
/// project, which is re-read so it reflects whatever step last succeeded.
pub async fn create_project(
    pool: &SqlitePool,
    chain: &dyn GrantChain,
    store: &dyn ContentStore,
    creator: &User,
    title: &str,
    description: &str,
    auto_mint: bool,
) -> Result<CreatedProject> {
    let (title, description) = (title.trim(), description.trim());
    if title.is_empty() || description.is_empty() {
        return Err(GrantError::Validation(
            "Title and description are required".to_string(),
        ));
    }

    let project = db::insert_project(pool, creator.id, title, description).await?;
    info!("Project {} created by user {}", project.id, creator.id);

    if !auto_mint {
        return Ok(CreatedProject {
            project,
            mint: None,
            voting: None,
        });
    }

    let mint = match mint(pool, chain, store, project.id, creator).await {
        Ok(outcome) => outcome,
        Err(e) => ChainOutcome::failed(e.to_string()),
    };
    let voting = if mint.success {
        Some(match start_voting(pool, chain, project.id, creator).await {
            Ok(outcome) => outcome,
            Err(e) => ChainOutcome::failed(e.to_string()),
        })
    } else {
        None
    };

    Ok(CreatedProject {
        project: require_project(pool, project.id).await?,
        mint: Some(mint),
        voting,
    })
}

fn proposal_metadata(project: &Project, creator_address: &str) -> Value {
    json!({
        "name": project.title,
        "description": project.description,
        "attributes": [
            { "trait_type": "Creator", "value": creator_address },
            { "trait_type": "Project ID", "value": project.id.to_string() },
            { "trait_type": "Created", "value": Utc::now().to_rfc3339() }
        ]
    })
}

/// Mint the project's proposal NFT through `GrantManager`.
///
/// Rejected before any chain call when a proposal id is already recorded.
pub async fn mint(
    pool: &SqlitePool,
    chain: &dyn GrantChain,
    store: &dyn ContentStore,
    project_id: i64,
    actor: &User,
) -> Result<ChainOutcome<Minted>> {
    let project = require_project(pool, project_id).await?;
    require_owner_or_admin(&project, actor)?;
    if project.is_minted() {
        return Err(GrantError::Conflict("Project NFT already minted".to_string()));
    }

    let creator = db::find_user(pool, project.creator_id)
        .await?
        .ok_or_else(|| GrantError::NotFound("Project creator not found".to_string()))?;
    let creator_address = parse_address(&creator.wallet_address)?;

    ChainOutcome::settle(
        submit_mint(pool, chain, store, &project, &creator.wallet_address, creator_address).await,
    )
}

async fn submit_mint(
    pool: &SqlitePool,
    chain: &dyn GrantChain,
    store: &dyn ContentStore,
    project: &Project,
    creator_wallet: &str,
    creator_address: ethers::types::Address,
) -> Result<Minted> {
    // A retry reuses the metadata pinned by an earlier attempt.
    let cid = match &project.ipfs_cid {
        Some(cid) => cid.clone(),
        None => {
            let cid = store.pin_json(&proposal_metadata(project, creator_wallet)).await?;
            db::record_project_cid(pool, project.id, &cid).await?;
            cid
        }
    };

    let receipt = chain.mint_proposal(creator_address, &ipfs_uri(&cid)).await?;
    let token_id = match receipt.token_id {
        Some(id) => id,
        None => {
            warn!(
                "Mint receipt {} carries no Transfer log; probing for the token id",
                receipt.tx_hash
            );
            let next = scan_next_token_id(chain).await?;
            if next.is_zero() {
                return Err(GrantError::Chain(crate::errors::ChainError::new(
                    crate::errors::ChainError::OTHER,
                    "mint confirmed but no token exists",
                )));
            }
            next - U256::one()
        }
    };
    if token_id > U256::from(i64::MAX as u64) {
        return Err(GrantError::Validation(format!("Token id {token_id} out of range")));
    }
    let token_id = token_id.as_u64() as i64;

    let contract_address = format!("{:?}", chain.grant_manager_address());
    if !db::record_minted(pool, project.id, token_id, &contract_address).await? {
        return Err(GrantError::Conflict(format!(
            "Project {} was minted concurrently",
            project.id
        )));
    }
    info!(
        "Project {} minted as proposal {token_id} ({})",
        project.id, receipt.tx_hash
    );

    Ok(Minted {
        token_id,
        tx_hash: receipt.tx_hash,
        ipfs_cid: cid,
    })
}

/// Open voting on chain and move the project to `active_voting`.
///
/// Stats are read first; if the chain already reports voting as started the
/// project status is brought in line and the call is refused.
pub async fn start_voting(
    pool: &SqlitePool,
    chain: &dyn GrantChain,
    project_id: i64,
    actor: &User,
) -> Result<ChainOutcome<VotingStarted>> {
    let project = require_project(pool, project_id).await?;
    require_owner_or_admin(&project, actor)?;
    let token_id = project
        .token_id()
        .ok_or_else(|| GrantError::Validation("Project NFT not yet minted".to_string()))?;
    if project.status == ProjectStatus::ActiveVoting {
        return Err(GrantError::Conflict("Voting already active".to_string()));
    }
    if project.status.is_terminal() {
        return Err(GrantError::Conflict(format!(
            "Project is already {}",
            project.status.as_str()
        )));
    }

    let stats = match get_stats(chain, U256::from(token_id)).await {
        Ok(stats) => stats,
        Err(GrantError::Chain(e)) => return Ok(ChainOutcome::failed(e.message)),
        Err(e) => return Err(e),
    };
    if stats.voting_started {
        info!("Proposal {token_id} already voting on chain; syncing project {project_id}");
        advance(pool, &project, ProjectStatus::ActiveVoting).await?;
        return Err(GrantError::Conflict("Voting already active".to_string()));
    }

    let tx_hash = match chain.start_vote(U256::from(token_id)).await {
        Ok(hash) => hash,
        Err(e) => {
            warn!("startVote({token_id}) failed: {e}");
            return Ok(ChainOutcome::failed(e.message));
        }
    };
    advance(pool, &project, ProjectStatus::ActiveVoting).await?;
    info!("Voting started for project {project_id} (proposal {token_id}, {tx_hash})");

    Ok(ChainOutcome::ok(VotingStarted { tx_hash }))
}

/// Delete a project. Creator only, and only while `pending`.
pub async fn delete_project(pool: &SqlitePool, project_id: i64, actor: &User) -> Result<()> {
    let project = require_project(pool, project_id).await?;
    if project.creator_id != actor.id {
        return Err(GrantError::Authorization(
            "Only the project creator can delete it".to_string(),
        ));
    }
    if project.status != ProjectStatus::Pending || !db::delete_pending_project(pool, project_id).await? {
        return Err(GrantError::Conflict(
            "Only pending projects can be deleted".to_string(),
        ));
    }
    info!("Project {project_id} deleted by user {}", actor.id);
    Ok(())
}

/// Stats for a project's proposal.
pub async fn project_stats(
    pool: &SqlitePool,
    chain: &dyn GrantChain,
    project_id: i64,
) -> Result<ChainOutcome<ProposalStats>> {
    let project = require_project(pool, project_id).await?;
    let token_id = project
        .token_id()
        .ok_or_else(|| GrantError::Validation("Project NFT not yet minted".to_string()))?;
    ChainOutcome::settle(get_stats(chain, U256::from(token_id)).await)
}
