//! Contribution ledger: submissions, verification, credentials and the
//! voting weight derived from them.

use chrono::{DateTime, Utc};
use ethers::types::U256;
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tracing::info;

use crate::db;
use crate::errors::{GrantError, Result};
use crate::ipfs::{gateway_url, ContentStore};
use crate::models::{
    Contribution, ContributionDetail, ContributionStatus, ContributionType, Project, User,
};
use crate::signer::{parse_address, signature_hex, CredentialSigner};

pub const ISSUER_DID: &str = "did:dmcgp:platform";
pub const ISSUER_NAME: &str = "DMCGP Platform";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedCredential {
    pub credential: Value,
    pub ipfs_cid: String,
    pub ipfs_url: String,
}

/// Signed voting weight handed to the voter for `castVote`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightAttestation {
    pub contribution_weight: u128,
    pub signature: String,
}

async fn require_project(pool: &SqlitePool, project_id: i64) -> Result<Project> {
    db::get_project(pool, project_id)
        .await?
        .ok_or_else(|| GrantError::NotFound("Project not found".to_string()))
}

async fn require_contribution(pool: &SqlitePool, id: i64) -> Result<Contribution> {
    db::get_contribution(pool, id)
        .await?
        .ok_or_else(|| GrantError::NotFound("Contribution not found".to_string()))
}

pub async fn submit(
    pool: &SqlitePool,
    contributor: &User,
    project_id: i64,
    contribution_type: ContributionType,
    description: &str,
    proof_url: Option<&str>,
) -> Result<Contribution> {
    if description.trim().is_empty() {
        return Err(GrantError::Validation("Missing required fields".to_string()));
    }
    require_project(pool, project_id).await?;

    let proof_url = proof_url.map(str::trim).filter(|u| !u.is_empty());
    let contribution = db::insert_contribution(
        pool,
        contributor.id,
        project_id,
        contribution_type,
        description.trim(),
        proof_url,
    )
    .await?;
    info!(
        "Contribution {} submitted by user {} on project {project_id}",
        contribution.id, contributor.id
    );
    Ok(contribution)
}

pub async fn list_by_project(pool: &SqlitePool, project_id: i64) -> Result<Vec<ContributionDetail>> {
    db::list_contribution_details_by_project(pool, project_id).await
}

pub async fn list_by_user(pool: &SqlitePool, user_id: i64) -> Result<Vec<ContributionDetail>> {
    db::list_contribution_details_by_user(pool, user_id).await
}

/// Record a verification decision. Only the project's creator or an admin
/// may verify; `weight` is applied only to a `verified` decision. Once a
/// credential is published the decision and its weight are final.
pub async fn verify(
    pool: &SqlitePool,
    contribution_id: i64,
    weight: Option<i64>,
    status: ContributionStatus,
    verifier: &User,
) -> Result<Contribution> {
    if weight.is_some_and(|w| w < 0) {
        return Err(GrantError::Validation("Weight must be non-negative".to_string()));
    }
    let contribution = require_contribution(pool, contribution_id).await?;
    let project = require_project(pool, contribution.project_id).await?;

    if project.creator_id != verifier.id && !verifier.is_admin {
        return Err(GrantError::Authorization(
            "Not authorized to verify this contribution".to_string(),
        ));
    }
    if contribution.credential_issued {
        return Err(GrantError::Conflict(
            "Credential already issued; verification is final".to_string(),
        ));
    }

    let weight = if status == ContributionStatus::Verified {
        weight
    } else {
        None
    };
    let updated = db::update_verification(pool, contribution_id, status, weight, verifier.id).await?;
    info!(
        "Contribution {contribution_id} marked {:?} by user {} (weight {})",
        status, verifier.id, updated.weight
    );
    Ok(updated)
}

/// W3C Verifiable Credential document for a verified contribution.
pub fn credential_document(
    contribution: &Contribution,
    contributor: &User,
    project: &Project,
    issued_at: DateTime<Utc>,
) -> Value {
    let verified_at = contribution
        .verified_at
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
        .map(|dt| dt.to_rfc3339());

    json!({
        "@context": [
            "https://www.w3.org/2018/credentials/v1",
            "https://www.w3.org/2018/credentials/examples/v1"
        ],
        "type": ["VerifiableCredential", "ContributionCredential"],
        "issuer": {
            "id": ISSUER_DID,
            "name": ISSUER_NAME
        },
        "issuanceDate": issued_at.to_rfc3339(),
        "credentialSubject": {
            "id": format!("did:dmcgp:{}", contributor.wallet_address),
            "walletAddress": contributor.wallet_address,
            "username": contributor.username,
            "contribution": {
                "type": contribution.contribution_type.as_str(),
                "description": contribution.description,
                "project": {
                    "title": project.title,
                    "id": project.id.to_string()
                },
                "weight": contribution.weight,
                "verifiedAt": verified_at,
                "proofUrl": contribution.proof_url
            }
        }
    })
}

/// Publish a credential for a verified contribution. May be called by the
/// contributor, the project's creator or an admin, and succeeds once.
pub async fn issue_credential(
    pool: &SqlitePool,
    store: &dyn ContentStore,
    contribution_id: i64,
    actor: &User,
) -> Result<IssuedCredential> {
    let contribution = require_contribution(pool, contribution_id).await?;
    let project = require_project(pool, contribution.project_id).await?;

    if contribution.contributor_id != actor.id && project.creator_id != actor.id && !actor.is_admin {
        return Err(GrantError::Authorization(
            "Not authorized to issue this credential".to_string(),
        ));
    }
    if contribution.status != ContributionStatus::Verified {
        return Err(GrantError::Validation(
            "Contribution must be verified first".to_string(),
        ));
    }
    if contribution.credential_issued {
        return Err(GrantError::Validation("Credential already issued".to_string()));
    }

    let contributor = db::find_user(pool, contribution.contributor_id)
        .await?
        .ok_or_else(|| GrantError::NotFound("Contributor not found".to_string()))?;

    let credential = credential_document(&contribution, &contributor, &project, Utc::now());
    let cid = store.pin_json(&credential).await?;

    if !db::mark_credential_issued(pool, contribution_id, &cid).await? {
        return Err(GrantError::Validation("Credential already issued".to_string()));
    }
    info!("Credential for contribution {contribution_id} pinned as {cid}");

    Ok(IssuedCredential {
        credential,
        ipfs_url: gateway_url(&cid),
        ipfs_cid: cid,
    })
}

/// Sum of weights over the user's verified and credentialed contributions.
///
/// Summed as `u128`: each weight is a non-negative `i64`, so no realistic
/// number of rows can overflow it.
pub async fn total_verified_weight(pool: &SqlitePool, user_id: i64) -> Result<u128> {
    let total = db::list_contributions_by_user(pool, user_id)
        .await?
        .iter()
        .filter(|c| c.counts_toward_weight())
        .filter_map(|c| u128::try_from(c.weight).ok())
        .fold(0u128, u128::saturating_add);
    Ok(total)
}

/// Sign the user's current weight for `castVote` on proposal `nft_id`.
///
/// `contributor_address` is the wallet that will cast the vote and must be
/// the authenticated user's own wallet.
pub async fn attest_weight(
    pool: &SqlitePool,
    signer: &CredentialSigner,
    user: &User,
    nft_id: u64,
    contributor_address: &str,
) -> Result<WeightAttestation> {
    let voter = parse_address(contributor_address)?;
    if !contributor_address.trim().eq_ignore_ascii_case(&user.wallet_address) {
        return Err(GrantError::Authorization(
            "Contributor address does not match the signed-in wallet".to_string(),
        ));
    }

    let weight = total_verified_weight(pool, user.id).await?;
    let (proposal_id, signed_weight) = (U256::from(nft_id), U256::from(weight));
    let signature = signer
        .sign(proposal_id, contributor_address.trim(), signed_weight)
        .await?;
    if !signer.verify(&signature, proposal_id, voter, signed_weight) {
        return Err(GrantError::Signing(
            "Signature does not recover to the trusted signer".to_string(),
        ));
    }

    Ok(WeightAttestation {
        contribution_weight: weight,
        signature: signature_hex(&signature),
    })
}
