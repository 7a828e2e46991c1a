//! Persisted records and their enumerated fields.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a project.
///
/// Being minted is not a stored status; it is tracked through
/// [`Project::nft_token_id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ProjectStatus {
    Pending,
    ActiveVoting,
    Successful,
    Failed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::ActiveVoting => "active_voting",
            Self::Successful => "successful",
            Self::Failed => "failed",
        }
    }

    /// pending → active_voting → {successful, failed}
    pub fn can_transition_to(&self, next: ProjectStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::ActiveVoting)
                | (Self::ActiveVoting, Self::Successful)
                | (Self::ActiveVoting, Self::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Successful | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ContributionType {
    Code,
    Design,
    Documentation,
    Testing,
    Marketing,
    Other,
}

impl ContributionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Design => "design",
            Self::Documentation => "documentation",
            Self::Testing => "testing",
            Self::Marketing => "marketing",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ContributionStatus {
    Pending,
    Verified,
    Rejected,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub wallet_address: String,
    #[serde(skip_serializing)]
    pub nonce: Option<String>,
    pub username: Option<String>,
    pub is_admin: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: i64,
    pub creator_id: i64,
    pub title: String,
    pub description: String,
    pub status: ProjectStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nft_token_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipfs_cid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Project {
    pub fn is_minted(&self) -> bool {
        self.nft_token_id.is_some()
    }

    pub fn token_id(&self) -> Option<u64> {
        self.nft_token_id.and_then(|id| u64::try_from(id).ok())
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Contribution {
    pub id: i64,
    pub contributor_id: i64,
    pub project_id: i64,
    pub contribution_type: ContributionType,
    pub description: String,
    pub proof_url: Option<String>,
    pub weight: i64,
    pub status: ContributionStatus,
    pub verified_by: Option<i64>,
    pub verified_at: Option<i64>,
    pub credential_issued: bool,
    pub credential_cid: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Contribution {
    /// Only verified contributions with an issued credential carry weight.
    pub fn counts_toward_weight(&self) -> bool {
        self.status == ContributionStatus::Verified && self.credential_issued
    }
}

/// Public fields of a user referenced from another record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: i64,
    pub wallet_address: String,
    pub username: Option<String>,
}

/// A project with its creator, as listed and fetched over the API.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub project: Project,
    pub creator: Participant,
}

/// A contribution with the people and project it refers to.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionDetail {
    #[serde(flatten)]
    pub contribution: Contribution,
    pub contributor: Participant,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verifier: Option<Participant>,
    pub project_title: String,
}
