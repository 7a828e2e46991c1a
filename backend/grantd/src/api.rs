//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, PathRejection},
        FromRequest, FromRequestParts, Path, Request, State,
    },
    http::request::Parts,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::auth::{self, AuthUser};
use crate::chain::GrantChain;
use crate::config::Config;
use crate::errors::{GrantError, Result};
use crate::faucet;
use crate::ipfs::ContentStore;
use crate::ledger;
use crate::lifecycle::{self, ChainOutcome};
use crate::models::{Contribution, ContributionStatus, ContributionType};
use crate::signer::CredentialSigner;

pub struct AppState {
    pub pool: SqlitePool,
    pub chain: Arc<dyn GrantChain>,
    pub store: Arc<dyn ContentStore>,
    pub signer: CredentialSigner,
    pub config: Config,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/auth/message", post(auth_message))
        .route("/api/auth/verify", post(auth_verify))
        .route("/api/projects", get(list_projects).post(create_project))
        .route("/api/projects/mint", post(mint_project))
        .route("/api/projects/start-voting", post(start_voting))
        .route("/api/projects/:id", get(get_project).delete(delete_project))
        .route("/api/projects/:id/stats", get(project_stats))
        .route("/api/contributions", post(submit_contribution))
        .route("/api/contributions/user", get(user_contributions))
        .route(
            "/api/contributions/project/:project_id",
            get(project_contributions),
        )
        .route("/api/contributions/verify", post(verify_contribution))
        .route("/api/contributions/issue-credential", post(issue_credential))
        .route("/api/contributions/signature", post(contribution_signature))
        .route("/api/faucet/request", post(faucet_request))
        .route("/api/faucet/balance/:wallet_address", get(faucet_balance))
        .with_state(state)
}

/// 200 (or `ok`) for a successful chain outcome, 502 for a failed one.
fn outcome_response<T: Serialize>(ok: StatusCode, outcome: ChainOutcome<T>) -> Response {
    let status = if outcome.success {
        ok
    } else {
        StatusCode::BAD_GATEWAY
    };
    (status, Json(outcome)).into_response()
}

// ─────────────────────────────────────────────────────────
// Extractors
// ─────────────────────────────────────────────────────────

/// `Json` whose rejection is a 400 with the usual `{ message }` body.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = GrantError;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

/// `Path` with the same error body as [`ApiJson`].
pub struct ApiPath<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    Path<T>: FromRequestParts<S, Rejection = PathRejection>,
    S: Send + Sync,
{
    type Rejection = GrantError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub signer: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRequest {
    #[serde(default)]
    pub wallet_address: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[serde(default)]
    pub wallet_address: String,
    #[serde(default)]
    pub signature: String,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub auto_mint: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRef {
    pub project_id: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitContributionRequest {
    pub project_id: i64,
    pub contribution_type: ContributionType,
    #[serde(default)]
    pub description: String,
    pub proof_url: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyContributionRequest {
    pub contribution_id: i64,
    pub weight: Option<i64>,
    pub status: ContributionStatus,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionRef {
    pub contribution_id: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureRequest {
    pub nft_id: u64,
    #[serde(default)]
    pub contributor_address: String,
}

#[derive(Serialize)]
pub struct ContributionResponse {
    pub message: &'static str,
    pub contribution: Contribution,
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        signer: format!("{:?}", state.signer.address()),
    })
}

/// `POST /api/auth/message`
pub async fn auth_message(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<WalletRequest>,
) -> Result<Json<MessageResponse>> {
    let message = auth::auth_message(&state.pool, &body.wallet_address).await?;
    Ok(Json(MessageResponse { message }))
}

/// `POST /api/auth/verify`
pub async fn auth_verify(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<LoginRequest>,
) -> Result<Json<auth::Session>> {
    let session = auth::verify_login(
        &state.pool,
        &body.wallet_address,
        &body.signature,
        state.config.session_ttl_secs,
    )
    .await?;
    Ok(Json(session))
}

/// `GET /api/projects`
pub async fn list_projects(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse> {
    Ok(Json(lifecycle::list_projects(&state.pool).await?))
}

/// `GET /api/projects/:id`
pub async fn get_project(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse> {
    Ok(Json(lifecycle::get_project(&state.pool, id).await?))
}

/// `GET /api/projects/:id/stats`
pub async fn project_stats(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Response> {
    let outcome = lifecycle::project_stats(&state.pool, state.chain.as_ref(), id).await?;
    Ok(outcome_response(StatusCode::OK, outcome))
}

/// `POST /api/projects`
///
/// The project is stored even when `autoMint` fails on chain; the step
/// outcomes are reported next to it.
pub async fn create_project(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ApiJson(body): ApiJson<CreateProjectRequest>,
) -> Result<impl IntoResponse> {
    let created = lifecycle::create_project(
        &state.pool,
        state.chain.as_ref(),
        state.store.as_ref(),
        &user,
        &body.title,
        &body.description,
        body.auto_mint,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `POST /api/projects/mint`
pub async fn mint_project(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ApiJson(body): ApiJson<ProjectRef>,
) -> Result<Response> {
    let outcome = lifecycle::mint(
        &state.pool,
        state.chain.as_ref(),
        state.store.as_ref(),
        body.project_id,
        &user,
    )
    .await?;
    Ok(outcome_response(StatusCode::OK, outcome))
}

/// `POST /api/projects/start-voting`
pub async fn start_voting(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ApiJson(body): ApiJson<ProjectRef>,
) -> Result<Response> {
    let outcome =
        lifecycle::start_voting(&state.pool, state.chain.as_ref(), body.project_id, &user).await?;
    Ok(outcome_response(StatusCode::OK, outcome))
}

/// `DELETE /api/projects/:id`
pub async fn delete_project(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<MessageResponse>> {
    lifecycle::delete_project(&state.pool, id, &user).await?;
    Ok(Json(MessageResponse {
        message: "Project deleted successfully".to_string(),
    }))
}

/// `POST /api/contributions`
pub async fn submit_contribution(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ApiJson(body): ApiJson<SubmitContributionRequest>,
) -> Result<impl IntoResponse> {
    let contribution = ledger::submit(
        &state.pool,
        &user,
        body.project_id,
        body.contribution_type,
        &body.description,
        body.proof_url.as_deref(),
    )
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(ContributionResponse {
            message: "Contribution submitted successfully",
            contribution,
        }),
    ))
}

/// `GET /api/contributions/user`
pub async fn user_contributions(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<impl IntoResponse> {
    Ok(Json(ledger::list_by_user(&state.pool, user.id).await?))
}

/// `GET /api/contributions/project/:project_id`
pub async fn project_contributions(
    State(state): State<Arc<AppState>>,
    ApiPath(project_id): ApiPath<i64>,
) -> Result<impl IntoResponse> {
    Ok(Json(ledger::list_by_project(&state.pool, project_id).await?))
}

/// `POST /api/contributions/verify`
pub async fn verify_contribution(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ApiJson(body): ApiJson<VerifyContributionRequest>,
) -> Result<Json<ContributionResponse>> {
    let contribution = ledger::verify(
        &state.pool,
        body.contribution_id,
        body.weight,
        body.status,
        &user,
    )
    .await?;
    Ok(Json(ContributionResponse {
        message: "Contribution verified successfully",
        contribution,
    }))
}

/// `POST /api/contributions/issue-credential`
pub async fn issue_credential(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ApiJson(body): ApiJson<ContributionRef>,
) -> Result<impl IntoResponse> {
    let issued = ledger::issue_credential(
        &state.pool,
        state.store.as_ref(),
        body.contribution_id,
        &user,
    )
    .await?;
    Ok(Json(issued))
}

/// `POST /api/contributions/signature`
pub async fn contribution_signature(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ApiJson(body): ApiJson<SignatureRequest>,
) -> Result<impl IntoResponse> {
    let attestation = ledger::attest_weight(
        &state.pool,
        &state.signer,
        &user,
        body.nft_id,
        &body.contributor_address,
    )
    .await?;
    Ok(Json(attestation))
}

/// `POST /api/faucet/request`
pub async fn faucet_request(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<WalletRequest>,
) -> Result<impl IntoResponse> {
    let drip = faucet::request_tokens(state.chain.as_ref(), &state.config, &body.wallet_address)
        .await?;
    Ok(Json(drip))
}

/// `GET /api/faucet/balance/:wallet_address`
pub async fn faucet_balance(
    State(state): State<Arc<AppState>>,
    ApiPath(wallet_address): ApiPath<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(faucet::balance(state.chain.as_ref(), &wallet_address).await?))
}
