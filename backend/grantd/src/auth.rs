//! Wallet-signature login.
//!
//! A client asks for a message bound to its wallet, signs it with
//! `personal_sign` and sends the signature back. The nonce is single use; a
//! successful login swaps it for an opaque bearer session.

use std::str::FromStr;
use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::Utc;
use ethers::types::Signature;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::AppState;
use crate::db;
use crate::errors::{GrantError, Result};
use crate::models::User;
use crate::signer::parse_address;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub user_id: i64,
    pub wallet_address: String,
}

fn nonce_message(nonce: &str) -> String {
    format!(
        "Welcome to DMCGP!\n\
         Click to sign in and accept the DMCGP Terms of Service.\n\
         This request will not trigger a blockchain transaction or cost any gas fees.\n\
         \n\
         Nonce: {nonce}"
    )
}

/// Store a fresh login message for `wallet_address` and return it.
pub async fn auth_message(pool: &SqlitePool, wallet_address: &str) -> Result<String> {
    let wallet_address = wallet_address.trim();
    if wallet_address.is_empty() {
        return Err(GrantError::Validation("Wallet Address is required".to_string()));
    }
    parse_address(wallet_address)?;

    let message = nonce_message(&Uuid::new_v4().simple().to_string());
    db::upsert_user_nonce(pool, wallet_address, &message).await?;
    Ok(message)
}

/// Check `signature` against the stored login message and open a session.
pub async fn verify_login(
    pool: &SqlitePool,
    wallet_address: &str,
    signature: &str,
    session_ttl_secs: i64,
) -> Result<Session> {
    if wallet_address.trim().is_empty() || signature.trim().is_empty() {
        return Err(GrantError::Validation(
            "Wallet address and signature are required.".to_string(),
        ));
    }

    let not_found = || GrantError::NotFound("User not found or nonce not generated.".to_string());
    let mut user = db::find_user_by_address(pool, wallet_address.trim())
        .await?
        .ok_or_else(not_found)?;
    let message = user.nonce.take().ok_or_else(not_found)?;

    let signature = Signature::from_str(signature.trim())
        .map_err(|_| GrantError::Validation("Malformed signature".to_string()))?;
    let recovered = signature
        .recover(message.as_str())
        .map_err(|_| GrantError::Unauthenticated("Invalid signature.".to_string()))?;
    if !format!("{recovered:?}").eq_ignore_ascii_case(&user.wallet_address) {
        warn!("Login signature for {} recovered to {recovered:?}", user.wallet_address);
        return Err(GrantError::Unauthenticated("Invalid signature.".to_string()));
    }

    db::clear_nonce(pool, user.id).await?;
    let token = Uuid::new_v4().to_string();
    let expires_at = Utc::now().timestamp() + session_ttl_secs;
    db::create_session(pool, &token, user.id, expires_at).await?;
    info!("User {} signed in", user.id);

    Ok(Session {
        token,
        user_id: user.id,
        wallet_address: user.wallet_address,
    })
}

/// The signed-in user, resolved from `Authorization: Bearer <token>`.
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = GrantError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> std::result::Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GrantError::Unauthenticated("No token, authorization denied".to_string()))?;

        db::find_session_user(&state.pool, token)
            .await?
            .map(AuthUser)
            .ok_or_else(|| GrantError::Unauthenticated("Token is not valid".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_pool, ANVIL_KEY, VOTER_ADDRESS, VOTER_KEY};
    use ethers::signers::{LocalWallet, Signer};

    async fn sign(key: &str, message: &str) -> String {
        let wallet = LocalWallet::from_str(key.trim_start_matches("0x")).unwrap();
        let signature = wallet.sign_message(message).await.unwrap();
        crate::signer::signature_hex(&signature)
    }

    #[tokio::test]
    async fn login_round_trip() {
        let pool = test_pool().await;
        let message = auth_message(&pool, VOTER_ADDRESS).await.unwrap();
        assert!(message.starts_with("Welcome to DMCGP!"));
        assert!(message.contains("Nonce: "));

        let signature = sign(VOTER_KEY, &message).await;
        let session = verify_login(&pool, VOTER_ADDRESS, &signature, 60).await.unwrap();
        assert_eq!(session.wallet_address, VOTER_ADDRESS.to_lowercase());

        let user = db::find_session_user(&pool, &session.token).await.unwrap().unwrap();
        assert_eq!(user.id, session.user_id);
        assert!(user.nonce.is_none());
    }

    #[tokio::test]
    async fn nonce_is_single_use() {
        let pool = test_pool().await;
        let message = auth_message(&pool, VOTER_ADDRESS).await.unwrap();
        let signature = sign(VOTER_KEY, &message).await;
        verify_login(&pool, VOTER_ADDRESS, &signature, 60).await.unwrap();

        let err = verify_login(&pool, VOTER_ADDRESS, &signature, 60).await.unwrap_err();
        assert!(matches!(err, GrantError::NotFound(_)));
    }

    #[tokio::test]
    async fn fresh_message_each_request() {
        let pool = test_pool().await;
        let first = auth_message(&pool, VOTER_ADDRESS).await.unwrap();
        let second = auth_message(&pool, VOTER_ADDRESS).await.unwrap();
        assert_ne!(first, second);

        // A signature over the superseded message no longer logs in.
        let stale = sign(VOTER_KEY, &first).await;
        let err = verify_login(&pool, VOTER_ADDRESS, &stale, 60).await.unwrap_err();
        assert!(matches!(err, GrantError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn wrong_signer_is_rejected() {
        let pool = test_pool().await;
        let message = auth_message(&pool, VOTER_ADDRESS).await.unwrap();
        let signature = sign(ANVIL_KEY, &message).await;
        let err = verify_login(&pool, VOTER_ADDRESS, &signature, 60).await.unwrap_err();
        assert!(matches!(err, GrantError::Unauthenticated(_)));

        let user = db::find_user_by_address(&pool, VOTER_ADDRESS).await.unwrap().unwrap();
        assert!(user.nonce.is_some());
    }

    #[tokio::test]
    async fn expired_session_does_not_resolve() {
        let pool = test_pool().await;
        let message = auth_message(&pool, VOTER_ADDRESS).await.unwrap();
        let signature = sign(VOTER_KEY, &message).await;
        let session = verify_login(&pool, VOTER_ADDRESS, &signature, -1).await.unwrap();
        assert!(db::find_session_user(&pool, &session.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn input_validation() {
        let pool = test_pool().await;
        assert!(matches!(
            auth_message(&pool, "").await.unwrap_err(),
            GrantError::Validation(_)
        ));
        assert!(matches!(
            auth_message(&pool, "0x1234").await.unwrap_err(),
            GrantError::Validation(_)
        ));
        assert!(matches!(
            verify_login(&pool, VOTER_ADDRESS, "", 60).await.unwrap_err(),
            GrantError::Validation(_)
        ));
        assert!(matches!(
            verify_login(&pool, VOTER_ADDRESS, "0xdead", 60).await.unwrap_err(),
            GrantError::NotFound(_)
        ));
    }
}
