//! Credential signer. Attests `(proposalId, voter, weight)` for `castVote`.
//!
//! The digest is `keccak256(abi.encodePacked(uint256, address, uint256))` and
//! the signature is an EIP-191 personal-message signature over the 32 digest
//! bytes, which is what `GrantManager` recovers and compares with its trusted
//! signer. The signer keeps no state: the same triple may be signed any
//! number of times, replay protection is the contract's one-vote-per-address
//! rule.

use std::str::FromStr;

use ethers::abi::{encode_packed, Token};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Signature, U256};
use ethers::utils::keccak256;

use crate::errors::{GrantError, Result};

#[derive(Debug, Clone)]
pub struct CredentialSigner {
    wallet: LocalWallet,
}

impl CredentialSigner {
    pub fn from_private_key(private_key: &str) -> Result<Self> {
        let key = private_key.trim();
        let key = key.strip_prefix("0x").unwrap_or(key);
        let wallet = LocalWallet::from_str(key)
            .map_err(|e| GrantError::Config(format!("Invalid ADMIN_PRIVATE_KEY: {e}")))?;
        Ok(Self { wallet })
    }

    pub fn wallet(&self) -> &LocalWallet {
        &self.wallet
    }

    /// Address the contract must have registered as trusted signer.
    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    pub async fn sign(&self, proposal_id: U256, voter: &str, weight: U256) -> Result<Signature> {
        let voter = parse_address(voter)?;
        let digest = credential_digest(proposal_id, voter, weight)?;
        self.wallet
            .sign_message(digest)
            .await
            .map_err(|e| GrantError::Signing(e.to_string()))
    }

    /// Check that `signature` attests the triple under this signer's key.
    pub fn verify(&self, signature: &Signature, proposal_id: U256, voter: Address, weight: U256) -> bool {
        credential_digest(proposal_id, voter, weight)
            .ok()
            .and_then(|digest| signature.recover(digest.as_slice()).ok())
            .is_some_and(|recovered| recovered == self.address())
    }
}

/// `abi.encodePacked(uint256 proposalId, address voter, uint256 weight)`
pub fn pack_credential(proposal_id: U256, voter: Address, weight: U256) -> Result<Vec<u8>> {
    encode_packed(&[
        Token::Uint(proposal_id),
        Token::Address(voter),
        Token::Uint(weight),
    ])
    .map_err(|e| GrantError::Signing(e.to_string()))
}

pub fn credential_digest(proposal_id: U256, voter: Address, weight: U256) -> Result<[u8; 32]> {
    Ok(keccak256(pack_credential(proposal_id, voter, weight)?))
}

/// Parse a `0x`-prefixed, 40 hex digit chain address.
pub fn parse_address(raw: &str) -> Result<Address> {
    let trimmed = raw.trim();
    let well_formed = trimmed
        .strip_prefix("0x")
        .is_some_and(|h| h.len() == 40 && h.chars().all(|c| c.is_ascii_hexdigit()));
    if !well_formed {
        return Err(GrantError::Validation(format!("Malformed address: {raw}")));
    }
    Address::from_str(trimmed).map_err(|_| GrantError::Validation(format!("Malformed address: {raw}")))
}

/// `0x`-prefixed hex of the 65-byte `r || s || v` signature.
pub fn signature_hex(signature: &Signature) -> String {
    format!("0x{}", hex::encode(signature.to_vec()))
}
