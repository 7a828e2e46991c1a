//! Content-addressed storage. Pins JSON documents through the Pinata API.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{GrantError, Result};

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Pin `document` and return its content id.
    async fn pin_json(&self, document: &Value) -> Result<String>;
}

/// `ipfs://<cid>` URI used as the proposal token URI.
pub fn ipfs_uri(cid: &str) -> String {
    format!("ipfs://{cid}")
}

/// Public gateway URL for a content id.
pub fn gateway_url(cid: &str) -> String {
    format!("https://ipfs.io/ipfs/{cid}")
}

#[derive(Debug, Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

pub struct PinataClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl PinataClient {
    pub fn new(client: Client, base_url: &str, api_key: &str, api_secret: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
        }
    }
}

#[async_trait]
impl ContentStore for PinataClient {
    async fn pin_json(&self, document: &Value) -> Result<String> {
        let url = format!("{}/pinning/pinJSONToIPFS", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("pinata_api_key", &self.api_key)
            .header("pinata_secret_api_key", &self.api_secret)
            .json(document)
            .send()
            .await
            .map_err(|e| GrantError::Storage(format!("Failed to upload JSON to IPFS: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Pinata rejected upload ({status}): {body}");
            return Err(GrantError::Storage(format!(
                "Failed to upload JSON to IPFS: {status}"
            )));
        }

        let body: PinResponse = response
            .json()
            .await
            .map_err(|e| GrantError::Storage(format!("Unexpected pin response: {e}")))?;
        debug!("Pinned JSON document as {}", body.ipfs_hash);
        Ok(body.ipfs_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uris() {
        assert_eq!(ipfs_uri("QmTest123"), "ipfs://QmTest123");
        assert_eq!(gateway_url("QmTest123"), "https://ipfs.io/ipfs/QmTest123");
    }

    #[test]
    fn pin_response_shape() {
        let body: PinResponse = serde_json::from_str(
            r#"{"IpfsHash":"QmAbc","PinSize":12,"Timestamp":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(body.ipfs_hash, "QmAbc");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_storage_error() {
        let store = PinataClient::new(Client::new(), "http://127.0.0.1:1/", "k", "s");
        let err = store
            .pin_json(&serde_json::json!({ "a": 1 }))
            .await
            .unwrap_err();
        assert!(matches!(err, GrantError::Storage(_)));
    }
}
