//! Remote custodial signing
//!
//! Private keys never enter this process. The pipeline serializes the
//! unsigned transaction, ships it to the custodial signing service with
//! the wallet id, and gets the signed payload back. Uses a long-lived
//! reqwest::Client for connection pooling.

use crate::error::RebalanceError;
use crate::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

/// Signs serialized transactions on behalf of a custodied wallet.
#[async_trait::async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Returns the signed transaction serialized ready for broadcast.
    /// Fails with `SigningError`.
    async fn sign(&self, wallet_id: &str, transaction_hex: &str) -> Result<String>;
}

/// Reusable custodial signer client (connection-pooled)
pub struct CustodialSignerClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl CustodialSignerClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url,
            api_key,
        }
    }

    /// Client against `SIGNER_BASE_URL`, bearer-authenticated with
    /// `SIGNER_API_KEY` when set.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("SIGNER_BASE_URL")
            .map_err(|_| RebalanceError::Config("SIGNER_BASE_URL not configured".to_string()))?;
        let api_key = std::env::var("SIGNER_API_KEY").ok();
        Ok(Self::new(base_url, api_key))
    }
}

#[async_trait::async_trait]
impl TransactionSigner for CustodialSignerClient {
    async fn sign(&self, wallet_id: &str, transaction_hex: &str) -> Result<String> {
        let url = format!("{}/sign", self.base_url);
        let body = SignRequest {
            wallet_id,
            transaction: transaction_hex,
            encoding: "hex",
        };

        debug!(wallet_id = %wallet_id, bytes = transaction_hex.len() / 2, "Requesting signature");

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            error!("Signer request failed: {}", e);
            RebalanceError::Signing(format!("signer request failed: {}", e))
        })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Signer error response: {}", error_text);
            return Err(RebalanceError::Signing(format!(
                "signer rejected request: {}",
                error_text
            )));
        }

        let parsed: SignResponse = response.json().await.map_err(|e| {
            error!("Failed to parse signer response: {}", e);
            RebalanceError::Signing(format!("signer parse error: {}", e))
        })?;

        unpack_response(parsed)
    }
}

/// The signer answers with exactly one of `signed_transaction` or
/// `error`; anything else is treated as a signing failure.
fn unpack_response(response: SignResponse) -> Result<String> {
    if let Some(message) = response.error {
        return Err(RebalanceError::Signing(format!(
            "signer declined transaction: {}",
            message
        )));
    }
    response
        .signed_transaction
        .filter(|signed| !signed.is_empty())
        .ok_or_else(|| RebalanceError::Signing("signer returned no transaction".to_string()))
}

#[derive(Debug, Serialize)]
struct SignRequest<'a> {
    wallet_id: &'a str,
    transaction: &'a str,
    encoding: &'a str,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    signed_transaction: Option<String>,
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpacks_signed_transaction() {
        let response = SignResponse {
            signed_transaction: Some("deadbeef".to_string()),
            error: None,
        };
        assert_eq!(unpack_response(response).unwrap(), "deadbeef");
    }

    #[test]
    fn error_field_wins() {
        let response = SignResponse {
            signed_transaction: None,
            error: Some("policy denied: daily limit".to_string()),
        };
        let err = unpack_response(response).unwrap_err();
        assert!(err.to_string().contains("SigningError"));
        assert!(err.to_string().contains("daily limit"));
    }

    #[test]
    fn empty_response_is_a_signing_failure() {
        let response = SignResponse {
            signed_transaction: None,
            error: None,
        };
        assert!(unpack_response(response).is_err());
    }

    #[test]
    fn blank_transaction_is_a_signing_failure() {
        let response = SignResponse {
            signed_transaction: Some(String::new()),
            error: None,
        };
        assert!(unpack_response(response).is_err());
    }

    #[test]
    fn request_body_matches_signer_contract() {
        let body = SignRequest {
            wallet_id: "wallet-7",
            transaction: "00ff",
            encoding: "hex",
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"wallet_id\":\"wallet-7\""));
        assert!(json.contains("\"encoding\":\"hex\""));
    }
}
