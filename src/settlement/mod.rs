//! Chain settlement
//!
//! The three things the pipeline needs from the settlement network: a
//! recent blockhash to anchor a transaction, broadcast, and signature
//! status polling until finality. [`RpcSettlementClient`] speaks the
//! Solana JSON-RPC API; tests substitute mock implementations.

use crate::error::RebalanceError;
use crate::Result;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// What the network currently knows about a submitted signature.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionStatus {
    /// Not yet visible, or visible without enough confirmations.
    Pending,
    Confirmed,
    /// Included but reverted during execution.
    Failed(String),
}

#[async_trait::async_trait]
pub trait Settlement: Send + Sync {
    async fn latest_blockhash(&self) -> Result<String>;

    /// Broadcasts a signed transaction, returning its signature. Fails
    /// with `BroadcastError` when the network rejects it outright.
    async fn send_transaction(&self, signed_transaction: &str, skip_preflight: bool)
        -> Result<String>;

    async fn signature_status(&self, signature: &str) -> Result<TransactionStatus>;
}

/// Polls `signature` until it confirms, reverts, or `timeout` elapses.
///
/// Poll errors are treated as transient: a flaky status endpoint must
/// not fail a transaction that is quietly confirming, so we log and
/// keep polling until the deadline decides.
pub async fn await_confirmation(
    settlement: &dyn Settlement,
    signature: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;

    loop {
        match settlement.signature_status(signature).await {
            Ok(TransactionStatus::Confirmed) => {
                info!(signature = %signature, "Transaction confirmed");
                return Ok(());
            }
            Ok(TransactionStatus::Failed(reason)) => {
                return Err(RebalanceError::OnChainExecution(format!(
                    "transaction {} reverted: {}",
                    signature, reason
                )));
            }
            Ok(TransactionStatus::Pending) => {
                debug!(signature = %signature, "Awaiting finality");
            }
            Err(e) => {
                warn!(signature = %signature, error = %e, "Status poll failed, retrying");
            }
        }

        if Instant::now() + poll_interval > deadline {
            return Err(RebalanceError::ConfirmationTimeout(format!(
                "no finality for {} within {}s",
                signature,
                timeout.as_secs()
            )));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Reusable JSON-RPC settlement client (connection-pooled)
pub struct RpcSettlementClient {
    client: Client,
    rpc_url: String,
}

impl RpcSettlementClient {
    pub fn new(rpc_url: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self { client, rpc_url }
    }

    /// Client against `SOLANA_RPC_URL`, or the public mainnet endpoint.
    pub fn from_env() -> Self {
        let rpc_url = std::env::var("SOLANA_RPC_URL")
            .unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".to_string());
        Self::new(rpc_url)
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("RPC transport error on {}: {}", method, e);
                RebalanceError::Rpc(format!("{} transport error: {}", method, e))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("RPC error response on {}: {}", method, error_text);
            return Err(RebalanceError::Rpc(format!(
                "{} failed: {}",
                method, error_text
            )));
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|e| RebalanceError::Rpc(format!("{} parse error: {}", method, e)))?;

        if let Some(rpc_error) = envelope.get("error") {
            let message = rpc_error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown rpc error");
            return Err(RebalanceError::Rpc(format!("{}: {}", method, message)));
        }

        envelope
            .get("result")
            .cloned()
            .ok_or_else(|| RebalanceError::Rpc(format!("{} returned no result", method)))
    }
}

#[async_trait::async_trait]
impl Settlement for RpcSettlementClient {
    async fn latest_blockhash(&self) -> Result<String> {
        let result = self
            .call(
                "getLatestBlockhash",
                json!([{ "commitment": "finalized" }]),
            )
            .await?;

        result["value"]["blockhash"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RebalanceError::Rpc("getLatestBlockhash returned no blockhash".to_string()))
    }

    async fn send_transaction(
        &self,
        signed_transaction: &str,
        skip_preflight: bool,
    ) -> Result<String> {
        let result = self
            .call(
                "sendTransaction",
                json!([
                    signed_transaction,
                    { "encoding": "base64", "skipPreflight": skip_preflight }
                ]),
            )
            .await
            .map_err(|e| RebalanceError::Broadcast(format!("network rejected transaction: {}", e)))?;

        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RebalanceError::Broadcast("no signature in broadcast response".to_string()))
    }

    async fn signature_status(&self, signature: &str) -> Result<TransactionStatus> {
        let result = self
            .call(
                "getSignatureStatuses",
                json!([[signature], { "searchTransactionHistory": true }]),
            )
            .await?;

        Ok(parse_signature_status(&result))
    }
}

/// Maps a `getSignatureStatuses` result to our status model. A null
/// entry means the network has not seen the signature yet; an `err`
/// object means it executed and reverted.
fn parse_signature_status(result: &Value) -> TransactionStatus {
    let entry = &result["value"][0];
    if entry.is_null() {
        return TransactionStatus::Pending;
    }

    if let Some(err) = entry.get("err") {
        if !err.is_null() {
            return TransactionStatus::Failed(err.to_string());
        }
    }

    match entry.get("confirmationStatus").and_then(Value::as_str) {
        Some("confirmed") | Some("finalized") => TransactionStatus::Confirmed,
        _ => TransactionStatus::Pending,
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}
