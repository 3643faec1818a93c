//! Account balance lookup over Solana JSON-RPC
//!
//! Reads the native lamport balance plus every SPL token account the
//! wallet owns. Native SOL is reported under the wrapped-SOL mint so
//! categorization sees a single base asset. Uses a long-lived
//! reqwest::Client for connection pooling.

use super::{BalanceSource, RawBalance};
use crate::config::{USDC_MINT, USDT_MINT, WSOL_MINT};
use crate::error::RebalanceError;
use crate::Result;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error};

const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

/// Reusable balance RPC client (connection-pooled)
pub struct RpcBalanceSource {
    client: Client,
    rpc_url: String,
}

impl RpcBalanceSource {
    pub fn new(rpc_url: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(20))
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
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Balance RPC transport error on {}: {}", method, e);
                RebalanceError::Snapshot(format!("{} transport error: {}", method, e))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Balance RPC error response on {}: {}", method, error_text);
            return Err(RebalanceError::Snapshot(format!(
                "{} failed: {}",
                method, error_text
            )));
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|e| RebalanceError::Snapshot(format!("{} parse error: {}", method, e)))?;

        if let Some(rpc_error) = envelope.get("error") {
            let message = rpc_error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown rpc error");
            return Err(RebalanceError::Snapshot(format!("{}: {}", method, message)));
        }

        envelope
            .get("result")
            .cloned()
            .ok_or_else(|| RebalanceError::Snapshot(format!("{} returned no result", method)))
    }
}

#[async_trait::async_trait]
impl BalanceSource for RpcBalanceSource {
    async fn balances(&self, account: &str) -> Result<Vec<RawBalance>> {
        let mut balances = Vec::new();

        let native = self.call("getBalance", json!([account])).await?;
        let lamports = native["value"].as_u64().unwrap_or(0);
        if lamports > 0 {
            balances.push(RawBalance {
                mint: WSOL_MINT.to_string(),
                symbol: Some("SOL".to_string()),
                amount_raw: lamports,
                decimals: 9,
            });
        }

        let token_accounts = self
            .call(
                "getTokenAccountsByOwner",
                json!([
                    account,
                    { "programId": TOKEN_PROGRAM_ID },
                    { "encoding": "jsonParsed" }
                ]),
            )
            .await?;

        if let Some(entries) = token_accounts["value"].as_array() {
            for entry in entries {
                if let Some(balance) = parse_token_account(entry) {
                    balances.push(balance);
                }
            }
        }

        debug!(account = %account, balances = balances.len(), "Balances fetched");
        Ok(balances)
    }
}

/// One jsonParsed token account entry into a raw balance. Entries
/// missing any required field are dropped rather than failing the
/// whole lookup.
fn parse_token_account(entry: &Value) -> Option<RawBalance> {
    let info = &entry["account"]["data"]["parsed"]["info"];
    let mint = info["mint"].as_str()?;
    let token_amount = &info["tokenAmount"];
    let amount_raw: u64 = token_amount["amount"].as_str()?.parse().ok()?;
    let decimals = token_amount["decimals"].as_u64()? as u8;

    Some(RawBalance {
        mint: mint.to_string(),
        symbol: known_symbol(mint),
        amount_raw,
        decimals,
    })
}

fn known_symbol(mint: &str) -> Option<String> {
    let symbol = match mint {
        USDC_MINT => "USDC",
        USDT_MINT => "USDT",
        WSOL_MINT => "SOL",
        _ => return None,
    };
    Some(symbol.to_string())
}
