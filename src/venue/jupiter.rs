//! Jupiter aggregator client
//!
//! Speaks the v6 HTTP API: GET /quote for routing, POST
//! /swap-instructions to turn an accepted quote into chain
//! instructions. Uses a long-lived reqwest::Client for connection
//! pooling.

use super::{AccountRef, QuoteRequest, SwapInstructions, SwapQuote, SwapVenue, VenueInstruction};
use crate::error::RebalanceError;
use crate::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info};

pub const DEFAULT_BASE_URL: &str = "https://quote-api.jup.ag/v6";

/// Reusable Jupiter client (connection-pooled)
pub struct JupiterClient {
    client: Client,
    base_url: String,
}

impl JupiterClient {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(20))
            .build()
            .expect("Failed to build HTTP client");

        Self { client, base_url }
    }

    /// Client against `JUPITER_BASE_URL`, or the public v6 endpoint.
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("JUPITER_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(base_url)
    }
}

#[async_trait::async_trait]
impl SwapVenue for JupiterClient {
    async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote> {
        let url = format!("{}/quote", self.base_url);
        let amount = request.amount_raw.to_string();
        let slippage = request.slippage_bps.to_string();

        debug!(
            input_mint = %request.input_mint,
            output_mint = %request.output_mint,
            amount_raw = request.amount_raw,
            "Requesting quote"
        );

        let response = self
            .client
            .get(&url)
            .query(&[
                ("inputMint", request.input_mint.as_str()),
                ("outputMint", request.output_mint.as_str()),
                ("amount", amount.as_str()),
                ("slippageBps", slippage.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                error!("Quote request failed: {}", e);
                RebalanceError::NoRoute(format!("quote request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Quote error response: {}", error_text);
            return Err(RebalanceError::NoRoute(format!(
                "venue rejected quote: {}",
                error_text
            )));
        }

        let document: Value = response.json().await.map_err(|e| {
            error!("Failed to parse quote response: {}", e);
            RebalanceError::NoRoute(format!("quote parse error: {}", e))
        })?;

        let quote = parse_quote(document, request.amount_raw)?;

        info!(
            out_amount_raw = quote.out_amount_raw,
            price_impact_pct = quote.price_impact_pct,
            hops = quote.route.len(),
            "Quote accepted"
        );

        Ok(quote)
    }

    async fn swap_instructions(
        &self,
        quote: &SwapQuote,
        user_pubkey: &str,
    ) -> Result<SwapInstructions> {
        let url = format!("{}/swap-instructions", self.base_url);
        let body = InstructionsRequest {
            quote_response: quote.raw.clone(),
            user_public_key: user_pubkey.to_string(),
            wrap_and_unwrap_sol: true,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Instruction request failed: {}", e);
                RebalanceError::InstructionFetch(format!("instruction request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Instruction error response: {}", error_text);
            return Err(RebalanceError::InstructionFetch(format!(
                "venue rejected instruction request: {}",
                error_text
            )));
        }

        let parsed: InstructionsResponse = response.json().await.map_err(|e| {
            error!("Failed to parse instruction response: {}", e);
            RebalanceError::InstructionFetch(format!("instruction parse error: {}", e))
        })?;

        debug!(
            compute_budget = parsed.compute_budget_instructions.len(),
            setup = parsed.setup_instructions.len(),
            cleanup = parsed.cleanup_instruction.is_some(),
            "Instructions received"
        );

        Ok(SwapInstructions {
            compute_budget: parsed
                .compute_budget_instructions
                .into_iter()
                .map(Into::into)
                .collect(),
            setup: parsed.setup_instructions.into_iter().map(Into::into).collect(),
            swap: parsed.swap_instruction.into(),
            cleanup: parsed.cleanup_instruction.map(Into::into),
        })
    }
}

/// Validate a quote document and lift out the fields we report on.
///
/// Jupiter signals "no route" two ways: an `error` field in an otherwise
/// 200 response, or a missing/empty `outAmount`. Both map to
/// `NoRouteError` here so the caller sees one failure shape.
fn parse_quote(document: Value, requested_amount_raw: u64) -> Result<SwapQuote> {
    if let Some(message) = document.get("error").and_then(Value::as_str) {
        return Err(RebalanceError::NoRoute(format!(
            "venue found no route: {}",
            message
        )));
    }

    let parsed: QuoteWire = serde_json::from_value(document.clone())
        .map_err(|e| RebalanceError::NoRoute(format!("malformed quote: {}", e)))?;

    let out_amount_raw = parse_raw_amount(parsed.out_amount.as_deref())
        .ok_or_else(|| RebalanceError::NoRoute("quote carries no output amount".to_string()))?;
    if out_amount_raw == 0 {
        return Err(RebalanceError::NoRoute(
            "quote output amount is zero".to_string(),
        ));
    }

    let in_amount_raw =
        parse_raw_amount(parsed.in_amount.as_deref()).unwrap_or(requested_amount_raw);

    let price_impact_pct = parsed
        .price_impact_pct
        .as_deref()
        .and_then(|p| p.parse().ok())
        .unwrap_or(0.0);

    let route = parsed
        .route_plan
        .iter()
        .map(|step| step.swap_info.label.clone().unwrap_or_else(|| "unknown".to_string()))
        .collect();

    Ok(SwapQuote {
        in_amount_raw,
        out_amount_raw,
        price_impact_pct,
        route,
        raw: document,
    })
}

/// Jupiter serializes raw amounts as decimal strings.
fn parse_raw_amount(amount: Option<&str>) -> Option<u64> {
    match amount {
        Some(text) if !text.is_empty() => text.parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InstructionsRequest {
    quote_response: Value,
    user_public_key: String,
    wrap_and_unwrap_sol: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteWire {
    in_amount: Option<String>,
    out_amount: Option<String>,
    price_impact_pct: Option<String>,
    #[serde(default)]
    route_plan: Vec<RoutePlanStep>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoutePlanStep {
    swap_info: SwapInfo,
}

#[derive(Debug, Deserialize)]
struct SwapInfo {
    label: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstructionsResponse {
    #[serde(default)]
    compute_budget_instructions: Vec<InstructionWire>,
    #[serde(default)]
    setup_instructions: Vec<InstructionWire>,
    swap_instruction: InstructionWire,
    cleanup_instruction: Option<InstructionWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstructionWire {
    program_id: String,
    accounts: Vec<AccountWire>,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountWire {
    pubkey: String,
    is_signer: bool,
    is_writable: bool,
}

impl From<InstructionWire> for VenueInstruction {
    fn from(wire: InstructionWire) -> Self {
        VenueInstruction {
            program_id: wire.program_id,
            accounts: wire
                .accounts
                .into_iter()
                .map(|a| AccountRef {
                    pubkey: a.pubkey,
                    is_signer: a.is_signer,
                    is_writable: a.is_writable,
                })
                .collect(),
            data: wire.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn quote_document() -> Value {
        json!({
            "inputMint": "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
            "inAmount": "300000000",
            "outputMint": "So11111111111111111111111111111111111111112",
            "outAmount": "1492537313",
            "otherAmountThreshold": "1485074626",
            "swapMode": "ExactIn",
            "slippageBps": 50,
            "priceImpactPct": "0.0012",
            "routePlan": [
                { "swapInfo": { "label": "Whirlpool" }, "percent": 60 },
                { "swapInfo": { "label": "Raydium CLMM" }, "percent": 40 }
            ]
        })
    }

    #[test]
    fn parses_well_formed_quote() {
        let quote = parse_quote(quote_document(), 300_000_000).unwrap();

        assert_eq!(quote.in_amount_raw, 300_000_000);
        assert_eq!(quote.out_amount_raw, 1_492_537_313);
        assert!((quote.price_impact_pct - 0.0012).abs() < 1e-9);
        assert_eq!(quote.route, vec!["Whirlpool", "Raydium CLMM"]);
        // raw document survives untouched for the instruction call
        assert_eq!(quote.raw["swapMode"], "ExactIn");
    }

    #[test]
    fn error_field_means_no_route() {
        let document = json!({ "error": "Could not find any route" });
        let err = parse_quote(document, 1_000_000).unwrap_err();
        assert!(err.to_string().contains("NoRouteError"));
        assert!(err.to_string().contains("Could not find any route"));
    }

    #[test]
    fn missing_out_amount_means_no_route() {
        let mut document = quote_document();
        document.as_object_mut().unwrap().remove("outAmount");
        let err = parse_quote(document, 300_000_000).unwrap_err();
        assert!(err.to_string().contains("NoRouteError"));
    }

    #[test]
    fn empty_out_amount_means_no_route() {
        let mut document = quote_document();
        document["outAmount"] = json!("");
        assert!(parse_quote(document, 300_000_000).is_err());
    }

    #[test]
    fn zero_out_amount_means_no_route() {
        let mut document = quote_document();
        document["outAmount"] = json!("0");
        let err = parse_quote(document, 300_000_000).unwrap_err();
        assert!(err.to_string().contains("zero"));
    }

    #[test]
    fn parses_instruction_response() {
        let document = json!({
            "computeBudgetInstructions": [
                {
                    "programId": "ComputeBudget111111111111111111111111111111",
                    "accounts": [],
                    "data": "AsBcFQA="
                }
            ],
            "setupInstructions": [
                {
                    "programId": "ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL",
                    "accounts": [
                        { "pubkey": "FeePayer11111111111111111111111111111111111", "isSigner": true, "isWritable": true }
                    ],
                    "data": "AQ=="
                }
            ],
            "swapInstruction": {
                "programId": "JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4",
                "accounts": [
                    { "pubkey": "FeePayer11111111111111111111111111111111111", "isSigner": true, "isWritable": false }
                ],
                "data": "5RfLl3rjrSoBAAAA"
            },
            "cleanupInstruction": null,
            "addressLookupTableAddresses": []
        });

        let parsed: InstructionsResponse = serde_json::from_value(document).unwrap();
        let instructions = SwapInstructions {
            compute_budget: parsed
                .compute_budget_instructions
                .into_iter()
                .map(Into::into)
                .collect(),
            setup: parsed.setup_instructions.into_iter().map(Into::into).collect(),
            swap: parsed.swap_instruction.into(),
            cleanup: parsed.cleanup_instruction.map(Into::into),
        };

        assert_eq!(instructions.instruction_count(), 3);
        assert_eq!(
            instructions.swap.program_id,
            "JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4"
        );
        assert!(instructions.swap.accounts[0].is_signer);
        assert!(!instructions.swap.accounts[0].is_writable);
        assert!(instructions.cleanup.is_none());
    }

    #[test]
    fn instruction_request_serializes_camel_case() {
        let body = InstructionsRequest {
            quote_response: quote_document(),
            user_public_key: "FeePayer11111111111111111111111111111111111".to_string(),
            wrap_and_unwrap_sol: true,
        };

        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"quoteResponse\""));
        assert!(json.contains("\"userPublicKey\""));
        assert!(json.contains("\"wrapAndUnwrapSol\":true"));
    }
}
