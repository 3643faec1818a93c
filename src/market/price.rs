//! USD price lookup via the Jupiter price API
//!
//! Uses a long-lived reqwest::Client for connection pooling.

use super::PriceSource;
use crate::error::RebalanceError;
use crate::Result;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::error;

pub const DEFAULT_PRICE_BASE_URL: &str = "https://price.jup.ag/v6";

/// Reusable price API client (connection-pooled)
pub struct JupiterPriceClient {
    client: Client,
    base_url: String,
}

impl JupiterPriceClient {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build HTTP client");

        Self { client, base_url }
    }

    /// Client against `PRICE_BASE_URL`, or the public endpoint.
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("PRICE_BASE_URL").unwrap_or_else(|_| DEFAULT_PRICE_BASE_URL.to_string());
        Self::new(base_url)
    }
}

#[async_trait::async_trait]
impl PriceSource for JupiterPriceClient {
    async fn usd_price(&self, mint: &str) -> Result<f64> {
        let url = format!("{}/price", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("ids", mint)])
            .send()
            .await
            .map_err(|e| {
                error!("Price request failed: {}", e);
                RebalanceError::MarketData(format!("price request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Price error response: {}", error_text);
            return Err(RebalanceError::MarketData(format!(
                "price lookup failed: {}",
                error_text
            )));
        }

        let parsed: PriceResponse = response.json().await.map_err(|e| {
            RebalanceError::MarketData(format!("price parse error: {}", e))
        })?;

        price_for(&parsed, mint)
    }
}

/// A quoted price must exist and be a positive finite number; anything
/// else counts as "no price" so the caller can decide how to value the
/// asset.
fn price_for(response: &PriceResponse, mint: &str) -> Result<f64> {
    response
        .data
        .get(mint)
        .map(|entry| entry.price)
        .filter(|price| price.is_finite() && *price > 0.0)
        .ok_or_else(|| RebalanceError::MarketData(format!("no price for {}", mint)))
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    data: HashMap<String, PriceEntry>,
}

#[derive(Debug, Deserialize)]
struct PriceEntry {
    price: f64,
}
