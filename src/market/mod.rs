//! Market-data boundary and snapshot building
//!
//! Balance and price lookup belong to external collaborators; this module
//! only defines their interface and composes their answers into a valued
//! [`HoldingSnapshot`]. Prices flow through the injected TTL cache, so a
//! burst of snapshots inside the TTL costs one upstream call per mint.

pub mod balance;
pub mod price;

use crate::cache::TtlCache;
use crate::config::AssetRegistry;
use crate::models::{Holding, HoldingSnapshot};
use crate::Result;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Unvalued balance as the wallet collaborator reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct RawBalance {
    pub mint: String,
    pub symbol: Option<String>,
    /// Balance in the asset's smallest unit.
    pub amount_raw: u64,
    pub decimals: u8,
}

/// Account balance lookup (wallet indexer, RPC, fixture).
#[async_trait::async_trait]
pub trait BalanceSource: Send + Sync {
    async fn balances(&self, account: &str) -> Result<Vec<RawBalance>>;
}

/// USD price lookup for a single mint.
#[async_trait::async_trait]
pub trait PriceSource: Send + Sync {
    async fn usd_price(&self, mint: &str) -> Result<f64>;
}

/// Builds valued snapshots from the two collaborators.
pub struct SnapshotBuilder {
    balances: Arc<dyn BalanceSource>,
    prices: Arc<dyn PriceSource>,
    price_cache: TtlCache<String, f64>,
    registry: AssetRegistry,
}

impl SnapshotBuilder {
    pub fn new(
        balances: Arc<dyn BalanceSource>,
        prices: Arc<dyn PriceSource>,
        registry: AssetRegistry,
        price_ttl: Duration,
    ) -> Self {
        Self {
            balances,
            prices,
            price_cache: TtlCache::new(price_ttl),
            registry,
        }
    }

    /// Snapshot everything `account` holds, valued at current (cache-fresh)
    /// prices. An asset the price collaborator cannot value is kept at zero
    /// value rather than dropped, so the holding list still reflects what
    /// the account owns.
    pub async fn build(&self, account: &str) -> Result<HoldingSnapshot> {
        let raw = self.balances.balances(account).await?;
        let mut holdings = Vec::with_capacity(raw.len());

        for balance in raw {
            if balance.amount_raw == 0 {
                continue;
            }

            let quantity = balance.amount_raw as f64 / 10f64.powi(balance.decimals as i32);

            let price = match self
                .price_cache
                .get_or_refresh(balance.mint.clone(), || async {
                    self.prices.usd_price(&balance.mint).await
                })
                .await
            {
                Ok(price) => price,
                Err(e) => {
                    warn!(mint = %balance.mint, error = %e, "price unavailable, valuing at zero");
                    0.0
                }
            };

            let symbol = balance
                .symbol
                .clone()
                .unwrap_or_else(|| short_mint(&balance.mint));
            let category = self.registry.categorize(&balance.mint);

            holdings.push(Holding::new(
                balance.mint,
                symbol,
                category,
                balance.decimals,
                quantity,
                price,
            ));
        }

        Ok(HoldingSnapshot::new(account, holdings))
    }
}

/// Display fallback when the balance collaborator has no symbol for a mint.
fn short_mint(mint: &str) -> String {
    match mint.get(..4) {
        Some(prefix) => format!("{}..", prefix),
        None => mint.to_string(),
    }
}
