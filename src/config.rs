//! Runtime configuration and the static asset registry
//!
//! Everything here is read once at startup. Core engines take the config by
//! reference; nothing reads the environment after construction.

use crate::models::{AssetCategory, TradeAsset};
use std::collections::HashSet;
use std::env;
use std::time::Duration;

/// USDC mint address on Solana
pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

/// USDT mint address on Solana
pub const USDT_MINT: &str = "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB";

/// Wrapped SOL mint address
pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Knobs for drift analysis, planning, and execution.
#[derive(Debug, Clone)]
pub struct RebalanceConfig {
    /// A category must deviate more than this (percentage points) before it
    /// participates in a rebalance.
    pub threshold_pct: f64,
    /// Dust floor: no trade below this USD amount is ever emitted.
    pub min_trade_usd: f64,
    /// Portfolios below this total get a materiality warning on their plans.
    pub min_portfolio_usd: f64,
    /// Slippage tolerance forwarded to the swap venue, in basis points.
    pub max_slippage_bps: u16,
    /// Quiescence interval between trades in one plan.
    pub inter_trade_delay: Duration,
    /// Bound on the confirmation poll for one transaction.
    pub confirm_timeout: Duration,
    pub confirm_poll_interval: Duration,
    /// Skip pre-broadcast simulation. Saves a round trip per trade at the
    /// cost of gas on transactions consensus later rejects.
    pub skip_preflight: bool,
    /// Whether the stock category can be serviced at all.
    pub stocks_enabled: bool,
    /// How long cached prices stay fresh.
    pub price_ttl: Duration,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            threshold_pct: 5.0,
            min_trade_usd: 10.0,
            min_portfolio_usd: 100.0,
            max_slippage_bps: 50,
            inter_trade_delay: Duration::from_secs(2),
            confirm_timeout: Duration::from_secs(60),
            confirm_poll_interval: Duration::from_secs(2),
            skip_preflight: true,
            stocks_enabled: false,
            price_ttl: Duration::from_secs(30),
        }
    }
}

impl RebalanceConfig {
    /// Load configuration from the environment, falling back to defaults for
    /// anything absent or malformed.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            threshold_pct: env_parse("REBALANCE_THRESHOLD_PCT", defaults.threshold_pct),
            min_trade_usd: env_parse("MIN_TRADE_USD", defaults.min_trade_usd),
            min_portfolio_usd: env_parse("MIN_PORTFOLIO_USD", defaults.min_portfolio_usd),
            max_slippage_bps: env_parse("MAX_SLIPPAGE_BPS", defaults.max_slippage_bps),
            inter_trade_delay: Duration::from_millis(env_parse(
                "INTER_TRADE_DELAY_MS",
                defaults.inter_trade_delay.as_millis() as u64,
            )),
            confirm_timeout: Duration::from_secs(env_parse(
                "CONFIRM_TIMEOUT_SECS",
                defaults.confirm_timeout.as_secs(),
            )),
            confirm_poll_interval: Duration::from_millis(env_parse(
                "CONFIRM_POLL_INTERVAL_MS",
                defaults.confirm_poll_interval.as_millis() as u64,
            )),
            skip_preflight: env_parse("SKIP_PREFLIGHT", defaults.skip_preflight),
            stocks_enabled: env_parse("STOCKS_ENABLED", defaults.stocks_enabled),
            price_ttl: Duration::from_secs(env_parse(
                "PRICE_CACHE_TTL_SECS",
                defaults.price_ttl.as_secs(),
            )),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Static mint → category mapping plus the default asset bought for a
/// category the account does not hold yet.
#[derive(Debug, Clone)]
pub struct AssetRegistry {
    stable_mints: HashSet<String>,
    base_mint: String,
    stock_mints: HashSet<String>,
}

impl AssetRegistry {
    pub fn new() -> Self {
        let mut stable_mints = HashSet::new();
        stable_mints.insert(USDC_MINT.to_string());
        stable_mints.insert(USDT_MINT.to_string());

        Self {
            stable_mints,
            base_mint: WSOL_MINT.to_string(),
            stock_mints: HashSet::new(),
        }
    }

    /// Registry extended with mint lists from `STABLE_MINTS` / `STOCK_MINTS`
    /// (comma-separated) in the environment.
    pub fn from_env() -> Self {
        let mut registry = Self::new();

        if let Ok(extra) = env::var("STABLE_MINTS") {
            for mint in extra.split(',').map(str::trim).filter(|m| !m.is_empty()) {
                registry.stable_mints.insert(mint.to_string());
            }
        }
        if let Ok(extra) = env::var("STOCK_MINTS") {
            for mint in extra.split(',').map(str::trim).filter(|m| !m.is_empty()) {
                registry.stock_mints.insert(mint.to_string());
            }
        }

        registry
    }

    pub fn categorize(&self, mint: &str) -> AssetCategory {
        if self.stable_mints.contains(mint) {
            AssetCategory::Stablecoin
        } else if mint == self.base_mint {
            AssetCategory::BaseAsset
        } else if self.stock_mints.contains(mint) {
            AssetCategory::Stock
        } else {
            AssetCategory::OtherToken
        }
    }

    /// Default buy-side asset for a category the account holds nothing of.
    /// Other-token and stock categories have no meaningful default.
    pub fn default_asset(&self, category: AssetCategory) -> Option<TradeAsset> {
        match category {
            AssetCategory::Stablecoin => Some(TradeAsset {
                mint: USDC_MINT.to_string(),
                symbol: "USDC".to_string(),
                decimals: 6,
            }),
            AssetCategory::BaseAsset => Some(TradeAsset {
                mint: self.base_mint.clone(),
                symbol: "SOL".to_string(),
                decimals: 9,
            }),
            AssetCategory::OtherToken | AssetCategory::Stock => None,
        }
    }
}

impl Default for AssetRegistry {
    fn default() -> Self {
        Self::new()
    }
}
