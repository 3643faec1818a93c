//! Core data models for the rebalancer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use uuid::Uuid;

/// Tolerance used when checking float invariants (value = qty * price,
/// percentages summing to 100).
pub const FLOAT_TOLERANCE: f64 = 1e-6;

//
// ================= Categories =================
//

/// Asset buckets the allocation model works in.
///
/// The variant order is the canonical category order: drift analysis and
/// trade matching iterate categories in this order, so plan output is
/// deterministic. `Ord` derives from the variant order, which is what makes
/// `BTreeMap<AssetCategory, _>` iteration canonical.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum AssetCategory {
    Stablecoin,
    BaseAsset,
    OtherToken,
    Stock,
}

impl AssetCategory {
    /// All categories in canonical order.
    pub const ALL: [AssetCategory; 4] = [
        AssetCategory::Stablecoin,
        AssetCategory::BaseAsset,
        AssetCategory::OtherToken,
        AssetCategory::Stock,
    ];
}

impl fmt::Display for AssetCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssetCategory::Stablecoin => "stablecoin",
            AssetCategory::BaseAsset => "baseAsset",
            AssetCategory::OtherToken => "otherToken",
            AssetCategory::Stock => "stock",
        };
        write!(f, "{}", s)
    }
}

/// Named risk profiles backing the allocation presets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RiskProfile {
    Conservative,
    Balanced,
    Aggressive,
}

impl fmt::Display for RiskProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskProfile::Conservative => "conservative",
            RiskProfile::Balanced => "balanced",
            RiskProfile::Aggressive => "aggressive",
        };
        write!(f, "{}", s)
    }
}

//
// ================= Holdings =================
//

/// A single valued position inside a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    /// Mint address (or tokenized-stock mint) identifying the asset.
    pub asset_id: String,
    pub symbol: String,
    pub category: AssetCategory,
    /// Fixed-point decimals of the asset's smallest unit.
    pub decimals: u8,
    /// Quantity in whole asset units.
    pub quantity: f64,
    pub unit_price_usd: f64,
    pub value_usd: f64,
}

impl Holding {
    /// Build a holding with `value_usd` derived from quantity and price, so the
    /// valuation invariant holds by construction.
    pub fn new(
        asset_id: impl Into<String>,
        symbol: impl Into<String>,
        category: AssetCategory,
        decimals: u8,
        quantity: f64,
        unit_price_usd: f64,
    ) -> Self {
        Self {
            asset_id: asset_id.into(),
            symbol: symbol.into(),
            category,
            decimals,
            quantity,
            unit_price_usd,
            value_usd: quantity * unit_price_usd,
        }
    }

    /// This holding as a trade leg.
    pub fn trade_asset(&self) -> TradeAsset {
        TradeAsset {
            mint: self.asset_id.clone(),
            symbol: self.symbol.clone(),
            decimals: self.decimals,
        }
    }
}

/// Point-in-time valuation of everything the account holds.
///
/// Immutable once built; superseded by a new snapshot after any trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldingSnapshot {
    pub account: String,
    pub holdings: Vec<Holding>,
    pub total_value_usd: f64,
    pub captured_at: DateTime<Utc>,
}

impl HoldingSnapshot {
    /// Build a snapshot with the total derived from the holdings.
    pub fn new(account: impl Into<String>, holdings: Vec<Holding>) -> Self {
        let total_value_usd = holdings.iter().map(|h| h.value_usd).sum();
        Self {
            account: account.into(),
            holdings,
            total_value_usd,
            captured_at: Utc::now(),
        }
    }

    /// Combined USD value of the holdings in one category.
    pub fn value_in(&self, category: AssetCategory) -> f64 {
        self.holdings
            .iter()
            .filter(|h| h.category == category)
            .map(|h| h.value_usd)
            .sum()
    }

    /// Largest-value holding in one category, if any.
    pub fn largest_in(&self, category: AssetCategory) -> Option<&Holding> {
        self.holdings
            .iter()
            .filter(|h| h.category == category)
            .max_by(|a, b| a.value_usd.total_cmp(&b.value_usd))
    }

    /// Hex SHA-256 over the canonical JSON serialization. Stored alongside
    /// execution reports so a report is tied to the exact snapshot that
    /// produced it.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();

        // Stream JSON directly into the hasher (no intermediate String)
        if serde_json::to_writer(&mut HashWriter(&mut hasher), self).is_err() {
            return String::new();
        }

        hex::encode(hasher.finalize())
    }
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

//
// ================= Allocation Targets =================
//

/// A named policy mapping categories to target percentages (sums to 100).
///
/// The percentages map is a `BTreeMap` keyed by [`AssetCategory`], so every
/// iteration over a target walks categories in canonical order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationTarget {
    pub name: String,
    pub percentages: BTreeMap<AssetCategory, f64>,
}

impl AllocationTarget {
    pub fn new(name: impl Into<String>, percentages: BTreeMap<AssetCategory, f64>) -> Self {
        Self {
            name: name.into(),
            percentages,
        }
    }

    /// Preset for a risk profile.
    pub fn for_profile(profile: RiskProfile) -> Self {
        let (name, split) = match profile {
            RiskProfile::Conservative => ("conservative", [60.0, 25.0, 10.0, 5.0]),
            RiskProfile::Balanced => ("balanced", [40.0, 35.0, 15.0, 10.0]),
            RiskProfile::Aggressive => ("aggressive", [15.0, 40.0, 35.0, 10.0]),
        };

        let mut percentages = BTreeMap::new();
        for (category, pct) in AssetCategory::ALL.iter().zip(split) {
            percentages.insert(*category, pct);
        }

        Self {
            name: name.to_string(),
            percentages,
        }
    }

    pub fn target_pct(&self, category: AssetCategory) -> f64 {
        self.percentages.get(&category).copied().unwrap_or(0.0)
    }

    pub fn total_pct(&self) -> f64 {
        self.percentages.values().sum()
    }

    /// True iff the percentages sum to 100 within [`FLOAT_TOLERANCE`].
    pub fn is_valid(&self) -> bool {
        (self.total_pct() - 100.0).abs() < FLOAT_TOLERANCE
    }

    /// Scale every percentage so the total is exactly 100 again. No-op for an
    /// all-zero target.
    pub fn renormalize(&mut self) {
        let total = self.total_pct();
        if total <= 0.0 {
            return;
        }
        for pct in self.percentages.values_mut() {
            *pct = *pct / total * 100.0;
        }
    }

    /// Apply a profile-driven tilt to one category and renormalize so the
    /// sum-to-100 invariant is restored. Percentages never go below zero.
    pub fn with_adjustment(mut self, category: AssetCategory, delta_pct: f64) -> Self {
        let entry = self.percentages.entry(category).or_insert(0.0);
        *entry = (*entry + delta_pct).max(0.0);
        self.renormalize();
        self
    }
}

//
// ================= Drift =================
//

/// Signed deviation of one category from its target share. Recomputed on
/// every analysis call, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Drift {
    pub category: AssetCategory,
    pub current_pct: f64,
    pub target_pct: f64,
    /// current - target, in percentage points.
    pub deviation_pct: f64,
}

/// Aggregated view of one analysis pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    pub target_name: String,
    pub drifts: Vec<Drift>,
    /// 0-100 scalar: 100 means exactly on target.
    pub health_score: u8,
    pub rebalance_needed: bool,
    pub analyzed_at: DateTime<Utc>,
}

//
// ================= Planned Trades =================
//

/// Asset leg of a planned trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeAsset {
    pub mint: String,
    pub symbol: String,
    pub decimals: u8,
}

/// One trade the planner decided on. Priority is ascending: priority 0
/// executes first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTrade {
    pub from_category: AssetCategory,
    pub to_category: AssetCategory,
    pub from_asset: TradeAsset,
    pub to_asset: TradeAsset,
    pub amount_usd: f64,
    /// Unit price of the sell-side asset, used to convert `amount_usd` into
    /// raw asset units at quote time.
    pub from_unit_price_usd: f64,
    pub priority: u32,
    pub reason: String,
}

/// Ordered trade list plus non-fatal planner warnings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradePlan {
    pub trades: Vec<PlannedTrade>,
    pub warnings: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl TradePlan {
    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    /// Combined USD value of all planned trades.
    pub fn total_value_usd(&self) -> f64 {
        self.trades.iter().map(|t| t.amount_usd).sum()
    }
}

//
// ================= Execution =================
//

/// Stages of the swap pipeline, in the only order they may be visited.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapStage {
    Pending,
    Quoted,
    InstructionsBuilt,
    Signed,
    Submitted,
    Confirmed,
    Failed,
}

impl fmt::Display for SwapStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SwapStage::Pending => "PENDING",
            SwapStage::Quoted => "QUOTED",
            SwapStage::InstructionsBuilt => "INSTRUCTIONS_BUILT",
            SwapStage::Signed => "SIGNED",
            SwapStage::Submitted => "SUBMITTED",
            SwapStage::Confirmed => "CONFIRMED",
            SwapStage::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

/// Per-trade execution record, mutated exclusively by the pipeline as the
/// trade advances through its stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub step_id: Uuid,
    pub trade: PlannedTrade,
    pub status: StepStatus,
    /// Last stage the trade successfully reached.
    pub stage_reached: SwapStage,
    /// Settlement receipt id, present from SUBMITTED onward.
    pub signature: Option<String>,
    /// Realized output in the buy-side asset's smallest unit, read from the
    /// accepted quote (not re-derived from settled state).
    pub out_amount_raw: Option<u64>,
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

impl ExecutionStep {
    /// Fresh pending step for a trade that has not been attempted.
    pub fn pending(trade: PlannedTrade) -> Self {
        Self {
            step_id: Uuid::new_v4(),
            trade,
            status: StepStatus::Pending,
            stage_reached: SwapStage::Pending,
            signature: None,
            out_amount_raw: None,
            error: None,
            execution_time_ms: 0,
        }
    }

    /// Terminal state-machine position. `FAILED` masks the last
    /// successful stage once the step has failed; `stage_reached` keeps
    /// it for diagnostics.
    pub fn effective_stage(&self) -> SwapStage {
        if self.status == StepStatus::Failed {
            SwapStage::Failed
        } else {
            self.stage_reached
        }
    }
}

/// Overall status of one rebalance invocation, derived from the step list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

impl RunStatus {
    /// success iff all attempted steps completed, failed iff none did.
    pub fn derive(attempted: usize, completed: usize) -> Self {
        if completed == attempted {
            RunStatus::Success
        } else if completed == 0 {
            RunStatus::Failed
        } else {
            RunStatus::Partial
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct ExecutionTotals {
    pub attempted: usize,
    pub completed: usize,
    pub value_traded_usd: f64,
}

/// Rolled-up outcome of executing one trade plan. Built once per rebalance
/// invocation; immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub report_id: Uuid,
    pub status: RunStatus,
    pub dry_run: bool,
    pub steps: Vec<ExecutionStep>,
    pub totals: ExecutionTotals,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

//
// ================= Rebalance Outcome =================
//

/// Everything one service-level rebalance call produced: the snapshot that
/// drove it, the analysis, the plan, the execution report, and the refreshed
/// snapshot taken afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceOutcome {
    pub account: String,
    pub wallet_id: String,
    pub snapshot_fingerprint: String,
    pub before: HoldingSnapshot,
    pub drift_before: DriftReport,
    pub plan: TradePlan,
    pub report: ExecutionReport,
    pub after: Option<HoldingSnapshot>,
    pub drift_after: Option<DriftReport>,
}
