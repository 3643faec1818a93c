//! Rebalance service - implements the unified loop
//!
//! SNAPSHOT → DRIFT → PLAN → EXECUTE → SNAPSHOT → RECORD
//!
//! One rebalance per account runs at a time; concurrent requests for
//! the same account queue on a per-account lock so two plans never
//! trade against the same balances.

use crate::analyzer::DriftAnalyzer;
use crate::config::{AssetRegistry, RebalanceConfig};
use crate::error::RebalanceError;
use crate::execution::ExecutionEngine;
use crate::history::ReportHistory;
use crate::market::balance::RpcBalanceSource;
use crate::market::price::JupiterPriceClient;
use crate::market::SnapshotBuilder;
use crate::models::{
    AllocationTarget, DriftReport, HoldingSnapshot, RebalanceOutcome, RiskProfile,
};
use crate::pipeline::SwapPipeline;
use crate::planner::TradePlanner;
use crate::settlement::RpcSettlementClient;
use crate::signer::CustodialSignerClient;
use crate::venue::jupiter::JupiterClient;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Read-only drift inspection request.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeRequest {
    pub account: String,
    #[serde(default)]
    pub profile: Option<RiskProfile>,
    #[serde(default)]
    pub target: Option<AllocationTarget>,
}

/// Full rebalance request. `target` overrides `profile`; with neither,
/// the balanced preset applies.
#[derive(Debug, Clone, Deserialize)]
pub struct RebalanceRequest {
    pub account: String,
    pub wallet_id: String,
    #[serde(default)]
    pub profile: Option<RiskProfile>,
    #[serde(default)]
    pub target: Option<AllocationTarget>,
    #[serde(default)]
    pub dry_run: bool,
}

/// What `analyze` answers with: the valued snapshot and its drift.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioAnalysis {
    pub snapshot: HoldingSnapshot,
    pub drift: DriftReport,
}

/// Coordinates the whole loop over the injected components.
pub struct RebalanceService {
    snapshots: SnapshotBuilder,
    analyzer: DriftAnalyzer,
    planner: TradePlanner,
    engine: ExecutionEngine,
    history: Arc<ReportHistory>,
    /// One lock per account with a rebalance in flight; entries are
    /// pruned when the last holder releases them, so the map does not
    /// grow with every account ever seen.
    account_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RebalanceService {
    pub fn new(
        snapshots: SnapshotBuilder,
        planner: TradePlanner,
        engine: ExecutionEngine,
        history: Arc<ReportHistory>,
        config: &RebalanceConfig,
    ) -> Self {
        Self {
            snapshots,
            analyzer: DriftAnalyzer::new(config.threshold_pct),
            planner,
            engine,
            history,
            account_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Production wiring: Jupiter for quotes and prices, Solana RPC for
    /// balances and settlement, the custodial signer from its configured
    /// endpoint, history persisted wherever the environment points.
    pub fn from_env() -> Result<Self> {
        let config = RebalanceConfig::from_env();
        let registry = AssetRegistry::from_env();

        let snapshots = SnapshotBuilder::new(
            Arc::new(RpcBalanceSource::from_env()),
            Arc::new(JupiterPriceClient::from_env()),
            registry.clone(),
            config.price_ttl,
        );

        let pipeline = SwapPipeline::new(
            Arc::new(JupiterClient::from_env()),
            Arc::new(CustodialSignerClient::from_env()?),
            Arc::new(RpcSettlementClient::from_env()),
            config.clone(),
        );
        let engine = ExecutionEngine::new(Arc::new(pipeline), config.clone());
        let planner = TradePlanner::new(config.clone(), registry);

        Ok(Self::new(
            snapshots,
            planner,
            engine,
            Arc::new(ReportHistory::from_env()),
            &config,
        ))
    }

    /// Snapshot and drift for an account without trading anything.
    pub async fn analyze(&self, request: AnalyzeRequest) -> Result<PortfolioAnalysis> {
        let target = resolve_target(request.profile, request.target)?;
        let snapshot = self.snapshots.build(&request.account).await?;
        let drift = self.analyzer.report(&snapshot, &target);
        Ok(PortfolioAnalysis { snapshot, drift })
    }

    /// Run the full loop for one account. Concurrent calls for the same
    /// account queue on its lock; other accounts proceed untouched.
    pub async fn rebalance(&self, request: RebalanceRequest) -> Result<RebalanceOutcome> {
        let target = resolve_target(request.profile, request.target.clone())?;

        let lock = self.account_lock(&request.account).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.run_rebalance(&request, target).await
        };
        drop(lock);
        self.prune_account_lock(&request.account).await;

        outcome
    }

    /// The loop body; the caller holds the account's lock.
    async fn run_rebalance(
        &self,
        request: &RebalanceRequest,
        target: AllocationTarget,
    ) -> Result<RebalanceOutcome> {
        let started = Instant::now();
        info!(
            account = %request.account,
            target = %target.name,
            dry_run = request.dry_run,
            "Rebalance starting"
        );

        // === SNAPSHOT ===
        let before = self.snapshots.build(&request.account).await?;
        let snapshot_fingerprint = before.fingerprint();

        // === DRIFT ===
        let drift_before = self.analyzer.report(&before, &target);
        debug!(
            health_score = drift_before.health_score,
            rebalance_needed = drift_before.rebalance_needed,
            "Drift analyzed"
        );

        // === PLAN ===
        let plan = self.planner.plan(&before, &target);

        // === EXECUTE ===
        let report = self
            .engine
            .execute_plan(&plan, &request.account, &request.wallet_id, request.dry_run)
            .await?;

        // === SNAPSHOT (refreshed) ===
        // Worth re-reading only when something may have moved; even an
        // all-failed run can have ambiguous stage errors behind it.
        let (after, drift_after) = if !request.dry_run && report.totals.attempted > 0 {
            match self.snapshots.build(&request.account).await {
                Ok(snapshot) => {
                    let drift = self.analyzer.report(&snapshot, &target);
                    (Some(snapshot), Some(drift))
                }
                Err(e) => {
                    warn!(error = %e, "Post-trade snapshot failed, outcome recorded without it");
                    (None, None)
                }
            }
        } else {
            (None, None)
        };

        let outcome = RebalanceOutcome {
            account: request.account.clone(),
            wallet_id: request.wallet_id.clone(),
            snapshot_fingerprint,
            before,
            drift_before,
            plan,
            report,
            after,
            drift_after,
        };

        // === RECORD ===
        if let Err(e) = self.history.record(&outcome).await {
            warn!(error = %e, "Failed to record outcome, returning it anyway");
        }

        info!(
            account = %request.account,
            status = ?outcome.report.status,
            completed = outcome.report.totals.completed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Rebalance complete"
        );

        Ok(outcome)
    }

    /// Recent outcomes for an account, newest first.
    pub async fn recent_outcomes(
        &self,
        account: &str,
        limit: usize,
    ) -> Result<Vec<RebalanceOutcome>> {
        self.history.for_account(account, limit).await
    }

    async fn account_lock(&self, account: &str) -> Arc<Mutex<()>> {
        let mut locks = self.account_locks.lock().await;
        locks
            .entry(account.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the account's lock entry once nothing else holds it. A
    /// strong count above 1 means another rebalance is queued on the
    /// same account, and that run prunes the entry instead.
    async fn prune_account_lock(&self, account: &str) {
        let mut locks = self.account_locks.lock().await;
        if let Some(lock) = locks.get(account) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(account);
            }
        }
    }
}

/// An explicit target wins over a profile, but must actually describe a
/// whole portfolio. With neither, the balanced preset applies.
fn resolve_target(
    profile: Option<RiskProfile>,
    target: Option<AllocationTarget>,
) -> Result<AllocationTarget> {
    if let Some(target) = target {
        if !target.is_valid() {
            return Err(RebalanceError::InvalidTarget(format!(
                "percentages sum to {:.2}, expected 100",
                target.total_pct()
            )));
        }
        return Ok(target);
    }

    Ok(AllocationTarget::for_profile(
        profile.unwrap_or(RiskProfile::Balanced),
    ))
}
