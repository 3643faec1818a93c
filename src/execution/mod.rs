//! Execution aggregation
//!
//! This is where plans become transactions.
//! Trades run strictly one at a time, in plan priority order; a failed
//! trade degrades the run status but never halts the remainder, so a
//! plan of N independent trades is not all-or-nothing.

use crate::config::RebalanceConfig;
use crate::error::RebalanceError;
use crate::models::{
    ExecutionReport, ExecutionStep, ExecutionTotals, RunStatus, StepStatus, TradePlan,
};
use crate::pipeline::SwapPipeline;
use crate::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Maximum trades allowed per run (mis-sized plans are refused outright)
const MAX_TRADES_PER_RUN: usize = 32;

/// Executes a trade plan step-by-step through the swap pipeline.
pub struct ExecutionEngine {
    pipeline: Arc<SwapPipeline>,
    config: RebalanceConfig,
}

impl ExecutionEngine {
    pub fn new(pipeline: Arc<SwapPipeline>, config: RebalanceConfig) -> Self {
        Self { pipeline, config }
    }

    /// Execute every trade in the plan serially, pausing between trades
    /// and continuing past failures. With `dry_run` the plan is only
    /// previewed; no collaborator is touched.
    pub async fn execute_plan(
        &self,
        plan: &TradePlan,
        account: &str,
        wallet_id: &str,
        dry_run: bool,
    ) -> Result<ExecutionReport> {
        if plan.trades.len() > MAX_TRADES_PER_RUN {
            return Err(RebalanceError::Plan(format!(
                "plan exceeds maximum allowed trades ({})",
                MAX_TRADES_PER_RUN
            )));
        }

        let report_id = Uuid::new_v4();
        let started_at = Utc::now();

        if dry_run {
            return Ok(self.preview(plan, report_id, started_at));
        }

        debug!(report_id = %report_id, trades = plan.trades.len(), "Starting plan execution");

        let mut steps = Vec::with_capacity(plan.trades.len());
        let mut errors = Vec::new();
        let mut completed = 0usize;
        let mut value_traded_usd = 0.0;

        for (index, trade) in plan.trades.iter().enumerate() {
            if index > 0 {
                // Serial by construction: the pause lets earlier fills
                // settle into the prices the next quote sees.
                tokio::time::sleep(self.config.inter_trade_delay).await;
            }

            let step = self.pipeline.execute(trade, account, wallet_id).await;

            match step.status {
                StepStatus::Completed => {
                    completed += 1;
                    value_traded_usd += trade.amount_usd;
                }
                StepStatus::Failed => {
                    if let Some(error) = &step.error {
                        warn!(
                            priority = trade.priority,
                            error = %error,
                            "Trade failed, continuing with remaining trades"
                        );
                        errors.push(error.clone());
                    }
                }
                _ => {}
            }

            steps.push(step);
        }

        let attempted = steps.len();
        let status = RunStatus::derive(attempted, completed);

        info!(
            report_id = %report_id,
            status = ?status,
            attempted,
            completed,
            value_traded_usd,
            "Plan execution completed"
        );

        Ok(ExecutionReport {
            report_id,
            status,
            dry_run: false,
            steps,
            totals: ExecutionTotals {
                attempted,
                completed,
                value_traded_usd,
            },
            errors,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Previews the run: every step stays pending, nothing counts as
    /// attempted, and no venue, signer, or settlement call is made.
    fn preview(
        &self,
        plan: &TradePlan,
        report_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> ExecutionReport {
        info!(report_id = %report_id, trades = plan.trades.len(), "Dry run, no trades executed");

        ExecutionReport {
            report_id,
            status: RunStatus::derive(0, 0),
            dry_run: true,
            steps: plan
                .trades
                .iter()
                .cloned()
                .map(ExecutionStep::pending)
                .collect(),
            totals: ExecutionTotals::default(),
            errors: Vec::new(),
            started_at,
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssetCategory, SwapStage, TradeAsset};
    use crate::settlement::{Settlement, TransactionStatus};
    use crate::signer::TransactionSigner;
    use crate::venue::{
        AccountRef, QuoteRequest, SwapInstructions, SwapQuote, SwapVenue, VenueInstruction,
    };
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const USDC: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
    const USDT: &str = "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB";
    const WSOL: &str = "So11111111111111111111111111111111111111112";

    /// Venue that refuses to route one input mint and serves the rest.
    #[derive(Default)]
    struct SelectiveVenue {
        unroutable_mint: Option<String>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl SwapVenue for SelectiveVenue {
        async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.unroutable_mint.as_deref() == Some(request.input_mint.as_str()) {
                return Err(RebalanceError::NoRoute(format!(
                    "no route for {}",
                    request.input_mint
                )));
            }
            Ok(SwapQuote {
                in_amount_raw: request.amount_raw,
                out_amount_raw: request.amount_raw,
                price_impact_pct: 0.0,
                route: vec!["MockAMM".to_string()],
                raw: json!({}),
            })
        }

        async fn swap_instructions(
            &self,
            _quote: &SwapQuote,
            user_pubkey: &str,
        ) -> Result<SwapInstructions> {
            Ok(SwapInstructions {
                compute_budget: vec![],
                setup: vec![],
                swap: VenueInstruction {
                    program_id: "MockSwap1111111111111111111111111111111111".to_string(),
                    accounts: vec![AccountRef {
                        pubkey: user_pubkey.to_string(),
                        is_signer: true,
                        is_writable: true,
                    }],
                    data: "bW9jaw==".to_string(),
                },
                cleanup: None,
            })
        }
    }

    #[derive(Default)]
    struct CountingSigner {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TransactionSigner for CountingSigner {
        async fn sign(&self, _wallet_id: &str, _transaction_hex: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("c2lnbmVkLXR4".to_string())
        }
    }

    #[derive(Default)]
    struct InstantSettlement {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Settlement for InstantSettlement {
        async fn latest_blockhash(&self) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("9sHcv6xwn9YkB8nxTUGKDwPwNnmqVp5oLhhRGjKFCAPa".to_string())
        }

        async fn send_transaction(&self, _signed: &str, _skip: bool) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("5UfDu3wzZWFzM9jdrK5W3sVjFkDrLuwKiwdkNqK2pT9b".to_string())
        }

        async fn signature_status(&self, _signature: &str) -> Result<TransactionStatus> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TransactionStatus::Confirmed)
        }
    }

    fn trade(from_mint: &str, from_symbol: &str, amount_usd: f64, priority: u32) -> crate::models::PlannedTrade {
        crate::models::PlannedTrade {
            from_category: AssetCategory::Stablecoin,
            to_category: AssetCategory::BaseAsset,
            from_asset: TradeAsset {
                mint: from_mint.to_string(),
                symbol: from_symbol.to_string(),
                decimals: 6,
            },
            to_asset: TradeAsset {
                mint: WSOL.to_string(),
                symbol: "SOL".to_string(),
                decimals: 9,
            },
            amount_usd,
            from_unit_price_usd: 1.0,
            priority,
            reason: "test".to_string(),
        }
    }

    fn plan(trades: Vec<crate::models::PlannedTrade>) -> TradePlan {
        TradePlan {
            trades,
            warnings: Vec::new(),
            generated_at: Utc::now(),
        }
    }

    fn test_config() -> RebalanceConfig {
        RebalanceConfig {
            inter_trade_delay: Duration::from_millis(1),
            confirm_timeout: Duration::from_millis(100),
            confirm_poll_interval: Duration::from_millis(1),
            ..RebalanceConfig::default()
        }
    }

    fn engine_with(venue: Arc<SelectiveVenue>) -> ExecutionEngine {
        let config = test_config();
        let pipeline = SwapPipeline::new(
            venue,
            Arc::new(CountingSigner::default()),
            Arc::new(InstantSettlement::default()),
            config.clone(),
        );
        ExecutionEngine::new(Arc::new(pipeline), config)
    }

    #[tokio::test]
    async fn all_trades_completed_is_success() {
        let engine = engine_with(Arc::new(SelectiveVenue::default()));
        let plan = plan(vec![trade(USDC, "USDC", 300.0, 0), trade(USDT, "USDT", 150.0, 1)]);

        let report = engine
            .execute_plan(&plan, "acct", "wallet-1", false)
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.totals.attempted, 2);
        assert_eq!(report.totals.completed, 2);
        assert!((report.totals.value_traded_usd - 450.0).abs() < 1e-9);
        assert!(report.errors.is_empty());
        assert!(report
            .steps
            .iter()
            .all(|s| s.stage_reached == SwapStage::Confirmed));
    }

    #[tokio::test]
    async fn one_failure_degrades_to_partial_and_continues() {
        let engine = engine_with(Arc::new(SelectiveVenue {
            unroutable_mint: Some(USDT.to_string()),
            ..Default::default()
        }));
        let plan = plan(vec![
            trade(USDT, "USDT", 200.0, 0),
            trade(USDC, "USDC", 300.0, 1),
        ]);

        let report = engine
            .execute_plan(&plan, "acct", "wallet-1", false)
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Partial);
        assert_eq!(report.totals.attempted, 2);
        assert_eq!(report.totals.completed, 1);
        // Only the completed trade counts toward traded value.
        assert!((report.totals.value_traded_usd - 300.0).abs() < 1e-9);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("NoRouteError"));

        // The failed trade is enumerated ahead of the completed one,
        // matching plan priority order.
        assert_eq!(report.steps[0].status, StepStatus::Failed);
        assert_eq!(report.steps[1].status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn every_trade_failing_is_a_failed_run() {
        let engine = engine_with(Arc::new(SelectiveVenue {
            unroutable_mint: Some(USDC.to_string()),
            ..Default::default()
        }));
        let plan = plan(vec![trade(USDC, "USDC", 100.0, 0), trade(USDC, "USDC", 50.0, 1)]);

        let report = engine
            .execute_plan(&plan, "acct", "wallet-1", false)
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.totals.completed, 0);
        assert_eq!(report.errors.len(), 2);
    }

    #[tokio::test]
    async fn empty_plan_is_a_success_with_nothing_attempted() {
        let engine = engine_with(Arc::new(SelectiveVenue::default()));

        let report = engine
            .execute_plan(&plan(vec![]), "acct", "wallet-1", false)
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.totals.attempted, 0);
        assert!(report.steps.is_empty());
    }

    #[tokio::test]
    async fn dry_run_touches_no_collaborator() {
        let venue = Arc::new(SelectiveVenue::default());
        let engine = engine_with(venue.clone());
        let plan = plan(vec![trade(USDC, "USDC", 300.0, 0), trade(USDT, "USDT", 150.0, 1)]);

        let report = engine
            .execute_plan(&plan, "acct", "wallet-1", true)
            .await
            .unwrap();

        assert!(report.dry_run);
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.totals.attempted, 0);
        assert_eq!(report.totals.completed, 0);
        assert_eq!(report.steps.len(), 2);
        assert!(report
            .steps
            .iter()
            .all(|s| s.status == StepStatus::Pending && s.stage_reached == SwapStage::Pending));
        assert_eq!(venue.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn oversized_plan_is_refused() {
        let engine = engine_with(Arc::new(SelectiveVenue::default()));
        let trades: Vec<_> = (0..MAX_TRADES_PER_RUN as u32 + 1)
            .map(|i| trade(USDC, "USDC", 20.0, i))
            .collect();

        let result = engine.execute_plan(&plan(trades), "acct", "wallet-1", false).await;

        assert!(result.is_err());
    }
}
