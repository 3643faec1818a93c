//! Swap execution pipeline
//!
//! Drives one planned trade through its five stages: quote the route,
//! fetch venue instructions, assemble and remote-sign the transaction,
//! broadcast it, and await finality. A stage failure is terminal for
//! that trade only. It is caught here, recorded on the step with the
//! stage that last succeeded, and never propagated to the caller.

use crate::config::RebalanceConfig;
use crate::error::RebalanceError;
use crate::models::{ExecutionStep, PlannedTrade, StepStatus, SwapStage};
use crate::settlement::{await_confirmation, Settlement};
use crate::signer::TransactionSigner;
use crate::venue::{QuoteRequest, SwapInstructions, SwapQuote, SwapVenue, VenueInstruction};
use crate::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// One-trade state machine over the three chain collaborators.
pub struct SwapPipeline {
    venue: Arc<dyn SwapVenue>,
    signer: Arc<dyn TransactionSigner>,
    settlement: Arc<dyn Settlement>,
    config: RebalanceConfig,
}

impl SwapPipeline {
    pub fn new(
        venue: Arc<dyn SwapVenue>,
        signer: Arc<dyn TransactionSigner>,
        settlement: Arc<dyn Settlement>,
        config: RebalanceConfig,
    ) -> Self {
        Self {
            venue,
            signer,
            settlement,
            config,
        }
    }

    /// Runs `trade` to a terminal state. Never returns an error: a stage
    /// failure is folded into the returned step, and no retry happens
    /// here since quotes and blockhashes expire.
    pub async fn execute(&self, trade: &PlannedTrade, account: &str, wallet_id: &str) -> ExecutionStep {
        let started = Instant::now();
        let mut step = ExecutionStep::pending(trade.clone());
        step.status = StepStatus::Executing;

        info!(
            from = %trade.from_asset.symbol,
            to = %trade.to_asset.symbol,
            amount_usd = trade.amount_usd,
            priority = trade.priority,
            "Executing trade"
        );

        match self.drive(trade, account, wallet_id, &mut step).await {
            Ok(()) => {
                step.status = StepStatus::Completed;
                info!(
                    signature = step.signature.as_deref().unwrap_or(""),
                    out_amount_raw = step.out_amount_raw.unwrap_or(0),
                    "Trade confirmed"
                );
            }
            Err(e) => {
                step.status = StepStatus::Failed;
                step.error = Some(e.to_string());
                // Collaborators map their failures to stage variants;
                // anything else reached the step unmapped.
                if e.is_stage_error() {
                    warn!(stage_reached = %step.stage_reached, error = %e, "Trade failed");
                } else {
                    error!(
                        stage_reached = %step.stage_reached,
                        error = %e,
                        "Trade failed with an unmapped error"
                    );
                }
            }
        }

        step.execution_time_ms = started.elapsed().as_millis() as u64;
        step
    }

    /// Stage transitions in order. `step` records progress as each stage
    /// lands so a mid-flight error leaves the last successful stage
    /// behind.
    async fn drive(
        &self,
        trade: &PlannedTrade,
        account: &str,
        wallet_id: &str,
        step: &mut ExecutionStep,
    ) -> Result<()> {
        let quote = self.quote_stage(trade).await?;
        step.stage_reached = SwapStage::Quoted;
        // The accepted quote is the system of record for the realized
        // output amount; settled state is not re-read.
        step.out_amount_raw = Some(quote.out_amount_raw);

        let instructions = self.venue.swap_instructions(&quote, account).await?;
        step.stage_reached = SwapStage::InstructionsBuilt;

        let signed = self.sign_stage(account, wallet_id, &instructions).await?;
        step.stage_reached = SwapStage::Signed;

        let signature = self
            .settlement
            .send_transaction(&signed, self.config.skip_preflight)
            .await?;
        step.signature = Some(signature.clone());
        step.stage_reached = SwapStage::Submitted;

        await_confirmation(
            self.settlement.as_ref(),
            &signature,
            self.config.confirm_timeout,
            self.config.confirm_poll_interval,
        )
        .await?;
        step.stage_reached = SwapStage::Confirmed;

        Ok(())
    }

    async fn quote_stage(&self, trade: &PlannedTrade) -> Result<SwapQuote> {
        let amount_raw = usd_to_raw(
            trade.amount_usd,
            trade.from_unit_price_usd,
            trade.from_asset.decimals,
        )?;
        let request = QuoteRequest {
            input_mint: trade.from_asset.mint.clone(),
            output_mint: trade.to_asset.mint.clone(),
            amount_raw,
            slippage_bps: self.config.max_slippage_bps,
        };
        self.venue.quote(&request).await
    }

    /// Anchors the instruction list to a fresh blockhash and hands the
    /// serialized transaction to the remote signer. Everything in this
    /// transition, blockhash fetch included, fails as `SigningError`.
    async fn sign_stage(
        &self,
        account: &str,
        wallet_id: &str,
        instructions: &SwapInstructions,
    ) -> Result<String> {
        let blockhash = self
            .settlement
            .latest_blockhash()
            .await
            .map_err(|e| RebalanceError::Signing(format!("blockhash fetch failed: {}", e)))?;

        let unsigned = UnsignedTransaction {
            fee_payer: account,
            recent_blockhash: &blockhash,
            instructions: instructions.flatten(),
        };
        debug!(
            instruction_count = unsigned.instructions.len(),
            blockhash = %blockhash,
            "Transaction assembled"
        );

        let encoded = encode_transaction(&unsigned)?;
        self.signer.sign(wallet_id, &encoded).await
    }
}

/// Single atomic transaction addressed to the trade initiator, in the
/// shape the custodial signer ingests.
#[derive(Debug, Serialize)]
struct UnsignedTransaction<'a> {
    fee_payer: &'a str,
    recent_blockhash: &'a str,
    instructions: Vec<VenueInstruction>,
}

fn encode_transaction(unsigned: &UnsignedTransaction<'_>) -> Result<String> {
    let bytes = serde_json::to_vec(unsigned)
        .map_err(|e| RebalanceError::Signing(format!("transaction encode failed: {}", e)))?;
    Ok(hex::encode(bytes))
}

/// Converts the plan's USD sizing into raw units of the input asset,
/// flooring so a trade never spends more than the plan allocated.
fn usd_to_raw(amount_usd: f64, unit_price_usd: f64, decimals: u8) -> Result<u64> {
    if unit_price_usd <= 0.0 {
        return Err(RebalanceError::NoRoute(
            "input asset has no usable price".to_string(),
        ));
    }

    let quantity = amount_usd / unit_price_usd;
    let raw = (quantity * 10f64.powi(decimals as i32)).floor();
    if raw < 1.0 {
        return Err(RebalanceError::NoRoute(format!(
            "trade of ${:.2} rounds to zero raw units",
            amount_usd
        )));
    }
    Ok(raw as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssetCategory, TradeAsset};
    use crate::settlement::TransactionStatus;
    use crate::venue::AccountRef;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const USDC: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
    const WSOL: &str = "So11111111111111111111111111111111111111112";

    #[derive(Default)]
    struct MockVenue {
        no_route: bool,
        transport_error: bool,
        quote_calls: AtomicUsize,
        instruction_calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl SwapVenue for MockVenue {
        async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote> {
            self.quote_calls.fetch_add(1, Ordering::SeqCst);
            if self.transport_error {
                return Err(RebalanceError::Rpc("connection reset by peer".to_string()));
            }
            if self.no_route {
                return Err(RebalanceError::NoRoute(format!(
                    "no route from {} to {}",
                    request.input_mint, request.output_mint
                )));
            }
            Ok(SwapQuote {
                in_amount_raw: request.amount_raw,
                out_amount_raw: request.amount_raw * 2,
                price_impact_pct: 0.01,
                route: vec!["MockAMM".to_string()],
                raw: json!({ "outAmount": (request.amount_raw * 2).to_string() }),
            })
        }

        async fn swap_instructions(
            &self,
            _quote: &SwapQuote,
            user_pubkey: &str,
        ) -> Result<SwapInstructions> {
            self.instruction_calls.fetch_add(1, Ordering::SeqCst);
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
    struct MockSigner {
        reject: bool,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TransactionSigner for MockSigner {
        async fn sign(&self, _wallet_id: &str, transaction_hex: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.reject {
                return Err(RebalanceError::Signing("policy denied".to_string()));
            }
            assert!(!transaction_hex.is_empty());
            Ok("c2lnbmVkLXR4".to_string())
        }
    }

    #[derive(Default)]
    struct MockSettlement {
        reject_send: bool,
        statuses: Mutex<VecDeque<TransactionStatus>>,
        send_calls: AtomicUsize,
    }

    impl MockSettlement {
        fn scripted(statuses: Vec<TransactionStatus>) -> Self {
            Self {
                statuses: Mutex::new(statuses.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait::async_trait]
    impl Settlement for MockSettlement {
        async fn latest_blockhash(&self) -> Result<String> {
            Ok("9sHcv6xwn9YkB8nxTUGKDwPwNnmqVp5oLhhRGjKFCAPa".to_string())
        }

        async fn send_transaction(&self, _signed: &str, _skip: bool) -> Result<String> {
            self.send_calls.fetch_add(1, Ordering::SeqCst);
            if self.reject_send {
                return Err(RebalanceError::Broadcast("blockhash not found".to_string()));
            }
            Ok("5UfDu3wzZWFzM9jdrK5W3sVjFkDrLuwKiwdkNqK2pT9b".to_string())
        }

        async fn signature_status(&self, _signature: &str) -> Result<TransactionStatus> {
            Ok(self
                .statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(TransactionStatus::Confirmed))
        }
    }

    fn trade() -> PlannedTrade {
        PlannedTrade {
            from_category: AssetCategory::Stablecoin,
            to_category: AssetCategory::BaseAsset,
            from_asset: TradeAsset {
                mint: USDC.to_string(),
                symbol: "USDC".to_string(),
                decimals: 6,
            },
            to_asset: TradeAsset {
                mint: WSOL.to_string(),
                symbol: "SOL".to_string(),
                decimals: 9,
            },
            amount_usd: 300.0,
            from_unit_price_usd: 1.0,
            priority: 0,
            reason: "stablecoin +30.0% vs target, baseAsset -30.0% vs target".to_string(),
        }
    }

    fn test_config() -> RebalanceConfig {
        RebalanceConfig {
            confirm_timeout: Duration::from_millis(100),
            confirm_poll_interval: Duration::from_millis(1),
            ..RebalanceConfig::default()
        }
    }

    fn pipeline(
        venue: MockVenue,
        signer: MockSigner,
        settlement: MockSettlement,
    ) -> SwapPipeline {
        SwapPipeline::new(
            Arc::new(venue),
            Arc::new(signer),
            Arc::new(settlement),
            test_config(),
        )
    }

    #[tokio::test]
    async fn happy_path_reaches_confirmed() {
        let pipeline = pipeline(
            MockVenue::default(),
            MockSigner::default(),
            MockSettlement::default(),
        );

        let step = pipeline.execute(&trade(), "acct-pubkey", "wallet-1").await;

        assert_eq!(step.status, StepStatus::Completed);
        assert_eq!(step.stage_reached, SwapStage::Confirmed);
        assert_eq!(step.effective_stage(), SwapStage::Confirmed);
        assert!(step.signature.is_some());
        // $300 of USDC at $1 with 6 decimals, doubled by the mock venue
        assert_eq!(step.out_amount_raw, Some(600_000_000));
        assert!(step.error.is_none());
    }

    #[tokio::test]
    async fn no_route_fails_before_any_signing() {
        let signer = Arc::new(MockSigner::default());
        let settlement = Arc::new(MockSettlement::default());
        let pipeline = SwapPipeline::new(
            Arc::new(MockVenue {
                no_route: true,
                ..Default::default()
            }),
            signer.clone(),
            settlement.clone(),
            test_config(),
        );

        let step = pipeline.execute(&trade(), "acct-pubkey", "wallet-1").await;

        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(step.stage_reached, SwapStage::Pending);
        assert_eq!(step.effective_stage(), SwapStage::Failed);
        assert!(step.error.as_ref().unwrap().contains("NoRouteError"));
        assert!(step.signature.is_none());
        assert_eq!(signer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(settlement.send_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn signer_rejection_keeps_instructions_built_stage() {
        let signer = MockSigner {
            reject: true,
            ..Default::default()
        };
        let pipeline = pipeline(MockVenue::default(), signer, MockSettlement::default());

        let step = pipeline.execute(&trade(), "acct-pubkey", "wallet-1").await;

        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(step.stage_reached, SwapStage::InstructionsBuilt);
        assert!(step.error.as_ref().unwrap().contains("SigningError"));
        assert!(step.error.as_ref().unwrap().contains("policy denied"));
    }

    #[tokio::test]
    async fn broadcast_rejection_keeps_signed_stage() {
        let settlement = MockSettlement {
            reject_send: true,
            ..Default::default()
        };
        let pipeline = pipeline(MockVenue::default(), MockSigner::default(), settlement);

        let step = pipeline.execute(&trade(), "acct-pubkey", "wallet-1").await;

        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(step.stage_reached, SwapStage::Signed);
        assert!(step.error.as_ref().unwrap().contains("BroadcastError"));
        assert!(step.signature.is_none());
    }

    #[tokio::test]
    async fn revert_fails_with_submitted_stage_and_signature() {
        let settlement = MockSettlement::scripted(vec![TransactionStatus::Failed(
            "InstructionError: slippage".to_string(),
        )]);
        let pipeline = pipeline(MockVenue::default(), MockSigner::default(), settlement);

        let step = pipeline.execute(&trade(), "acct-pubkey", "wallet-1").await;

        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(step.stage_reached, SwapStage::Submitted);
        assert!(step.signature.is_some());
        assert!(step
            .error
            .as_ref()
            .unwrap()
            .contains("OnChainExecutionError"));
    }

    #[tokio::test]
    async fn collaborators_are_called_once_each_on_success() {
        let venue = Arc::new(MockVenue::default());
        let signer = Arc::new(MockSigner::default());
        let settlement = Arc::new(MockSettlement::default());
        let pipeline = SwapPipeline::new(
            venue.clone(),
            signer.clone(),
            settlement.clone(),
            test_config(),
        );

        pipeline.execute(&trade(), "acct-pubkey", "wallet-1").await;

        assert_eq!(venue.quote_calls.load(Ordering::SeqCst), 1);
        assert_eq!(venue.instruction_calls.load(Ordering::SeqCst), 1);
        assert_eq!(signer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(settlement.send_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn drive_errors_carry_stage_classification() {
        let routed_out = pipeline(
            MockVenue {
                no_route: true,
                ..Default::default()
            },
            MockSigner::default(),
            MockSettlement::default(),
        );
        let mut step = ExecutionStep::pending(trade());
        let err = routed_out
            .drive(&trade(), "acct-pubkey", "wallet-1", &mut step)
            .await
            .unwrap_err();
        assert!(err.is_stage_error());

        let transport_down = pipeline(
            MockVenue {
                transport_error: true,
                ..Default::default()
            },
            MockSigner::default(),
            MockSettlement::default(),
        );
        let mut step = ExecutionStep::pending(trade());
        let err = transport_down
            .drive(&trade(), "acct-pubkey", "wallet-1", &mut step)
            .await
            .unwrap_err();
        assert!(!err.is_stage_error());
    }

    #[tokio::test]
    async fn unmapped_error_folds_into_the_step_like_any_failure() {
        let pipeline = pipeline(
            MockVenue {
                transport_error: true,
                ..Default::default()
            },
            MockSigner::default(),
            MockSettlement::default(),
        );

        let step = pipeline.execute(&trade(), "acct-pubkey", "wallet-1").await;

        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(step.stage_reached, SwapStage::Pending);
        assert!(step.error.as_ref().unwrap().contains("RpcError"));
    }

    #[test]
    fn usd_to_raw_floors() {
        assert_eq!(usd_to_raw(300.0, 1.0, 6).unwrap(), 300_000_000);
        assert_eq!(usd_to_raw(1.5, 200.0, 9).unwrap(), 7_500_000);
        // 0.105 SOL at 9 decimals floors mid-unit remainders away
        assert_eq!(usd_to_raw(21.0, 200.0, 9).unwrap(), 105_000_000);
    }

    #[test]
    fn usd_to_raw_rejects_zero_sizes() {
        let err = usd_to_raw(0.0000001, 1.0, 0).unwrap_err();
        assert!(err.to_string().contains("NoRouteError"));

        assert!(usd_to_raw(100.0, 0.0, 6).is_err());
        assert!(usd_to_raw(100.0, -1.0, 6).is_err());
    }

    #[test]
    fn unsigned_transaction_encodes_to_hex() {
        let unsigned = UnsignedTransaction {
            fee_payer: "acct-pubkey",
            recent_blockhash: "9sHcv6xwn9YkB8nxTUGKDwPwNnmqVp5oLhhRGjKFCAPa",
            instructions: vec![],
        };
        let encoded = encode_transaction(&unsigned).unwrap();
        assert!(encoded.chars().all(|c| c.is_ascii_hexdigit()));

        let decoded = hex::decode(&encoded).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(value["fee_payer"], "acct-pubkey");
    }
}
