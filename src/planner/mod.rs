//! Trade plan generation
//!
//! Turns drift into a minimal, non-overlapping set of trades: overweight
//! categories are greedily matched against underweight ones in canonical
//! category order, so the emitted plan is deterministic for a given
//! snapshot. Dust (anything under the minimum trade size) is never traded.

use crate::config::{AssetRegistry, RebalanceConfig};
use crate::models::{AllocationTarget, AssetCategory, HoldingSnapshot, PlannedTrade, TradePlan};
use chrono::Utc;
use tracing::debug;

/// One side of the matching pass: a category with its remaining USD
/// imbalance and the asset that represents it in trades.
struct Imbalance {
    category: AssetCategory,
    deviation_pct: f64,
    remaining_usd: f64,
}

pub struct TradePlanner {
    config: RebalanceConfig,
    registry: AssetRegistry,
}

impl TradePlanner {
    pub fn new(config: RebalanceConfig, registry: AssetRegistry) -> Self {
        Self { config, registry }
    }

    /// Generate the ordered trade list that moves `snapshot` toward `target`.
    ///
    /// Categories within the deviation threshold, or whose imbalance is below
    /// the minimum trade size, hold. Matching walks both sides in canonical
    /// order and assigns ascending priority in emission order, which is what
    /// puts base-asset trades ahead of other-token trades when one pass
    /// generates both.
    pub fn plan(&self, snapshot: &HoldingSnapshot, target: &AllocationTarget) -> TradePlan {
        let mut warnings = Vec::new();
        let total = snapshot.total_value_usd;

        if total < self.config.min_portfolio_usd {
            warnings.push(format!(
                "portfolio value ${:.2} is below the ${:.2} materiality floor; trades may be infeasible",
                total, self.config.min_portfolio_usd
            ));
        }

        let (overweight, underweight) = self.partition(snapshot, target, &mut warnings);
        let trades = self.match_sides(snapshot, overweight, underweight, &mut warnings);

        debug!(
            account = %snapshot.account,
            target = %target.name,
            trade_count = trades.len(),
            warning_count = warnings.len(),
            "Trade plan generated"
        );

        TradePlan {
            trades,
            warnings,
            generated_at: Utc::now(),
        }
    }

    /// Split the target's categories into overweight and underweight sides.
    /// Both lists come out in canonical order because the target's
    /// percentages map iterates that way.
    fn partition(
        &self,
        snapshot: &HoldingSnapshot,
        target: &AllocationTarget,
        warnings: &mut Vec<String>,
    ) -> (Vec<Imbalance>, Vec<Imbalance>) {
        let total = snapshot.total_value_usd;
        let mut overweight = Vec::new();
        let mut underweight = Vec::new();

        for (&category, &target_pct) in &target.percentages {
            let current_usd = snapshot.value_in(category);
            let target_usd = target_pct / 100.0 * total;
            let delta_usd = current_usd - target_usd;
            let current_pct = if total > 0.0 {
                current_usd / total * 100.0
            } else {
                0.0
            };
            let deviation_pct = current_pct - target_pct;

            if deviation_pct.abs() <= self.config.threshold_pct {
                continue;
            }
            if delta_usd.abs() <= self.config.min_trade_usd {
                continue;
            }

            if category == AssetCategory::Stock && !self.config.stocks_enabled {
                warnings.push(
                    "stock category needs rebalancing but stock trading is disabled".to_string(),
                );
                continue;
            }

            let side = Imbalance {
                category,
                deviation_pct,
                remaining_usd: delta_usd.abs(),
            };
            if delta_usd > 0.0 {
                overweight.push(side);
            } else {
                underweight.push(side);
            }
        }

        (overweight, underweight)
    }

    /// Greedy matching: each overweight category sells into each underweight
    /// category, in encounter order, until one side is exhausted or drops
    /// under the minimum trade size.
    fn match_sides(
        &self,
        snapshot: &HoldingSnapshot,
        overweight: Vec<Imbalance>,
        mut underweight: Vec<Imbalance>,
        warnings: &mut Vec<String>,
    ) -> Vec<PlannedTrade> {
        let min_trade = self.config.min_trade_usd;
        let mut trades = Vec::new();

        for over in overweight {
            let mut remaining = over.remaining_usd;

            let Some(sell_holding) = snapshot.largest_in(over.category) else {
                // An overweight category always has holdings; guard anyway.
                warnings.push(format!(
                    "no sellable asset found for overweight category {}",
                    over.category
                ));
                continue;
            };

            for under in underweight.iter_mut() {
                if remaining < min_trade {
                    break;
                }
                if under.remaining_usd < min_trade {
                    continue;
                }

                let Some(buy_asset) = snapshot
                    .largest_in(under.category)
                    .map(|h| h.trade_asset())
                    .or_else(|| self.registry.default_asset(under.category))
                else {
                    warnings.push(format!(
                        "no buyable asset known for underweight category {}",
                        under.category
                    ));
                    continue;
                };

                let size = remaining.min(under.remaining_usd);
                trades.push(PlannedTrade {
                    from_category: over.category,
                    to_category: under.category,
                    from_asset: sell_holding.trade_asset(),
                    to_asset: buy_asset,
                    amount_usd: size,
                    from_unit_price_usd: sell_holding.unit_price_usd,
                    priority: trades.len() as u32,
                    reason: format!(
                        "{} {:+.1}% vs target, {} {:+.1}% vs target",
                        over.category, over.deviation_pct, under.category, under.deviation_pct
                    ),
                });

                remaining -= size;
                under.remaining_usd -= size;
            }

            if remaining >= min_trade {
                warnings.push(format!(
                    "overweight {} has ${:.2} with no underweight counterpart; left untraded",
                    over.category, remaining
                ));
            }
        }

        for under in &underweight {
            if under.remaining_usd >= min_trade {
                warnings.push(format!(
                    "underweight {} has ${:.2} with no overweight counterpart; left untraded",
                    under.category, under.remaining_usd
                ));
            }
        }

        trades
    }
}
