//! Drift analysis
//!
//! Compares a holding snapshot against an allocation target and reduces the
//! result to per-category deviations plus a 0-100 health score. Analysis has
//! no error path: a zero-value snapshot simply reports zero current share
//! everywhere.

use crate::models::{AllocationTarget, Drift, DriftReport, HoldingSnapshot};
use chrono::Utc;
use tracing::debug;

pub struct DriftAnalyzer {
    threshold_pct: f64,
}

impl DriftAnalyzer {
    pub fn new(threshold_pct: f64) -> Self {
        Self { threshold_pct }
    }

    /// Per-category deviation for every category the target names, in
    /// canonical category order.
    pub fn analyze(&self, snapshot: &HoldingSnapshot, target: &AllocationTarget) -> Vec<Drift> {
        let total = snapshot.total_value_usd;

        target
            .percentages
            .iter()
            .map(|(&category, &target_pct)| {
                let current_pct = if total > 0.0 {
                    snapshot.value_in(category) / total * 100.0
                } else {
                    0.0
                };

                Drift {
                    category,
                    current_pct,
                    target_pct,
                    deviation_pct: current_pct - target_pct,
                }
            })
            .collect()
    }

    /// Health score: `max(0, 100 - sum(|deviation|) / 2)`, rounded to an integer.
    ///
    /// Two categories swapped completely is the worst case (total absolute
    /// deviation 200), which floors the score at 0.
    pub fn health_score(drifts: &[Drift]) -> u8 {
        let total_abs: f64 = drifts.iter().map(|d| d.deviation_pct.abs()).sum();
        (100.0 - total_abs / 2.0).round().clamp(0.0, 100.0) as u8
    }

    /// True iff any category deviates beyond the configured threshold.
    pub fn needs_rebalance(&self, drifts: &[Drift]) -> bool {
        drifts
            .iter()
            .any(|d| d.deviation_pct.abs() > self.threshold_pct)
    }

    /// Full analysis pass rolled into one report.
    pub fn report(&self, snapshot: &HoldingSnapshot, target: &AllocationTarget) -> DriftReport {
        let drifts = self.analyze(snapshot, target);
        let health_score = Self::health_score(&drifts);
        let rebalance_needed = self.needs_rebalance(&drifts);

        debug!(
            account = %snapshot.account,
            target = %target.name,
            health_score,
            rebalance_needed,
            "Drift analysis complete"
        );

        DriftReport {
            target_name: target.name.clone(),
            drifts,
            health_score,
            rebalance_needed,
            analyzed_at: Utc::now(),
        }
    }
}
