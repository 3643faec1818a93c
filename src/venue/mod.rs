//! Swap venue boundary
//!
//! A venue answers two questions: what route exists for a desired swap
//! (quote), and which chain instructions execute an accepted route
//! (swap_instructions). [`jupiter`] is the production implementation;
//! tests drive the pipeline with mock venues.

pub mod jupiter;

use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Swap request, sized in raw units of the input mint.
#[derive(Debug, Clone, Serialize)]
pub struct QuoteRequest {
    pub input_mint: String,
    pub output_mint: String,
    pub amount_raw: u64,
    pub slippage_bps: u16,
}

/// Route the venue offered for a [`QuoteRequest`].
///
/// `raw` carries the venue's quote document untouched; the instruction
/// endpoint expects it echoed back verbatim, so we never rebuild it
/// from the parsed fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapQuote {
    pub in_amount_raw: u64,
    pub out_amount_raw: u64,
    pub price_impact_pct: f64,
    /// Venue labels of the route hops, for reporting only.
    pub route: Vec<String>,
    pub raw: Value,
}

/// One account an instruction touches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRef {
    pub pubkey: String,
    pub is_signer: bool,
    pub is_writable: bool,
}

/// A single chain instruction as the venue serialized it.
///
/// `data` stays the venue's opaque base64 payload; nothing on our side
/// decodes or rewrites it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueInstruction {
    pub program_id: String,
    pub accounts: Vec<AccountRef>,
    pub data: String,
}

/// Instruction groups for one swap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapInstructions {
    pub compute_budget: Vec<VenueInstruction>,
    pub setup: Vec<VenueInstruction>,
    pub swap: VenueInstruction,
    pub cleanup: Option<VenueInstruction>,
}

impl SwapInstructions {
    /// All instructions in submission order: compute budget, setup,
    /// swap, cleanup.
    pub fn flatten(&self) -> Vec<VenueInstruction> {
        let mut ordered = Vec::with_capacity(self.compute_budget.len() + self.setup.len() + 2);
        ordered.extend(self.compute_budget.iter().cloned());
        ordered.extend(self.setup.iter().cloned());
        ordered.push(self.swap.clone());
        if let Some(cleanup) = &self.cleanup {
            ordered.push(cleanup.clone());
        }
        ordered
    }

    pub fn instruction_count(&self) -> usize {
        self.compute_budget.len()
            + self.setup.len()
            + 1
            + if self.cleanup.is_some() { 1 } else { 0 }
    }
}

#[async_trait::async_trait]
pub trait SwapVenue: Send + Sync {
    /// Best available route for the request. Fails with `NoRouteError`
    /// when the venue cannot serve the pair or size.
    async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote>;

    /// Instructions executing an accepted quote on behalf of
    /// `user_pubkey`. Fails with `InstructionFetchError`.
    async fn swap_instructions(
        &self,
        quote: &SwapQuote,
        user_pubkey: &str,
    ) -> Result<SwapInstructions>;
}
