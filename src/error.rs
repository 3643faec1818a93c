//! Error types for the portfolio rebalancer

use thiserror::Error;

/// Result type alias for rebalancer operations
pub type Result<T> = std::result::Result<T, RebalanceError>;

#[derive(Error, Debug)]
pub enum RebalanceError {
    // =============================
    // Swap Pipeline Stage Errors
    // =============================
    //
    // One variant per pipeline stage, terminal for the affected trade and
    // non-fatal for the run. The display string carries a stable label so
    // stage failures stay greppable after they are flattened into report
    // strings.

    #[error("NoRouteError: {0}")]
    NoRoute(String),

    #[error("InstructionFetchError: {0}")]
    InstructionFetch(String),

    #[error("SigningError: {0}")]
    Signing(String),

    #[error("BroadcastError: {0}")]
    Broadcast(String),

    #[error("ConfirmationTimeoutError: {0}")]
    ConfirmationTimeout(String),

    #[error("OnChainExecutionError: {0}")]
    OnChainExecution(String),

    // =============================
    // Analysis & Planning Errors
    // =============================

    #[error("Invalid allocation target: {0}")]
    InvalidTarget(String),

    #[error("Plan error: {0}")]
    Plan(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Market data error: {0}")]
    MarketData(String),

    // =============================
    // Infrastructure Errors
    // =============================

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Report store error: {0}")]
    Store(String),

    /// Settlement RPC failures before any stage semantics apply;
    /// callers rewrap these into the error of whichever stage was
    /// running.
    #[error("RpcError: {0}")]
    Rpc(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RebalanceError {
    /// True for errors raised by a pipeline stage.
    pub fn is_stage_error(&self) -> bool {
        matches!(
            self,
            RebalanceError::NoRoute(_)
                | RebalanceError::InstructionFetch(_)
                | RebalanceError::Signing(_)
                | RebalanceError::Broadcast(_)
                | RebalanceError::ConfirmationTimeout(_)
                | RebalanceError::OnChainExecution(_)
        )
    }

    /// True when the transaction may have reached the network even though the
    /// stage reported failure. Callers must reconcile final state out-of-band
    /// before treating funds as un-moved.
    pub fn is_ambiguous(&self) -> bool {
        matches!(
            self,
            RebalanceError::ConfirmationTimeout(_) | RebalanceError::OnChainExecution(_)
        )
    }
}
