//! Portfolio Rebalancer
//!
//! A production-grade rebalancing service that:
//! - Snapshots on-chain holdings and values them in USD
//! - Measures drift against a target allocation
//! - Plans the minimal set of swaps to close the gap
//! - Executes each swap through a quote/sign/broadcast pipeline
//! - Records every run for audit and inspection
//!
//! UNIFIED LOOP:
//! SNAPSHOT → DRIFT → PLAN → EXECUTE → SNAPSHOT → RECORD

pub mod analyzer;
pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod execution;
pub mod history;
pub mod market;
pub mod models;
pub mod pipeline;
pub mod planner;
pub mod service;
pub mod settlement;
pub mod signer;
pub mod venue;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use analyzer::DriftAnalyzer;
