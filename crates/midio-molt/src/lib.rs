//! # Molt
//!
//! Drift evaluation. The evaluator reads drift scores that node behaviors
//! have already written into their health, decides whether any node has
//! degraded past the threshold, and keeps an append-only ledger of the
//! molt decisions made. It never touches a loom; whoever drives the loop
//! decides when to call `Loom::request_molt`.

pub mod evaluator;

pub use evaluator::{MoltEvaluator, MoltRecord};
