use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use midio_canvas::{Node, NodeId};
use midio_core::config::MoltConfig;

/// One molt decision. Never modified once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoltRecord {
    pub reason: String,
    pub degraded_nodes: Vec<NodeId>,
    pub action: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MoltEvaluator {
    threshold: f64,
    history: Vec<MoltRecord>,
}

impl MoltEvaluator {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            history: Vec::new(),
        }
    }

    pub fn from_config(config: &MoltConfig) -> Self {
        Self::new(config.drift_threshold)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold;
    }

    /// Drift score per node, as reported by the nodes themselves.
    pub fn assess_drift<'a>(&self, nodes: impl IntoIterator<Item = &'a Node>) -> HashMap<NodeId, f64> {
        nodes
            .into_iter()
            .map(|n| (n.id.clone(), n.health().drift_score))
            .collect()
    }

    /// Whether any node is at or above the threshold, and which ones are.
    /// Degraded ids come back in the order the nodes were given.
    pub fn should_molt<'a>(&self, nodes: impl IntoIterator<Item = &'a Node>) -> (bool, Vec<NodeId>) {
        let degraded: Vec<NodeId> = nodes
            .into_iter()
            .filter(|n| n.health().drift_score >= self.threshold)
            .map(|n| n.id.clone())
            .collect();
        debug!(
            threshold = self.threshold,
            degraded = degraded.len(),
            "Assessed drift"
        );
        (!degraded.is_empty(), degraded)
    }

    /// Append a decision to the ledger.
    pub fn record_molt(
        &mut self,
        reason: impl Into<String>,
        degraded_nodes: Vec<NodeId>,
        action: impl Into<String>,
    ) {
        let record = MoltRecord {
            reason: reason.into(),
            degraded_nodes,
            action: action.into(),
            recorded_at: Utc::now(),
        };
        info!(
            reason = %record.reason,
            action = %record.action,
            nodes = record.degraded_nodes.len(),
            "Molt recorded"
        );
        self.history.push(record);
    }

    pub fn history(&self) -> &[MoltRecord] {
        &self.history
    }
}

impl Default for MoltEvaluator {
    fn default() -> Self {
        Self::from_config(&MoltConfig::default())
    }
}
