//! The built-in morning ritual:
//! `gmail_fetcher → summarizer → planner → {notion_logger, drift_verifier}`.
//!
//! Third-party calls are stubbed. The fetcher passes through any emails
//! handed to it as initial input, so the rest of the pipeline has
//! something real to chew on.

use std::collections::HashSet;

use serde_json::{json, Value};

use midio_canvas::{Behavior, BehaviorRegistry, Node, NodeKind, NodeState, YarnType};
use midio_core::config::LoomConfig;
use midio_core::error::Result;
use midio_loom::Loom;

pub const LOOM_NAME: &str = "morning_ritual";

/// Memory key holding the plan seen on the previous pass.
const LAST_PLAN: &str = "last_plan";

pub struct GmailFetcher;

impl Behavior for GmailFetcher {
    fn handler(&self) -> &str {
        "gmail.fetch_emails"
    }

    fn execute(&mut self, input: Value, _state: &mut NodeState) -> Result<Value> {
        let emails = input
            .get("emails")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(json!({ "count": emails.len(), "emails": emails }))
    }
}

pub struct Summarizer;

impl Behavior for Summarizer {
    fn handler(&self) -> &str {
        "summarize"
    }

    fn execute(&mut self, input: Value, _state: &mut NodeState) -> Result<Value> {
        let emails = input
            .get("emails")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let subjects: Vec<&str> = emails
            .iter()
            .filter_map(|e| e.get("subject").and_then(Value::as_str))
            .collect();
        let mut summary = format!("Summarized {} emails", emails.len());
        if !subjects.is_empty() {
            summary.push_str(": ");
            summary.push_str(&subjects.join(", "));
        }
        Ok(json!({ "summary": summary, "subjects": subjects }))
    }
}

pub struct Planner;

impl Behavior for Planner {
    fn handler(&self) -> &str {
        "plan"
    }

    fn execute(&mut self, input: Value, _state: &mut NodeState) -> Result<Value> {
        let items: Vec<String> = input
            .get("subjects")
            .and_then(Value::as_array)
            .map(|subjects| {
                subjects
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|s| format!("Follow up: {}", s))
                    .collect()
            })
            .unwrap_or_default();
        let plan_text = if items.is_empty() {
            "No actions extracted yet.".to_string()
        } else {
            items.join("; ")
        };
        Ok(json!({ "action_items": items, "plan_text": plan_text }))
    }
}

pub struct NotionLogger;

impl Behavior for NotionLogger {
    fn handler(&self) -> &str {
        "notion.create_page"
    }

    fn execute(&mut self, input: Value, _state: &mut NodeState) -> Result<Value> {
        let items = input
            .get("action_items")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        Ok(json!({ "logged": true, "destination": "notion", "items": items }))
    }
}

/// Guard comparing today's plan with the one remembered from the last pass.
///
/// Drift is the Jaccard distance between the two plans' word sets. The first
/// pass has nothing to compare against and reports 0.0.
pub struct DriftVerifier {
    threshold: f64,
}

impl DriftVerifier {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl Behavior for DriftVerifier {
    fn handler(&self) -> &str {
        "drift_verifier"
    }

    fn config(&self) -> Value {
        json!({ "threshold": self.threshold })
    }

    fn execute(&mut self, input: Value, state: &mut NodeState) -> Result<Value> {
        let today = input
            .get("plan_text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let drift = state
            .memory
            .get_as::<String>(LAST_PLAN)
            .map_or(0.0, |yesterday| word_distance(&yesterday, &today));

        state.health.drift_score = drift;
        state.memory.set_as(LAST_PLAN, &today)?;

        let status = if drift < self.threshold {
            "ok"
        } else {
            "molt_recommended"
        };
        Ok(json!({ "drift_score": drift, "status": status }))
    }
}

/// 1 - |A ∩ B| / |A ∪ B| over lowercase words. Two empty texts are identical.
pub fn word_distance(a: &str, b: &str) -> f64 {
    let words = |s: &str| -> HashSet<String> {
        s.split_whitespace().map(|w| w.to_lowercase()).collect()
    };
    let (a, b) = (words(a), words(b));
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    let shared = a.intersection(&b).count();
    1.0 - shared as f64 / union as f64
}

/// Registry with every ritual behavior, for loading burned rituals.
pub fn registry() -> BehaviorRegistry {
    let mut registry = BehaviorRegistry::new();
    registry.register("gmail.fetch_emails", |_| Ok(Box::new(GmailFetcher)));
    registry.register("summarize", |_| Ok(Box::new(Summarizer)));
    registry.register("plan", |_| Ok(Box::new(Planner)));
    registry.register("notion.create_page", |_| Ok(Box::new(NotionLogger)));
    registry.register("drift_verifier", |config| {
        let threshold = config
            .get("threshold")
            .and_then(Value::as_f64)
            .unwrap_or(0.5);
        Ok(Box::new(DriftVerifier::new(threshold)))
    });
    registry
}

/// Assemble the ritual loom. `drift_threshold` tunes the verifier's status.
pub fn build(config: &LoomConfig, drift_threshold: f64) -> Result<Loom> {
    let mut loom = Loom::from_config(LOOM_NAME, config);

    let gmail = loom.add_node(Node::with_behavior(
        "gmail_fetcher",
        NodeKind::Source,
        Box::new(GmailFetcher),
    ))?;
    let summarizer = loom.add_node(Node::with_behavior(
        "summarizer",
        NodeKind::Transform,
        Box::new(Summarizer),
    ))?;
    let planner = loom.add_node(Node::with_behavior(
        "planner",
        NodeKind::Transform,
        Box::new(Planner),
    ))?;
    let notion = loom.add_node(Node::with_behavior(
        "notion_logger",
        NodeKind::Action,
        Box::new(NotionLogger),
    ))?;
    let verifier = loom.add_node(Node::with_behavior(
        "drift_verifier",
        NodeKind::Guard,
        Box::new(DriftVerifier::new(drift_threshold)),
    ))?;

    loom.connect(&gmail, &summarizer, YarnType::Data)?;
    loom.connect(&summarizer, &planner, YarnType::Data)?;
    loom.connect(&planner, &notion, YarnType::Data)?;
    loom.connect(&planner, &verifier, YarnType::Data)?;
    Ok(loom)
}
