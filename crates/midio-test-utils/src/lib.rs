//! Behaviors and builders shared by the Midio test suites.

use serde_json::{json, Value};

use midio_canvas::{Behavior, BehaviorRegistry, Node, NodeKind, NodeState};
use midio_core::error::{MidioError, Result};

/// Doubles a numeric input. Integers stay integers.
pub struct Doubler;

impl Behavior for Doubler {
    fn handler(&self) -> &str {
        "doubler"
    }

    fn execute(&mut self, input: Value, _state: &mut NodeState) -> Result<Value> {
        if let Some(n) = input.as_i64() {
            return Ok(json!(n * 2));
        }
        input
            .as_f64()
            .map(|n| json!(n * 2.0))
            .ok_or_else(|| MidioError::behavior(format!("doubler expects a number, got {}", input)))
    }
}

/// Remembers the last value it saw under the `recorded` memory key and
/// returns `{"recorded": value}`.
pub struct Recorder;

impl Behavior for Recorder {
    fn handler(&self) -> &str {
        "recorder"
    }

    fn execute(&mut self, input: Value, state: &mut NodeState) -> Result<Value> {
        state.memory.set("recorded", input.clone());
        Ok(json!({ "recorded": input }))
    }
}

/// Always fails with the configured message.
pub struct Failing(pub String);

impl Behavior for Failing {
    fn handler(&self) -> &str {
        "failing"
    }

    fn config(&self) -> Value {
        json!({ "message": self.0 })
    }

    fn execute(&mut self, _input: Value, _state: &mut NodeState) -> Result<Value> {
        Err(MidioError::behavior(self.0.clone()))
    }
}

/// Passes its input through and reports a fixed drift score.
pub struct FixedDrift(pub f64);

impl Behavior for FixedDrift {
    fn handler(&self) -> &str {
        "fixed_drift"
    }

    fn config(&self) -> Value {
        json!({ "score": self.0 })
    }

    fn execute(&mut self, input: Value, state: &mut NodeState) -> Result<Value> {
        state.health.drift_score = self.0;
        Ok(input)
    }
}

/// Ignores its input and returns the same value every time.
pub struct Constant(pub Value);

impl Behavior for Constant {
    fn handler(&self) -> &str {
        "constant"
    }

    fn config(&self) -> Value {
        json!({ "value": self.0 })
    }

    fn execute(&mut self, _input: Value, _state: &mut NodeState) -> Result<Value> {
        Ok(self.0.clone())
    }
}

pub fn node(name: &str, kind: NodeKind, behavior: impl Behavior + 'static) -> Node {
    Node::with_behavior(name, kind, Box::new(behavior))
}

pub fn failing(name: &str, kind: NodeKind) -> Node {
    node(name, kind, Failing(format!("{} exploded", name)))
}

/// A node whose drift score is already set, without running it.
pub fn drifted(name: &str, score: f64) -> Node {
    let mut n = Node::new(name, NodeKind::Guard);
    n.state.health.drift_score = score;
    n
}

/// Registry containing every behavior in this crate.
pub fn registry() -> BehaviorRegistry {
    let mut registry = BehaviorRegistry::new();
    registry.register("doubler", |_| Ok(Box::new(Doubler)));
    registry.register("recorder", |_| Ok(Box::new(Recorder)));
    registry.register("failing", |config| {
        let message = config
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("failed")
            .to_string();
        Ok(Box::new(Failing(message)))
    });
    registry.register("fixed_drift", |config| {
        let score = config.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0);
        Ok(Box::new(FixedDrift(score)))
    });
    registry.register("constant", |config| {
        Ok(Box::new(Constant(config.get("value").cloned().unwrap_or(Value::Null))))
    });
    registry
}
