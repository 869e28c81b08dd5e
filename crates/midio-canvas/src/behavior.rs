use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use midio_core::error::{MidioError, Result};

use crate::node::{NodeHealth, NodeMemory};

/// The mutable state a behavior may touch while it runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeState {
    pub health: NodeHealth,
    pub memory: NodeMemory,
}

/// What a node computes.
///
/// The engine only ever calls `execute`; it never looks at what a
/// behavior does. `handler` and `config` let a disc name the behavior so
/// it can be rebuilt through a [`BehaviorRegistry`].
pub trait Behavior: Send {
    /// Registry name of this behavior.
    fn handler(&self) -> &str;

    /// Configuration needed to rebuild this behavior.
    fn config(&self) -> Value {
        Value::Null
    }

    fn execute(&mut self, input: Value, state: &mut NodeState) -> Result<Value>;
}

/// Returns its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Behavior for Passthrough {
    fn handler(&self) -> &str {
        "passthrough"
    }

    fn execute(&mut self, input: Value, _state: &mut NodeState) -> Result<Value> {
        Ok(input)
    }
}

pub type BehaviorFactory = Arc<dyn Fn(&Value) -> Result<Box<dyn Behavior>> + Send + Sync>;

/// Maps handler names to behavior factories.
pub struct BehaviorRegistry {
    factories: HashMap<String, BehaviorFactory>,
}

impl BehaviorRegistry {
    /// A registry with only `passthrough`.
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("passthrough", |_| Ok(Box::new(Passthrough)));
        registry
    }

    pub fn register<F>(&mut self, handler: impl Into<String>, factory: F)
    where
        F: Fn(&Value) -> Result<Box<dyn Behavior>> + Send + Sync + 'static,
    {
        let handler = handler.into();
        debug!(handler = %handler, "Registered behavior");
        self.factories.insert(handler, Arc::new(factory));
    }

    pub fn contains(&self, handler: &str) -> bool {
        self.factories.contains_key(handler)
    }

    /// Build a behavior by handler name.
    pub fn build(&self, handler: &str, config: &Value) -> Result<Box<dyn Behavior>> {
        let factory = self
            .factories
            .get(handler)
            .ok_or_else(|| MidioError::UnknownHandler(handler.to_string()))?;
        factory(config)
    }

    /// Registered handler names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for BehaviorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
