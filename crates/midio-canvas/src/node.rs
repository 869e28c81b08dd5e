use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use midio_core::error::Result;

use crate::behavior::{Behavior, NodeState, Passthrough};
use crate::yarn::{Yarn, YarnType};

/// Process-unique node identifier. Not stable across serialization;
/// use the node name for that.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The closed set of node kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Data ingress.
    Source,
    /// Pure transformation of its input.
    #[default]
    Transform,
    /// Side effect.
    Action,
    /// Check whose failure interrupts the whole pass.
    Guard,
    /// Flow control.
    Control,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Transform => "transform",
            Self::Action => "action",
            Self::Guard => "guard",
            Self::Control => "control",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Idle,
    Ok,
    Error,
}

/// Health telemetry for a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeHealth {
    pub status: NodeStatus,
    pub executions: u64,
    pub errors: u64,
    /// Set by behaviors that measure degradation; conventionally in [0, 1].
    pub drift_score: f64,
}

/// Per-node state that survives across passes of the same loom.
///
/// Values are JSON; behaviors read and write them through the typed
/// accessors so each behavior owns the schema of its own keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMemory {
    entries: BTreeMap<String, serde_json::Value>,
}

impl NodeMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.entries.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(|v| v.as_str())
    }

    /// Decode a stored value. Returns `None` if missing or of the wrong shape.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.entries
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn set_as<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.entries.insert(key.into(), value);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A unit of work in a loom.
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    pub state: NodeState,
    /// Outgoing yarn, in creation order.
    pub connections: Vec<Yarn>,
    behavior: Box<dyn Behavior>,
}

impl Node {
    /// Create a node with the default passthrough behavior.
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self::with_behavior(name, kind, Box::new(Passthrough))
    }

    pub fn with_behavior(
        name: impl Into<String>,
        kind: NodeKind,
        behavior: Box<dyn Behavior>,
    ) -> Self {
        Self {
            id: NodeId::new(),
            name: name.into(),
            kind,
            state: NodeState::default(),
            connections: Vec::new(),
            behavior,
        }
    }

    pub fn health(&self) -> &NodeHealth {
        &self.state.health
    }

    pub fn memory(&self) -> &NodeMemory {
        &self.state.memory
    }

    pub fn behavior(&self) -> &dyn Behavior {
        self.behavior.as_ref()
    }

    /// Invoke the behavior hook. Counts the execution whether or not the
    /// behavior succeeds.
    pub fn execute(&mut self, input: serde_json::Value) -> Result<serde_json::Value> {
        self.state.health.executions += 1;
        self.behavior.execute(input, &mut self.state)
    }

    /// Append a new yarn to `target`. Parallel yarn is allowed.
    pub fn connect(&mut self, target: &Node, yarn_type: YarnType) -> &Yarn {
        self.connect_id(target.id.clone(), yarn_type)
    }

    /// Same as [`Node::connect`] when only the target id is at hand.
    pub fn connect_id(&mut self, target: NodeId, yarn_type: YarnType) -> &Yarn {
        let yarn = Yarn::new(self.id.clone(), target, yarn_type);
        self.connections.push(yarn);
        &self.connections[self.connections.len() - 1]
    }

    /// Drop every outgoing yarn that points at `target`. Returns how many went.
    pub fn disconnect_target(&mut self, target: &NodeId) -> usize {
        let before = self.connections.len();
        self.connections.retain(|y| &y.target != target);
        before - self.connections.len()
    }

    pub fn mark_ok(&mut self) {
        self.state.health.status = NodeStatus::Ok;
    }

    pub fn mark_failed(&mut self) {
        self.state.health.errors += 1;
        self.state.health.status = NodeStatus::Error;
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("handler", &self.behavior.handler())
            .field("health", &self.state.health)
            .field("connections", &self.connections.len())
            .finish()
    }
}
