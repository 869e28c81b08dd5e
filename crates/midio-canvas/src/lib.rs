//! Graph primitives for Midio.
//!
//! A loom is built from `Node`s joined by directed, typed `Yarn`. Each node
//! carries a `Behavior`, the single hook the engine invokes; everything
//! else on a node is passive state (health, memory, outgoing yarn).

pub mod behavior;
pub mod node;
pub mod yarn;

pub use behavior::{Behavior, BehaviorFactory, BehaviorRegistry, NodeState, Passthrough};
pub use node::{Node, NodeHealth, NodeId, NodeKind, NodeMemory, NodeStatus};
pub use yarn::{Yarn, YarnType};
