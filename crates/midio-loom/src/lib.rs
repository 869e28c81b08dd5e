//! # Loom
//!
//! The execution engine. A `Loom` owns a set of nodes, orders them with
//! Kahn's algorithm and weaves them one at a time, feeding each node
//! either an explicit input or the outputs of its upstream nodes.
//!
//! Structural mutation and weaving both take `&mut Loom`, so a pass can
//! never overlap with an add, remove or connect on the same loom.

pub mod log;
pub mod runtime;
pub mod topology;

pub use log::{ExecutionLog, LogEntry, LogEvent};
pub use runtime::{Loom, WeaveOutcome};
pub use topology::Adjacency;
