use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use midio_canvas::{NodeId, NodeStatus};

/// What happened at one step of a weave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEvent {
    Executed {
        node: String,
        node_id: NodeId,
        status: NodeStatus,
        #[serde(default)]
        duration_ms: u64,
    },
    Error {
        node: String,
        node_id: NodeId,
        error: String,
        #[serde(default)]
        duration_ms: u64,
    },
    /// The pass stopped before running `at_node`.
    MoltInterrupt { node: String, at_node: NodeId },
}

impl LogEvent {
    pub fn node_id(&self) -> &NodeId {
        match self {
            Self::Executed { node_id, .. } | Self::Error { node_id, .. } => node_id,
            Self::MoltInterrupt { at_node, .. } => at_node,
        }
    }

    /// Wall-clock time spent in the node's behavior, if it ran.
    pub fn duration_ms(&self) -> Option<u64> {
        match self {
            Self::Executed { duration_ms, .. } | Self::Error { duration_ms, .. } => {
                Some(*duration_ms)
            }
            Self::MoltInterrupt { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Executed { .. } => "executed",
            Self::Error { .. } => "error",
            Self::MoltInterrupt { .. } => "molt_interrupt",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: LogEvent,
}

/// Append-only record of every weave on a loom.
///
/// Entries accumulate across passes. With a limit set, the oldest entries
/// are discarded once it is exceeded.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    entries: VecDeque<LogEntry>,
    max_entries: Option<usize>,
    dropped: u64,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(max_entries: Option<usize>) -> Self {
        Self {
            max_entries,
            ..Self::default()
        }
    }

    pub fn push(&mut self, event: LogEvent) {
        self.entries.push_back(LogEntry {
            timestamp: Utc::now(),
            event,
        });
        if let Some(max) = self.max_entries {
            while self.entries.len() > max {
                self.entries.pop_front();
                self.dropped += 1;
            }
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn events(&self) -> impl Iterator<Item = &LogEvent> {
        self.entries.iter().map(|e| &e.event)
    }

    /// The last `n` entries, oldest first.
    pub fn tail(&self, n: usize) -> Vec<LogEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries discarded because of the limit.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
