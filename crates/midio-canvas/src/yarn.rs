use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::node::NodeId;

/// The kind of signal a yarn carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum YarnType {
    #[default]
    Data,
    Signal,
    State,
    Guard,
}

impl YarnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Signal => "signal",
            Self::State => "state",
            Self::Guard => "guard",
        }
    }
}

/// A directed, typed edge. Owned by its source node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Yarn {
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default)]
    pub yarn_type: YarnType,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Yarn {
    pub fn new(source: NodeId, target: NodeId, yarn_type: YarnType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source,
            target,
            yarn_type,
            metadata: serde_json::Map::new(),
        }
    }

    /// Attach a metadata entry (builder style).
    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yarn_type_serde_lowercase() {
        let json = serde_json::to_string(&YarnType::Signal).unwrap();
        assert_eq!(json, "\"signal\"");
        let parsed: YarnType = serde_json::from_str("\"guard\"").unwrap();
        assert_eq!(parsed, YarnType::Guard);
    }

    #[test]
    fn test_yarn_ids_are_unique() {
        let a = NodeId::new();
        let b = NodeId::new();
        let y1 = Yarn::new(a.clone(), b.clone(), YarnType::Data);
        let y2 = Yarn::new(a, b, YarnType::Data);
        assert_ne!(y1.id, y2.id);
    }

    #[test]
    fn test_with_meta() {
        let y = Yarn::new(NodeId::new(), NodeId::new(), YarnType::State)
            .with_meta("label", serde_json::json!("plan"));
        assert_eq!(y.metadata.get("label"), Some(&serde_json::json!("plan")));
    }
}
