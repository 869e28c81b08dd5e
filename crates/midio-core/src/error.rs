use thiserror::Error;

#[derive(Debug, Error)]
pub enum MidioError {
    // Structural errors
    #[error("cycle detected in loom topology ({placed} of {total} nodes ordered); consider a molt")]
    CycleDetected { placed: usize, total: usize },

    // Graph errors
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    // Behavior errors
    #[error("Behavior failed: {0}")]
    Behavior(String),

    #[error("Unknown behavior handler: {0}")]
    UnknownHandler(String),

    // Interchange errors
    #[error("Disc '{name}' has {} issue(s): {}", .issues.len(), .issues.join("; "))]
    InvalidDisc { name: String, issues: Vec<String> },

    #[error("Track '{track}' references missing target '{target}'")]
    DanglingReference { track: String, target: String },

    #[error("Disc checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    // Library errors
    #[error("Disc not found in library: {0}")]
    DiscNotFound(String),

    #[error("Disc already exists in library: {0} (use overwrite)")]
    DiscExists(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MidioError {
    /// Shorthand used by behaviors to signal a failed execution.
    pub fn behavior(message: impl Into<String>) -> Self {
        Self::Behavior(message.into())
    }
}

pub type Result<T> = std::result::Result<T, MidioError>;
