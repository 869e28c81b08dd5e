use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MidioError, Result};

/// Top-level Midio configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub loom: LoomConfig,
    #[serde(default)]
    pub molt: MoltConfig,
    #[serde(default)]
    pub codec: CodecConfig,
}

/// Execution engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoomConfig {
    /// Cap on retained execution log entries. Unset keeps every entry.
    #[serde(default)]
    pub max_log_entries: Option<usize>,
    /// How many trailing log entries the CLI and bridge report after a weave.
    #[serde(default = "default_log_tail")]
    pub log_tail: usize,
}

impl Default for LoomConfig {
    fn default() -> Self {
        Self {
            max_log_entries: None,
            log_tail: default_log_tail(),
        }
    }
}

fn default_log_tail() -> usize { 5 }

/// Drift evaluator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoltConfig {
    /// Scores at or above this value mark a node as degraded.
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold: f64,
}

impl Default for MoltConfig {
    fn default() -> Self {
        Self {
            drift_threshold: default_drift_threshold(),
        }
    }
}

fn default_drift_threshold() -> f64 { 0.5 }

/// Disc interchange settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Reject discs with dangling references instead of dropping them.
    #[serde(default = "default_strict")]
    pub strict: bool,
    /// Directory holding `.disc` files.
    #[serde(default = "default_library_dir")]
    pub library_dir: String,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            strict: default_strict(),
            library_dir: default_library_dir(),
        }
    }
}

fn default_strict() -> bool { true }

fn default_library_dir() -> String {
    "~/.midio/library".to_string()
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| MidioError::ConfigNotFound(path.display().to_string()))?;

        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| MidioError::Config(e.to_string()))
    }

    /// Resolve the disc library directory (expand ~).
    pub fn library_dir(&self) -> PathBuf {
        expand_home(&self.codec.library_dir)
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Unset variables stay as written
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

pub fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_MIDIO_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_MIDIO_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_MIDIO_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_MIDIO_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_MIDIO_VAR}\"");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.loom.max_log_entries, None);
        assert_eq!(config.loom.log_tail, 5);
        assert_eq!(config.molt.drift_threshold, 0.5);
        assert!(config.codec.strict);
        assert_eq!(config.codec.library_dir, "~/.midio/library");
    }

    #[test]
    fn test_partial_sections() {
        let toml_str = r#"
[loom]
max_log_entries = 100

[codec]
strict = false
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.loom.max_log_entries, Some(100));
        assert_eq!(config.loom.log_tail, 5);
        assert!(!config.codec.strict);
        assert_eq!(config.molt.drift_threshold, 0.5);
    }

    #[test]
    fn test_expand_home_passthrough() {
        assert_eq!(expand_home("/var/discs"), PathBuf::from("/var/discs"));
    }
}
