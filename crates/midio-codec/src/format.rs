use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use midio_canvas::{NodeKind, YarnType};
use midio_core::error::{MidioError, Result};

pub const FORMAT_VERSION: &str = "0.1.0";

/// Declares that a track needs an external connection to run.
/// Only the requirement is recorded, never the credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthRequirement {
    pub toolkit: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub optional: bool,
}

impl AuthRequirement {
    pub fn new(toolkit: impl Into<String>) -> Self {
        Self {
            toolkit: toolkit.into(),
            reason: String::new(),
            scopes: Vec::new(),
            optional: false,
        }
    }
}

/// One outgoing yarn, by target name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackLink {
    pub target: String,
    #[serde(default)]
    pub yarn_type: YarnType,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Value>,
}

impl TrackLink {
    pub fn new(target: impl Into<String>, yarn_type: YarnType) -> Self {
        Self {
            target: target.into(),
            yarn_type,
            metadata: serde_json::Map::new(),
        }
    }
}

/// A single node on a disc, with its wiring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub name: String,
    pub kind: NodeKind,
    /// Behavior handler name. Empty means passthrough.
    #[serde(default)]
    pub handler: String,
    #[serde(default)]
    pub config: Value,
    /// Names of tracks feeding this one. Informational; wiring comes from
    /// `outputs_to`.
    #[serde(default)]
    pub inputs_from: Vec<String>,
    #[serde(default)]
    pub outputs_to: Vec<TrackLink>,
    #[serde(default)]
    pub auth: Vec<AuthRequirement>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Track {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            handler: String::new(),
            config: Value::Null,
            inputs_from: Vec::new(),
            outputs_to: Vec::new(),
            auth: Vec::new(),
            description: String::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_handler(mut self, handler: impl Into<String>) -> Self {
        self.handler = handler.into();
        self
    }

    pub fn with_output(mut self, target: impl Into<String>, yarn_type: YarnType) -> Self {
        self.outputs_to.push(TrackLink::new(target, yarn_type));
        self
    }

    pub fn with_input(mut self, source: impl Into<String>) -> Self {
        self.inputs_from.push(source.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscMetadata {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_license")]
    pub license: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

fn default_license() -> String {
    "MIT".to_string()
}

impl DiscMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            author: String::new(),
            description: String::new(),
            license: default_license(),
            created_at: Utc::now(),
            tags: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// A portable loom description.
///
/// On the wire the disc also carries a checksum, a deduplicated auth
/// manifest and a by-name topology. Those are derived from the tracks and
/// are recomputed rather than trusted on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disc {
    #[serde(default = "default_format_version")]
    pub format_version: String,
    pub metadata: DiscMetadata,
    #[serde(default)]
    pub tracks: Vec<Track>,
}

fn default_format_version() -> String {
    FORMAT_VERSION.to_string()
}

impl Disc {
    pub fn new(metadata: DiscMetadata) -> Self {
        Self {
            format_version: default_format_version(),
            metadata,
            tracks: Vec::new(),
        }
    }

    pub fn with_track(mut self, track: Track) -> Self {
        self.tracks.push(track);
        self
    }

    /// Auth requirements across all tracks, first occurrence per toolkit.
    pub fn auth_manifest(&self) -> Vec<&AuthRequirement> {
        let mut seen = HashSet::new();
        self.tracks
            .iter()
            .flat_map(|t| t.auth.iter())
            .filter(|a| seen.insert(a.toolkit.as_str()))
            .collect()
    }

    /// Track name → downstream track names. Unknown targets are left out.
    pub fn topology(&self) -> HashMap<String, Vec<String>> {
        let names: HashSet<&str> = self.tracks.iter().map(|t| t.name.as_str()).collect();
        self.tracks
            .iter()
            .map(|t| {
                let targets = t
                    .outputs_to
                    .iter()
                    .filter(|l| names.contains(l.target.as_str()))
                    .map(|l| l.target.clone())
                    .collect();
                (t.name.clone(), targets)
            })
            .collect()
    }

    /// First 16 hex digits of the SHA-256 of the disc content.
    pub fn checksum(&self) -> Result<String> {
        let content = serde_json::to_vec(self)?;
        let digest = Sha256::digest(&content);
        let hex = format!("{:x}", digest);
        Ok(hex[..16].to_string())
    }

    /// Problems that make the disc unsafe to load. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.metadata.name.is_empty() {
            issues.push("Disc has no name".to_string());
        }
        if self.tracks.is_empty() {
            issues.push("Disc has no tracks".to_string());
        }

        let names: HashSet<&str> = self.tracks.iter().map(|t| t.name.as_str()).collect();
        for track in &self.tracks {
            let refs = track
                .inputs_from
                .iter()
                .chain(track.outputs_to.iter().map(|l| &l.target));
            for r in refs {
                if !names.contains(r.as_str()) {
                    issues.push(format!(
                        "Track '{}' references unknown track '{}'",
                        track.name, r
                    ));
                }
            }
        }

        if names.len() != self.tracks.len() {
            issues.push("Disc contains duplicate track names".to_string());
        }
        issues
    }

    /// Serialize with the derived fields attached.
    pub fn to_json(&self) -> Result<String> {
        let mut doc = serde_json::to_value(self)?;
        if let Value::Object(ref mut map) = doc {
            map.insert("checksum".into(), Value::String(self.checksum()?));
            map.insert(
                "auth_manifest".into(),
                serde_json::to_value(self.auth_manifest())?,
            );
            map.insert("topology".into(), serde_json::to_value(self.topology())?);
        }
        Ok(serde_json::to_string_pretty(&doc)?)
    }

    /// Parse a disc. A checksum present in the document must match.
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: Value = serde_json::from_str(json)?;
        let expected = doc
            .get("checksum")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let disc: Disc = serde_json::from_value(doc)?;

        if let Some(expected) = expected {
            let actual = disc.checksum()?;
            if expected != actual {
                return Err(MidioError::ChecksumMismatch { expected, actual });
            }
        }
        Ok(disc)
    }

    /// Human-readable summary, like the back of a CD case.
    pub fn preview(&self) -> String {
        let meta = &self.metadata;
        let mut lines = vec![format!("{} v{}", meta.name, meta.version)];
        lines.push(format!(
            "   by {}",
            if meta.author.is_empty() { "unknown" } else { meta.author.as_str() }
        ));
        if !meta.description.is_empty() {
            lines.push(format!("   {}", meta.description));
        }

        lines.push(String::new());
        lines.push(format!("   Tracks ({}):", self.tracks.len()));
        for (i, track) in self.tracks.iter().enumerate() {
            let handler = if track.handler.is_empty() {
                String::new()
            } else {
                format!(" [{}]", track.handler)
            };
            lines.push(format!("   {:2}. {} ({}){}", i + 1, track.name, track.kind, handler));
        }

        let auth = self.auth_manifest();
        if !auth.is_empty() {
            lines.push(String::new());
            lines.push(format!("   Auth required ({}):", auth.len()));
            for a in auth {
                let opt = if a.optional { " (optional)" } else { "" };
                lines.push(format!("     - {}{}", a.toolkit, opt));
            }
        }

        let topo = self.topology();
        let wired = topo.values().filter(|t| !t.is_empty()).count();
        lines.push(String::new());
        lines.push(format!(
            "   Wiring: {}/{} tracks have downstream connections",
            wired,
            topo.len()
        ));
        if let Ok(checksum) = self.checksum() {
            lines.push(format!("   Checksum: {}", checksum));
        }
        lines.join("\n")
    }
}
