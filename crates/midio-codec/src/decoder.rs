use std::collections::HashMap;

use tracing::{info, warn};

use midio_canvas::{Behavior, BehaviorRegistry, Node, NodeId, Passthrough};
use midio_core::config::LoomConfig;
use midio_core::error::{MidioError, Result};
use midio_loom::Loom;

use crate::format::{Disc, Track};

/// How forgiving a load is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadMode {
    /// Validate first; any dangling reference or unknown handler is fatal.
    #[default]
    Strict,
    /// Drop dangling references and fall back to passthrough for unknown
    /// handlers.
    Lenient,
}

impl LoadMode {
    pub fn from_strict(strict: bool) -> Self {
        if strict {
            Self::Strict
        } else {
            Self::Lenient
        }
    }
}

/// Hydrate a disc into a fresh loom named after the disc.
pub fn load(disc: &Disc, registry: &BehaviorRegistry, mode: LoadMode) -> Result<Loom> {
    load_with(disc, registry, mode, &LoomConfig::default())
}

/// Same as [`load`], with the loom built from `config`.
pub fn load_with(
    disc: &Disc,
    registry: &BehaviorRegistry,
    mode: LoadMode,
    config: &LoomConfig,
) -> Result<Loom> {
    if mode == LoadMode::Strict {
        let issues = disc.validate();
        if !issues.is_empty() {
            return Err(MidioError::InvalidDisc {
                name: disc.metadata.name.clone(),
                issues,
            });
        }
    }

    let mut loom = Loom::from_config(disc.metadata.name.clone(), config);

    let mut by_name: HashMap<&str, NodeId> = HashMap::new();
    for track in &disc.tracks {
        let behavior = hydrate_behavior(track, registry, mode)?;
        let id = loom.add_node(Node::with_behavior(
            track.name.clone(),
            track.kind,
            behavior,
        ))?;
        if by_name.contains_key(track.name.as_str()) {
            warn!(track = %track.name, "Duplicate track name; links resolve to the first");
            continue;
        }
        by_name.insert(track.name.as_str(), id);
    }

    // Wire in a second pass so forward references resolve.
    for (track, source) in disc.tracks.iter().zip(loom_ids(&loom)) {
        for link in &track.outputs_to {
            let Some(target) = by_name.get(link.target.as_str()) else {
                if mode == LoadMode::Strict {
                    return Err(MidioError::DanglingReference {
                        track: track.name.clone(),
                        target: link.target.clone(),
                    });
                }
                warn!(track = %track.name, target = %link.target, "Dropping dangling reference");
                continue;
            };
            loom.connect(&source, target, link.yarn_type)?;
            if !link.metadata.is_empty() {
                if let Some(yarn) = loom
                    .node_mut(&source)
                    .and_then(|n| n.connections.last_mut())
                {
                    yarn.metadata = link.metadata.clone();
                }
            }
        }
    }

    info!(
        disc = %disc.metadata.name,
        tracks = disc.tracks.len(),
        mode = ?mode,
        "Loaded disc"
    );
    Ok(loom)
}

fn loom_ids(loom: &Loom) -> Vec<NodeId> {
    loom.nodes().map(|n| n.id.clone()).collect()
}

fn hydrate_behavior(
    track: &Track,
    registry: &BehaviorRegistry,
    mode: LoadMode,
) -> Result<Box<dyn Behavior>> {
    if track.handler.is_empty() {
        return Ok(Box::new(Passthrough));
    }
    if !registry.contains(&track.handler) && mode == LoadMode::Lenient {
        warn!(
            track = %track.name,
            handler = %track.handler,
            "Unknown handler, falling back to passthrough"
        );
        return Ok(Box::new(Passthrough));
    }
    registry.build(&track.handler, &track.config)
}
