use std::collections::{HashMap, HashSet};

use tracing::{info, warn};

use midio_canvas::NodeId;
use midio_loom::Loom;

use crate::format::{AuthRequirement, Disc, DiscMetadata, Track, TrackLink};

/// Toolkit named by a `toolkit.action` handler, if any.
///
/// ```
/// assert_eq!(midio_codec::toolkit_for("gmail.fetch_emails"), Some("gmail"));
/// assert_eq!(midio_codec::toolkit_for("passthrough"), None);
/// ```
pub fn toolkit_for(handler: &str) -> Option<&str> {
    match handler.split_once('.') {
        Some((toolkit, action)) if !toolkit.is_empty() && !action.is_empty() => Some(toolkit),
        _ => None,
    }
}

/// Burn a loom into a disc.
///
/// Tracks follow node insertion order and links follow yarn creation order.
/// Yarn pointing at nodes no longer in the loom is not written.
pub fn burn(loom: &Loom, metadata: DiscMetadata) -> Disc {
    let names: HashMap<&NodeId, &str> = loom.nodes().map(|n| (&n.id, n.name.as_str())).collect();

    let mut seen = HashSet::new();
    for node in loom.nodes() {
        if !seen.insert(node.name.as_str()) {
            warn!(loom = %loom.name(), node = %node.name, "Duplicate node name; disc will not validate");
        }
    }

    let mut upstream: HashMap<&NodeId, Vec<String>> = HashMap::new();
    for node in loom.nodes() {
        for yarn in &node.connections {
            if names.contains_key(&yarn.target) {
                upstream
                    .entry(&yarn.target)
                    .or_default()
                    .push(node.name.clone());
            }
        }
    }

    let tracks: Vec<Track> = loom
        .nodes()
        .map(|node| {
            let behavior = node.behavior();
            let handler = behavior.handler().to_string();
            let auth = toolkit_for(&handler)
                .map(|toolkit| {
                    let mut req = AuthRequirement::new(toolkit);
                    req.reason = format!("Required by {}", node.name);
                    vec![req]
                })
                .unwrap_or_default();

            let outputs_to = node
                .connections
                .iter()
                .filter_map(|yarn| {
                    let target = names.get(&yarn.target)?;
                    let mut link = TrackLink::new(*target, yarn.yarn_type);
                    link.metadata = yarn.metadata.clone();
                    Some(link)
                })
                .collect();

            Track {
                name: node.name.clone(),
                kind: node.kind,
                handler,
                config: behavior.config(),
                inputs_from: upstream.remove(&node.id).unwrap_or_default(),
                outputs_to,
                auth,
                description: String::new(),
                tags: Vec::new(),
            }
        })
        .collect();

    info!(loom = %loom.name(), disc = %metadata.name, tracks = tracks.len(), "Burned disc");
    Disc {
        format_version: crate::format::FORMAT_VERSION.to_string(),
        metadata,
        tracks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use midio_canvas::{Node, NodeKind, YarnType};
    use midio_test_utils::{node, Doubler};

    fn sample() -> Loom {
        let mut loom = Loom::new("sample");
        let a = loom.add_node(Node::new("fetch", NodeKind::Source)).unwrap();
        let b = loom
            .add_node(node("double", NodeKind::Transform, Doubler))
            .unwrap();
        let c = loom.add_node(Node::new("log", NodeKind::Action)).unwrap();
        loom.connect(&a, &b, YarnType::Data).unwrap();
        loom.connect(&b, &c, YarnType::Signal).unwrap();
        loom.connect(&a, &c, YarnType::State).unwrap();
        loom
    }

    #[test]
    fn test_toolkit_for() {
        assert_eq!(toolkit_for("notion.create_page"), Some("notion"));
        assert_eq!(toolkit_for("doubler"), None);
        assert_eq!(toolkit_for(".x"), None);
        assert_eq!(toolkit_for("x."), None);
    }

    #[test]
    fn test_burn_preserves_names_and_wiring() {
        let loom = sample();
        let disc = burn(&loom, DiscMetadata::new("sample"));

        let names: Vec<&str> = disc.tracks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["fetch", "double", "log"]);

        let fetch = &disc.tracks[0];
        assert_eq!(fetch.kind, NodeKind::Source);
        assert_eq!(fetch.handler, "passthrough");
        assert_eq!(
            fetch.outputs_to,
            vec![
                TrackLink::new("double", YarnType::Data),
                TrackLink::new("log", YarnType::State),
            ]
        );
        assert_eq!(disc.tracks[1].handler, "doubler");
        assert_eq!(disc.tracks[1].outputs_to[0].yarn_type, YarnType::Signal);
        assert_eq!(disc.tracks[2].inputs_from, vec!["fetch", "double"]);
        assert!(disc.validate().is_empty());
    }

    #[test]
    fn test_burn_skips_dangling_yarn() {
        let mut loom = sample();
        let log = loom.find_by_name("log").unwrap().id.clone();
        let fetch = loom.find_by_name("fetch").unwrap().id.clone();
        loom.node_mut(&fetch)
            .unwrap()
            .connect_id(NodeId::from("ghost"), YarnType::Data);
        loom.remove_node(&log);

        let disc = burn(&loom, DiscMetadata::new("sample"));
        assert_eq!(disc.tracks.len(), 2);
        let targets: Vec<&str> = disc.tracks[0]
            .outputs_to
            .iter()
            .map(|l| l.target.as_str())
            .collect();
        assert_eq!(targets, vec!["double"]);
        assert!(disc.validate().is_empty());
    }

    #[test]
    fn test_burn_derives_auth_from_handler() {
        struct Fetch;
        impl midio_canvas::Behavior for Fetch {
            fn handler(&self) -> &str {
                "gmail.fetch_emails"
            }
            fn execute(
                &mut self,
                input: serde_json::Value,
                _state: &mut midio_canvas::NodeState,
            ) -> midio_core::Result<serde_json::Value> {
                Ok(input)
            }
        }

        let mut loom = Loom::new("auth");
        loom.add_node(node("inbox", NodeKind::Source, Fetch)).unwrap();
        let disc = burn(&loom, DiscMetadata::new("auth"));
        let manifest = disc.auth_manifest();
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest[0].toolkit, "gmail");
        assert_eq!(manifest[0].reason, "Required by inbox");
    }
}
