//! Topology derivation and scheduling.
//!
//! Tie-break: nodes become ready in loom insertion order, and a node's
//! successors are released in the order its yarn was created. The same
//! loom therefore always yields the same order.

use std::collections::{HashMap, HashSet, VecDeque};

use midio_canvas::{Node, NodeId};
use midio_core::error::{MidioError, Result};

/// Node id → downstream node ids, in insertion order. Yarn whose target is
/// not in the loom is left out. Parallel yarn yields repeated entries.
pub type Adjacency = Vec<(NodeId, Vec<NodeId>)>;

pub fn adjacency<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> Adjacency {
    let nodes: Vec<&Node> = nodes.into_iter().collect();
    let present: HashSet<&NodeId> = nodes.iter().map(|n| &n.id).collect();

    nodes
        .iter()
        .map(|node| {
            let targets = node
                .connections
                .iter()
                .filter(|y| present.contains(&y.target))
                .map(|y| y.target.clone())
                .collect();
            (node.id.clone(), targets)
        })
        .collect()
}

/// Compute a total execution order via in-degree elimination.
///
/// Fails with `CycleDetected` if any node cannot be placed.
pub fn execution_order(adjacency: &Adjacency) -> Result<Vec<NodeId>> {
    let mut in_degree: HashMap<&NodeId, usize> =
        adjacency.iter().map(|(id, _)| (id, 0)).collect();
    for (_, targets) in adjacency {
        for target in targets {
            if let Some(deg) = in_degree.get_mut(target) {
                *deg += 1;
            }
        }
    }

    let successors: HashMap<&NodeId, &Vec<NodeId>> =
        adjacency.iter().map(|(id, targets)| (id, targets)).collect();

    let mut queue: VecDeque<&NodeId> = adjacency
        .iter()
        .filter(|(id, _)| in_degree.get(id).copied() == Some(0))
        .map(|(id, _)| id)
        .collect();

    let mut order = Vec::with_capacity(adjacency.len());
    while let Some(id) = queue.pop_front() {
        order.push(id.clone());
        let Some(targets) = successors.get(id) else {
            continue;
        };
        for target in targets.iter() {
            if let Some(deg) = in_degree.get_mut(target) {
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(target);
                }
            }
        }
    }

    if order.len() != adjacency.len() {
        return Err(MidioError::CycleDetected {
            placed: order.len(),
            total: adjacency.len(),
        });
    }

    Ok(order)
}

/// Group nodes by depth. Every node in a layer depends only on nodes in
/// earlier layers, so a layer's members could run side by side.
///
/// Layer members keep the same tie-break as [`execution_order`]; reading
/// the layers front to back yields a valid execution order.
pub fn layers(adjacency: &Adjacency) -> Result<Vec<Vec<NodeId>>> {
    let mut in_degree: HashMap<&NodeId, usize> =
        adjacency.iter().map(|(id, _)| (id, 0)).collect();
    for (_, targets) in adjacency {
        for target in targets {
            if let Some(deg) = in_degree.get_mut(target) {
                *deg += 1;
            }
        }
    }

    let successors: HashMap<&NodeId, &Vec<NodeId>> =
        adjacency.iter().map(|(id, targets)| (id, targets)).collect();

    let mut current: Vec<&NodeId> = adjacency
        .iter()
        .filter(|(id, _)| in_degree.get(id).copied() == Some(0))
        .map(|(id, _)| id)
        .collect();

    let mut layers = Vec::new();
    let mut placed = 0;
    while !current.is_empty() {
        placed += current.len();
        let mut next = Vec::new();
        for id in &current {
            let Some(targets) = successors.get(id) else {
                continue;
            };
            for target in targets.iter() {
                if let Some(deg) = in_degree.get_mut(target) {
                    *deg -= 1;
                    if *deg == 0 {
                        next.push(target);
                    }
                }
            }
        }
        layers.push(current.into_iter().cloned().collect());
        current = next;
    }

    if placed != adjacency.len() {
        return Err(MidioError::CycleDetected {
            placed,
            total: adjacency.len(),
        });
    }

    Ok(layers)
}
