use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use midio_canvas::{Node, NodeId, NodeKind, YarnType};
use midio_core::config::LoomConfig;
use midio_core::error::{MidioError, Result};

use crate::log::{ExecutionLog, LogEntry, LogEvent};
use crate::topology;

/// What one weave produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WeaveOutcome {
    /// Output per node that ran. `None` marks a node whose behavior failed.
    /// Nodes never reached have no entry.
    pub results: HashMap<NodeId, Option<Value>>,
    /// The full computed execution order.
    pub order: Vec<NodeId>,
    /// Nodes actually invoked, in order.
    pub executed: Vec<NodeId>,
    /// The execution order grouped by depth.
    pub layers: Vec<Vec<NodeId>>,
    /// Milliseconds spent in each invoked node's behavior.
    pub durations: HashMap<NodeId, u64>,
    /// Milliseconds for the whole pass, scheduling included.
    pub total_duration_ms: u64,
    /// Node at which an interrupt stopped the pass.
    pub interrupted_at: Option<NodeId>,
}

impl WeaveOutcome {
    pub fn executed_count(&self) -> usize {
        self.executed.len()
    }

    /// Output of a node that ran and succeeded.
    pub fn output(&self, id: &NodeId) -> Option<&Value> {
        self.results.get(id).and_then(|r| r.as_ref())
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted_at.is_some()
    }

    /// Nodes whose behavior failed, in execution order.
    pub fn failed(&self) -> Vec<&NodeId> {
        self.executed
            .iter()
            .filter(|id| matches!(self.results.get(*id), Some(None)))
            .collect()
    }
}

/// A named graph of nodes plus its execution state.
pub struct Loom {
    name: String,
    nodes: HashMap<NodeId, Node>,
    /// Node ids in the order they were added. Drives every tie-break.
    insertion: Vec<NodeId>,
    log: ExecutionLog,
    molt_requested: bool,
}

impl Loom {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: HashMap::new(),
            insertion: Vec::new(),
            log: ExecutionLog::new(),
            molt_requested: false,
        }
    }

    /// Create a loom whose log honors `config.max_log_entries`.
    pub fn from_config(name: impl Into<String>, config: &LoomConfig) -> Self {
        let mut loom = Self::new(name);
        loom.log = ExecutionLog::with_limit(config.max_log_entries);
        loom
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// All nodes, in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.insertion.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Node> {
        self.nodes().find(|n| n.name == name)
    }

    /// Register a node. Its outgoing yarn comes with it.
    pub fn add_node(&mut self, node: Node) -> Result<NodeId> {
        let id = node.id.clone();
        if self.nodes.contains_key(&id) {
            return Err(MidioError::DuplicateNode(id.to_string()));
        }
        debug!(loom = %self.name, node = %node.name, node_id = %id, "Added node");
        self.insertion.push(id.clone());
        self.nodes.insert(id.clone(), node);
        Ok(id)
    }

    /// Remove a node and every yarn in the loom that targets it.
    pub fn remove_node(&mut self, id: &NodeId) -> Option<Node> {
        let removed = self.nodes.remove(id)?;
        self.insertion.retain(|x| x != id);
        let stripped: usize = self
            .nodes
            .values_mut()
            .map(|n| n.disconnect_target(id))
            .sum();
        debug!(
            loom = %self.name,
            node = %removed.name,
            stripped,
            "Removed node"
        );
        Some(removed)
    }

    /// Connect two registered nodes. Returns the new yarn's id.
    pub fn connect(&mut self, from: &NodeId, to: &NodeId, yarn_type: YarnType) -> Result<String> {
        if !self.nodes.contains_key(to) {
            return Err(MidioError::NodeNotFound(to.to_string()));
        }
        let source = self
            .nodes
            .get_mut(from)
            .ok_or_else(|| MidioError::NodeNotFound(from.to_string()))?;
        Ok(source.connect_id(to.clone(), yarn_type).id.clone())
    }

    /// Adjacency of the current graph. Dangling yarn is excluded.
    pub fn topology(&self) -> HashMap<NodeId, Vec<NodeId>> {
        topology::adjacency(self.nodes()).into_iter().collect()
    }

    pub fn execution_order(&self) -> Result<Vec<NodeId>> {
        topology::execution_order(&topology::adjacency(self.nodes()))
    }

    /// Nodes grouped by depth; see [`topology::layers`].
    pub fn layers(&self) -> Result<Vec<Vec<NodeId>>> {
        topology::layers(&topology::adjacency(self.nodes()))
    }

    /// Run one pass over the loom.
    ///
    /// A node listed in `initial_inputs` receives that value verbatim.
    /// Any other node receives its upstream outputs: the bare value when
    /// there is exactly one, an array when there are several (ordered by
    /// upstream insertion order, then yarn creation order) and an empty
    /// array when there are none. Upstream nodes that failed contribute
    /// nothing.
    ///
    /// A failing node is logged and recorded as `None`; the pass goes on
    /// unless the node is a guard, in which case a molt is requested and the
    /// pass stops before the next node. A cycle aborts before anything runs.
    pub fn weave(&mut self, mut initial_inputs: HashMap<NodeId, Value>) -> Result<WeaveOutcome> {
        let started = Instant::now();
        let adjacency = topology::adjacency(self.nodes());
        let order = topology::execution_order(&adjacency)?;
        let layers = topology::layers(&adjacency)?;

        // Reverse adjacency, preserving upstream ordering.
        let mut upstream: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for (source, targets) in &adjacency {
            for target in targets {
                upstream.entry(target.clone()).or_default().push(source.clone());
            }
        }

        info!(loom = %self.name, nodes = order.len(), "Weaving loom");

        let mut outcome = WeaveOutcome {
            order: order.clone(),
            layers,
            ..WeaveOutcome::default()
        };

        for id in &order {
            let Some(node) = self.nodes.get_mut(id) else {
                continue;
            };

            if self.molt_requested {
                info!(loom = %self.name, node = %node.name, "Molt requested, stopping weave");
                self.log.push(LogEvent::MoltInterrupt {
                    node: node.name.clone(),
                    at_node: id.clone(),
                });
                outcome.interrupted_at = Some(id.clone());
                break;
            }

            let input = match initial_inputs.remove(id) {
                Some(value) => value,
                None => gather_inputs(upstream.get(id), &outcome.results),
            };

            outcome.executed.push(id.clone());
            let node_started = Instant::now();
            let result = node.execute(input);
            let duration_ms = elapsed_ms(node_started);
            outcome.durations.insert(id.clone(), duration_ms);
            match result {
                Ok(output) => {
                    node.mark_ok();
                    debug!(node = %node.name, node_id = %id, duration_ms, "Node executed");
                    self.log.push(LogEvent::Executed {
                        node: node.name.clone(),
                        node_id: id.clone(),
                        status: node.health().status,
                        duration_ms,
                    });
                    outcome.results.insert(id.clone(), Some(output));
                }
                Err(e) => {
                    node.mark_failed();
                    warn!(node = %node.name, node_id = %id, error = %e, "Node failed");
                    self.log.push(LogEvent::Error {
                        node: node.name.clone(),
                        node_id: id.clone(),
                        error: e.to_string(),
                        duration_ms,
                    });
                    outcome.results.insert(id.clone(), None);

                    // The only way a pass raises its own interrupt.
                    if node.kind == NodeKind::Guard {
                        warn!(node = %node.name, "Guard failed, requesting molt");
                        self.molt_requested = true;
                    }
                }
            }
        }

        outcome.total_duration_ms = elapsed_ms(started);
        info!(
            loom = %self.name,
            executed = outcome.executed.len(),
            duration_ms = outcome.total_duration_ms,
            interrupted = outcome.is_interrupted(),
            "Weave complete"
        );
        Ok(outcome)
    }

    /// Ask the next (or current) pass to stop at the next node boundary.
    pub fn request_molt(&mut self) {
        self.molt_requested = true;
    }

    pub fn reset_molt(&mut self) {
        self.molt_requested = false;
    }

    pub fn molt_requested(&self) -> bool {
        self.molt_requested
    }

    pub fn log(&self) -> &ExecutionLog {
        &self.log
    }

    pub fn log_tail(&self, n: usize) -> Vec<LogEntry> {
        self.log.tail(n)
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn gather_inputs(
    sources: Option<&Vec<NodeId>>,
    results: &HashMap<NodeId, Option<Value>>,
) -> Value {
    let mut outputs: Vec<Value> = sources
        .into_iter()
        .flatten()
        .filter_map(|src| results.get(src).and_then(|r| r.clone()))
        .collect();

    if outputs.len() == 1 {
        outputs.remove(0)
    } else {
        Value::Array(outputs)
    }
}

impl fmt::Debug for Loom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loom")
            .field("name", &self.name)
            .field("nodes", &self.nodes.len())
            .field("log", &self.log.len())
            .field("molt_requested", &self.molt_requested)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use midio_canvas::NodeStatus;
    use midio_test_utils::{failing, node, Constant, Doubler, Recorder};
    use serde_json::json;

    fn kinds(loom: &Loom) -> Vec<&'static str> {
        loom.log().events().map(|e| e.kind()).collect()
    }

    /// a(source) → b(doubler) → c(recorder)
    fn linear() -> (Loom, NodeId, NodeId, NodeId) {
        let mut loom = Loom::new("linear");
        let mut a = Node::new("a", NodeKind::Source);
        let mut b = node("b", NodeKind::Transform, Doubler);
        let c = node("c", NodeKind::Action, Recorder);
        a.connect(&b, YarnType::Data);
        b.connect(&c, YarnType::Data);
        let ids = (a.id.clone(), b.id.clone(), c.id.clone());
        loom.add_node(a).unwrap();
        loom.add_node(b).unwrap();
        loom.add_node(c).unwrap();
        (loom, ids.0, ids.1, ids.2)
    }

    #[test]
    fn test_weave_linear_end_to_end() {
        let (mut loom, a, b, c) = linear();
        let outcome = loom
            .weave(HashMap::from([(a.clone(), json!(21))]))
            .unwrap();

        assert_eq!(outcome.output(&a), Some(&json!(21)));
        assert_eq!(outcome.output(&b), Some(&json!(42)));
        assert_eq!(outcome.output(&c), Some(&json!({"recorded": 42})));
        assert_eq!(outcome.executed, vec![a.clone(), b.clone(), c.clone()]);

        let names: Vec<String> = loom
            .log()
            .events()
            .map(|e| match e {
                LogEvent::Executed { node, .. } => node.clone(),
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(loom.node(&c).unwrap().memory().get("recorded"), Some(&json!(42)));
        assert_eq!(loom.node(&b).unwrap().health().status, NodeStatus::Ok);
    }

    #[test]
    fn test_weave_reports_layers_and_timing() {
        let mut loom = Loom::new("timed");
        let mut a = Node::new("a", NodeKind::Source);
        let b = node("b", NodeKind::Transform, Doubler);
        let c = node("c", NodeKind::Action, Recorder);
        a.connect(&b, YarnType::Data);
        a.connect(&c, YarnType::Data);
        let (a, b, c) = (
            loom.add_node(a).unwrap(),
            loom.add_node(b).unwrap(),
            loom.add_node(c).unwrap(),
        );
        assert_eq!(
            loom.layers().unwrap(),
            vec![vec![a.clone()], vec![b.clone(), c.clone()]]
        );

        let outcome = loom.weave(HashMap::from([(a.clone(), json!(2))])).unwrap();
        assert_eq!(outcome.layers, loom.layers().unwrap());
        assert_eq!(outcome.durations.len(), 3);
        let per_node: u64 = outcome.durations.values().sum();
        assert!(outcome.total_duration_ms >= per_node);
        assert!(loom.log().events().all(|e| e.duration_ms().is_some()));
    }

    #[test]
    fn test_interrupt_has_no_duration() {
        let (mut loom, a, _, _) = linear();
        loom.request_molt();
        let outcome = loom.weave(HashMap::new()).unwrap();
        assert!(outcome.durations.is_empty());
        assert!(!outcome.durations.contains_key(&a));
        assert_eq!(loom.log().events().next().unwrap().duration_ms(), None);
    }

    #[test]
    fn test_source_without_input_gets_empty_array() {
        let mut loom = Loom::new("lonely");
        let id = loom.add_node(Node::new("solo", NodeKind::Source)).unwrap();
        let outcome = loom.weave(HashMap::new()).unwrap();
        assert_eq!(outcome.output(&id), Some(&json!([])));
    }

    #[test]
    fn test_explicit_input_overrides_upstream() {
        let (mut loom, a, b, _) = linear();
        let outcome = loom
            .weave(HashMap::from([(a.clone(), json!(1)), (b.clone(), json!(100))]))
            .unwrap();
        assert_eq!(outcome.output(&b), Some(&json!(200)));
    }

    #[test]
    fn test_fan_in_collects_in_upstream_order() {
        let mut loom = Loom::new("fan_in");
        let mut x = node("x", NodeKind::Source, Constant(json!("x")));
        let mut y = node("y", NodeKind::Source, Constant(json!("y")));
        let sink = Node::new("sink", NodeKind::Action);
        y.connect(&sink, YarnType::Data);
        x.connect(&sink, YarnType::Data);
        x.connect(&sink, YarnType::Signal);
        let sink_id = sink.id.clone();
        loom.add_node(x).unwrap();
        loom.add_node(y).unwrap();
        loom.add_node(sink).unwrap();

        let outcome = loom.weave(HashMap::new()).unwrap();
        // Parallel yarn from x is traversed twice.
        assert_eq!(outcome.output(&sink_id), Some(&json!(["x", "x", "y"])));
    }

    #[test]
    fn test_cycle_aborts_without_results() {
        let mut loom = Loom::new("cycle");
        let a = loom.add_node(Node::new("a", NodeKind::Transform)).unwrap();
        let b = loom.add_node(Node::new("b", NodeKind::Transform)).unwrap();
        loom.connect(&a, &b, YarnType::Data).unwrap();
        loom.connect(&b, &a, YarnType::Data).unwrap();

        let err = loom.weave(HashMap::from([(a.clone(), json!(1))])).unwrap_err();
        assert!(matches!(err, MidioError::CycleDetected { .. }));
        assert!(err.to_string().contains("molt"));
        assert!(loom.log().is_empty());
        assert_eq!(loom.node(&a).unwrap().health().executions, 0);
    }

    #[test]
    fn test_non_guard_failure_continues() {
        let mut loom = Loom::new("soft_fail");
        let mut a = failing("a", NodeKind::Transform);
        let b = Node::new("b", NodeKind::Action);
        a.connect(&b, YarnType::Data);
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        loom.add_node(a).unwrap();
        loom.add_node(b).unwrap();

        let outcome = loom.weave(HashMap::new()).unwrap();
        assert_eq!(outcome.results.get(&a_id), Some(&None));
        // Downstream sees no upstream output.
        assert_eq!(outcome.output(&b_id), Some(&json!([])));
        assert!(!loom.molt_requested());
        assert_eq!(kinds(&loom), vec!["error", "executed"]);

        let a = loom.node(&a_id).unwrap();
        assert_eq!(a.health().errors, 1);
        assert_eq!(a.health().executions, 1);
        assert_eq!(a.health().status, NodeStatus::Error);
        assert_eq!(outcome.failed(), vec![&a_id]);
    }

    #[test]
    fn test_guard_failure_halts_pass() {
        let mut loom = Loom::new("guarded");
        let mut first = Node::new("first", NodeKind::Source);
        let mut guard = failing("guard", NodeKind::Guard);
        let after = Node::new("after", NodeKind::Action);
        let independent = Node::new("independent", NodeKind::Source);
        first.connect(&guard, YarnType::Data);
        guard.connect(&after, YarnType::Guard);
        let ids = [
            first.id.clone(),
            guard.id.clone(),
            after.id.clone(),
            independent.id.clone(),
        ];
        loom.add_node(first).unwrap();
        loom.add_node(guard).unwrap();
        loom.add_node(after).unwrap();
        loom.add_node(independent).unwrap();

        let outcome = loom.weave(HashMap::new()).unwrap();
        // Order: first, independent, guard, after.
        assert_eq!(outcome.order, vec![ids[0].clone(), ids[3].clone(), ids[1].clone(), ids[2].clone()]);
        assert!(outcome.results.contains_key(&ids[0]));
        assert!(outcome.results.contains_key(&ids[3]));
        assert_eq!(outcome.results.get(&ids[1]), Some(&None));
        assert!(!outcome.results.contains_key(&ids[2]));
        assert_eq!(outcome.interrupted_at.as_ref(), Some(&ids[2]));
        assert!(loom.molt_requested());
        assert_eq!(kinds(&loom), vec!["executed", "executed", "error", "molt_interrupt"]);
    }

    #[test]
    fn test_guard_halts_independent_branch_too() {
        let mut loom = Loom::new("guard_first");
        let guard = loom.add_node(failing("guard", NodeKind::Guard)).unwrap();
        let other = loom.add_node(Node::new("other", NodeKind::Source)).unwrap();
        let outcome = loom.weave(HashMap::new()).unwrap();
        assert_eq!(outcome.executed, vec![guard]);
        assert!(!outcome.results.contains_key(&other));
        assert_eq!(outcome.interrupted_at, Some(other));
    }

    #[test]
    fn test_requested_molt_stops_at_first_node() {
        let (mut loom, a, _, _) = linear();
        loom.request_molt();
        let outcome = loom.weave(HashMap::new()).unwrap();
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.interrupted_at, Some(a));
        assert_eq!(kinds(&loom), vec!["molt_interrupt"]);

        loom.reset_molt();
        let outcome = loom.weave(HashMap::new()).unwrap();
        assert_eq!(outcome.executed_count(), 3);
        assert!(!outcome.is_interrupted());
    }

    #[test]
    fn test_log_and_memory_persist_across_passes() {
        let (mut loom, a, _, c) = linear();
        loom.weave(HashMap::from([(a.clone(), json!(1))])).unwrap();
        loom.weave(HashMap::from([(a.clone(), json!(5))])).unwrap();
        assert_eq!(loom.log().len(), 6);
        let c = loom.node(&c).unwrap();
        assert_eq!(c.memory().get("recorded"), Some(&json!(10)));
        assert_eq!(c.health().executions, 2);
        assert_eq!(loom.log_tail(2).len(), 2);
    }

    #[test]
    fn test_log_limit_from_config() {
        let config = LoomConfig {
            max_log_entries: Some(2),
            ..LoomConfig::default()
        };
        let mut loom = Loom::from_config("bounded", &config);
        loom.add_node(Node::new("a", NodeKind::Source)).unwrap();
        loom.add_node(Node::new("b", NodeKind::Source)).unwrap();
        loom.add_node(Node::new("c", NodeKind::Source)).unwrap();
        loom.weave(HashMap::new()).unwrap();
        assert_eq!(loom.log().len(), 2);
        assert_eq!(loom.log().dropped(), 1);
    }

    #[test]
    fn test_remove_node_strips_incoming_yarn() {
        let mut loom = Loom::new("removal");
        let mut a = Node::new("a", NodeKind::Source);
        let mut b = Node::new("b", NodeKind::Transform);
        let x = Node::new("x", NodeKind::Action);
        let c = Node::new("c", NodeKind::Action);
        a.connect(&x, YarnType::Data);
        a.connect(&c, YarnType::Data);
        b.connect(&x, YarnType::State);
        b.connect(&c, YarnType::Data);
        let (a_id, b_id, x_id, c_id) = (a.id.clone(), b.id.clone(), x.id.clone(), c.id.clone());
        for n in [a, b, x, c] {
            loom.add_node(n).unwrap();
        }

        let removed = loom.remove_node(&x_id).unwrap();
        assert_eq!(removed.name, "x");
        assert!(!loom.contains(&x_id));

        let topo = loom.topology();
        assert_eq!(topo[&a_id], vec![c_id.clone()]);
        assert_eq!(topo[&b_id], vec![c_id.clone()]);
        assert!(loom.node(&a_id).unwrap().connections.iter().all(|y| y.target != x_id));
        assert_eq!(loom.nodes().count(), 3);
        assert!(loom.remove_node(&x_id).is_none());
    }

    #[test]
    fn test_topology_excludes_dangling() {
        let mut loom = Loom::new("dangling");
        let mut a = Node::new("a", NodeKind::Source);
        a.connect_id(NodeId::from("ghost"), YarnType::Data);
        let a_id = loom.add_node(a).unwrap();
        assert_eq!(loom.topology()[&a_id], Vec::<NodeId>::new());
        assert!(loom.weave(HashMap::new()).is_ok());
    }

    #[test]
    fn test_connect_and_duplicates() {
        let mut loom = Loom::new("wiring");
        let a = Node::new("a", NodeKind::Source);
        let dup_id = a.id.clone();
        let a = loom.add_node(a).unwrap();
        let b = loom.add_node(Node::new("b", NodeKind::Action)).unwrap();

        assert!(loom.connect(&a, &b, YarnType::Data).is_ok());
        assert!(matches!(
            loom.connect(&a, &NodeId::from("missing"), YarnType::Data),
            Err(MidioError::NodeNotFound(_))
        ));

        let mut twin = Node::new("twin", NodeKind::Source);
        twin.id = dup_id;
        assert!(matches!(loom.add_node(twin), Err(MidioError::DuplicateNode(_))));
        assert_eq!(loom.find_by_name("b").map(|n| n.id.clone()), Some(b));
    }
}
