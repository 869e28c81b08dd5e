use std::collections::HashMap;

use serde_json::json;

use midio_canvas::{Node, NodeKind, YarnType};
use midio_codec::{burn, load, Disc, DiscMetadata, LoadMode, Library, Track};
use midio_core::MidioError;
use midio_loom::{LogEvent, Loom};
use midio_molt::MoltEvaluator;
use midio_test_utils::{drifted, failing, node, registry, Doubler, FixedDrift, Recorder};

#[test]
fn test_linear_pipeline_with_memory() {
    let mut loom = Loom::new("pipeline");
    let a = loom.add_node(Node::new("A", NodeKind::Source)).unwrap();
    let b = loom.add_node(node("B", NodeKind::Transform, Doubler)).unwrap();
    let c = loom.add_node(node("C", NodeKind::Action, Recorder)).unwrap();
    loom.connect(&a, &b, YarnType::Data).unwrap();
    loom.connect(&b, &c, YarnType::Data).unwrap();

    let outcome = loom.weave(HashMap::from([(a.clone(), json!(21))])).unwrap();

    assert_eq!(outcome.order, vec![a.clone(), b.clone(), c.clone()]);
    assert_eq!(outcome.output(&a), Some(&json!(21)));
    assert_eq!(outcome.output(&b), Some(&json!(42)));
    assert_eq!(outcome.output(&c), Some(&json!({"recorded": 42})));
    assert_eq!(loom.node(&c).unwrap().memory().get("recorded"), Some(&json!(42)));

    let kinds: Vec<&str> = loom.log().events().map(LogEvent::kind).collect();
    assert_eq!(kinds, vec!["executed", "executed", "executed"]);
}

#[test]
fn test_cycle_aborts_before_anything_runs() {
    let mut loom = Loom::new("loop");
    let a = loom.add_node(Node::new("a", NodeKind::Transform)).unwrap();
    let b = loom.add_node(Node::new("b", NodeKind::Transform)).unwrap();
    loom.connect(&a, &b, YarnType::Data).unwrap();
    loom.connect(&b, &a, YarnType::Data).unwrap();

    let err = loom.weave(HashMap::new()).unwrap_err();
    assert!(matches!(err, MidioError::CycleDetected { .. }));
    assert!(loom.log().is_empty());
    assert_eq!(loom.node(&a).unwrap().health().executions, 0);
}

#[test]
fn test_guard_failure_then_molt_ledger() {
    let mut loom = Loom::new("guarded");
    let src = loom.add_node(Node::new("src", NodeKind::Source)).unwrap();
    let guard = loom.add_node(failing("check", NodeKind::Guard)).unwrap();
    let after = loom.add_node(node("after", NodeKind::Action, Recorder)).unwrap();
    loom.connect(&src, &guard, YarnType::Guard).unwrap();
    loom.connect(&guard, &after, YarnType::Data).unwrap();

    let outcome = loom.weave(HashMap::new()).unwrap();
    assert_eq!(outcome.interrupted_at, Some(after.clone()));
    assert!(loom.molt_requested());
    assert!(loom.node(&after).unwrap().memory().is_empty());

    let mut evaluator = MoltEvaluator::default();
    evaluator.record_molt("guard tripped", vec![guard.clone()], "rewire");
    assert_eq!(evaluator.history().len(), 1);
    assert_eq!(evaluator.history()[0].degraded_nodes, vec![guard]);

    loom.reset_molt();
    let outcome = loom.weave(HashMap::new()).unwrap();
    assert_eq!(outcome.executed_count(), 2);
}

#[test]
fn test_drift_evaluation_after_weave() {
    let mut loom = Loom::new("drift");
    let a = loom.add_node(node("a", NodeKind::Source, FixedDrift(0.2))).unwrap();
    let b = loom.add_node(node("b", NodeKind::Transform, FixedDrift(0.7))).unwrap();
    let c = loom.add_node(drifted("c", 0.5)).unwrap();
    loom.connect(&a, &b, YarnType::Data).unwrap();
    loom.weave(HashMap::new()).unwrap();

    let evaluator = MoltEvaluator::new(0.5);
    let (should, mut degraded) = evaluator.should_molt(loom.nodes());
    degraded.sort();
    let mut expected = vec![b, c];
    expected.sort();
    assert!(should);
    assert_eq!(degraded, expected);
}

#[test]
fn test_disc_round_trip_preserves_behavior() {
    let mut loom = Loom::new("portable");
    let a = loom.add_node(Node::new("in", NodeKind::Source)).unwrap();
    let b = loom.add_node(node("double", NodeKind::Transform, Doubler)).unwrap();
    let c = loom.add_node(node("keep", NodeKind::Action, Recorder)).unwrap();
    loom.connect(&a, &b, YarnType::Data).unwrap();
    loom.connect(&b, &c, YarnType::Signal).unwrap();

    let json = burn(&loom, DiscMetadata::new("portable")).to_json().unwrap();
    let disc = Disc::from_json(&json).unwrap();
    let mut reloaded = load(&disc, &registry(), LoadMode::Strict).unwrap();

    let input = reloaded.find_by_name("in").unwrap().id.clone();
    let keep = reloaded.find_by_name("keep").unwrap().id.clone();
    let outcome = reloaded.weave(HashMap::from([(input, json!(4))])).unwrap();
    assert_eq!(outcome.output(&keep), Some(&json!({"recorded": 8})));
}

#[test]
fn test_lenient_load_tolerates_dangling_reference() {
    let disc = Disc::new(DiscMetadata::new("loose"))
        .with_track(Track::new("a", NodeKind::Source).with_output("ghost", YarnType::Data));

    let err = load(&disc, &registry(), LoadMode::Strict).unwrap_err();
    assert!(matches!(err, MidioError::InvalidDisc { .. }));

    let mut loom = load(&disc, &registry(), LoadMode::Lenient).unwrap();
    assert_eq!(loom.weave(HashMap::new()).unwrap().executed_count(), 1);
}

#[test]
fn test_library_round_trip_keeps_float_config() {
    let score = 0.49092266936723883;
    let mut loom = Loom::new("floaty");
    loom.add_node(node("verify", NodeKind::Guard, FixedDrift(score))).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let library = Library::new(dir.path()).unwrap();
    library.save(&burn(&loom, DiscMetadata::new("floaty")), false).unwrap();

    let disc = library.load("floaty").unwrap();
    let mut reloaded = load(&disc, &registry(), LoadMode::Strict).unwrap();
    reloaded.weave(HashMap::new()).unwrap();
    let verify = reloaded.find_by_name("verify").unwrap();
    assert_eq!(verify.health().drift_score.to_bits(), score.to_bits());
}
