//! Line-oriented JSON bridge on stdin/stdout.
//!
//! One request per line: `{"id", "method", "params"}`. One response per
//! line: `{"id", "result"}` or `{"id", "error": {"code", "message"}}`.

use std::collections::HashMap;

use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use midio_canvas::{BehaviorRegistry, NodeId};
use midio_codec::{LoadMode, Library};
use midio_core::AppConfig;
use midio_loom::{Loom, WeaveOutcome};
use midio_molt::MoltEvaluator;

use crate::ritual;

pub const PARSE_ERROR: i32 = -32700;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const HANDLER_ERROR: i32 = -32000;

#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct Response {
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

#[derive(Debug, Serialize)]
pub struct ErrorPayload {
    pub code: i32,
    pub message: String,
}

impl Response {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, code: i32, message: String) -> Self {
        Self {
            id,
            result: None,
            error: Some(ErrorPayload { code, message }),
        }
    }
}

/// Looms a bridge can serve: the built-ins plus discs from the library,
/// loaded on first use.
struct Shelf {
    looms: HashMap<String, Loom>,
    registry: BehaviorRegistry,
    library: Option<Library>,
}

impl Shelf {
    fn get(&mut self, params: &Value, config: &AppConfig) -> anyhow::Result<(String, &mut Loom)> {
        let name = params
            .get("loom")
            .or_else(|| params.get("loom_name"))
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("'loom' is required"))?
            .to_string();

        if !self.looms.contains_key(&name) {
            let library = self
                .library
                .as_ref()
                .ok_or_else(|| anyhow!("Unknown loom: {}", name))?;
            if !library.exists(&name) {
                bail!("Unknown loom: {}", name);
            }
            let disc = library.load(&name)?;
            let loom = midio_codec::load_with(
                &disc,
                &self.registry,
                LoadMode::from_strict(config.codec.strict),
                &config.loom,
            )?;
            info!(loom = %name, "Loaded loom from library");
            self.looms.insert(name.clone(), loom);
        }
        let loom = self
            .looms
            .get_mut(&name)
            .ok_or_else(|| anyhow!("Unknown loom: {}", name))?;
        Ok((name, loom))
    }
}

/// Request dispatcher. Owns every loom it serves and the molt ledger.
pub struct Bridge {
    config: AppConfig,
    shelf: Shelf,
    evaluator: MoltEvaluator,
}

impl Bridge {
    pub fn new(config: AppConfig, library: Option<Library>) -> anyhow::Result<Self> {
        let mut looms = HashMap::new();
        looms.insert(
            ritual::LOOM_NAME.to_string(),
            ritual::build(&config.loom, config.molt.drift_threshold)?,
        );
        Ok(Self {
            evaluator: MoltEvaluator::from_config(&config.molt),
            shelf: Shelf {
                looms,
                registry: ritual::registry(),
                library,
            },
            config,
        })
    }

    /// Answer one input line. Blank lines get no response.
    pub fn handle_line(&mut self, line: &str) -> Option<Response> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let request: Request = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                return Some(Response::err(
                    Value::Null,
                    PARSE_ERROR,
                    format!("Parse error: {}", e),
                ))
            }
        };
        Some(self.handle(request))
    }

    pub fn handle(&mut self, request: Request) -> Response {
        let Request { id, method, params } = request;
        debug!(method = %method, "Bridge request");
        let result = match method.as_str() {
            "loom.weave" => self.loom_weave(&params),
            "loom.topology" => self.loom_topology(&params),
            "loom.requestMolt" => self.set_molt(&params, true),
            "loom.resetMolt" => self.set_molt(&params, false),
            "molt.evaluate" => self.molt_evaluate(&params),
            "molt.record" => self.molt_record(&params),
            "molt.history" => self.molt_history(),
            _ => {
                warn!(method = %method, "Unknown method");
                return Response::err(
                    id,
                    METHOD_NOT_FOUND,
                    format!("Unknown method: {}", method),
                );
            }
        };
        match result {
            Ok(value) => Response::ok(id, value),
            Err(e) => Response::err(id, HANDLER_ERROR, format!("{:#}", e)),
        }
    }

    fn loom_weave(&mut self, params: &Value) -> anyhow::Result<Value> {
        let raw_inputs = params
            .get("initial_inputs")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let (name, loom) = self.shelf.get(params, &self.config)?;

        let mut inputs = HashMap::new();
        for (key, value) in raw_inputs {
            inputs.insert(resolve_node(loom, &key)?, value);
        }
        let outcome = loom.weave(inputs)?;
        weave_report(&name, loom, &outcome, self.config.loom.log_tail)
    }

    fn loom_topology(&mut self, params: &Value) -> anyhow::Result<Value> {
        let (name, loom) = self.shelf.get(params, &self.config)?;
        topology_report(&name, loom)
    }

    fn set_molt(&mut self, params: &Value, requested: bool) -> anyhow::Result<Value> {
        let (name, loom) = self.shelf.get(params, &self.config)?;
        if requested {
            loom.request_molt();
        } else {
            loom.reset_molt();
        }
        Ok(json!({ "loom": name, "molt_requested": loom.molt_requested() }))
    }

    fn molt_evaluate(&mut self, params: &Value) -> anyhow::Result<Value> {
        if let Some(threshold) = params.get("drift_threshold").and_then(Value::as_f64) {
            self.evaluator.set_threshold(threshold);
        }
        let (name, loom) = self.shelf.get(params, &self.config)?;
        let (should_molt, degraded) = self.evaluator.should_molt(loom.nodes());
        Ok(json!({
            "loom": name,
            "should_molt": should_molt,
            "degraded_nodes": degraded,
            "threshold": self.evaluator.threshold(),
        }))
    }

    fn molt_record(&mut self, params: &Value) -> anyhow::Result<Value> {
        let reason = params
            .get("reason")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("'reason' is required"))?
            .to_string();
        let degraded: Vec<NodeId> = match params.get("degraded_nodes") {
            Some(v) if !v.is_null() => {
                serde_json::from_value(v.clone()).context("'degraded_nodes' must be a list of ids")?
            }
            _ => Vec::new(),
        };
        let action = params
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or("manual_trigger")
            .to_string();
        self.evaluator.record_molt(reason.clone(), degraded, action);
        Ok(json!({ "status": "molt_recorded", "reason": reason }))
    }

    fn molt_history(&self) -> anyhow::Result<Value> {
        Ok(json!({ "history": self.evaluator.history() }))
    }
}

/// Map an input key to a node id. Ids win over names.
pub fn resolve_node(loom: &Loom, key: &str) -> anyhow::Result<NodeId> {
    let id = NodeId::from(key);
    if loom.contains(&id) {
        return Ok(id);
    }
    loom.find_by_name(key)
        .map(|n| n.id.clone())
        .ok_or_else(|| anyhow!("No node '{}' in loom '{}'", key, loom.name()))
}

pub fn weave_report(
    name: &str,
    loom: &Loom,
    outcome: &WeaveOutcome,
    tail: usize,
) -> anyhow::Result<Value> {
    let results: serde_json::Map<String, Value> = outcome
        .executed
        .iter()
        .map(|id| {
            let value = outcome.output(id).cloned().unwrap_or(Value::Null);
            (id.to_string(), value)
        })
        .collect();
    Ok(json!({
        "loom": name,
        "executed_count": outcome.executed_count(),
        "interrupted_at": outcome.interrupted_at,
        "molt_requested": loom.molt_requested(),
        "results": results,
        "durations_ms": outcome.durations,
        "total_duration_ms": outcome.total_duration_ms,
        "log": serde_json::to_value(loom.log_tail(tail))?,
    }))
}

pub fn topology_report(name: &str, loom: &Loom) -> anyhow::Result<Value> {
    let topology: serde_json::Map<String, Value> = loom
        .topology()
        .into_iter()
        .map(|(id, targets)| (id.to_string(), json!(targets)))
        .collect();
    let nodes: serde_json::Map<String, Value> = loom
        .nodes()
        .map(|n| {
            (
                n.id.to_string(),
                json!({
                    "name": n.name,
                    "kind": n.kind,
                    "handler": n.behavior().handler(),
                    "health": n.health(),
                }),
            )
        })
        .collect();
    Ok(json!({
        "loom": name,
        "topology": topology,
        "layers": loom.layers()?,
        "nodes": nodes,
    }))
}

/// Serve requests until stdin closes.
pub async fn run(config: AppConfig, library: Option<Library>) -> anyhow::Result<()> {
    let mut bridge = Bridge::new(config, library)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    info!("Bridge ready");

    while let Some(line) = lines.next_line().await? {
        let Some(response) = bridge.handle_line(&line) else {
            continue;
        };
        let mut out = serde_json::to_string(&response)?;
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }
    info!("Bridge input closed");
    Ok(())
}
