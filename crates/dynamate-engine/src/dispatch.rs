//! Tool dispatch: argument normalization, registry lookup, typed decoding,
//! execution and the agent-specific pass/fail check.

use std::sync::Arc;

use dynamate_core::messages::{Message, ToolInvocation};
use dynamate_core::tools::{ToolDefinition, ToolExecution};
use dynamate_tools::{SchemaHints, ToolCall, ToolContext, ToolExecutor};
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use crate::error::EngineError;
use crate::registry::ToolRegistry;
use crate::truncate::{truncate_output, DEFAULT_EDGE_CHARS};

/// Decides whether a tool's raw output counts as a success.
pub trait OutputCheck: Send + Sync {
    fn passed(&self, tool: &str, output: &str) -> bool;
}

/// Every output passes. Used while planning, where tools only gather information.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

impl OutputCheck for AcceptAll {
    fn passed(&self, _tool: &str, _output: &str) -> bool {
        true
    }
}

/// Fails outputs whose headline (first non-blank line) narrates a failure.
#[derive(Clone, Copy, Debug, Default)]
pub struct FailureMarkers;

impl FailureMarkers {
    pub const MARKERS: [&'static str; 7] = [
        "error",
        "failed",
        "not found",
        "fatal",
        "invalid",
        "refusing",
        "could not",
    ];
}

impl OutputCheck for FailureMarkers {
    fn passed(&self, _tool: &str, output: &str) -> bool {
        let headline = output
            .lines()
            .find(|l| !l.trim().is_empty())
            .unwrap_or_default()
            .to_lowercase();
        !Self::MARKERS.iter().any(|m| headline.contains(m))
    }
}

/// Parse a raw argument payload into a mapping. Empty, malformed or non-object
/// payloads become an empty mapping with a warning.
pub fn parse_arguments(tool: &str, raw: &str) -> Value {
    if raw.trim().is_empty() {
        warn!(tool, "tool call has empty arguments; using an empty mapping");
        return Value::Object(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => value,
        Ok(other) => {
            warn!(tool, arguments = %other, "tool arguments are not a mapping; using an empty mapping");
            Value::Object(Map::new())
        }
        Err(e) => {
            warn!(tool, arguments = raw, error = %e, "tool arguments are not valid JSON; using an empty mapping");
            Value::Object(Map::new())
        }
    }
}

/// Result of processing one invocation: the raw execution and the (truncated)
/// tool message to append.
#[derive(Clone, Debug)]
pub struct Dispatched {
    pub execution: ToolExecution,
    pub message: Message,
}

pub struct Dispatcher {
    registry: ToolRegistry,
    executor: Arc<dyn ToolExecutor>,
    check: Box<dyn OutputCheck>,
    hints: SchemaHints,
    edge_chars: usize,
}

impl Dispatcher {
    pub fn new(
        registry: ToolRegistry,
        executor: Arc<dyn ToolExecutor>,
        check: Box<dyn OutputCheck>,
        hints: SchemaHints,
    ) -> Self {
        Self {
            registry,
            executor,
            check,
            hints,
            edge_chars: DEFAULT_EDGE_CHARS,
        }
    }

    /// Characters kept from each end of long outputs.
    pub fn with_output_limit(mut self, edge_chars: usize) -> Self {
        self.edge_chars = edge_chars;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions(&self.hints)
    }

    /// Look up, decode and run one tool. Unknown names are fatal. Arguments that do
    /// not fit the tool's shape are reported back as a failed execution.
    #[instrument(skip(self, args, ctx), fields(tool = name))]
    pub async fn safe_execute(
        &self,
        name: &str,
        args: &Value,
        ctx: &ToolContext,
    ) -> Result<ToolExecution, EngineError> {
        let kind = self
            .registry
            .get(name)
            .ok_or_else(|| EngineError::UnknownTool(name.to_string()))?;

        info!(tool = name, arguments = %args, "executing tool");
        let call = match ToolCall::from_arguments(kind, args) {
            Ok(call) => call,
            Err(e) => {
                warn!(tool = name, error = %e, "tool arguments rejected");
                return Ok(ToolExecution {
                    name: name.to_string(),
                    passed: false,
                    output: format!("Invalid arguments for tool {name}: {e}"),
                });
            }
        };

        let output = self.executor.execute(&call, ctx).await?;
        let passed = self.check.passed(name, &output);
        Ok(ToolExecution {
            name: name.to_string(),
            passed,
            output,
        })
    }

    /// Normalize the invocation's arguments, execute it and build the tool message.
    pub async fn process(
        &self,
        invocation: &ToolInvocation,
        ctx: &ToolContext,
    ) -> Result<Dispatched, EngineError> {
        let args = parse_arguments(&invocation.name, &invocation.arguments);
        let execution = self.safe_execute(&invocation.name, &args, ctx).await?;
        let shown = truncate_output(&execution.output, self.edge_chars);
        info!(
            tool = %invocation.name,
            passed = execution.passed,
            output_chars = execution.output.chars().count(),
            "tool finished"
        );
        let message = Message::tool_result(invocation.id.clone(), invocation.name.clone(), args, shown);
        Ok(Dispatched { execution, message })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeExecutor;
    use super::*;
    use dynamate_tools::Toolset;
    use serde_json::json;

    fn dispatcher(executor: Arc<FakeExecutor>, check: Box<dyn OutputCheck>) -> Dispatcher {
        Dispatcher::new(
            ToolRegistry::for_toolset(Toolset::Execution),
            executor,
            check,
            SchemaHints::new("/tmp/run"),
        )
    }

    #[test]
    fn well_formed_arguments_round_trip() {
        let original = json!({"input_pdb": "1ABC_prepared.pdb", "pdb_id": "1ABC", "n": 3});
        let parsed = parse_arguments("add_caps", &original.to_string());
        assert_eq!(parsed, original);
    }

    #[test]
    fn bad_payloads_become_empty_mapping() {
        for raw in ["", "   ", "{not json", "[1, 2]", "\"text\""] {
            assert_eq!(parse_arguments("find_input", raw), json!({}), "payload {raw:?}");
        }
    }

    #[test]
    fn failure_markers_read_the_headline() {
        let check = FailureMarkers;
        assert!(!check.passed("t", "tleap run failed with error:\nstuff"));
        assert!(!check.passed("t", "File not found: /tmp/x.pdb"));
        assert!(!check.passed("t", "\n\nFATAL: topology broken"));
        assert!(!check.passed("t", "Refusing to access /etc: path is outside the sandbox"));
        assert!(check.passed("t", "Equilibration ran successfully. Full GROMACS output:\nWARNING error in log"));
        assert!(check.passed("t", ""));
        assert!(AcceptAll.passed("t", "Error: everything broke"));
    }

    #[tokio::test]
    async fn unknown_tool_is_fatal() {
        let exec = Arc::new(FakeExecutor::replying("ok"));
        let d = dispatcher(exec.clone(), Box::new(AcceptAll));
        let ctx = ToolContext::new("/tmp/run");
        let err = d
            .process(&ToolInvocation::new("frobnicate_structure", "{}"), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownTool(ref n) if n == "frobnicate_structure"));
        assert!(exec.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn wrong_argument_shape_is_narrated() {
        let exec = Arc::new(FakeExecutor::replying("ok"));
        let d = dispatcher(exec.clone(), Box::new(FailureMarkers));
        let ctx = ToolContext::new("/tmp/run");
        let out = d
            .process(&ToolInvocation::new("add_caps", r#"{"pdb_id": "1ABC"}"#), &ctx)
            .await
            .unwrap();
        assert!(!out.execution.passed);
        assert!(out.execution.output.starts_with("Invalid arguments for tool add_caps:"));
        assert!(exec.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn malformed_json_runs_with_empty_mapping() {
        let exec = Arc::new(FakeExecutor::replying("Empty directory: /tmp/run"));
        let d = dispatcher(exec.clone(), Box::new(FailureMarkers));
        let ctx = ToolContext::new("/tmp/run");
        let inv = ToolInvocation::new("find_input", "{oops");
        let out = d.process(&inv, &ctx).await.unwrap();
        assert!(out.execution.passed);
        assert_eq!(exec.call_names(), vec!["find_input"]);
        match out.message {
            Message::Tool(t) => {
                assert_eq!(t.tool_call_id, inv.id);
                assert_eq!(t.arguments, json!({}));
                assert_eq!(t.content, "Empty directory: /tmp/run");
            }
            other => panic!("expected tool message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn long_output_is_truncated_in_message_only() {
        let long = "z".repeat(12_000);
        let exec = Arc::new(FakeExecutor::replying(&long));
        let d = dispatcher(exec, Box::new(AcceptAll));
        let ctx = ToolContext::new("/tmp/run");
        let out = d.process(&ToolInvocation::new("find_input", "{}"), &ctx).await.unwrap();
        assert_eq!(out.execution.output.len(), 12_000);
        let shown = out.message.content().unwrap();
        assert_eq!(shown, truncate_output(&long, 5000));
        assert!(shown.len() < 12_000);
    }
}
