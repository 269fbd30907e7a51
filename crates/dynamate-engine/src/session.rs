//! The base agent loop: conversation state, accounting, compaction before each
//! model call, and sequential tool dispatch.

use std::fmt;
use std::sync::Arc;

use dynamate_core::messages::{Message, ToolInvocation};
use dynamate_core::plan::SimulationParameters;
use dynamate_core::provider::{CompletionRequest, LlmProvider, ModelReply};
use dynamate_core::tokens::RunAccounting;
use dynamate_core::tools::ToolExecution;
use dynamate_settings::{ContextSettings, DynamateSettings};
use dynamate_tools::ToolContext;
use serde_json::Value;
use tracing::{error, info, instrument, warn};

use crate::compactor::Compactor;
use crate::dispatch::Dispatcher;
use crate::error::EngineError;
use crate::run_log::{sandbox_files, timestamp_now, FinalRecord, RunLog, RunRecord};
use crate::tokens::estimate_conversation_tokens;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Created,
    ToolSchemaBound,
    Running,
    Completed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::ToolSchemaBound => "tool_schema_bound",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Agent name used in logs and run records.
    pub agent: String,
    pub model: String,
    pub temperature: f64,
    pub supports_system_messages: bool,
    pub context: ContextSettings,
}

impl SessionConfig {
    pub fn from_settings(agent: impl Into<String>, settings: &DynamateSettings) -> Self {
        Self {
            agent: agent.into(),
            model: settings.model.name.clone(),
            temperature: settings.model.temperature,
            supports_system_messages: settings.model.supports_system_messages,
            context: settings.context.clone(),
        }
    }

    pub fn for_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = agent.into();
        self
    }
}

/// What one model reply led to.
#[derive(Clone, Debug, PartialEq)]
pub enum TurnOutcome {
    /// Plain-text answer; no tools ran.
    Answered(String),
    /// Every requested tool ran, in order.
    ToolsRun(Vec<ToolExecution>),
}

pub struct AgentSession {
    config: SessionConfig,
    provider: Arc<dyn LlmProvider>,
    ctx: ToolContext,
    run_log: RunLog,
    dispatcher: Option<Dispatcher>,
    compactor: Compactor,
    messages: Vec<Message>,
    accounting: RunAccounting,
    state: SessionState,
}

impl AgentSession {
    pub fn new(config: SessionConfig, provider: Arc<dyn LlmProvider>, ctx: ToolContext, run_log: RunLog) -> Self {
        let compactor = Compactor::new(config.context.clone());
        Self {
            config,
            provider,
            ctx,
            run_log,
            dispatcher: None,
            compactor,
            messages: Vec::new(),
            accounting: RunAccounting::default(),
            state: SessionState::Created,
        }
    }

    /// Attach the tool schema and dispatcher. Required before the first model call.
    pub fn bind_tools(&mut self, dispatcher: Dispatcher) -> Result<(), EngineError> {
        match self.state {
            SessionState::Created | SessionState::ToolSchemaBound => {
                self.dispatcher = Some(dispatcher);
                self.state = SessionState::ToolSchemaBound;
                Ok(())
            }
            other => Err(EngineError::InvalidState(format!("cannot bind tools while {other}"))),
        }
    }

    pub fn agent(&self) -> &str {
        &self.config.agent
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn accounting(&self) -> &RunAccounting {
        &self.accounting
    }

    pub fn cost_usd(&self) -> f64 {
        self.accounting.total_cost_usd
    }

    pub fn tool_context(&self) -> &ToolContext {
        &self.ctx
    }

    pub fn push_system(&mut self, text: impl Into<String>) {
        self.messages.push(Message::system(text));
    }

    /// Append a user turn and call the model with the whole conversation.
    pub async fn prompt(&mut self, text: impl Into<String>) -> Result<ModelReply, EngineError> {
        let text = text.into();
        info!(agent = %self.config.agent, prompt = %text, "prompting model");
        self.messages.push(Message::user(text));
        self.call_model().await
    }

    fn ensure_callable(&self) -> Result<(), EngineError> {
        if self.state.is_terminal() {
            return Err(EngineError::InvalidState(format!("session already {}", self.state)));
        }
        if self.dispatcher.is_none() {
            return Err(EngineError::InvalidState("tool schema not bound".into()));
        }
        Ok(())
    }

    /// Call the model with the current conversation, compacting it first when it
    /// has outgrown the context ceiling. The reply is not recorded; see
    /// [`handle_reply`](Self::handle_reply).
    #[instrument(skip_all, fields(agent = %self.config.agent))]
    pub async fn call_model(&mut self) -> Result<ModelReply, EngineError> {
        self.ensure_callable()?;
        self.state = SessionState::Running;

        let mut estimate = estimate_conversation_tokens(&self.messages);
        if self.compactor.should_compact(&self.messages, estimate) {
            let compaction = self
                .compactor
                .compact(self.provider.as_ref(), &self.messages, self.config.supports_system_messages)
                .await?;
            if let Some(c) = compaction {
                self.accounting.record_call(c.usage, c.cost_usd);
                self.accounting.compactions += 1;
                self.messages = c.messages;
                estimate = estimate_conversation_tokens(&self.messages);
            }
        }
        self.accounting.last_estimate = estimate;

        let tools = self
            .dispatcher
            .as_ref()
            .map(Dispatcher::definitions)
            .unwrap_or_default();
        let request = CompletionRequest::new(self.messages.clone(), self.config.temperature)
            .with_tools(tools)
            .with_system_messages(self.config.supports_system_messages);

        let completion = self.provider.complete(&request).await?;
        self.accounting.record_call(completion.usage, completion.cost_usd);
        info!(
            agent = %self.config.agent,
            tokens = estimate,
            cost_usd = completion.cost_usd,
            total_cost_usd = self.accounting.total_cost_usd,
            tool_calls = completion.reply.is_tool_calls(),
            "model replied"
        );
        Ok(completion.reply)
    }

    /// Record the assistant turn and run any requested tools in listed order. A
    /// reply naming an unregistered tool fails before anything is recorded.
    #[instrument(skip_all, fields(agent = %self.config.agent))]
    pub async fn handle_reply(&mut self, reply: ModelReply) -> Result<TurnOutcome, EngineError> {
        match reply {
            ModelReply::PlainText(text) => {
                self.messages.push(Message::assistant_text(text.clone()));
                Ok(TurnOutcome::Answered(text))
            }
            ModelReply::ToolCallsRequested { calls, preamble } => {
                if let Some(registry) = self.dispatcher.as_ref().map(Dispatcher::registry) {
                    if let Some(unknown) = calls.iter().find(|c| !registry.contains(&c.name)) {
                        error!(agent = %self.config.agent, tool = %unknown.name, "model requested an unknown tool");
                        return Err(EngineError::UnknownTool(unknown.name.clone()));
                    }
                }
                info!(agent = %self.config.agent, calls = calls.len(), "dispatching tool calls");
                self.messages.push(Message::assistant_tool_calls(preamble, calls.clone()));
                let mut executions = Vec::with_capacity(calls.len());
                for call in &calls {
                    executions.push(self.process_tool_call(call).await?);
                }
                Ok(TurnOutcome::ToolsRun(executions))
            }
        }
    }

    /// Run one invocation and append its (truncated) result. Returns the raw
    /// execution.
    pub async fn process_tool_call(&mut self, invocation: &ToolInvocation) -> Result<ToolExecution, EngineError> {
        let dispatcher = self
            .dispatcher
            .as_ref()
            .ok_or_else(|| EngineError::InvalidState("tool schema not bound".into()))?;
        let dispatched = dispatcher.process(invocation, &self.ctx).await?;
        if !dispatched.execution.passed {
            warn!(agent = %self.config.agent, tool = %invocation.name, passed = false, "tool reported failure");
        }
        self.messages.push(dispatched.message);
        Ok(dispatched.execution)
    }

    /// Execute a tool by name without touching the conversation.
    pub async fn safe_execute_tool(&self, name: &str, args: &Value) -> Result<ToolExecution, EngineError> {
        let dispatcher = self
            .dispatcher
            .as_ref()
            .ok_or_else(|| EngineError::InvalidState("tool schema not bound".into()))?;
        dispatcher.safe_execute(name, args, &self.ctx).await
    }

    /// Simulation parameters are visible to tools once planning has produced them.
    pub fn set_parameters(&mut self, parameters: SimulationParameters) {
        self.ctx.parameters = Some(parameters);
    }

    /// Append this session's run record to the run log.
    pub async fn persist_run(&self) -> Result<(), EngineError> {
        let record = RunRecord {
            timestamp: timestamp_now(),
            agent: self.config.agent.clone(),
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            tools: self
                .dispatcher
                .as_ref()
                .map(Dispatcher::definitions)
                .unwrap_or_default(),
            messages: self.messages.clone(),
            files_created: sandbox_files(&self.ctx.sandbox).await,
        };
        self.run_log.append(&record).await?;
        info!(
            agent = %self.config.agent,
            path = %self.run_log.path().display(),
            messages = self.messages.len(),
            "run record written"
        );
        Ok(())
    }

    /// Append the closing cumulative-cost record. `total_cost_usd` spans every
    /// session of the run, so the caller supplies it.
    pub async fn persist_final_cost(&self, total_cost_usd: f64) -> Result<(), EngineError> {
        self.run_log.append(&FinalRecord::now(total_cost_usd)).await?;
        info!(agent = %self.config.agent, total_cost_usd, "final cost recorded");
        Ok(())
    }

    pub fn complete(&mut self) {
        self.state = SessionState::Completed;
        info!(
            agent = %self.config.agent,
            cost_usd = self.accounting.total_cost_usd,
            model_calls = self.accounting.model_calls,
            compactions = self.accounting.compactions,
            "session completed"
        );
    }

    pub fn fail(&mut self, err: &EngineError) {
        self.state = SessionState::Failed;
        error!(agent = %self.config.agent, kind = err.kind(), error = %err, "session failed");
    }

    /// Mark the session finished according to `result`, persist its run record,
    /// and hand the result back. A persistence failure only replaces a success.
    pub async fn finish<T>(&mut self, result: Result<T, EngineError>) -> Result<T, EngineError> {
        match &result {
            Ok(_) => self.complete(),
            Err(e) => self.fail(e),
        }
        if let Err(e) = self.persist_run().await {
            warn!(agent = %self.config.agent, error = %e, "could not write run record");
            if result.is_ok() {
                return Err(e);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::testing::FakeExecutor;
    use crate::dispatch::{AcceptAll, OutputCheck};
    use crate::registry::ToolRegistry;
    use dynamate_llm::{MockProvider, MockResponse};
    use dynamate_tools::{SchemaHints, Toolset};

    struct Harness {
        provider: Arc<MockProvider>,
        executor: Arc<FakeExecutor>,
        _dir: tempfile::TempDir,
        session: AgentSession,
    }

    fn harness(responses: Vec<MockResponse>, check: Box<dyn OutputCheck>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(MockProvider::new(responses));
        let executor = Arc::new(FakeExecutor::replying("ok"));
        let config = SessionConfig::from_settings("test", &DynamateSettings::default());
        let mut session = AgentSession::new(
            config,
            provider.clone(),
            ToolContext::new(dir.path()),
            RunLog::new(dir.path().join("logs/agent_runs.jsonl")),
        );
        session
            .bind_tools(Dispatcher::new(
                ToolRegistry::for_toolset(Toolset::Planning),
                executor.clone(),
                check,
                SchemaHints::new(dir.path()),
            ))
            .unwrap();
        Harness {
            provider,
            executor,
            _dir: dir,
            session,
        }
    }

    #[tokio::test]
    async fn model_call_requires_bound_tools() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(MockProvider::new(vec![MockResponse::text("hi")]));
        let mut session = AgentSession::new(
            SessionConfig::from_settings("test", &DynamateSettings::default()),
            provider.clone(),
            ToolContext::new(dir.path()),
            RunLog::new(dir.path().join("runs.jsonl")),
        );
        assert_eq!(session.state(), SessionState::Created);
        let err = session.prompt("hello").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn state_machine_transitions() {
        let mut h = harness(vec![MockResponse::text("done")], Box::new(AcceptAll));
        assert_eq!(h.session.state(), SessionState::ToolSchemaBound);
        h.session.prompt("go").await.unwrap();
        assert_eq!(h.session.state(), SessionState::Running);
        h.session.complete();
        assert_eq!(h.session.state(), SessionState::Completed);
        assert!(matches!(h.session.call_model().await, Err(EngineError::InvalidState(_))));
    }

    #[tokio::test]
    async fn tool_calls_run_in_order_and_append_results() {
        let mut h = harness(
            vec![MockResponse::tool_calls(&[
                ("find_input", "{}"),
                ("read_file", r#"{"path": "1ABC.pdb"}"#),
            ])],
            Box::new(AcceptAll),
        );
        let reply = h.session.prompt("find the structure").await.unwrap();
        let outcome = h.session.handle_reply(reply).await.unwrap();

        match outcome {
            TurnOutcome::ToolsRun(execs) => {
                let names: Vec<&str> = execs.iter().map(|e| e.name.as_str()).collect();
                assert_eq!(names, vec!["find_input", "read_file"]);
            }
            other => panic!("expected tools, got {other:?}"),
        }
        assert_eq!(h.executor.call_names(), vec!["find_input", "read_file"]);

        let roles: Vec<&str> = h.session.messages().iter().map(|m| m.role().as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "tool", "tool"]);
    }

    #[tokio::test]
    async fn unknown_tool_fails_without_appending() {
        let mut h = harness(
            vec![MockResponse::tool_call("frobnicate_structure", "{}")],
            Box::new(AcceptAll),
        );
        let reply = h.session.prompt("go").await.unwrap();
        let before = h.session.messages().len();

        let err = h.session.handle_reply(reply).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownTool(ref n) if n == "frobnicate_structure"));
        assert_eq!(h.session.messages().len(), before);
        assert!(h.executor.calls.lock().is_empty());

        let result: Result<(), _> = h.session.finish(Err(err)).await;
        assert!(result.is_err());
        assert_eq!(h.session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn safe_execute_tool_runs_known_and_rejects_unknown() {
        let h = harness(vec![], Box::new(AcceptAll));

        let exec = h
            .session
            .safe_execute_tool("find_input", &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(exec.name, "find_input");
        assert!(exec.passed);
        assert_eq!(exec.output, "ok");
        assert_eq!(h.executor.call_names(), vec!["find_input"]);
        assert!(h.session.messages().is_empty());

        let err = h
            .session
            .safe_execute_tool("frobnicate_structure", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownTool(ref n) if n == "frobnicate_structure"));
        assert_eq!(h.executor.calls.lock().len(), 1);
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn cost_accumulates_across_calls() {
        let mut h = harness(
            vec![
                MockResponse::text("one").with_cost(0.25),
                MockResponse::text("two").with_cost(0.5),
            ],
            Box::new(AcceptAll),
        );
        h.session.prompt("a").await.unwrap();
        h.session.prompt("b").await.unwrap();
        assert!((h.session.cost_usd() - 0.75).abs() < 1e-12);
        assert_eq!(h.session.accounting().model_calls, 2);
    }

    #[tokio::test]
    async fn long_conversation_compacts_exactly_once() {
        let mut h = harness(
            vec![
                MockResponse::text("summary of the run").with_cost(0.1),
                MockResponse::text("first"),
                MockResponse::text("second"),
            ],
            Box::new(AcceptAll),
        );
        let chunk = "x".repeat(3200);
        h.session.push_system(chunk.clone());
        for i in 1..50 {
            if i % 2 == 1 {
                h.session.messages.push(Message::user(chunk.clone()));
            } else {
                h.session.messages.push(Message::assistant_text(chunk.clone()));
            }
        }
        assert_eq!(h.session.messages().len(), 50);
        assert_eq!(estimate_conversation_tokens(h.session.messages()), 40_000);
        let recent = h.session.messages()[48..].to_vec();

        let reply = h.session.call_model().await.unwrap();
        assert_eq!(h.provider.call_count(), 2);
        assert_eq!(h.session.accounting().compactions, 1);

        let requests = h.provider.requests();
        assert!(requests[0].tools.is_empty());
        let sent = &requests[1].messages;
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].content(), Some("[Conversation Summary]\nsummary of the run"));
        assert_eq!(&sent[1..], recent.as_slice());

        h.session.handle_reply(reply).await.unwrap();
        h.session.call_model().await.unwrap();
        assert_eq!(h.provider.call_count(), 3);
        assert_eq!(h.session.accounting().compactions, 1);
        assert!((h.session.cost_usd() - 0.1).abs() < 1e-12);
    }

    #[tokio::test]
    async fn short_conversation_never_compacts() {
        let mut h = harness(vec![MockResponse::text("ok")], Box::new(AcceptAll));
        h.session.push_system("y".repeat(200_000));
        h.session.messages.push(Message::user("y".repeat(200_000)));
        h.session.messages.push(Message::assistant_text("y".repeat(200_000)));
        h.session.call_model().await.unwrap();
        assert_eq!(h.provider.call_count(), 1);
        assert_eq!(h.session.accounting().compactions, 0);
    }

    #[tokio::test]
    async fn run_record_lists_sandbox_files() {
        let mut h = harness(vec![MockResponse::text("done")], Box::new(AcceptAll));
        std::fs::write(h.session.tool_context().sandbox.join("1ABC.pdb"), "END\n").unwrap();
        h.session.push_system("sys");
        h.session.prompt("go").await.unwrap();
        let result = h.session.finish(Ok(())).await;
        assert!(result.is_ok());
        assert_eq!(h.session.state(), SessionState::Completed);

        let log_path = h.session.tool_context().sandbox.join("logs/agent_runs.jsonl");
        let text = std::fs::read_to_string(log_path).unwrap();
        let record: RunRecord = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(record.agent, "test");
        assert_eq!(record.files_created, vec!["1ABC.pdb"]);
        assert_eq!(record.tools.len(), 4);
        assert_eq!(record.messages.len(), 2);
    }

    #[tokio::test]
    async fn final_cost_follows_run_record() {
        let mut h = harness(vec![MockResponse::text("done").with_cost(0.25)], Box::new(AcceptAll));
        h.session.prompt("go").await.unwrap();
        h.session.finish(Ok(())).await.unwrap();
        h.session.persist_final_cost(h.session.cost_usd() + 0.5).await.unwrap();

        let log_path = h.session.tool_context().sandbox.join("logs/agent_runs.jsonl");
        let text = std::fs::read_to_string(log_path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let last: FinalRecord = serde_json::from_str(lines[1]).unwrap();
        assert!((last.total_completion_cost - 0.75).abs() < 1e-12);
    }
}
