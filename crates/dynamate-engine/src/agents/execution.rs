use std::collections::BTreeMap;

use dynamate_core::plan::Plan;
use dynamate_core::tokens::RunAccounting;
use dynamate_core::tools::ToolExecution;
use dynamate_tools::{SchemaHints, ToolContext, Toolset};
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::AgentDeps;
use crate::dispatch::{Dispatcher, FailureMarkers};
use crate::error::EngineError;
use crate::prompts;
use crate::registry::ToolRegistry;
use crate::session::{AgentSession, TurnOutcome};

/// File the model is asked to leave behind once the trajectory is analysed.
pub const ANALYSIS_FILE: &str = "analysis.txt";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ToolStats {
    pub attempts: u32,
    pub successes: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct ExecutionReport {
    pub turns: u32,
    pub final_message: String,
    pub tools: BTreeMap<String, ToolStats>,
    pub cost_usd: f64,
    pub analysis_written: bool,
}

impl ExecutionReport {
    pub fn attempted(&self) -> u32 {
        self.tools.values().map(|s| s.attempts).sum()
    }

    pub fn succeeded(&self) -> u32 {
        self.tools.values().map(|s| s.successes).sum()
    }
}

/// Drives the pipeline tools turn by turn until the model answers without tool
/// calls. The plan's step list guides the model; it does not constrain the loop.
pub struct ExecutionAgent {
    session: AgentSession,
    plan: Plan,
    max_turns: u32,
    tools: BTreeMap<String, ToolStats>,
}

impl ExecutionAgent {
    pub fn new(plan: Plan, deps: &AgentDeps) -> Result<Self, EngineError> {
        let ctx = ToolContext::new(&plan.sandbox_dir).with_parameters(plan.parameters);
        let hints = SchemaHints::new(&plan.sandbox_dir)
            .with_structure(plan.pdb_id(), plan.ligand.as_ref().map(|l| l.as_str().to_string()));
        let mut session = AgentSession::new(
            deps.session.clone().for_agent("execution"),
            deps.provider.clone(),
            ctx,
            deps.run_log.clone(),
        );
        session.bind_tools(
            Dispatcher::new(
                ToolRegistry::for_toolset(Toolset::Execution),
                deps.executor.clone(),
                Box::new(FailureMarkers),
                hints,
            )
            .with_output_limit(deps.session.context.max_characters_to_log),
        )?;
        Ok(Self {
            session,
            plan,
            max_turns: deps.limits.max_execution_turns,
            tools: BTreeMap::new(),
        })
    }

    pub fn session(&self) -> &AgentSession {
        &self.session
    }

    pub fn accounting(&self) -> &RunAccounting {
        self.session.accounting()
    }

    /// Per-tool attempts and successes so far.
    pub fn tool_stats(&self) -> &BTreeMap<String, ToolStats> {
        &self.tools
    }

    #[instrument(skip_all, fields(agent = "execution", pdb_id = %self.plan.pdb_id()))]
    pub async fn run(&mut self) -> Result<ExecutionReport, EngineError> {
        let result = self.execute().await;
        self.session.finish(result).await
    }

    async fn execute(&mut self) -> Result<ExecutionReport, EngineError> {
        validate_plan(&self.plan).await?;

        let plan_json = serde_json::to_string_pretty(&self.plan)
            .map_err(|e| EngineError::MalformedPlan(e.to_string()))?;
        self.session.push_system(prompts::execution_system(&self.plan));
        info!(
            steps = ?self.plan.step_names(),
            temperature_k = self.plan.parameters.temperature_k,
            duration_ns = self.plan.parameters.duration_ns,
            "starting execution"
        );

        let mut reply = self.session.prompt(prompts::execution_kickoff(&plan_json)).await?;
        let mut turns = 0u32;
        loop {
            turns += 1;
            match self.session.handle_reply(reply).await? {
                TurnOutcome::Answered(text) => return Ok(self.report(turns, text).await),
                TurnOutcome::ToolsRun(executions) => self.record(&executions),
            }
            if turns >= self.max_turns {
                return Err(EngineError::MaxTurnsExceeded(self.max_turns));
            }
            reply = self.session.call_model().await?;
        }
    }

    fn record(&mut self, executions: &[ToolExecution]) {
        for e in executions {
            let stats = self.tools.entry(e.name.clone()).or_default();
            stats.attempts += 1;
            if e.passed {
                stats.successes += 1;
            }
        }
    }

    async fn report(&self, turns: u32, final_message: String) -> ExecutionReport {
        let analysis = self.plan.sandbox_dir.join(ANALYSIS_FILE);
        let analysis_written = tokio::fs::try_exists(&analysis).await.unwrap_or(false);
        if !analysis_written {
            warn!(path = %analysis.display(), "model finished without writing the analysis");
        }
        let report = ExecutionReport {
            turns,
            final_message,
            tools: self.tools.clone(),
            cost_usd: self.session.cost_usd(),
            analysis_written,
        };
        info!(
            turns,
            attempted = report.attempted(),
            succeeded = report.succeeded(),
            cost_usd = report.cost_usd,
            analysis_written,
            "execution finished"
        );
        report
    }
}

/// Reject plans the pipeline cannot start from.
async fn validate_plan(plan: &Plan) -> Result<(), EngineError> {
    if plan.plan.is_empty() {
        return Err(EngineError::MalformedPlan("plan has no steps".into()));
    }
    let registry = ToolRegistry::for_toolset(Toolset::Execution);
    if let Some(step) = plan.plan.iter().find(|s| !registry.contains(&s.step)) {
        return Err(EngineError::MalformedPlan(format!("step {} is not an execution tool", step.step)));
    }
    if !tokio::fs::metadata(&plan.sandbox_dir).await.is_ok_and(|m| m.is_dir()) {
        return Err(EngineError::MalformedPlan(format!(
            "sandbox {} does not exist",
            plan.sandbox_dir.display()
        )));
    }
    if !tokio::fs::metadata(&plan.pdb_file_path).await.is_ok_and(|m| m.is_file()) {
        return Err(EngineError::MalformedPlan(format!(
            "structure file {} does not exist",
            plan.pdb_file_path.display()
        )));
    }
    let p = plan.parameters;
    for (what, value) in [("temperature", p.temperature_k), ("duration", p.duration_ns)] {
        if !(value.is_finite() && value > 0.0) {
            return Err(EngineError::MalformedPlan(format!("{what} must be positive, got {value}")));
        }
    }
    Ok(())
}
