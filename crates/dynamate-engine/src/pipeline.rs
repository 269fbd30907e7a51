//! One end-to-end run: a fresh sandbox, planning, then execution, then the final
//! cost record.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dynamate_core::plan::Plan;
use dynamate_core::provider::LlmProvider;
use dynamate_settings::DynamateSettings;
use dynamate_tools::ToolExecutor;
use tracing::{error, info, instrument, warn};

use crate::agents::{AgentDeps, ExecutionAgent, ExecutionReport, PlanningAgent, PlanningRequest};
use crate::error::EngineError;
use crate::run_log::{timestamp_now, FinalRecord, RunLog};

#[derive(Clone, Debug)]
pub struct PipelineOutcome {
    pub sandbox: PathBuf,
    pub plan: Plan,
    pub report: ExecutionReport,
    pub total_cost_usd: f64,
}

pub struct Pipeline {
    settings: DynamateSettings,
    provider: Arc<dyn LlmProvider>,
    executor: Arc<dyn ToolExecutor>,
    run_log: RunLog,
}

impl Pipeline {
    pub fn new(settings: DynamateSettings, provider: Arc<dyn LlmProvider>, executor: Arc<dyn ToolExecutor>) -> Self {
        let run_log = RunLog::new(settings.paths.run_log_path());
        Self {
            settings,
            provider,
            executor,
            run_log,
        }
    }

    pub fn run_log(&self) -> &RunLog {
        &self.run_log
    }

    /// Run both agents in order. The final cost record is appended whatever the outcome;
    /// a failure to write it only surfaces when the run itself succeeded.
    #[instrument(skip_all, fields(pdb_id = %request.pdb_id))]
    pub async fn run(&self, request: PlanningRequest) -> Result<PipelineOutcome, EngineError> {
        let mut total_cost_usd = 0.0;
        let result = self.run_agents(request, &mut total_cost_usd).await;

        let written = self.run_log.append(&FinalRecord::now(total_cost_usd)).await;
        match (&result, written) {
            (Err(e), _) => error!(error = %e, kind = e.kind(), total_cost_usd, "pipeline failed"),
            (Ok(_), Err(e)) => return Err(e.into()),
            (Ok(outcome), Ok(())) => info!(sandbox = %outcome.sandbox.display(), total_cost_usd, "pipeline finished"),
        }
        result
    }

    async fn run_agents(&self, request: PlanningRequest, total: &mut f64) -> Result<PipelineOutcome, EngineError> {
        let deps = AgentDeps::new(
            &self.settings,
            self.provider.clone(),
            self.executor.clone(),
            self.run_log.clone(),
        );
        let sandbox = self.create_sandbox().await?;

        let mut planning = PlanningAgent::new(request, &deps, &sandbox)?;
        let planned = planning.run().await;
        *total += planning.session().cost_usd();
        let plan = planned?;

        let mut execution = ExecutionAgent::new(plan.clone(), &deps)?;
        let executed = execution.run().await;
        *total += execution.session().cost_usd();
        let report = executed?;

        Ok(PipelineOutcome {
            sandbox,
            plan,
            report,
            total_cost_usd: *total,
        })
    }

    /// Create `run_<timestamp>` under the sandbox root and seed it with the MDP templates.
    pub async fn create_sandbox(&self) -> Result<PathBuf, EngineError> {
        let root = &self.settings.paths.sandbox_root;
        tokio::fs::create_dir_all(root).await.map_err(EngineError::io(root))?;
        let sandbox = claim_run_dir(root, &timestamp_now()).await?;
        let copied = copy_templates(&self.settings.paths.mdp_dir, &sandbox).await?;
        info!(sandbox = %sandbox.display(), templates = copied, "sandbox ready");
        Ok(sandbox)
    }
}

/// `run_<stamp>`, or `run_<stamp>_<n>` when a run started in the same second.
async fn claim_run_dir(root: &Path, stamp: &str) -> Result<PathBuf, EngineError> {
    let mut n = 1u32;
    loop {
        let name = if n == 1 { format!("run_{stamp}") } else { format!("run_{stamp}_{n}") };
        let dir = root.join(name);
        match tokio::fs::create_dir(&dir).await {
            Ok(()) => return Ok(dir),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(EngineError::io(&dir)(e)),
        }
    }
}

async fn copy_templates(mdp_dir: &Path, sandbox: &Path) -> Result<usize, EngineError> {
    let pattern = mdp_dir.join("*.mdp");
    let paths = match glob::glob(&pattern.to_string_lossy()) {
        Ok(paths) => paths,
        Err(e) => {
            warn!(pattern = %pattern.display(), error = %e, "bad template pattern");
            return Ok(0);
        }
    };
    let mut copied = 0;
    for entry in paths {
        let src = match entry {
            Ok(p) if p.is_file() => p,
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "skipping unreadable template");
                continue;
            }
        };
        let Some(name) = src.file_name() else { continue };
        let dest = sandbox.join(name);
        tokio::fs::copy(&src, &dest).await.map_err(EngineError::io(&dest))?;
        copied += 1;
    }
    if copied == 0 {
        warn!(dir = %mdp_dir.display(), "no MDP templates found");
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynamate_llm::{MockProvider, MockResponse};
    use dynamate_tools::ToolCall;

    use crate::dispatch::testing::FakeExecutor;

    const PROTEIN: &str = "\
ATOM      1  N   ALA A   1      11.104   6.134  -6.504  1.00  0.00           N
END
";

    fn settings(root: &Path) -> DynamateSettings {
        let mut settings = DynamateSettings::default();
        settings.paths = settings.paths.rooted_at(root);
        settings
    }

    fn lab_executor() -> FakeExecutor {
        FakeExecutor::new(|call, ctx| match call {
            ToolCall::FetchAndSavePdb(args) => {
                let id = args.pdb_id.to_uppercase();
                std::fs::write(ctx.sandbox.join(format!("{id}.pdb")), PROTEIN).unwrap();
                format!("PDB {id} downloaded successfully")
            }
            ToolCall::EditFile(args) => {
                std::fs::write(ctx.sandbox.join(&args.path), &args.new_text).unwrap();
                format!("Successfully created {}", args.path)
            }
            other => format!("{} ran successfully", other.kind().name()),
        })
    }

    #[tokio::test]
    async fn sandbox_gets_templates_and_unique_names() {
        let root = tempfile::tempdir().unwrap();
        let settings = settings(root.path());
        std::fs::create_dir_all(&settings.paths.mdp_dir).unwrap();
        std::fs::write(settings.paths.mdp_dir.join("nvt.mdp"), "ref_t = 300\n").unwrap();
        std::fs::write(settings.paths.mdp_dir.join("README"), "not a template").unwrap();

        let pipeline = Pipeline::new(
            settings,
            Arc::new(MockProvider::new(vec![])),
            Arc::new(FakeExecutor::replying("ok")),
        );
        let first = pipeline.create_sandbox().await.unwrap();
        assert!(first.file_name().unwrap().to_string_lossy().starts_with("run_"));
        assert!(first.join("nvt.mdp").exists());
        assert!(!first.join("README").exists());

        let again = claim_run_dir(first.parent().unwrap(), "20260101_000000").await.unwrap();
        let clash = claim_run_dir(first.parent().unwrap(), "20260101_000000").await.unwrap();
        assert!(again.ends_with("run_20260101_000000"));
        assert!(clash.ends_with("run_20260101_000000_2"));
    }

    #[tokio::test]
    async fn plans_then_executes_and_records_total_cost() {
        let root = tempfile::tempdir().unwrap();
        let settings = settings(root.path());
        let log_path = settings.paths.run_log_path();
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::tool_call("fetch_and_save_pdb", r#"{"pdb_id": "1abc"}"#).with_cost(0.01),
            MockResponse::tool_call("prepare_pdb_file_ligand", r#"{"pdb_id": "1ABC"}"#).with_cost(0.02),
            MockResponse::tool_call("edit_file", r#"{"path": "analysis.txt", "new_text": "Stable."}"#),
            MockResponse::text("Simulation and analysis complete.").with_cost(0.04),
        ]));
        let executor = Arc::new(lab_executor());
        let pipeline = Pipeline::new(settings, provider.clone(), executor.clone());

        let outcome = pipeline
            .run(PlanningRequest {
                pdb_id: "1ABC".into(),
                temperature_k: Some(300.0),
                duration_ns: Some(1.0),
                ..PlanningRequest::default()
            })
            .await
            .unwrap();

        assert_eq!(outcome.plan.pdb_file_path, outcome.sandbox.join("1ABC.pdb"));
        assert_eq!(outcome.plan.parameters.temperature_k, 300.0);
        assert!(outcome.report.analysis_written);
        assert!((outcome.total_cost_usd - 0.07).abs() < 1e-12);
        assert_eq!(provider.call_count(), 4);

        let lines: Vec<serde_json::Value> = std::fs::read_to_string(&log_path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["agent"], "planning");
        assert_eq!(lines[1]["agent"], "execution");
        assert!((lines[2]["total_completion_cost"].as_f64().unwrap() - 0.07).abs() < 1e-12);
    }

    #[tokio::test]
    async fn failed_run_still_writes_final_record() {
        let root = tempfile::tempdir().unwrap();
        let settings = settings(root.path());
        let log_path = settings.paths.run_log_path();
        let provider = Arc::new(MockProvider::new(vec![]));
        let pipeline = Pipeline::new(settings, provider.clone(), Arc::new(lab_executor()));

        let err = pipeline
            .run(PlanningRequest {
                pdb_id: "1ABC".into(),
                ligand: Some("AB".into()),
                ..PlanningRequest::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnrecoverableInput(_)));
        assert_eq!(provider.call_count(), 0);

        let text = std::fs::read_to_string(&log_path).unwrap();
        let last: serde_json::Value = serde_json::from_str(text.lines().last().unwrap()).unwrap();
        assert_eq!(last["total_completion_cost"], 0.0);
        assert!(last["timestamp_final"].is_string());
    }
}
