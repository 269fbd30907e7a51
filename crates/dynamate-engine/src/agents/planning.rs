use std::path::{Path, PathBuf};

use dynamate_core::plan::{LigandCode, Plan, SimulationParameters};
use dynamate_core::tokens::RunAccounting;
use dynamate_settings::AgentSettings;
use dynamate_tools::files::structure_files;
use dynamate_tools::pdb::scan_ligand;
use dynamate_tools::{SchemaHints, ToolContext, Toolset};
use tracing::{debug, info, instrument, warn};

use super::AgentDeps;
use crate::dispatch::{AcceptAll, Dispatcher};
use crate::error::EngineError;
use crate::extract::{extract_duration, extract_temperature};
use crate::prompts;
use crate::registry::ToolRegistry;
use crate::session::{AgentSession, TurnOutcome};

/// What the user asked for. Temperature and duration given here skip the
/// corresponding questions to the model.
#[derive(Clone, Debug, Default)]
pub struct PlanningRequest {
    pub pdb_id: String,
    pub ligand: Option<String>,
    pub temperature_k: Option<f64>,
    pub duration_ns: Option<f64>,
}

/// Resolves the structure file, ligand and simulation parameters, then emits a
/// [`Plan`].
pub struct PlanningAgent {
    session: AgentSession,
    request: PlanningRequest,
    limits: AgentSettings,
    sandbox: PathBuf,
}

impl PlanningAgent {
    pub fn new(request: PlanningRequest, deps: &AgentDeps, sandbox: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let sandbox = sandbox.into();
        let mut session = AgentSession::new(
            deps.session.clone().for_agent("planning"),
            deps.provider.clone(),
            ToolContext::new(&sandbox),
            deps.run_log.clone(),
        );
        session.bind_tools(
            Dispatcher::new(
                ToolRegistry::for_toolset(Toolset::Planning),
                deps.executor.clone(),
                Box::new(AcceptAll),
                SchemaHints::new(&sandbox),
            )
            .with_output_limit(deps.session.context.max_characters_to_log),
        )?;
        Ok(Self {
            session,
            request,
            limits: deps.limits.clone(),
            sandbox,
        })
    }

    pub fn session(&self) -> &AgentSession {
        &self.session
    }

    pub fn accounting(&self) -> &RunAccounting {
        self.session.accounting()
    }

    /// Run planning to completion and write the run record.
    #[instrument(skip_all, fields(agent = "planning", pdb_id = %self.request.pdb_id))]
    pub async fn run(&mut self) -> Result<Plan, EngineError> {
        let result = self.plan().await;
        self.session.finish(result).await
    }

    async fn plan(&mut self) -> Result<Plan, EngineError> {
        let ligand = self
            .request
            .ligand
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(LigandCode::parse)
            .transpose()?;
        match &ligand {
            Some(code) => info!(ligand = %code, "ligand requested"),
            None => info!("defining system without a ligand"),
        }
        for (what, value) in [
            ("temperature", self.request.temperature_k),
            ("duration", self.request.duration_ns),
        ] {
            if let Some(v) = value.filter(|v| !(v.is_finite() && *v > 0.0)) {
                return Err(EngineError::UnrecoverableInput(format!("{what} must be positive, got {v}")));
            }
        }

        self.session
            .push_system(prompts::planning_system(&self.sandbox.display().to_string()));

        let pdb_file_path = self.locate_structure().await?;
        if let Some(code) = &ligand {
            check_ligand(&pdb_file_path, code).await?;
        }

        let temperature_k = match self.request.temperature_k {
            Some(t) => t,
            None => {
                self.ask_parameter(
                    "temperature",
                    prompts::TEMPERATURE_QUESTION,
                    extract_temperature,
                    self.limits.default_temperature_k,
                )
                .await?
            }
        };
        info!(temperature_k, "simulation temperature");

        let duration_ns = match self.request.duration_ns {
            Some(d) => d,
            None => {
                self.ask_parameter(
                    "duration",
                    prompts::DURATION_QUESTION,
                    extract_duration,
                    self.limits.default_duration_ns,
                )
                .await?
            }
        };
        info!(duration_ns, "simulation duration");

        let parameters = SimulationParameters {
            temperature_k,
            duration_ns,
        };
        self.session.set_parameters(parameters);
        let plan = Plan::new(self.sandbox.clone(), pdb_file_path, ligand, parameters);
        info!(
            steps = ?plan.step_names(),
            pdb_file = %plan.pdb_file_path.display(),
            "plan generated"
        );
        Ok(plan)
    }

    /// Prompt until a structure file shows up in the sandbox.
    async fn locate_structure(&mut self) -> Result<PathBuf, EngineError> {
        let prompt = prompts::structure_request(&self.request.pdb_id);
        let attempts = self.limits.max_structure_attempts;
        for attempt in 1..=attempts {
            let reply = self.session.prompt(prompt.as_str()).await?;
            self.session.handle_reply(reply).await?;
            if let Some(path) = structure_files(&self.sandbox).into_iter().next() {
                info!(attempt, path = %path.display(), "structure file available");
                return Ok(path);
            }
            debug!(attempt, "no structure file yet");
        }
        Err(EngineError::PreconditionUnmet {
            what: "structure file".into(),
            attempts,
        })
    }

    /// Ask `question` until the model answers in text, then parse the answer.
    /// Unparseable answers and exhausted attempts fall back to `default`.
    async fn ask_parameter(
        &mut self,
        what: &'static str,
        question: &str,
        extract: fn(&str) -> Option<f64>,
        default: f64,
    ) -> Result<f64, EngineError> {
        let attempts = self.limits.max_parameter_attempts;
        for attempt in 1..=attempts {
            let reply = self.session.prompt(question).await?;
            match self.session.handle_reply(reply).await? {
                TurnOutcome::Answered(text) => {
                    let value = extract(&text).unwrap_or_else(|| {
                        warn!(what, default, "no value found in answer; using default");
                        default
                    });
                    info!(what, value, rationale = %text, "parameter chosen");
                    return Ok(value);
                }
                TurnOutcome::ToolsRun(executions) => {
                    debug!(what, attempt, tools = executions.len(), "model used tools before answering");
                }
            }
        }
        warn!(what, attempts, default, "model never answered; using default");
        Ok(default)
    }
}

/// The requested ligand must be a non-covalent HETATM residue of the structure.
async fn check_ligand(pdb: &Path, code: &LigandCode) -> Result<(), EngineError> {
    let text = tokio::fs::read_to_string(pdb)
        .await
        .map_err(EngineError::io(pdb))?;
    let scan = scan_ligand(&text, code.as_str());
    if !scan.present() {
        return Err(EngineError::UnrecoverableInput(format!(
            "ligand {code} does not appear as a HETATM residue in {}",
            pdb.display()
        )));
    }
    if scan.covalent {
        return Err(EngineError::UnrecoverableInput(format!(
            "ligand {code} is covalently bound (LINK record) in {}",
            pdb.display()
        )));
    }
    if scan.copies.len() > 1 {
        warn!(
            ligand = %code,
            copies = scan.copies.len(),
            first = %scan.copies[0],
            "several copies of the ligand; only the first is simulated"
        );
    }
    Ok(())
}
