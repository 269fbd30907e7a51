use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use dynamate_settings::{PaperSearchSettings, PathSettings, ProgramSettings, ToolSettings};
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

use crate::call::ToolCall;
use crate::error::ToolFault;
use crate::papers::PaperIndex;
use crate::process::ScriptRunner;
use crate::sandbox::ToolContext;
use crate::{amber, files, gromacs, ligand, mmpbsa, structure};

/// Runs decoded tool calls. Domain failures come back as `Ok` narration; `Err` is
/// reserved for faults the agent cannot recover from.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> Result<String, ToolFault>;
}

/// The production executor: external programs, shell scripts, RCSB and the paper index.
pub struct Toolbox {
    client: reqwest::Client,
    programs: ProgramSettings,
    scripts: ScriptRunner,
    rcsb_base_url: String,
    paper_dir: PathBuf,
    paper_settings: PaperSearchSettings,
    papers: OnceCell<PaperIndex>,
}

impl Toolbox {
    pub fn new(tools: &ToolSettings, paths: &PathSettings) -> Result<Self, ToolFault> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(tools.fetch_timeout_secs))
            .build()
            .map_err(|e| ToolFault::Http(e.to_string()))?;
        Ok(Self {
            client,
            programs: tools.programs.clone(),
            scripts: ScriptRunner::new(tools.programs.bash.clone(), paths.scripts_dir.clone()),
            rcsb_base_url: tools.rcsb_base_url.clone(),
            paper_dir: paths.paper_dir.clone(),
            paper_settings: tools.papers.clone(),
            papers: OnceCell::new(),
        })
    }

    async fn papers(&self) -> &PaperIndex {
        self.papers
            .get_or_init(|| PaperIndex::build(&self.paper_dir, &self.paper_settings))
            .await
    }
}

#[async_trait]
impl ToolExecutor for Toolbox {
    #[instrument(skip_all, fields(tool = call.kind().name()))]
    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> Result<String, ToolFault> {
        debug!(sandbox = %ctx.sandbox.display(), "executing tool");
        let programs = &self.programs;
        match call {
            ToolCall::FindInput => files::find_input(ctx).await,
            ToolCall::ReadFile(args) => files::read_file(ctx, args).await,
            ToolCall::ListFiles(args) => files::list_files(ctx, args).await,
            ToolCall::EditFile(args) => files::edit_file(ctx, args).await,
            ToolCall::FetchAndSavePdb(args) => {
                structure::fetch_and_save_pdb(&self.client, &self.rcsb_base_url, ctx, args).await
            }
            ToolCall::FixPdbFile(args) => structure::fix_pdb_file(&programs.pdbfixer, ctx, args).await,
            ToolCall::PreparePdbFileLigand(args) => {
                structure::prepare_pdb_file_ligand(&programs.obabel, ctx, args).await
            }
            ToolCall::AddCaps(args) => structure::add_caps(ctx, args).await,
            ToolCall::RenameHistidines(args) => structure::rename_histidines(ctx, args).await,
            ToolCall::ParamLigand(args) => ligand::param_ligand(programs, ctx, args).await,
            ToolCall::RunTleap(args) => amber::run_tleap(&self.scripts, ctx, args).await,
            ToolCall::RunTleapLigand(args) => amber::run_tleap_ligand(&self.scripts, ctx, args).await,
            ToolCall::GromacsEquil(args) => {
                gromacs::gromacs_equil(&self.scripts, &programs.obabel, ctx, args).await
            }
            ToolCall::GromacsProduction(args) => gromacs::gromacs_production(&self.scripts, ctx, args).await,
            ToolCall::GromacsAnalysis(args) => gromacs::gromacs_analysis(&self.scripts, ctx, args).await,
            ToolCall::RunGmxMmpbsa(args) => mmpbsa::run_gmx_mmpbsa(&programs.gmx_mmpbsa, ctx, args).await,
            ToolCall::SearchPapers(args) => Ok(self.papers().await.answer(&args.query, self.paper_settings.top_k)),
        }
    }
}
