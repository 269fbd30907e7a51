//! Model-facing tool schemas.
//!
//! Descriptions name the concrete files of the current run, so they are rebuilt from
//! [`SchemaHints`] whenever the plan changes.

use std::path::PathBuf;

use dynamate_core::tools::ToolDefinition;
use serde_json::{json, Value};

use crate::call::{ToolKind, Toolset};

/// What the schema text may mention about the current run.
#[derive(Clone, Debug, Default)]
pub struct SchemaHints {
    pub sandbox: PathBuf,
    pub pdb_id: Option<String>,
    pub ligand: Option<String>,
}

impl SchemaHints {
    pub fn new(sandbox: impl Into<PathBuf>) -> Self {
        Self {
            sandbox: sandbox.into(),
            ..Self::default()
        }
    }

    pub fn with_structure(mut self, pdb_id: impl Into<String>, ligand: Option<String>) -> Self {
        self.pdb_id = Some(pdb_id.into());
        self.ligand = ligand;
        self
    }

    fn id(&self) -> &str {
        self.pdb_id.as_deref().unwrap_or("<PDB_ID>")
    }

    fn lig(&self) -> &str {
        self.ligand.as_deref().unwrap_or("<LIG>")
    }
}

fn object(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn text(description: impl Into<String>) -> Value {
    json!({ "type": "string", "description": description.into() })
}

fn number(description: impl Into<String>) -> Value {
    json!({ "type": ["number", "string"], "description": description.into() })
}

/// Definitions for every tool in `toolset`, in toolset order.
pub fn definitions(toolset: Toolset, hints: &SchemaHints) -> Vec<ToolDefinition> {
    toolset.kinds().iter().map(|&kind| definition(kind, hints)).collect()
}

pub fn definition(kind: ToolKind, hints: &SchemaHints) -> ToolDefinition {
    let (description, parameters) = describe(kind, hints);
    ToolDefinition::new(kind.name(), description, parameters)
}

fn describe(kind: ToolKind, h: &SchemaHints) -> (String, Value) {
    let dir = h.sandbox.display();
    let id = h.id();
    let lig = h.lig();
    let ligand_code = text(format!(
        "Three-character residue name of the ligand in capital letters or digits ({lig}). Omit when the system has no ligand."
    ));

    match kind {
        ToolKind::FindInput => (
            "List the structure files the user uploaded. Always searches the sandbox directory.".into(),
            object(json!({}), &[]),
        ),
        ToolKind::ReadFile => (
            format!(
                "Read a text file inside the sandbox {dir}. Use it to inspect logs, MDP parameter files \
                 or generated outputs. Diagnostic only: it does not run or modify anything."
            ),
            object(
                json!({ "path": text("File to read, relative to the sandbox or an absolute path inside it.") }),
                &["path"],
            ),
        ),
        ToolKind::ListFiles => (
            "List files and subdirectories of the sandbox, e.g. to confirm that topol.top or md.xtc \
             exist after a stage. Diagnostic only."
                .into(),
            object(
                json!({ "path": text("Optional subdirectory of the sandbox to list. Defaults to the sandbox itself.") }),
                &[],
            ),
        ),
        ToolKind::EditFile => (
            "Edit a text file in the sandbox by replacing every occurrence of old_text with new_text. \
             Creates the file with new_text when it does not exist or old_text is empty. Use it to \
             adjust MDP parameters (e.g. nsteps in md.mdp) before a run."
                .into(),
            object(
                json!({
                    "path": text("File to edit, relative to the sandbox."),
                    "old_text": text("Exact text to replace. Empty to create or overwrite the file."),
                    "new_text": text("Replacement text."),
                }),
                &["path", "new_text"],
            ),
        ),
        ToolKind::FetchAndSavePdb => (
            format!(
                "Download a structure from the RCSB Protein Data Bank by its PDB ID and save it as \
                 <ID>.pdb (upper case) in the sandbox {dir}."
            ),
            object(
                json!({
                    "pdb_id": text("Four-character PDB ID, e.g. 1ABC."),
                    "output_pdb": text("Name of the saved file. The file is always named after the upper-case ID."),
                }),
                &["pdb_id"],
            ),
        ),
        ToolKind::FixPdbFile => (
            "Repair a PDB file with pdbfixer: add missing heavy atoms and drop heterogens. Writes \
             <stem>_fixed.pdb next to the input. Use it when tleap complains about missing atoms."
                .into(),
            object(json!({ "input_pdb": text("PDB file in the sandbox to repair.") }), &["input_pdb"]),
        ),
        ToolKind::PreparePdbFileLigand => (
            format!(
                "First step for protein-only and protein-ligand systems. Writes {id}_prepared.pdb with the \
                 protein only (no solvent, ions or ligand). When a ligand is given, its first copy is \
                 extracted to {lig}.pdb, protonated at pH 7 and saved as {lig}_h.pdb with cleaned atom \
                 names. Check the literature for the expected ligand protonation state."
            ),
            object(
                json!({
                    "pdb_id": text(format!("PDB ID of the structure ({id}). {id}.pdb must exist in the sandbox.")),
                    "ligand_name": ligand_code,
                }),
                &["pdb_id"],
            ),
        ),
        ToolKind::AddCaps => (
            format!(
                "Add ACE and NME caps to the N- and C-termini of every chain. Run after \
                 prepare_pdb_file_ligand. Input {id}_prepared.pdb, output {id}_prepared_capped.pdb."
            ),
            object(
                json!({
                    "input_pdb": text(format!("Protein-only PDB file to cap, normally {id}_prepared.pdb.")),
                    "pdb_id": text(format!("PDB ID of the structure ({id}).")),
                }),
                &["input_pdb", "pdb_id"],
            ),
        ),
        ToolKind::RenameHistidines => (
            format!(
                "Rename HIS residues by protonation state: HID when only HD1 is present, HIE when only \
                 HE2 is present, HIP when both are. Run after add_caps. Input {id}_prepared_capped.pdb, \
                 output {id}_prepared_capped_his.pdb."
            ),
            object(
                json!({
                    "input_pdb": text(format!("PDB file to process, normally {id}_prepared_capped.pdb.")),
                    "pdb_id": text(format!("PDB ID of the structure ({id}).")),
                }),
                &["input_pdb", "pdb_id"],
            ),
        ),
        ToolKind::RunTleap => (
            format!(
                "Build the solvated protein-only system with tleap and the ff14SB force field, then \
                 convert it to GROMACS format (topol.top, {id}.gro). Use ONLY for systems without a \
                 ligand. If tleap fails, inspect the PDB for missing atoms or nonstandard residues."
            ),
            object(
                json!({
                    "input_pdb": text(format!("Prepared protein PDB file, normally {id}_prepared_capped_his.pdb.")),
                    "pdb_id": text(format!("PDB ID of the structure ({id}).")),
                }),
                &["input_pdb", "pdb_id"],
            ),
        ),
        ToolKind::ParamLigand => (
            format!(
                "Parameterize the ligand with antechamber (GAFF, AM1-BCC charges) and parmchk2. The net \
                 charge is computed from the structure. Writes {lig}.mol2, {lig}.prepi, {lig}.frcmod and \
                 {lig}_fixed.prepi (charges balanced to an integer total)."
            ),
            object(
                json!({
                    "ligand_file": text(format!("Protonated ligand PDB file, normally {lig}_h.pdb.")),
                    "ligand_name": text(format!("Three-character residue name of the ligand ({lig}).")),
                }),
                &["ligand_file", "ligand_name"],
            ),
        ),
        ToolKind::RunTleapLigand => (
            format!(
                "Build the solvated protein-ligand complex with tleap (ff14SB for the protein, GAFF for \
                 the ligand) and convert it to GROMACS format (topol.top, complex.gro). Use ONLY when a \
                 ligand is simulated, after param_ligand. Protein and ligand are first merged into \
                 complex.pdb."
            ),
            object(
                json!({
                    "input_pdb": text(format!("Prepared protein PDB file, normally {id}_prepared_capped_his.pdb.")),
                    "pdb_id": text(format!("PDB ID of the structure ({id}).")),
                    "ligand_file": text(format!("Protonated ligand PDB file, normally {lig}_h.pdb.")),
                    "ligand_name": text(format!("Three-character residue name of the ligand ({lig}).")),
                }),
                &["input_pdb", "pdb_id", "ligand_file", "ligand_name"],
            ),
        ),
        ToolKind::GromacsEquil => (
            "Run energy minimization, NVT and NPT equilibration with GROMACS. Run after the topology \
             is built. Position restraints are added to topol.top (a backup is kept as \
             topol_without_posre.top) and the MDP temperature is set. Returns the GROMACS log."
                .into(),
            object(
                json!({
                    "input_gro": text(format!("Structure to equilibrate: complex.gro with a ligand, otherwise {id}.gro.")),
                    "md_temp": number("Simulation temperature in Kelvin. Defaults to the planned temperature."),
                    "ligand_name": ligand_code.clone(),
                    "ligand_file": text(format!("Protonated ligand PDB file ({lig}_h.pdb). Omit when the system has no ligand.")),
                }),
                &["input_gro"],
            ),
        ),
        ToolKind::GromacsProduction => (
            "Run the production MD from the NPT checkpoint. Run after gromacs_equil succeeded. The run \
             length (nsteps) and temperature are written into md.mdp first. The trajectory is md.xtc."
                .into(),
            object(
                json!({
                    "input_gro": text("Equilibrated structure, normally npt.gro."),
                    "npt_cpt_file": text("NPT checkpoint, normally npt.cpt."),
                    "md_temp": number("Simulation temperature in Kelvin. Defaults to the planned temperature."),
                    "md_duration": number("Production length in nanoseconds. Defaults to the planned duration."),
                    "ligand_name": ligand_code.clone(),
                }),
                &["input_gro", "npt_cpt_file"],
            ),
        ),
        ToolKind::GromacsAnalysis => (
            "Analyse the production trajectory: remove PBC (md_noPBC.xtc), RMSD against the first \
             frame and the crystal structure, RMSF, radius of gyration and hydrogen bond counts \
             (backbone, side chains, protein-ligand when a ligand is present)."
                .into(),
            object(
                json!({
                    "input_xtc": text("Production trajectory, normally md.xtc."),
                    "ligand_name": ligand_code,
                }),
                &["input_xtc"],
            ),
        ),
        ToolKind::RunGmxMmpbsa => (
            "Estimate the protein-ligand binding free energy with gmx_MMPBSA. Protein-ligand systems \
             only, after gromacs_analysis produced md_noPBC.xtc. nsteps, nstxout-compressed and the \
             temperature are in md.mdp. Results go to gmx_MMPBSA/FINAL_RESULTS_MMPBSA.dat; the binding \
             energy is the last ΔTOTAL line."
                .into(),
            object(
                json!({
                    "pdb_id": text(format!("PDB ID of the structure ({id}).")),
                    "nsteps": number("Number of production MD steps, from md.mdp."),
                    "nstxout_compressed": number("Steps between compressed coordinate frames, from md.mdp."),
                    "temp": number("Simulation temperature in Kelvin, from md.mdp."),
                }),
                &["pdb_id", "nsteps", "nstxout_compressed", "temp"],
            ),
        ),
        ToolKind::SearchPapers => (
            "Answer system-specific questions from the local literature collection. Ask one specific \
             question; passages are returned with the paper they come from."
                .into(),
            object(json!({ "query": text("The question to look up.") }), &["query"]),
        ),
    }
}
