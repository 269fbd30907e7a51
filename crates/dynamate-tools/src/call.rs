use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Every tool the agents can call. Closed: adding a tool means adding a variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ToolKind {
    FindInput,
    ReadFile,
    ListFiles,
    EditFile,
    FetchAndSavePdb,
    FixPdbFile,
    PreparePdbFileLigand,
    AddCaps,
    RenameHistidines,
    ParamLigand,
    RunTleap,
    RunTleapLigand,
    GromacsEquil,
    GromacsProduction,
    GromacsAnalysis,
    RunGmxMmpbsa,
    SearchPapers,
}

/// Which agent a tool schema is built for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Toolset {
    Planning,
    Execution,
}

impl ToolKind {
    pub const ALL: [ToolKind; 17] = [
        ToolKind::FindInput,
        ToolKind::ReadFile,
        ToolKind::ListFiles,
        ToolKind::EditFile,
        ToolKind::FetchAndSavePdb,
        ToolKind::FixPdbFile,
        ToolKind::PreparePdbFileLigand,
        ToolKind::AddCaps,
        ToolKind::RenameHistidines,
        ToolKind::ParamLigand,
        ToolKind::RunTleap,
        ToolKind::RunTleapLigand,
        ToolKind::GromacsEquil,
        ToolKind::GromacsProduction,
        ToolKind::GromacsAnalysis,
        ToolKind::RunGmxMmpbsa,
        ToolKind::SearchPapers,
    ];

    /// Name the model uses for this tool.
    pub fn name(self) -> &'static str {
        match self {
            ToolKind::FindInput => "find_input",
            ToolKind::ReadFile => "read_file",
            ToolKind::ListFiles => "list_files",
            ToolKind::EditFile => "edit_file",
            ToolKind::FetchAndSavePdb => "fetch_and_save_pdb",
            ToolKind::FixPdbFile => "fix_pdb_file",
            ToolKind::PreparePdbFileLigand => "prepare_pdb_file_ligand",
            ToolKind::AddCaps => "add_caps",
            ToolKind::RenameHistidines => "rename_histidines",
            ToolKind::ParamLigand => "param_ligand",
            ToolKind::RunTleap => "run_tleap",
            ToolKind::RunTleapLigand => "run_tleap_ligand",
            ToolKind::GromacsEquil => "gromacs_equil",
            ToolKind::GromacsProduction => "gromacs_production",
            ToolKind::GromacsAnalysis => "gromacs_analysis",
            ToolKind::RunGmxMmpbsa => "run_gmxMMPBSA",
            ToolKind::SearchPapers => "search_papers",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

impl Toolset {
    pub fn kinds(self) -> &'static [ToolKind] {
        match self {
            Toolset::Planning => &[
                ToolKind::FindInput,
                ToolKind::ReadFile,
                ToolKind::FetchAndSavePdb,
                ToolKind::SearchPapers,
            ],
            Toolset::Execution => &[
                ToolKind::PreparePdbFileLigand,
                ToolKind::AddCaps,
                ToolKind::RenameHistidines,
                ToolKind::RunTleap,
                ToolKind::ParamLigand,
                ToolKind::RunTleapLigand,
                ToolKind::GromacsEquil,
                ToolKind::GromacsProduction,
                ToolKind::GromacsAnalysis,
                ToolKind::RunGmxMmpbsa,
                ToolKind::FindInput,
                ToolKind::ReadFile,
                ToolKind::ListFiles,
                ToolKind::EditFile,
                ToolKind::SearchPapers,
                ToolKind::FixPdbFile,
            ],
        }
    }
}

// --- Typed arguments ---
//
// Unknown fields are ignored: models routinely add a `sandbox_dir` even though every
// tool acts inside the session sandbox.

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ReadFileArgs {
    pub path: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ListFilesArgs {
    /// Sub-directory of the sandbox; the sandbox itself when absent.
    #[serde(default, deserialize_with = "optional_text")]
    pub path: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct EditFileArgs {
    pub path: String,
    #[serde(default)]
    pub old_text: String,
    #[serde(default)]
    pub new_text: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct FetchPdbArgs {
    pub pdb_id: String,
    /// Accepted for compatibility; the file is always saved as `{ID}.pdb`.
    #[serde(default, deserialize_with = "optional_text")]
    pub output_pdb: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct FixPdbArgs {
    pub input_pdb: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct PreparePdbArgs {
    pub pdb_id: String,
    #[serde(default, deserialize_with = "optional_ligand")]
    pub ligand_name: Option<String>,
}

/// Arguments shared by `add_caps`, `rename_histidines` and `run_tleap`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct StructureArgs {
    pub input_pdb: String,
    pub pdb_id: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ParamLigandArgs {
    pub ligand_file: String,
    pub ligand_name: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct TleapLigandArgs {
    pub input_pdb: String,
    pub pdb_id: String,
    pub ligand_file: String,
    pub ligand_name: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct EquilArgs {
    pub input_gro: String,
    #[serde(default, deserialize_with = "optional_number")]
    pub md_temp: Option<f64>,
    #[serde(default, deserialize_with = "optional_ligand")]
    pub ligand_name: Option<String>,
    #[serde(default, deserialize_with = "optional_ligand")]
    pub ligand_file: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ProductionArgs {
    pub input_gro: String,
    pub npt_cpt_file: String,
    #[serde(default, deserialize_with = "optional_number")]
    pub md_temp: Option<f64>,
    #[serde(default, deserialize_with = "optional_number")]
    pub md_duration: Option<f64>,
    #[serde(default, deserialize_with = "optional_ligand")]
    pub ligand_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct AnalysisArgs {
    pub input_xtc: String,
    #[serde(default, deserialize_with = "optional_ligand")]
    pub ligand_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct MmpbsaArgs {
    pub pdb_id: String,
    #[serde(deserialize_with = "number")]
    pub nsteps: f64,
    #[serde(deserialize_with = "number")]
    pub nstxout_compressed: f64,
    #[serde(alias = "md_temp", deserialize_with = "number")]
    pub temp: f64,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct SearchPapersArgs {
    pub query: String,
}

/// A tool call with its arguments decoded into the tool's own record.
#[derive(Clone, Debug, PartialEq)]
pub enum ToolCall {
    FindInput,
    ReadFile(ReadFileArgs),
    ListFiles(ListFilesArgs),
    EditFile(EditFileArgs),
    FetchAndSavePdb(FetchPdbArgs),
    FixPdbFile(FixPdbArgs),
    PreparePdbFileLigand(PreparePdbArgs),
    AddCaps(StructureArgs),
    RenameHistidines(StructureArgs),
    ParamLigand(ParamLigandArgs),
    RunTleap(StructureArgs),
    RunTleapLigand(TleapLigandArgs),
    GromacsEquil(EquilArgs),
    GromacsProduction(ProductionArgs),
    GromacsAnalysis(AnalysisArgs),
    RunGmxMmpbsa(MmpbsaArgs),
    SearchPapers(SearchPapersArgs),
}

impl ToolCall {
    /// Decode the argument mapping for `kind`. Fails on missing required fields or
    /// wrong types.
    pub fn from_arguments(kind: ToolKind, args: &Value) -> Result<Self, serde_json::Error> {
        fn decode<T: serde::de::DeserializeOwned>(args: &Value) -> Result<T, serde_json::Error> {
            serde_json::from_value(args.clone())
        }

        Ok(match kind {
            ToolKind::FindInput => ToolCall::FindInput,
            ToolKind::ReadFile => ToolCall::ReadFile(decode(args)?),
            ToolKind::ListFiles => ToolCall::ListFiles(decode(args)?),
            ToolKind::EditFile => ToolCall::EditFile(decode(args)?),
            ToolKind::FetchAndSavePdb => ToolCall::FetchAndSavePdb(decode(args)?),
            ToolKind::FixPdbFile => ToolCall::FixPdbFile(decode(args)?),
            ToolKind::PreparePdbFileLigand => ToolCall::PreparePdbFileLigand(decode(args)?),
            ToolKind::AddCaps => ToolCall::AddCaps(decode(args)?),
            ToolKind::RenameHistidines => ToolCall::RenameHistidines(decode(args)?),
            ToolKind::ParamLigand => ToolCall::ParamLigand(decode(args)?),
            ToolKind::RunTleap => ToolCall::RunTleap(decode(args)?),
            ToolKind::RunTleapLigand => ToolCall::RunTleapLigand(decode(args)?),
            ToolKind::GromacsEquil => ToolCall::GromacsEquil(decode(args)?),
            ToolKind::GromacsProduction => ToolCall::GromacsProduction(decode(args)?),
            ToolKind::GromacsAnalysis => ToolCall::GromacsAnalysis(decode(args)?),
            ToolKind::RunGmxMmpbsa => ToolCall::RunGmxMmpbsa(decode(args)?),
            ToolKind::SearchPapers => ToolCall::SearchPapers(decode(args)?),
        })
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            ToolCall::FindInput => ToolKind::FindInput,
            ToolCall::ReadFile(_) => ToolKind::ReadFile,
            ToolCall::ListFiles(_) => ToolKind::ListFiles,
            ToolCall::EditFile(_) => ToolKind::EditFile,
            ToolCall::FetchAndSavePdb(_) => ToolKind::FetchAndSavePdb,
            ToolCall::FixPdbFile(_) => ToolKind::FixPdbFile,
            ToolCall::PreparePdbFileLigand(_) => ToolKind::PreparePdbFileLigand,
            ToolCall::AddCaps(_) => ToolKind::AddCaps,
            ToolCall::RenameHistidines(_) => ToolKind::RenameHistidines,
            ToolCall::ParamLigand(_) => ToolKind::ParamLigand,
            ToolCall::RunTleap(_) => ToolKind::RunTleap,
            ToolCall::RunTleapLigand(_) => ToolKind::RunTleapLigand,
            ToolCall::GromacsEquil(_) => ToolKind::GromacsEquil,
            ToolCall::GromacsProduction(_) => ToolKind::GromacsProduction,
            ToolCall::GromacsAnalysis(_) => ToolKind::GromacsAnalysis,
            ToolCall::RunGmxMmpbsa(_) => ToolKind::RunGmxMmpbsa,
            ToolCall::SearchPapers(_) => ToolKind::SearchPapers,
        }
    }
}

// --- Lenient field decoders ---

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(f64),
    Text(String),
}

fn parse_numeric<E: serde::de::Error>(value: NumberOrText) -> Result<f64, E> {
    match value {
        NumberOrText::Number(n) => Ok(n),
        NumberOrText::Text(s) => s
            .trim()
            .trim_end_matches(['K', 'k'])
            .trim()
            .parse()
            .map_err(|_| E::custom(format!("expected a number, got {s:?}"))),
    }
}

/// Models send numbers both as JSON numbers and as strings (`"310"`).
fn number<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    parse_numeric(NumberOrText::deserialize(d)?)
}

fn optional_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    match Option::<NumberOrText>::deserialize(d)? {
        None => Ok(None),
        Some(NumberOrText::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(v) => parse_numeric(v).map(Some),
    }
}

fn optional_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<String>::deserialize(d)?.filter(|s| !s.trim().is_empty()))
}

/// Placeholder names a model uses to mean "no ligand".
const NO_LIGAND: &[&str] = &["", "XXX", "None", "None_h", "null"];

fn optional_ligand<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<String>::deserialize(d)?
        .map(|s| s.trim().to_string())
        .filter(|s| !NO_LIGAND.contains(&s.as_str())))
}
