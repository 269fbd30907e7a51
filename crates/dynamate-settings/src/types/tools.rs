use serde::{Deserialize, Serialize};

/// Tool configuration: external program names, download source, paper search.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolSettings {
    pub programs: ProgramSettings,
    /// Base URL of the RCSB file download service.
    pub rcsb_base_url: String,
    pub fetch_timeout_secs: u64,
    pub papers: PaperSearchSettings,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            programs: ProgramSettings::default(),
            rcsb_base_url: "https://files.rcsb.org/download".to_string(),
            fetch_timeout_secs: 60,
            papers: PaperSearchSettings::default(),
        }
    }
}

/// Executable names (or absolute paths) of the third-party programs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgramSettings {
    pub bash: String,
    pub obabel: String,
    pub antechamber: String,
    pub parmchk2: String,
    pub pdbfixer: String,
    pub gmx_mmpbsa: String,
}

impl Default for ProgramSettings {
    fn default() -> Self {
        Self {
            bash: "bash".to_string(),
            obabel: "obabel".to_string(),
            antechamber: "antechamber".to_string(),
            parmchk2: "parmchk2".to_string(),
            pdbfixer: "pdbfixer".to_string(),
            gmx_mmpbsa: "gmx_MMPBSA".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PaperSearchSettings {
    /// Passage size in characters.
    pub chunk_chars: usize,
    /// Passages returned per query.
    pub top_k: usize,
    /// File extensions indexed, without the dot.
    pub extensions: Vec<String>,
}

impl Default for PaperSearchSettings {
    fn default() -> Self {
        Self {
            chunk_chars: 800,
            top_k: 8,
            extensions: vec!["txt".to_string(), "md".to_string()],
        }
    }
}
