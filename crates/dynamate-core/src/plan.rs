use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Three-character residue name of a ligand as it appears in HETATM records
/// (e.g. `ATP`, `J5E`).
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LigandCode(String);

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid ligand code {0:?}: expected exactly three characters from A-Z or 0-9")]
pub struct InvalidLigandCode(pub String);

impl LigandCode {
    pub fn parse(raw: &str) -> Result<Self, InvalidLigandCode> {
        let valid = raw.len() == 3
            && raw
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit());
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(InvalidLigandCode(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LigandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LigandCode {
    type Err = InvalidLigandCode;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for LigandCode {
    type Error = InvalidLigandCode;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<LigandCode> for String {
    fn from(code: LigandCode) -> Self {
        code.0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub step: String,
    pub description: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationParameters {
    pub temperature_k: f64,
    pub duration_ns: f64,
}

/// Produced once by the planning phase and handed to execution by value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub sandbox_dir: PathBuf,
    pub pdb_file_path: PathBuf,
    pub ligand: Option<LigandCode>,
    pub plan: Vec<PlanStep>,
    pub parameters: SimulationParameters,
}

/// Production timestep in picoseconds.
pub const PRODUCTION_TIMESTEP_PS: f64 = 0.002;

impl SimulationParameters {
    /// Number of integration steps for the production run.
    pub fn production_steps(&self) -> u64 {
        let steps = self.duration_ns * 1000.0 / PRODUCTION_TIMESTEP_PS;
        steps.round().max(0.0) as u64
    }
}

impl PlanStep {
    fn new(step: &str, description: &str) -> Self {
        Self {
            step: step.to_string(),
            description: description.to_string(),
        }
    }
}

/// The fixed pipeline for a structure, with or without a ligand.
pub fn pipeline_steps(with_ligand: bool) -> Vec<PlanStep> {
    let mut steps = vec![PlanStep::new(
        "prepare_pdb_file_ligand",
        if with_ligand {
            "Clean the PDB file and split out the ligand for a protein-ligand system."
        } else {
            "Clean the PDB file for a protein-only system."
        },
    )];
    steps.push(PlanStep::new("add_caps", "Add ACE and NME terminal caps to every chain."));
    steps.push(PlanStep::new(
        "rename_histidines",
        "Rename HIS to HID, HIE or HIP from the protonation state.",
    ));
    if with_ligand {
        steps.push(PlanStep::new(
            "param_ligand",
            "Parameterize the ligand with antechamber and parmchk2.",
        ));
        steps.push(PlanStep::new(
            "run_tleap_ligand",
            "Build and solvate the complex topology with tleap.",
        ));
    } else {
        steps.push(PlanStep::new(
            "run_tleap",
            "Build and solvate the protein topology with tleap.",
        ));
    }
    steps.push(PlanStep::new(
        "gromacs_equil",
        "Run energy minimization and NVT/NPT equilibration.",
    ));
    steps.push(PlanStep::new("gromacs_production", "Run the production MD simulation."));
    steps.push(PlanStep::new("gromacs_analysis", "Analyse the production trajectory."));
    steps
}

impl Plan {
    pub fn new(
        sandbox_dir: PathBuf,
        pdb_file_path: PathBuf,
        ligand: Option<LigandCode>,
        parameters: SimulationParameters,
    ) -> Self {
        Self {
            plan: pipeline_steps(ligand.is_some()),
            sandbox_dir,
            pdb_file_path,
            ligand,
            parameters,
        }
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.plan.iter().map(|s| s.step.as_str()).collect()
    }

    /// Structure identifier derived from the structure file name (`1ABC.pdb` -> `1ABC`).
    pub fn pdb_id(&self) -> String {
        self.pdb_file_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ligand_code_accepts_three_upper_alnum() {
        assert!(LigandCode::parse("ATP").is_ok());
        assert!(LigandCode::parse("J5E").is_ok());
        assert!(LigandCode::parse("123").is_ok());
    }

    #[test]
    fn ligand_code_rejects_bad_shapes() {
        for bad in ["AB", "ABCD", "atp", "A-B", "", "ÄBC"] {
            assert!(LigandCode::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn ligand_code_serde_validates() {
        let code: LigandCode = serde_json::from_str(r#""ATP""#).unwrap();
        assert_eq!(code.as_str(), "ATP");
        assert!(serde_json::from_str::<LigandCode>(r#""xx""#).is_err());
    }

    #[test]
    fn steps_with_ligand() {
        let names: Vec<String> = pipeline_steps(true).into_iter().map(|s| s.step).collect();
        assert_eq!(
            names,
            [
                "prepare_pdb_file_ligand",
                "add_caps",
                "rename_histidines",
                "param_ligand",
                "run_tleap_ligand",
                "gromacs_equil",
                "gromacs_production",
                "gromacs_analysis",
            ]
        );
    }

    #[test]
    fn steps_without_ligand() {
        let names: Vec<String> = pipeline_steps(false).into_iter().map(|s| s.step).collect();
        assert!(!names.contains(&"param_ligand".to_string()));
        assert!(names.contains(&"run_tleap".to_string()));
        assert!(!names.contains(&"run_tleap_ligand".to_string()));
        assert_eq!(names.len(), 7);
    }

    #[test]
    fn plan_serializes_interchange_shape() {
        let plan = Plan::new(
            PathBuf::from("/tmp/run"),
            PathBuf::from("/tmp/run/1ABC.pdb"),
            Some(LigandCode::parse("ATP").unwrap()),
            SimulationParameters {
                temperature_k: 300.0,
                duration_ns: 1.0,
            },
        );
        let value = serde_json::to_value(&plan).unwrap();
        assert_eq!(value["ligand"], "ATP");
        assert_eq!(value["plan"][0]["step"], "prepare_pdb_file_ligand");
        assert_eq!(value["parameters"]["temperature_k"], 300.0);
        assert_eq!(plan.pdb_id(), "1ABC");

        let parsed: Plan = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, plan);
    }

    #[test]
    fn production_steps_from_duration() {
        let params = SimulationParameters {
            temperature_k: 310.0,
            duration_ns: 0.01,
        };
        assert_eq!(params.production_steps(), 5000);
        let params = SimulationParameters {
            temperature_k: 310.0,
            duration_ns: 10.0,
        };
        assert_eq!(params.production_steps(), 5_000_000);
    }
}
