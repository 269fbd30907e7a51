//! Ligand force-field parameterisation with antechamber (GAFF, AM1-BCC charges).

use std::ffi::OsStr;
use std::path::Path;

use dynamate_settings::ProgramSettings;
use tracing::{debug, info, warn};

use crate::call::ParamLigandArgs;
use crate::error::ToolFault;
use crate::files::{read_input, write_output};
use crate::process::{run_program, ProcessOutput};
use crate::sandbox::ToolContext;

/// Sum of the partial charges in a mol2 `@<TRIPOS>ATOM` section. `None` when the
/// section is missing or holds no parsable atom line.
pub fn mol2_net_charge(text: &str) -> Option<f64> {
    let mut in_atoms = false;
    let mut total = 0.0;
    let mut atoms = 0;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("@<TRIPOS>") {
            in_atoms = trimmed == "@<TRIPOS>ATOM";
            continue;
        }
        if !in_atoms || trimmed.is_empty() {
            continue;
        }
        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if fields.len() < 9 {
            continue;
        }
        if let Some(charge) = fields.last().and_then(|c| c.parse::<f64>().ok()) {
            total += charge;
            atoms += 1;
        }
    }
    (atoms > 0).then_some(total)
}

/// Prepi text after forcing its atom charges to sum to an integer.
#[derive(Clone, Debug, PartialEq)]
pub struct PrepiBalance {
    pub text: String,
    pub total: f64,
    pub target: f64,
    /// False when the charges already summed to the target.
    pub adjusted: bool,
}

fn prepi_section_end(line: &str) -> bool {
    matches!(line.trim(), "LOOP" | "IMPROPER" | "DONE" | "STOP")
}

/// An atom line has at least eight fields, an integer index and a numeric charge last.
fn prepi_charge(line: &str) -> Option<f64> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 8 || fields[0].parse::<u32>().is_err() {
        return None;
    }
    fields.last()?.parse().ok()
}

/// Move the rounding residue of the prepi atom charges onto the last atom.
pub fn balance_prepi_charges(text: &str) -> PrepiBalance {
    let lines: Vec<&str> = text.lines().collect();
    let mut total = 0.0;
    let mut last_atom = None;

    for (idx, line) in lines.iter().enumerate() {
        if prepi_section_end(line) {
            break;
        }
        if let Some(charge) = prepi_charge(line) {
            total += charge;
            last_atom = Some((idx, charge));
        }
    }

    let target = total.round();
    let delta = target - total;
    let mut out: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    let mut adjusted = false;

    if let Some((idx, charge)) = last_atom {
        if delta.abs() > 1e-9 {
            let line = lines[idx];
            let trimmed = line.trim_end();
            if let Some(start) = trimmed.rfind(char::is_whitespace) {
                out[idx] = format!("{}{:.6}", &trimmed[..=start], charge + delta);
                adjusted = true;
            }
        }
    }

    let mut text_out = out.join("\n");
    if text.ends_with('\n') {
        text_out.push('\n');
    }
    PrepiBalance {
        text: text_out,
        total,
        target,
        adjusted,
    }
}

fn failure(run: &ProcessOutput) -> String {
    format!("Ligand parameterization failed with error: {}", run.combined())
}

/// Net formal charge of the ligand, from a throwaway Gasteiger-charged mol2.
async fn formal_charge(obabel: &str, ligand: &Path, sandbox: &Path) -> Result<Result<i64, String>, ToolFault> {
    let tmp = sandbox.join("ligand_tmp.mol2");
    let run = run_program(obabel, [ligand.as_os_str(), OsStr::new("-O"), tmp.as_os_str()], sandbox).await?;
    if !run.success {
        return Ok(Err(failure(&run)));
    }
    let charge = match read_input(&tmp).await {
        Ok(text) => mol2_net_charge(&text),
        Err(narration) => return Ok(Err(format!("Ligand parameterization failed with error: {narration}"))),
    };
    if let Err(e) = tokio::fs::remove_file(&tmp).await {
        debug!(error = %e, "could not remove temporary mol2");
    }
    Ok(charge.map(|c| c.round() as i64).ok_or_else(|| {
        format!(
            "Ligand parameterization failed with error: no partial charges found in {}",
            tmp.display()
        )
    }))
}

pub async fn param_ligand(
    programs: &ProgramSettings,
    ctx: &ToolContext,
    args: &ParamLigandArgs,
) -> Result<String, ToolFault> {
    let ligand_file = or_narrate!(ctx.resolve(&args.ligand_file));
    if !ligand_file.is_file() {
        return Ok(format!("File not found: {}", ligand_file.display()));
    }
    let name = args.ligand_name.trim();
    let mol2 = or_narrate!(ctx.resolve(&format!("{name}.mol2")));
    let prepi = or_narrate!(ctx.resolve(&format!("{name}.prepi")));
    let frcmod = or_narrate!(ctx.resolve(&format!("{name}.frcmod")));
    let fixed = or_narrate!(ctx.resolve(&format!("{name}_fixed.prepi")));
    let dir = &ctx.sandbox;

    let charge = or_narrate!(formal_charge(&programs.obabel, &ligand_file, dir).await?);
    info!(ligand = name, charge, "ligand net charge");

    let run = run_program(
        &programs.antechamber,
        [
            ligand_file.display().to_string(),
            "-fi".into(),
            "pdb".into(),
            "-o".into(),
            mol2.display().to_string(),
            "-fo".into(),
            "mol2".into(),
            "-c".into(),
            "bcc".into(),
            "-nc".into(),
            charge.to_string(),
            "-s".into(),
            "2".into(),
        ],
        dir,
    )
    .await?;
    if !run.success {
        return Ok(failure(&run));
    }

    let mol2_text = or_narrate!(read_input(&mol2).await);
    write_output(&mol2, &mol2_text.replace("UNL", name)).await?;

    let run = run_program(
        &programs.antechamber,
        [
            mol2.display().to_string(),
            "-fi".into(),
            "mol2".into(),
            "-o".into(),
            prepi.display().to_string(),
            "-fo".into(),
            "prepi".into(),
            "-c".into(),
            "bcc".into(),
        ],
        dir,
    )
    .await?;
    if !run.success {
        return Ok(failure(&run));
    }

    let run = run_program(
        &programs.parmchk2,
        [
            OsStr::new("-i"),
            mol2.as_os_str(),
            OsStr::new("-f"),
            OsStr::new("mol2"),
            OsStr::new("-o"),
            frcmod.as_os_str(),
        ],
        dir,
    )
    .await?;
    if !run.success {
        return Ok(failure(&run));
    }

    let prepi_text = or_narrate!(read_input(&prepi).await);
    let balance = balance_prepi_charges(&prepi_text);
    if balance.adjusted {
        warn!(
            ligand = name,
            total = balance.total,
            target = balance.target,
            "prepi charges did not sum to an integer, last atom adjusted"
        );
    }
    write_output(&fixed, &balance.text).await?;

    Ok(format!(
        "Ligand parameterisation complete. File saved to {}/{name}_fixed.prepi",
        dir.display()
    ))
}
