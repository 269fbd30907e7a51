//! GROMACS stages: equilibration, production and trajectory analysis.
//!
//! The heavy lifting happens in the shell scripts; this module prepares their inputs
//! (position-restraint includes, MDP temperature and length) and turns each script's
//! log into the tool's narration.

use std::ffi::OsStr;
use std::path::Path;

use dynamate_core::plan::SimulationParameters;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::call::{AnalysisArgs, EquilArgs, ProductionArgs};
use crate::error::ToolFault;
use crate::files::write_output;
use crate::process::{run_program, ProcessOutput, ScriptRunner};
use crate::sandbox::ToolContext;

// --- Topology position restraints ---

fn posre_block(file: &str) -> String {
    format!("; Include Position restraint file\n#ifdef POSRES\n#include \"{file}\"\n#endif\n\n")
}

/// Topology after inserting position-restraint includes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestraintInsertion {
    pub text: String,
    /// Molecule names (`system1`, `system2`, ...) that received a new include.
    pub inserted: Vec<String>,
    /// Number of distinct chain molecules found.
    pub systems: usize,
    pub ligand_inserted: bool,
}

/// Append a position-restraint include to each chain's `[ moleculetype ]` segment,
/// and one for the ligand segment when `ligand` is given. Segments already carrying
/// their include are left alone, so the edit is idempotent.
pub fn insert_position_restraints(topology: &str, ligand: Option<&str>) -> RestraintInsertion {
    let header = Regex::new(r"(?mi)^\[\s*moleculetype\s*\]").ok();
    let terminal = Regex::new(r"(?mi)^\[\s*(system|molecules)\s*\]").ok();
    let system_name = Regex::new(r"(?m)^\s*(system\d*)\b\s+\d+").ok();
    let (Some(header), Some(terminal), Some(system_name)) = (header, terminal, system_name) else {
        return unchanged(topology);
    };
    let ligand_name = ligand.and_then(|l| Regex::new(&format!(r"(?m)^\s*{}\b\s+\d+", regex::escape(l))).ok());

    let end = terminal.find(topology).map_or(topology.len(), |m| m.start());
    let mut bounds: Vec<usize> = header
        .find_iter(topology)
        .map(|m| m.start())
        .filter(|&start| start < end)
        .collect();
    if bounds.is_empty() {
        return unchanged(topology);
    }
    bounds.push(end);

    let segments: Vec<&str> = bounds.windows(2).map(|w| &topology[w[0]..w[1]]).collect();
    let mut names: Vec<String> = segments
        .iter()
        .filter_map(|seg| system_name.captures(seg).map(|c| c[1].to_string()))
        .collect();
    names.sort();
    names.dedup();
    let systems = names.len();

    let mut text = String::with_capacity(topology.len() + 256);
    text.push_str(&topology[..bounds[0]]);
    let mut inserted = Vec::new();
    let mut ligand_inserted = false;

    for seg in segments {
        let mut seg = seg.to_string();
        if let Some(caps) = system_name.captures(&seg) {
            let name = caps[1].to_string();
            let chain: u32 = name.trim_start_matches("system").parse().unwrap_or(1);
            let file = if systems > 1 {
                format!("posre_chain{chain}.itp")
            } else {
                "posre.itp".to_string()
            };
            let block = posre_block(&file);
            if !seg.contains(&block) {
                seg = format!("{}\n\n{block}", seg.trim_end());
                inserted.push(name);
            }
        }
        if let (Some(code), Some(pattern)) = (ligand, ligand_name.as_ref()) {
            if !ligand_inserted && pattern.is_match(&seg) {
                let file = format!("posre_{code}.itp");
                if !seg.contains(&format!("#include \"{file}\"")) {
                    seg = format!("{}\n\n{}", seg.trim_end(), posre_block(&file));
                }
                ligand_inserted = true;
            }
        }
        text.push_str(&seg);
    }
    text.push_str(&topology[end..]);

    RestraintInsertion {
        text,
        inserted,
        systems,
        ligand_inserted,
    }
}

fn unchanged(topology: &str) -> RestraintInsertion {
    RestraintInsertion {
        text: topology.to_string(),
        inserted: Vec::new(),
        systems: 0,
        ligand_inserted: false,
    }
}

// --- MDP parameters ---

fn mdp_key(line: &str) -> Option<String> {
    let body = line.split(';').next()?;
    let (key, _) = body.split_once('=')?;
    Some(key.trim().to_ascii_lowercase().replace('-', "_"))
}

fn format_number(value: f64) -> String {
    format!("{value}")
}

/// Rewrite the value of `key` with `render(old_value)`, keeping trailing comments.
/// Appends `key = value` when the key is absent.
fn rewrite_mdp(text: &str, key: &str, render: impl Fn(&str) -> String) -> String {
    let mut found = false;
    let mut out = String::with_capacity(text.len() + 32);
    for line in text.lines() {
        if mdp_key(line).as_deref() == Some(key) {
            found = true;
            let (body, comment) = match line.find(';') {
                Some(idx) => line.split_at(idx),
                None => (line, ""),
            };
            let (lhs, old) = body.split_once('=').unwrap_or((body, ""));
            let comment = if comment.is_empty() {
                String::new()
            } else {
                format!(" {comment}")
            };
            out.push_str(&format!("{} = {}{comment}", lhs.trim_end(), render(old.trim())));
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    if !found {
        out.push_str(&format!("{key} = {}\n", render("")));
    }
    out
}

/// Set every coupling-group reference temperature and the velocity generation
/// temperature. `ref_t` keeps one value per group.
pub fn set_mdp_temperature(text: &str, temperature_k: f64) -> String {
    let value = format_number(temperature_k);
    let groups = |old: &str| {
        let count = old.split_whitespace().count().max(1);
        vec![value.clone(); count].join(" ")
    };
    let text = rewrite_mdp(text, "ref_t", groups);
    if text.lines().any(|l| mdp_key(l).as_deref() == Some("gen_temp")) {
        rewrite_mdp(&text, "gen_temp", |_| value.clone())
    } else {
        text
    }
}

pub fn set_mdp_nsteps(text: &str, nsteps: u64) -> String {
    rewrite_mdp(text, "nsteps", |_| nsteps.to_string())
}

async fn apply_temperature(paths: &[std::path::PathBuf], temperature_k: f64) -> Result<(), ToolFault> {
    for path in paths {
        let text = tokio::fs::read_to_string(path).await.map_err(ToolFault::io(path))?;
        write_output(path, &set_mdp_temperature(&text, temperature_k)).await?;
        debug!(path = %path.display(), temperature_k, "set MDP temperature");
    }
    Ok(())
}

fn mdp_files(dir: &Path) -> Vec<std::path::PathBuf> {
    let pattern = format!("{}/*.mdp", glob::Pattern::escape(&dir.to_string_lossy()));
    let mut files: Vec<_> = match glob::glob(&pattern) {
        Ok(paths) => paths.filter_map(Result::ok).collect(),
        Err(_) => Vec::new(),
    };
    files.sort();
    files
}

// --- Stage narration ---

async fn stage_report(stage: &str, run: &ProcessOutput, log: &Path) -> String {
    let log_text = if log.is_file() {
        match tokio::fs::read_to_string(log).await {
            Ok(text) => text,
            Err(e) => format!("Could not read GROMACS log file: {e}"),
        }
    } else {
        String::new()
    };

    if run.success {
        info!(stage, "GROMACS stage finished");
        format!("{stage} ran successfully. Full GROMACS output:\n{log_text}")
    } else {
        warn!(stage, code = run.code_text(), "GROMACS stage failed");
        let stderr = if run.stderr.trim().is_empty() {
            "None captured directly."
        } else {
            run.stderr.trim_end()
        };
        format!(
            "{stage} script failed with return code {}.\n--- Full GROMACS Log ---\n{log_text}\n\
             --- Shell Script Stderr ---\n{stderr}",
            run.code_text()
        )
    }
}

fn temperature(requested: Option<f64>, ctx: &ToolContext) -> Option<f64> {
    requested.or(ctx.parameters.map(|p| p.temperature_k))
}

pub async fn gromacs_equil(scripts: &ScriptRunner, obabel: &str, ctx: &ToolContext, args: &EquilArgs) -> Result<String, ToolFault> {
    let input_gro = or_narrate!(ctx.resolve(&args.input_gro));
    let topology = ctx.file("topol.top");
    let backup = ctx.file("topol_without_posre.top");

    let text = match tokio::fs::read_to_string(&topology).await {
        Ok(t) => t,
        Err(_) => return Ok(format!("File not found: {}", topology.display())),
    };
    if !backup.exists() {
        write_output(&backup, &text).await?;
        info!(path = %backup.display(), "topology backup created");
    }

    let ligand = match (args.ligand_name.as_deref(), args.ligand_file.as_deref()) {
        (Some(name), Some(file)) => Some((name, or_narrate!(ctx.resolve(file)))),
        _ => None,
    };

    let restraints = insert_position_restraints(&text, ligand.as_ref().map(|(name, _)| *name));
    if restraints.systems == 0 {
        warn!("no chain molecule types found in topology, position restraints not added");
    } else {
        info!(
            systems = restraints.systems,
            inserted = %restraints.inserted.join(", "),
            ligand = restraints.ligand_inserted,
            "position restraints added"
        );
    }
    write_output(&topology, &restraints.text).await?;

    if let Some(temp) = temperature(args.md_temp, ctx) {
        apply_temperature(&mdp_files(&ctx.sandbox), temp).await?;
    }

    let log = ctx.file("gromacs_equil.log");
    let mut script_args = vec![
        ctx.sandbox.display().to_string(),
        input_gro.display().to_string(),
        log.display().to_string(),
    ];

    if let Some((name, file)) = &ligand {
        let ligand_gro = ctx.file(&format!("{name}.gro"));
        let run = run_program(obabel, [file.as_os_str(), OsStr::new("-O"), ligand_gro.as_os_str()], &ctx.sandbox).await?;
        if !run.success {
            return Ok(format!("Equilibration failed with error: {}", run.combined()));
        }
        script_args.extend([
            name.to_string(),
            file.display().to_string(),
            format!("{name}.gro"),
        ]);
    }

    let run = scripts.run("equil_Gromacs.sh", script_args, &ctx.sandbox).await?;
    Ok(stage_report("Equilibration", &run, &log).await)
}

pub async fn gromacs_production(scripts: &ScriptRunner, ctx: &ToolContext, args: &ProductionArgs) -> Result<String, ToolFault> {
    let input_gro = or_narrate!(ctx.resolve(&args.input_gro));
    let checkpoint = or_narrate!(ctx.resolve(&args.npt_cpt_file));

    let md = ctx.file("md.mdp");
    let duration = args.md_duration.or(ctx.parameters.map(|p| p.duration_ns));
    let temp = temperature(args.md_temp, ctx);
    if md.is_file() && (duration.is_some() || temp.is_some()) {
        let mut text = tokio::fs::read_to_string(&md).await.map_err(ToolFault::io(&md))?;
        if let Some(duration_ns) = duration {
            let steps = SimulationParameters {
                temperature_k: temp.unwrap_or_default(),
                duration_ns,
            }
            .production_steps();
            text = set_mdp_nsteps(&text, steps);
            info!(duration_ns, nsteps = steps, "production length set");
        }
        if let Some(t) = temp {
            text = set_mdp_temperature(&text, t);
        }
        write_output(&md, &text).await?;
    } else if !md.is_file() {
        warn!(path = %md.display(), "md.mdp not found, production parameters left to the script");
    }

    let log = ctx.file("gromacs_production.log");
    let mut script_args = vec![
        input_gro.display().to_string(),
        checkpoint.display().to_string(),
        log.display().to_string(),
    ];
    if let Some(name) = args.ligand_name.as_deref() {
        script_args.push(name.to_string());
        script_args.push(ctx.file(&format!("{name}.gro")).display().to_string());
    }

    let run = scripts.run("prod_Gromacs.sh", script_args, &ctx.sandbox).await?;
    Ok(stage_report("Production", &run, &log).await)
}

pub async fn gromacs_analysis(scripts: &ScriptRunner, ctx: &ToolContext, args: &AnalysisArgs) -> Result<String, ToolFault> {
    let input_xtc = or_narrate!(ctx.resolve(&args.input_xtc));
    let log = ctx.file("gromacs_analysis.log");
    let mut script_args = vec![input_xtc.display().to_string(), log.display().to_string()];
    if let Some(name) = args.ligand_name.as_deref() {
        script_args.push(name.to_string());
        script_args.push(ctx.file(&format!("{name}.gro")).display().to_string());
    }

    let run = scripts.run("analysis_Gromacs.sh", script_args, &ctx.sandbox).await?;
    Ok(stage_report("Analysis", &run, &log).await)
}
