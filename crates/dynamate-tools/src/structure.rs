//! Structure acquisition and preparation: download, repair, clean, cap, protonation names.

use std::ffi::{OsStr, OsString};

use tracing::{info, warn};

use crate::call::{FetchPdbArgs, FixPdbArgs, PreparePdbArgs, StructureArgs};
use crate::error::ToolFault;
use crate::files::{read_input, write_output};
use crate::pdb;
use crate::process::run_program;
use crate::sandbox::ToolContext;

fn valid_pdb_id(id: &str) -> bool {
    id.len() == 4 && id.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Download `{ID}.pdb` from the RCSB file service into the sandbox.
pub async fn fetch_and_save_pdb(
    client: &reqwest::Client,
    base_url: &str,
    ctx: &ToolContext,
    args: &FetchPdbArgs,
) -> Result<String, ToolFault> {
    let id = args.pdb_id.trim().to_uppercase();
    if !valid_pdb_id(&id) {
        return Ok(format!(
            "Error fetching PDB {id}: a PDB ID is exactly four letters or digits"
        ));
    }

    let url = format!("{}/{id}.pdb", base_url.trim_end_matches('/'));
    let body = match client.get(&url).send().await.and_then(|r| r.error_for_status()) {
        Ok(resp) => match resp.text().await {
            Ok(body) => body,
            Err(e) => return Ok(format!("Error fetching PDB {id}: {e}")),
        },
        Err(e) => {
            warn!(pdb_id = %id, error = %e, "PDB download failed");
            return Ok(format!("Error fetching PDB {id}: {e}"));
        }
    };

    let output = ctx.file(&format!("{id}.pdb"));
    write_output(&output, &body).await?;
    info!(pdb_id = %id, path = %output.display(), "PDB downloaded");
    Ok(format!("PDB {id} downloaded successfully to {}", output.display()))
}

/// Add missing heavy atoms with pdbfixer, writing `{stem}_fixed.pdb` next to the input.
pub async fn fix_pdb_file(pdbfixer: &str, ctx: &ToolContext, args: &FixPdbArgs) -> Result<String, ToolFault> {
    let input = or_narrate!(ctx.resolve(&args.input_pdb));
    if !input.is_file() {
        return Ok(format!("File not found: {}", input.display()));
    }
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let output = input.with_file_name(format!("{stem}_fixed.pdb"));

    let run = run_program(
        pdbfixer,
        [
            input.as_os_str().to_os_string(),
            OsString::from(format!("--output={}", output.display())),
            OsString::from("--add-atoms=heavy"),
            OsString::from("--keep-heterogens=none"),
        ],
        &ctx.sandbox,
    )
    .await?;

    if !run.success {
        return Ok(format!("pdbfixer failed with error: {}", run.combined()));
    }
    Ok(format!(
        "Fixed original PDB file {} and saved to new file {}",
        input.display(),
        output.display()
    ))
}

/// Split `{pdb_id}.pdb` into a protein-only file and, when a ligand is named, a
/// protonated ligand file.
pub async fn prepare_pdb_file_ligand(
    obabel: &str,
    ctx: &ToolContext,
    args: &PreparePdbArgs,
) -> Result<String, ToolFault> {
    let pdb_id = args.pdb_id.trim();
    let input = or_narrate!(ctx.resolve(&format!("{pdb_id}.pdb")));
    let prepared = or_narrate!(ctx.resolve(&format!("{pdb_id}_prepared.pdb")));
    let text = or_narrate!(read_input(&input).await);
    let dir = ctx.sandbox.display();

    write_output(&prepared, &pdb::strip_hetero(&text)).await?;
    info!(path = %prepared.display(), "prepared protein structure");

    let Some(ligand) = args.ligand_name.as_deref() else {
        return Ok(format!(
            "Successfully Prepared PDB structure without a ligand and saved the extracted PDB file to {}",
            prepared.display()
        ));
    };

    let scan = pdb::scan_ligand(&text, ligand);
    info!(ligand, copies = scan.copies.len(), "ligand copies found");
    let Some(ligand_text) = pdb::extract_first_ligand(&text, ligand) else {
        return Ok(format!(
            "Ligand {ligand} not found in PDB file {}. You can either proceed without a ligand, \
             check the ligand name provided or check the PDB file",
            input.display()
        ));
    };

    let ligand_pdb = or_narrate!(ctx.resolve(&format!("{ligand}.pdb")));
    let protonated = or_narrate!(ctx.resolve(&format!("{ligand}_h.pdb")));
    write_output(&ligand_pdb, &ligand_text).await?;

    let run = run_program(
        obabel,
        [
            ligand_pdb.as_os_str(),
            OsStr::new("-O"),
            protonated.as_os_str(),
            OsStr::new("-p"),
            OsStr::new("7"),
        ],
        &ctx.sandbox,
    )
    .await?;
    if !run.success {
        return Ok(format!("Ligand protonation failed with error: {}", run.combined()));
    }

    let raw = or_narrate!(read_input(&protonated).await);
    let cleaned = pdb::clean_protonated_ligand(&raw, ligand);
    for element in &cleaned.unknown_elements {
        warn!(ligand, element = %element, "unknown element in ligand, atom name kept");
    }
    write_output(&protonated, &cleaned.text).await?;

    let mut message = format!(
        "Successfully Prepared PDB structure with a ligand and saved the extracted protein PDB file to \
         {dir}/{pdb_id}_prepared.pdb and the protonated ligand PDB file to {dir}/{ligand}_h.pdb. \
         Ligand was protonated at pH=7 and atom names were cleaned (renumbered)"
    );
    if scan.copies.len() > 1 {
        message.push_str(&format!(
            ". Note: {} copies of {ligand} were found; only the first (chain:residue {}) was extracted",
            scan.copies.len(),
            scan.copies[0]
        ));
    }
    if !cleaned.unknown_elements.is_empty() {
        message.push_str(&format!(
            ". Unrecognised elements kept their original atom names: {}",
            cleaned.unknown_elements.join(", ")
        ));
    }
    Ok(message)
}

pub async fn add_caps(ctx: &ToolContext, args: &StructureArgs) -> Result<String, ToolFault> {
    let input = or_narrate!(ctx.resolve(&args.input_pdb));
    let output = or_narrate!(ctx.resolve(&format!("{}_prepared_capped.pdb", args.pdb_id.trim())));
    let text = or_narrate!(read_input(&input).await);

    let result = pdb::add_caps(&text, &mut rand::thread_rng());
    let capped = match result {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "capping refused");
            return Ok(e.to_string());
        }
    };
    write_output(&output, &capped.text).await?;
    Ok(format!(
        "Successfully added ACE and NME caps to the N- and C-termini of the protein ({} chain(s), {} residues \
         after capping) and saved to {}",
        capped.chains,
        capped.residues,
        output.display()
    ))
}

pub async fn rename_histidines(ctx: &ToolContext, args: &StructureArgs) -> Result<String, ToolFault> {
    let input = or_narrate!(ctx.resolve(&args.input_pdb));
    let output = or_narrate!(ctx.resolve(&format!("{}_prepared_capped_his.pdb", args.pdb_id.trim())));
    let text = or_narrate!(read_input(&input).await);

    let (renamed, changes) = pdb::rename_histidines(&text);
    write_output(&output, &renamed).await?;

    let summary = if changes.is_empty() {
        "no HIS residue carried HD1 or HE2".to_string()
    } else {
        changes
            .iter()
            .map(|c| format!("{} -> {}", c.residue, c.new_name))
            .collect::<Vec<_>>()
            .join(", ")
    };
    Ok(format!(
        "Successfully renamed histidines HIS to account for their correct protonation in the PDB files and \
         saved to {} ({summary})",
        output.display()
    ))
}
