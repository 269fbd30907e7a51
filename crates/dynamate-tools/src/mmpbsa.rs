//! Binding free energy with gmx_MMPBSA over the production trajectory.

use tracing::info;

use crate::call::MmpbsaArgs;
use crate::error::ToolFault;
use crate::files::write_output;
use crate::process::run_program;
use crate::sandbox::ToolContext;

const OUTPUT_DIR: &str = "gmx_MMPBSA";

/// Poisson-Boltzmann settings. Linear PB, iterative solver, optimized radii,
/// nonpolar term from SASA plus cavity.
const PB_SECTION: &str = "\
&pb
  ipb            = 2
  inp            = 1
  sander_apbs    = 0
  indi           = 1.0
  exdi           = 80.0
  emem           = 4.0
  smoothopt      = 1
  istrng         = 0.0
  radiopt        = 1
  prbrad         = 1.4
  iprob          = 2.0
  sasopt         = 0
  arcres         = 0.25
  memopt         = 0
  poretype       = 1
  npbopt         = 0
  solvopt        = 1
  accept         = 0.001
  linit          = 1000
  fillratio      = 4.0
  scale          = 2.0
  nbuffer        = 0.0
  nfocus         = 2
  fscale         = 8
  npbgrid        = 1
  bcopt          = 5
  eneopt         = 2
  frcopt         = 0
  scalec         = 0
  cutfd          = 5.0
  cutnb          = 0.0
  nsnba          = 1
  decompopt      = 2
  use_rmin       = 1
  sprob          = 0.557
  vprob          = 1.3
  rhow_effect    = 1.129
  use_sav        = 1
  cavity_surften = 0.0378
  cavity_offset  = -0.5692
  maxsph         = 400
  maxarcdot      = 1500
  npbverb        = 0
/
";

/// Contents of `mmpbsa.in`. `None` when the frame stride is not positive.
pub fn mmpbsa_input(sys_name: &str, nsteps: f64, nstxout_compressed: f64, temperature_k: f64) -> Option<String> {
    if nstxout_compressed <= 0.0 {
        return None;
    }
    let end_frame = (nsteps / nstxout_compressed).trunc() as i64;
    let temperature = temperature_k.trunc() as i64;
    Some(format!(
        "&general\nsys_name={sys_name}\nstartframe=1\nendframe={end_frame}\ninterval=5\n\
         temperature={temperature}\nverbose=2\n/\n{PB_SECTION}"
    ))
}

pub async fn run_gmx_mmpbsa(gmx_mmpbsa: &str, ctx: &ToolContext, args: &MmpbsaArgs) -> Result<String, ToolFault> {
    let pdb_id = args.pdb_id.trim();
    let Some(input) = mmpbsa_input(pdb_id, args.nsteps, args.nstxout_compressed, args.temp) else {
        return Ok(format!(
            "MMPBSA failed with error: nstxout_compressed must be positive, got {}",
            args.nstxout_compressed
        ));
    };

    let out_dir = ctx.file(OUTPUT_DIR);
    tokio::fs::create_dir_all(&out_dir)
        .await
        .map_err(ToolFault::io(&out_dir))?;
    write_output(&out_dir.join("mmpbsa.in"), &input).await?;

    let sb = ctx.sandbox.display();
    let run = run_program(
        gmx_mmpbsa,
        [
            "-O".to_string(),
            "-i".into(),
            "mmpbsa.in".into(),
            "-cs".into(),
            format!("{sb}/md.tpr"),
            "-ct".into(),
            format!("{sb}/md_noPBC.xtc"),
            "-ci".into(),
            format!("{sb}/index.ndx"),
            "-cg".into(),
            "1".into(),
            "13".into(),
            "-cp".into(),
            format!("{sb}/topol.top"),
            "-o".into(),
            "FINAL_RESULTS_MMPBSA.dat".into(),
            "-eo".into(),
            "FINAL_RESULTS_MMPBSA.csv".into(),
            "-nogui".into(),
        ],
        &out_dir,
    )
    .await?;

    if !run.success {
        return Ok(format!(
            "MMPBSA failed with return code {}:\n{}",
            run.code_text(),
            run.combined()
        ));
    }
    info!(pdb_id, "MMPBSA finished");
    Ok(format!(
        "MMPBSA complete! Files created: {sb}/{OUTPUT_DIR}/FINAL_RESULTS_MMPBSA.dat and \
         {sb}/{OUTPUT_DIR}/FINAL_RESULTS_MMPBSA.csv"
    ))
}
