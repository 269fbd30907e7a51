//! AMBER topology building with tleap, followed by conversion to GROMACS format.

use tracing::info;

use crate::call::{StructureArgs, TleapLigandArgs};
use crate::error::ToolFault;
use crate::files::{read_input, write_output};
use crate::pdb;
use crate::process::ScriptRunner;
use crate::sandbox::ToolContext;

/// Convert `{prefix}.prmtop`/`{prefix}.inpcrd` into `{prefix}.gro` and `topol.top`.
/// `Err` carries the narration of a failed conversion.
async fn convert_to_gromacs(scripts: &ScriptRunner, ctx: &ToolContext, prefix: &str) -> Result<Result<(), String>, ToolFault> {
    let sandbox = ctx.sandbox.display().to_string();
    let run = scripts
        .run(
            "amber_to_gromacs.sh",
            [
                sandbox,
                format!("{prefix}.prmtop"),
                format!("{prefix}.inpcrd"),
                format!("{prefix}.gro"),
            ],
            &ctx.sandbox,
        )
        .await?;
    if run.success {
        Ok(Ok(()))
    } else {
        Ok(Err(format!(
            "tleap ran successfully but the conversion to GROMACS format failed with error:\n{}",
            run.combined()
        )))
    }
}

fn success(stdout: &str, ctx: &ToolContext, gro: &str) -> String {
    let dir = ctx.sandbox.display();
    format!("tleap ran successfully with output: {stdout}. \n New files added: {dir}/topol.top, {dir}/{gro}")
}

pub async fn run_tleap(scripts: &ScriptRunner, ctx: &ToolContext, args: &StructureArgs) -> Result<String, ToolFault> {
    let input = or_narrate!(ctx.resolve(&args.input_pdb));
    if !input.is_file() {
        return Ok(format!("File not found: {}", input.display()));
    }
    let pdb_id = args.pdb_id.trim();

    let run = scripts
        .run(
            "run_tleap.sh",
            [ctx.sandbox.display().to_string(), input.display().to_string(), pdb_id.to_string()],
            &ctx.sandbox,
        )
        .await?;
    if !run.success {
        return Ok(format!("tleap run failed with error:\n{}", run.combined()));
    }

    or_narrate!(convert_to_gromacs(scripts, ctx, pdb_id).await?);
    info!(pdb_id, "protein topology built");
    Ok(success(run.stdout.trim_end(), ctx, &format!("{pdb_id}.gro")))
}

/// Merge protein and ligand into `complex.pdb` and build its topology with the
/// ligand's prepi and frcmod parameters.
pub async fn run_tleap_ligand(
    scripts: &ScriptRunner,
    ctx: &ToolContext,
    args: &TleapLigandArgs,
) -> Result<String, ToolFault> {
    let protein_path = or_narrate!(ctx.resolve(&args.input_pdb));
    let ligand_path = or_narrate!(ctx.resolve(&args.ligand_file));
    let protein = or_narrate!(read_input(&protein_path).await);
    let ligand = or_narrate!(read_input(&ligand_path).await);
    let name = args.ligand_name.trim();

    let fixed = or_narrate!(ctx.resolve(&format!("{name}_fixed.prepi")));
    let plain = or_narrate!(ctx.resolve(&format!("{name}.prepi")));
    let prepi = if fixed.is_file() {
        fixed
    } else if plain.is_file() {
        plain
    } else {
        return Ok(format!(
            "Ligand parameters not found: {} does not exist. Parameterise the ligand with param_ligand first",
            fixed.display()
        ));
    };

    write_output(&ctx.file("complex.pdb"), &pdb::merge_complex(&protein, &ligand)).await?;

    let run = scripts
        .run(
            "run_tleap_ligand.sh",
            [
                ctx.sandbox.display().to_string(),
                "complex.pdb".to_string(),
                name.to_string(),
                prepi.display().to_string(),
            ],
            &ctx.sandbox,
        )
        .await?;
    if !run.success {
        return Ok(format!("tleap run failed with error:\n{}", run.combined()));
    }

    or_narrate!(convert_to_gromacs(scripts, ctx, "complex").await?);
    info!(pdb_id = args.pdb_id.trim(), ligand = name, "complex topology built");
    Ok(success(run.stdout.trim_end(), ctx, "complex.gro"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    struct Fixture {
        sandbox: tempfile::TempDir,
        scripts: tempfile::TempDir,
        ctx: ToolContext,
    }

    fn fixture() -> Fixture {
        let sandbox = tempfile::tempdir().unwrap();
        let scripts = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(sandbox.path());
        Fixture { sandbox, scripts, ctx }
    }

    impl Fixture {
        fn script(&self, name: &str, body: &str) {
            fs::write(self.scripts.path().join(name), body).unwrap();
        }

        fn runner(&self) -> ScriptRunner {
            ScriptRunner::new("sh", self.scripts.path())
        }
    }

    fn protein_args() -> StructureArgs {
        StructureArgs {
            input_pdb: "1ABC_prepared_capped_his.pdb".into(),
            pdb_id: "1ABC".into(),
        }
    }

    #[tokio::test]
    async fn protein_topology_success_names_outputs() {
        let f = fixture();
        fs::write(f.sandbox.path().join("1ABC_prepared_capped_his.pdb"), "END\n").unwrap();
        f.script("run_tleap.sh", "echo \"built $3\"\n");
        f.script("amber_to_gromacs.sh", "touch \"$1/$4\" \"$1/topol.top\"\n");

        let out = run_tleap(&f.runner(), &f.ctx, &protein_args()).await.unwrap();
        assert!(out.starts_with("tleap ran successfully with output: built 1ABC."), "{out}");
        assert!(out.ends_with("/1ABC.gro"));
        assert!(f.sandbox.path().join("1ABC.gro").exists());
    }

    #[tokio::test]
    async fn tleap_failure_is_narrated() {
        let f = fixture();
        fs::write(f.sandbox.path().join("1ABC_prepared_capped_his.pdb"), "END\n").unwrap();
        f.script("run_tleap.sh", "echo 'FATAL: atom type' >&2; exit 1\n");

        let out = run_tleap(&f.runner(), &f.ctx, &protein_args()).await.unwrap();
        assert_eq!(out, "tleap run failed with error:\nFATAL: atom type");
    }

    #[tokio::test]
    async fn conversion_failure_is_narrated() {
        let f = fixture();
        fs::write(f.sandbox.path().join("1ABC_prepared_capped_his.pdb"), "END\n").unwrap();
        f.script("run_tleap.sh", "exit 0\n");
        f.script("amber_to_gromacs.sh", "echo 'no prmtop' >&2; exit 2\n");

        let out = run_tleap(&f.runner(), &f.ctx, &protein_args()).await.unwrap();
        assert!(out.contains("conversion to GROMACS format failed"));
        assert!(out.ends_with("no prmtop"));
    }

    #[tokio::test]
    async fn ligand_variant_prefers_fixed_prepi_and_writes_complex() {
        let f = fixture();
        let dir = f.sandbox.path();
        fs::write(
            dir.join("1ABC_prepared_capped_his.pdb"),
            "ATOM      1  N   ALA A   1       0.000   0.000   0.000  1.00  0.00           N\nEND\n",
        )
        .unwrap();
        fs::write(
            dir.join("ATP_h.pdb"),
            "HETATM    1  C1  ATP A 101       9.000   9.000   9.000  1.00  0.00           C\nEND\n",
        )
        .unwrap();
        fs::write(dir.join("ATP.prepi"), "").unwrap();
        fs::write(dir.join("ATP_fixed.prepi"), "").unwrap();
        f.script("run_tleap_ligand.sh", "echo \"$2 $3 $4\"\n");
        f.script("amber_to_gromacs.sh", "exit 0\n");

        let out = run_tleap_ligand(
            &f.runner(),
            &f.ctx,
            &TleapLigandArgs {
                input_pdb: "1ABC_prepared_capped_his.pdb".into(),
                pdb_id: "1ABC".into(),
                ligand_file: "ATP_h.pdb".into(),
                ligand_name: "ATP".into(),
            },
        )
        .await
        .unwrap();
        assert!(out.contains("complex.pdb ATP "), "{out}");
        assert!(out.contains("ATP_fixed.prepi"));
        assert!(out.ends_with("/complex.gro"));

        let complex = fs::read_to_string(dir.join("complex.pdb")).unwrap();
        assert!(complex.contains("ATOM      1"));
        assert!(complex.contains("HETATM    1"));
        assert!(complex.ends_with("END\n"));
    }

    #[tokio::test]
    async fn ligand_variant_requires_parameters() {
        let f = fixture();
        let dir = f.sandbox.path();
        fs::write(dir.join("1ABC_prepared_capped_his.pdb"), "END\n").unwrap();
        fs::write(dir.join("ATP_h.pdb"), "END\n").unwrap();
        let out = run_tleap_ligand(
            &f.runner(),
            &f.ctx,
            &TleapLigandArgs {
                input_pdb: "1ABC_prepared_capped_his.pdb".into(),
                pdb_id: "1ABC".into(),
                ligand_file: "ATP_h.pdb".into(),
                ligand_name: "ATP".into(),
            },
        )
        .await
        .unwrap();
        assert!(out.starts_with("Ligand parameters not found"));
        assert!(!dir.join("complex.pdb").exists());
    }
}
