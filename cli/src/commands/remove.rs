//! `slipway remove`

use anyhow::{Context, Result, bail};
use clap::Args;
use colored::*;

use slipway_core::plan::parse_plan_file_simple;
use slipway_core::{PLAN_FILE, ScriptKind, script};

use super::cwd;

#[derive(Debug, Args)]
pub struct RemoveArgs {
    /// Change to remove from the plan
    pub name: String,
}

pub fn run(args: RemoveArgs) -> Result<()> {
    let dir = cwd()?;
    let plan_path = dir.join(PLAN_FILE);
    if !plan_path.exists() {
        bail!("no {} in the current directory", PLAN_FILE);
    }
    let mut plan = parse_plan_file_simple(&plan_path)?;

    plan.remove_change(&args.name)
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    for kind in [ScriptKind::Deploy, ScriptKind::Revert, ScriptKind::Verify] {
        let path = script::script_path(&dir, kind, &args.name);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("cannot remove {}", path.display()))?;
            println!("  {} {}", "✓ Removed:".green(), path.display());
        }
    }

    std::fs::write(&plan_path, plan.render())
        .with_context(|| format!("cannot write {}", plan_path.display()))?;
    println!(
        "  {} {} removed from {}",
        "✓".green(),
        args.name.cyan(),
        PLAN_FILE.yellow()
    );
    Ok(())
}
