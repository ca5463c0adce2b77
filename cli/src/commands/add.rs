//! `slipway add`

use anyhow::{Context, Result, bail};
use clap::Args;
use colored::*;

use slipway_core::plan::{Change, parse_plan_file_simple};
use slipway_core::{PLAN_FILE, ScriptKind, script};

use super::{cwd, planner_identity};

#[derive(Debug, Args)]
pub struct AddArgs {
    /// Change name; `/`-separated path segments are allowed
    pub name: String,

    /// Dependency references (`change`, `project:change`, `@tag`,
    /// `project:@tag`), repeatable
    #[arg(short, long = "requires")]
    pub requires: Vec<String>,

    /// Note recorded in the plan
    #[arg(short = 'm', long, default_value = "")]
    pub message: String,
}

pub fn run(args: AddArgs) -> Result<()> {
    let dir = cwd()?;
    let plan_path = dir.join(PLAN_FILE);
    if !plan_path.exists() {
        bail!("no {} in the current directory", PLAN_FILE);
    }
    let mut plan = parse_plan_file_simple(&plan_path)?;
    let (planner, email) = planner_identity();

    plan.add_change(Change {
        name: args.name.clone(),
        dependencies: args.requires.clone(),
        timestamp: chrono::Utc::now(),
        planner,
        email,
        comment: args.message.clone(),
    })
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    for kind in [ScriptKind::Deploy, ScriptKind::Revert, ScriptKind::Verify] {
        let path = script::script_path(&dir, kind, &args.name);
        if path.exists() {
            bail!("script {} already exists", path.display());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        let body = script::script_template(kind, &plan.project, &args.name, &args.requires);
        std::fs::write(&path, body).with_context(|| format!("cannot write {}", path.display()))?;
        println!("  {} {}", "✓ Created:".green(), path.display());
    }

    std::fs::write(&plan_path, plan.render())
        .with_context(|| format!("cannot write {}", plan_path.display()))?;
    println!(
        "  {} {} added to {}",
        "✓".green(),
        args.name.cyan(),
        PLAN_FILE.yellow()
    );
    Ok(())
}
