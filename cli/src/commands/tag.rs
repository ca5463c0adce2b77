//! `slipway tag`

use anyhow::{Context, Result, bail};
use clap::Args;
use colored::*;

use slipway_core::PLAN_FILE;
use slipway_core::plan::{Tag, parse_plan_file_simple};

use super::{cwd, planner_identity};

#[derive(Debug, Args)]
pub struct TagArgs {
    /// Tag name, referenced later as `@name`
    pub name: String,

    /// Change to mark; defaults to the latest change in the plan
    pub change: Option<String>,

    /// Note recorded in the plan
    #[arg(short = 'm', long, default_value = "")]
    pub message: String,
}

pub fn run(args: TagArgs) -> Result<()> {
    let dir = cwd()?;
    let plan_path = dir.join(PLAN_FILE);
    if !plan_path.exists() {
        bail!("no {} in the current directory", PLAN_FILE);
    }
    let mut plan = parse_plan_file_simple(&plan_path)?;
    let (planner, email) = planner_identity();

    plan.add_tag(Tag {
        name: args.name.clone(),
        change_name: args.change.clone().unwrap_or_default(),
        timestamp: chrono::Utc::now(),
        planner,
        email,
        comment: args.message.clone(),
    })
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    let target = plan
        .tagged_change(&args.name)
        .map(|c| c.name.clone())
        .unwrap_or_default();
    std::fs::write(&plan_path, plan.render())
        .with_context(|| format!("cannot write {}", plan_path.display()))?;
    println!(
        "  {} @{} now marks {}",
        "✓".green(),
        args.name.cyan(),
        target.yellow()
    );
    Ok(())
}
