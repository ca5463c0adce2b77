//! `slipway plan` — dependency-order preview, no database needed.

use anyhow::{Result, bail};
use clap::Args;
use colored::*;

use slipway_core::resolver::{ResolveOptions, TagResolution, resolve_dependencies};
use slipway_core::workspace::Workspace;
use slipway_core::{PLAN_FILE, parse_plan_file_simple};

use super::cwd;

#[derive(Debug, Args)]
pub struct PlanArgs {
    /// Show the normalized dependency list per change
    #[arg(long)]
    pub deps: bool,
}

pub fn run(args: PlanArgs) -> Result<()> {
    let dir = cwd()?;
    let plan_path = dir.join(PLAN_FILE);
    if !plan_path.exists() {
        bail!("no {} in the current directory", PLAN_FILE);
    }
    let plan = parse_plan_file_simple(&plan_path)?;
    let modules = match Workspace::load(&dir) {
        Ok(ws) => ws.modules,
        Err(_) => Default::default(),
    };
    let resolution = resolve_dependencies(
        &dir,
        &plan.project,
        &ResolveOptions {
            tag_resolution: TagResolution::Resolve,
            load_plan_files: true,
            modules,
            ..Default::default()
        },
    )?;

    println!(
        "{} {} ({} changes)",
        "Deploy order:".cyan().bold(),
        plan.project.yellow(),
        resolution.resolved.len()
    );
    for (i, change) in resolution.resolved.iter().enumerate() {
        println!("  {} {}", format!("{:>3}.", i + 1).dimmed(), change);
        if args.deps {
            if let Some(deps) = resolution.deps.get(&format!("/deploy/{change}.sql")) {
                if !deps.is_empty() {
                    println!("       {}", format!("requires: {}", deps.join(", ")).dimmed());
                }
            }
        }
    }

    if !resolution.external.is_empty() {
        println!();
        println!(
            "{} {}",
            "Extensions:".cyan(),
            resolution.external.join(", ").yellow()
        );
    }
    if !resolution.resolved_tags.is_empty() {
        println!();
        println!("{}", "Resolved tags:".cyan());
        for (from, to) in &resolution.resolved_tags {
            println!("  {} {} {}", from.yellow(), "→".dimmed(), to);
        }
    }
    Ok(())
}
