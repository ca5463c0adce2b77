//! `slipway deploy`

use anyhow::Result;
use clap::Args;
use colored::*;

use slipway_pg::deploy_modules;

use super::OperationArgs;

#[derive(Debug, Args)]
pub struct DeployArgs {
    #[command(flatten)]
    pub operation: OperationArgs,

    /// Deploy dependency modules as pre-packaged SQL batches
    #[arg(long)]
    pub fast: bool,

    /// Rebuild packages instead of reusing the in-run cache
    #[arg(long)]
    pub no_cache: bool,

    /// Record deploy metadata without executing script bodies
    #[arg(long)]
    pub log_only: bool,
}

pub async fn run(args: DeployArgs) -> Result<()> {
    let mut op = args.operation.operation()?;
    op.fast = args.fast;
    op.cache = !args.no_cache;
    op.log_only = args.log_only;

    println!(
        "{} {} {}",
        "Deploying:".cyan().bold(),
        op.project_name.as_deref().unwrap_or("<current module>").yellow(),
        format!("→ {}", op.database.database).dimmed()
    );

    deploy_modules(&op).await?;

    println!("{}", "✓ deploy complete".green().bold());
    Ok(())
}
