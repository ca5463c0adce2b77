//! `slipway revert`

use anyhow::Result;
use clap::Args;
use colored::*;

use slipway_pg::revert_modules;

use super::OperationArgs;

#[derive(Debug, Args)]
pub struct RevertArgs {
    #[command(flatten)]
    pub operation: OperationArgs,
}

pub async fn run(args: RevertArgs) -> Result<()> {
    let op = args.operation.operation()?;

    println!(
        "{} {} {}",
        "Reverting:".cyan().bold(),
        op.project_name.as_deref().unwrap_or("<current module>").yellow(),
        format!("→ {}", op.database.database).dimmed()
    );

    revert_modules(&op).await?;

    println!("{}", "✓ revert complete".green().bold());
    Ok(())
}
