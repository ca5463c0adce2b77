//! `slipway verify`

use anyhow::Result;
use clap::Args;
use colored::*;

use slipway_pg::verify_modules;

use super::OperationArgs;

#[derive(Debug, Args)]
pub struct VerifyArgs {
    #[command(flatten)]
    pub operation: OperationArgs,
}

pub async fn run(args: VerifyArgs) -> Result<()> {
    let op = args.operation.operation()?;

    println!(
        "{} {} {}",
        "Verifying:".cyan().bold(),
        op.project_name.as_deref().unwrap_or("<current module>").yellow(),
        format!("→ {}", op.database.database).dimmed()
    );

    verify_modules(&op).await?;

    println!("{}", "✓ all deployed changes verified".green().bold());
    Ok(())
}
