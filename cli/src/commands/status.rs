//! `slipway status`

use anyhow::Result;
use clap::Args;
use colored::*;

use slipway_pg::Migrator;

use super::DatabaseArgs;

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Limit the listing to one project
    pub project: Option<String>,

    #[command(flatten)]
    pub database: DatabaseArgs,
}

pub async fn run(args: StatusArgs) -> Result<()> {
    println!("{}", "Deployment status".cyan().bold());
    println!();

    let migrator = Migrator::connect(args.database.config()?, args.database.debug_options()).await?;
    let rows = migrator.status(args.project.as_deref()).await?;

    println!("  Database: {}", migrator.config().database.yellow());
    println!();

    if rows.is_empty() {
        println!("  {} No changes deployed yet", "○".dimmed());
        return Ok(());
    }

    for row in &rows {
        println!(
            "  {} {}:{} {} {}",
            "✓".green(),
            row.project.yellow(),
            row.change_name,
            row.deployed_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            format!("({})", &row.script_hash[..12.min(row.script_hash.len())]).dimmed()
        );
    }
    println!();
    println!("  {} change(s) deployed", rows.len());
    Ok(())
}
