//! slipway CLI entry point.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "slipway", version, about = "Plan-driven schema deployment for Postgres")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Deploy a module (and its dependency closure) to a database
    Deploy(commands::deploy::DeployArgs),
    /// Revert deployed changes, newest first
    Revert(commands::revert::RevertArgs),
    /// Run verify scripts for deployed changes
    Verify(commands::verify::VerifyArgs),
    /// Show deployed changes recorded in the target database
    Status(commands::status::StatusArgs),
    /// Add a change to the plan and scaffold its scripts
    Add(commands::add::AddArgs),
    /// Remove a change and its scripts from the plan
    Remove(commands::remove::RemoveArgs),
    /// Tag the latest (or a named) change as a release point
    Tag(commands::tag::TagArgs),
    /// Preview the dependency-resolved deploy order
    Plan(commands::plan::PlanArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Deploy(args) => commands::deploy::run(args).await,
        Command::Revert(args) => commands::revert::run(args).await,
        Command::Verify(args) => commands::verify::run(args).await,
        Command::Status(args) => commands::status::run(args).await,
        Command::Add(args) => commands::add::run(args),
        Command::Remove(args) => commands::remove::run(args),
        Command::Tag(args) => commands::tag::run(args),
        Command::Plan(args) => commands::plan::run(args),
    }
}
