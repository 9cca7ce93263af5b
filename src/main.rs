use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    stockwatch::logging::init().context("init logging")?;

    let cli = stockwatch::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        stockwatch::cli::Command::Extract(args) => {
            stockwatch::extract::run(args).context("extract")?;
        }
        stockwatch::cli::Command::Check(args) => {
            stockwatch::monitor::check(args).await.context("check")?;
        }
        stockwatch::cli::Command::Monitor(args) => {
            stockwatch::monitor::run(args).await.context("monitor")?;
        }
        stockwatch::cli::Command::Resolve(args) => {
            stockwatch::shopify::run(args).await.context("resolve")?;
        }
        stockwatch::cli::Command::Task(args) => {
            stockwatch::task::run(args).await.context("task")?;
        }
    }

    Ok(())
}
