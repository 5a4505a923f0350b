use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

/// Exit status of a run that finished but could not save every article.
const EXIT_PARTIAL: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    match try_main().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn try_main() -> anyhow::Result<ExitCode> {
    kbmirror::logging::init().context("init logging")?;

    let cli = kbmirror::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        kbmirror::cli::Command::Download(args) => {
            let report = kbmirror::download::run(args).await.context("download")?;
            if report.summary.has_errors() {
                return Ok(ExitCode::from(EXIT_PARTIAL));
            }
        }
        kbmirror::cli::Command::Status(args) => {
            kbmirror::download::status(args).context("status")?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
