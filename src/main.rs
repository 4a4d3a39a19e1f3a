use std::io;
use std::process::ExitCode;

use clap::Parser;
use oddsmith::adapter::inbound::cli::command::{Cli, Commands};
use oddsmith::adapter::inbound::cli::{check, replay};

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Check { config } => {
            let summary = check::execute(&config)?;
            println!("{summary}");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Replay {
            config,
            script,
            keep_going,
        } => {
            let mut stdout = io::stdout().lock();
            let report = replay::execute(&config, &script, keep_going, &mut stdout).await?;
            Ok(if report.failures == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}
