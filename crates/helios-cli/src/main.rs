use std::io;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod format;
mod util;

use cli::{Cli, Commands};
use util::Context;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle completions command early (before tracing init)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "helios", &mut io::stdout());
        return Ok(());
    }

    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("helios_core=debug,helios_cli=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let ctx = Context {
        config_path: cli.config.clone(),
        quiet: cli.quiet,
        no_color: cli.no_color || std::env::var_os("NO_COLOR").is_some(),
    };

    match cli.command {
        Commands::Watch {
            device,
            format,
            count,
            notifications,
        } => {
            commands::cmd_watch(
                &ctx,
                commands::WatchArgs {
                    device,
                    format,
                    count,
                    notifications,
                },
            )
            .await
        }
        Commands::Power { device } => {
            commands::cmd_send(&ctx, device, helios_types::FieldTag::PowerCommand).await
        }
        Commands::Search { device } => {
            commands::cmd_send(&ctx, device, helios_types::FieldTag::SearchCommand).await
        }
        Commands::Config { action } => commands::cmd_config(&ctx, action),
        Commands::Completions { .. } => Ok(()),
    }
}
