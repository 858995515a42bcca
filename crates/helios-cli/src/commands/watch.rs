//! Watch command implementation.
//!
//! Runs a supervised session that reconnects on link loss and prints every
//! event. Lines typed on stdin are queued as commands, so a command can be
//! entered at any time, even while the panel is still being reached.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use helios_core::{PanelEvent, PanelLink, PanelSession};
use helios_types::FieldTag;
use owo_colors::OwoColorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::cli::{DeviceArgs, OutputFormat};
use crate::format::{format_event_json, format_event_text};
use crate::util::{Context, find_panel};

/// Arguments for the watch command.
pub struct WatchArgs {
    pub device: DeviceArgs,
    pub format: OutputFormat,
    pub count: u64,
    pub notifications: bool,
}

/// What a line typed on stdin asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Input {
    Command(FieldTag),
    Quit,
    Empty,
    Unknown,
}

fn parse_input(line: &str) -> Input {
    match line.trim().to_ascii_lowercase().as_str() {
        "" => Input::Empty,
        "p" | "power" => Input::Command(FieldTag::PowerCommand),
        "s" | "search" => Input::Command(FieldTag::SearchCommand),
        "q" | "quit" | "exit" => Input::Quit,
        _ => Input::Unknown,
    }
}

fn print_event(event: &PanelEvent, format: OutputFormat, no_color: bool) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", format_event_json(event)?),
        OutputFormat::Text => {
            if let Some(line) = format_event_text(event, no_color) {
                println!("{}", line);
            }
        }
    }
    Ok(())
}

pub async fn cmd_watch(ctx: &Context, args: WatchArgs) -> Result<()> {
    let config = ctx.load_config()?;
    let mut options = config.session_options()?;
    if args.notifications {
        options.forward_notifications = true;
    }
    let reconnect = config.reconnect_options();

    let panel = find_panel(ctx, &args.device, &config).await?;
    if !ctx.quiet {
        let name = panel.name().unwrap_or("Unknown");
        let header = if ctx.no_color {
            format!("Watching: {} ({})", name, panel.address())
        } else {
            format!("Watching: {} ({})", name.green(), panel.address().cyan())
        };
        eprintln!("{}", header);
        eprintln!("Type 'power' or 'search' to send a command | Ctrl+C to stop");
        eprintln!("{}", "-".repeat(50));
    }

    let session = Arc::new(PanelSession::new(Arc::new(panel), options));
    let mut events = session.subscribe();
    let runner = Arc::clone(&session);
    let mut run = tokio::spawn(async move { runner.run(&reconnect).await });
    let mut run_finished = false;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut updates: u64 = 0;

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                if !ctx.quiet {
                    eprintln!("\nShutting down...");
                }
                break Ok(());
            }
            joined = &mut run => {
                run_finished = true;
                break match joined {
                    Ok(result) => result.context("Session ended"),
                    Err(e) => Err(e.into()),
                };
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match parse_input(&line) {
                    Input::Command(field) => {
                        if let Err(e) = session.request_command(field) {
                            break Err(e.into());
                        }
                        if !ctx.quiet {
                            eprintln!("Queued {} command", field);
                        }
                    }
                    Input::Quit => break Ok(()),
                    Input::Empty => {}
                    Input::Unknown => eprintln!("Unknown input '{}', expected power, search or quit", line.trim()),
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
            event = events.recv() => match event {
                Ok(event) => {
                    if let Err(e) = print_event(&event, args.format, ctx.no_color) {
                        break Err(e);
                    }
                    if matches!(event, PanelEvent::FieldUpdate(_)) {
                        updates += 1;
                        if args.count > 0 && updates >= args.count {
                            break Ok(());
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Output fell behind, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    if let Err(e) = session.shutdown().await {
        warn!("Disconnect failed: {}", e);
    }
    if !run_finished {
        let _ = run.await;
    }

    if !ctx.quiet {
        let stats = session.stats();
        eprintln!(
            "{} reads, {} writes, {} failed operations",
            stats.reads,
            stats.writes,
            stats.failures()
        );
    }
    outcome
}
