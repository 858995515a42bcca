//! One-shot command implementation (`power`, `search`).
//!
//! The command is queued before the session starts and is written when its
//! field comes up in the rotation; the session is closed as soon as the
//! write has completed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, anyhow};
use helios_core::{PanelSession, SessionEnd};
use helios_types::FieldTag;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::cli::DeviceArgs;
use crate::util::{Context, find_panel};

pub async fn cmd_send(ctx: &Context, device: DeviceArgs, field: FieldTag) -> Result<()> {
    let config = ctx.load_config()?;
    let options = config.session_options()?.heartbeat_interval(None);
    let wait = Duration::from_secs(device.timeout);

    let panel = find_panel(ctx, &device, &config).await?;
    let session = Arc::new(PanelSession::new(Arc::new(panel), options));
    session.request_command(field)?;

    let mut events = session.subscribe();
    let runner = Arc::clone(&session);
    let mut run = tokio::spawn(async move { runner.run_once().await });
    let mut run_finished = false;
    let deadline = tokio::time::sleep(wait);
    tokio::pin!(deadline);

    let outcome = loop {
        tokio::select! {
            _ = &mut deadline => {
                break Err(anyhow!("Timed out after {}s waiting to send {}", wait.as_secs(), field));
            }
            joined = &mut run => {
                run_finished = true;
                break match joined {
                    Ok(Ok(SessionEnd::LinkLost)) => Err(anyhow!("Link lost before {} was sent", field)),
                    Ok(Ok(SessionEnd::Cancelled)) => Err(anyhow!("Session cancelled")),
                    Ok(Err(e)) => Err(e).context("Session failed"),
                    Err(e) => Err(e.into()),
                };
            }
            event = events.recv() => {
                match event {
                    Ok(event) => debug!(?event, "Event"),
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break Err(anyhow!("Event stream closed")),
                }
                let stats = session.stats();
                if stats.writes > 0 {
                    break Ok(());
                }
                if stats.write_failures > 0 {
                    break Err(anyhow!("The panel rejected the {} command", field));
                }
            }
        }
    };

    if let Err(e) = session.shutdown().await {
        warn!("Disconnect failed: {}", e);
    }
    if !run_finished {
        let _ = run.await;
    }

    outcome?;
    if !ctx.quiet {
        println!("{} command sent", field);
    }
    Ok(())
}
