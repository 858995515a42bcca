//! Hardware integration tests for helios-core
//!
//! These tests require a powered Helios panel in range and should be run with:
//! ```
//! cargo test --package helios-core --test hardware_tests -- --ignored --nocapture
//! ```
//!
//! Configure the panel via the `HELIOS_DEVICE` environment variable (name or
//! address). If not set, the default bonded name is used.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use helios_core::config::DEFAULT_PANEL_NAME;
use helios_core::{
    BlePanel, ConnectionConfig, DeviceSelector, FieldTag, PanelEvent, PanelLink, PanelSession,
    ServiceResolver, SessionOptions,
};
use tokio::time::timeout;

/// Default timeout for BLE operations
const BLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Scan duration when the panel is not already known
const SCAN_TIMEOUT: Duration = Duration::from_secs(10);

fn selector() -> DeviceSelector {
    let identifier = env::var("HELIOS_DEVICE")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_PANEL_NAME.to_string());
    DeviceSelector::parse(&identifier)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("helios_core=debug")),
        )
        .with_test_writer()
        .try_init();
}

async fn find_panel() -> BlePanel {
    init_tracing();
    let config = ConnectionConfig::default().operation_timeout(Duration::from_secs(5));
    match timeout(BLE_TIMEOUT, BlePanel::find(&selector(), SCAN_TIMEOUT, config)).await {
        Ok(Ok(panel)) => panel,
        Ok(Err(e)) => panic!("Panel not found: {}", e),
        Err(_) => panic!("Finding the panel timed out"),
    }
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_connect_and_resolve_service() {
    let panel = find_panel().await;
    println!("Found {} ({})", panel.name().unwrap_or("Unknown"), panel.address());

    timeout(BLE_TIMEOUT, panel.connect())
        .await
        .expect("connect timed out")
        .expect("connect failed");

    let resolved = ServiceResolver::default()
        .discover(&panel)
        .await
        .expect("Helios service not found");
    println!(
        "Service {} with {} characteristics",
        resolved.service,
        resolved.characteristics.len()
    );
    for uuid in &resolved.characteristics {
        println!("  - {} -> {}", uuid, FieldTag::from_uuid(uuid));
    }
    assert!(!resolved.characteristics.is_empty());

    panel.disconnect().await.expect("disconnect failed");
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_session_delivers_one_pass() {
    let panel = Arc::new(find_panel().await);
    let session = Arc::new(PanelSession::new(
        Arc::clone(&panel),
        SessionOptions::default().operation_timeout(Duration::from_secs(5)),
    ));
    let mut rx = session.subscribe();

    let runner = Arc::clone(&session);
    let task = tokio::spawn(async move { runner.run_once().await });

    let reported = FieldTag::KNOWN.iter().filter(|t| t.is_reported()).count();
    let mut seen = Vec::new();
    let result = timeout(BLE_TIMEOUT, async {
        while seen.len() < reported {
            match rx.recv().await {
                Ok(PanelEvent::FieldUpdate(update)) => {
                    println!("{}: {}", update.field, update.value);
                    seen.push(update.field);
                }
                Ok(_) => {}
                Err(e) => panic!("event stream failed: {}", e),
            }
        }
    })
    .await;

    session.shutdown().await.expect("shutdown failed");
    let _ = task.await;

    assert!(result.is_ok(), "no full pass within {:?}", BLE_TIMEOUT);
    assert!(seen.contains(&FieldTag::ReadingA));
    println!("Stats: {:?}", session.stats());
}
