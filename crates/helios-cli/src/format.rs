//! Output formatting for panel events.

use anyhow::Result;
use helios_core::{ConnectionState, FieldUpdate, PanelEvent, UpdateOrigin};
use owo_colors::OwoColorize;

/// Format one field update as a text line.
pub fn format_update_text(update: &FieldUpdate, no_color: bool) -> String {
    let value = match update.field.unit() {
        Some(unit) => format!("{} {}", update.value, unit),
        None => update.value.to_string(),
    };
    let marker = match update.origin {
        UpdateOrigin::Poll => "",
        UpdateOrigin::Notification => " (notified)",
    };
    if no_color {
        format!("{:<14} {}{}", update.field.label(), value, marker)
    } else {
        format!(
            "{:<14} {}{}",
            update.field.label().cyan(),
            value.bold(),
            marker.dimmed()
        )
    }
}

fn format_state(state: ConnectionState, no_color: bool) -> String {
    if no_color {
        return state.to_string();
    }
    match state {
        ConnectionState::Connected => state.green().to_string(),
        ConnectionState::Disconnected => state.red().to_string(),
        _ => state.yellow().to_string(),
    }
}

/// Format any event as a text line. Heartbeats are not shown.
pub fn format_event_text(event: &PanelEvent, no_color: bool) -> Option<String> {
    match event {
        PanelEvent::FieldUpdate(update) => Some(format_update_text(update, no_color)),
        PanelEvent::ConnectionStateChanged { state, generation } => Some(format!(
            "-- {} (session {})",
            format_state(*state, no_color),
            generation
        )),
        PanelEvent::Error { message } => Some(if no_color {
            format!("-- error: {}", message)
        } else {
            format!("-- {}: {}", "error".red(), message)
        }),
        _ => None,
    }
}

/// Format any event as one JSON line.
pub fn format_event_json(event: &PanelEvent) -> Result<String> {
    Ok(serde_json::to_string(event)?)
}
