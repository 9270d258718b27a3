//! Shared rendering helpers: JSON output, tables and status colors.

use anyhow::Result;
use chrono::{DateTime, Utc};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::{StyledObject, style};
use serde_json::Value;
use taskloom_types::breakpoint::BreakpointState;
use taskloom_types::run::{RunStatus, StepStatus};

pub fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .enumerate()
                .map(|(i, h)| if i == 0 { Cell::new(h).fg(Color::Cyan) } else { Cell::new(h) })
                .collect::<Vec<_>>(),
        );
    table
}

pub fn run_status_color(status: RunStatus) -> Color {
    match status {
        RunStatus::Running => Color::Blue,
        RunStatus::Suspended => Color::Yellow,
        RunStatus::Succeeded => Color::Green,
        RunStatus::Failed => Color::Red,
        RunStatus::Cancelled => Color::DarkGrey,
    }
}

pub fn run_status_styled(status: RunStatus) -> StyledObject<&'static str> {
    let s = style(status.as_str());
    match status {
        RunStatus::Running => s.blue(),
        RunStatus::Suspended => s.yellow(),
        RunStatus::Succeeded => s.green(),
        RunStatus::Failed => s.red(),
        RunStatus::Cancelled => s.dim(),
    }
}

pub fn step_status_color(status: StepStatus) -> Color {
    match status {
        StepStatus::Running => Color::Blue,
        StepStatus::Completed => Color::Green,
        StepStatus::Failed => Color::Red,
        StepStatus::WaitingDecision => Color::Yellow,
    }
}

pub fn step_status_str(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Running => "running",
        StepStatus::Completed => "completed",
        StepStatus::Failed => "failed",
        StepStatus::WaitingDecision => "waiting",
    }
}

pub fn breakpoint_state_styled(state: BreakpointState) -> StyledObject<&'static str> {
    let s = style(state.as_str());
    match state {
        BreakpointState::Pending => s.yellow(),
        BreakpointState::Approved | BreakpointState::Edited => s.green(),
        BreakpointState::Rejected => s.red(),
    }
}

pub fn format_time(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// `1.2s`, `3m 04s`, `250ms`.
pub fn format_duration_ms(ms: u64) -> String {
    match ms {
        0..1_000 => format!("{ms}ms"),
        1_000..60_000 => format!("{:.1}s", ms as f64 / 1_000.0),
        _ => format!("{}m {:02}s", ms / 60_000, (ms % 60_000) / 1_000),
    }
}

pub fn elapsed(start: &DateTime<Utc>, end: Option<&DateTime<Utc>>) -> String {
    let end = end.copied().unwrap_or_else(Utc::now);
    let ms = (end - *start).num_milliseconds().max(0) as u64;
    format_duration_ms(ms)
}

/// Single-line preview of a JSON value for table cells.
pub fn preview(value: &Value, max: usize) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() <= max {
        text
    } else {
        let cut: String = text.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration_ms(250), "250ms");
        assert_eq!(format_duration_ms(1_200), "1.2s");
        assert_eq!(format_duration_ms(184_000), "3m 04s");
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview(&json!("short"), 10), "short");
        assert_eq!(preview(&json!({"a": 1}), 20), r#"{"a":1}"#);
        let long = preview(&json!("abcdefghijkl"), 5);
        assert_eq!(long.chars().count(), 5);
        assert!(long.ends_with('…'));
    }
}
