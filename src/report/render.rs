//! Frame rendering for the live monitor
//!
//! Rendering is a pure function of a registry snapshot, so it can be tested
//! without a running dispatcher. Labels are coloured through `colored`, which
//! the reporter switches off when stderr is not a terminal.

use crate::monitor::{MemoryLevel, MemoryState};
use crate::task::{QueueStats, StatusCounts, TaskState, TaskStatus};
use chrono::{DateTime, Utc};
use colored::{ColoredString, Colorize};
use std::fmt::Write;

const DOMAIN_WIDTH: usize = 24;
const STATUS_WIDTH: usize = 18;
const ERROR_WIDTH: usize = 40;

/// Everything one frame shows
pub struct Frame<'a> {
    pub states: &'a [TaskState],
    pub now: DateTime<Utc>,
    pub run_started: DateTime<Utc>,
    pub memory: Option<MemoryState>,
}

/// Renders one row per task, at most `max_rows` of them
///
/// Rows are ordered running, admitted, queued, then retired tasks, keeping
/// registration order inside each group.
pub fn render_detailed(frame: &Frame<'_>, max_rows: usize) -> String {
    let mut out = String::new();
    let counts = count(frame.states);
    header(&mut out, frame, &counts);

    let _ = writeln!(
        out,
        "{:<8}  {:<dw$}  {:<sw$}  {:>8}  {:>9}  {:>3}  {}",
        "ID",
        "DOMAIN",
        "STATUS",
        "ELAPSED",
        "MEMORY",
        "TRY",
        "ERROR",
        dw = DOMAIN_WIDTH,
        sw = STATUS_WIDTH
    );

    let mut ordered: Vec<&TaskState> = frame.states.iter().collect();
    ordered.sort_by_key(|state| display_rank(state.status));

    for state in ordered.iter().take(max_rows) {
        let status = if state.requeued {
            format!("{} (requeued)", state.status)
        } else if state.in_backoff() {
            format!("{} (backoff)", state.status)
        } else {
            state.status.to_string()
        };
        let _ = writeln!(
            out,
            "{:<8}  {:<dw$}  {}  {:>8}  {:>9}  {:>3}  {}",
            state.id().short(),
            truncate(state.descriptor.domain(), DOMAIN_WIDTH),
            paint_status(state.status, &format!("{:<sw$}", status, sw = STATUS_WIDTH)),
            format_duration(state.elapsed(frame.now)),
            format!("{:.1} MB", state.memory_usage_mb),
            state.attempts,
            truncate(state.last_error.as_deref().unwrap_or(""), ERROR_WIDTH),
            dw = DOMAIN_WIDTH
        );
    }

    if ordered.len() > max_rows {
        let _ = writeln!(out, "... and {} more", ordered.len() - max_rows);
    }
    out
}

/// Renders per-status counts and run-wide statistics
pub fn render_aggregated(frame: &Frame<'_>, queue: &QueueStats) -> String {
    let mut out = String::new();
    let counts = count(frame.states);
    header(&mut out, frame, &counts);

    for status in TaskStatus::all() {
        let label = format!("{:<10}", status.as_str());
        let _ = writeln!(out, "  {} {}", paint_status(status, &label), counts.get(status));
    }

    let total_memory: f64 = frame.states.iter().map(|s| s.memory_usage_mb).sum();
    let peak_memory = frame
        .states
        .iter()
        .map(|s| s.peak_memory_mb)
        .fold(0.0_f64, f64::max);
    let in_backoff = frame.states.iter().filter(|s| s.in_backoff()).count();
    let requeued = frame.states.iter().filter(|s| s.requeued).count();

    let _ = writeln!(
        out,
        "Memory: {:.1} MB total, {:.1} MB peak per task",
        total_memory, peak_memory
    );
    let _ = writeln!(
        out,
        "Queue: {} waiting, longest {}, average {}",
        queue.queued,
        format_duration(queue.longest_wait),
        format_duration(queue.average_wait)
    );
    if in_backoff > 0 {
        let _ = writeln!(out, "Backoff: {} tasks waiting to retry", in_backoff);
    }
    if requeued > 0 {
        let _ = writeln!(
            out,
            "Requeued: {} tasks waiting out critical memory",
            requeued
        );
    }

    if let Some(memory) = frame.memory {
        let reading = memory.reading;
        let state = paint_level(memory.level());
        if reading.degraded {
            let _ = writeln!(out, "Admission: {} (memory unavailable)", state);
        } else {
            let _ = writeln!(
                out,
                "Admission: {} (memory {:.1}%, peak {:.1}%)",
                state, reading.current_percent, reading.peak_percent
            );
        }
    }
    out
}

fn header(out: &mut String, frame: &Frame<'_>, counts: &StatusCounts) {
    let title = format!(
        "=== Ripple-Dispatch | {} | {}/{} done | {} running | {} queued | {} failed ===",
        format_duration(frame.now - frame.run_started),
        counts.retired(),
        counts.total(),
        counts.running + counts.admitted,
        counts.queued,
        counts.failed
    );
    let _ = writeln!(out, "{}", title.as_str().bold());
}

/// Colours an already padded status label
fn paint_status(status: TaskStatus, label: &str) -> ColoredString {
    match status {
        TaskStatus::Queued => label.normal(),
        TaskStatus::Admitted => label.blue(),
        TaskStatus::Running => label.cyan(),
        TaskStatus::Succeeded => label.green(),
        TaskStatus::Failed => label.red(),
    }
}

fn paint_level(level: MemoryLevel) -> ColoredString {
    match level {
        MemoryLevel::Normal => level.as_str().green(),
        MemoryLevel::Pressure => level.as_str().yellow(),
        MemoryLevel::Critical => level.as_str().red().bold(),
    }
}

fn count(states: &[TaskState]) -> StatusCounts {
    let mut counts = StatusCounts::default();
    for state in states {
        counts.bump(state.status);
    }
    counts
}

fn display_rank(status: TaskStatus) -> u8 {
    match status {
        TaskStatus::Running => 0,
        TaskStatus::Admitted => 1,
        TaskStatus::Queued => 2,
        TaskStatus::Succeeded | TaskStatus::Failed => 3,
    }
}

fn format_duration(duration: chrono::Duration) -> String {
    let millis = duration.num_milliseconds().max(0);
    if millis < 60_000 {
        format!("{:.1}s", millis as f64 / 1000.0)
    } else {
        let secs = millis / 1000;
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut out: String = text.chars().take(width.saturating_sub(3)).collect();
    out.push_str("...");
    out
}
