//! Terminal rendering of boards and viewer events.
//!
//! Everything returns a `String` so commands decide where it goes and tests
//! can inspect it after stripping ANSI codes.

use chrono::{DateTime, Local};
use console::{Emoji, style};

use crate::board::{Board, BoardCard};
use crate::snapshot::Priority;
use crate::viewer::{FetchFailure, ReconnectState};

static READY: Emoji<'_, '_> = Emoji("● ", "* ");
static BLOCKED: Emoji<'_, '_> = Emoji("○ ", "- ");

pub fn render_board(board: &Board) -> String {
    let mut out = String::new();

    let Some(tag) = &board.tag else {
        out.push_str(&format!("{}\n", style("No tasks yet").dim()));
        return out;
    };

    let mut heading = format!("{} {}", style("Taskboard").bold().cyan(), style(tag).bold());
    if board.tags.len() > 1 {
        heading.push_str(&format!(" {}", style(format!("({} tags)", board.tags.len())).dim()));
    }
    out.push_str(&heading);
    out.push('\n');

    let m = &board.metrics;
    out.push_str(&format!(
        "{} tasks, {}% complete, {} active, {} queued, {} high priority\n",
        m.total_tasks, m.completion_rate, m.active_workload, m.work_queue, m.attention_needed
    ));

    if let Some(next) = &board.next_task {
        let title = board
            .columns
            .iter()
            .flat_map(|c| &c.cards)
            .find(|card| &card.id == next)
            .map(|card| card.title.as_str())
            .unwrap_or("");
        out.push_str(&format!("Next up: {} {}\n", style(next).green().bold(), title));
    }

    for column in &board.columns {
        out.push_str(&format!(
            "\n{} {}\n",
            style(column.title).bold().underlined(),
            style(format!("({})", column.cards.len())).dim()
        ));
        for card in &column.cards {
            out.push_str(&render_card(card));
            out.push('\n');
        }
    }
    out
}

fn render_card(card: &BoardCard) -> String {
    let marker = if card.ready {
        style(READY.to_string()).green()
    } else {
        style(BLOCKED.to_string()).yellow()
    };
    let priority = match &card.priority {
        Some(Priority::High) => style("[high]".to_string()).red(),
        Some(Priority::Medium) => style("[medium]".to_string()).yellow(),
        Some(Priority::Low) => style("[low]".to_string()).dim(),
        Some(Priority::Other(raw)) => style(format!("[{raw}]")).dim(),
        None => style("[-]".to_string()).dim(),
    };

    let mut line = format!("  {}{:<6} {} {}", marker, card.id, card.title, priority);
    if card.total_dependencies > 0 {
        line.push_str(&format!(
            " deps {}/{}",
            card.completed_dependencies, card.total_dependencies
        ));
    }
    if !card.blocked_by.is_empty() {
        line.push_str(&format!(
            " {}",
            style(format!("blocked by {}", card.blocked_by.join(", "))).yellow()
        ));
    }
    if card.subtasks.total > 0 {
        line.push_str(&format!(
            " subtasks {}/{}",
            card.subtasks.completed, card.subtasks.total
        ));
    }
    line
}

pub fn render_fetch_failure(failure: &FetchFailure) -> String {
    let mut out = format!("{} {}", style("Error:").red().bold(), failure.error);
    if let Some(path) = &failure.path {
        out.push_str(&format!("\n  path: {}", path));
    }
    if let Some(details) = &failure.details {
        out.push_str(&format!("\n  details: {}", details));
    }
    out
}

pub fn render_state(state: ReconnectState) -> String {
    match state {
        ReconnectState::Connecting => style("connecting...").dim().to_string(),
        ReconnectState::Connected => style("connected").green().to_string(),
        ReconnectState::WaitingToRetry => style("disconnected, retrying").yellow().to_string(),
    }
}

/// `[HH:MM:SS] label` line printed above each redraw.
pub fn stamp(label: &str, at: DateTime<Local>) -> String {
    format!("{} {}", style(at.format("[%H:%M:%S]")).dim(), label)
}
