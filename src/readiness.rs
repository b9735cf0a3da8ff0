//! Dependency-aware readiness, display ordering and project metrics.
//!
//! Everything here is a pure function over a task slice. Readiness is
//! evaluated against the current `done` set on every call, so cycles in the
//! dependency relation never cause traversal; cyclic tasks simply stay
//! not-ready until one of them is marked done.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::Serialize;

use crate::snapshot::{Priority, Task, TaskStatus};

/// Ids of every task with status `done`.
pub fn completed_ids(tasks: &[Task]) -> HashSet<&str> {
    tasks
        .iter()
        .filter(|t| t.is_done())
        .map(|t| t.id.as_str())
        .collect()
}

/// A task is ready when it has no dependencies or all of them are done.
///
/// Dependencies that do not resolve to a done task (including dangling
/// references) keep the task not-ready.
pub fn is_ready(task: &Task, completed: &HashSet<&str>) -> bool {
    task.dependencies
        .iter()
        .all(|dep| completed.contains(dep.as_str()))
}

/// Compare ids the way a human reads them: digit runs compare by numeric
/// value, so `"2" < "10"` and `"1.2" < "1.10"`.
///
/// Runs that compare equal numerically but differ in leading zeros, and
/// otherwise-equal strings, fall back to a byte comparison so the result is
/// a total order.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.as_bytes();
    let mut right = b.as_bytes();

    while let (Some(&l), Some(&r)) = (left.first(), right.first()) {
        if l.is_ascii_digit() && r.is_ascii_digit() {
            let l_len = left.iter().take_while(|c| c.is_ascii_digit()).count();
            let r_len = right.iter().take_while(|c| c.is_ascii_digit()).count();
            let l_num = trim_leading_zeros(&left[..l_len]);
            let r_num = trim_leading_zeros(&right[..r_len]);
            let ord = l_num.len().cmp(&r_num.len()).then_with(|| l_num.cmp(r_num));
            if ord != Ordering::Equal {
                return ord;
            }
            left = &left[l_len..];
            right = &right[r_len..];
        } else {
            let ord = l.to_ascii_lowercase().cmp(&r.to_ascii_lowercase());
            if ord != Ordering::Equal {
                return ord;
            }
            left = &left[1..];
            right = &right[1..];
        }
    }

    left.len().cmp(&right.len()).then_with(|| a.cmp(b))
}

fn trim_leading_zeros(digits: &[u8]) -> &[u8] {
    let zeros = digits.iter().take_while(|&&c| c == b'0').count();
    &digits[zeros..]
}

/// Comparator behind [`order_for_display`]: ready first, then priority
/// (high, medium, low, none), then natural id order.
pub fn display_cmp(a: &Task, b: &Task, completed: &HashSet<&str>) -> Ordering {
    let a_ready = is_ready(a, completed);
    let b_ready = is_ready(b, completed);
    b_ready
        .cmp(&a_ready)
        .then_with(|| Priority::rank(a.priority.as_ref()).cmp(&Priority::rank(b.priority.as_ref())))
        .then_with(|| natural_cmp(&a.id, &b.id))
}

/// Stable display order for one status group, with readiness judged
/// against the whole collection.
pub fn order_for_display<'a>(group: &'a [Task], all: &[Task]) -> Vec<&'a Task> {
    let completed = completed_ids(all);
    let mut ordered: Vec<&Task> = group.iter().collect();
    ordered.sort_by(|a, b| display_cmp(a, b, &completed));
    ordered
}

/// Dependency resolution for a single task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyStatus<'a> {
    pub is_ready: bool,
    pub blocked_by: Vec<&'a Task>,
    pub total_dependencies: usize,
    pub completed_dependencies: usize,
}

/// Resolve `task`'s dependencies against `all`.
///
/// Ids with no matching task are dropped: they neither block nor count as
/// satisfied.
pub fn dependency_status<'a>(task: &Task, all: &'a [Task]) -> DependencyStatus<'a> {
    let resolved: Vec<&Task> = task
        .dependencies
        .iter()
        .filter_map(|dep| all.iter().find(|t| &t.id == dep))
        .collect();
    let completed_dependencies = resolved.iter().filter(|t| t.is_done()).count();
    let blocked_by: Vec<&Task> = resolved.iter().copied().filter(|t| !t.is_done()).collect();

    DependencyStatus {
        is_ready: blocked_by.is_empty(),
        blocked_by,
        total_dependencies: resolved.len(),
        completed_dependencies,
    }
}

/// First pending task, in collection order, whose dependencies are done.
pub fn next_available_task(tasks: &[Task]) -> Option<&Task> {
    let completed = completed_ids(tasks);
    tasks
        .iter()
        .find(|t| t.status == TaskStatus::Pending && is_ready(t, &completed))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubtaskProgress {
    pub completed: usize,
    pub total: usize,
}

pub fn subtask_progress(task: &Task) -> SubtaskProgress {
    SubtaskProgress {
        completed: task
            .subtasks
            .iter()
            .filter(|s| s.status == TaskStatus::Done)
            .count(),
        total: task.subtasks.len(),
    }
}

// ── Metrics ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PriorityDistribution {
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

/// Aggregate counts derived from a task list. Never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMetrics {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub completion_rate: u32,

    pub pending_tasks: usize,
    pub in_progress_tasks: usize,
    pub review_tasks: usize,
    pub deferred_tasks: usize,
    pub cancelled_tasks: usize,

    pub high_priority_tasks: usize,
    pub medium_priority_tasks: usize,
    pub low_priority_tasks: usize,

    /// in-progress + review
    pub active_workload: usize,
    pub work_queue: usize,
    pub attention_needed: usize,

    pub priority_distribution: PriorityDistribution,
}

/// `round(100 * part / total)` with halves rounded up; 0 for an empty total.
fn percent(part: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((200 * part + total) / (2 * total)) as u32
}

pub fn compute_metrics(tasks: &[Task]) -> ProjectMetrics {
    let count_status = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count();
    let count_priority =
        |priority: Priority| tasks.iter().filter(|t| t.priority.as_ref() == Some(&priority)).count();

    let total_tasks = tasks.len();
    let completed_tasks = count_status(TaskStatus::Done);
    let pending_tasks = count_status(TaskStatus::Pending);
    let in_progress_tasks = count_status(TaskStatus::InProgress);
    let review_tasks = count_status(TaskStatus::Review);
    let high_priority_tasks = count_priority(Priority::High);
    let medium_priority_tasks = count_priority(Priority::Medium);
    let low_priority_tasks = count_priority(Priority::Low);

    ProjectMetrics {
        total_tasks,
        completed_tasks,
        completion_rate: percent(completed_tasks, total_tasks),
        pending_tasks,
        in_progress_tasks,
        review_tasks,
        deferred_tasks: count_status(TaskStatus::Deferred),
        cancelled_tasks: count_status(TaskStatus::Cancelled),
        high_priority_tasks,
        medium_priority_tasks,
        low_priority_tasks,
        active_workload: in_progress_tasks + review_tasks,
        work_queue: pending_tasks,
        attention_needed: high_priority_tasks,
        priority_distribution: PriorityDistribution {
            high: percent(high_priority_tasks, total_tasks),
            medium: percent(medium_priority_tasks, total_tasks),
            low: percent(low_priority_tasks, total_tasks),
        },
    }
}
