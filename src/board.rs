//! Server-computed Kanban board for the active tag of a snapshot.
//!
//! Viewers can recompute all of this themselves; the board exists so thin
//! clients (the terminal viewer, `/api/board`) get the same column order
//! and annotations without reimplementing the readiness rules.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::readiness::{
    self, ProjectMetrics, SubtaskProgress, completed_ids, compute_metrics, dependency_status,
};
use crate::snapshot::{Priority, Snapshot, Task, TaskStatus};

/// Column order and headings shown on the board.
pub const COLUMNS: [(TaskStatus, &str); 4] = [
    (TaskStatus::Pending, "Pending"),
    (TaskStatus::InProgress, "In Progress"),
    (TaskStatus::Review, "Review"),
    (TaskStatus::Done, "Completed"),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardCard {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    pub ready: bool,
    pub total_dependencies: usize,
    pub completed_dependencies: usize,
    pub blocked_by: Vec<String>,
    pub subtasks: SubtaskProgress,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardColumn {
    pub status: TaskStatus,
    pub title: &'static str,
    pub cards: Vec<BoardCard>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    /// Active tag, `None` for an empty snapshot.
    pub tag: Option<String>,
    pub tags: Vec<String>,
    pub metadata: Map<String, Value>,
    pub columns: Vec<BoardColumn>,
    pub metrics: ProjectMetrics,
    pub next_task: Option<String>,
}

impl Board {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let (tag, metadata) = match snapshot.active_tag() {
            Some((name, data)) => (Some(name.to_string()), data.metadata.clone()),
            None => (None, Map::new()),
        };
        let tasks = snapshot.active_tasks();

        Self {
            tag,
            tags: snapshot.tags().map(str::to_string).collect(),
            metadata,
            columns: build_columns(tasks),
            metrics: compute_metrics(tasks),
            next_task: readiness::next_available_task(tasks).map(|t| t.id.clone()),
        }
    }

    pub fn column(&self, status: TaskStatus) -> Option<&BoardColumn> {
        self.columns.iter().find(|c| c.status == status)
    }
}

fn build_columns(tasks: &[Task]) -> Vec<BoardColumn> {
    let completed = completed_ids(tasks);

    COLUMNS
        .iter()
        .map(|(status, title)| {
            let group: Vec<Task> = tasks.iter().filter(|t| t.status == *status).cloned().collect();
            let cards = readiness::order_for_display(&group, tasks)
                .into_iter()
                .map(|task| {
                    let deps = dependency_status(task, tasks);
                    BoardCard {
                        id: task.id.clone(),
                        title: task.title.clone(),
                        status: task.status.clone(),
                        priority: task.priority.clone(),
                        ready: readiness::is_ready(task, &completed),
                        total_dependencies: deps.total_dependencies,
                        completed_dependencies: deps.completed_dependencies,
                        blocked_by: deps.blocked_by.iter().map(|t| t.id.clone()).collect(),
                        subtasks: readiness::subtask_progress(task),
                    }
                })
                .collect();
            BoardColumn {
                status: status.clone(),
                title: *title,
                cards,
            }
        })
        .collect()
}
