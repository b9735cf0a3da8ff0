//! Task snapshot data model.
//!
//! A snapshot is the whole `tasks.json` file at one point in time: a map
//! from tag name to that tag's task list. Snapshots are replaced wholesale
//! on every change; nothing here tracks identity across snapshots.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::errors::SyncError;

/// Tag preferred by the active-view rule.
pub const DEFAULT_TAG: &str = "master";

// ── Enums ─────────────────────────────────────────────────────────────

/// Task lifecycle state. Values outside the TaskMaster vocabulary are kept
/// verbatim in [`TaskStatus::Other`] and belong to no board column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Review,
    Done,
    Deferred,
    Cancelled,
    #[serde(untagged)]
    Other(String),
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        Self::Pending,
        Self::InProgress,
        Self::Review,
        Self::Done,
        Self::Deferred,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Review => "review",
            Self::Done => "done",
            Self::Deferred => "deferred",
            Self::Cancelled => "cancelled",
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Invalid task status: {}", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
    /// Unrecognised value, re-emitted as written.
    #[serde(untagged)]
    Other(String),
}

impl Priority {
    pub fn as_str(&self) -> &str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Other(raw) => raw,
        }
    }

    /// Display rank: high sorts first. Missing and unrecognised priorities
    /// rank after `Low`.
    pub fn rank(priority: Option<&Priority>) -> u8 {
        match priority {
            Some(Self::High) => 0,
            Some(Self::Medium) => 1,
            Some(Self::Low) => 2,
            Some(Self::Other(_)) | None => 3,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

// ── Ids ───────────────────────────────────────────────────────────────

/// TaskMaster writes ids as numbers or strings depending on version.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(serde_json::Number),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => s,
            RawId::Number(n) => n.to_string(),
        }
    }
}

/// Missing and null ids become the empty string.
fn de_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let raw: Option<RawId> = Option::deserialize(deserializer)?;
    Ok(raw.map(String::from).unwrap_or_default())
}

fn de_ids<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let raw: Option<Vec<RawId>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(String::from)
        .collect())
}

/// Treat an explicit `null` like an absent field.
fn de_or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ── Entities ──────────────────────────────────────────────────────────

/// A unit of work owned by exactly one parent [`Task`].
///
/// `id` is only unique inside the parent; see [`Subtask::display_id`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    #[serde(default, deserialize_with = "de_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, deserialize_with = "de_ids")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_strategy: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Subtask {
    /// `parentId.subtaskId`, the form shown to users.
    pub fn display_id(&self, parent_id: &str) -> String {
        format!("{}.{}", parent_id, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default, deserialize_with = "de_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    /// References by id; may point at tasks that do not exist.
    #[serde(default, deserialize_with = "de_ids")]
    pub dependencies: Vec<String>,
    #[serde(default, deserialize_with = "de_or_default")]
    pub subtasks: Vec<Subtask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_strategy: Option<String>,
    /// Fields this crate does not model, re-emitted unchanged.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Task {
    /// Minimal task, mostly useful for building fixtures.
    pub fn new(id: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            description: String::new(),
            status,
            priority: None,
            dependencies: Vec::new(),
            subtasks: Vec::new(),
            created: None,
            updated: None,
            details: None,
            test_strategy: None,
            extra: Map::new(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Done
    }
}

/// One tag's worth of tasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagData {
    #[serde(default, deserialize_with = "de_or_default")]
    pub tasks: Vec<Task>,
    #[serde(default, deserialize_with = "de_or_default")]
    pub metadata: Map<String, Value>,
}

/// Legacy single-list layout: `{"tasks": [...], "metadata": {...}}`.
#[derive(Deserialize)]
struct FlatData {
    tasks: Vec<Task>,
    #[serde(default, deserialize_with = "de_or_default")]
    metadata: Map<String, Value>,
}

/// A top-level `tasks` array marks the legacy layout; anything else is a
/// tag map.
fn is_flat(value: &Value) -> bool {
    value.get("tasks").is_some_and(Value::is_array)
}

/// The full task dataset, keyed by tag, in file order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Snapshot {
    tags: IndexMap<String, TagData>,
}

impl<'de> Deserialize<'de> for Snapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let parsed = if is_flat(&value) {
            FlatData::deserialize(value).map(Self::from_flat)
        } else {
            IndexMap::<String, TagData>::deserialize(value).map(Self::from_tags)
        };
        parsed.map_err(serde::de::Error::custom)
    }
}

impl Snapshot {
    /// The degraded state used for missing or unreadable files.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_tags(tags: IndexMap<String, TagData>) -> Self {
        Self { tags }
    }

    /// Single-tag snapshot under [`DEFAULT_TAG`].
    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        let mut tags = IndexMap::new();
        tags.insert(
            DEFAULT_TAG.to_string(),
            TagData {
                tasks,
                metadata: Map::new(),
            },
        );
        Self { tags }
    }

    /// Parse a tasks file in either layout.
    ///
    /// The layout is picked first and the content is then parsed straight
    /// into it, so errors keep their line and column.
    pub fn parse(content: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(content)?;
        if is_flat(&value) {
            serde_json::from_str::<FlatData>(content).map(Self::from_flat)
        } else {
            serde_json::from_str::<IndexMap<String, TagData>>(content).map(Self::from_tags)
        }
    }

    fn from_flat(flat: FlatData) -> Self {
        let tag = flat
            .metadata
            .get("tag")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_TAG)
            .to_string();
        let mut tags = IndexMap::new();
        tags.insert(
            tag,
            TagData {
                tasks: flat.tasks,
                metadata: flat.metadata,
            },
        );
        Self { tags }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tags.keys().map(String::as_str)
    }

    pub fn tag(&self, name: &str) -> Option<&TagData> {
        self.tags.get(name)
    }

    /// `master` if present, otherwise the first tag in file order.
    pub fn active_tag(&self) -> Option<(&str, &TagData)> {
        if let Some((name, data)) = self.tags.get_key_value(DEFAULT_TAG) {
            return Some((name.as_str(), data));
        }
        self.tags
            .get_index(0)
            .map(|(name, data)| (name.as_str(), data))
    }

    /// Tasks of the active tag; empty when the snapshot has no tags.
    pub fn active_tasks(&self) -> &[Task] {
        self.active_tag()
            .map(|(_, data)| data.tasks.as_slice())
            .unwrap_or(&[])
    }
}

/// Read and parse a tasks file.
///
/// Returns [`SyncError::SnapshotMissing`] when the file does not exist and
/// [`SyncError::SnapshotUnreadable`] for any other I/O or JSON failure.
pub fn load_snapshot(path: &Path) -> Result<Snapshot, SyncError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SyncError::SnapshotMissing {
                path: path.to_path_buf(),
            }
        } else {
            SyncError::SnapshotUnreadable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        }
    })?;
    Snapshot::parse(&content).map_err(|e| SyncError::SnapshotUnreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
