//! Checklist aggregate: the unit of work the scheduling core plans around.
//!
//! Ported from `original_source/checklist/checklist.go`'s `Checklist` struct
//! and its validation helpers.

use serde::{Deserialize, Serialize};

use crate::schedule::Schedule;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChecklistId(pub String);

impl ChecklistId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ChecklistId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TasksSource {
    Literal,
    Kanban,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TasksTarget {
    TaskService,
}

/// Board/list coordinates identifying where a kanban-sourced checklist reads
/// its open cards from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KanbanRef {
    pub board: String,
    pub list: String,
}

/// Server-maintained bookkeeping of the checklist's last materialization.
/// Excluded from structural equality — it is not part of the checklist's
/// configuration, only its runtime state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRecord {
    pub ids: Vec<String>,
    pub time: Option<chrono::DateTime<chrono::Utc>>,
    pub add_time: Option<chrono::DateTime<chrono::Utc>>,
}

impl UpdateRecord {
    /// True iff the last action was an add that has not yet been retracted.
    pub fn is_materialized(&self) -> bool {
        !self.ids.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checklist {
    pub id: ChecklistId,
    pub name: String,
    pub tasks_source: TasksSource,
    pub tasks_target: TasksTarget,
    pub is_scheduled: bool,
    /// Populated when `tasks_source == Literal`.
    pub tasks: Vec<String>,
    /// Populated when `tasks_source == Kanban`.
    pub kanban_ref: Option<KanbanRef>,
    pub schedule: Option<Schedule>,
    pub record: UpdateRecord,
}

impl Checklist {
    /// `is_scheduled` implies `schedule` is present; literal/kanban sourcing
    /// implies the matching ref is populated.
    pub fn validate(&self) -> Result<(), preflight_errors::PreflightError> {
        use preflight_errors::{ErrorKind, PreflightError};
        if self.is_scheduled && self.schedule.is_none() {
            return Err(PreflightError::simple(
                ErrorKind::Validation,
                format!("checklist {}: is_scheduled requires a schedule", self.id),
            ));
        }
        match self.tasks_source {
            TasksSource::Kanban if self.kanban_ref.is_none() => {
                return Err(PreflightError::simple(
                    ErrorKind::Validation,
                    format!("checklist {}: kanban source requires a kanban_ref", self.id),
                ));
            }
            _ => {}
        }
        Ok(())
    }

    /// Deep equality over configuration fields, ignoring `record` and
    /// comparing `schedule.days` order-insensitively (spec.md §4.3).
    pub fn structurally_eq(&self, other: &Checklist) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.tasks_source == other.tasks_source
            && self.tasks_target == other.tasks_target
            && self.is_scheduled == other.is_scheduled
            && self.tasks == other.tasks
            && self.kanban_ref == other.kanban_ref
            && schedules_structurally_eq(self.schedule.as_ref(), other.schedule.as_ref())
    }
}

fn schedules_structurally_eq(a: Option<&Schedule>, b: Option<&Schedule>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            a.interval_days == b.interval_days
                && a.start == b.start
                && a.end == b.end
                && a.days == b.days // HashSet's PartialEq is already order-insensitive
        }
        _ => false,
    }
}
