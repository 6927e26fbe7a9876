//! User, checklist, and schedule aggregates, plus the structural diff that
//! drives the cache's change feed.
//!
//! Grounded on `original_source/user/user.go` and
//! `original_source/checklist/checklist.go`.

pub mod checklist;
pub mod delta;
pub mod schedule;
pub mod user;

pub use checklist::{Checklist, ChecklistId, KanbanRef, TasksSource, TasksTarget, UpdateRecord};
pub use delta::{diff, UserDelta};
pub use schedule::{action, next_add, next_remove, parse_weekday, Instant, Schedule};
pub use user::{GeneralSettings, User, UserId};
