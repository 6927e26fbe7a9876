//! Structural diff between two versions of a user, computed on every cache
//! write (C3, consumed by C4/C6).
//!
//! Ported from `original_source/user/user.go`'s `getDelta`.

use crate::checklist::Checklist;
use crate::user::User;

/// Describes exactly one of: a user appearing, a user disappearing, or a
/// user's checklists changing. `added`, `removed`, and `updated` partition
/// the checklists that changed; checklists untouched are omitted from all
/// three.
#[derive(Debug, Clone, PartialEq)]
pub struct UserDelta {
    pub user: User,
    pub remove_user: bool,
    pub added: Vec<Checklist>,
    pub removed: Vec<Checklist>,
    pub updated: Vec<Checklist>,
}

/// Diff `old` against `new`. Both `None` yields `None`. When both are
/// `Some`, a delta is always returned — even with empty `added`/`removed`/
/// `updated` — because the scheduler's `setUser` must run on every write to
/// refresh the credential pointers held by pending jobs (spec.md §4.6);
/// callers that want to skip no-op rewrites coalesce at the publication
/// layer (C4), not here.
pub fn diff(old: Option<&User>, new: Option<&User>) -> Option<UserDelta> {
    match (old, new) {
        (None, None) => None,
        (None, Some(new)) => Some(UserDelta {
            user: new.clone(),
            remove_user: false,
            added: new.checklists.clone(),
            removed: Vec::new(),
            updated: Vec::new(),
        }),
        (Some(old), None) => Some(UserDelta {
            user: old.clone(),
            remove_user: true,
            added: Vec::new(),
            removed: old.checklists.clone(),
            updated: Vec::new(),
        }),
        (Some(old), Some(new)) => {
            let mut by_id: std::collections::HashMap<_, _> =
                old.checklists.iter().map(|cl| (cl.id.clone(), cl)).collect();

            let mut added = Vec::new();
            let mut updated = Vec::new();

            for cl in &new.checklists {
                match by_id.remove(&cl.id) {
                    None => added.push(cl.clone()),
                    Some(old_cl) => {
                        if !old_cl.structurally_eq(cl) {
                            updated.push(cl.clone());
                        }
                    }
                }
            }

            // Whatever's left in `by_id` was never matched by a new checklist.
            let removed: Vec<Checklist> = by_id.into_values().cloned().collect();

            Some(UserDelta {
                user: new.clone(),
                remove_user: false,
                added,
                removed,
                updated,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checklist::{ChecklistId, TasksSource, TasksTarget, UpdateRecord};
    use crate::user::{GeneralSettings, UserId};
    use preflight_security::Security;

    fn cl(id: &str, task: &str) -> Checklist {
        Checklist {
            id: ChecklistId::new(id),
            name: id.into(),
            tasks_source: TasksSource::Literal,
            tasks_target: TasksTarget::TaskService,
            is_scheduled: false,
            tasks: vec![task.into()],
            kanban_ref: None,
            schedule: None,
            record: UpdateRecord::default(),
        }
    }

    fn user(checklists: Vec<Checklist>) -> User {
        User {
            id: UserId::new("u1"),
            email: "a@example.com".into(),
            settings: GeneralSettings { timezone: "America/Denver".into(), kanban_board: "b".into() },
            security: Security::new("hunter2").unwrap(),
            checklists,
        }
    }

    #[test]
    fn both_absent_is_none() {
        assert!(diff(None, None).is_none());
    }

    #[test]
    fn new_user_is_all_added() {
        let u = user(vec![cl("a", "x"), cl("b", "y")]);
        let d = diff(None, Some(&u)).unwrap();
        assert!(!d.remove_user);
        assert_eq!(d.added.len(), 2);
        assert!(d.removed.is_empty());
        assert!(d.updated.is_empty());
    }

    #[test]
    fn removed_user_is_all_removed() {
        let u = user(vec![cl("a", "x")]);
        let d = diff(Some(&u), None).unwrap();
        assert!(d.remove_user);
        assert_eq!(d.removed.len(), 1);
    }

    #[test]
    fn unchanged_user_still_emits_delta_with_empty_partitions() {
        let u = user(vec![cl("a", "x")]);
        let d = diff(Some(&u), Some(&u)).unwrap();
        assert!(!d.remove_user);
        assert!(d.added.is_empty() && d.removed.is_empty() && d.updated.is_empty());
    }

    #[test]
    fn classifies_added_updated_removed() {
        let old = user(vec![cl("a", "x"), cl("b", "y")]);
        let new = user(vec![cl("a", "x-changed"), cl("c", "z")]);
        let d = diff(Some(&old), Some(&new)).unwrap();
        assert_eq!(d.added.iter().map(|c| c.id.0.clone()).collect::<Vec<_>>(), vec!["c"]);
        assert_eq!(d.updated.iter().map(|c| c.id.0.clone()).collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(d.removed.iter().map(|c| c.id.0.clone()).collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn record_only_change_is_not_updated() {
        let mut old_cl = cl("a", "x");
        old_cl.record.ids = vec![];
        let mut new_cl = cl("a", "x");
        new_cl.record.ids = vec!["ext-1".into()];
        let old = user(vec![old_cl]);
        let new = user(vec![new_cl]);
        let d = diff(Some(&old), Some(&new)).unwrap();
        assert!(d.updated.is_empty());
    }
}
