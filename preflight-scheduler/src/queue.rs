//! Binary min-heap of due `UpdateJob`s plus per-checklist/per-user tracking
//! for O(log n) cancellation (C5).
//!
//! Ported from `original_source/persistence/scheduler.go`'s `Queue`. That
//! source's `insert`/`remove`/`Pop` are kept almost verbatim in shape (array
//! heap, parent/child index arithmetic, a `heapIndex` kept in sync on every
//! swap), but `remove` there only downheaps after swapping in the last leaf.
//! That is correct for popping the root (the displaced leaf can only need to
//! sink) but wrong for an interior remove, where the displaced leaf can also
//! need to rise above its new parent. This port does both directions on
//! every removal, fixing that bug per the redesign called for as soon as
//! cancellation-by-id (not just pop-the-root) is added.
//!
//! The source also left `AddChecklist`/`AddUser`/`RemoveChecklist`/
//! `RemoveUser`/`Schedule` as commented-out TODOs; the tracker bookkeeping
//! and `set_checklist`/`set_user`/`remove_checklist`/`remove_user` below are
//! this crate's implementation of those, built from the prose contract in
//! the component design (not ported from Go, since none existed).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use preflight_core::{next_add, next_remove, Checklist, ChecklistId, Instant, User, UserId};
use tracing::warn;

pub type JobId = u64;

/// Reinterpret `now` in `user`'s own IANA zone (spec.md §3/§9's per-user
/// wall-clock semantics) so the calendar arithmetic in `next_add`/
/// `next_remove`/`action` — all of which derive their working zone from
/// `now.timezone()` — sees the user's local date and weekday, not whatever
/// zone the caller happened to pass in (production callers pass UTC).
/// A user whose stored timezone no longer parses falls back to `now`'s own
/// zone rather than panicking; that's already surfaced as a 424 wherever
/// `GeneralSettings::validate` runs on the write path.
fn user_local_now(now: Instant, user: &User) -> Instant {
    match user.settings.validate() {
        Ok(tz) => now.with_timezone(&tz),
        Err(_) => {
            warn!(user_id = %user.id, "scheduling against an unparseable user timezone; using now's zone");
            now
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpdateJob {
    pub id: JobId,
    pub fire_time: Instant,
    pub user: Arc<User>,
    pub checklist_id: ChecklistId,
    pub is_remove: bool,
    /// External ids to retract; populated only for remove jobs.
    pub task_ids: Vec<String>,
}

struct Tracker {
    user: Arc<User>,
    checklist: Checklist,
    add_job: Option<JobId>,
    remove_job: Option<JobId>,
}

#[derive(Default)]
pub struct JobQueue {
    heap: Vec<UpdateJob>,
    position: HashMap<JobId, usize>,
    next_id: JobId,
    trackers: HashMap<ChecklistId, Tracker>,
    by_user: HashMap<UserId, HashSet<ChecklistId>>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// The soonest upcoming fire time, or `None` if the queue is empty —
    /// what the scheduler loop re-arms its timer to (spec.md §4.6).
    pub fn next_fire_time(&self) -> Option<Instant> {
        self.heap.first().map(|j| j.fire_time)
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.position.insert(self.heap[a].id, a);
        self.position.insert(self.heap[b].id, b);
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[i].fire_time < self.heap[parent].fire_time {
                self.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        loop {
            let left = 2 * i + 1;
            let right = 2 * i + 2;
            let mut smallest = i;
            if left < self.heap.len() && self.heap[left].fire_time < self.heap[smallest].fire_time {
                smallest = left;
            }
            if right < self.heap.len() && self.heap[right].fire_time < self.heap[smallest].fire_time {
                smallest = right;
            }
            if smallest == i {
                break;
            }
            self.swap(i, smallest);
            i = smallest;
        }
    }

    fn insert(&mut self, mut job: UpdateJob) -> JobId {
        let id = self.next_id;
        self.next_id += 1;
        job.id = id;
        let idx = self.heap.len();
        self.heap.push(job);
        self.position.insert(id, idx);
        self.sift_up(idx);
        id
    }

    /// Remove the job at heap index `i`, restoring the heap property in
    /// both directions (see module doc).
    fn remove_at_index(&mut self, i: usize) -> UpdateJob {
        let last = self.heap.len() - 1;
        if i != last {
            self.swap(i, last);
        }
        let job = self.heap.pop().unwrap();
        self.position.remove(&job.id);
        if i < self.heap.len() {
            self.sift_down(i);
            self.sift_up(i);
        }
        job
    }

    fn cancel(&mut self, id: JobId) -> Option<UpdateJob> {
        let idx = self.position.get(&id).copied()?;
        Some(self.remove_at_index(idx))
    }

    /// Extract the due job at the root, if `fire_time <= now`. When the
    /// extracted job was an add for a checklist still scheduled, a fresh
    /// add-job is planted for its next occurrence; symmetrically for a
    /// remove job whose checklist still has an end time.
    pub fn pop(&mut self, now: Instant) -> Option<UpdateJob> {
        let due = self.heap.first().is_some_and(|j| j.fire_time <= now);
        if !due {
            return None;
        }
        let job = self.remove_at_index(0);

        if let Some(tracker) = self.trackers.get(&job.checklist_id) {
            let local_now = user_local_now(now, tracker.user.as_ref());
            let still_scheduled = tracker.checklist.is_scheduled && tracker.checklist.schedule.is_some();
            if job.is_remove {
                if still_scheduled && tracker.checklist.schedule.as_ref().is_some_and(|s| s.end.is_some()) {
                    let schedule = tracker.checklist.schedule.clone().unwrap();
                    let fire_time = next_remove(&schedule, local_now).unwrap();
                    let user = tracker.user.clone();
                    let checklist_id = job.checklist_id.clone();
                    let new_id = self.insert(UpdateJob {
                        id: 0,
                        fire_time,
                        user,
                        checklist_id: checklist_id.clone(),
                        is_remove: true,
                        task_ids: Vec::new(),
                    });
                    self.trackers.get_mut(&job.checklist_id).unwrap().remove_job = Some(new_id);
                } else {
                    self.trackers.get_mut(&job.checklist_id).unwrap().remove_job = None;
                }
            } else if still_scheduled {
                let schedule = tracker.checklist.schedule.clone().unwrap();
                let fire_time = next_add(&schedule, local_now);
                let user = tracker.user.clone();
                let checklist_id = job.checklist_id.clone();
                let new_id = self.insert(UpdateJob {
                    id: 0,
                    fire_time,
                    user,
                    checklist_id: checklist_id.clone(),
                    is_remove: false,
                    task_ids: Vec::new(),
                });
                self.trackers.get_mut(&job.checklist_id).unwrap().add_job = Some(new_id);
            } else {
                self.trackers.get_mut(&job.checklist_id).unwrap().add_job = None;
            }
        }

        Some(job)
    }

    /// Upsert the tracker for `checklist` and re-plan its add-job (and, by
    /// the same logic, its remove-job) whenever the schedule changed or the
    /// tracker is new. A checklist that stopped being scheduled has both
    /// jobs cancelled and no replacement planted.
    pub fn set_checklist(&mut self, user: Arc<User>, checklist: Checklist, now: Instant) {
        self.by_user.entry(user.id.clone()).or_default().insert(checklist.id.clone());

        let prior_schedule = self.trackers.get(&checklist.id).map(|t| t.checklist.schedule.clone());
        let schedule_changed = match &prior_schedule {
            None => true,
            Some(prior) => !schedule_eq(prior.as_ref(), checklist.schedule.as_ref()),
        };

        let (old_add, old_remove) = match self.trackers.get(&checklist.id) {
            Some(t) => (t.add_job, t.remove_job),
            None => (None, None),
        };

        let active = checklist.is_scheduled && checklist.schedule.is_some();

        let mut add_job = old_add;
        let mut remove_job = old_remove;

        if schedule_changed {
            if let Some(id) = old_add {
                self.cancel(id);
            }
            if let Some(id) = old_remove {
                self.cancel(id);
            }
            add_job = None;
            remove_job = None;

            if active {
                let local_now = user_local_now(now, user.as_ref());
                let schedule = checklist.schedule.clone().unwrap();
                let fire_time = next_add(&schedule, local_now);
                add_job = Some(self.insert(UpdateJob {
                    id: 0,
                    fire_time,
                    user: user.clone(),
                    checklist_id: checklist.id.clone(),
                    is_remove: false,
                    task_ids: Vec::new(),
                }));
                if schedule.end.is_some() {
                    let fire_time = next_remove(&schedule, local_now).unwrap();
                    remove_job = Some(self.insert(UpdateJob {
                        id: 0,
                        fire_time,
                        user: user.clone(),
                        checklist_id: checklist.id.clone(),
                        is_remove: true,
                        task_ids: checklist.record.ids.clone(),
                    }));
                }
            }
        } else if !active {
            if let Some(id) = old_add {
                self.cancel(id);
            }
            if let Some(id) = old_remove {
                self.cancel(id);
            }
            add_job = None;
            remove_job = None;
        }

        self.trackers.insert(checklist.id.clone(), Tracker { user, checklist, add_job, remove_job });
    }

    /// Cancel the tracker's jobs and drop it from both indexes.
    pub fn remove_checklist(&mut self, id: &ChecklistId) {
        if let Some(tracker) = self.trackers.remove(id) {
            if let Some(job) = tracker.add_job {
                self.cancel(job);
            }
            if let Some(job) = tracker.remove_job {
                self.cancel(job);
            }
            if let Some(set) = self.by_user.get_mut(&tracker.user.id) {
                set.remove(id);
            }
        }
    }

    /// Refresh the user reference held by every tracker (and pending job)
    /// belonging to `user`, without touching schedules or fire times. This
    /// is how credential changes (new token, new timezone) reach jobs that
    /// are already planted in the queue.
    pub fn set_user(&mut self, user: Arc<User>, _now: Instant) {
        let Some(checklist_ids) = self.by_user.get(&user.id).cloned() else {
            return;
        };
        for id in checklist_ids {
            if let Some(tracker) = self.trackers.get_mut(&id) {
                tracker.user = user.clone();
                if let Some(job_id) = tracker.add_job {
                    if let Some(pos) = self.position.get(&job_id) {
                        self.heap[*pos].user = user.clone();
                    }
                }
                if let Some(job_id) = tracker.remove_job {
                    if let Some(pos) = self.position.get(&job_id) {
                        self.heap[*pos].user = user.clone();
                    }
                }
            }
        }
    }

    /// Remove every tracker belonging to `id`, cancelling their jobs.
    pub fn remove_user(&mut self, id: &UserId) {
        let Some(checklist_ids) = self.by_user.remove(id) else {
            return;
        };
        for cl_id in checklist_ids {
            if let Some(tracker) = self.trackers.remove(&cl_id) {
                if let Some(job) = tracker.add_job {
                    self.cancel(job);
                }
                if let Some(job) = tracker.remove_job {
                    self.cancel(job);
                }
            }
        }
    }

    #[cfg(test)]
    fn heap_is_valid(&self) -> bool {
        for i in 0..self.heap.len() {
            let left = 2 * i + 1;
            let right = 2 * i + 2;
            if left < self.heap.len() && self.heap[left].fire_time < self.heap[i].fire_time {
                return false;
            }
            if right < self.heap.len() && self.heap[right].fire_time < self.heap[i].fire_time {
                return false;
            }
            if self.position.get(&self.heap[i].id) != Some(&i) {
                return false;
            }
        }
        true
    }
}

fn schedule_eq(a: Option<&preflight_core::Schedule>, b: Option<&preflight_core::Schedule>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.interval_days == b.interval_days && a.start == b.start && a.end == b.end && a.days == b.days,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use preflight_core::{GeneralSettings, Schedule, TasksSource, TasksTarget, UpdateRecord, UserId};
    use preflight_security::Security;
    use std::collections::HashSet as StdHashSet;

    fn user(id: &str) -> Arc<User> {
        Arc::new(User {
            id: UserId::new(id),
            email: format!("{id}@example.com"),
            settings: GeneralSettings { timezone: "America/Denver".into(), kanban_board: "b".into() },
            security: Security::new("hunter2").unwrap(),
            checklists: vec![],
        })
    }

    fn checklist(id: &str, schedule: Option<Schedule>) -> Checklist {
        Checklist {
            id: ChecklistId::new(id),
            name: id.into(),
            tasks_source: TasksSource::Literal,
            tasks_target: TasksTarget::TaskService,
            is_scheduled: schedule.is_some(),
            tasks: vec!["a".into()],
            kanban_ref: None,
            schedule,
            record: UpdateRecord::default(),
        }
    }

    fn denver_now(y: i32, m: u32, d: u32, h: u32, min: u32) -> Instant {
        use chrono::TimeZone;
        let tz: chrono_tz::Tz = "America/Denver".parse().unwrap();
        tz.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn insert_many_and_pop_in_fire_time_order() {
        let mut q = JobQueue::new();
        let u = user("u1");
        let now = denver_now(2016, 4, 4, 1, 0);
        for i in 0..20 {
            let sched = Schedule::new(0, StdHashSet::new(), "09:00", None).unwrap();
            let cl = checklist(&format!("cl{i}"), Some(sched));
            q.set_checklist(u.clone(), cl, now + chrono::Duration::minutes(i));
        }
        assert!(q.heap_is_valid());
        assert_eq!(q.len(), 20);

        let far_future = denver_now(2030, 1, 1, 0, 0);
        let mut last = None;
        let mut count = 0;
        while let Some(job) = q.pop(far_future) {
            if let Some(prev) = last {
                assert!(job.fire_time >= prev);
            }
            last = Some(job.fire_time);
            count += 1;
            assert!(q.heap_is_valid());
            // after each add-job pop, a fresh one is reinserted for a
            // still-scheduled checklist, so stop once we've observed as
            // many distinct pops as checklists inserted.
            if count >= 20 {
                break;
            }
        }
        assert_eq!(count, 20);
    }

    #[test]
    fn set_checklist_replans_add_job_on_schedule_change() {
        let mut q = JobQueue::new();
        let u = user("u1");
        let now = denver_now(2016, 4, 4, 1, 0);
        let sched_a = Schedule::new(0, StdHashSet::new(), "09:00", None).unwrap();
        q.set_checklist(u.clone(), checklist("cl1", Some(sched_a)), now);
        let first_fire = q.next_fire_time().unwrap();

        let sched_b = Schedule::new(0, StdHashSet::new(), "11:00", None).unwrap();
        q.set_checklist(u.clone(), checklist("cl1", Some(sched_b)), now);
        let second_fire = q.next_fire_time().unwrap();

        assert_ne!(first_fire, second_fire);
        assert_eq!(q.len(), 1);
        assert!(q.heap_is_valid());
    }

    #[test]
    fn set_checklist_is_noop_reinsert_when_schedule_unchanged() {
        let mut q = JobQueue::new();
        let u = user("u1");
        let now = denver_now(2016, 4, 4, 1, 0);
        let sched = Schedule::new(0, StdHashSet::new(), "09:00", None).unwrap();
        q.set_checklist(u.clone(), checklist("cl1", Some(sched.clone())), now);
        let first_fire = q.next_fire_time().unwrap();

        q.set_checklist(u.clone(), checklist("cl1", Some(sched)), now + chrono::Duration::minutes(5));
        let second_fire = q.next_fire_time().unwrap();

        assert_eq!(first_fire, second_fire);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn remove_checklist_cancels_its_jobs() {
        let mut q = JobQueue::new();
        let u = user("u1");
        let now = denver_now(2016, 4, 4, 1, 0);
        let sched = Schedule::new(0, StdHashSet::new(), "09:00", Some("17:00")).unwrap();
        q.set_checklist(u.clone(), checklist("cl1", Some(sched)), now);
        assert_eq!(q.len(), 2); // add + remove job

        q.remove_checklist(&ChecklistId::new("cl1"));
        assert_eq!(q.len(), 0);
        assert!(q.heap_is_valid());
    }

    #[test]
    fn unscheduling_a_checklist_cancels_its_add_job() {
        let mut q = JobQueue::new();
        let u = user("u1");
        let now = denver_now(2016, 4, 4, 1, 0);
        let sched = Schedule::new(0, StdHashSet::new(), "09:00", None).unwrap();
        q.set_checklist(u.clone(), checklist("cl1", Some(sched)), now);
        assert_eq!(q.len(), 1);

        let mut unscheduled = checklist("cl1", None);
        unscheduled.is_scheduled = false;
        q.set_checklist(u.clone(), unscheduled, now);
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn set_user_refreshes_pending_job_user_reference() {
        let mut q = JobQueue::new();
        let u1 = user("u1");
        let now = denver_now(2016, 4, 4, 1, 0);
        let sched = Schedule::new(0, StdHashSet::new(), "09:00", None).unwrap();
        q.set_checklist(u1.clone(), checklist("cl1", Some(sched)), now);

        let mut u1_updated = (*u1).clone();
        u1_updated.email = "changed@example.com".into();
        let u1_updated = Arc::new(u1_updated);
        q.set_user(u1_updated.clone(), now);

        let job = q.pop(denver_now(2030, 1, 1, 0, 0)).unwrap();
        assert_eq!(job.user.email, "changed@example.com");
    }

    #[test]
    fn remove_user_cancels_all_of_its_jobs() {
        let mut q = JobQueue::new();
        let u = user("u1");
        let now = denver_now(2016, 4, 4, 1, 0);
        let sched = Schedule::new(0, StdHashSet::new(), "09:00", Some("17:00")).unwrap();
        q.set_checklist(u.clone(), checklist("cl1", Some(sched.clone())), now);
        q.set_checklist(u.clone(), checklist("cl2", Some(sched)), now);
        assert_eq!(q.len(), 4);

        q.remove_user(&u.id);
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn set_checklist_plans_in_users_zone_even_when_now_is_utc() {
        // Production callers (`wall_clock_now`) always pass `now` zoned in
        // UTC; the fire time planted for a Denver user must still land at
        // 09:00 Denver local, not 09:00 UTC (03:00 Denver).
        use chrono::TimeZone;
        let mut q = JobQueue::new();
        let u = user("u1"); // settings.timezone == "America/Denver"
        let now_utc = chrono_tz::UTC.with_ymd_and_hms(2016, 4, 4, 7, 0, 0).unwrap();
        let sched = Schedule::new(0, StdHashSet::new(), "09:00", None).unwrap();
        q.set_checklist(u.clone(), checklist("cl1", Some(sched)), now_utc);

        let fire = q.next_fire_time().unwrap();
        let denver: chrono_tz::Tz = "America/Denver".parse().unwrap();
        let expected = denver.with_ymd_and_hms(2016, 4, 4, 9, 0, 0).unwrap();
        assert_eq!(fire, expected);
    }

    #[test]
    fn interior_removal_leaves_a_valid_heap() {
        let mut q = JobQueue::new();
        let u = user("u1");
        let now = denver_now(2016, 4, 4, 1, 0);
        for i in 0..10 {
            let sched = Schedule::new(0, StdHashSet::new(), "09:00", None).unwrap();
            q.set_checklist(u.clone(), checklist(&format!("cl{i}"), Some(sched)), now + chrono::Duration::minutes(i * 3));
        }
        assert!(q.heap_is_valid());
        // Cancel a handful of interior entries (not necessarily the root).
        q.remove_checklist(&ChecklistId::new("cl3"));
        assert!(q.heap_is_valid());
        q.remove_checklist(&ChecklistId::new("cl7"));
        assert!(q.heap_is_valid());
        q.remove_checklist(&ChecklistId::new("cl0"));
        assert!(q.heap_is_valid());
    }
}
