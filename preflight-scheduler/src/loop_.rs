//! The scheduler loop (C6): consumes cache deltas, mutates the job queue,
//! pops due jobs, and dispatches them to the executor.
//!
//! Ported in shape from the teacher's request/reply actor loops
//! (`chat_worker::run_worker`), widened to a three-way `tokio::select!` over
//! the update feed, a re-armed sleep, and a shutdown signal, per spec.md
//! §4.6.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use preflight_core::{Instant, UserDelta};
use preflight_repository::{KanbanClient, Repository, TaskServiceClient};
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::executor::JobExecutor;
use crate::queue::JobQueue;

/// How far out to re-arm the timer when the queue is empty. Not a
/// spec-mandated constant — just keeps the sleep future from requiring a
/// `Duration::MAX` that some platforms reject.
const FAR_FUTURE: StdDuration = StdDuration::from_secs(365 * 24 * 3600);

fn apply_delta(queue: &mut JobQueue, delta: UserDelta, now: Instant) {
    if delta.remove_user {
        queue.remove_user(&delta.user.id);
        return;
    }
    let user = Arc::new(delta.user);
    for cl in delta.added.into_iter().chain(delta.updated) {
        queue.set_checklist(user.clone(), cl, now);
    }
    for cl in delta.removed {
        queue.remove_checklist(&cl.id);
    }
    queue.set_user(user, now);
}

fn sleep_duration_until(fire_time: Option<Instant>, now: Instant) -> StdDuration {
    match fire_time {
        None => FAR_FUTURE,
        Some(ft) => {
            let delta = ft.with_timezone(&chrono::Utc) - now.with_timezone(&chrono::Utc);
            delta.to_std().unwrap_or(StdDuration::ZERO)
        }
    }
}

/// Run the scheduler loop until `shutdown` fires. `now` is supplied by the
/// caller at each tick (rather than read from the system clock directly) so
/// tests can drive it deterministically; production callers pass a closure
/// around the current zoned time.
pub async fn run<R, T, K>(
    mut updates: mpsc::UnboundedReceiver<UserDelta>,
    mut queue: JobQueue,
    executor: JobExecutor<R, T, K>,
    mut shutdown: mpsc::UnboundedReceiver<()>,
    now_fn: impl Fn() -> Instant,
) where
    R: Repository,
    T: TaskServiceClient,
    K: KanbanClient,
{
    loop {
        let now = now_fn();
        let sleep = tokio::time::sleep(sleep_duration_until(queue.next_fire_time(), now));
        tokio::pin!(sleep);

        tokio::select! {
            _ = shutdown.recv() => {
                // In-flight dispatches below already completed; nothing to
                // interrupt here since we only ever await one at a time.
                return;
            }
            Some(delta) = updates.recv() => {
                let now = now_fn();
                apply_delta(&mut queue, delta, now);
                drain_due(&mut queue, &executor, now).await;
            }
            _ = &mut sleep => {
                let now = now_fn();
                drain_due(&mut queue, &executor, now).await;
            }
        }
    }
}

async fn drain_due<R, T, K>(queue: &mut JobQueue, executor: &JobExecutor<R, T, K>, now: Instant)
where
    R: Repository,
    T: TaskServiceClient,
    K: KanbanClient,
{
    while let Some(job) = queue.pop(now) {
        if let Err(e) = executor.execute(&job).await {
            error!(checklist_id = %job.checklist_id, error = %e, "job dispatch failed");
        }
    }
}

/// Shorthand for production callers: the real wall clock in a user's zone.
/// The scheduler only ever needs "now in some zone" to hand to `next_add`/
/// `action`; the zone itself is carried by each job's own schedule
/// evaluation, so UTC is a safe universal reference here.
pub fn wall_clock_now() -> Instant {
    Utc::now().with_timezone(&chrono_tz::UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_duration_is_zero_when_overdue() {
        let tz: chrono_tz::Tz = chrono_tz::UTC;
        use chrono::TimeZone;
        let now = tz.with_ymd_and_hms(2016, 4, 4, 9, 0, 0).unwrap();
        let due = tz.with_ymd_and_hms(2016, 4, 4, 8, 0, 0).unwrap();
        assert_eq!(sleep_duration_until(Some(due), now), StdDuration::ZERO);
    }

    #[test]
    fn sleep_duration_is_far_future_when_queue_empty() {
        let tz: chrono_tz::Tz = chrono_tz::UTC;
        use chrono::TimeZone;
        let now = tz.with_ymd_and_hms(2016, 4, 4, 9, 0, 0).unwrap();
        assert_eq!(sleep_duration_until(None, now), FAR_FUTURE);
    }
}
