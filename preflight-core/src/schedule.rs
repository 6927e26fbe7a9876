//! Calendar-aware schedule evaluation (C1).
//!
//! Ported from `original_source/checklist/checklist.go`'s `Schedule.Action`
//! and `parseWeekday`, with `nextAdd`/`nextRemove` added per `spec.md` §4.1
//! (the source never split those out as standalone functions — it inlined
//! their logic into the single `Action` method).

use std::collections::HashSet;

use chrono::{Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Weekday};
use chrono_tz::Tz;
use preflight_errors::{ErrorKind, PreflightError};
use serde::{Deserialize, Serialize};

pub type Instant = chrono::DateTime<Tz>;

/// The calendar+interval rule governing when a checklist's tasks are added
/// (and optionally retracted) each day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub interval_days: u32,
    /// Empty means "every day".
    pub days: HashSet<Weekday>,
    pub start: NaiveTime,
    pub end: Option<NaiveTime>,
}

impl Schedule {
    pub fn new(interval_days: u32, days: HashSet<Weekday>, start: &str, end: Option<&str>) -> Result<Self, PreflightError> {
        let start = parse_time_of_day(start)?;
        let end = end.map(parse_time_of_day).transpose()?;
        Ok(Self { interval_days, days, start, end })
    }
}

/// Parse `"15:04"`-style time-of-day strings, matching the source's
/// `time.ParseInLocation("15:04", ...)` calls.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime, PreflightError> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|e| {
        PreflightError::new(
            ErrorKind::Unprocessable,
            format!("schedule: error parsing time of day \"{s}\": {e}"),
            format!("Unable to parse time \"{s}\"; should be like \"15:04\""),
        )
    })
}

/// Accepts the full name, lowercase, and three-or-four-letter abbreviations
/// (case-insensitive), per `spec.md` §4.1 and the source's `parseWeekday`.
pub fn parse_weekday(s: &str) -> Result<Weekday, PreflightError> {
    match s.to_lowercase().as_str() {
        "sunday" | "sun" => Ok(Weekday::Sun),
        "monday" | "mon" => Ok(Weekday::Mon),
        "tuesday" | "tue" | "tues" => Ok(Weekday::Tue),
        "wednesday" | "wed" => Ok(Weekday::Wed),
        "thursday" | "thu" | "thur" | "thurs" => Ok(Weekday::Thu),
        "friday" | "fri" => Ok(Weekday::Fri),
        "saturday" | "sat" => Ok(Weekday::Sat),
        other => Err(PreflightError::new(
            ErrorKind::Unprocessable,
            format!("schedule.parse_weekday: unable to parse \"{other}\""),
            format!("day of week \"{s}\" not understood"),
        )),
    }
}

fn weekday_offset(now_days_from_sunday: i64, target: Weekday) -> i64 {
    (target.num_days_from_sunday() as i64 - now_days_from_sunday).rem_euclid(7)
}

/// Build a zoned instant from a local date and time-of-day, per `spec.md`'s
/// allowance to "accept whatever the standard library returns for
/// ambiguous/nonexistent times".
fn local_instant(date: NaiveDate, time: NaiveTime, tz: Tz) -> Instant {
    let ndt = NaiveDateTime::new(date, time);
    match tz.from_local_datetime(&ndt) {
        LocalResult::Single(dt) => dt,
        // DST fall-back: two valid offsets: take the earlier one.
        LocalResult::Ambiguous(earlier, _later) => earlier,
        // DST spring-forward gap: the local time does not exist. Nudge past
        // the gap (chrono's own documented workaround) and fall back to a
        // UTC interpretation only if that still fails.
        LocalResult::None => {
            let nudged = ndt + Duration::hours(1);
            match tz.from_local_datetime(&nudged) {
                LocalResult::Single(dt) => dt,
                LocalResult::Ambiguous(earlier, _later) => earlier,
                LocalResult::None => tz.from_utc_datetime(&ndt),
            }
        }
    }
}

fn midnight(date: NaiveDate, tz: Tz) -> Instant {
    local_instant(date, NaiveTime::MIN, tz)
}

/// Earliest future instant at which the "add" side of `s` fires, strictly
/// greater than `now`.
pub fn next_add(s: &Schedule, now: Instant) -> Instant {
    let tz = now.timezone();
    let mut delta = s.interval_days.max(1) as i64;
    let today_scheduled;

    if !s.days.is_empty() {
        let now_days = now.weekday().num_days_from_sunday() as i64;
        let min_weekday = (now_days + delta).rem_euclid(7);
        let best_offset = s
            .days
            .iter()
            .map(|&d| weekday_offset(min_weekday, d))
            .min()
            .unwrap_or(0);
        delta += best_offset;
        today_scheduled = s.days.contains(&now.weekday());
    } else {
        today_scheduled = true;
    }

    let mut candidate = local_instant(now.date_naive() + Duration::days(delta), s.start, tz);

    if s.interval_days == 0 && today_scheduled {
        let today_at_start = local_instant(now.date_naive(), s.start, tz);
        if now < today_at_start {
            candidate = today_at_start;
        }
    }

    candidate
}

/// Earliest future instant at which the "remove" side of `s` fires. `None`
/// if `s.end` is absent (add-only schedule).
pub fn next_remove(s: &Schedule, now: Instant) -> Option<Instant> {
    let end = s.end?;
    let tz = now.timezone();
    let mut delta = s.interval_days.max(1) as i64;
    let today_scheduled;

    if !s.days.is_empty() {
        let now_days = now.weekday().num_days_from_sunday() as i64;
        let min_weekday = (now_days + delta).rem_euclid(7);
        let best_offset = s
            .days
            .iter()
            .map(|&d| weekday_offset(min_weekday, d))
            .min()
            .unwrap_or(0);
        delta += best_offset;
        today_scheduled = s.days.contains(&now.weekday());
    } else {
        today_scheduled = true;
    }

    let mut candidate = local_instant(now.date_naive() + Duration::days(delta), end, tz);

    if s.interval_days == 0 && today_scheduled {
        let today_at_end = local_instant(now.date_naive(), end, tz);
        if now < today_at_end {
            candidate = today_at_end;
        }
    }

    Some(candidate)
}

/// Decide whether, at `now`, an add is overdue (`+1`), a remove is overdue
/// (`-1`), or neither (`0`); and the reference instant to record as the last
/// update on performing it.
pub fn action(s: Option<&Schedule>, last_add: Instant, last_update: Instant, now: Instant) -> (i8, Instant) {
    let Some(s) = s else {
        return (0, last_update);
    };
    let tz = now.timezone();

    let (scheduled_today, last_scheduled_delta) = if !s.days.is_empty() {
        let now_days = now.weekday().num_days_from_sunday() as i64;
        let mut scheduled_today = false;
        let mut last_scheduled_delta = 7i64;
        for &d in &s.days {
            let delta = (now_days - d.num_days_from_sunday() as i64).rem_euclid(7);
            if delta == 0 {
                scheduled_today = true;
            } else if delta < last_scheduled_delta {
                last_scheduled_delta = delta;
            }
        }
        (scheduled_today, last_scheduled_delta)
    } else {
        (true, 1)
    };

    let anchor_date = if scheduled_today {
        now.date_naive()
    } else {
        now.date_naive() - Duration::days(last_scheduled_delta)
    };

    let mut last_start = local_instant(anchor_date, s.start, tz);
    if scheduled_today && last_start > now {
        last_start = last_start - Duration::days(last_scheduled_delta);
    }

    let last_end = s.end.map(|end| {
        let mut le = local_instant(anchor_date, end, tz);
        if scheduled_today && le > now {
            le = le - Duration::days(last_scheduled_delta);
        }
        le
    });

    let interval_min = midnight(last_add.date_naive() + Duration::days(s.interval_days as i64), tz);

    let end_after_start = last_end.is_some_and(|le| le > last_start);
    let start_after_end = last_end.is_none_or(|le| last_start > le);

    if end_after_start && last_update < last_end.unwrap() {
        (-1, last_end.unwrap())
    } else if start_after_end && last_update < last_start && now > interval_min {
        (1, last_start)
    } else {
        (0, last_update)
    }
}
