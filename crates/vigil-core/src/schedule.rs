//! Respawn scheduler: roll-forward over an occurrence history, fixed
//! time-of-day rules, and outlook classification.
//!
//! The scheduler is pure and read-only; it is invoked synchronously on each
//! board read, never on a timer. Malformed cadence data degrades to
//! "unknown next time" rather than erroring, so one misconfigured kind can
//! never break the whole listing.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use contracts::CadenceRule;

/// Misses at or above this count move a kind from "tracked" to "forgotten".
/// Any fully elapsed cadence the group failed to act on counts.
pub const DEFAULT_FORGOTTEN_THRESHOLD: i64 = 1;

/// Board bucket for one encounter kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outlook {
    Tracked,
    Forgotten,
    Untracked,
}

impl Outlook {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tracked => "tracked",
            Self::Forgotten => "forgotten",
            Self::Untracked => "untracked",
        }
    }
}

/// Result of asking "when is this kind next expected?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextSpawn {
    /// Next expected occurrence, with the count of fully elapsed cadences
    /// since the last recorded one.
    At {
        next: DateTime<Utc>,
        missed: i64,
    },
    /// Fixed-schedule kind that does not spawn today (weekend exclusion).
    Dormant,
    /// No usable prediction: no history for an interval kind, or malformed
    /// cadence configuration.
    Unknown,
}

/// Advance `last + cadence` past `now`, counting fully elapsed cadences.
///
/// Non-positive cadence is a defensive no-op returning `(last, 0)`; the
/// caller is expected to have already flagged such rows as degraded.
/// Otherwise the returned instant is strictly in the future and `missed`
/// is zero exactly when `now <= last + cadence`.
pub fn roll_forward(
    last: DateTime<Utc>,
    cadence_minutes: i64,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, i64) {
    if cadence_minutes <= 0 {
        return (last, 0);
    }

    let step = Duration::minutes(cadence_minutes);
    let candidate = last + step;
    if now <= candidate {
        return (candidate, 0);
    }

    let step_ms = cadence_minutes * 60_000;
    let elapsed_ms = (now - candidate).num_milliseconds();
    let missed = elapsed_ms / step_ms + 1;
    let advance = Duration::minutes(cadence_minutes.saturating_mul(missed));
    (candidate + advance, missed)
}

/// First configured hour strictly after `now` today, else the first hour on
/// the next allowed day. `None` when today is excluded (weekend) or the
/// hour set is unusable.
pub fn next_daily_hours(
    hours: &[u32],
    weekdays_only: bool,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let mut hours: Vec<u32> = hours.iter().copied().filter(|h| *h < 24).collect();
    if hours.is_empty() {
        return None;
    }
    hours.sort_unstable();
    hours.dedup();

    if weekdays_only && is_weekend(now.weekday()) {
        return None;
    }

    let today = now.date_naive();
    for &hour in &hours {
        let candidate = today.and_hms_opt(hour, 0, 0)?.and_utc();
        if candidate > now {
            return Some(candidate);
        }
    }

    // All of today's hours have passed; take the first hour on the next
    // allowed day.
    let mut date = today + Duration::days(1);
    for _ in 0..7 {
        let allowed = !weekdays_only || !is_weekend(date.weekday());
        if allowed {
            return Some(date.and_hms_opt(hours[0], 0, 0)?.and_utc());
        }
        date += Duration::days(1);
    }
    None
}

/// Next occurrence of a single genesis minute relative to a rolling cycle
/// boundary at `cycle_start_hour` (the configured "day start", not
/// midnight).
pub fn next_cycle_offset(
    minute_of_cycle: i64,
    cycle_start_hour: u32,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if !(0..24 * 60).contains(&minute_of_cycle) || cycle_start_hour > 23 {
        return None;
    }

    let mut cycle_start = now
        .date_naive()
        .and_hms_opt(cycle_start_hour, 0, 0)?
        .and_utc();
    if cycle_start > now {
        cycle_start -= Duration::days(1);
    }

    let mut candidate = cycle_start + Duration::minutes(minute_of_cycle);
    while candidate <= now {
        candidate += Duration::days(1);
    }
    Some(candidate)
}

/// Dispatch over the cadence rule. Interval kinds need a recorded history;
/// fixed-schedule kinds predict from the calendar alone.
pub fn next_occurrence(
    rule: &CadenceRule,
    last: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> NextSpawn {
    match rule {
        CadenceRule::Interval { minutes, .. } => {
            if *minutes <= 0 {
                return NextSpawn::Unknown;
            }
            let Some(last) = last else {
                return NextSpawn::Unknown;
            };
            let (next, missed) = roll_forward(last, *minutes, now);
            NextSpawn::At { next, missed }
        }
        CadenceRule::DailyHours {
            hours,
            weekdays_only,
        } => {
            if *weekdays_only && is_weekend(now.weekday()) {
                return NextSpawn::Dormant;
            }
            match next_daily_hours(hours, *weekdays_only, now) {
                Some(next) => NextSpawn::At { next, missed: 0 },
                None => NextSpawn::Unknown,
            }
        }
        CadenceRule::CycleOffset {
            minute_of_cycle,
            cycle_start_hour,
        } => match next_cycle_offset(*minute_of_cycle, *cycle_start_hour, now) {
            Some(next) => NextSpawn::At { next, missed: 0 },
            None => NextSpawn::Unknown,
        },
    }
}

/// Bucket a kind by its total missed count (scheduler-computed plus
/// recorded no-spawn presses). Kinds with no history at all are classified
/// by the caller as [`Outlook::Untracked`] before reaching here.
pub fn classify(missed_total: i64, threshold: i64) -> Outlook {
    if missed_total >= threshold.max(1) {
        Outlook::Forgotten
    } else {
        Outlook::Tracked
    }
}

fn is_weekend(day: Weekday) -> bool {
    matches!(day, Weekday::Sat | Weekday::Sun)
}
