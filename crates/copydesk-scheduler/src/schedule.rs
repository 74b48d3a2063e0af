use std::str::FromStr;

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use rand::Rng;

use crate::error::{Result, SchedulerError};
use crate::types::{ActiveHours, ScheduleSpec};

/// Parse a cron expression. Five-field crontab input gets a leading `0`
/// seconds field, which is the form the `cron` crate expects.
pub fn parse_cron(expression: &str) -> Result<cron::Schedule> {
    let trimmed = expression.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    };
    cron::Schedule::from_str(&normalized)
        .map_err(|e| SchedulerError::InvalidSchedule(format!("{expression:?}: {e}")))
}

/// Reject schedules that can never produce a fire time.
pub fn validate_spec(spec: &ScheduleSpec) -> Result<()> {
    match spec {
        ScheduleSpec::Cron { expression } => parse_cron(expression).map(|_| ()),
        ScheduleSpec::FixedInterval { minutes } if *minutes == 0 => Err(
            SchedulerError::InvalidSchedule("interval must be at least one minute".to_string()),
        ),
        ScheduleSpec::RandomInterval {
            min_minutes,
            max_minutes,
        } if *min_minutes == 0 || max_minutes < min_minutes => {
            Err(SchedulerError::InvalidSchedule(format!(
                "random interval {min_minutes}..{max_minutes} must satisfy 1 <= min <= max"
            )))
        }
        _ => Ok(()),
    }
}

/// Next UTC fire time strictly after `now`.
///
/// `now` carries the wall-clock zone that cron fields and the active-hours
/// window are interpreted in. Only random intervals are clamped into the
/// window: a candidate before `start_hour` moves to `start_hour` that day, one
/// at or after `end_hour` moves to `start_hour` the next day, in both cases at
/// a random minute.
pub fn compute_next_fire<Tz, R>(
    spec: &ScheduleSpec,
    hours: ActiveHours,
    now: &DateTime<Tz>,
    rng: &mut R,
) -> Result<DateTime<Utc>>
where
    Tz: TimeZone,
    R: Rng + ?Sized,
{
    validate_spec(spec)?;
    match spec {
        ScheduleSpec::Cron { expression } => parse_cron(expression)?
            .after(now)
            .next()
            .map(|at| at.with_timezone(&Utc))
            .ok_or_else(|| {
                SchedulerError::InvalidSchedule(format!("{expression:?} has no upcoming time"))
            }),

        ScheduleSpec::FixedInterval { minutes } => {
            Ok(now.with_timezone(&Utc) + Duration::minutes(i64::from(*minutes)))
        }

        ScheduleSpec::RandomInterval {
            min_minutes,
            max_minutes,
        } => {
            let wait = rng.gen_range(*min_minutes..=*max_minutes);
            let candidate = now.clone() + Duration::minutes(i64::from(wait));
            let start = u32::from(hours.start_hour);
            let hour = candidate.hour();

            let day = if hour < start {
                candidate.date_naive()
            } else if hour >= u32::from(hours.end_hour) {
                candidate
                    .date_naive()
                    .succ_opt()
                    .ok_or_else(|| SchedulerError::InvalidSchedule("date out of range".to_string()))?
            } else {
                return Ok(candidate.with_timezone(&Utc));
            };

            let minute = rng.gen_range(0..=59);
            let local = day
                .and_hms_opt(start, minute, 0)
                .ok_or_else(|| SchedulerError::InvalidSchedule(format!("bad start hour {start}")))?;
            now.timezone()
                .from_local_datetime(&local)
                .earliest()
                .map(|at| at.with_timezone(&Utc))
                .ok_or_else(|| {
                    SchedulerError::InvalidSchedule(format!("{local} does not exist locally"))
                })
        }
    }
}
