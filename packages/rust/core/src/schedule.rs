//! Cron schedules (`minute hour day-of-month month day-of-week`) used to
//! compute a config's `next_run_at`.
//!
//! Parsing and evaluation are done by `croner`: ranges, steps, lists, names,
//! 0 and 7 for Sunday, and the `@hourly`/`@daily`/`@weekly`/`@monthly`/
//! `@yearly` aliases. When both day fields are restricted a day matches if
//! either does.

use bylawdb_shared::{BylawError, Result};
use chrono::{DateTime, Duration, Utc};
use croner::Cron;

/// A parsed cron schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    cron: Cron,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self> {
        let pattern = match expr.trim() {
            "@midnight" => "@daily",
            other => other,
        };
        let cron = Cron::new(pattern)
            .parse()
            .map_err(|e| BylawError::config(format!("invalid cron expression '{expr}': {e}")))?;
        Ok(Self { cron })
    }

    /// First matching minute strictly after `after`, or `None` if the
    /// schedule never fires (e.g. `0 0 30 2 *`).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.cron.find_next_occurrence(&after, false).ok()
    }
}

/// Next run time for a config schedule. Configs without one run daily.
pub fn next_run_at(schedule_cron: Option<&str>, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    match schedule_cron.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(now + Duration::days(1)),
        Some(expr) => CronSchedule::parse(expr)?
            .next_after(now)
            .ok_or_else(|| BylawError::config(format!("schedule '{expr}' never fires"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn next(expr: &str, from: DateTime<Utc>) -> DateTime<Utc> {
        CronSchedule::parse(expr).unwrap().next_after(from).unwrap()
    }

    #[test]
    fn daily_at_fixed_hour() {
        assert_eq!(next("0 3 * * *", at(2024, 3, 7, 9, 5)), at(2024, 3, 8, 3, 0));
        assert_eq!(next("0 3 * * *", at(2024, 3, 7, 1, 0)), at(2024, 3, 7, 3, 0));
    }

    #[test]
    fn steps_and_lists() {
        let from = Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 30).unwrap();
        assert_eq!(next("*/15 * * * *", from), at(2024, 3, 7, 9, 15));
        assert_eq!(next("10,40 9-17 * * *", from), at(2024, 3, 7, 9, 10));
        assert_eq!(next("0 9-17/4 * * *", from), at(2024, 3, 7, 13, 0));
    }

    #[test]
    fn aliases() {
        // 2024-03-07 is a Thursday.
        let from = at(2024, 3, 7, 9, 5);
        assert_eq!(next("@hourly", from), at(2024, 3, 7, 10, 0));
        assert_eq!(next("@daily", from), at(2024, 3, 8, 0, 0));
        assert_eq!(next("@weekly", from), at(2024, 3, 10, 0, 0));
        assert_eq!(next("@monthly", at(2024, 12, 15, 0, 0)), at(2025, 1, 1, 0, 0));
    }

    #[test]
    fn sunday_is_zero_or_seven() {
        let from = at(2024, 3, 7, 9, 5);
        assert_eq!(next("0 0 * * 7", from), next("0 0 * * 0", from));
    }

    #[test]
    fn restricted_day_fields_are_ored() {
        // Friday the 8th comes before the 13th.
        assert_eq!(next("0 0 13 * 5", at(2024, 3, 7, 9, 5)), at(2024, 3, 8, 0, 0));
    }

    #[test]
    fn impossible_schedule_never_fires() {
        assert!(next_run_at(Some("0 0 30 2 *"), at(2024, 1, 1, 0, 0)).is_err());
    }

    #[test]
    fn midnight_is_daily() {
        let from = at(2024, 3, 7, 9, 5);
        assert_eq!(next("@midnight", from), next("@daily", from));
    }

    #[test]
    fn rejects_malformed_expressions() {
        for expr in ["61 * * * *", "* * *", "@often", "a * * * *", "0 25 * * *"] {
            assert!(CronSchedule::parse(expr).is_err(), "{expr} should be rejected");
        }
    }

    #[test]
    fn missing_schedule_runs_daily() {
        let now = at(2024, 3, 7, 9, 5);
        assert_eq!(next_run_at(None, now).unwrap(), now + Duration::days(1));
        assert_eq!(next_run_at(Some("  "), now).unwrap(), now + Duration::days(1));
        assert_eq!(next_run_at(Some("0 3 * * *"), now).unwrap(), at(2024, 3, 8, 3, 0));
    }
}
