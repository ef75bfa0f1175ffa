//! Five-field cron schedules.
//!
//! Fields are `minute hour day-of-month month day-of-week`. Each field is a
//! comma-separated list of `*`, `N`, `A-B`, optionally followed by `/STEP`.
//! Day of week counts from Sunday = 0; 7 is accepted as Sunday too.
//!
//! As in classic cron, when both day fields are restricted a time matches if
//! either of them matches. A field starting with `*`, such as `*/2`, is not
//! restricted.

use crate::error::{ReplicationError, ReplicationResult};
use chrono::{Datelike, NaiveDateTime, Timelike};
use std::fmt;
use std::time::Duration;

/// A parsed cron schedule.
#[derive(Clone, PartialEq, Eq)]
pub struct CronSchedule {
    source: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
}

const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59 };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23 };
const DAY_OF_MONTH: FieldSpec = FieldSpec { name: "day of month", min: 1, max: 31 };
const MONTH: FieldSpec = FieldSpec { name: "month", min: 1, max: 12 };
const DAY_OF_WEEK: FieldSpec = FieldSpec { name: "day of week", min: 0, max: 7 };

impl CronSchedule {
    /// Parses a five-field cron expression.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::InvalidConfig`] if the expression is
    /// malformed or a value is out of range.
    pub fn parse(expr: &str) -> ReplicationResult<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let &[minute, hour, dom, month, dow] = fields.as_slice() else {
            return Err(ReplicationError::InvalidConfig(format!(
                "cron expression '{expr}' must have 5 fields, found {}",
                fields.len()
            )));
        };

        let mut days_of_week = parse_field(dow, &DAY_OF_WEEK)?;
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            source: expr.to_string(),
            minutes: parse_field(minute, &MINUTE)?,
            hours: parse_field(hour, &HOUR)?,
            days_of_month: parse_field(dom, &DAY_OF_MONTH)?,
            months: parse_field(month, &MONTH)?,
            days_of_week,
            dom_restricted: !dom.starts_with('*'),
            dow_restricted: !dow.starts_with('*'),
        })
    }

    /// Returns the expression this schedule was parsed from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns true if the minute containing `time` is scheduled.
    pub fn matches(&self, time: &NaiveDateTime) -> bool {
        let bit = |set: u64, value: u32| set & (1u64 << value) != 0;

        if !bit(self.minutes, time.minute())
            || !bit(self.hours, time.hour())
            || !bit(self.months, time.month())
        {
            return false;
        }

        let dom = bit(self.days_of_month, time.day());
        let dow = bit(self.days_of_week, time.weekday().num_days_from_sunday());
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            _ => dom && dow,
        }
    }

    /// Returns the scheduled window a tick at `now` should serve, if any.
    ///
    /// Both the current minute and the minute one `tick` earlier are
    /// checked, so a tick that wakes late still catches the window it
    /// overslept. Windows are identified by their minute. Delays longer than
    /// one tick can still miss a window.
    pub fn due_window(&self, now: NaiveDateTime, tick: Duration) -> Option<NaiveDateTime> {
        let current = truncate_to_minute(now);
        if self.matches(&current) {
            return Some(current);
        }
        let tick = chrono::Duration::from_std(tick).ok()?;
        let previous = truncate_to_minute(now.checked_sub_signed(tick)?);
        self.matches(&previous).then_some(previous)
    }
}

impl fmt::Debug for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronSchedule").field(&self.source).finish()
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn truncate_to_minute(time: NaiveDateTime) -> NaiveDateTime {
    time.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(time)
}

fn parse_field(field: &str, spec: &FieldSpec) -> ReplicationResult<u64> {
    let invalid = |why: &str| {
        ReplicationError::InvalidConfig(format!("cron {} field '{field}': {why}", spec.name))
    };

    let mut set = 0u64;
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| invalid("bad step"))?;
                if step == 0 {
                    return Err(invalid("step must be positive"));
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        let (low, high) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(a, spec, &invalid)?, parse_value(b, spec, &invalid)?)
        } else {
            let value = parse_value(range, spec, &invalid)?;
            // `N/STEP` runs from N to the end of the field.
            (value, if step.is_some() { spec.max } else { value })
        };
        if low > high {
            return Err(invalid("range is reversed"));
        }

        let step = step.unwrap_or(1) as usize;
        for value in (low..=high).step_by(step) {
            set |= 1u64 << value;
        }
    }
    Ok(set)
}

fn parse_value(
    text: &str,
    spec: &FieldSpec,
    invalid: &dyn Fn(&str) -> ReplicationError,
) -> ReplicationResult<u32> {
    let value: u32 = text.parse().map_err(|_| invalid("not a number"))?;
    if value < spec.min || value > spec.max {
        return Err(invalid("value out of range"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn every_minute() {
        let schedule = CronSchedule::parse("* * * * *").unwrap();
        assert!(schedule.matches(&at(2024, 3, 1, 12, 34, 56)));
    }

    #[test]
    fn lists_ranges_and_steps() {
        let schedule = CronSchedule::parse("0,30 9-17 * * 1-5").unwrap();
        // 2024-03-04 is a Monday.
        assert!(schedule.matches(&at(2024, 3, 4, 9, 0, 0)));
        assert!(schedule.matches(&at(2024, 3, 4, 17, 30, 0)));
        assert!(!schedule.matches(&at(2024, 3, 4, 18, 0, 0)));
        assert!(!schedule.matches(&at(2024, 3, 4, 9, 15, 0)));
        assert!(!schedule.matches(&at(2024, 3, 3, 9, 0, 0)));

        let every_quarter = CronSchedule::parse("*/15 * * * *").unwrap();
        assert!(every_quarter.matches(&at(2024, 1, 1, 0, 45, 0)));
        assert!(!every_quarter.matches(&at(2024, 1, 1, 0, 50, 0)));

        let from_ten = CronSchedule::parse("10/20 * * * *").unwrap();
        assert!(from_ten.matches(&at(2024, 1, 1, 0, 50, 0)));
        assert!(!from_ten.matches(&at(2024, 1, 1, 0, 0, 0)));
    }

    #[test]
    fn sunday_aliases() {
        let schedule = CronSchedule::parse("0 0 * * 7").unwrap();
        // 2024-03-03 is a Sunday.
        assert!(schedule.matches(&at(2024, 3, 3, 0, 0, 0)));
        let zero = CronSchedule::parse("0 0 * * 0").unwrap();
        assert_eq!(schedule.days_of_week, zero.days_of_week);
    }

    #[test]
    fn restricted_day_fields_match_either() {
        let schedule = CronSchedule::parse("0 0 1 * 1").unwrap();
        // The 1st (a Friday) and any Monday.
        assert!(schedule.matches(&at(2024, 3, 1, 0, 0, 0)));
        assert!(schedule.matches(&at(2024, 3, 4, 0, 0, 0)));
        assert!(!schedule.matches(&at(2024, 3, 5, 0, 0, 0)));
    }

    #[test]
    fn stepped_star_day_field_is_not_restricted() {
        let schedule = CronSchedule::parse("0 0 */2 * 1").unwrap();
        // Only Mondays falling on odd days.
        assert!(schedule.matches(&at(2024, 3, 11, 0, 0, 0)));
        assert!(!schedule.matches(&at(2024, 3, 4, 0, 0, 0)));
        assert!(!schedule.matches(&at(2024, 3, 3, 0, 0, 0)));
    }

    #[test]
    fn rejects_malformed() {
        for expr in [
            "",
            "* * * *",
            "* * * * * *",
            "60 * * * *",
            "* 24 * * *",
            "* * 0 * *",
            "* * * 13 *",
            "* * * * 8",
            "*/0 * * * *",
            "5-1 * * * *",
            "a * * * *",
        ] {
            assert!(CronSchedule::parse(expr).is_err(), "accepted '{expr}'");
        }
    }

    #[test]
    fn due_window_catches_late_tick() {
        let schedule = CronSchedule::parse("30 * * * *").unwrap();
        let tick = Duration::from_secs(60);

        assert_eq!(
            schedule.due_window(at(2024, 1, 1, 10, 30, 5), tick),
            Some(at(2024, 1, 1, 10, 30, 0))
        );
        // Woke 20 seconds late: the previous tick's minute matched.
        assert_eq!(
            schedule.due_window(at(2024, 1, 1, 10, 31, 20), tick),
            Some(at(2024, 1, 1, 10, 30, 0))
        );
        assert_eq!(schedule.due_window(at(2024, 1, 1, 10, 32, 20), tick), None);
    }

    proptest::proptest! {
        #[test]
        fn fixed_time_matches_only_its_minute(minute in 0u32..60, hour in 0u32..24, other in 0u32..60) {
            let schedule = CronSchedule::parse(&format!("{minute} {hour} * * *")).unwrap();
            proptest::prop_assert!(schedule.matches(&at(2024, 5, 17, hour, minute, 0)));
            proptest::prop_assert_eq!(
                schedule.matches(&at(2024, 5, 17, hour, other, 0)),
                other == minute
            );
        }
    }
}
