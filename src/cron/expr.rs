use std::{
    fmt::{self, Display},
    str::FromStr,
};

use chrono::{Datelike, Timelike};

use crate::error::CronError;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const DAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    /// First value `names[0]` maps to.
    name_base: u32,
}

const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
    name_base: 0,
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
    name_base: 0,
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
    name_base: 0,
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &MONTH_NAMES,
    name_base: 1,
};
// 7 is accepted as Sunday and folded onto 0.
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: &DAY_NAMES,
    name_base: 0,
};

/// Standard five-field cron expression: minute, hour, day-of-month, month,
/// day-of-week.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    source: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronExpr {
    /// Evaluates the expression against a wall-clock time. Seconds are ignored.
    pub fn matches<T: Datelike + Timelike>(&self, at: &T) -> bool {
        let has = |bits: u64, v: u32| bits & (1u64 << v) != 0;

        if !has(self.minutes, at.minute())
            || !has(self.hours, at.hour())
            || !has(self.months, at.month())
        {
            return false;
        }

        let dom = has(self.days_of_month, at.day());
        let dow = has(self.days_of_week, at.weekday().num_days_from_sunday());

        // A field starting with `*` (steps included) narrows the other;
        // two restricted fields match on either.
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }
}

impl FromStr for CronExpr {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = fields.as_slice() else {
            return Err(CronError::FieldCount(fields.len()));
        };

        let mut days_of_week = parse_field(dow, &DAY_OF_WEEK)?;
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            source: fields.join(" "),
            minutes: parse_field(minute, &MINUTE)?,
            hours: parse_field(hour, &HOUR)?,
            days_of_month: parse_field(dom, &DAY_OF_MONTH)?,
            months: parse_field(month, &MONTH)?,
            days_of_week,
            dom_restricted: !dom.starts_with('*'),
            dow_restricted: !dow.starts_with('*'),
        })
    }
}

impl Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

fn parse_field(field: &str, spec: &FieldSpec) -> Result<u64, CronError> {
    if field.is_empty() {
        return Err(CronError::EmptyField(spec.name));
    }

    let mut bits = 0u64;
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step = step
                    .parse::<u32>()
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or_else(|| CronError::IncorrectStep {
                        field: spec.name,
                        value: part.to_string(),
                    })?;
                (range, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(a, spec)?, parse_value(b, spec)?)
        } else {
            let start = parse_value(range, spec)?;
            // `a/n` runs from `a` to the end of the field.
            (start, if step.is_some() { spec.max } else { start })
        };

        if start > end {
            return Err(CronError::ReversedRange {
                field: spec.name,
                value: part.to_string(),
            });
        }

        let step = step.unwrap_or(1) as usize;
        for v in (start..=end).step_by(step) {
            bits |= 1u64 << v;
        }
    }

    Ok(bits)
}

fn parse_value(raw: &str, spec: &FieldSpec) -> Result<u32, CronError> {
    let lower = raw.to_ascii_lowercase();
    let value = match spec.names.iter().position(|n| *n == lower) {
        Some(idx) => idx as u32 + spec.name_base,
        None => raw.parse::<u32>().map_err(|_| CronError::IncorrectValue {
            field: spec.name,
            value: raw.to_string(),
        })?,
    };

    if value < spec.min || value > spec.max {
        return Err(CronError::OutOfRange {
            field: spec.name,
            value,
            min: spec.min,
            max: spec.max,
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime};

    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    fn expr(s: &str) -> CronExpr {
        s.parse().unwrap()
    }

    #[test]
    fn wildcard_matches_every_minute() {
        let e = expr("* * * * *");
        assert!(e.matches(&at(2026, 1, 1, 0, 0)));
        assert!(e.matches(&at(2026, 12, 31, 23, 59)));
    }

    #[test]
    fn daily_four_am() {
        let e = expr("0 4 * * *");
        assert!(e.matches(&at(2026, 5, 10, 4, 0)));
        assert!(!e.matches(&at(2026, 5, 10, 4, 1)));
        assert!(!e.matches(&at(2026, 5, 10, 16, 0)));
    }

    #[test]
    fn lists_ranges_and_steps() {
        let e = expr("*/15 9-17 * * 1-5");
        // 2026-10-14 is a Wednesday.
        assert!(e.matches(&at(2026, 10, 14, 9, 45)));
        assert!(!e.matches(&at(2026, 10, 14, 9, 50)));
        assert!(!e.matches(&at(2026, 10, 14, 18, 0)));
        // Saturday
        assert!(!e.matches(&at(2026, 10, 17, 10, 0)));

        let e = expr("5,10-12,30/10 * * * *");
        for m in [5, 10, 11, 12, 30, 40, 50] {
            assert!(e.matches(&at(2026, 1, 1, 0, m)), "minute {m}");
        }
        assert!(!e.matches(&at(2026, 1, 1, 0, 13)));
    }

    #[test]
    fn names_and_sunday_as_seven() {
        let e = expr("0 0 * JAN,jul sun");
        // 2026-01-04 is a Sunday.
        assert!(e.matches(&at(2026, 1, 4, 0, 0)));
        assert!(!e.matches(&at(2026, 2, 1, 0, 0)));

        assert_eq!(expr("0 0 * * 7"), {
            let mut e = expr("0 0 * * 0");
            e.source = "0 0 * * 7".into();
            e
        });
    }

    #[test]
    fn restricted_dom_and_dow_use_either() {
        // 1st of the month OR any Monday.
        let e = expr("0 12 1 * mon");
        assert!(e.matches(&at(2026, 10, 1, 12, 0)));
        // 2026-10-12 is a Monday.
        assert!(e.matches(&at(2026, 10, 12, 12, 0)));
        assert!(!e.matches(&at(2026, 10, 13, 12, 0)));
    }

    #[test]
    fn step_in_day_of_month() {
        let e = expr("0 0 */2 * *");
        assert!(e.matches(&at(2026, 10, 1, 0, 0)));
        assert!(!e.matches(&at(2026, 10, 2, 0, 0)));
        assert!(e.matches(&at(2026, 10, 3, 0, 0)));
    }

    #[test]
    fn step_in_day_of_week() {
        let e = expr("0 0 * * */2");
        // Sunday, Tuesday, Thursday, Saturday.
        assert!(e.matches(&at(2026, 10, 11, 0, 0)));
        assert!(!e.matches(&at(2026, 10, 12, 0, 0)));
        assert!(e.matches(&at(2026, 10, 13, 0, 0)));
    }

    #[test]
    fn starred_step_narrows_restricted_field() {
        // Odd days that are also Mondays.
        let e = expr("0 0 */2 * mon");
        assert!(!e.matches(&at(2026, 10, 12, 0, 0)));
        assert!(e.matches(&at(2026, 10, 19, 0, 0)));
        assert!(!e.matches(&at(2026, 10, 21, 0, 0)));
    }

    #[test]
    fn reports_parse_errors() {
        assert_eq!(
            "* * * *".parse::<CronExpr>().unwrap_err(),
            CronError::FieldCount(4)
        );
        assert!(matches!(
            "60 * * * *".parse::<CronExpr>().unwrap_err(),
            CronError::OutOfRange { field: "minute", value: 60, .. }
        ));
        assert!(matches!(
            "*/0 * * * *".parse::<CronExpr>().unwrap_err(),
            CronError::IncorrectStep { .. }
        ));
        assert!(matches!(
            "* 10-2 * * *".parse::<CronExpr>().unwrap_err(),
            CronError::ReversedRange { .. }
        ));
        assert!(matches!(
            "* * * foo *".parse::<CronExpr>().unwrap_err(),
            CronError::IncorrectValue { field: "month", .. }
        ));
        assert!(matches!(
            "1,,2 * * * *".parse::<CronExpr>().unwrap_err(),
            CronError::IncorrectValue { .. }
        ));
    }
}
