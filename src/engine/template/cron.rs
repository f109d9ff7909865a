// Five-field cron schedules for the matchesCron template filter

use chrono::{DateTime, Datelike, TimeZone, Timelike};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CronError {
    #[error("expected 5 fields, found {0}")]
    FieldCount(usize),

    #[error("invalid {field} field '{value}': {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("unknown descriptor '{0}'")]
    UnknownDescriptor(String),
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    /// Symbolic names, mapped to `names_offset + position`
    names: &'static [&'static str],
    names_offset: u32,
}

const MINUTES: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
    names_offset: 0,
};

const HOURS: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
    names_offset: 0,
};

const DAYS_OF_MONTH: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
    names_offset: 0,
};

const MONTHS: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &[
        "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
    ],
    names_offset: 1,
};

// 7 is accepted as an alias for Sunday
const DAYS_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"],
    names_offset: 0,
};

/// A parsed `minute hour day-of-month month day-of-week` expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_any: bool,
    dow_any: bool,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let expression = expression.trim();
        let expanded = match expression {
            "@yearly" | "@annually" => "0 0 1 1 *",
            "@monthly" => "0 0 1 * *",
            "@weekly" => "0 0 * * 0",
            "@daily" | "@midnight" => "0 0 * * *",
            "@hourly" => "0 * * * *",
            other if other.starts_with('@') => {
                return Err(CronError::UnknownDescriptor(other.to_string()))
            }
            other => other,
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount(fields.len()));
        }

        let mut days_of_week = parse_field(fields[4], &DAYS_OF_WEEK)?;
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            minutes: parse_field(fields[0], &MINUTES)?,
            hours: parse_field(fields[1], &HOURS)?,
            days_of_month: parse_field(fields[2], &DAYS_OF_MONTH)?,
            months: parse_field(fields[3], &MONTHS)?,
            days_of_week,
            dom_any: is_wildcard(fields[2]),
            dow_any: is_wildcard(fields[4]),
        })
    }

    /// Whether the minute containing `time` is part of the schedule
    ///
    /// Fields are read in the timestamp's own offset. When both day fields
    /// are restricted a day matches if either of them matches.
    pub fn matches<Tz: TimeZone>(&self, time: &DateTime<Tz>) -> bool {
        let dom = bit(self.days_of_month, time.day());
        let dow = bit(self.days_of_week, time.weekday().num_days_from_sunday());
        let day = if self.dom_any || self.dow_any {
            dom && dow
        } else {
            dom || dow
        };

        day && bit(self.minutes, time.minute())
            && bit(self.hours, time.hour())
            && bit(self.months, time.month())
    }
}

fn bit(mask: u64, position: u32) -> bool {
    mask & (1u64 << position) != 0
}

fn is_wildcard(field: &str) -> bool {
    field.starts_with('*') || field == "?"
}

fn parse_field(field: &str, spec: &FieldSpec) -> Result<u64, CronError> {
    let invalid = |reason: String| CronError::InvalidField {
        field: spec.name,
        value: field.to_string(),
        reason,
    };

    let mut mask = 0u64;
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| invalid(format!("bad step '{}'", step)))?;
                if step == 0 {
                    return Err(invalid("step must be positive".into()));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = if range == "*" || range == "?" {
            (spec.min, spec.max)
        } else if let Some((start, end)) = range.split_once('-') {
            (
                parse_value(start, spec).map_err(&invalid)?,
                parse_value(end, spec).map_err(&invalid)?,
            )
        } else {
            let start = parse_value(range, spec).map_err(&invalid)?;
            // "5/15" means "from 5 to the end, every 15"
            (start, if step.is_some() { spec.max } else { start })
        };

        if start < spec.min || end > spec.max || start > end {
            return Err(invalid(format!(
                "range {}-{} outside {}-{}",
                start, end, spec.min, spec.max
            )));
        }

        for value in (start..=end).step_by(step.unwrap_or(1) as usize) {
            mask |= 1u64 << value;
        }
    }
    Ok(mask)
}

fn parse_value(token: &str, spec: &FieldSpec) -> Result<u32, String> {
    if let Ok(value) = token.parse::<u32>() {
        return Ok(value);
    }
    spec.names
        .iter()
        .position(|name| name.eq_ignore_ascii_case(token))
        .map(|position| position as u32 + spec.names_offset)
        .ok_or_else(|| format!("unknown value '{}'", token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn at(rfc3339: &str) -> DateTime<chrono::FixedOffset> {
        DateTime::parse_from_rfc3339(rfc3339).unwrap()
    }

    #[test]
    fn test_every_minute() {
        let schedule = CronSchedule::parse("* * * * *").unwrap();
        assert!(schedule.matches(&at("2024-03-05T10:17:42Z")));
    }

    #[test]
    fn test_fixed_time() {
        let schedule = CronSchedule::parse("30 9 * * *").unwrap();
        assert!(schedule.matches(&at("2024-03-05T09:30:00Z")));
        assert!(schedule.matches(&at("2024-03-05T09:30:59Z")));
        assert!(!schedule.matches(&at("2024-03-05T09:31:00Z")));
        assert!(!schedule.matches(&at("2024-03-05T10:30:00Z")));
    }

    #[test]
    fn test_uses_timestamp_offset() {
        let schedule = CronSchedule::parse("0 9 * * *").unwrap();
        assert!(schedule.matches(&at("2024-03-05T09:00:00+02:00")));
        assert!(!schedule.matches(&at("2024-03-05T09:00:00+02:00").with_timezone(&chrono::Utc)));
    }

    #[test]
    fn test_steps_ranges_and_lists() {
        let schedule = CronSchedule::parse("*/15 8-10 * * MON-FRI").unwrap();
        // 2024-03-05 is a Tuesday
        assert!(schedule.matches(&at("2024-03-05T08:45:00Z")));
        assert!(!schedule.matches(&at("2024-03-05T08:50:00Z")));
        assert!(!schedule.matches(&at("2024-03-05T11:00:00Z")));
        // 2024-03-09 is a Saturday
        assert!(!schedule.matches(&at("2024-03-09T08:45:00Z")));

        let list = CronSchedule::parse("0,30 12 1,15 jan,jul *").unwrap();
        assert!(list.matches(&at("2024-07-15T12:30:00Z")));
        assert!(!list.matches(&at("2024-08-15T12:30:00Z")));
    }

    #[test]
    fn test_sunday_aliases() {
        let zero = CronSchedule::parse("0 0 * * 0").unwrap();
        let seven = CronSchedule::parse("0 0 * * 7").unwrap();
        // 2024-03-10 is a Sunday
        assert!(zero.matches(&at("2024-03-10T00:00:00Z")));
        assert!(seven.matches(&at("2024-03-10T00:00:00Z")));
        assert_eq!(zero, seven);
    }

    #[test]
    fn test_day_fields_or_when_both_restricted() {
        let schedule = CronSchedule::parse("0 0 1 * MON").unwrap();
        // first of the month (a Friday) and a Monday both match
        assert!(schedule.matches(&at("2024-03-01T00:00:00Z")));
        assert!(schedule.matches(&at("2024-03-04T00:00:00Z")));
        assert!(!schedule.matches(&at("2024-03-05T00:00:00Z")));
    }

    #[test]
    fn test_descriptors() {
        let hourly = CronSchedule::parse("@hourly").unwrap();
        assert!(hourly.matches(&at("2024-03-05T13:00:00Z")));
        assert!(!hourly.matches(&at("2024-03-05T13:01:00Z")));
        assert!(matches!(
            CronSchedule::parse("@fortnightly"),
            Err(CronError::UnknownDescriptor(_))
        ));
    }

    #[test]
    fn test_invalid_expressions() {
        assert_eq!(CronSchedule::parse("* * * *"), Err(CronError::FieldCount(4)));
        assert!(CronSchedule::parse("60 * * * *").is_err());
        assert!(CronSchedule::parse("* 24 * * *").is_err());
        assert!(CronSchedule::parse("* * 0 * *").is_err());
        assert!(CronSchedule::parse("*/0 * * * *").is_err());
        assert!(CronSchedule::parse("5-1 * * * *").is_err());
        assert!(CronSchedule::parse("* * * FOO *").is_err());
    }
}
