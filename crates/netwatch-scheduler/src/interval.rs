use chrono::{DateTime, Days, NaiveTime, TimeDelta, TimeZone, Utc};

use crate::error::{Result, SchedulerError};

/// Optional prefix accepted in front of an exact-time list.
const EXACT_PREFIX: &str = "exact:";

/// A parsed interval specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interval {
    /// Fixed, strictly positive period.
    Every(TimeDelta),
    /// Wall-clock times of day, sorted and de-duplicated, never empty.
    ExactTimes(Vec<NaiveTime>),
}

impl Interval {
    /// Parse `"30m"`, `"1h30m"`, `"1.5h"` or `"03:00,15:00"` / `"exact:03:00,15:00"`.
    pub fn parse(spec: &str) -> Result<Self> {
        let trimmed = spec.trim();
        let list = trimmed.strip_prefix(EXACT_PREFIX).unwrap_or(trimmed);

        if list.contains(':') {
            parse_exact_times(list)
                .map(Interval::ExactTimes)
                .map_err(|reason| SchedulerError::invalid_interval(spec, reason))
        } else {
            parse_duration(list)
                .map(Interval::Every)
                .map_err(|reason| SchedulerError::invalid_interval(spec, reason))
        }
    }

    /// Compute the next due instant strictly after `reference`.
    ///
    /// Exact times are read as wall-clock times in `tz`. A listed time that
    /// does not exist on a given day (DST gap) is skipped for that day.
    pub fn next_after<Tz: TimeZone>(
        &self,
        reference: DateTime<Utc>,
        tz: &Tz,
    ) -> Result<DateTime<Utc>> {
        match self {
            Interval::Every(period) => reference.checked_add_signed(*period).ok_or_else(|| {
                SchedulerError::invalid_interval(&format!("{period}"), "next run out of range")
            }),

            Interval::ExactTimes(times) => {
                let local_date = reference.with_timezone(tz).date_naive();

                // Today, tomorrow and the day after: enough to clear any DST gap.
                (0..=2u64)
                    .filter_map(|offset| local_date.checked_add_days(Days::new(offset)))
                    .flat_map(|date| times.iter().map(move |t| date.and_time(*t)))
                    .filter_map(|naive| tz.from_local_datetime(&naive).earliest())
                    .map(|dt| dt.with_timezone(&Utc))
                    .filter(|candidate| *candidate > reference)
                    .min()
                    .ok_or_else(|| {
                        SchedulerError::invalid_interval(
                            &format_times(times),
                            "no upcoming occurrence",
                        )
                    })
            }
        }
    }
}

impl std::str::FromStr for Interval {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        Interval::parse(s)
    }
}

/// Parse `spec` and compute its next due instant after `reference`.
pub fn next_run<Tz: TimeZone>(
    spec: &str,
    reference: DateTime<Utc>,
    tz: &Tz,
) -> Result<DateTime<Utc>> {
    Interval::parse(spec)?.next_after(reference, tz)
}

fn parse_duration(spec: &str) -> std::result::Result<TimeDelta, String> {
    if spec.is_empty() {
        return Err("empty interval".to_string());
    }

    let mut total_ms = 0f64;
    let mut rest = spec;

    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit after '{rest}'"))?;
        if num_end == 0 {
            return Err(format!("expected a number at '{rest}'"));
        }
        let value: f64 = rest[..num_end]
            .parse()
            .map_err(|_| format!("bad number '{}'", &rest[..num_end]))?;
        rest = &rest[num_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit_ms = match &rest[..unit_end] {
            "ms" => 1.0,
            "s" => 1_000.0,
            "m" => 60_000.0,
            "h" => 3_600_000.0,
            "d" => 86_400_000.0,
            other => return Err(format!("unknown unit '{other}'")),
        };
        total_ms += value * unit_ms;
        rest = &rest[unit_end..];
    }

    if total_ms < 1.0 {
        return Err("interval must be positive".to_string());
    }

    TimeDelta::try_milliseconds(total_ms.round() as i64)
        .ok_or_else(|| "interval too large".to_string())
}

fn parse_exact_times(list: &str) -> std::result::Result<Vec<NaiveTime>, String> {
    let mut times = list
        .split(',')
        .map(str::trim)
        .map(|item| {
            if item.is_empty() {
                return Err("empty time in list".to_string());
            }
            NaiveTime::parse_from_str(item, "%H:%M")
                .or_else(|_| NaiveTime::parse_from_str(item, "%H:%M:%S"))
                .map_err(|_| format!("'{item}' is not HH:MM"))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    times.sort();
    times.dedup();
    Ok(times)
}

fn format_times(times: &[NaiveTime]) -> String {
    times
        .iter()
        .map(|t| t.format("%H:%M").to_string())
        .collect::<Vec<_>>()
        .join(",")
}
