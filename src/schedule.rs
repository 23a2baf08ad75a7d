use chrono::{Datelike, Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of days of dose instances materialized ahead of time.
pub const WINDOW_DAYS: u32 = 7;

const DEFAULT_START_TIME: (u32, u32) = (8, 0);

/// How often doses of a medication occur.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    SpecificDays,
    Weekly,
    IntervalHours,
    TimesPerDay,
    Manual,
}

/// Parse a frequency keyword from user input ("daily", "weekly", "manual").
///
/// Only the kinds that pair with explicit dose times are accepted here;
/// interval and times-per-day schedules are selected by their own flags.
pub fn parse_frequency_kind(s: &str) -> Option<Frequency> {
    match s.trim().to_lowercase().as_str() {
        "daily" | "every day" => Some(Frequency::Daily),
        "weekly" | "every week" => Some(Frequency::Weekly),
        "manual" | "custom" => Some(Frequency::Manual),
        _ => None,
    }
}

/// The user's dosing pattern as collected from the command line.
///
/// Exactly one of `explicit_times`, `interval_hours`, or `times_per_day`
/// is authoritative for the derived time list, selected by `frequency`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FrequencySpec {
    pub frequency: Frequency,
    /// Dose times for Daily/SpecificDays/Weekly/Manual schedules.
    #[serde(default)]
    pub explicit_times: Vec<(u32, u32)>,
    /// Weekday indices (0=Sunday..6=Saturday) for SpecificDays schedules.
    #[serde(default)]
    pub days_of_week: Vec<u32>,
    #[serde(default)]
    pub interval_hours: Option<u32>,
    /// First dose of the day for IntervalHours schedules (default 08:00).
    #[serde(default)]
    pub start_time: Option<(u32, u32)>,
    #[serde(default)]
    pub times_per_day: Option<u32>,
}

/// Concrete per-day dose times derived from a `FrequencySpec`.
///
/// `times_of_day` is always non-empty, ascending, and duplicate-free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedSchedule {
    pub times_of_day: Vec<(u32, u32)>,
    pub doses_per_day: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DoseStatus {
    Scheduled,
    Taken,
    Missed,
    Skipped,
}

/// One concrete scheduled occurrence of taking a medication.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DoseInstance {
    pub due_at: NaiveDateTime,
    pub status: DoseStatus,
    #[serde(default)]
    pub taken_at: Option<NaiveDateTime>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("interval hours must be between 1 and 24, got {0}")]
    IntervalOutOfRange(u32),
    #[error("times per day must be at least 1")]
    InvalidTimesPerDay,
    #[error("at least one time required")]
    EmptySchedule,
}

/// Derive the concrete list of per-day dose times for a frequency spec.
///
/// The result is sorted ascending and deduplicated, and is never empty.
pub fn derive_times(spec: &FrequencySpec) -> Result<Vec<(u32, u32)>, ScheduleError> {
    let mut times = match spec.frequency {
        Frequency::IntervalHours => {
            let hours = spec.interval_hours.unwrap_or(0);
            if hours == 0 || hours > 24 {
                return Err(ScheduleError::IntervalOutOfRange(hours));
            }
            let (start_hour, start_minute) = spec.start_time.unwrap_or(DEFAULT_START_TIME);
            // One lap of the clock; a trailing partial interval is not
            // scheduled (floor division, no wraparound correction).
            let count = 24 / hours;
            (0..count)
                .map(|i| ((start_hour + i * hours) % 24, start_minute))
                .collect()
        }
        Frequency::TimesPerDay => match spec.times_per_day.unwrap_or(0) {
            0 => return Err(ScheduleError::InvalidTimesPerDay),
            1 => vec![(8, 0)],
            2 => vec![(8, 0), (20, 0)],
            3 => vec![(8, 0), (14, 0), (20, 0)],
            4 => vec![(8, 0), (12, 0), (16, 0), (20, 0)],
            n => {
                // Even distribution at integer-hour granularity,
                // starting at hour 8 and wrapping past midnight.
                let step = 24 / n;
                (0..n).map(|i| ((8 + i * step) % 24, 0)).collect()
            }
        },
        Frequency::Daily | Frequency::SpecificDays | Frequency::Weekly | Frequency::Manual => {
            spec.explicit_times.clone()
        }
    };

    times.sort_unstable();
    times.dedup();

    if times.is_empty() {
        return Err(ScheduleError::EmptySchedule);
    }
    Ok(times)
}

/// Derive the full schedule (times plus doses-per-day count) for a frequency spec.
pub fn derive_schedule(spec: &FrequencySpec) -> Result<DerivedSchedule, ScheduleError> {
    let times_of_day = derive_times(spec)?;
    let doses_per_day = times_of_day.len();
    Ok(DerivedSchedule {
        times_of_day,
        doses_per_day,
    })
}

/// Materialize the concrete dose instances for a forward window of
/// `window_days` calendar days starting on `now`'s date.
///
/// Days whose weekday is not selected are skipped for SpecificDays
/// schedules. Instances due at or before `now` are dropped, so a dose is
/// never created already due at the instant of generation. Output is
/// sorted by due time with no duplicates, and is byte-identical across
/// calls with the same inputs.
pub fn materialize_dose_instances(
    schedule: &DerivedSchedule,
    spec: &FrequencySpec,
    window_days: u32,
    now: NaiveDateTime,
) -> Vec<DoseInstance> {
    let mut instances = Vec::new();

    for day_offset in 0..window_days as i64 {
        let date = now.date() + Duration::days(day_offset);

        if spec.frequency == Frequency::SpecificDays {
            let weekday = date.weekday().num_days_from_sunday();
            if !spec.days_of_week.contains(&weekday) {
                continue;
            }
        }

        for &(hour, minute) in &schedule.times_of_day {
            let Some(due_at) = date.and_hms_opt(hour, minute, 0) else {
                continue;
            };
            if due_at > now {
                instances.push(DoseInstance {
                    due_at,
                    status: DoseStatus::Scheduled,
                    taken_at: None,
                });
            }
        }
    }

    instances
}
