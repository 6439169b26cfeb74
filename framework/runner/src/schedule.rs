use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("interval must be a positive number of minutes, got {0}")]
    InvalidInterval(f64),
    #[error("duration must be a positive number of hours, got {0}")]
    InvalidDuration(f64),
    #[error("invalid start time {0:?}, expected \"immediate\" or an ISO-8601 timestamp")]
    InvalidStartTime(String),
    #[error("unknown schedule mode {0:?}, expected \"once\" or \"recurring\"")]
    UnknownMode(String),
}

/// The schedule of a scenario as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_start_time")]
    pub start_time: String,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: f64,
    #[serde(default = "default_duration_hours")]
    pub duration_hours: f64,
}

fn default_mode() -> String {
    "once".to_string()
}

fn default_start_time() -> String {
    "immediate".to_string()
}

fn default_interval_minutes() -> f64 {
    10.0
}

fn default_duration_hours() -> f64 {
    1.0
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            start_time: default_start_time(),
            interval_minutes: default_interval_minutes(),
            duration_hours: default_duration_hours(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartAt {
    Immediate,
    At(DateTime<Utc>),
}

impl StartAt {
    /// Parse `immediate`, an RFC 3339 timestamp or a naive ISO-8601 timestamp in local time.
    pub fn parse(value: &str) -> Result<Self, ScheduleError> {
        let value = value.trim();
        if value == "immediate" {
            return Ok(StartAt::Immediate);
        }

        if let Ok(at) = DateTime::parse_from_rfc3339(value) {
            return Ok(StartAt::At(at.with_timezone(&Utc)));
        }

        let naive = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
            .or_else(|| {
                NaiveDate::parse_from_str(value, "%Y-%m-%d")
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
            })
            .ok_or_else(|| ScheduleError::InvalidStartTime(value.to_string()))?;

        naive
            .and_local_timezone(Local)
            .earliest()
            .map(|at| StartAt::At(at.with_timezone(&Utc)))
            .ok_or_else(|| ScheduleError::InvalidStartTime(value.to_string()))
    }

    pub fn resolve(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            StartAt::Immediate => now,
            StartAt::At(at) => *at,
        }
    }
}

/// A validated schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// A single firing at the start time, or straight away if the start time has passed.
    Once { start: StartAt },
    /// A firing every `interval` from the start time, none at or after `start + duration`.
    Recurring {
        start: StartAt,
        interval: Duration,
        duration: Duration,
    },
}

impl Schedule {
    pub fn start(&self) -> StartAt {
        match self {
            Schedule::Once { start } | Schedule::Recurring { start, .. } => *start,
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            Schedule::Once { .. } => "once",
            Schedule::Recurring { .. } => "recurring",
        }
    }
}

impl TryFrom<&ScheduleConfig> for Schedule {
    type Error = ScheduleError;

    fn try_from(config: &ScheduleConfig) -> Result<Self, Self::Error> {
        let start = StartAt::parse(&config.start_time)?;

        match config.mode.as_str() {
            "once" => Ok(Schedule::Once { start }),
            "recurring" => {
                let interval = positive_duration(config.interval_minutes * 60.0)
                    .ok_or(ScheduleError::InvalidInterval(config.interval_minutes))?;
                let duration = positive_duration(config.duration_hours * 3600.0)
                    .ok_or(ScheduleError::InvalidDuration(config.duration_hours))?;

                Ok(Schedule::Recurring {
                    start,
                    interval,
                    duration,
                })
            }
            other => Err(ScheduleError::UnknownMode(other.to_string())),
        }
    }
}

fn positive_duration(seconds: f64) -> Option<Duration> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return None;
    }

    Duration::try_from_secs_f64(seconds)
        .ok()
        .filter(|d| !d.is_zero())
}

/// The firing instants of a [Schedule], fixed at the moment it was scheduled.
///
/// The wall clock start is mapped onto the monotonic clock once, so the end of a recurring window
/// never moves afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    first_fire: Option<Instant>,
    window: Option<Window>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    interval: Duration,
    end: Instant,
    end_time: DateTime<Utc>,
}

impl Trigger {
    /// Map the schedule onto the monotonic clock.
    ///
    /// Fails if the start or the end of the schedule is too far away to be represented.
    pub fn new(
        schedule: &Schedule,
        now_time: DateTime<Utc>,
        now: Instant,
    ) -> Result<Self, ScheduleError> {
        let start_time = schedule.start().resolve(now_time);
        // Positive if the start is in the future, negative if it already passed.
        let offset = start_time - now_time;
        let unreachable_start = || ScheduleError::InvalidStartTime(start_time.to_rfc3339());

        match *schedule {
            Schedule::Once { .. } => Ok(Trigger {
                first_fire: Some(
                    now.checked_add(offset.to_std().unwrap_or_default())
                        .ok_or_else(unreachable_start)?,
                ),
                window: None,
            }),
            Schedule::Recurring {
                interval, duration, ..
            } => {
                let unreachable_end =
                    || ScheduleError::InvalidDuration(duration.as_secs_f64() / 3600.0);
                let end_time = TimeDelta::from_std(duration)
                    .ok()
                    .and_then(|duration| start_time.checked_add_signed(duration))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);

                let (first_fire, end) = match offset.to_std() {
                    Ok(lead) => {
                        let first = now.checked_add(lead).ok_or_else(unreachable_start)?;
                        let end = first.checked_add(duration).ok_or_else(unreachable_end)?;
                        (Some(first), end)
                    }
                    Err(_) => {
                        let lag = (-offset).to_std().unwrap_or_default();
                        match duration.checked_sub(lag) {
                            Some(remaining) if !remaining.is_zero() => {
                                let end = now.checked_add(remaining).ok_or_else(unreachable_end)?;
                                // First instant of the `start + k * interval` grid that is not in
                                // the past.
                                let k = lag.as_nanos().div_ceil(interval.as_nanos());
                                let first = grid_offset(interval, k)
                                    .map(|elapsed| elapsed - lag)
                                    .filter(|first| *first < remaining)
                                    .map(|first| now + first);
                                (first, end)
                            }
                            _ => (None, now),
                        }
                    }
                };

                Ok(Trigger {
                    first_fire,
                    window: Some(Window {
                        interval,
                        end,
                        end_time,
                    }),
                })
            }
        }
    }

    /// The first firing, `None` if a recurring window has already ended.
    pub fn first_fire(&self) -> Option<Instant> {
        self.first_fire
    }

    /// The firing after the one at `previous`, given that it is now `now`.
    ///
    /// Instants that are already in the past are skipped, the result is the first instant of the
    /// interval grid that is not before `now`. `None` once the window is exhausted and always for
    /// a one-shot trigger.
    pub fn next_fire_after(&self, previous: Instant, now: Instant) -> Option<Instant> {
        let window = self.window?;

        // Instants that cannot be represented lie beyond the end of the window.
        let mut next = previous.checked_add(window.interval)?;
        if next < now {
            let behind = now - next;
            let skipped = behind.as_nanos().div_ceil(window.interval.as_nanos());
            next = next.checked_add(grid_offset(window.interval, skipped)?)?;
        }

        (next < window.end).then_some(next)
    }

    /// The number of grid instants between `previous` and `next` that were skipped.
    pub fn missed_between(&self, previous: Instant, next: Instant) -> u128 {
        match self.window {
            Some(window) if next > previous => {
                ((next - previous).as_nanos() / window.interval.as_nanos()).saturating_sub(1)
            }
            _ => 0,
        }
    }

    /// The end of a recurring window. No firing happens at or after it.
    pub fn end(&self) -> Option<Instant> {
        self.window.map(|w| w.end)
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.window.map(|w| w.end_time)
    }

    /// When every firing of this trigger is due, the end of the window for a recurring trigger.
    pub fn last_instant(&self) -> Option<Instant> {
        self.end().or(self.first_fire)
    }
}

/// `k` intervals, `None` if that is longer than a [Duration] can hold.
fn grid_offset(interval: Duration, k: u128) -> Option<Duration> {
    let nanos = interval.as_nanos().checked_mul(k)?;
    let secs = u64::try_from(nanos / 1_000_000_000).ok()?;
    Some(Duration::new(secs, (nanos % 1_000_000_000) as u32))
}
