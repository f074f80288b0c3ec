// src/interval.rs
use chrono::{NaiveTime, Timelike};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub const TIME_FORMAT: &str = "%H:%M";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Bound {
    Start,
    End,
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Start => write!(f, "start"),
            Bound::End => write!(f, "end"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntervalError {
    #[error("{bound} time '{value}' is not a valid HH:MM time")]
    InvalidTimeFormat { bound: Bound, value: String },
    #[error("end time {end} must be after start time {start}")]
    InvertedInterval { start: String, end: String },
}

impl IntervalError {
    /// Short machine-readable reason, used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            IntervalError::InvalidTimeFormat { .. } => "InvalidTimeFormat",
            IntervalError::InvertedInterval { .. } => "InvertedInterval",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedInterval {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub duration_minutes: i64,
}

impl ValidatedInterval {
    /// Zero-padded `HH:MM`, the form used in the replacement key.
    pub fn start_str(&self) -> String {
        self.start.format(TIME_FORMAT).to_string()
    }

    pub fn end_str(&self) -> String {
        self.end.format(TIME_FORMAT).to_string()
    }
}

pub fn parse_time_of_day(value: &str, bound: Bound) -> Result<NaiveTime, IntervalError> {
    NaiveTime::parse_from_str(value.trim(), TIME_FORMAT).map_err(|_| {
        IntervalError::InvalidTimeFormat {
            bound,
            value: value.to_string(),
        }
    })
}

pub fn minute_of_day(time: NaiveTime) -> i64 {
    i64::from(time.hour() * 60 + time.minute())
}

/// Parses both bounds and computes the duration. No wraparound past midnight.
pub fn validate_interval(start: &str, end: &str) -> Result<ValidatedInterval, IntervalError> {
    let start_time = parse_time_of_day(start, Bound::Start)?;
    let end_time = parse_time_of_day(end, Bound::End)?;

    let duration_minutes = minute_of_day(end_time) - minute_of_day(start_time);
    if duration_minutes <= 0 {
        return Err(IntervalError::InvertedInterval {
            start: start_time.format(TIME_FORMAT).to_string(),
            end: end_time.format(TIME_FORMAT).to_string(),
        });
    }

    Ok(ValidatedInterval {
        start: start_time,
        end: end_time,
        duration_minutes,
    })
}
