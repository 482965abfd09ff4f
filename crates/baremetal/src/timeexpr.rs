//! Termination time expression parsing.
//!
//! Spot devices carry a user-supplied termination time which may be written
//! either as an absolute RFC 3339 timestamp or as a duration from now
//! ("1h1m"). Parsers are tried in order; the first one that accepts the
//! input wins, and the resolved instant is rounded to a fixed granularity.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use thiserror::Error;

/// Granularity that resolved termination times are rounded to.
pub const TERMINATION_TIME_ROUND: Duration = Duration::from_secs(10);

/// A single time format parser. Total over its domain: returns an error
/// instead of panicking for any input.
pub type TimeParser = fn(&str) -> Result<DateTime<Utc>, TimeParseError>;

/// Parsers accepted for termination times, tried in order.
pub const TERMINATION_TIME_PARSERS: &[TimeParser] = &[from_rfc3339, after_duration];

/// Failure of one parser in the chain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimeParseError {
    /// Input is not an RFC 3339 timestamp.
    #[error("\"{input}\" is not a valid RFC 3339 time; one hour and one minute from now would be \"{example}\"")]
    Rfc3339 { input: String, example: String },

    /// Input is not a duration expression.
    #[error("\"{input}\" is not a valid duration; one hour and one minute from now would be \"1h 1m\"")]
    Duration { input: String },
}

/// Aggregated failure: no parser in the chain accepted the input.
#[derive(Error, Debug, Clone)]
#[error("\"{input}\" is not parsable as a time: {}", join_failures(.failures))]
pub struct TimeExprError {
    pub input: String,
    /// One failure per parser, in chain order.
    pub failures: Vec<TimeParseError>,
}

fn join_failures(failures: &[TimeParseError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Parse an absolute RFC 3339 timestamp.
pub fn from_rfc3339(input: &str) -> Result<DateTime<Utc>, TimeParseError> {
    DateTime::parse_from_rfc3339(input)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| TimeParseError::Rfc3339 {
            input: input.to_string(),
            example: (Utc::now() + chrono::Duration::minutes(61))
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        })
}

/// Parse a duration expression and resolve it relative to now.
pub fn after_duration(input: &str) -> Result<DateTime<Utc>, TimeParseError> {
    let parsed = humantime::parse_duration(input).map_err(|_| TimeParseError::Duration {
        input: input.to_string(),
    })?;
    let offset = chrono::Duration::from_std(parsed).map_err(|_| TimeParseError::Duration {
        input: input.to_string(),
    })?;
    Ok(Utc::now() + offset)
}

/// Resolve a time expression through an ordered parser chain.
///
/// The first parser that accepts the input wins and its result is rounded
/// to [`TERMINATION_TIME_ROUND`]. If every parser rejects the input, the
/// returned error carries each parser's individual failure.
///
/// # Errors
/// Returns [`TimeExprError`] when no parser accepts the input.
pub fn resolve(input: &str, parsers: &[TimeParser]) -> Result<DateTime<Utc>, TimeExprError> {
    let mut failures = Vec::with_capacity(parsers.len());
    for parse in parsers {
        match parse(input) {
            Ok(t) => return Ok(round_to(t, TERMINATION_TIME_ROUND)),
            Err(e) => failures.push(e),
        }
    }
    Err(TimeExprError {
        input: input.to_string(),
        failures,
    })
}

/// Validation hook for config layers: an empty string means "unset" and is
/// accepted; anything else must resolve through the termination parsers.
///
/// # Errors
/// Returns [`TimeExprError`] when the input is non-empty and unparsable.
pub fn validate(input: &str) -> Result<(), TimeExprError> {
    if input.is_empty() {
        return Ok(());
    }
    resolve(input, TERMINATION_TIME_PARSERS).map(|_| ())
}

/// Round a timestamp to the nearest multiple of `granularity`, halves
/// rounding up.
#[must_use]
pub fn round_to(t: DateTime<Utc>, granularity: Duration) -> DateTime<Utc> {
    let step = i64::try_from(granularity.as_millis()).unwrap_or(0);
    if step == 0 {
        return t;
    }
    let ms = t.timestamp_millis();
    let rounded = (ms + step / 2).div_euclid(step) * step;
    Utc.timestamp_millis_opt(rounded).single().unwrap_or(t)
}
