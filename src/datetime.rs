// Date values for the `date` pipe
// A DateObject is a host object: its calendar fields are properties and
// `format`/`iso` are methods, so templates reach them through plain paths.

use std::fmt::Write;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Timelike, Utc};
use thiserror::Error;

use crate::reflect::{MemberTable, Reflect};
use crate::signature::ParamType;
use crate::value::Value;

/// DateTime errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DateTimeError {
    #[error("Parse error: '{0}' is not a recognized date")]
    Parse(String),

    #[error("Range error: timestamp {0} is out of range")]
    OutOfRange(i64),

    #[error("Format error: invalid pattern '{0}'")]
    Format(String),
}

/// Parse RFC 3339 text, or a naive date/time taken as UTC.
pub fn parse_date(text: &str) -> Result<DateTime<Utc>, DateTimeError> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    for pattern in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, pattern) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| DateTimeError::Parse(text.to_string()))
}

/// A point in time exposed to templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateObject {
    at: DateTime<Utc>,
}

impl DateObject {
    pub fn new(at: DateTime<Utc>) -> Self {
        DateObject { at }
    }

    /// From milliseconds since the Unix epoch.
    pub fn from_millis(ms: i64) -> Result<Self, DateTimeError> {
        Utc.timestamp_millis_opt(ms)
            .single()
            .map(DateObject::new)
            .ok_or(DateTimeError::OutOfRange(ms))
    }

    pub fn parse(text: &str) -> Result<Self, DateTimeError> {
        parse_date(text).map(DateObject::new)
    }

    pub fn datetime(&self) -> DateTime<Utc> {
        self.at
    }

    /// strftime-style formatting; a malformed pattern is an error, not a panic.
    pub fn format(&self, pattern: &str) -> Result<String, DateTimeError> {
        let mut out = String::new();
        write!(out, "{}", self.at.format(pattern))
            .map_err(|_| DateTimeError::Format(pattern.to_string()))?;
        Ok(out)
    }

    /// ISO 8601 with millisecond precision, e.g. `2024-03-01T08:30:00.000Z`
    pub fn iso(&self) -> String {
        self.at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

impl Reflect for DateObject {
    fn describe(members: &mut MemberTable<Self>) {
        members
            .property("year", |d| Value::from(d.at.year()))
            .property("month", |d| Value::from(d.at.month()))
            .property("day", |d| Value::from(d.at.day()))
            .property("hours", |d| Value::from(d.at.hour()))
            .property("minutes", |d| Value::from(d.at.minute()))
            .property("seconds", |d| Value::from(d.at.second()))
            .property("milliseconds", |d| Value::from(d.at.timestamp_subsec_millis()))
            .property("dayOfWeek", |d| Value::from(d.at.weekday().num_days_from_sunday()))
            .property("time", |d| Value::from(d.at.timestamp_millis()))
            .method("format", &[ParamType::String], |d, args| {
                let pattern = args[0].as_str().unwrap_or_default();
                Ok(Value::from(d.format(pattern)?))
            })
            .method("iso", &[], |d, _| Ok(Value::from(d.iso())));
    }

    fn type_name(&self) -> &str {
        "Date"
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(at: DateTime<Utc>) -> Self {
        Value::from_host(DateObject::new(at))
    }
}
