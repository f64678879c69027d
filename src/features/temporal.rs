use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parses the timestamp formats seen in transaction exports. Offsets are not converted:
/// an RFC 3339 value keeps its wall-clock time.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Some(ts) = DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
    {
        return Some(ts);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.naive_local());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporalFeatures {
    pub hour: u32,
    /// Monday = 0 .. Sunday = 6
    pub day_of_week: u32,
    pub is_weekend: bool,
    pub month: u32,
    pub is_night: bool,
    pub is_salary_week: bool,
}

impl TemporalFeatures {
    pub fn from_timestamp(ts: &NaiveDateTime) -> Self {
        let hour = ts.hour();
        let day_of_week = ts.weekday().num_days_from_monday();
        Self {
            hour,
            day_of_week,
            is_weekend: day_of_week >= 5,
            month: ts.month(),
            is_night: hour <= 5,
            is_salary_week: ts.day() <= 7,
        }
    }
}
