// End-time normalization and countdown arithmetic.
//
// The backend emits auction end times in several loosely-specified shapes:
// a legacy `DD-MMM-YYYY hh:mm:ss AM/PM` form, naive `YYYY-MM-DD HH:mm[:ss]`
// strings, and occasionally real ISO strings with a zone designator. Worse,
// the intended zone of a naive string depends on which endpoint produced it:
// socket events are naive-UTC, REST `end_time` fields are naive-IST. All
// call sites go through one normalizer with an explicit source-zone
// parameter so nobody can pick the wrong interpretation by accident.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};

/// Offset of India Standard Time from UTC, in minutes.
const IST_OFFSET_MINUTES: i64 = 5 * 60 + 30;

/// Which zone a naive (designator-free) timestamp string is assumed to be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTz {
    /// Naive strings are wall-clock UTC (push-channel payloads).
    Utc,
    /// Naive strings are wall-clock IST, UTC+05:30 (REST `end_time` fields).
    Ist,
}

/// Normalize a raw end-time string to a UTC instant.
///
/// Returns `None` for input that matches no supported shape; callers render
/// that as an already-expired countdown rather than failing the view.
pub fn normalize_end_time(raw: &str, tz: SourceTz) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    // The legacy 12-hour form is zone-less and always means UTC, whichever
    // endpoint produced it.
    if let Some(dt) = parse_legacy_ampm(s) {
        return Some(dt);
    }

    match tz {
        SourceTz::Utc => parse_as_utc(s),
        SourceTz::Ist => {
            if let Some(naive) = parse_naive_date_time(s) {
                let utc = naive - Duration::minutes(IST_OFFSET_MINUTES);
                return Some(DateTime::from_naive_utc_and_offset(utc, Utc));
            }
            // Strings carrying zone info (or anything else) fall through to
            // the designator-aware path as a last resort.
            parse_as_utc(s)
        }
    }
}

/// The normalized end instant as epoch milliseconds (countdown target).
pub fn end_instant_ms(raw: &str, tz: SourceTz) -> Option<i64> {
    normalize_end_time(raw, tz).map(|dt| dt.timestamp_millis())
}

/// Whole seconds remaining until `end`, clamped at zero.
pub fn remaining_seconds(end: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let ms = (end - now).num_milliseconds();
    if ms <= 0 {
        0
    } else {
        (ms / 1000) as u64
    }
}

/// Like [`remaining_seconds`], treating a missing end time as expired.
pub fn remaining_seconds_opt(end: Option<DateTime<Utc>>, now: DateTime<Utc>) -> u64 {
    end.map_or(0, |e| remaining_seconds(e, now))
}

// ---------------------------------------------------------------------------
// Parsers
// ---------------------------------------------------------------------------

/// `DD-MMM-YYYY hh:mm:ss AM/PM`, e.g. `08-Oct-2025 05:20:00 PM`.
///
/// 12-hour clock semantics: 12 AM is hour 0, 12 PM stays 12, any other PM
/// hour gains 12. The result is a UTC wall-clock time.
fn parse_legacy_ampm(s: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s, "%d-%b-%Y %I:%M:%S %p").ok()?;
    Some(DateTime::from_naive_utc_and_offset(naive, Utc))
}

/// Designator-aware parse: insert a `T` separator when missing, keep an
/// existing `Z`/`±hh:mm` designator, otherwise append `Z`.
fn parse_as_utc(s: &str) -> Option<DateTime<Utc>> {
    let iso_like = if s.contains('T') {
        s.to_string()
    } else {
        s.replacen(' ', "T", 1)
    };
    let candidate = if has_zone_designator(&iso_like) {
        iso_like
    } else {
        format!("{iso_like}Z")
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(&candidate) {
        return Some(dt.with_timezone(&Utc));
    }

    // RFC 3339 requires seconds; the backend does not always send them.
    let trimmed = candidate.strip_suffix('Z').unwrap_or(&candidate);
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }

    None
}

/// Does the string already end in a timezone designator (`Z` or `±hh:mm`)?
fn has_zone_designator(s: &str) -> bool {
    if s.ends_with('Z') {
        return true;
    }
    let bytes = s.as_bytes();
    if bytes.len() < 6 {
        return false;
    }
    let sign = bytes[bytes.len() - 6];
    (sign == b'+' || sign == b'-') && bytes[bytes.len() - 3] == b':'
}

/// Naive `YYYY-MM-DD HH:mm[:ss]` with tolerant separators: `-` or `/` (or
/// none) between date fields, ` ` or `T` before the time, one- or two-digit
/// month/day/hour.
fn parse_naive_date_time(s: &str) -> Option<NaiveDateTime> {
    let s = s.replace('T', " ");
    let s = s.trim();
    let mut chars = s.char_indices().peekable();

    let year = take_digits(&mut chars, 4, 4)?;
    skip_date_sep(&mut chars);
    let month = take_digits(&mut chars, 1, 2)?;
    skip_date_sep(&mut chars);
    let day = take_digits(&mut chars, 1, 2)?;

    match chars.next() {
        Some((_, ' ')) => {}
        _ => return None,
    }

    let hour = take_digits(&mut chars, 1, 2)?;
    match chars.next() {
        Some((_, ':')) => {}
        _ => return None,
    }
    let minute = take_digits(&mut chars, 2, 2)?;
    let second = match chars.peek() {
        Some((_, ':')) => {
            chars.next();
            take_digits(&mut chars, 2, 2)?
        }
        _ => 0,
    };

    // Anything left over (a zone designator, fractional seconds) means this
    // is not a naive timestamp; let the designator-aware path handle it.
    if chars.next().is_some() {
        return None;
    }

    let date = NaiveDate::from_ymd_opt(year as i32, month, day)?;
    let time = NaiveTime::from_hms_opt(hour, minute, second)?;
    Some(date.and_time(time))
}

fn take_digits(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    min: usize,
    max: usize,
) -> Option<u32> {
    let mut value: u32 = 0;
    let mut count = 0;
    while count < max {
        match chars.peek().and_then(|&(_, c)| c.to_digit(10)) {
            Some(digit) => {
                value = value * 10 + digit;
                chars.next();
                count += 1;
            }
            None => break,
        }
    }
    if count >= min {
        Some(value)
    } else {
        None
    }
}

fn skip_date_sep(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>) {
    if let Some((_, c)) = chars.peek() {
        if *c == '-' || *c == '/' {
            chars.next();
        }
    }
}

// ---------------------------------------------------------------------------
// Display decomposition
// ---------------------------------------------------------------------------

/// Remaining time decomposed for the countdown boxes: days unpadded,
/// hours/minutes/seconds two-digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownParts {
    pub days: u64,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
}

impl CountdownParts {
    pub fn from_seconds(total: u64) -> Self {
        let days = total / 86_400;
        let mut rest = total % 86_400;
        let hours = (rest / 3_600) as u8;
        rest %= 3_600;
        let minutes = (rest / 60) as u8;
        let seconds = (rest % 60) as u8;
        CountdownParts {
            days,
            hours,
            minutes,
            seconds,
        }
    }

    /// Display fields in UI order: days (unpadded), hours, minutes, seconds
    /// (each zero-padded to two digits).
    pub fn display_fields(&self) -> (String, String, String, String) {
        (
            self.days.to_string(),
            format!("{:02}", self.hours),
            format!("{:02}", self.minutes),
            format!("{:02}", self.seconds),
        )
    }
}

impl std::fmt::Display for CountdownParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}d {:02}:{:02}:{:02}",
            self.days, self.hours, self.minutes, self.seconds
        )
    }
}
