//! Timestamp normalization and deadline classification.
//!
//! Every signal is reduced to the zero-padded `YYYY-MM-DDTHH:MM:SS` form in one
//! reference offset, after which chronological order is plain string order.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use thiserror::Error;

use crate::{Status, SubmissionStamp};

const CANONICAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const SPACED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const CANONICAL_LEN: usize = 19;
const COMPACT_LEN: usize = 14;
const GIT_ISO_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimestampError {
    #[error("empty timestamp")]
    Empty,
    #[error("compact platform timestamp {0:?} is shorter than YYYYMMDDHHMMSS")]
    TooShort(String),
    #[error("{0:?} is not a valid calendar time")]
    Calendar(String),
    #[error("{0:?} is not a YYYY-MM-DDTHH:MM:SS timestamp")]
    Format(String),
    #[error("commit time {0:?} does not carry a UTC offset")]
    Offset(String),
    #[error("{0:?} is not a ±HH:MM offset")]
    ReferenceOffset(String),
}

/// A canonical, zero-padded timestamp. Ordering is lexicographic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(String);

impl Timestamp {
    /// Strict parse used for deadlines. Accepts `T` or a space between date and time.
    pub fn parse_canonical(raw: &str) -> Result<Self, TimestampError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TimestampError::Empty);
        }
        if trimmed.len() != CANONICAL_LEN {
            return Err(TimestampError::Format(trimmed.to_string()));
        }
        NaiveDateTime::parse_from_str(trimmed, CANONICAL_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(trimmed, SPACED_FORMAT))
            .map(Self::from_naive)
            .map_err(|_| TimestampError::Format(trimmed.to_string()))
    }

    /// Lenient constructor for values that are assumed to be normalized already.
    pub fn from_normalized(raw: &str) -> Self {
        Self::parse_canonical(raw).unwrap_or_else(|_| Self(raw.trim().to_string()))
    }

    pub fn from_naive(value: NaiveDateTime) -> Self {
        Self(value.format(CANONICAL_FORMAT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize a platform-native `YYYYMMDDHHMMSSfff` value by slicing fixed-width fields.
///
/// Non-numeric input is taken to be normalized already, so applying this twice
/// is a no-op.
pub fn normalize_platform_timestamp(raw: &str) -> Result<Timestamp, TimestampError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TimestampError::Empty);
    }
    if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(Timestamp::from_normalized(trimmed));
    }
    if trimmed.len() < COMPACT_LEN {
        return Err(TimestampError::TooShort(trimmed.to_string()));
    }

    let d = &trimmed[..COMPACT_LEN];
    let sliced = format!(
        "{}-{}-{}T{}:{}:{}",
        &d[0..4],
        &d[4..6],
        &d[6..8],
        &d[8..10],
        &d[10..12],
        &d[12..14]
    );
    Timestamp::parse_canonical(&sliced).map_err(|_| TimestampError::Calendar(trimmed.to_string()))
}

/// Parse a commit time carrying its own offset and shift it into `reference`.
///
/// Accepts git's strict ISO form (`2018-09-01T20:00:00-04:00`) and its looser
/// `2018-09-01 20:00:00 -0400` form. Trailing `/path` noise and shell quoting
/// are stripped first.
pub fn parse_vcs_timestamp(
    raw: &str,
    reference: FixedOffset,
) -> Result<Timestamp, TimestampError> {
    let first_line = raw.lines().next().unwrap_or_default();
    let cleaned = first_line
        .split('/')
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches(|c| c == '\'' || c == '"');
    if cleaned.is_empty() {
        return Err(TimestampError::Empty);
    }

    let committed = DateTime::parse_from_rfc3339(cleaned)
        .or_else(|_| DateTime::parse_from_str(cleaned, GIT_ISO_FORMAT))
        .map_err(|_| TimestampError::Offset(cleaned.to_string()))?;
    Ok(Timestamp::from_naive(
        committed.with_timezone(&reference).naive_local(),
    ))
}

/// Parse `±HH:MM` (or `Z`) into a fixed offset.
pub fn parse_reference_offset(raw: &str) -> Result<FixedOffset, TimestampError> {
    let trimmed = raw.trim();
    let err = || TimestampError::ReferenceOffset(trimmed.to_string());
    if trimmed.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0).ok_or_else(err);
    }

    let (sign, rest) = match trimmed.as_bytes().first() {
        Some(b'+') => (1, &trimmed[1..]),
        Some(b'-') => (-1, &trimmed[1..]),
        _ => return Err(err()),
    };
    let (hours, minutes) = rest.split_once(':').ok_or_else(err)?;
    if hours.len() != 2 || minutes.len() != 2 {
        return Err(err());
    }
    let hours: i32 = hours.parse().map_err(|_| err())?;
    let minutes: i32 = minutes.parse().map_err(|_| err())?;
    if minutes >= 60 {
        return Err(err());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(err)
}

/// Submission side: on or before the deadline is on time.
pub fn classify_submission(stamp: &SubmissionStamp, deadline: &Timestamp) -> Status {
    match stamp {
        SubmissionStamp::At(ts) if ts <= deadline => Status::Ok,
        SubmissionStamp::At(_) => Status::Late,
        SubmissionStamp::FlaggedOnTime => Status::Ok,
        SubmissionStamp::FlaggedLate => Status::Late,
        SubmissionStamp::Missing => Status::Missing,
    }
}

/// VCS side: only strictly before the deadline is on time.
pub fn classify_vcs(committed: &Timestamp, deadline: &Timestamp) -> Status {
    if committed < deadline {
        Status::Ok
    } else {
        Status::Late
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(raw: &str) -> Timestamp {
        Timestamp::parse_canonical(raw).unwrap()
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn compact_platform_time_is_sliced_into_canonical_form() {
        let normalized = normalize_platform_timestamp("20171006031150569").unwrap();
        assert_eq!(normalized.as_str(), "2017-10-06T03:11:50");
    }

    #[test]
    fn normalizing_twice_is_a_no_op() {
        for raw in ["20171006031150569", "20180902000000", "2018-09-02T00:00:00\n"] {
            let once = normalize_platform_timestamp(raw).unwrap();
            let twice = normalize_platform_timestamp(once.as_str()).unwrap();
            assert_eq!(once, twice, "input {raw:?}");
        }
    }

    #[test]
    fn malformed_compact_values_are_rejected() {
        assert_eq!(
            normalize_platform_timestamp("2017100603"),
            Err(TimestampError::TooShort("2017100603".into()))
        );
        assert!(matches!(
            normalize_platform_timestamp("20171306031150569"),
            Err(TimestampError::Calendar(_))
        ));
        assert_eq!(normalize_platform_timestamp("  \n"), Err(TimestampError::Empty));
    }

    #[test]
    fn deadlines_accept_either_separator_and_reject_loose_forms() {
        assert_eq!(ts("2018-09-02 00:00:00"), ts("2018-09-02T00:00:00"));
        assert!(Timestamp::parse_canonical("2018-9-2T00:00:00").is_err());
        assert!(Timestamp::parse_canonical("2018-09-02").is_err());
        assert!(Timestamp::parse_canonical("2018-09-02T25:00:00").is_err());
    }

    #[test]
    fn commit_offsets_are_applied_arithmetically() {
        let shifted = parse_vcs_timestamp("2018-09-01T20:00:00-04:00", utc()).unwrap();
        assert_eq!(shifted.as_str(), "2018-09-02T00:00:00");

        let loose = parse_vcs_timestamp("2018-09-02 05:30:00 +0530\n", utc()).unwrap();
        assert_eq!(loose.as_str(), "2018-09-02T00:00:00");

        let eastern = FixedOffset::west_opt(4 * 3600).unwrap();
        let local = parse_vcs_timestamp("'2018-09-02T00:00:00Z'", eastern).unwrap();
        assert_eq!(local.as_str(), "2018-09-01T20:00:00");
    }

    #[test]
    fn commit_times_without_offset_are_rejected() {
        assert!(matches!(
            parse_vcs_timestamp("2018-09-02T00:00:00", utc()),
            Err(TimestampError::Offset(_))
        ));
        assert_eq!(parse_vcs_timestamp("", utc()), Err(TimestampError::Empty));
    }

    #[test]
    fn reference_offsets_parse() {
        assert_eq!(parse_reference_offset("+00:00").unwrap(), utc());
        assert_eq!(
            parse_reference_offset("-04:00").unwrap(),
            FixedOffset::west_opt(4 * 3600).unwrap()
        );
        assert!(parse_reference_offset("0400").is_err());
        assert!(parse_reference_offset("+04:75").is_err());
    }

    #[test]
    fn boundary_rules_differ_between_submission_and_commit_sides() {
        let deadline = ts("2018-09-02T00:00:00");
        let submitted = normalize_platform_timestamp("20180902000000000").unwrap();
        let committed = parse_vcs_timestamp("2018-09-02T00:00:00+00:00", utc()).unwrap();
        assert_eq!(submitted, deadline);
        assert_eq!(committed, deadline);

        assert_eq!(
            classify_submission(&SubmissionStamp::At(submitted), &deadline),
            Status::Ok
        );
        assert_eq!(classify_vcs(&committed, &deadline), Status::Late);
    }

    #[test]
    fn flagged_and_missing_submissions_classify_without_a_timestamp() {
        let deadline = ts("2018-09-02T00:00:00");
        assert_eq!(
            classify_submission(&SubmissionStamp::FlaggedOnTime, &deadline),
            Status::Ok
        );
        assert_eq!(
            classify_submission(&SubmissionStamp::FlaggedLate, &deadline),
            Status::Late
        );
        assert_eq!(
            classify_submission(&SubmissionStamp::Missing, &deadline),
            Status::Missing
        );
        assert_eq!(
            classify_submission(&SubmissionStamp::At(ts("2018-09-02T00:00:01")), &deadline),
            Status::Late
        );
        assert_eq!(classify_vcs(&ts("2018-09-01T23:59:59"), &deadline), Status::Ok);
    }
}
