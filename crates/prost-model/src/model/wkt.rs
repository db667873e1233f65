//! Text and wire forms of `google.protobuf.Timestamp` and
//! `google.protobuf.Duration`.

use std::sync::LazyLock;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use regex::Regex;

/// Largest duration magnitude protobuf allows, about 10,000 years.
const MAX_DURATION_SECONDS: i64 = 315_576_000_000;
/// `0001-01-01T00:00:00Z`
const MIN_TIMESTAMP_SECONDS: i64 = -62_135_596_800;
/// `9999-12-31T23:59:59Z`
const MAX_TIMESTAMP_SECONDS: i64 = 253_402_300_799;
const NANOS_PER_SECOND: u32 = 1_000_000_000;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(-)?(\d+)(?:\.(\d{1,9}))?s$").expect("duration regex must compile")
});

/// Format a duration as `<secs>[.<frac>]s` with 0, 3, 6 or 9 fraction digits.
pub(crate) fn format_duration(value: TimeDelta) -> String {
    let seconds = value.num_seconds();
    let nanos = value.subsec_nanos();
    let sign = if seconds < 0 || nanos < 0 { "-" } else { "" };
    let seconds = seconds.unsigned_abs();
    let nanos = nanos.unsigned_abs();
    if nanos == 0 {
        format!("{sign}{seconds}s")
    } else if nanos % 1_000_000 == 0 {
        format!("{sign}{seconds}.{:03}s", nanos / 1_000_000)
    } else if nanos % 1_000 == 0 {
        format!("{sign}{seconds}.{:06}s", nanos / 1_000)
    } else {
        format!("{sign}{seconds}.{nanos:09}s")
    }
}

pub(crate) fn parse_duration(text: &str) -> Result<TimeDelta, String> {
    let caps = DURATION_RE
        .captures(text)
        .ok_or_else(|| format!("`{text}` is not a duration like `1.5s`"))?;
    let seconds: i64 = caps[2]
        .parse()
        .map_err(|_| format!("`{text}` is out of the duration range"))?;
    let nanos = caps.get(3).map_or(0, |frac| {
        let digits = frac.as_str();
        let scale = 10_i64.pow(9 - u32::try_from(digits.len()).unwrap_or(9));
        digits.parse::<i64>().unwrap_or(0) * scale
    });
    let (seconds, nanos) = if caps.get(1).is_some() {
        (-seconds, -nanos)
    } else {
        (seconds, nanos)
    };
    duration_from_parts(seconds, i32::try_from(nanos).unwrap_or(0))
        .ok_or_else(|| format!("`{text}` is out of the duration range"))
}

/// Signed span from protobuf `(seconds, nanos)`; both parts share a sign.
pub(crate) fn duration_from_parts(seconds: i64, nanos: i32) -> Option<TimeDelta> {
    if seconds.abs() > MAX_DURATION_SECONDS || nanos.unsigned_abs() >= NANOS_PER_SECOND {
        return None;
    }
    if (seconds > 0 && nanos < 0) || (seconds < 0 && nanos > 0) {
        return None;
    }
    TimeDelta::try_seconds(seconds)?.checked_add(&TimeDelta::nanoseconds(i64::from(nanos)))
}

pub(crate) fn duration_to_proto(value: TimeDelta) -> prost_types::Duration {
    prost_types::Duration {
        seconds: value.num_seconds(),
        nanos: value.subsec_nanos(),
    }
}

/// Format a time point as RFC 3339 in UTC with 0, 3, 6 or 9 fraction digits.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub(crate) fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, String> {
    let parsed = DateTime::parse_from_rfc3339(text)
        .map_err(|err| format!("`{text}` is not an RFC 3339 timestamp: {err}"))?
        .with_timezone(&Utc);
    if !(MIN_TIMESTAMP_SECONDS..=MAX_TIMESTAMP_SECONDS).contains(&parsed.timestamp()) {
        return Err(format!("`{text}` is out of the timestamp range"));
    }
    Ok(parsed)
}

pub(crate) fn timestamp_from_parts(seconds: i64, nanos: i32) -> Option<DateTime<Utc>> {
    if !(MIN_TIMESTAMP_SECONDS..=MAX_TIMESTAMP_SECONDS).contains(&seconds) {
        return None;
    }
    DateTime::from_timestamp(seconds, u32::try_from(nanos).ok()?)
}

pub(crate) fn timestamp_to_proto(value: DateTime<Utc>) -> prost_types::Timestamp {
    prost_types::Timestamp {
        seconds: value.timestamp(),
        nanos: i32::try_from(value.timestamp_subsec_nanos()).unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn durations_use_three_six_or_nine_fraction_digits() {
        let cases = [
            (TimeDelta::milliseconds(1_500), "1.500s"),
            (TimeDelta::seconds(3), "3s"),
            (TimeDelta::microseconds(1_000_001), "1.000001s"),
            (TimeDelta::nanoseconds(1), "0.000000001s"),
            (TimeDelta::milliseconds(-1_500), "-1.500s"),
            (TimeDelta::milliseconds(-250), "-0.250s"),
            (TimeDelta::zero(), "0s"),
        ];
        for (value, text) in cases {
            assert_eq!(format_duration(value), text);
            assert_eq!(parse_duration(text), Ok(value), "parsing {text}");
        }
    }

    #[test]
    fn duration_parsing_rejects_malformed_and_out_of_range_text() {
        for bad in ["1.5", "s", "1.5ms", "1.0000000001s", "+1s", "315576000001s", " 1s"] {
            assert!(parse_duration(bad).is_err(), "{bad} must be rejected");
        }
        assert_eq!(parse_duration("1.5s"), Ok(TimeDelta::milliseconds(1_500)));
    }

    #[test]
    fn duration_parts_must_share_a_sign() {
        assert_eq!(duration_from_parts(1, -1), None);
        assert_eq!(duration_from_parts(0, -1), Some(TimeDelta::nanoseconds(-1)));
        assert_eq!(
            duration_to_proto(TimeDelta::milliseconds(-1_500)),
            prost_types::Duration {
                seconds: -1,
                nanos: -500_000_000
            }
        );
    }

    #[test]
    fn timestamps_use_utc_and_trimmed_fractions() {
        let value = timestamp_from_parts(1_700_000_000, 120_000_000).expect("in range");
        assert_eq!(format_timestamp(value), "2023-11-14T22:13:20.120Z");
        assert_eq!(parse_timestamp("2023-11-14T23:13:20.12+01:00"), Ok(value));
        assert_eq!(
            format_timestamp(timestamp_from_parts(0, 0).expect("epoch")),
            "1970-01-01T00:00:00Z"
        );
        assert!(parse_timestamp("10000-01-01T00:00:00Z").is_err());
        assert!(timestamp_from_parts(MAX_TIMESTAMP_SECONDS + 1, 0).is_none());
    }

    proptest! {
        #[test]
        fn duration_text_round_trips(
            seconds in -MAX_DURATION_SECONDS..=MAX_DURATION_SECONDS,
            nanos in 0_i32..1_000_000_000,
        ) {
            let nanos = if seconds < 0 { -nanos } else { nanos };
            let value = duration_from_parts(seconds, nanos).expect("in range");
            prop_assert_eq!(parse_duration(&format_duration(value)), Ok(value));
            let proto = duration_to_proto(value);
            prop_assert_eq!(duration_from_parts(proto.seconds, proto.nanos), Some(value));
        }

        #[test]
        fn timestamp_text_round_trips(
            seconds in MIN_TIMESTAMP_SECONDS..=MAX_TIMESTAMP_SECONDS,
            nanos in 0_i32..1_000_000_000,
        ) {
            let value = timestamp_from_parts(seconds, nanos).expect("in range");
            prop_assert_eq!(parse_timestamp(&format_timestamp(value)), Ok(value));
            let proto = timestamp_to_proto(value);
            prop_assert_eq!(timestamp_from_parts(proto.seconds, proto.nanos), Some(value));
        }
    }
}
