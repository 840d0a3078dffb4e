//! Canonical row shape of `api_metrics` and per-field validation

use crate::models::MetricRecord;
use chrono::NaiveDateTime;
use thiserror::Error;

/// Target table name
pub const TABLE_NAME: &str = "api_metrics";

/// Textual timestamp layout used by the input files: `YYYY-MM-DD HHMM`
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H%M";

/// Input column order
pub const COLUMNS: [&str; 7] = [
    "service_name",
    "endpoint",
    "timestamp",
    "cpm",
    "latency",
    "query_start_time",
    "query_end_time",
];

/// Idempotent DDL for the target table
pub const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS api_metrics (
    service_name String,
    endpoint String,
    timestamp DateTime,
    cpm Float32,
    latency Float32,
    query_start_time DateTime,
    query_end_time DateTime
) ENGINE = MergeTree()
PARTITION BY toYYYYMM(timestamp)
ORDER BY timestamp";

/// Why a raw row was rejected
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("field `{0}` is empty")]
    MissingField(&'static str),

    #[error("field `{field}` is not a `YYYY-MM-DD HHMM` timestamp: {value:?}")]
    InvalidTimestamp { field: &'static str, value: String },

    #[error("field `{field}` is not a finite 32-bit float: {value:?}")]
    InvalidNumber { field: &'static str, value: String },
}

/// Parse one raw row in [`COLUMNS`] order into a record.
///
/// Either every field is valid and a full record comes back, or the row is
/// rejected as a whole.
pub fn parse_record<S: AsRef<str>>(fields: &[S]) -> Result<MetricRecord, RecordError> {
    if fields.len() != COLUMNS.len() {
        return Err(RecordError::FieldCount {
            expected: COLUMNS.len(),
            found: fields.len(),
        });
    }

    let text = |i: usize| -> Result<String, RecordError> {
        let value = fields[i].as_ref();
        if value.is_empty() {
            Err(RecordError::MissingField(COLUMNS[i]))
        } else {
            Ok(value.to_string())
        }
    };

    Ok(MetricRecord {
        service_name: text(0)?,
        endpoint: text(1)?,
        sample_time: parse_timestamp(COLUMNS[2], fields[2].as_ref())?,
        requests_per_minute: parse_f32(COLUMNS[3], fields[3].as_ref())?,
        latency: parse_f32(COLUMNS[4], fields[4].as_ref())?,
        query_window_start: parse_timestamp(COLUMNS[5], fields[5].as_ref())?,
        query_window_end: parse_timestamp(COLUMNS[6], fields[6].as_ref())?,
    })
}

/// Render a timestamp back into the input layout
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(field: &'static str, value: &str) -> Result<NaiveDateTime, RecordError> {
    let invalid = || RecordError::InvalidTimestamp {
        field,
        value: value.to_string(),
    };

    if value.is_empty() {
        return Err(RecordError::MissingField(field));
    }
    // chrono accepts unpadded numbers, so check the fixed shape first.
    if !has_timestamp_shape(value) {
        return Err(invalid());
    }
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).map_err(|_| invalid())
}

fn has_timestamp_shape(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() == 15
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            10 => *b == b' ',
            _ => b.is_ascii_digit(),
        })
}

fn parse_f32(field: &'static str, value: &str) -> Result<f32, RecordError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RecordError::MissingField(field));
    }
    match trimmed.parse::<f32>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(RecordError::InvalidNumber {
            field,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn row<'a>(ts: &'a str, cpm: &'a str) -> [&'a str; 7] {
        ["orders", "/api/v1/orders", ts, cpm, "12.5", ts, "2024-03-01 0931"]
    }

    #[test]
    fn test_parse_valid_record() {
        let record = parse_record(&row("2024-03-01 0930", "42")).unwrap();
        assert_eq!(record.service_name, "orders");
        assert_eq!(record.endpoint, "/api/v1/orders");
        assert_eq!(record.requests_per_minute, 42.0);
        assert_eq!(record.latency, 12.5);
        assert_eq!(format_timestamp(&record.sample_time), "2024-03-01 0930");
        assert_eq!(format_timestamp(&record.query_window_end), "2024-03-01 0931");
    }

    #[test]
    fn test_timestamps_round_trip() {
        for ts in ["2024-01-01 0000", "2023-12-31 2359", "2024-02-29 1205"] {
            let record = parse_record(&row(ts, "1")).unwrap();
            assert_eq!(format_timestamp(&record.sample_time), ts);
            assert_eq!(format_timestamp(&record.query_window_start), ts);
        }
    }

    fn valid_timestamp() -> impl Strategy<Value = String> {
        (0i64..60_000, 0u32..24, 0u32..60).prop_map(|(days, hour, minute)| {
            let date = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap() + chrono::Duration::days(days);
            format!("{} {:02}{:02}", date.format("%Y-%m-%d"), hour, minute)
        })
    }

    proptest! {
        #[test]
        fn test_any_valid_row_round_trips(
            sample in valid_timestamp(),
            start in valid_timestamp(),
            end in valid_timestamp(),
        ) {
            let fields = ["orders", "/api/v1/orders", sample.as_str(), "3", "12.5", start.as_str(), end.as_str()];
            let record = parse_record(&fields).unwrap();
            prop_assert_eq!(format_timestamp(&record.sample_time), sample);
            prop_assert_eq!(format_timestamp(&record.query_window_start), start);
            prop_assert_eq!(format_timestamp(&record.query_window_end), end);
        }
    }

    #[test]
    fn test_rejects_malformed_timestamps() {
        for ts in [
            "2024-03-01 09:30",
            "2024-3-01 0930",
            "2024-03-01T0930",
            "2024-13-01 0930",
            "2024-02-30 0930",
            "2024-03-01 2460",
            "not a date",
        ] {
            let err = parse_record(&row(ts, "1")).unwrap_err();
            assert!(
                matches!(err, RecordError::InvalidTimestamp { field: "timestamp", .. }),
                "{ts}: {err:?}"
            );
        }
    }

    #[test]
    fn test_rejects_bad_numbers() {
        for cpm in ["abc", "1e39", "NaN", "inf"] {
            let err = parse_record(&row("2024-03-01 0930", cpm)).unwrap_err();
            assert!(matches!(err, RecordError::InvalidNumber { field: "cpm", .. }), "{cpm}");
        }
    }

    #[test]
    fn test_accepts_padded_numbers() {
        let record = parse_record(&row("2024-03-01 0930", " 7.25 ")).unwrap();
        assert_eq!(record.requests_per_minute, 7.25);
    }

    #[test]
    fn test_rejects_missing_fields() {
        let mut fields = row("2024-03-01 0930", "1");
        fields[1] = "";
        assert_eq!(
            parse_record(&fields).unwrap_err(),
            RecordError::MissingField("endpoint")
        );

        let mut fields = row("2024-03-01 0930", "1");
        fields[4] = "";
        assert_eq!(
            parse_record(&fields).unwrap_err(),
            RecordError::MissingField("latency")
        );
    }

    #[test]
    fn test_rejects_wrong_field_count() {
        let err = parse_record(&["a", "b", "c"]).unwrap_err();
        assert_eq!(err, RecordError::FieldCount { expected: 7, found: 3 });
    }
}
