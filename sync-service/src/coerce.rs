use serde_json::Value;
use time::{
    format_description::FormatItem, macros::format_description, Date, OffsetDateTime,
    PrimitiveDateTime, UtcOffset,
};

const DATETIME_T: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
const DATETIME_SPACE: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
const DATE_ONLY: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Best-effort numeric interpretation of a JSON value.
///
/// Numbers pass through, numeric strings parse, everything else is `None`.
/// Call sites choose one of two policies and must not mix them up:
/// accumulation treats `None` as zero, presence checks keep the `Option`.
pub fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Best-effort timestamp interpretation, normalized to a UTC hour start.
///
/// Accepts RFC 3339 date-times, offset-less date-times (assumed UTC, with
/// either a 'T' or space separator) and bare dates (midnight UTC). Minutes
/// and below are truncated. Unparseable input is `None`, never an error.
pub fn hour_start(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();

    if let Ok(dt) = OffsetDateTime::parse(raw, &time::format_description::well_known::Rfc3339) {
        return truncate_to_hour(dt.to_offset(UtcOffset::UTC));
    }

    for format in [DATETIME_T, DATETIME_SPACE] {
        if let Ok(dt) = PrimitiveDateTime::parse(raw, format) {
            return truncate_to_hour(dt.assume_utc());
        }
    }

    if let Ok(date) = Date::parse(raw, &DATE_ONLY) {
        return Some(date.midnight().assume_utc());
    }

    None
}

fn truncate_to_hour(dt: OffsetDateTime) -> Option<OffsetDateTime> {
    dt.replace_minute(0)
        .ok()?
        .replace_second(0)
        .ok()?
        .replace_nanosecond(0)
        .ok()
}
