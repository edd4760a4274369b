//! Excel serial dates and declared-type coercion
//!
//! Spreadsheet cells carry dates as serial numbers (days since 1899-12-30 in
//! the 1900 date system). The read codec decodes a cell into whatever native
//! value the cell holds; `coerce` then bends that value into the field's
//! declared kind, crossing number/date/text boundaries where it can.

use crate::types::{CellValue, ValueKind};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// `num_days_from_ce` of 1899-12-30, serial day zero
const EPOCH_CE_DAYS: i64 = 693_594;

/// Convert a date to an Excel serial number
pub fn date_to_serial(date: NaiveDate) -> f64 {
    (date.num_days_from_ce() as i64 - EPOCH_CE_DAYS) as f64
}

/// Convert a date-time to an Excel serial number (fraction = time of day)
pub fn datetime_to_serial(dt: NaiveDateTime) -> f64 {
    let days = date_to_serial(dt.date());
    let secs = dt.time().num_seconds_from_midnight() as f64
        + dt.time().nanosecond() as f64 / 1_000_000_000.0;
    days + secs / SECONDS_PER_DAY
}

/// Convert an Excel serial number to a date-time, rounded to the millisecond
pub fn serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 || serial > 2_958_465.0 {
        return None;
    }
    let days = serial.trunc() as i64 + EPOCH_CE_DAYS;
    let millis = ((serial - serial.trunc()) * SECONDS_PER_DAY * 1000.0).round() as i64;
    NaiveDate::from_num_days_from_ce_opt(i32::try_from(days).ok()?)?
        .and_hms_opt(0, 0, 0)?
        .checked_add_signed(Duration::milliseconds(millis))
}

/// Convert an Excel serial number to a date (time of day dropped)
pub fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    serial_to_datetime(serial).map(|dt| dt.date())
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y/%m/%d"))
        .ok()
        .or_else(|| parse_datetime(s).map(|dt| dt.date()))
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    None
}

/// Finite and inside the `i64` range once truncated
fn fits_i64(f: f64) -> bool {
    f.is_finite() && f.trunc().abs() < 9.223_372_036_854_775e18
}

/// Coerce a decoded value into the declared kind.
///
/// Returns `None` when no sensible conversion exists; the caller turns that
/// into a type mismatch naming both kinds. `Null` passes through untouched.
pub fn coerce(value: CellValue, target: ValueKind) -> Option<CellValue> {
    if value.kind() == Some(target) || value.is_null() {
        return Some(value);
    }

    match target {
        ValueKind::Text => match value {
            CellValue::List(_) => None,
            other => Some(CellValue::Text(other.as_text())),
        },
        ValueKind::Int => match value {
            CellValue::Float(f) if fits_i64(f) => Some(CellValue::Int(f.trunc() as i64)),
            CellValue::Text(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| {
                        s.parse::<f64>()
                            .ok()
                            .filter(|f| fits_i64(*f) && f.fract() == 0.0)
                            .map(|f| f as i64)
                    })
                    .map(CellValue::Int)
            }
            CellValue::Date(d) => Some(CellValue::Int(date_to_serial(d) as i64)),
            _ => None,
        },
        ValueKind::Float => match value {
            CellValue::Int(i) => Some(CellValue::Float(i as f64)),
            CellValue::Text(s) => s.trim().parse::<f64>().ok().map(CellValue::Float),
            CellValue::Date(d) => Some(CellValue::Float(date_to_serial(d))),
            CellValue::DateTime(dt) => Some(CellValue::Float(datetime_to_serial(dt))),
            _ => None,
        },
        ValueKind::Bool => match value {
            CellValue::Int(_) | CellValue::Float(_) | CellValue::Text(_) => {
                value.as_bool().map(CellValue::Bool)
            }
            _ => None,
        },
        ValueKind::Enum => match value {
            CellValue::Text(s) => Some(CellValue::Enum(s.trim().to_string())),
            CellValue::Int(i) => Some(CellValue::Enum(i.to_string())),
            _ => None,
        },
        ValueKind::Date => match value {
            CellValue::DateTime(dt) => Some(CellValue::Date(dt.date())),
            CellValue::Float(f) => serial_to_date(f).map(CellValue::Date),
            CellValue::Int(i) => serial_to_date(i as f64).map(CellValue::Date),
            CellValue::Text(s) => parse_date(&s).map(CellValue::Date),
            _ => None,
        },
        ValueKind::DateTime => match value {
            CellValue::Date(d) => d.and_hms_opt(0, 0, 0).map(CellValue::DateTime),
            CellValue::Float(f) => serial_to_datetime(f).map(CellValue::DateTime),
            CellValue::Int(i) => serial_to_datetime(i as f64).map(CellValue::DateTime),
            CellValue::Text(s) => parse_datetime(&s)
                .or_else(|| parse_date(&s).and_then(|d| d.and_hms_opt(0, 0, 0)))
                .map(CellValue::DateTime),
            _ => None,
        },
        ValueKind::List => None,
    }
}
