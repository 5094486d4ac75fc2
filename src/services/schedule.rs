//! Quarter-hourly schedule table built from the hourly reference table.

use crate::error::{Error, Result};
use crate::frame::{Frame, Value};
use chrono::{NaiveDate, NaiveDateTime, TimeDelta, Timelike};

pub const SLOT_MINUTES: i64 = 15;
pub const SLOTS_PER_HOUR: usize = 4;
pub const SLOTS_PER_DAY: usize = 96;
/// Key columns of a schedule row, ahead of the reference columns.
pub const KEY_COLUMNS: [&str; 3] = ["day_index", "hour", "minute"];

fn reference_start() -> Result<NaiveDateTime> {
    NaiveDate::from_ymd_opt(2019, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| Error::Config("invalid schedule reference start".to_string()))
}

/// Expand hourly rows to 15-minute slots by forward fill.
///
/// Each hour covers its own four slots, so the slots after the last hourly
/// row (23:15, 23:30, 23:45 of the final day) repeat that row.
pub fn materialize(hourly: &Frame) -> Result<Frame> {
    if hourly.is_empty() {
        return Err(Error::decode("schedule reference table", "no rows"));
    }
    let start = reference_start()?;
    let reference: Vec<String> = hourly.columns.iter().map(|c| crate::utils::normalize_column_name(c)).collect();
    if let Some(clash) = reference.iter().find(|c| KEY_COLUMNS.contains(&c.as_str())) {
        return Err(Error::decode("schedule reference table", format!("column '{}' collides with a key column", clash)));
    }
    let mut columns: Vec<String> = KEY_COLUMNS.iter().map(|c| c.to_string()).collect();
    columns.extend(reference);

    let mut frame = Frame::new(columns);
    frame.rows.reserve(hourly.len() * SLOTS_PER_HOUR);
    for slot in 0..hourly.len() * SLOTS_PER_HOUR {
        let at = start + TimeDelta::minutes(SLOT_MINUTES * slot as i64);
        let mut row = vec![
            Value::Integer((slot / SLOTS_PER_DAY) as i64),
            Value::Integer(i64::from(at.hour())),
            Value::Integer(i64::from(at.minute())),
        ];
        row.extend(hourly.rows[slot / SLOTS_PER_HOUR].iter().cloned());
        frame.rows.push(row);
    }
    Ok(frame)
}
