//! Date-based train/test splitting.

use chrono::NaiveDate;
use polars::prelude::*;

use crate::sampling::table_err;
use retaildata_core::DataError;

/// Rows before the split date, rows on or after it, and how many rows had
/// no readable date (those land in neither frame).
#[derive(Debug, Clone)]
pub struct TemporalSplit {
    pub train: DataFrame,
    pub test: DataFrame,
    pub undated: usize,
}

/// Split on `column`, which may hold dates, datetimes or ISO date strings.
/// Only the calendar date (the first ten characters) is compared.
pub fn split_by_date(
    df: &DataFrame,
    column: &str,
    split_date: NaiveDate,
) -> Result<TemporalSplit, DataError> {
    let values = df
        .column(column)
        .and_then(|c| c.as_materialized_series().cast(&DataType::String))
        .map_err(|_| {
            DataError::InvalidConfiguration(format!("date column '{column}' is not in the table"))
        })?;
    let values = values.str().map_err(table_err)?;

    let dates: Vec<Option<NaiveDate>> = values.into_iter().map(|v| v.and_then(parse_day)).collect();
    let before: Vec<bool> = dates.iter().map(|d| matches!(d, Some(d) if *d < split_date)).collect();
    let after: Vec<bool> = dates.iter().map(|d| matches!(d, Some(d) if *d >= split_date)).collect();
    let undated = dates.iter().filter(|d| d.is_none()).count();

    let train = df
        .filter(&BooleanChunked::new("train".into(), &before))
        .map_err(table_err)?;
    let test = df
        .filter(&BooleanChunked::new("test".into(), &after))
        .map_err(table_err)?;
    Ok(TemporalSplit {
        train,
        test,
        undated,
    })
}

fn parse_day(value: &str) -> Option<NaiveDate> {
    let day = value.trim().get(..10)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}
