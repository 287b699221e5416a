//! Row sampling and train/test partitioning over DataFrames.
//!
//! All functions are pure apart from the supplied RNG, so a seeded
//! `StdRng` reproduces the same selection.

use polars::prelude::*;
use rand::seq::{index, SliceRandom};
use rand::Rng;
use std::collections::BTreeMap;

use retaildata_core::DataError;

pub(crate) fn table_err(e: PolarsError) -> DataError {
    DataError::Table(e.to_string())
}

/// Fractions must lie in `(0, 1]`.
pub fn validate_fraction(name: &str, fraction: f64) -> Result<(), DataError> {
    if fraction.is_finite() && fraction > 0.0 && fraction <= 1.0 {
        Ok(())
    } else {
        Err(DataError::InvalidConfiguration(format!(
            "{name} must be in (0, 1], got {fraction}"
        )))
    }
}

fn take_count(len: usize, fraction: f64) -> usize {
    ((len as f64 * fraction).floor() as usize).min(len)
}

/// Rows at `indices`, in that order.
fn take_rows(df: &DataFrame, indices: &[usize]) -> Result<DataFrame, DataError> {
    let idx = IdxCa::from_vec(
        "idx".into(),
        indices.iter().map(|&i| i as IdxSize).collect(),
    );
    df.take(&idx).map_err(table_err)
}

/// `floor(n * fraction)` rows chosen uniformly without replacement. Row
/// order is preserved.
pub fn sample_uniform<R: Rng + ?Sized>(
    df: &DataFrame,
    fraction: f64,
    rng: &mut R,
) -> Result<DataFrame, DataError> {
    let n = df.height();
    let mut chosen = index::sample(rng, n, take_count(n, fraction)).into_vec();
    chosen.sort_unstable();
    take_rows(df, &chosen)
}

/// Sample each group of `column` independently at `fraction`, so group
/// proportions carry over. Nulls form their own group.
pub fn sample_stratified<R: Rng + ?Sized>(
    df: &DataFrame,
    column: &str,
    fraction: f64,
    rng: &mut R,
) -> Result<DataFrame, DataError> {
    let keys = df
        .column(column)
        .and_then(|c| c.as_materialized_series().cast(&DataType::String))
        .map_err(table_err)?;
    let keys = keys.str().map_err(table_err)?;

    let mut groups: BTreeMap<Option<&str>, Vec<usize>> = BTreeMap::new();
    for (row, key) in keys.into_iter().enumerate() {
        groups.entry(key).or_default().push(row);
    }

    let mut chosen = Vec::new();
    for rows in groups.values() {
        let k = take_count(rows.len(), fraction);
        chosen.extend(index::sample(rng, rows.len(), k).into_iter().map(|j| rows[j]));
    }
    chosen.sort_unstable();
    take_rows(df, &chosen)
}

/// A disjoint, exhaustive partition of a frame's rows.
#[derive(Debug, Clone)]
pub struct TrainTest {
    pub train: DataFrame,
    pub test: DataFrame,
}

/// Shuffle every row, then the first `floor(n * fraction)` rows are train
/// and the rest test.
pub fn train_test_split<R: Rng + ?Sized>(
    df: &DataFrame,
    fraction: f64,
    rng: &mut R,
) -> Result<TrainTest, DataError> {
    let n = df.height();
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);
    let shuffled = take_rows(df, &order)?;

    let k = take_count(n, fraction);
    Ok(TrainTest {
        train: shuffled.slice(0, k),
        test: shuffled.slice(k as i64, n - k),
    })
}
