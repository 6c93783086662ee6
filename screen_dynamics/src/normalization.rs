use polars::prelude::*;

use crate::helper_functions::{column_values, sample_columns};

/// Total each sample column is rescaled to, making counts comparable
/// across samples with different sequencing depth.
pub const NORMALIZATION_TOTAL: f64 = 1e4;

/// Rescale every sample column so its defined values sum to
/// [`NORMALIZATION_TOTAL`]. A column with nothing to normalize is an
/// error; silently dividing by zero would poison every downstream stage.
pub fn normalize_by_total(df: &DataFrame) -> PolarsResult<DataFrame> {
    let mut out = df.clone();
    for column in sample_columns(df) {
        let values = column_values(df, &column)?;
        let defined: Vec<f64> = values.iter().flatten().copied().collect();
        if defined.is_empty() {
            return Err(PolarsError::ComputeError(
                format!("column {column:?} has no defined counts to normalize").into(),
            ));
        }
        let total: f64 = defined.iter().sum();
        if total <= 0.0 {
            return Err(PolarsError::ComputeError(
                format!("column {column:?} sums to {total}; normalization undefined").into(),
            ));
        }
        let scaled: Vec<Option<f64>> = values
            .iter()
            .map(|v| v.map(|x| x / total * NORMALIZATION_TOTAL))
            .collect();
        out.replace(&column, Series::new(column.as_str().into(), scaled))?;
    }
    Ok(out)
}
