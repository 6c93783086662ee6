use polars::prelude::*;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Population standard deviation (ddof = 0), matching `np.std`.
pub fn std_pop(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// Sample standard deviation (ddof = 1), matching pandas `Series.std`.
pub fn std_sample(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

/// q-th percentile with linear interpolation between order statistics,
/// the same convention as `np.percentile`. An empty input is an error: a
/// threshold derived from nothing must never silently become NaN.
pub fn percentile(values: &[f64], q: f64) -> PolarsResult<f64> {
    if values.is_empty() {
        return Err(PolarsError::ComputeError(
            "percentile of an empty value set is undefined".into(),
        ));
    }
    if !(0.0..=100.0).contains(&q) {
        return Err(PolarsError::ComputeError(
            format!("percentile q={q} out of range [0, 100]").into(),
        ));
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return Ok(sorted[lo]);
    }
    let frac = rank - lo as f64;
    Ok(sorted[lo] + frac * (sorted[hi] - sorted[lo]))
}
