use std::fs::{self, File};
use std::path::Path;

use plotters::style::RGBColor;
use polars::prelude::*;

use crate::models::{polars_err, GuideCategory, GUIDE_COLUMN};

pub fn read_csv(path: &Path) -> PolarsResult<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()
}

pub fn read_tsv(path: &Path) -> PolarsResult<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .map_parse_options(|mut o| {
            o.separator = b'\t';
            o
        })
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()
}

pub fn dataframe_to_csv(df: &mut DataFrame, path: &Path) -> PolarsResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| polars_err(Box::new(e)))?;
    }
    let mut file = File::create(path).map_err(|e| polars_err(Box::new(e)))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(b',')
        .finish(df)
}

/// Guide identifiers of a count matrix, in row order.
pub fn guide_names(df: &DataFrame) -> PolarsResult<Vec<String>> {
    Ok(df
        .column(GUIDE_COLUMN)?
        .str()?
        .into_iter()
        .map(|v| v.unwrap_or_default().to_string())
        .collect())
}

/// All sample/library columns of a count matrix (everything but the guide id).
pub fn sample_columns(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .iter()
        .filter(|c| c.as_str() != GUIDE_COLUMN)
        .map(|c| c.to_string())
        .collect()
}

pub fn column_values(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<f64>>> {
    Ok(df.column(name)?.f64()?.into_iter().collect())
}

/// Fixed colour map for guide categories (colorblind palette order:
/// Wnt, negative controls, Tcr, positive controls).
pub fn colour_for_category(category: GuideCategory) -> RGBColor {
    match category {
        GuideCategory::Wnt => RGBColor(1, 115, 178),
        GuideCategory::NegativeControl => RGBColor(222, 143, 5),
        GuideCategory::Tcr => RGBColor(2, 158, 115),
        GuideCategory::PositiveControl => RGBColor(213, 94, 0),
        GuideCategory::Other => RGBColor(120, 120, 120),
    }
}

/// Bin values into a density histogram over `range`; returns
/// (bin centre, density) pairs for line plotting.
pub fn histogram_density(values: &[f64], range: (f64, f64), bins: usize) -> Vec<(f64, f64)> {
    let (lo, hi) = range;
    if values.is_empty() || bins == 0 || hi <= lo {
        return Vec::new();
    }
    let width = (hi - lo) / bins as f64;
    let mut counts = vec![0usize; bins];
    for &v in values {
        let mut idx = ((v - lo) / width) as usize;
        if idx >= bins {
            idx = bins - 1;
        }
        counts[idx] += 1;
    }
    let norm = values.len() as f64 * width;
    counts
        .iter()
        .enumerate()
        .map(|(i, &c)| (lo + (i as f64 + 0.5) * width, c as f64 / norm))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    #[test]
    fn sample_columns_skip_guide_id() {
        let df = df![
            GUIDE_COLUMN => &["g1", "g2"],
            "a" => &[1.0, 2.0],
            "b" => &[3.0, 4.0]
        ]
        .unwrap();
        assert_eq!(sample_columns(&df), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(guide_names(&df).unwrap(), vec!["g1", "g2"]);
    }

    #[test]
    fn histogram_density_integrates_to_one() {
        let values: Vec<f64> = (0..100).map(|i| i as f64 / 10.0).collect();
        let hist = histogram_density(&values, (0.0, 10.0), 20);
        let width = 0.5;
        let total: f64 = hist.iter().map(|(_, d)| d * width).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn tsv_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counts.tsv");
        std::fs::write(&path, "gRNA_name\tcount\ng1\t10\ng2\t20\n").unwrap();
        let df = read_tsv(&path).unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(guide_names(&df).unwrap(), vec!["g1", "g2"]);
    }
}
