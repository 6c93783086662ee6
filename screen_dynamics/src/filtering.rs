use std::fs;

use plotters::prelude::*;
use plotters_svg::SVGBackend;
use polars::prelude::*;
use tracing::{info, warn};

use crate::config::ScreenConfig;
use crate::helper_functions::{guide_names, histogram_density, sample_columns};
use crate::models::{polars_err, ScreenStage, SubLibrary};
use crate::stats::percentile;

/// Guides that were synthesized into the library but never used in the
/// screen. Counts attributed to them are by definition false assignments.
pub const DEFAULT_FILTER_OUT: &[&str] = &[
    "CTRL00717",
    "CTRL00728",
    "CTRL00783",
    "CTRL00801",
    "CTRL00851",
    "CTRL00859",
    "CTRL00868",
    "CTRL00872",
    "CTRL00878",
    "CTRL00881",
    "CTRL00969",
    "CTRL00972",
    "CTRL00983",
    "Essential_library_ABL1_1",
    "Essential_library_ABL1_2",
    "Essential_library_ABL1_3",
    "Essential_library_MAPK1_1",
    "Essential_library_MAPK1_2",
    "Essential_library_MAPK1_3",
    "Essential_library_GATA1_1",
    "Essential_library_GATA1_2",
    "Essential_library_GATA1_3",
    "Essential_library_BRCA2_1",
    "Essential_library_BRCA2_2",
    "Essential_library_BRCA2_3",
    "Essential_library_PARP1_1",
    "Essential_library_PARP1_2",
    "Essential_library_PARP1_3",
];

/// Filter a guide × sample count matrix.
///
/// Unused guides are dropped outright and each sample column loses the
/// guides of the opposite sub-library. A reference copy keeps only counts
/// that should not exist (unused guides plus cross-library assignments);
/// its 95th percentile is the noise threshold, and working values at or
/// below it are masked as unreliable.
pub fn filter_grnas(
    df: &DataFrame,
    filter_out: Option<&[&str]>,
    stage: ScreenStage,
    cfg: &ScreenConfig,
) -> PolarsResult<DataFrame> {
    let filter_out: Vec<&str> = filter_out.unwrap_or(DEFAULT_FILTER_OUT).to_vec();
    let all_names = guide_names(df)?;

    // working matrix: unused guides removed entirely
    let keep: Vec<bool> = all_names
        .iter()
        .map(|n| !filter_out.contains(&n.as_str()))
        .collect();
    let mask = BooleanChunked::from_slice("keep".into(), &keep);
    let mut working = df.filter(&mask)?;
    let working_names = guide_names(&working)?;

    // reference matrix: everything a correct assignment would occupy is
    // masked, leaving only false assignments. Controls in actual use go
    // first; the unused (filter-out) guides keep their counts.
    let mut reference = df.clone();
    for column in sample_columns(&reference) {
        mask_guides(&mut reference, &column, &all_names, |n| {
            (n.contains("Essential") || n.contains("CTRL")) && !filter_out.contains(&n)
        })?;
    }

    // cross-library masking: the working matrix loses the opposite panel,
    // the reference keeps it (those counts are the noise distribution).
    for column in sample_columns(&working) {
        let Some(library) = SubLibrary::of_sample(&column) else {
            continue;
        };
        let opposite = library.opposite();
        mask_guides(&mut working, &column, &working_names, |n| {
            SubLibrary::of_guide(n) == Some(opposite)
        })?;
        mask_guides(&mut reference, &column, &all_names, |n| {
            SubLibrary::of_guide(n) == Some(library)
        })?;
    }

    // the essentials-only pool takes no further part in the analysis
    if working
        .get_column_names()
        .iter()
        .any(|c| c.as_str() == "plasmid_pool_ESS")
    {
        working = working.drop("plasmid_pool_ESS")?;
        reference = reference.drop("plasmid_pool_ESS")?;
    }

    let noise = defined_values(&reference)?;
    if noise.is_empty() {
        return Err(PolarsError::ComputeError(
            format!("{stage}: no false-assignment counts to derive a noise threshold from").into(),
        ));
    }
    let threshold = percentile(&noise, 95.0)?;
    info!(
        "{stage}: noise threshold {threshold:.2} from {} false-assignment counts",
        noise.len()
    );

    plot_noise_distribution(&working, &reference, threshold, stage, cfg)?;

    for column in sample_columns(&working) {
        mask_at_or_below(&mut working, &column, threshold)?;
    }
    Ok(working)
}

fn mask_guides(
    df: &mut DataFrame,
    column: &str,
    names: &[String],
    pred: impl Fn(&str) -> bool,
) -> PolarsResult<()> {
    let masked: Vec<Option<f64>> = df
        .column(column)?
        .f64()?
        .into_iter()
        .zip(names.iter())
        .map(|(v, name)| if pred(name) { None } else { v })
        .collect();
    df.replace(column, Series::new(column.into(), masked))?;
    Ok(())
}

fn mask_at_or_below(df: &mut DataFrame, column: &str, threshold: f64) -> PolarsResult<()> {
    let masked: Vec<Option<f64>> = df
        .column(column)?
        .f64()?
        .into_iter()
        .map(|v| v.filter(|x| *x > threshold))
        .collect();
    df.replace(column, Series::new(column.into(), masked))?;
    Ok(())
}

/// All non-missing values across the sample columns.
fn defined_values(df: &DataFrame) -> PolarsResult<Vec<f64>> {
    let mut out = Vec::new();
    for column in sample_columns(df) {
        out.extend(df.column(&column)?.f64()?.into_iter().flatten());
    }
    Ok(out)
}

/// Distribution of true vs false assignment counts with the noise
/// threshold marked.
fn plot_noise_distribution(
    working: &DataFrame,
    reference: &DataFrame,
    threshold: f64,
    stage: ScreenStage,
    cfg: &ScreenConfig,
) -> PolarsResult<()> {
    let log2p1 = |v: f64| (1.0 + v).log2();
    let true_vals: Vec<f64> = defined_values(working)?.into_iter().map(log2p1).collect();
    let false_vals: Vec<f64> = defined_values(reference)?.into_iter().map(log2p1).collect();
    if true_vals.is_empty() && false_vals.is_empty() {
        warn!("{stage}: nothing to plot for the noise distribution");
        return Ok(());
    }

    let lo = true_vals
        .iter()
        .chain(&false_vals)
        .cloned()
        .fold(f64::INFINITY, f64::min);
    let mut hi = true_vals
        .iter()
        .chain(&false_vals)
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max);
    if hi <= lo {
        hi = lo + 1.0;
    }
    let true_hist = histogram_density(&true_vals, (lo, hi), 50);
    let false_hist = histogram_density(&false_vals, (lo, hi), 50);
    let y_max = true_hist
        .iter()
        .chain(&false_hist)
        .map(|(_, d)| *d)
        .fold(0.0f64, f64::max)
        .max(1e-6)
        * 1.1;

    let path = cfg.results_path(&format!(
        "gRNA_counts.cell_distribution_noise.{}.svg",
        stage.noise_label()
    ));
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| polars_err(Box::new(e)))?;
    }

    let root = SVGBackend::new(&path, (800, 500)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| polars_err(Box::new(e)))?;
    let mut chart = ChartBuilder::on(&root)
        .caption(
            format!("gRNA assignment noise ({})", stage.noise_label()),
            ("sans-serif", 22),
        )
        .margin(15)
        .x_label_area_size(45)
        .y_label_area_size(55)
        .build_cartesian_2d(lo..hi, 0.0..y_max)
        .map_err(|e| polars_err(Box::new(e)))?;
    chart
        .configure_mesh()
        .x_desc("Number of cells assigned (log2)")
        .y_desc("Density")
        .draw()
        .map_err(|e| polars_err(Box::new(e)))?;

    let true_colour = RGBColor(1, 115, 178);
    chart
        .draw_series(LineSeries::new(true_hist, true_colour.stroke_width(2)))
        .map_err(|e| polars_err(Box::new(e)))?
        .label("True gRNAs")
        .legend(move |(x, y)| {
            PathElement::new(vec![(x, y), (x + 20, y)], true_colour.stroke_width(2))
        });
    let false_colour = RGBColor(222, 143, 5);
    chart
        .draw_series(LineSeries::new(false_hist, false_colour.stroke_width(2)))
        .map_err(|e| polars_err(Box::new(e)))?
        .label("False assignments")
        .legend(move |(x, y)| {
            PathElement::new(vec![(x, y), (x + 20, y)], false_colour.stroke_width(2))
        });

    let cut = log2p1(threshold);
    chart
        .draw_series(LineSeries::new(
            vec![(cut, 0.0), (cut, y_max)],
            BLACK.stroke_width(1),
        ))
        .map_err(|e| polars_err(Box::new(e)))?;
    chart
        .draw_series(std::iter::once(Text::new(
            format!("95th percentile = {threshold} cells"),
            (cut, y_max * 0.5),
            ("sans-serif", 14),
        )))
        .map_err(|e| polars_err(Box::new(e)))?;

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .position(SeriesLabelPosition::UpperRight)
        .draw()
        .map_err(|e| polars_err(Box::new(e)))?;
    root.present().map_err(|e| polars_err(Box::new(e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper_functions::column_values;
    use crate::models::GUIDE_COLUMN;
    use polars::df;

    fn test_cfg() -> (tempfile::TempDir, ScreenConfig) {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ScreenConfig::new(dir.path());
        (dir, cfg)
    }

    #[test]
    fn noise_threshold_from_excluded_guides() {
        // the worked example: one excluded guide with 50 cells sets the
        // threshold, so any other count <= 50 becomes missing
        let (_dir, cfg) = test_cfg();
        let df = df![
            GUIDE_COLUMN => &["CTRL001", "Essential_X_1", "Tcr_library_A_1", "Tcr_library_C_2", "Wnt_library_B_1"],
            "TCR_screen" => &[Some(50.0), Some(500.0), Some(400.0), Some(50.0), None]
        ]
        .unwrap();

        let out = filter_grnas(&df, Some(&["CTRL001"]), ScreenStage::CropScreen, &cfg).unwrap();
        let names = guide_names(&out).unwrap();
        assert!(!names.contains(&"CTRL001".to_string()));

        let values = column_values(&out, "TCR_screen").unwrap();
        let at = |g: &str| values[names.iter().position(|n| n == g).unwrap()];
        assert_eq!(at("Essential_X_1"), Some(500.0));
        assert_eq!(at("Tcr_library_A_1"), Some(400.0));
        assert_eq!(at("Tcr_library_C_2"), None); // 50 <= threshold 50
        assert_eq!(at("Wnt_library_B_1"), None); // opposite sub-library
    }

    #[test]
    fn never_unmasks_missing_input() {
        let (_dir, cfg) = test_cfg();
        let df = df![
            GUIDE_COLUMN => &["CTRL001", "Tcr_library_A_1", "Tcr_library_B_1"],
            "TCR_screen" => &[Some(10.0), None, Some(300.0)]
        ]
        .unwrap();
        let out = filter_grnas(&df, Some(&["CTRL001"]), ScreenStage::CropScreen, &cfg).unwrap();
        let names = guide_names(&out).unwrap();
        let values = column_values(&out, "TCR_screen").unwrap();
        let a = names.iter().position(|n| n == "Tcr_library_A_1").unwrap();
        assert_eq!(values[a], None);
    }

    #[test]
    fn sub_library_exclusivity_holds_after_filtering() {
        let (_dir, cfg) = test_cfg();
        let df = df![
            GUIDE_COLUMN => &["CTRL001", "Tcr_library_A_1", "Wnt_library_B_1"],
            "Jurkat_screen" => &[Some(5.0), Some(400.0), Some(350.0)],
            "HEK_screen" => &[Some(5.0), Some(380.0), Some(420.0)]
        ]
        .unwrap();
        let out = filter_grnas(&df, Some(&["CTRL001"]), ScreenStage::CropScreen, &cfg).unwrap();
        let names = guide_names(&out).unwrap();
        let jurkat = column_values(&out, "Jurkat_screen").unwrap();
        let hek = column_values(&out, "HEK_screen").unwrap();
        for (i, name) in names.iter().enumerate() {
            match SubLibrary::of_guide(name) {
                Some(SubLibrary::Wnt) => assert_eq!(jurkat[i], None),
                Some(SubLibrary::Tcr) => assert_eq!(hek[i], None),
                _ => {}
            }
        }
    }

    #[test]
    fn empty_noise_distribution_is_an_error() {
        let (_dir, cfg) = test_cfg();
        // no unused guides, no cross-library assignments: nothing to
        // derive a threshold from
        let df = df![
            GUIDE_COLUMN => &["Tcr_library_A_1", "Tcr_library_B_1"],
            "TCR_screen" => &[Some(100.0), Some(200.0)]
        ]
        .unwrap();
        assert!(filter_grnas(&df, Some(&[]), ScreenStage::CropScreen, &cfg).is_err());
    }

    #[test]
    fn drops_essentials_only_pool_column() {
        let (_dir, cfg) = test_cfg();
        let df = df![
            GUIDE_COLUMN => &["CTRL001", "Tcr_library_A_1"],
            "plasmid_pool_ESS" => &[Some(9.0), Some(10.0)],
            "plasmid_pool_TCR" => &[Some(3.0), Some(500.0)]
        ]
        .unwrap();
        let out = filter_grnas(&df, Some(&["CTRL001"]), ScreenStage::PreScreen, &cfg).unwrap();
        assert!(!out
            .get_column_names()
            .iter()
            .any(|c| c.as_str() == "plasmid_pool_ESS"));
    }
}
