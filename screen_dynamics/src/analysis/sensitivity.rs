use std::fs;

use plotters::prelude::*;
use plotters_svg::SVGBackend;
use polars::prelude::*;
use tracing::{error, info};

use crate::config::ScreenConfig;
use crate::helper_functions::{
    colour_for_category, column_values, guide_names, histogram_density, sample_columns,
};
use crate::models::{polars_err, GuideCategory, ScreenStage, SensitivityRecord};
use crate::stats::{mean, std_pop, std_sample};

/// Separation between positive- and negative-control count distributions:
/// `1 − 3·(σ_pos + σ_neg) / |μ_pos − μ_neg|`. Standard deviations are
/// population ones; the optional pre-normalization uses the sample
/// standard deviation, matching the original analysis exactly.
pub fn screen_zscore(ids: &[String], values: &[f64], z_score: bool) -> PolarsResult<f64> {
    if ids.len() != values.len() {
        return Err(PolarsError::ComputeError(
            "guide ids and values differ in length".into(),
        ));
    }
    let values: Vec<f64> = if z_score {
        let m = mean(values).ok_or_else(|| {
            PolarsError::ComputeError("cannot z-score an empty sample".into())
        })?;
        let s = std_sample(values).filter(|s| *s > 0.0).ok_or_else(|| {
            PolarsError::ComputeError("cannot z-score a constant sample".into())
        })?;
        values.iter().map(|v| (v - m) / s).collect()
    } else {
        values.to_vec()
    };

    let pos: Vec<f64> = ids
        .iter()
        .zip(&values)
        .filter(|(id, _)| id.contains("Essential"))
        .map(|(_, v)| *v)
        .collect();
    let neg: Vec<f64> = ids
        .iter()
        .zip(&values)
        .filter(|(id, _)| id.contains("CTRL"))
        .map(|(_, v)| *v)
        .collect();
    if pos.is_empty() || neg.is_empty() {
        return Err(PolarsError::ComputeError(
            format!(
                "control guides missing: {} positive, {} negative",
                pos.len(),
                neg.len()
            )
            .into(),
        ));
    }

    let separation = (mean(&pos).unwrap_or(f64::NAN) - mean(&neg).unwrap_or(f64::NAN)).abs();
    if !(separation > 0.0) {
        return Err(PolarsError::ComputeError(
            "no separation between control means; Z-score undefined".into(),
        ));
    }
    let spread = std_pop(&pos).unwrap_or(f64::NAN) + std_pop(&neg).unwrap_or(f64::NAN);
    Ok(1.0 - 3.0 * spread / separation)
}

struct ControlPanel {
    sample: String,
    pos: Vec<f64>,
    neg: Vec<f64>,
    z: f64,
}

/// Score every sample column of a stage matrix. A sample whose score
/// cannot be computed is logged and skipped; a partial score would be
/// meaningless downstream.
pub fn stage_sensitivity(
    df: &DataFrame,
    stage: ScreenStage,
    cfg: &ScreenConfig,
) -> PolarsResult<Vec<SensitivityRecord>> {
    let names = guide_names(df)?;
    let mut columns = sample_columns(df);
    columns.reverse();

    let mut records = Vec::new();
    let mut panels = Vec::new();
    for column in &columns {
        let values = column_values(df, column)?;
        let mut ids = Vec::new();
        let mut defined = Vec::new();
        for (name, value) in names.iter().zip(&values) {
            if let Some(v) = value {
                ids.push(name.clone());
                defined.push(*v);
            }
        }
        match screen_zscore(&ids, &defined, false) {
            Ok(z) => {
                records.push(SensitivityRecord::new(stage, column, z));
                panels.push(ControlPanel {
                    sample: column.clone(),
                    pos: control_values(&ids, &defined, "Essential"),
                    neg: control_values(&ids, &defined, "CTRL"),
                    z,
                });
            }
            Err(e) => error!("{stage}: skipping sample {column:?}: {e}"),
        }
    }

    if !panels.is_empty() {
        draw_control_distributions(&panels, stage, cfg)?;
    }
    info!("{stage}: scored {}/{} samples", records.len(), columns.len());
    Ok(records)
}

fn control_values(ids: &[String], values: &[f64], pattern: &str) -> Vec<f64> {
    ids.iter()
        .zip(values)
        .filter(|(id, _)| id.contains(pattern))
        .map(|(_, v)| *v)
        .collect()
}

fn draw_control_distributions(
    panels: &[ControlPanel],
    stage: ScreenStage,
    cfg: &ScreenConfig,
) -> PolarsResult<()> {
    let path = cfg.results_path(&format!(
        "gRNA_counts.screen_sensitivity.{}.svg",
        stage.label()
    ));
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| polars_err(Box::new(e)))?;
    }
    let n = panels.len().max(1);
    let cols = n.min(2);
    let rows = (n + cols - 1) / cols;
    let root = SVGBackend::new(&path, (450 * cols as u32, 380 * rows as u32)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| polars_err(Box::new(e)))?;
    let areas = root.split_evenly((rows, cols));

    for (area, panel) in areas.iter().zip(panels) {
        let lo = panel
            .pos
            .iter()
            .chain(&panel.neg)
            .cloned()
            .fold(f64::INFINITY, f64::min);
        let mut hi = panel
            .pos
            .iter()
            .chain(&panel.neg)
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
        if hi <= lo {
            hi = lo + 1.0;
        }
        let pos_hist = histogram_density(&panel.pos, (lo, hi), 30);
        let neg_hist = histogram_density(&panel.neg, (lo, hi), 30);
        let y_max = pos_hist
            .iter()
            .chain(&neg_hist)
            .map(|(_, d)| *d)
            .fold(0.0f64, f64::max)
            .max(1e-6)
            * 1.1;

        let mut chart = ChartBuilder::on(area)
            .caption(
                format!("{} {}", stage.label(), panel.sample),
                ("sans-serif", 16),
            )
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(50)
            .build_cartesian_2d(lo..hi, 0.0..y_max)
            .map_err(|e| polars_err(Box::new(e)))?;
        chart
            .configure_mesh()
            .x_desc("Number of cells assigned (log2)")
            .y_desc("Density")
            .draw()
            .map_err(|e| polars_err(Box::new(e)))?;

        let pos_colour = colour_for_category(GuideCategory::PositiveControl);
        chart
            .draw_series(LineSeries::new(pos_hist, pos_colour.stroke_width(2)))
            .map_err(|e| polars_err(Box::new(e)))?
            .label("positive controls")
            .legend(move |(x, y)| {
                PathElement::new(vec![(x, y), (x + 20, y)], pos_colour.stroke_width(2))
            });
        let neg_colour = colour_for_category(GuideCategory::NegativeControl);
        chart
            .draw_series(LineSeries::new(neg_hist, neg_colour.stroke_width(2)))
            .map_err(|e| polars_err(Box::new(e)))?
            .label(format!("negative controls; screen Z-score = {:.3}", panel.z))
            .legend(move |(x, y)| {
                PathElement::new(vec![(x, y), (x + 20, y)], neg_colour.stroke_width(2))
            });
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .position(SeriesLabelPosition::UpperRight)
            .draw()
            .map_err(|e| polars_err(Box::new(e)))?;
    }
    root.present().map_err(|e| polars_err(Box::new(e)))?;
    Ok(())
}

/// Summary CSV in scoring order plus the efficiency bar chart, bars
/// ranked by efficiency descending.
pub fn write_sensitivity_summary(
    records: &[SensitivityRecord],
    cfg: &ScreenConfig,
) -> PolarsResult<()> {
    let csv_path = cfg.results_path("gRNA_counts.screen_sensitivity.z_score.csv");
    if let Some(parent) = csv_path.parent() {
        fs::create_dir_all(parent).map_err(|e| polars_err(Box::new(e)))?;
    }
    let mut writer = csv::Writer::from_path(&csv_path).map_err(|e| polars_err(Box::new(e)))?;
    for record in records {
        writer
            .serialize(record)
            .map_err(|e| polars_err(Box::new(e)))?;
    }
    writer.flush().map_err(|e| polars_err(Box::new(e)))?;
    info!("sensitivity summary written to {}", csv_path.display());

    if records.is_empty() {
        return Ok(());
    }
    let mut sorted = records.to_vec();
    sorted.sort_by(|a, b| {
        b.efficiency
            .partial_cmp(&a.efficiency)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    draw_efficiency_barplot(&sorted, cfg)
}

fn draw_efficiency_barplot(sorted: &[SensitivityRecord], cfg: &ScreenConfig) -> PolarsResult<()> {
    let path = cfg.results_path("gRNA_counts.screen_sensitivity.barplot.svg");
    let n = sorted.len();
    let root = SVGBackend::new(&path, (800, 120 + 35 * n as u32)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| polars_err(Box::new(e)))?;

    let x_lo = sorted
        .iter()
        .map(|r| r.efficiency)
        .fold(0.0f64, f64::min)
        * 1.1
        - 1e-3;
    let x_hi = sorted
        .iter()
        .map(|r| r.efficiency)
        .fold(0.0f64, f64::max)
        * 1.1
        + 1e-3;

    let mut chart = ChartBuilder::on(&root)
        .caption("Screen sensitivity", ("sans-serif", 22))
        .margin(15)
        .x_label_area_size(45)
        .y_label_area_size(220)
        .build_cartesian_2d(x_lo..x_hi, 0.0..n as f64)
        .map_err(|e| polars_err(Box::new(e)))?;
    chart
        .configure_mesh()
        .disable_y_mesh()
        .y_labels(n)
        .y_label_formatter(&|v| {
            let idx = *v as usize;
            sorted
                .get(idx)
                .map(|r| r.id.clone())
                .unwrap_or_default()
        })
        .x_desc("Sensitivity (1 / Z score)")
        .draw()
        .map_err(|e| polars_err(Box::new(e)))?;

    let bar_colour = RGBColor(1, 115, 178);
    chart
        .draw_series(sorted.iter().enumerate().map(|(i, record)| {
            let y0 = i as f64 + 0.15;
            let y1 = i as f64 + 0.85;
            let (x0, x1) = if record.efficiency < 0.0 {
                (record.efficiency, 0.0)
            } else {
                (0.0, record.efficiency)
            };
            Rectangle::new([(x0, y0), (x1, y1)], bar_colour.filled())
        }))
        .map_err(|e| polars_err(Box::new(e)))?;
    root.present().map_err(|e| polars_err(Box::new(e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GUIDE_COLUMN;
    use polars::df;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn zscore_matches_hand_computation() {
        // pos = [10, 12]: mean 11, population std 1
        // neg = [1, 3]: mean 2, population std 1
        // z = 1 - 3*(1+1)/9 = 1/3
        let guides = ids(&["Essential_1", "Essential_2", "CTRL_1", "CTRL_2"]);
        let values = [10.0, 12.0, 1.0, 3.0];
        let z = screen_zscore(&guides, &values, false).unwrap();
        assert!((z - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn zscore_prenormalized_branch() {
        // the formula is invariant under the affine z-score transform, so
        // both branches land on the same documented value here
        let guides = ids(&["Essential_1", "Essential_2", "CTRL_1", "CTRL_2"]);
        let values = [10.0, 12.0, 1.0, 3.0];
        let z = screen_zscore(&guides, &values, true).unwrap();
        assert!((z - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn missing_controls_are_an_error() {
        let guides = ids(&["Essential_1", "Essential_2"]);
        assert!(screen_zscore(&guides, &[1.0, 2.0], false).is_err());
        let guides = ids(&["CTRL_1", "CTRL_2"]);
        assert!(screen_zscore(&guides, &[1.0, 2.0], false).is_err());
    }

    #[test]
    fn zero_separation_is_an_error() {
        let guides = ids(&["Essential_1", "CTRL_1"]);
        assert!(screen_zscore(&guides, &[5.0, 5.0], false).is_err());
    }

    #[test]
    fn failing_sample_is_skipped_not_zeroed() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ScreenConfig::new(dir.path());
        let df = df![
            GUIDE_COLUMN => &["Essential_1", "Essential_2", "CTRL_1", "CTRL_2"],
            // scoreable sample
            "good" => &[Some(10.0), Some(12.0), Some(1.0), Some(3.0)],
            // negative controls entirely filtered out
            "bad" => &[Some(10.0), Some(12.0), None, None]
        ]
        .unwrap();
        let records = stage_sensitivity(&df, ScreenStage::CropScreen, &cfg).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sample, "good");
        assert!((records[0].z_score - 1.0 / 3.0).abs() < 1e-12);
        assert!((records[0].efficiency + 3.0).abs() < 1e-12);
    }

    #[test]
    fn summary_csv_and_barplot_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ScreenConfig::new(dir.path());
        let records = vec![
            SensitivityRecord::new(ScreenStage::PreScreen, "a", -0.5), // efficiency 2.0
            SensitivityRecord::new(ScreenStage::CropScreen, "b", -2.0), // efficiency 0.5
        ];
        write_sensitivity_summary(&records, &cfg).unwrap();
        let text = std::fs::read_to_string(
            cfg.results_path("gRNA_counts.screen_sensitivity.z_score.csv"),
        )
        .unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "timepoint,sample,z_score,id,efficiency"
        );
        assert!(lines.next().unwrap().starts_with("original,a,"));
        assert!(cfg
            .results_path("gRNA_counts.screen_sensitivity.barplot.svg")
            .exists());
    }
}
