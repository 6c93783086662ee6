use std::fs;
use std::path::Path;

use plotters::prelude::*;
use plotters_svg::SVGBackend;
use polars::prelude::*;
use tracing::warn;

use crate::helper_functions::colour_for_category;
use crate::models::{polars_err, GuideCategory};

pub mod comparison;
pub mod sensitivity;
pub mod stimulus;

/// Descending rank with ties broken by original row order (the "first"
/// method). Missing values get no rank.
pub(crate) fn rank_descending(values: &[Option<f64>]) -> Vec<Option<u32>> {
    let mut order: Vec<usize> = values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_some())
        .map(|(i, _)| i)
        .collect();
    // stable sort keeps earlier rows first among ties
    order.sort_by(|&a, &b| {
        values[b]
            .partial_cmp(&values[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut ranks = vec![None; values.len()];
    for (rank, &row) in order.iter().enumerate() {
        ranks[row] = Some(rank as u32 + 1);
    }
    ranks
}

pub(crate) fn padded_range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for v in values {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    if !lo.is_finite() || !hi.is_finite() {
        return None;
    }
    if hi <= lo {
        return Some((lo - 0.5, lo + 0.5));
    }
    let pad = (hi - lo) * 0.05;
    Some((lo - pad, hi + pad))
}

pub(crate) type PanelPoints = Vec<(f64, f64, GuideCategory)>;

/// One SVG with a panel per sample: category-coloured point clouds plus an
/// optional identity diagonal or horizontal zero line.
pub(crate) fn draw_point_grid(
    path: &Path,
    panels: &[(String, PanelPoints)],
    x_desc: &str,
    y_desc: &str,
    identity_line: bool,
    zero_line: bool,
) -> PolarsResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| polars_err(Box::new(e)))?;
    }
    let n = panels.len().max(1);
    let cols = n.min(2);
    let rows = (n + cols - 1) / cols;
    let root = SVGBackend::new(path, (450 * cols as u32, 380 * rows as u32)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| polars_err(Box::new(e)))?;
    let areas = root.split_evenly((rows, cols));

    for (area, (title, points)) in areas.iter().zip(panels) {
        if points.is_empty() {
            warn!("panel {title:?}: no points to draw");
            continue;
        }
        let Some((x_lo, x_hi)) = padded_range(points.iter().map(|p| p.0)) else {
            continue;
        };
        let Some((y_lo, y_hi)) = padded_range(points.iter().map(|p| p.1)) else {
            continue;
        };
        let (y_lo, y_hi) = if zero_line {
            (y_lo.min(0.0), y_hi.max(0.0))
        } else {
            (y_lo, y_hi)
        };

        let mut chart = ChartBuilder::on(area)
            .caption(title, ("sans-serif", 16))
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(50)
            .build_cartesian_2d(x_lo..x_hi, y_lo..y_hi)
            .map_err(|e| polars_err(Box::new(e)))?;
        chart
            .configure_mesh()
            .x_desc(x_desc)
            .y_desc(y_desc)
            .draw()
            .map_err(|e| polars_err(Box::new(e)))?;
        chart
            .draw_series(points.iter().map(|(x, y, category)| {
                Circle::new((*x, *y), 2, colour_for_category(*category).mix(0.5).filled())
            }))
            .map_err(|e| polars_err(Box::new(e)))?;

        if identity_line {
            let lo = x_lo.min(y_lo);
            let hi = x_hi.max(y_hi);
            chart
                .draw_series(LineSeries::new(
                    vec![(lo, lo), (hi, hi)],
                    BLACK.mix(0.75).stroke_width(1),
                ))
                .map_err(|e| polars_err(Box::new(e)))?;
        }
        if zero_line {
            chart
                .draw_series(LineSeries::new(
                    vec![(x_lo, 0.0), (x_hi, 0.0)],
                    BLACK.mix(0.75).stroke_width(1),
                ))
                .map_err(|e| polars_err(Box::new(e)))?;
        }
    }
    root.present().map_err(|e| polars_err(Box::new(e)))?;
    Ok(())
}
