use polars::prelude::*;
use rand::seq::SliceRandom;
use rand::thread_rng;
use tracing::info;

use crate::analysis::{draw_point_grid, rank_descending, PanelPoints};
use crate::config::ScreenConfig;
use crate::data_handling::sample_sheet::SampleSheet;
use crate::helper_functions::{column_values, dataframe_to_csv, guide_names, sample_columns};
use crate::models::{GuideCategory, SubLibrary, GUIDE_COLUMN};

/// Which earlier stage a screen sample is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// Plasmid pool of the sample's sub-library (pre-screen).
    PlasmidPool,
    /// The sample's annotated gDNA column (mid-screen).
    GenomicDna,
}

struct SamplePanel {
    sample: String,
    scatter: PanelPoints, // log2(1+target) vs log2(1+reference)
    ma: PanelPoints,      // M vs fold-change
    rank: PanelPoints,    // rank vs fold-change
}

/// Compare every screen sample of `target` against `reference`, emitting
/// the scatter/MA/rank figures and the rank table. Returns the per-sample
/// fold-change table for downstream condition comparisons.
pub fn compare_stages(
    reference: &DataFrame,
    target: &DataFrame,
    sheet: &SampleSheet,
    kind: ReferenceKind,
    prefix: &str,
    cfg: &ScreenConfig,
) -> PolarsResult<DataFrame> {
    let joined = reference.join(
        target,
        [GUIDE_COLUMN],
        [GUIDE_COLUMN],
        JoinArgs::new(JoinType::Full).with_coalesce(JoinCoalesce::CoalesceColumns),
        None,
    )?;
    let names = guide_names(&joined)?;
    let mut fold_changes = DataFrame::new(vec![Column::from(Series::new(
        GUIDE_COLUMN.into(),
        names.clone(),
    ))])?;

    let mut columns = sample_columns(target);
    columns.reverse();

    let mut panels = Vec::with_capacity(columns.len());
    for column in &columns {
        let sample = sheet.get(column).ok_or_else(|| {
            PolarsError::ComputeError(
                format!("screen sample {column:?} is missing from the sample annotation").into(),
            )
        })?;
        let reference_column = match kind {
            ReferenceKind::PlasmidPool => sample.sub_library.plasmid_reference().to_string(),
            ReferenceKind::GenomicDna => sample.gdna_reference.clone().ok_or_else(|| {
                PolarsError::ComputeError(
                    format!("sample {column:?} has no gdna_reference in the annotation").into(),
                )
            })?,
        };
        let target_vals = column_values(&joined, column)?;
        let reference_vals = column_values(&joined, &reference_column)?;
        let opposite = sample.sub_library.opposite();

        let mut fc: Vec<Option<f64>> = vec![None; names.len()];
        let mut scatter = Vec::new();
        let mut ma = Vec::new();
        for i in 0..names.len() {
            if SubLibrary::of_guide(&names[i]) == Some(opposite) {
                continue;
            }
            let (Some(t), Some(r)) = (target_vals[i], reference_vals[i]) else {
                continue;
            };
            let log_target = (1.0 + t).log2();
            let log_reference = (1.0 + r).log2();
            let category = GuideCategory::classify(&names[i]);
            fc[i] = Some(log_target - log_reference);
            scatter.push((log_target, log_reference, category));
            if t * r > 0.0 {
                ma.push(((t * r).log2() / 2.0, log_target - log_reference, category));
            }
        }

        let ranks = rank_descending(&fc);
        let rank_points: PanelPoints = ranks
            .iter()
            .zip(&fc)
            .zip(&names)
            .filter_map(|((rank, value), name)| {
                Some((
                    (*rank)? as f64,
                    (*value)?,
                    GuideCategory::classify(name),
                ))
            })
            .collect();

        fold_changes.with_column(Series::new(column.as_str().into(), fc))?;
        panels.push(SamplePanel {
            sample: column.clone(),
            scatter,
            ma,
            rank: rank_points,
        });
    }

    // shuffle the draw order so dense categories do not bury the others
    let mut rng = thread_rng();
    for panel in &mut panels {
        panel.scatter.shuffle(&mut rng);
        panel.ma.shuffle(&mut rng);
    }

    let scatter: Vec<(String, PanelPoints)> = panels
        .iter()
        .map(|p| (p.sample.clone(), p.scatter.clone()))
        .collect();
    draw_point_grid(
        &cfg.results_path(&format!("gRNA_counts.norm.{prefix}.scatter.svg")),
        &scatter,
        "gRNA frequency in CROP-seq screen (log2)",
        "gRNA frequency in reference (log2)",
        true,
        false,
    )?;

    let ma: Vec<(String, PanelPoints)> = panels
        .iter()
        .map(|p| (p.sample.clone(), p.ma.clone()))
        .collect();
    draw_point_grid(
        &cfg.results_path(&format!("gRNA_counts.norm.{prefix}.maplot.svg")),
        &ma,
        "A (mean intensity)",
        "M (log2 fold-change)",
        false,
        true,
    )?;

    let rank: Vec<(String, PanelPoints)> = panels
        .iter()
        .map(|p| (p.sample.clone(), p.rank.clone()))
        .collect();
    draw_point_grid(
        &cfg.results_path(&format!("gRNA_counts.norm.{prefix}.rank.svg")),
        &rank,
        "gRNA rank",
        "gRNA fold-change",
        false,
        true,
    )?;

    let mut table = fold_changes.clone();
    dataframe_to_csv(
        &mut table,
        &cfg.results_path(&format!("gRNA_counts.norm.{prefix}.rank.csv")),
    )?;
    info!("{prefix}: compared {} samples", columns.len());
    Ok(fold_changes)
}
