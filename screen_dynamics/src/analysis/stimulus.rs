use polars::prelude::*;
use tracing::{info, warn};

use crate::analysis::{draw_point_grid, rank_descending, PanelPoints};
use crate::config::ScreenConfig;
use crate::data_handling::sample_sheet::SampleSheet;
use crate::helper_functions::{column_values, dataframe_to_csv, guide_names};
use crate::models::{GuideCategory, GUIDE_COLUMN};

/// Per-guide fold-change difference between the stimulated and
/// unstimulated member of each annotated sample pair.
pub fn rank_stimulus(
    fold_changes: &DataFrame,
    sheet: &SampleSheet,
    prefix: &str,
    cfg: &ScreenConfig,
) -> PolarsResult<()> {
    let pairs = sheet.condition_pairs();
    if pairs.is_empty() {
        info!("{prefix}: no stimulated/unstimulated pairs annotated; skipping");
        return Ok(());
    }

    let names = guide_names(fold_changes)?;
    let mut table = DataFrame::new(vec![Column::from(Series::new(
        GUIDE_COLUMN.into(),
        names.clone(),
    ))])?;
    let mut panels: Vec<(String, PanelPoints)> = Vec::new();

    for (unstimulated, stimulated) in pairs {
        let present = |name: &str| {
            fold_changes
                .get_column_names()
                .iter()
                .any(|c| c.as_str() == name)
        };
        if !present(&stimulated.name) || !present(&unstimulated.name) {
            warn!(
                "pair {:?}: fold-changes missing for one condition; skipped",
                stimulated.pair_id
            );
            continue;
        }
        let stim = column_values(fold_changes, &stimulated.name)?;
        let unstim = column_values(fold_changes, &unstimulated.name)?;
        let diff: Vec<Option<f64>> = stim
            .iter()
            .zip(&unstim)
            .map(|(s, u)| match (s, u) {
                (Some(s), Some(u)) => Some(s - u),
                _ => None,
            })
            .collect();

        let ranks = rank_descending(&diff);
        let points: PanelPoints = ranks
            .iter()
            .zip(&diff)
            .zip(&names)
            .filter_map(|((rank, value), name)| {
                Some(((*rank)? as f64, (*value)?, GuideCategory::classify(name)))
            })
            .collect();

        // both samples carry the same pair id by construction
        let pair_id = stimulated.pair_id.as_deref().unwrap_or(&stimulated.name);
        table.with_column(Series::new(pair_id.into(), diff))?;
        panels.push((pair_id.to_string(), points));
    }

    if panels.is_empty() {
        warn!("{prefix}: no complete condition pairs with fold-changes");
        return Ok(());
    }

    draw_point_grid(
        &cfg.results_path(&format!("gRNA_counts.norm.{prefix}.rank.diff_condition.svg")),
        &panels,
        "gRNA rank (stimulated / unstimulated)",
        "gRNA fold-change (stimulated / unstimulated)",
        false,
        true,
    )?;
    dataframe_to_csv(
        &mut table,
        &cfg.results_path(&format!("gRNA_counts.norm.{prefix}.rank.diff_condition.csv")),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    fn sheet() -> SampleSheet {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("annotation.csv");
        std::fs::write(
            &path,
            "sample_name,grna_library,condition,pair_id,gdna_reference\n\
             TCR_unstim,TCR,unstimulated,TCR_pair,gDNA_Jurkat\n\
             TCR_stim,TCR,stimulated,TCR_pair,gDNA_Jurkat\n",
        )
        .unwrap();
        SampleSheet::from_csv(&path).unwrap()
    }

    #[test]
    fn difference_is_stimulated_minus_unstimulated() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ScreenConfig::new(dir.path());
        let fc = df![
            GUIDE_COLUMN => &["Tcr_library_A_1", "Tcr_library_B_1", "CTRL0001"],
            "TCR_unstim" => &[Some(1.0), Some(-1.0), None],
            "TCR_stim" => &[Some(2.5), Some(-2.0), Some(0.5)]
        ]
        .unwrap();

        rank_stimulus(&fc, &sheet(), "original-crop_screen", &cfg).unwrap();

        let out = crate::helper_functions::read_csv(
            &cfg.results_path("gRNA_counts.norm.original-crop_screen.rank.diff_condition.csv"),
        )
        .unwrap();
        let diff = column_values(&out, "TCR_pair").unwrap();
        assert!((diff[0].unwrap() - 1.5).abs() < 1e-12);
        assert!((diff[1].unwrap() + 1.0).abs() < 1e-12);
        // undefined on either side stays undefined
        assert_eq!(diff[2], None);
    }
}
