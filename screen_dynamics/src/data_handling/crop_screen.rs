use polars::prelude::*;
use tracing::{debug, info};

use crate::config::ScreenConfig;
use crate::data_handling::sample_sheet::SampleSheet;
use crate::helper_functions::{dataframe_to_csv, read_csv, sample_columns};
use crate::models::GUIDE_COLUMN;

/// Single-cell assignment derived quantification (in-screen stage).
///
/// Merges each sample's quantification/scores/assignment tables, writes the
/// combined tables, and pivots assignment counts into a guide × sample
/// matrix. Cells without any assignment for a guide count as 0.
pub struct CropScreenCounts;

impl CropScreenCounts {
    pub fn load(cfg: &ScreenConfig, sheet: &SampleSheet) -> PolarsResult<DataFrame> {
        let mut reads_all: Option<DataFrame> = None;
        let mut scores_all: Option<DataFrame> = None;
        let mut assignment_all: Option<DataFrame> = None;
        let mut matrix: Option<DataFrame> = None;

        for sample in sheet.screen_samples() {
            let dir = cfg.quantification_dir(&sample.name);
            let mut reads = read_csv(&dir.join("guide_cell_quantification.csv"))?;
            let mut scores = read_csv(&dir.join("guide_cell_scores.csv"))?;
            let mut assignment = read_csv(&dir.join("guide_cell_assignment.csv"))?;
            tag_sample(&mut reads, &sample.name)?;
            tag_sample(&mut scores, &sample.name)?;
            tag_sample(&mut assignment, &sample.name)?;
            debug!(
                "sample {}: {} assigned cells",
                sample.name,
                assignment.height()
            );

            // cells per guide for this sample
            let mut counts = assignment
                .clone()
                .lazy()
                .group_by([col("assignment")])
                .agg([len().cast(DataType::Float64).alias(sample.name.as_str())])
                .collect()?;
            counts.rename("assignment", GUIDE_COLUMN.into())?;

            matrix = Some(match matrix {
                None => counts,
                Some(acc) => acc.join(
                    &counts,
                    [GUIDE_COLUMN],
                    [GUIDE_COLUMN],
                    JoinArgs::new(JoinType::Full).with_coalesce(JoinCoalesce::CoalesceColumns),
                    None,
                )?,
            });

            append(&mut reads_all, reads)?;
            append(&mut scores_all, scores)?;
            append(&mut assignment_all, assignment)?;
        }

        let mut matrix = matrix.ok_or_else(|| {
            PolarsError::ComputeError("sample annotation lists no screen samples".into())
        })?;

        write_merged(cfg, "guide_cell_quantification.all.csv", reads_all)?;
        write_merged(cfg, "guide_cell_scores.all.csv", scores_all)?;
        write_merged(cfg, "guide_cell_assignment.all.csv", assignment_all)?;

        // a guide seen in one sample but not another was assigned 0 cells there
        for column in sample_columns(&matrix) {
            let filled = matrix
                .column(&column)?
                .as_materialized_series()
                .fill_null(FillNullStrategy::Zero)?;
            matrix.with_column(filled)?;
        }
        info!(
            "screen counts: {} guides x {} samples",
            matrix.height(),
            matrix.width() - 1
        );
        Ok(matrix)
    }
}

fn tag_sample(df: &mut DataFrame, name: &str) -> PolarsResult<()> {
    let n = df.height();
    df.with_column(Series::new("sample".into(), vec![name.to_string(); n]))?;
    df.with_column(Series::new("experiment".into(), vec![name.to_string(); n]))?;
    Ok(())
}

fn append(acc: &mut Option<DataFrame>, df: DataFrame) -> PolarsResult<()> {
    match acc {
        None => *acc = Some(df),
        Some(existing) => {
            existing.vstack_mut(&df)?;
        }
    }
    Ok(())
}

fn write_merged(cfg: &ScreenConfig, name: &str, df: Option<DataFrame>) -> PolarsResult<()> {
    if let Some(mut df) = df {
        dataframe_to_csv(&mut df, &cfg.results_path(name))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper_functions::{column_values, guide_names};

    fn write_sample(cfg: &ScreenConfig, sample: &str, assignments: &[&str]) {
        let dir = cfg.quantification_dir(sample);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("guide_cell_quantification.csv"),
            "cell,gRNA,reads\nc1,g,1\n",
        )
        .unwrap();
        std::fs::write(dir.join("guide_cell_scores.csv"), "cell,score\nc1,0.9\n").unwrap();
        let mut body = String::from("cell,assignment\n");
        for (i, guide) in assignments.iter().enumerate() {
            body.push_str(&format!("c{i},{guide}\n"));
        }
        std::fs::write(dir.join("guide_cell_assignment.csv"), body).unwrap();
    }

    #[test]
    fn counts_assignments_and_fills_zero() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ScreenConfig::new(dir.path());
        write_sample(&cfg, "s1_TCR", &["Tcr_library_LCK_1", "Tcr_library_LCK_1", "CTRL0001"]);
        write_sample(&cfg, "s2_WNT", &["Wnt_library_CTNNB1_1"]);
        let sheet_path = dir.path().join("annotation.csv");
        std::fs::write(
            &sheet_path,
            "sample_name,grna_library,condition,pair_id,gdna_reference\n\
             s1_TCR,TCR,,,\ns2_WNT,WNT,,,\n",
        )
        .unwrap();
        let sheet = SampleSheet::from_csv(&sheet_path).unwrap();

        let matrix = CropScreenCounts::load(&cfg, &sheet).unwrap();
        let names = guide_names(&matrix).unwrap();
        let s1 = column_values(&matrix, "s1_TCR").unwrap();
        let s2 = column_values(&matrix, "s2_WNT").unwrap();

        let lck = names.iter().position(|n| n == "Tcr_library_LCK_1").unwrap();
        assert_eq!(s1[lck], Some(2.0));
        assert_eq!(s2[lck], Some(0.0));
        let wnt = names.iter().position(|n| n == "Wnt_library_CTNNB1_1").unwrap();
        assert_eq!(s1[wnt], Some(0.0));
        assert_eq!(s2[wnt], Some(1.0));

        // merged tables are written next to the matrix outputs
        assert!(cfg.results_path("guide_cell_assignment.all.csv").exists());
        assert!(cfg.results_path("guide_cell_scores.all.csv").exists());
    }
}
