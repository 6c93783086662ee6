use std::collections::HashSet;
use std::path::Path;

use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::config::ScreenConfig;
use crate::helper_functions::{guide_names, read_csv, read_tsv};
use crate::models::GUIDE_COLUMN;

pub mod crop_screen;
pub mod mid_screen;
pub mod pre_screen;
pub mod sample_sheet;

/// Read one `<library>_gRNA_count.tsv` per library and full-join the count
/// columns into a guide × library matrix.
pub(crate) fn pivot_library_counts(
    cfg: &ScreenConfig,
    libraries: &[String],
) -> PolarsResult<DataFrame> {
    let mut matrix: Option<DataFrame> = None;
    for library in libraries {
        let path = cfg.count_file(library);
        let counts = load_library_counts(&path, library)?;
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
    }
    matrix.ok_or_else(|| PolarsError::ComputeError("no count libraries configured".into()))
}

fn load_library_counts(path: &Path, library: &str) -> PolarsResult<DataFrame> {
    let df = read_tsv(path)?;
    let mut df = df.select([GUIDE_COLUMN, "count"])?;
    df.rename("count", library.into())?;
    let casted = df.column(library)?.cast(&DataType::Float64)?;
    df.with_column(casted)?;
    debug!("loaded {} guides from {}", df.height(), path.display());
    Ok(df)
}

/// Guide annotation table; used only as a sanity check on matrix contents.
pub fn load_guide_annotation(cfg: &ScreenConfig) -> PolarsResult<DataFrame> {
    let df = read_csv(&cfg.guide_annotation)?;
    info!("guide annotation: {} entries", df.height());
    Ok(df)
}

/// Warn about matrix guides that the annotation table does not know.
pub fn warn_unannotated_guides(matrix: &DataFrame, annotation: &DataFrame) -> PolarsResult<()> {
    let id_column = ["oligo_name", GUIDE_COLUMN]
        .into_iter()
        .find(|c| annotation.get_column_names().iter().any(|n| n.as_str() == *c));
    let Some(id_column) = id_column else {
        debug!("guide annotation has no recognizable id column; skipping check");
        return Ok(());
    };
    let known: HashSet<String> = annotation
        .column(id_column)?
        .str()?
        .into_iter()
        .flatten()
        .map(|s| s.to_string())
        .collect();
    let unknown = guide_names(matrix)?
        .into_iter()
        .filter(|g| !known.contains(g))
        .count();
    if unknown > 0 {
        warn!("{unknown} guides in the count matrix are absent from the annotation table");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pivots_libraries_into_matrix() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = ScreenConfig::new(dir.path());
        cfg.counts_dir = dir.path().to_path_buf();
        std::fs::write(
            cfg.count_file("libA"),
            "gRNA_name\tcount\ng1\t5\ng2\t7\n",
        )
        .unwrap();
        std::fs::write(
            cfg.count_file("libB"),
            "gRNA_name\tcount\ng2\t11\ng3\t13\n",
        )
        .unwrap();

        let libs = vec!["libA".to_string(), "libB".to_string()];
        let matrix = pivot_library_counts(&cfg, &libs).unwrap();
        assert_eq!(matrix.height(), 3);
        assert_eq!(matrix.width(), 3);

        let names = guide_names(&matrix).unwrap();
        let a = matrix.column("libA").unwrap().f64().unwrap();
        let b = matrix.column("libB").unwrap().f64().unwrap();
        let g3 = names.iter().position(|n| n == "g3").unwrap();
        assert_eq!(a.get(g3), None);
        assert_eq!(b.get(g3), Some(13.0));
        let g2 = names.iter().position(|n| n == "g2").unwrap();
        assert_eq!(a.get(g2), Some(7.0));
        assert_eq!(b.get(g2), Some(11.0));
    }

    #[test]
    fn missing_count_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ScreenConfig::new(dir.path());
        let libs = vec!["nope".to_string()];
        assert!(pivot_library_counts(&cfg, &libs).is_err());
    }
}
