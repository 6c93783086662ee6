use polars::prelude::*;

use crate::config::ScreenConfig;
use crate::data_handling::pivot_library_counts;

/// Plasmid pool quantification (pre-screen stage).
pub struct PreScreenCounts {
    pub libraries: Vec<String>,
}

impl PreScreenCounts {
    pub fn from_config(cfg: &ScreenConfig) -> Self {
        Self {
            libraries: cfg.pre_screen_libraries.clone(),
        }
    }

    pub fn load(&self, cfg: &ScreenConfig) -> PolarsResult<DataFrame> {
        pivot_library_counts(cfg, &self.libraries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper_functions::sample_columns;

    #[test]
    fn loads_configured_libraries() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = ScreenConfig::new(dir.path());
        cfg.counts_dir = dir.path().to_path_buf();
        cfg.pre_screen_libraries =
            vec!["plasmid_pool_TCR".to_string(), "plasmid_pool_WNT".to_string()];
        std::fs::write(
            cfg.count_file("plasmid_pool_TCR"),
            "gRNA_name\tcount\nTcr_library_LCK_1\t100\nCTRL00717\t3\n",
        )
        .unwrap();
        std::fs::write(
            cfg.count_file("plasmid_pool_WNT"),
            "gRNA_name\tcount\nWnt_library_CTNNB1_1\t80\nCTRL00717\t2\n",
        )
        .unwrap();

        let matrix = PreScreenCounts::from_config(&cfg).load(&cfg).unwrap();
        assert_eq!(matrix.height(), 3);
        assert_eq!(
            sample_columns(&matrix),
            vec!["plasmid_pool_TCR".to_string(), "plasmid_pool_WNT".to_string()]
        );
    }
}
