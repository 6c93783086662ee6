use polars::prelude::*;

use crate::config::ScreenConfig;
use crate::data_handling::pivot_library_counts;

/// Genomic DNA quantification (mid-screen stage).
pub struct MidScreenCounts {
    pub libraries: Vec<String>,
}

impl MidScreenCounts {
    pub fn from_config(cfg: &ScreenConfig) -> Self {
        Self {
            libraries: cfg.mid_screen_libraries.clone(),
        }
    }

    pub fn load(&self, cfg: &ScreenConfig) -> PolarsResult<DataFrame> {
        pivot_library_counts(cfg, &self.libraries)
    }
}
