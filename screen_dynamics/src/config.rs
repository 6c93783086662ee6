use std::env;
use std::path::PathBuf;

/// Explicit configuration for one analysis run. Every stage receives this
/// struct instead of reaching for process-wide state.
#[derive(Debug, Clone)]
pub struct ScreenConfig {
    pub root_dir: PathBuf,
    pub results_dir: PathBuf,
    /// Directory holding the per-library `<name>_gRNA_count.tsv` files.
    pub counts_dir: PathBuf,
    /// Per-sample pipeline outputs (`<sample>/quantification/*.csv`).
    pub pipeline_dir: PathBuf,
    pub sample_annotation: PathBuf,
    pub guide_annotation: PathBuf,
    pub pre_screen_libraries: Vec<String>,
    pub mid_screen_libraries: Vec<String>,
}

impl ScreenConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root_dir: PathBuf = root.into();
        Self {
            results_dir: root_dir.join("results"),
            counts_dir: root_dir.join("gRNA_counts"),
            pipeline_dir: root_dir.join("results_pipeline"),
            sample_annotation: root_dir.join("metadata/annotation.csv"),
            guide_annotation: root_dir.join("metadata/guide_annotation.csv"),
            pre_screen_libraries: vec![
                "plasmid_pool_ESS".to_string(),
                "plasmid_pool_TCR".to_string(),
                "plasmid_pool_WNT".to_string(),
            ],
            mid_screen_libraries: vec![
                "gDNA_HEKclone4".to_string(),
                "gDNA_HEKclone6".to_string(),
                "gDNA_Jurkat".to_string(),
            ],
            root_dir,
        }
    }

    /// Root from `PROJECT_ROOT`, falling back to the current directory.
    pub fn from_env() -> Self {
        let root = match env::var_os("PROJECT_ROOT") {
            Some(val) => PathBuf::from(val),
            None => env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        };
        Self::new(root)
    }

    pub fn results_path(&self, file_name: &str) -> PathBuf {
        self.results_dir.join(file_name)
    }

    pub fn count_file(&self, library: &str) -> PathBuf {
        self.counts_dir.join(format!("{library}_gRNA_count.tsv"))
    }

    pub fn quantification_dir(&self, sample_name: &str) -> PathBuf {
        self.pipeline_dir.join(sample_name).join("quantification")
    }
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_derive_from_root() {
        let cfg = ScreenConfig::new("/data/crop-seq");
        assert_eq!(cfg.results_dir, PathBuf::from("/data/crop-seq/results"));
        assert_eq!(
            cfg.count_file("plasmid_pool_TCR"),
            PathBuf::from("/data/crop-seq/gRNA_counts/plasmid_pool_TCR_gRNA_count.tsv")
        );
        assert_eq!(
            cfg.quantification_dir("s1"),
            PathBuf::from("/data/crop-seq/results_pipeline/s1/quantification")
        );
        assert_eq!(cfg.pre_screen_libraries.len(), 3);
    }
}
