use polars::prelude::*;
use serde::Serialize;

/// Column holding the guide identifier in every count matrix.
pub const GUIDE_COLUMN: &str = "gRNA_name";

pub fn polars_err(e: Box<dyn std::error::Error>) -> PolarsError {
    PolarsError::ComputeError(format!("{e}").into())
}

// ─── Sub-libraries ───────────────────────────────────────────────────────────

/// The two mutually exclusive guide panels of the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubLibrary {
    Tcr,
    Wnt,
}

impl SubLibrary {
    /// Sub-library a guide belongs to, by its id.
    pub fn of_guide(id: &str) -> Option<Self> {
        if id.contains("Wnt") {
            Some(SubLibrary::Wnt)
        } else if id.contains("Tcr") {
            Some(SubLibrary::Tcr)
        } else {
            None
        }
    }

    /// Sub-library a sample/library column belongs to, by its name.
    /// TCR/Jurkat columns carry the Tcr panel, WNT/HEK columns the Wnt panel.
    pub fn of_sample(name: &str) -> Option<Self> {
        if name.contains("TCR") || name.contains("Jurkat") {
            Some(SubLibrary::Tcr)
        } else if name.contains("WNT") || name.contains("HEK") {
            Some(SubLibrary::Wnt)
        } else {
            None
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "TCR" => Some(SubLibrary::Tcr),
            "WNT" => Some(SubLibrary::Wnt),
            _ => None,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            SubLibrary::Tcr => SubLibrary::Wnt,
            SubLibrary::Wnt => SubLibrary::Tcr,
        }
    }

    /// Plasmid pool column acting as the pre-screen reference for this panel.
    pub fn plasmid_reference(self) -> &'static str {
        match self {
            SubLibrary::Tcr => "plasmid_pool_TCR",
            SubLibrary::Wnt => "plasmid_pool_WNT",
        }
    }
}

// ─── Guide classification ────────────────────────────────────────────────────

/// Ordered guide classification; the first matching pattern wins, so an id
/// matching several patterns always gets a single category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuideCategory {
    Wnt,
    NegativeControl,
    Tcr,
    PositiveControl,
    Other,
}

impl GuideCategory {
    pub fn classify(id: &str) -> Self {
        if id.contains("Wnt") {
            GuideCategory::Wnt
        } else if id.contains("CTRL") {
            GuideCategory::NegativeControl
        } else if id.contains("Tcr") {
            GuideCategory::Tcr
        } else if id.contains("Ess") {
            GuideCategory::PositiveControl
        } else {
            GuideCategory::Other
        }
    }
}

// ─── Experimental conditions ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Unstimulated,
    Stimulated,
}

impl Condition {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "stimulated" => Some(Condition::Stimulated),
            "unstimulated" => Some(Condition::Unstimulated),
            _ => None,
        }
    }
}

// ─── Screen stages ───────────────────────────────────────────────────────────

/// The three quantification stages of the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenStage {
    PreScreen,
    MidScreen,
    CropScreen,
}

impl ScreenStage {
    /// Stage label used in sensitivity records and comparison prefixes.
    pub fn label(self) -> &'static str {
        match self {
            ScreenStage::PreScreen => "original",
            ScreenStage::MidScreen => "mid_screen",
            ScreenStage::CropScreen => "crop_screen",
        }
    }

    /// Tag used in count-matrix file names.
    pub fn file_tag(self) -> &'static str {
        match self {
            ScreenStage::PreScreen => "pre_screen",
            ScreenStage::MidScreen => "mid_screen",
            ScreenStage::CropScreen => "screen",
        }
    }

    /// Tag used in noise-distribution plot file names.
    pub fn noise_label(self) -> &'static str {
        match self {
            ScreenStage::PreScreen => "plasmid",
            ScreenStage::MidScreen => "mid_screen",
            ScreenStage::CropScreen => "screen",
        }
    }
}

impl std::fmt::Display for ScreenStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ─── Sensitivity records ─────────────────────────────────────────────────────

/// One screen-quality measurement. Field order matches the summary CSV
/// layout: timepoint, sample, z_score, id, efficiency.
#[derive(Debug, Clone, Serialize)]
pub struct SensitivityRecord {
    pub timepoint: String,
    pub sample: String,
    pub z_score: f64,
    pub id: String,
    pub efficiency: f64,
}

impl SensitivityRecord {
    pub fn new(stage: ScreenStage, sample: &str, z_score: f64) -> Self {
        Self {
            timepoint: stage.label().to_string(),
            sample: sample.to_string(),
            z_score,
            id: format!("{} {}", stage.label(), sample),
            // Sign convention of the original analysis; do not "fix".
            efficiency: 1.0 / -z_score,
        }
    }
}
