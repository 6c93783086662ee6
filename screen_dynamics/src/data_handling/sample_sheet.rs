use std::path::Path;

use polars::prelude::*;
use serde::Deserialize;
use tracing::warn;

use crate::models::{polars_err, Condition, SubLibrary};

/// Raw annotation row. Samples without a gRNA library are not part of the
/// screen and are skipped.
#[derive(Debug, Deserialize)]
struct SampleRow {
    sample_name: String,
    #[serde(default)]
    grna_library: Option<String>,
    #[serde(default)]
    condition: Option<String>,
    #[serde(default)]
    pair_id: Option<String>,
    #[serde(default)]
    gdna_reference: Option<String>,
}

/// One screen sample with its pairing metadata resolved. Condition pairing
/// comes from the annotation, never from column order.
#[derive(Debug, Clone)]
pub struct ScreenSample {
    pub name: String,
    pub sub_library: SubLibrary,
    pub condition: Option<Condition>,
    pub pair_id: Option<String>,
    /// Mid-screen (gDNA) column acting as this sample's reference.
    pub gdna_reference: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SampleSheet {
    samples: Vec<ScreenSample>,
}

impl SampleSheet {
    pub fn from_csv(path: &Path) -> PolarsResult<Self> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| polars_err(Box::new(e)))?;
        let mut samples = Vec::new();
        for row in reader.deserialize::<SampleRow>() {
            let row = row.map_err(|e| polars_err(Box::new(e)))?;
            let Some(library) = row.grna_library.as_deref().filter(|s| !s.is_empty()) else {
                continue;
            };
            let sub_library = SubLibrary::parse(library).ok_or_else(|| {
                PolarsError::ComputeError(
                    format!(
                        "sample {}: unknown gRNA library {library:?}",
                        row.sample_name
                    )
                    .into(),
                )
            })?;
            let condition = row
                .condition
                .as_deref()
                .filter(|s| !s.is_empty())
                .map(|c| {
                    Condition::parse(c).ok_or_else(|| {
                        PolarsError::ComputeError(
                            format!("sample {}: unknown condition {c:?}", row.sample_name).into(),
                        )
                    })
                })
                .transpose()?;
            samples.push(ScreenSample {
                name: row.sample_name,
                sub_library,
                condition,
                pair_id: row.pair_id.filter(|s| !s.is_empty()),
                gdna_reference: row.gdna_reference.filter(|s| !s.is_empty()),
            });
        }
        if samples.is_empty() {
            warn!("sample annotation {} lists no screen samples", path.display());
        }
        Ok(Self { samples })
    }

    pub fn screen_samples(&self) -> &[ScreenSample] {
        &self.samples
    }

    pub fn get(&self, name: &str) -> Option<&ScreenSample> {
        self.samples.iter().find(|s| s.name == name)
    }

    /// (unstimulated, stimulated) sample pairs sharing a pair id, in sheet
    /// order. Incomplete pairs are logged and skipped.
    pub fn condition_pairs(&self) -> Vec<(&ScreenSample, &ScreenSample)> {
        let mut pairs = Vec::new();
        let mut seen: Vec<&str> = Vec::new();
        for sample in &self.samples {
            let Some(pair_id) = sample.pair_id.as_deref() else {
                continue;
            };
            if seen.contains(&pair_id) {
                continue;
            }
            seen.push(pair_id);
            let mut unstimulated = None;
            let mut stimulated = None;
            for candidate in self.samples.iter().filter(|s| s.pair_id.as_deref() == Some(pair_id)) {
                match candidate.condition {
                    Some(Condition::Unstimulated) => unstimulated = Some(candidate),
                    Some(Condition::Stimulated) => stimulated = Some(candidate),
                    None => {}
                }
            }
            match (unstimulated, stimulated) {
                (Some(u), Some(s)) => pairs.push((u, s)),
                _ => warn!("pair {pair_id:?} lacks a stimulated/unstimulated counterpart; skipped"),
            }
        }
        pairs
    }
}
