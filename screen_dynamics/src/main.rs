use std::fs;

use anyhow::Result;
use polars::prelude::{DataFrame, PolarsResult};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::analysis::comparison::{compare_stages, ReferenceKind};
use crate::analysis::sensitivity::{stage_sensitivity, write_sensitivity_summary};
use crate::analysis::stimulus::rank_stimulus;
use crate::config::ScreenConfig;
use crate::data_handling::crop_screen::CropScreenCounts;
use crate::data_handling::mid_screen::MidScreenCounts;
use crate::data_handling::pre_screen::PreScreenCounts;
use crate::data_handling::sample_sheet::SampleSheet;
use crate::data_handling::{load_guide_annotation, warn_unannotated_guides};
use crate::filtering::filter_grnas;
use crate::helper_functions::dataframe_to_csv;
use crate::models::ScreenStage;
use crate::normalization::normalize_by_total;

mod analysis;
mod config;
mod data_handling;
mod filtering;
mod helper_functions;
mod models;
mod normalization;
mod stats;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    info!("Starting CROP-seq screen dynamics analysis");

    let cfg = ScreenConfig::from_env();
    fs::create_dir_all(&cfg.results_dir)?;

    let sheet = SampleSheet::from_csv(&cfg.sample_annotation)?;
    info!("{} screen samples annotated", sheet.screen_samples().len());
    let guide_annotation = load_guide_annotation(&cfg)?;

    // raw count matrices for the three quantification stages
    let pre_screen = PreScreenCounts::from_config(&cfg).load(&cfg)?;
    write_matrix(&pre_screen, ScreenStage::PreScreen, false, &cfg)?;
    let mid_screen = MidScreenCounts::from_config(&cfg).load(&cfg)?;
    write_matrix(&mid_screen, ScreenStage::MidScreen, false, &cfg)?;
    let screen = CropScreenCounts::load(&cfg, &sheet)?;
    write_matrix(&screen, ScreenStage::CropScreen, false, &cfg)?;
    for matrix in [&pre_screen, &mid_screen, &screen] {
        warn_unannotated_guides(matrix, &guide_annotation)?;
    }

    // drop unused guides and cross-library assignments, then everything
    // at or below the per-stage noise threshold
    let pre_screen = filter_grnas(&pre_screen, None, ScreenStage::PreScreen, &cfg)?;
    let mid_screen = filter_grnas(&mid_screen, None, ScreenStage::MidScreen, &cfg)?;
    let screen = filter_grnas(&screen, None, ScreenStage::CropScreen, &cfg)?;

    // rescale every sample to a common total
    let pre_screen = normalize_by_total(&pre_screen)?;
    write_matrix(&pre_screen, ScreenStage::PreScreen, true, &cfg)?;
    let mid_screen = normalize_by_total(&mid_screen)?;
    write_matrix(&mid_screen, ScreenStage::MidScreen, true, &cfg)?;
    let screen = normalize_by_total(&screen)?;
    write_matrix(&screen, ScreenStage::CropScreen, true, &cfg)?;

    // compare the screen against both earlier stages
    for (reference, stage, kind) in [
        (&pre_screen, ScreenStage::PreScreen, ReferenceKind::PlasmidPool),
        (&mid_screen, ScreenStage::MidScreen, ReferenceKind::GenomicDna),
    ] {
        let prefix = format!("{}-{}", stage.label(), ScreenStage::CropScreen.label());
        let fold_changes = compare_stages(reference, &screen, &sheet, kind, &prefix, &cfg)?;
        rank_stimulus(&fold_changes, &sheet, &prefix, &cfg)?;
    }

    // screen sensitivity across all stages
    let mut records = Vec::new();
    for (matrix, stage) in [
        (&pre_screen, ScreenStage::PreScreen),
        (&mid_screen, ScreenStage::MidScreen),
        (&screen, ScreenStage::CropScreen),
    ] {
        records.extend(stage_sensitivity(matrix, stage, &cfg)?);
    }
    write_sensitivity_summary(&records, &cfg)?;

    info!("analysis complete; outputs in {}", cfg.results_dir.display());
    Ok(())
}

fn write_matrix(
    df: &DataFrame,
    stage: ScreenStage,
    normalized: bool,
    cfg: &ScreenConfig,
) -> PolarsResult<()> {
    let name = if normalized {
        format!("gRNA_counts.{}.norm.csv", stage.file_tag())
    } else {
        format!("gRNA_counts.{}.csv", stage.file_tag())
    };
    let mut df = df.clone();
    dataframe_to_csv(&mut df, &cfg.results_path(&name))
}
