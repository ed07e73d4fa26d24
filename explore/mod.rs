// ========================================================================================
//
//                             Variant exploration stage
//
// ========================================================================================
//
// Cross-references observed scores with variant annotations and tabulates the
// samples whose score disagrees with their mutation status, for human review.

pub mod outliers;

use crate::config::PipelineConfig;
use crate::evaluate::{self, EvaluationError};
use crate::io::{OutputError, StagedOutputs};
use outliers::{Outlier, OutlierPolicy, VariantSummaryRow};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExplorationError {
    #[error(transparent)]
    Cohort(#[from] EvaluationError),
    #[error(transparent)]
    Output(#[from] OutputError),
}

#[derive(Debug, Clone)]
pub struct ExplorationReport {
    pub outliers: Vec<Outlier>,
    pub variant_summary: Vec<VariantSummaryRow>,
}

/// Runs the exploration stage end to end.
pub fn run_exploration_stage(config: &PipelineConfig) -> Result<ExplorationReport, ExplorationError> {
    log::info!("--- Variant exploration ---");
    let cohort = evaluate::load_cohort(config)?;
    let policy = OutlierPolicy::from(&config.exploration);
    log::info!(
        "Outlier policy: wild-type with score >= {}, mutant with score < {}",
        policy.high_threshold,
        policy.low_threshold
    );

    let report = ExplorationReport {
        outliers: outliers::find_outliers(&cohort, &policy),
        variant_summary: outliers::summarize_variants(&cohort, &policy),
    };

    let outliers_path = config.results_path(outliers::OUTLIERS_FILE);
    let mut outputs = StagedOutputs::new();
    outputs.stage(&outliers_path, |out| {
        outliers::write_outliers(out, &report.outliers)
    })?;
    outputs.stage(&config.results_path(outliers::VARIANT_SUMMARY_FILE), |out| {
        outliers::write_variant_summary(out, &report.variant_summary)
    })?;
    outputs.commit()?;

    log::info!(
        "Wrote {} outliers to '{}'",
        report.outliers.len(),
        outliers_path.display()
    );
    Ok(report)
}
