// ========================================================================================
//
//                           Performance evaluation stage
//
// ========================================================================================
//
// Joins the score table to mutation status, histology and barcode annotations,
// computes discrimination metrics for observed and shuffled scores, and writes the
// metric, curve and distribution tables together with the SVG figures.

pub mod annotations;
pub mod metrics;
pub mod plots;
pub mod report;

use crate::config::PipelineConfig;
use crate::io::{OutputError, StagedOutputs, TableError, read_score_table};
use crate::pipeline::SCORES_FILE;
use annotations::{AnnotationError, LabeledCohort};
use plots::PlotError;
use report::EvaluationReport;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("Failed to read the score table. Run the apply stage first. {0}")]
    Scores(#[source] TableError),
    #[error(transparent)]
    Annotation(#[from] AnnotationError),
    #[error(transparent)]
    Plot(#[from] PlotError),
    #[error(transparent)]
    Output(#[from] OutputError),
}

/// Reads the persisted score table and joins every configured annotation onto it.
pub fn load_cohort(config: &PipelineConfig) -> Result<LabeledCohort, EvaluationError> {
    let path = config.results_path(SCORES_FILE);
    log::info!("Reading classifier scores from '{}'", path.display());
    let scores = read_score_table(&path).map_err(EvaluationError::Scores)?;
    Ok(LabeledCohort::from_config(&scores, config)?)
}

/// Runs the evaluation stage end to end. Every table and figure is staged first
/// and committed together, so a failure leaves none of them behind.
pub fn run_evaluation_stage(config: &PipelineConfig) -> Result<EvaluationReport, EvaluationError> {
    log::info!("--- Performance evaluation ---");
    let cohort = load_cohort(config)?;
    let report = report::build_report(&cohort);

    let mut outputs = StagedOutputs::new();
    outputs.stage(&config.results_path(report::METRICS_FILE), |out| {
        report.write_metrics(out)
    })?;
    outputs.stage(&config.results_path(report::ROC_FILE), |out| {
        report.write_roc_curves(out)
    })?;
    outputs.stage(&config.results_path(report::PR_FILE), |out| {
        report.write_pr_curves(out)
    })?;
    outputs.stage(&config.results_path(report::DISTRIBUTIONS_FILE), |out| {
        report.write_distributions(out)
    })?;
    outputs.stage(&config.results_path(report::LABELED_SCORES_FILE), |out| {
        cohort.write_labeled_scores(out)
    })?;

    let mut figures = vec![
        (plots::ROC_FIGURE.to_string(), plots::roc_figure(&report.classifiers)?),
        (plots::PR_FIGURE.to_string(), plots::pr_figure(&report.classifiers)?),
    ];
    for (i, (classifier, evaluation)) in cohort
        .classifiers
        .iter()
        .zip(&report.classifiers)
        .enumerate()
    {
        figures.push((
            format!("{}_predictions.svg", classifier.name),
            plots::predictions_figure(classifier, i, evaluation)?,
        ));
        match plots::histology_figure(&cohort, classifier)? {
            Some(svg) => {
                figures.push((format!("{}_predictions_histology.svg", classifier.name), svg))
            }
            None => log::info!(
                "No clinical table configured; skipping the histology figure for '{}'",
                classifier.name
            ),
        }
    }
    for (name, svg) in &figures {
        outputs.stage(&config.figures_path(name), |out| out.write_all(svg.as_bytes()))?;
    }

    for path in outputs.commit()? {
        log::info!("Wrote '{}'", path.display());
    }
    Ok(report)
}
