// ========================================================================================
//
//                         Classifier application stage
//
// ========================================================================================
//
// Loads the expression matrix and every configured classifier, aligns features,
// scales the cohort, and scores it twice: once on the observed values and once on
// a seeded column-permuted copy that serves as the chance baseline.

use crate::config::{PipelineConfig, Scaling, ScoringConfig};
use crate::data::{self, DataError, ExpressionMatrix, GeneMap};
use crate::io::{self, OutputError, StagedOutputs, TableError, format_float};
use crate::model::{ClassifierModel, ModelError};
use crate::prepare::{self, AlignedDesign, AlignmentError, AlignmentPolicy, FeatureOverlap};
use crate::types::{ClassifierScores, ScoreTable};
use itertools::Itertools;
use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;

pub const SCORES_FILE: &str = "classifier_scores.tsv";
pub const OVERLAP_FILE: &str = "feature_overlap.tsv";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to load the expression matrix: {0}")]
    Data(#[from] DataError),
    #[error("Failed to load the gene map: {0}")]
    GeneMap(#[source] TableError),
    #[error("Failed to load classifier '{classifier}': {source}")]
    Model {
        classifier: String,
        #[source]
        source: ModelError,
    },
    #[error(transparent)]
    Alignment(#[from] AlignmentError),
    #[error(transparent)]
    Output(#[from] OutputError),
}

/// Everything the apply stage produces.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub scores: ScoreTable,
    pub overlaps: Vec<FeatureOverlap>,
}

/// Scores a cohort with every classifier. Pure: reads nothing and writes nothing.
///
/// All classifiers are aligned before any scaling so an overlap failure aborts
/// the run without work wasted. The shuffled copy is drawn once from
/// `shuffle_seed` and shared by every classifier.
pub fn score_cohort(
    matrix: &ExpressionMatrix,
    classifiers: &[ClassifierModel],
    scoring: &ScoringConfig,
) -> Result<ApplyOutcome, PipelineError> {
    let policy = AlignmentPolicy::from(scoring);
    let designs: Vec<AlignedDesign> = classifiers
        .iter()
        .map(|model| prepare::align_features(model, matrix, policy))
        .collect::<Result<_, _>>()?;

    let mut observed = matrix.clone();
    match scoring.scaling {
        Scaling::ZScore => prepare::standardize(observed.values_mut()),
        Scaling::Raw => log::info!("Scaling disabled; scoring raw expression values"),
    }

    let mut shuffled = observed.clone();
    let mut rng = StdRng::seed_from_u64(scoring.shuffle_seed);
    prepare::shuffle_columns(shuffled.values_mut(), &mut rng);

    let mut scores = Vec::with_capacity(classifiers.len());
    let mut overlaps = Vec::with_capacity(classifiers.len());
    for (model, design) in classifiers.iter().zip(designs) {
        let predict = |m: &ExpressionMatrix| {
            model
                .predict(m.values(), design.weights.view())
                .map_err(|source| PipelineError::Model {
                    classifier: model.name.clone(),
                    source,
                })
        };
        scores.push(ClassifierScores {
            name: model.name.clone(),
            observed: predict(&observed)?.to_vec(),
            shuffled: predict(&shuffled)?.to_vec(),
        });
        overlaps.push(design.overlap);
    }

    Ok(ApplyOutcome {
        scores: ScoreTable {
            sample_ids: matrix.sample_ids().to_vec(),
            classifiers: scores,
        },
        overlaps,
    })
}

/// Loads the configured expression matrix, renaming genes through the gene map if one is set.
pub fn load_cohort_matrix(config: &PipelineConfig) -> Result<ExpressionMatrix, PipelineError> {
    let matrix = data::load_expression_matrix(&config.input.expression, config.input.orientation)?;
    match &config.input.gene_map {
        Some(path) => {
            let map = GeneMap::load(path).map_err(PipelineError::GeneMap)?;
            Ok(matrix.rename_genes(&map)?)
        }
        None => Ok(matrix),
    }
}

pub fn load_classifiers(config: &PipelineConfig) -> Result<Vec<ClassifierModel>, PipelineError> {
    config
        .classifiers
        .iter()
        .map(|c| {
            ClassifierModel::load(&c.name, &c.model).map_err(|source| PipelineError::Model {
                classifier: c.name.clone(),
                source,
            })
        })
        .collect()
}

/// Runs the apply stage end to end and writes its two result tables.
pub fn run_apply_stage(config: &PipelineConfig) -> Result<ApplyOutcome, PipelineError> {
    log::info!("--- Classifier application ---");
    let matrix = load_cohort_matrix(config)?;
    let classifiers = load_classifiers(config)?;
    let outcome = score_cohort(&matrix, &classifiers, &config.scoring)?;

    let scores_path = config.results_path(SCORES_FILE);
    let mut outputs = StagedOutputs::new();
    outputs.stage(&scores_path, |out| io::write_score_table(out, &outcome.scores))?;
    outputs.stage(&config.results_path(OVERLAP_FILE), |out| {
        write_overlap_table(out, &outcome.overlaps)
    })?;
    outputs.commit()?;
    log::info!(
        "Wrote {} samples x {} classifiers to '{}'",
        outcome.scores.num_samples(),
        outcome.scores.classifiers.len(),
        scores_path.display()
    );

    Ok(outcome)
}

fn write_overlap_table(
    out: &mut dyn std::io::Write,
    overlaps: &[FeatureOverlap],
) -> std::io::Result<()> {
    let header = ["classifier", "required", "found", "overlap", "missing"].map(String::from);
    let rows: Vec<Vec<String>> = overlaps
        .iter()
        .map(|o| {
            vec![
                o.classifier.clone(),
                o.required.to_string(),
                o.found.to_string(),
                format_float(o.fraction()),
                o.missing.iter().join(","),
            ]
        })
        .collect();
    io::write_tsv(out, &header, &rows)
}
