//! Feature alignment and cohort-level transforms applied before scoring.
//!
//! Every classifier is mapped onto the matrix's gene columns once. The result is
//! a weight vector as wide as the matrix, with zeros for genes the classifier
//! does not use, so scoring is a single matrix-vector product.

use crate::config::{MissingFeaturePolicy, ScoringConfig};
use crate::data::ExpressionMatrix;
use crate::model::ClassifierModel;
use itertools::Itertools;
use ndarray::{Array1, ArrayViewMut2, Axis};
use rand::Rng;
use rand::seq::SliceRandom;
use thiserror::Error;

/// How many missing genes an overlap error lists before truncating.
const MISSING_PREVIEW: usize = 5;

/// The explicit contract for classifier features absent from the matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignmentPolicy {
    pub min_overlap: f64,
    pub missing: MissingFeaturePolicy,
}

impl From<&ScoringConfig> for AlignmentPolicy {
    fn from(config: &ScoringConfig) -> Self {
        Self {
            min_overlap: config.min_feature_overlap,
            missing: config.missing_features,
        }
    }
}

/// How much of a classifier's feature set the matrix measures.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureOverlap {
    pub classifier: String,
    pub required: usize,
    pub found: usize,
    /// Missing features in lexicographic order.
    pub missing: Vec<String>,
}

impl FeatureOverlap {
    pub fn fraction(&self) -> f64 {
        if self.required == 0 {
            0.0
        } else {
            self.found as f64 / self.required as f64
        }
    }
}

/// A classifier's weights laid out over the matrix's gene columns.
#[derive(Debug, Clone)]
pub struct AlignedDesign {
    pub weights: Array1<f64>,
    pub overlap: FeatureOverlap,
}

#[derive(Error, Debug)]
pub enum AlignmentError {
    #[error("Classifier '{0}' has no features to align.")]
    EmptyClassifier(String),
    #[error(
        "Classifier '{classifier}' matched only {found} of {required} features ({fraction:.3}), below the required overlap of {min_overlap}. Missing genes include: {preview}"
    )]
    InsufficientOverlap {
        classifier: String,
        found: usize,
        required: usize,
        fraction: f64,
        min_overlap: f64,
        preview: String,
    },
    #[error(
        "Classifier '{classifier}' is missing {count} features and missing_features = \"fail\". Missing genes include: {preview}"
    )]
    MissingFeatures {
        classifier: String,
        count: usize,
        preview: String,
    },
}

fn preview(missing: &[String]) -> String {
    let shown = missing.iter().take(MISSING_PREVIEW).join(", ");
    if missing.len() > MISSING_PREVIEW {
        format!("{shown}, ... ({} more)", missing.len() - MISSING_PREVIEW)
    } else {
        shown
    }
}

/// Maps each classifier feature to a matrix column and enforces the overlap contract.
pub fn align_features(
    model: &ClassifierModel,
    matrix: &ExpressionMatrix,
    policy: AlignmentPolicy,
) -> Result<AlignedDesign, AlignmentError> {
    let required = model.coefficients.len();
    if required == 0 {
        return Err(AlignmentError::EmptyClassifier(model.name.clone()));
    }

    let mut weights = Array1::zeros(matrix.num_genes());
    let mut missing = Vec::new();
    for (feature, &weight) in &model.coefficients {
        match matrix.gene_column(feature) {
            Some(column) => weights[column] = weight,
            None => missing.push(feature.clone()),
        }
    }

    let overlap = FeatureOverlap {
        classifier: model.name.clone(),
        required,
        found: required - missing.len(),
        missing,
    };

    let fraction = overlap.fraction();
    if fraction < policy.min_overlap {
        return Err(AlignmentError::InsufficientOverlap {
            classifier: overlap.classifier,
            found: overlap.found,
            required,
            fraction,
            min_overlap: policy.min_overlap,
            preview: preview(&overlap.missing),
        });
    }
    if !overlap.missing.is_empty() {
        match policy.missing {
            MissingFeaturePolicy::Fail => {
                return Err(AlignmentError::MissingFeatures {
                    classifier: overlap.classifier,
                    count: overlap.missing.len(),
                    preview: preview(&overlap.missing),
                });
            }
            MissingFeaturePolicy::ZeroFill => log::warn!(
                "Classifier '{}': {} of {} features missing from the matrix; they contribute 0",
                overlap.classifier,
                overlap.missing.len(),
                required
            ),
        }
    }

    log::info!(
        "Classifier '{}': {}/{} features found (overlap {:.3})",
        overlap.classifier,
        overlap.found,
        required,
        fraction
    );
    Ok(AlignedDesign { weights, overlap })
}

/// Z-scores every gene column in place using the population standard deviation.
/// Zero-variance genes are centered only.
pub fn standardize(mut values: ArrayViewMut2<f64>) {
    let Some(means) = values.mean_axis(Axis(0)) else {
        return;
    };
    let sds = values.std_axis(Axis(0), 0.0);
    let mut constant_genes = 0usize;
    for ((mut column, &mean), &sd) in values.columns_mut().into_iter().zip(&means).zip(&sds) {
        if sd <= 1e-12 * (1.0 + mean.abs()) {
            constant_genes += 1;
            column.mapv_inplace(|v| v - mean);
        } else {
            column.mapv_inplace(|v| (v - mean) / sd);
        }
    }
    if constant_genes > 0 {
        log::debug!("{constant_genes} genes have zero variance and were only centered");
    }
}

/// Independently permutes every gene column across samples.
pub fn shuffle_columns<R: Rng + ?Sized>(mut values: ArrayViewMut2<f64>, rng: &mut R) {
    for mut column in values.columns_mut() {
        let mut buffer = column.to_vec();
        buffer.shuffle(rng);
        for (slot, value) in column.iter_mut().zip(buffer) {
            *slot = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LinkFunction;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::BTreeMap;

    fn matrix() -> ExpressionMatrix {
        ExpressionMatrix::new(
            vec!["S1".into(), "S2".into(), "S3".into()],
            vec!["A".into(), "B".into(), "C".into(), "D".into()],
            Array2::from_shape_vec(
                (3, 4),
                vec![1.0, 2.0, 5.0, 0.0, 2.0, 4.0, 5.0, 1.0, 3.0, 6.0, 5.0, 2.0],
            )
            .unwrap(),
        )
        .unwrap()
    }

    fn model(features: &[(&str, f64)]) -> ClassifierModel {
        ClassifierModel {
            name: "ras".into(),
            link_function: LinkFunction::Logit,
            intercept: 0.0,
            coefficients: features
                .iter()
                .map(|(g, w)| (g.to_string(), *w))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn zero_fill(min_overlap: f64) -> AlignmentPolicy {
        AlignmentPolicy {
            min_overlap,
            missing: MissingFeaturePolicy::ZeroFill,
        }
    }

    #[test]
    fn full_overlap_places_weights_on_matching_columns() {
        let aligned =
            align_features(&model(&[("B", 2.0), ("D", -1.0)]), &matrix(), zero_fill(0.75))
                .unwrap();
        assert_eq!(aligned.weights, array![0.0, 2.0, 0.0, -1.0]);
        assert_eq!(aligned.overlap.found, 2);
        assert_abs_diff_eq!(aligned.overlap.fraction(), 1.0);
    }

    #[test]
    fn zero_fill_accepts_partial_overlap_above_threshold() {
        let m = model(&[("A", 1.0), ("B", 1.0), ("C", 1.0), ("Z", 1.0)]);
        let aligned = align_features(&m, &matrix(), zero_fill(0.75)).unwrap();
        assert_eq!(aligned.overlap.missing, vec!["Z".to_string()]);
        assert_abs_diff_eq!(aligned.overlap.fraction(), 0.75);
    }

    #[test]
    fn overlap_below_threshold_names_missing_genes() {
        let m = model(&[("A", 1.0), ("X", 1.0), ("Y", 1.0)]);
        match align_features(&m, &matrix(), zero_fill(0.75)) {
            Err(AlignmentError::InsufficientOverlap {
                classifier,
                found,
                required,
                preview,
                ..
            }) => {
                assert_eq!(classifier, "ras");
                assert_eq!((found, required), (1, 3));
                assert_eq!(preview, "X, Y");
            }
            other => panic!("Expected InsufficientOverlap, got {other:?}"),
        }
    }

    #[test]
    fn fail_policy_rejects_any_missing_feature() {
        let m = model(&[("A", 1.0), ("B", 1.0), ("C", 1.0), ("Z", 1.0)]);
        let policy = AlignmentPolicy {
            min_overlap: 0.5,
            missing: MissingFeaturePolicy::Fail,
        };
        assert!(matches!(
            align_features(&m, &matrix(), policy),
            Err(AlignmentError::MissingFeatures { count: 1, .. })
        ));
    }

    #[test]
    fn empty_classifier_is_an_error() {
        assert!(matches!(
            align_features(&model(&[]), &matrix(), zero_fill(0.0)),
            Err(AlignmentError::EmptyClassifier(_))
        ));
    }

    #[test]
    fn preview_truncates_long_lists() {
        let missing: Vec<String> = (1..=7).map(|i| format!("G{i}")).collect();
        assert_eq!(preview(&missing), "G1, G2, G3, G4, G5, ... (2 more)");
    }

    #[test]
    fn standardize_uses_population_sd_and_centers_constant_genes() {
        let mut m = matrix();
        standardize(m.values_mut());
        let values = m.values();
        // Column A = [1, 2, 3]: mean 2, population SD sqrt(2/3).
        let sd = (2.0f64 / 3.0).sqrt();
        assert_abs_diff_eq!(values[[0, 0]], -1.0 / sd, epsilon = 1e-12);
        assert_abs_diff_eq!(values[[2, 0]], 1.0 / sd, epsilon = 1e-12);
        for i in 0..3 {
            assert_abs_diff_eq!(values[[i, 2]], 0.0);
        }
        for column in values.columns() {
            assert_abs_diff_eq!(column.sum(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn shuffle_permutes_within_columns_and_is_seeded() {
        let mut first = matrix();
        let mut second = matrix();
        shuffle_columns(first.values_mut(), &mut StdRng::seed_from_u64(7));
        shuffle_columns(second.values_mut(), &mut StdRng::seed_from_u64(7));
        assert_eq!(first.values(), second.values());

        let original = matrix();
        for (shuffled, source) in first.values().columns().into_iter().zip(original.values().columns()) {
            let mut a = shuffled.to_vec();
            let mut b = source.to_vec();
            a.sort_by(f64::total_cmp);
            b.sort_by(f64::total_cmp);
            assert_eq!(a, b);
        }
    }
}
