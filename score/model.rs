use crate::io::{TableError, TsvTable};
use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

// --- Public Data Structures ---
// These structs define the public, human-readable format of a pretrained
// classifier when serialized to a TOML file.

/// Defines the link function, connecting the linear predictor to the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LinkFunction {
    /// The logit link: scores are probabilities in (0, 1).
    #[default]
    Logit,
    /// The identity link: scores are the raw decision function.
    Identity,
}

impl LinkFunction {
    /// Maps linear predictors onto the score scale.
    pub fn inverse(self, eta: Array1<f64>) -> Array1<f64> {
        match self {
            LinkFunction::Logit => {
                // Clamp eta to prevent numerical overflow in exp()
                let mut probs = eta.mapv(|e| 1.0 / (1.0 + f64::exp(-e.clamp(-700.0, 700.0))));
                probs.mapv_inplace(|p| p.clamp(1e-8, 1.0 - 1e-8));
                probs
            }
            LinkFunction::Identity => eta,
        }
    }
}

/// A pretrained linear classifier. Immutable once loaded; never refit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierModel {
    pub name: String,
    #[serde(default)]
    pub link_function: LinkFunction,
    #[serde(default)]
    pub intercept: f64,
    /// Gene identifier to weight. Only non-zero weights are retained.
    pub coefficients: BTreeMap<String, f64>,
}

/// Custom error type for classifier loading, saving, and prediction.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write classifier file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML classifier file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize classifier to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Failed to read coefficient table: {0}")]
    Table(#[from] TableError),
    #[error("Classifier '{classifier}' lists feature '{feature}' more than once.")]
    DuplicateFeature { classifier: String, feature: String },
    #[error("Classifier '{classifier}' defines its intercept more than once.")]
    DuplicateIntercept { classifier: String },
    #[error("Classifier '{classifier}' has a non-finite coefficient for '{feature}'.")]
    NonFiniteCoefficient { classifier: String, feature: String },
    #[error("Classifier '{0}' has no non-zero coefficients.")]
    NoCoefficients(String),
    #[error(
        "Prediction data has {found} feature columns, but the weight vector has {expected} entries."
    )]
    MismatchedFeatureCount { found: usize, expected: usize },
}

impl ClassifierModel {
    /// Loads a classifier from disk. Files ending in `.toml` are read as model
    /// artifacts; anything else is a tab-delimited coefficient table. The
    /// configured `name` always wins over any name stored in the artifact.
    pub fn load(name: &str, path: &Path) -> Result<Self, ModelError> {
        let is_toml = path.extension().is_some_and(|ext| ext == "toml");
        let mut model = if is_toml {
            Self::load_toml(path)?
        } else {
            Self::load_coefficient_table(name, path)?
        };
        if model.name != name {
            log::debug!(
                "Classifier artifact '{}' is named '{}'; using configured name '{}'",
                path.display(),
                model.name,
                name
            );
            model.name = name.to_string();
        }
        model.validate()?;
        log::info!(
            "Loaded classifier '{}' from '{}': {} non-zero features, intercept {}",
            model.name,
            path.display(),
            model.coefficients.len(),
            model.intercept
        );
        Ok(model)
    }

    /// Loads a classifier from a TOML file.
    pub fn load_toml(path: &Path) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let mut model: Self = toml::from_str(&toml_string)?;
        model.coefficients.retain(|_, w| *w != 0.0);
        Ok(model)
    }

    /// Saves the classifier to a file in a human-readable TOML format.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Reads a `feature`/`weight` table. A row named `intercept` or
    /// `(intercept)` (any case) holds the bias; without one the bias is zero.
    /// Zero weights cannot influence a score and are dropped.
    pub fn load_coefficient_table(name: &str, path: &Path) -> Result<Self, ModelError> {
        let table = TsvTable::read(path)?;
        table.ensure_not_empty()?;
        let feature_col = table.column_index("feature")?;
        let weight_col = table.column_index("weight")?;

        let mut intercept = None;
        let mut coefficients = BTreeMap::new();
        let mut dropped = 0usize;
        for (row, record) in table.records.iter().enumerate() {
            let feature = table.text(record, feature_col);
            let weight = table.number(record, weight_col, row)?;

            if is_intercept_label(feature) {
                if intercept.replace(weight).is_some() {
                    return Err(ModelError::DuplicateIntercept {
                        classifier: name.to_string(),
                    });
                }
                continue;
            }
            if coefficients.contains_key(feature) {
                return Err(ModelError::DuplicateFeature {
                    classifier: name.to_string(),
                    feature: feature.to_string(),
                });
            }
            // Zero weights stay in the map until the end so later duplicates are caught.
            if weight == 0.0 {
                dropped += 1;
            }
            coefficients.insert(feature.to_string(), weight);
        }
        coefficients.retain(|_, w| *w != 0.0);

        if dropped > 0 {
            log::debug!("Classifier '{name}': dropped {dropped} zero-weight features");
        }
        let intercept = intercept.unwrap_or_else(|| {
            log::warn!(
                "Coefficient table '{}' has no intercept row; using an intercept of 0",
                path.display()
            );
            0.0
        });

        Ok(Self {
            name: name.to_string(),
            link_function: LinkFunction::Logit,
            intercept,
            coefficients,
        })
    }

    fn validate(&self) -> Result<(), ModelError> {
        if !self.intercept.is_finite() {
            return Err(ModelError::NonFiniteCoefficient {
                classifier: self.name.clone(),
                feature: "intercept".to_string(),
            });
        }
        if let Some((feature, _)) = self.coefficients.iter().find(|(_, w)| !w.is_finite()) {
            return Err(ModelError::NonFiniteCoefficient {
                classifier: self.name.clone(),
                feature: feature.clone(),
            });
        }
        if self.coefficients.is_empty() {
            return Err(ModelError::NoCoefficients(self.name.clone()));
        }
        Ok(())
    }

    /// `eta = intercept + X · w` for a design whose columns match `weights`.
    pub fn linear_predictor(
        &self,
        design: ArrayView2<f64>,
        weights: ArrayView1<f64>,
    ) -> Result<Array1<f64>, ModelError> {
        if design.ncols() != weights.len() {
            return Err(ModelError::MismatchedFeatureCount {
                found: design.ncols(),
                expected: weights.len(),
            });
        }
        Ok(design.dot(&weights) + self.intercept)
    }

    /// Scores every row of `design`.
    pub fn predict(
        &self,
        design: ArrayView2<f64>,
        weights: ArrayView1<f64>,
    ) -> Result<Array1<f64>, ModelError> {
        let eta = self.linear_predictor(design, weights)?;
        Ok(self.link_function.inverse(eta))
    }
}

fn is_intercept_label(feature: &str) -> bool {
    feature.eq_ignore_ascii_case("intercept") || feature.eq_ignore_ascii_case("(intercept)")
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};
    use std::io::Write;
    use tempfile::{NamedTempFile, tempdir};

    fn coefficient_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{content}").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn logistic_scores_follow_the_linear_predictor() {
        let scores = LinkFunction::Logit.inverse(array![0.2, -1.5, 3.0]);
        assert!(scores.iter().all(|&s| s > 0.0 && s < 1.0));
        assert!(scores[1] < scores[0] && scores[0] < scores[2]);
        assert_abs_diff_eq!(scores[0], 1.0 / (1.0 + (-0.2f64).exp()), epsilon = 1e-12);
    }

    #[test]
    fn extreme_predictors_are_clamped_into_the_open_interval() {
        let scores = LinkFunction::Logit.inverse(array![-1e6, 1e6]);
        assert_abs_diff_eq!(scores[0], 1e-8);
        assert_abs_diff_eq!(scores[1], 1.0 - 1e-8);
        let raw = LinkFunction::Identity.inverse(array![-4.0, 2.5]);
        assert_eq!(raw, array![-4.0, 2.5]);
    }

    #[test]
    fn coefficient_table_reads_intercept_and_drops_zero_weights() {
        let file = coefficient_file("feature\tweight\n(Intercept)\t-0.5\nKRAS\t1.25\nTP53\t0\nEGFR\t-2");
        let model = ClassifierModel::load("ras", file.path()).unwrap();
        assert_eq!(model.name, "ras");
        assert_abs_diff_eq!(model.intercept, -0.5);
        assert_eq!(
            model.coefficients.keys().collect::<Vec<_>>(),
            vec!["EGFR", "KRAS"]
        );
    }

    #[test]
    fn missing_intercept_defaults_to_zero() {
        let file = coefficient_file("feature\tweight\nKRAS\t1.0");
        let model = ClassifierModel::load("ras", file.path()).unwrap();
        assert_abs_diff_eq!(model.intercept, 0.0);
    }

    #[test]
    fn duplicate_features_are_rejected() {
        let file = coefficient_file("feature\tweight\nKRAS\t1.0\nKRAS\t0");
        match ClassifierModel::load("ras", file.path()) {
            Err(ModelError::DuplicateFeature { feature, .. }) => assert_eq!(feature, "KRAS"),
            other => panic!("Expected DuplicateFeature, got {other:?}"),
        }
    }

    #[test]
    fn all_zero_classifier_is_rejected() {
        let file = coefficient_file("feature\tweight\nintercept\t1\nKRAS\t0");
        assert!(matches!(
            ClassifierModel::load("ras", file.path()),
            Err(ModelError::NoCoefficients(_))
        ));
    }

    #[test]
    fn toml_artifact_round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tp53.toml");
        let model = ClassifierModel {
            name: "tp53".to_string(),
            link_function: LinkFunction::Logit,
            intercept: 0.1,
            coefficients: BTreeMap::from([("7157".to_string(), -0.75)]),
        };
        model.save(&path).unwrap();
        let loaded = ClassifierModel::load("tp53", &path).unwrap();
        assert_eq!(loaded, model);
    }

    #[test]
    fn predict_checks_design_width() {
        let model = ClassifierModel {
            name: "ras".to_string(),
            link_function: LinkFunction::Identity,
            intercept: 1.0,
            coefficients: BTreeMap::from([("KRAS".to_string(), 2.0)]),
        };
        let design = Array2::from_shape_vec((2, 2), vec![1.0, 0.0, -1.0, 3.0]).unwrap();
        let eta = model.predict(design.view(), array![2.0, 0.0].view()).unwrap();
        assert_eq!(eta, array![3.0, -1.0]);
        assert!(matches!(
            model.predict(design.view(), array![2.0].view()),
            Err(ModelError::MismatchedFeatureCount { .. })
        ));
    }
}
